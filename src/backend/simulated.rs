//! In-process crypto backend simulator
//!
//! Issues certificates and signs data entirely in memory, so the adapter can
//! be exercised without an HSM. Keys are Ed25519. Certificates are
//! PEM-armoured JSON records signed by the issuer's key; they are not DER
//! X.509 and are only meant to be read back by this simulator.
//!
//! Every call is journaled, and any operation can be told to fail, which lets
//! tests assert exactly which backend calls an adapter operation made.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey, Verifier};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BackendHandle, CryptoBackend, HsmBuffer};
use crate::certificate::{
    CertificateInfo, CertificateProperties, CertificateType, PrivateKey, PrivateKeyType,
};
use crate::error::BackendError;

const PEM_LINE_WIDTH: usize = 64;

/// Backend operations, as recorded in the journal and used for failure injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Init,
    Deinit,
    CreateInstance,
    DestroyInstance,
    CreateCertificate,
    GetCertificate,
    DestroyCertificate,
    Sign,
    FreeBuffer,
}

/// One journaled backend call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendCall {
    pub op: BackendOp,
    /// Certificate alias the call addressed, when it takes one.
    pub alias: Option<String>,
}

/// Signed body of a simulated certificate.
#[derive(Serialize, Deserialize)]
struct SimCertificateBody {
    serial: Uuid,
    subject: String,
    issuer: String,
    certificate_type: CertificateType,
    not_before: i64,
    not_after: i64,
    public_key: String,
}

#[derive(Serialize, Deserialize)]
struct SimCertificate {
    body: SimCertificateBody,
    signature: String,
}

struct StoredCertificate {
    signing_key: SigningKey,
    pem: String,
    common_name: String,
    valid_to: i64,
}

impl StoredCertificate {
    fn to_info(&self) -> CertificateInfo {
        CertificateInfo::new(
            self.pem.clone(),
            Some(PrivateKey::new(self.signing_key.to_bytes().to_vec())),
            PrivateKeyType::Payload,
            self.valid_to,
            self.common_name.clone(),
        )
    }
}

#[derive(Default)]
struct SimState {
    initialized: bool,
    instances: HashSet<BackendHandle>,
    certificates: HashMap<String, StoredCertificate>,
    failures: HashSet<BackendOp>,
    calls: Vec<BackendCall>,
    freed_buffers: usize,
}

impl SimState {
    /// Journal a call and report whether it was told to fail.
    fn enter(&mut self, op: BackendOp, alias: Option<&str>) -> bool {
        self.calls.push(BackendCall {
            op,
            alias: alias.map(str::to_string),
        });
        self.failures.contains(&op)
    }

    fn check_instance(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        if self.instances.contains(handle) {
            Ok(())
        } else {
            Err(BackendError::UnknownInstance)
        }
    }
}

/// A `CryptoBackend` living entirely in process memory.
pub struct SimulatedBackend {
    state: Mutex<SimState>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState::default()),
        }
    }

    /// Make every subsequent call of `op` fail.
    pub fn fail_on(&self, op: BackendOp) {
        self.state().failures.insert(op);
    }

    pub fn clear_failure(&self, op: BackendOp) {
        self.state().failures.remove(&op);
    }

    /// Every call made so far, oldest first.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state().calls.clone()
    }

    pub fn count(&self, op: BackendOp) -> usize {
        self.state().calls.iter().filter(|c| c.op == op).count()
    }

    pub fn reset_calls(&self) {
        self.state().calls.clear();
    }

    pub fn is_initialized(&self) -> bool {
        self.state().initialized
    }

    pub fn live_instances(&self) -> usize {
        self.state().instances.len()
    }

    pub fn has_certificate(&self, alias: &str) -> bool {
        self.state().certificates.contains_key(alias)
    }

    /// Number of `Some` buffers handed back through `free_buffer`.
    pub fn freed_buffers(&self) -> usize {
        self.state().freed_buffers
    }

    /// Check a signature produced by `sign_with_private_key` for `alias`.
    pub fn verify(&self, alias: &str, data: &[u8], signature: &[u8]) -> bool {
        let state = self.state();
        let Some(stored) = state.certificates.get(alias) else {
            return false;
        };
        let sig_bytes: [u8; 64] = match signature.try_into() {
            Ok(b) => b,
            Err(_) => return false,
        };
        let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        stored.signing_key.verifying_key().verify(data, &sig).is_ok()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn issue(
        state: &SimState,
        props: &CertificateProperties,
    ) -> Result<StoredCertificate, BackendError> {
        let signing_key = SigningKey::generate(&mut OsRng);

        let (issuer_key, issuer_name) = if props.is_self_signed() {
            (&signing_key, props.common_name().to_string())
        } else {
            let issuer = state.certificates.get(props.issuer_alias()).ok_or_else(|| {
                BackendError::CertificateFailed(format!(
                    "issuer '{}' not found",
                    props.issuer_alias()
                ))
            })?;
            (&issuer.signing_key, issuer.common_name.clone())
        };

        let not_before = Utc::now().timestamp();
        let validity = i64::try_from(props.validity_secs()).unwrap_or(i64::MAX);
        let not_after = not_before.saturating_add(validity);

        let body = SimCertificateBody {
            serial: Uuid::new_v4(),
            subject: props.common_name().to_string(),
            issuer: issuer_name,
            certificate_type: props.certificate_type(),
            not_before,
            not_after,
            public_key: hex::encode(signing_key.verifying_key().to_bytes()),
        };
        let body_bytes = serde_json::to_vec(&body)
            .map_err(|e| BackendError::CertificateFailed(e.to_string()))?;
        let signature = issuer_key.sign(&body_bytes);

        let record = SimCertificate {
            body,
            signature: hex::encode(signature.to_bytes()),
        };
        let der = serde_json::to_vec(&record)
            .map_err(|e| BackendError::CertificateFailed(e.to_string()))?;

        Ok(StoredCertificate {
            signing_key,
            pem: pem_armor(&der),
            common_name: props.common_name().to_string(),
            valid_to: not_after,
        })
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CryptoBackend for SimulatedBackend {
    fn init(&self) -> Result<(), BackendError> {
        let mut state = self.state();
        if state.enter(BackendOp::Init, None) {
            return Err(BackendError::InitFailed("injected failure".to_string()));
        }
        state.initialized = true;
        Ok(())
    }

    fn deinit(&self) {
        let mut state = self.state();
        state.enter(BackendOp::Deinit, None);
        state.initialized = false;
    }

    fn create_instance(&self) -> Result<BackendHandle, BackendError> {
        let mut state = self.state();
        if state.enter(BackendOp::CreateInstance, None) {
            return Err(BackendError::InstanceFailed("injected failure".to_string()));
        }
        let handle = BackendHandle::new();
        state.instances.insert(handle);
        Ok(handle)
    }

    fn destroy_instance(&self, handle: BackendHandle) {
        let mut state = self.state();
        state.enter(BackendOp::DestroyInstance, None);
        state.instances.remove(&handle);
    }

    fn create_certificate(
        &self,
        handle: &BackendHandle,
        props: &CertificateProperties,
    ) -> Result<CertificateInfo, BackendError> {
        let mut state = self.state();
        if state.enter(BackendOp::CreateCertificate, Some(props.alias())) {
            return Err(BackendError::CertificateFailed("injected failure".to_string()));
        }
        state.check_instance(handle)?;

        let stored = Self::issue(&state, props)?;
        let info = stored.to_info();
        state.certificates.insert(props.alias().to_string(), stored);
        Ok(info)
    }

    fn get_certificate(
        &self,
        handle: &BackendHandle,
        alias: &str,
    ) -> Result<CertificateInfo, BackendError> {
        let mut state = self.state();
        if state.enter(BackendOp::GetCertificate, Some(alias)) {
            return Err(BackendError::CertificateNotFound(alias.to_string()));
        }
        state.check_instance(handle)?;

        state
            .certificates
            .get(alias)
            .map(StoredCertificate::to_info)
            .ok_or_else(|| BackendError::CertificateNotFound(alias.to_string()))
    }

    fn destroy_certificate(&self, handle: &BackendHandle, alias: &str) {
        let mut state = self.state();
        state.enter(BackendOp::DestroyCertificate, Some(alias));
        if state.check_instance(handle).is_ok() {
            state.certificates.remove(alias);
        }
    }

    fn sign_with_private_key(
        &self,
        handle: &BackendHandle,
        alias: &str,
        data: &[u8],
    ) -> Result<HsmBuffer, BackendError> {
        let mut state = self.state();
        if state.enter(BackendOp::Sign, Some(alias)) {
            return Err(BackendError::SignFailed("injected failure".to_string()));
        }
        state.check_instance(handle)?;

        let stored = state
            .certificates
            .get(alias)
            .ok_or_else(|| BackendError::SignFailed(format!("no key for alias '{}'", alias)))?;
        let signature = stored.signing_key.sign(data);
        Ok(HsmBuffer::new(signature.to_bytes().to_vec()))
    }

    fn free_buffer(&self, buffer: Option<HsmBuffer>) {
        let mut state = self.state();
        state.enter(BackendOp::FreeBuffer, None);
        if buffer.is_some() {
            state.freed_buffers += 1;
        }
    }
}

fn pem_armor(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut pem = String::from("-----BEGIN CERTIFICATE-----\n");
    // base64 output is ASCII, so byte chunks are valid UTF-8
    for line in encoded.as_bytes().chunks(PEM_LINE_WIDTH) {
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str("-----END CERTIFICATE-----\n");
    pem
}
