//! Crypto backends
//!
//! The adapter never does cryptography itself. Everything goes through a
//! `CryptoBackend`, held by a `CryptoBackendBinding` that can be re-pointed at
//! another backend between calls.
//!
//! - `CryptoBackend`: the backend operation table
//! - `CryptoBackendBinding`: the active backend plus its single instance slot
//! - `SimulatedBackend`: in-process backend for development and tests

pub mod binding;
pub mod simulated;

pub use binding::CryptoBackendBinding;
pub use simulated::{BackendCall, BackendOp, SimulatedBackend};

use std::fmt;

use uuid::Uuid;

use crate::certificate::{CertificateInfo, CertificateProperties};
use crate::error::BackendError;

/// Opaque token for a backend instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BackendHandle(Uuid);

impl BackendHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for BackendHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A buffer allocated by a backend and handed to the caller, such as a
/// signature digest. Give it back with `free_buffer` when done.
#[derive(Clone, PartialEq, Eq)]
pub struct HsmBuffer {
    bytes: Vec<u8>,
}

impl HsmBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for HsmBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HsmBuffer({} bytes)", self.bytes.len())
    }
}

/// Operation table of a crypto backend.
///
/// Implementations must be safe to share between threads; every method is
/// synchronous and runs to completion.
pub trait CryptoBackend: Send + Sync {
    /// Backend-wide initialization, called when a context goes from 0 to 1.
    fn init(&self) -> Result<(), BackendError>;

    /// Backend-wide teardown, called when a context goes from 1 to 0.
    fn deinit(&self);

    fn create_instance(&self) -> Result<BackendHandle, BackendError>;

    fn destroy_instance(&self, handle: BackendHandle);

    fn create_certificate(
        &self,
        handle: &BackendHandle,
        props: &CertificateProperties,
    ) -> Result<CertificateInfo, BackendError>;

    fn get_certificate(
        &self,
        handle: &BackendHandle,
        alias: &str,
    ) -> Result<CertificateInfo, BackendError>;

    fn destroy_certificate(&self, handle: &BackendHandle, alias: &str);

    /// Sign `data` with the private key stored under `alias`.
    fn sign_with_private_key(
        &self,
        handle: &BackendHandle,
        alias: &str,
        data: &[u8],
    ) -> Result<HsmBuffer, BackendError>;

    /// Release a buffer this backend handed out. `None` is accepted.
    fn free_buffer(&self, buffer: Option<HsmBuffer>);
}
