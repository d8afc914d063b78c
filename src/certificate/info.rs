//! Certificate info values handed out to callers
//!
//! A `CertificateInfo` is what `create` and `get_cert_info` return: the
//! certificate text, optional private key material, the key-type tag, the
//! expiry timestamp and the subject common name. Ownership belongs to the
//! caller; private key bytes are zeroized when the value is dropped.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// How the private key accompanying a certificate is represented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrivateKeyType {
    /// Raw key bytes.
    Payload,
    /// A backend-resident reference (e.g. an alias), not key material.
    Reference,
    Unknown,
}

/// Private key bytes, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey {
    bytes: Vec<u8>,
}

impl PrivateKey {
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

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("len", &self.bytes.len())
            .field("bytes", &"[redacted]")
            .finish()
    }
}

/// A certificate handle owned by the caller.
pub struct CertificateInfo {
    id: Uuid,
    certificate: String,
    private_key: Option<PrivateKey>,
    private_key_type: PrivateKeyType,
    valid_to: i64,
    common_name: String,
}

impl CertificateInfo {
    /// Build a certificate handle. `valid_to` is seconds since the Unix epoch.
    pub fn new(
        certificate: impl Into<String>,
        private_key: Option<PrivateKey>,
        private_key_type: PrivateKeyType,
        valid_to: i64,
        common_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            certificate: certificate.into(),
            private_key,
            private_key_type,
            valid_to,
            common_name: common_name.into(),
        }
    }

    /// Unique id of this handle. Two handles never share an id, even when
    /// they describe the same backend certificate.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    pub fn private_key(&self) -> Option<&PrivateKey> {
        self.private_key.as_ref()
    }

    pub fn private_key_type(&self) -> PrivateKeyType {
        self.private_key_type
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    /// Expiry as seconds since the Unix epoch.
    pub fn valid_to(&self) -> i64 {
        self.valid_to
    }

    pub fn valid_to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.valid_to, 0).single()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.valid_to
    }

    /// Hex SHA-256 of the certificate text.
    pub fn thumbprint(&self) -> String {
        hex::encode(Sha256::digest(self.certificate.as_bytes()))
    }

    /// A handle with no certificate text carries nothing a caller can use.
    pub fn is_malformed(&self) -> bool {
        self.certificate.is_empty()
    }
}

impl fmt::Debug for CertificateInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateInfo")
            .field("id", &self.id)
            .field("common_name", &self.common_name)
            .field("valid_to", &self.valid_to)
            .field("private_key_type", &self.private_key_type)
            .field("private_key", &self.private_key.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}
