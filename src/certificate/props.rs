//! Certificate request properties
//!
//! Describes a certificate the backend should issue. The adapter builds one of
//! these from configuration for the device CA; backends only read it.

use serde::{Deserialize, Serialize};

use crate::error::X509Error;

/// Kind of certificate being requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateType {
    Client,
    Server,
    Ca,
    Unknown,
}

impl Default for CertificateType {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Builder-style description of a certificate request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CertificateProperties {
    alias: String,
    issuer_alias: String,
    common_name: String,
    validity_secs: u64,
    certificate_type: CertificateType,
}

impl CertificateProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn with_issuer_alias(mut self, issuer_alias: impl Into<String>) -> Self {
        self.issuer_alias = issuer_alias.into();
        self
    }

    pub fn with_common_name(mut self, common_name: impl Into<String>) -> Self {
        self.common_name = common_name.into();
        self
    }

    pub fn with_validity_secs(mut self, validity_secs: u64) -> Self {
        self.validity_secs = validity_secs;
        self
    }

    pub fn with_certificate_type(mut self, certificate_type: CertificateType) -> Self {
        self.certificate_type = certificate_type;
        self
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn issuer_alias(&self) -> &str {
        &self.issuer_alias
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn validity_secs(&self) -> u64 {
        self.validity_secs
    }

    pub fn certificate_type(&self) -> CertificateType {
        self.certificate_type
    }

    /// A certificate is self-signed when it names itself as issuer.
    pub fn is_self_signed(&self) -> bool {
        self.alias == self.issuer_alias
    }

    /// Check that every field a backend needs has been set.
    pub fn validate(&self) -> Result<(), X509Error> {
        if self.alias.is_empty() {
            return Err(X509Error::InvalidProperties("alias is empty".to_string()));
        }
        if self.issuer_alias.is_empty() {
            return Err(X509Error::InvalidProperties(
                "issuer alias is empty".to_string(),
            ));
        }
        if self.common_name.is_empty() {
            return Err(X509Error::InvalidProperties(
                "common name is empty".to_string(),
            ));
        }
        if self.validity_secs == 0 {
            return Err(X509Error::InvalidProperties(
                "validity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
