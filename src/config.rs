//! Device identity configuration
//!
//! Names the backend-resident device CA certificate and describes how it is
//! requested when missing. Stored as JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::certificate::{CertificateProperties, CertificateType};
use crate::error::X509Error;

pub const DEFAULT_DEVICE_CA_ALIAS: &str = "device_ca_alias";
pub const DEFAULT_DEVICE_CA_COMMON_NAME: &str = "iotedged device ca";
/// 90 days.
pub const DEFAULT_DEVICE_CA_VALIDITY_SECS: u64 = 90 * 24 * 3600;

/// Source of the alias naming the device identity certificate.
pub trait AliasLookup: Send + Sync {
    fn device_ca_alias(&self) -> &str;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct X509Config {
    pub device_ca_alias: String,
    /// Issuer of the device CA. Equal to `device_ca_alias` for a self-signed CA.
    pub issuer_alias: String,
    pub common_name: String,
    pub validity_secs: u64,
    pub certificate_type: CertificateType,
}

impl Default for X509Config {
    fn default() -> Self {
        Self {
            device_ca_alias: DEFAULT_DEVICE_CA_ALIAS.to_string(),
            issuer_alias: DEFAULT_DEVICE_CA_ALIAS.to_string(),
            common_name: DEFAULT_DEVICE_CA_COMMON_NAME.to_string(),
            validity_secs: DEFAULT_DEVICE_CA_VALIDITY_SECS,
            certificate_type: CertificateType::Ca,
        }
    }
}

impl X509Config {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, X509Error> {
        let data = std::fs::read(path).map_err(|e| X509Error::Config(e.to_string()))?;
        let config: Self =
            serde_json::from_slice(&data).map_err(|e| X509Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, X509Error> {
        if path.exists() {
            Self::load(path)
        } else {
            log::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), X509Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| X509Error::Config(e.to_string()))?;
        }

        let json =
            serde_json::to_string_pretty(self).map_err(|e| X509Error::Config(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| X509Error::Config(e.to_string()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), X509Error> {
        self.device_ca_properties()
            .validate()
            .map_err(|e| X509Error::Config(e.to_string()))
    }

    /// Properties for requesting the device CA certificate.
    pub fn device_ca_properties(&self) -> CertificateProperties {
        CertificateProperties::new()
            .with_alias(&self.device_ca_alias)
            .with_issuer_alias(&self.issuer_alias)
            .with_common_name(&self.common_name)
            .with_validity_secs(self.validity_secs)
            .with_certificate_type(self.certificate_type)
    }
}

impl AliasLookup for X509Config {
    fn device_ca_alias(&self) -> &str {
        &self.device_ca_alias
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = X509Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device_ca_alias(), DEFAULT_DEVICE_CA_ALIAS);

        let props = config.device_ca_properties();
        assert!(props.is_self_signed());
        assert_eq!(props.certificate_type(), CertificateType::Ca);
        assert_eq!(props.validity_secs(), DEFAULT_DEVICE_CA_VALIDITY_SECS);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("x509.json");

        let original = X509Config {
            device_ca_alias: "edge_ca".to_string(),
            issuer_alias: "edge_ca".to_string(),
            common_name: "my device".to_string(),
            validity_secs: 60,
            certificate_type: CertificateType::Server,
        };
        original.save(&path).unwrap();

        let loaded = X509Config::load(&path).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x509.json");
        std::fs::write(&path, r#"{ "common_name": "partial" }"#).unwrap();

        let loaded = X509Config::load(&path).unwrap();
        assert_eq!(loaded.common_name, "partial");
        assert_eq!(loaded.device_ca_alias, DEFAULT_DEVICE_CA_ALIAS);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x509.json");
        std::fs::write(&path, r#"{ "validity_secs": 0 }"#).unwrap();

        assert!(matches!(X509Config::load(&path), Err(X509Error::Config(_))));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(X509Config::load(&path), Err(X509Error::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert_eq!(X509Config::load_or_default(&path).unwrap(), X509Config::default());
    }
}
