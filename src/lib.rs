// hsm-x509 - Device identity certificate adapter

pub mod backend;
pub mod certificate;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod x509;

pub use backend::{BackendHandle, CryptoBackend, CryptoBackendBinding, HsmBuffer, SimulatedBackend};
pub use certificate::{CertificateInfo, CertificateProperties, CertificateType, PrivateKey, PrivateKeyType};
pub use config::{AliasLookup, X509Config};
pub use error::{BackendError, X509Error, X509Result};
pub use x509::{interface, X509Context, X509Interface};
