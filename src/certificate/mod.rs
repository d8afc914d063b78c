//! Certificate value types shared by the adapter and backends
//!
//! - `CertificateProperties`: what a caller asks a backend to issue
//! - `CertificateInfo`: what a backend hands back (certificate, key, expiry)

pub mod info;
pub mod props;

pub use info::{CertificateInfo, PrivateKey, PrivateKeyType};
pub use props::{CertificateProperties, CertificateType};
