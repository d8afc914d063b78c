//! Error types for the identity adapter and its crypto backends

use thiserror::Error;

/// Failures reported by a `CryptoBackend` implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Backend initialization failed: {0}")]
    InitFailed(String),

    #[error("Backend instance creation failed: {0}")]
    InstanceFailed(String),

    #[error("Certificate creation failed: {0}")]
    CertificateFailed(String),

    #[error("Certificate not found for alias: {0}")]
    CertificateNotFound(String),

    #[error("Signing failed: {0}")]
    SignFailed(String),

    #[error("Unknown backend instance")]
    UnknownInstance,
}

/// Failures surfaced at the adapter boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum X509Error {
    #[error("X509 interface not initialized")]
    NotInitialized,

    #[error("Backend initialization error: {0}")]
    BackendInit(String),

    #[error("Backend create failure: {0}")]
    BackendCreate(String),

    #[error("Backend sign failure: {0}")]
    BackendSign(String),

    #[error("Certificate fetch failure: {0}")]
    BackendFetch(String),

    #[error("Invalid certificate properties: {0}")]
    InvalidProperties(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type X509Result<T> = Result<T, X509Error>;
