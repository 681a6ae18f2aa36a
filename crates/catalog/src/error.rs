use overlay_transport::TransportError;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("No API key available from any source")]
    NoCredential,

    #[error("Catalog fetch failed: {0}")]
    Remote(#[from] TransportError),

    /// The credential was replaced while the fetch was outstanding; its result was dropped.
    #[error("Catalog fetch superseded by a credential change")]
    Superseded,
}

/// Operator-facing classification of a catalog failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CredentialMissing,
    TransportBlocked,
    RemoteApplicationError,
    MalformedResponse,
    Superseded,
}

impl CatalogError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NoCredential => ErrorKind::CredentialMissing,
            Self::Remote(TransportError::Blocked(_)) => ErrorKind::TransportBlocked,
            Self::Remote(TransportError::Application(_)) => ErrorKind::RemoteApplicationError,
            Self::Remote(TransportError::Malformed(_)) => ErrorKind::MalformedResponse,
            Self::Superseded => ErrorKind::Superseded,
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
