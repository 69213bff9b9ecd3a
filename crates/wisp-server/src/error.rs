use thiserror::Error;

/// Error kinds surfaced by the storage engine and service layer.
///
/// `NotFound` deliberately covers "never existed", "already consumed",
/// and "expired"; callers must not be able to tell them apart.
/// `Internal` carries the underlying cause for logs; the transport layer
/// maps it to a generic response so storage details never leave the
/// process.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid secret id")]
    InvalidId,

    #[error("ttl out of bounds")]
    TtlInvalid,

    #[error("size out of bounds")]
    SizeExceeded,

    #[error("secret not found")]
    NotFound,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Returns true for the kinds a caller can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidId | Error::TtlInvalid | Error::SizeExceeded | Error::NotFound
        )
    }
}
