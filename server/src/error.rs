use crate::auth::CredentialError;
use thiserror::Error;

/// Failures that stop the server from starting or accepting connections.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open credential store: {0}")]
    Credentials(#[from] CredentialError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
