//! Error types for the sync server.

use thiserror::Error;

/// Result type for server setup.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that prevent the server from starting.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The credential store could not be loaded.
    #[error("{0}")]
    Auth(#[from] crate::auth::AuthError),

    /// The master file could not be opened.
    #[error("{0}")]
    Tracker(#[from] crate::tracker::TrackerError),

    /// I/O error (audit log, listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for dispatcher operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors a remote call can end in.
///
/// None of these cross the remote boundary as a fault: the dispatcher
/// turns every variant into a failure envelope carrying its `Display` text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Unknown username or wrong password. Both read the same.
    #[error("Invalid credentials")]
    AuthenticationFailed,

    /// The method name is not in the remote allowlist.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Confirm/acknowledge referenced a record that does not exist.
    #[error("Unknown sync ID: {0}")]
    UnknownSyncId(String),

    /// A required parameter was missing or had the wrong shape.
    #[error("Invalid parameter: {0}")]
    InvalidParams(String),

    /// Unexpected fault while performing the operation.
    #[error("{0}")]
    Internal(String),
}

impl DispatchError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DispatchError::AuthenticationFailed
                | DispatchError::MethodNotFound(_)
                | DispatchError::UnknownSyncId(_)
                | DispatchError::InvalidParams(_)
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, DispatchError::Internal(_))
    }
}

impl From<crate::tracker::TrackerError> for DispatchError {
    fn from(err: crate::tracker::TrackerError) -> Self {
        DispatchError::Internal(err.to_string())
    }
}

impl From<crate::registry::RegistryError> for DispatchError {
    fn from(err: crate::registry::RegistryError) -> Self {
        match err {
            crate::registry::RegistryError::UnknownSyncId(id) => DispatchError::UnknownSyncId(id),
        }
    }
}
