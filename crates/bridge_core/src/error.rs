use shared::{
    domain::{LocalUserId, RemoteUserId},
    error::RemoteError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("account {0} is not logged in")]
    NotLoggedIn(LocalUserId),
    #[error("logged out")]
    LoggedOut,
    /// The session was stopped or logged out while the operation ran.
    #[error("session of {0} stopped before the operation finished")]
    Superseded(LocalUserId),
    #[error("remote id of account {0} is not known yet")]
    UnknownRemoteId(LocalUserId),
    #[error("remote service returned no profile for {0}")]
    MissingProfile(RemoteUserId),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SessionError {
    pub fn is_credential_error(&self) -> bool {
        matches!(self, Self::Remote(err) if err.is_credential_error())
    }
}
