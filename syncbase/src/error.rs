//! Error taxonomy for the View, Validator, Router, InviteMgr, and Instance.
//!
//! `syncbase_sdk::SdkError` covers the signing/codec-level kinds
//! (`MalformedAction`, `BadSignature`, `UnknownActionType`); this enum adds
//! the storage- and authorization-level kinds that need the View to make
//! sense.

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Sdk(#[from] syncbase_sdk::SdkError),

    #[error("not found")]
    NotFound,

    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("expired")]
    Expired,

    #[error("operation timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sled::Error> for SyncError {
    fn from(e: sled::Error) -> Self {
        SyncError::Internal(format!("sled: {e}"))
    }
}
