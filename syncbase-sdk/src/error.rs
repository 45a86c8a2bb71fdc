//! Error taxonomy shared across the SDK.

/// Errors a peer can run into while signing, verifying, or codec'ing an
/// action. Mirrors the kinds named in the SyncBase error taxonomy; the
/// storage- and authorization-specific kinds (`Unauthorized`, `NotFound`,
/// `Conflict`, `Expired`, `Timeout`, `Transport`) live in `syncbase::error`
/// since they need the View/Instance to make sense.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error("instance was opened read-only, no secret key available")]
    NoSecretKey,

    #[error("malformed action: {0}")]
    MalformedAction(String),

    #[error("unknown action type tag {0}")]
    UnknownActionType(u8),

    #[error("bad signature")]
    BadSignature,

    #[error("invalid invite token: {0}")]
    InvalidToken(String),

    #[error("key derivation failed: {0}")]
    Kdf(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
