//! Envelope signing, canonicalization, and the action codec shared by every
//! SyncBase peer. Pure functions and small value types only — no storage,
//! no networking, no knowledge of the View or the log.

pub mod canonical;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod pairing;

pub use crypto::{Envelope, Keypair};
pub use error::SdkError;
