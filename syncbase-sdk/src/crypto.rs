//! Deterministic keypair derivation, detached signatures, and signed-action
//! construction.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::canonical;
use crate::codec::ActionType;
use crate::error::SdkError;

/// A peer's signing identity. Holds the secret key when the instance was
/// opened for writing; holds only the public key when opened read-only
/// (e.g. a spectator replaying someone else's log).
pub enum Keypair {
    Writable(SigningKey),
    ReadOnly(VerifyingKey),
}

impl Keypair {
    /// Derive a keypair deterministically from a human-readable seed phrase:
    /// `phrase -> SHA-256 -> 32-byte seed -> ed25519 signing key`. Same
    /// phrase always yields the same keypair, which is what lets a CLI user
    /// reopen the same identity across runs with `--seed`.
    pub fn from_seed_phrase(phrase: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(phrase.as_bytes());
        let seed: [u8; 32] = hasher.finalize().into();
        Keypair::Writable(SigningKey::from_bytes(&seed))
    }

    /// Wrap a known public key for read-only verification.
    pub fn read_only(public_key: VerifyingKey) -> Self {
        Keypair::ReadOnly(public_key)
    }

    pub fn public_key(&self) -> VerifyingKey {
        match self {
            Keypair::Writable(sk) => sk.verifying_key(),
            Keypair::ReadOnly(pk) => *pk,
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public_key().to_bytes()
    }

    /// Produce a detached Ed25519 signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; 64], SdkError> {
        match self {
            Keypair::Writable(sk) => Ok(sk.sign(message).to_bytes()),
            Keypair::ReadOnly(_) => Err(SdkError::NoSecretKey),
        }
    }
}

/// Constant-time-verified detached signature check. Returns `false` on any
/// structural error (malformed key/signature bytes) rather than erroring —
/// a validator never wants to special-case "couldn't even parse this."
pub fn verify(sig: &[u8; 64], message: &[u8], pubkey: &[u8; 32]) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(pubkey) else {
        return false;
    };
    let signature = Signature::from_bytes(sig);
    vk.verify(message, &signature).is_ok()
}

/// Generate a cryptographically random identifier, hex-encoded.
pub fn generate_id(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The only thing the log carries: a typed, signed payload.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub payload: serde_json::Value,
    /// 32-byte public key of the signer, hex-encoded.
    pub signer: String,
    /// 64-byte detached signature, hex-encoded.
    pub signature: String,
}

impl Envelope {
    /// Recover the signer's public key bytes.
    pub fn signer_bytes(&self) -> Result<[u8; 32], SdkError> {
        let bytes = hex::decode(&self.signer)
            .map_err(|e| SdkError::MalformedAction(format!("signer: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| SdkError::MalformedAction("signer must be 32 bytes".into()))
    }

    /// Recover the signature bytes.
    pub fn signature_bytes(&self) -> Result<[u8; 64], SdkError> {
        let bytes = hex::decode(&self.signature)
            .map_err(|e| SdkError::MalformedAction(format!("signature: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| SdkError::MalformedAction("signature must be 64 bytes".into()))
    }

    /// Verify this envelope's signature against its own canonical payload.
    pub fn verify(&self) -> bool {
        let Ok(signer) = self.signer_bytes() else {
            return false;
        };
        let Ok(sig) = self.signature_bytes() else {
            return false;
        };
        let Ok(bytes) = canonical::canonicalize_for_signing(&self.payload) else {
            return false;
        };
        verify(&sig, &bytes, &signer)
    }
}

/// Build and sign a new envelope. Injects `timestamp = now_ms()` into the
/// payload if it is not already present, then signs the canonical form of
/// the payload with `timestamp` elided. The returned envelope's payload
/// still carries the timestamp — only the signed bytes omit it.
pub fn create_signed_action(
    keypair: &Keypair,
    action_type: ActionType,
    mut payload: serde_json::Value,
) -> Result<Envelope, SdkError> {
    if let serde_json::Value::Object(ref mut map) = payload
        && !map.contains_key("timestamp")
    {
        map.insert("timestamp".into(), serde_json::Value::from(now_ms()));
    }
    let signing_bytes = canonical::canonicalize_for_signing(&payload)?;
    let signature = keypair.sign(&signing_bytes)?;
    Ok(Envelope {
        action_type,
        payload,
        signer: hex::encode(keypair.public_key_bytes()),
        signature: hex::encode(signature),
    })
}

/// Milliseconds since epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derivation_is_deterministic() {
        let a = Keypair::from_seed_phrase("alpha");
        let b = Keypair::from_seed_phrase("alpha");
        assert_eq!(a.public_key_bytes(), b.public_key_bytes());
    }

    #[test]
    fn different_seeds_differ() {
        let a = Keypair::from_seed_phrase("alpha");
        let b = Keypair::from_seed_phrase("beta");
        assert_ne!(a.public_key_bytes(), b.public_key_bytes());
    }

    #[test]
    fn read_only_keypair_cannot_sign() {
        let writable = Keypair::from_seed_phrase("alpha");
        let ro = Keypair::read_only(writable.public_key());
        assert!(matches!(ro.sign(b"hi"), Err(SdkError::NoSecretKey)));
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let kp = Keypair::from_seed_phrase("alpha");
        let sig = kp.sign(b"hello").unwrap();
        assert!(verify(&sig, b"hello", &kp.public_key_bytes()));
        assert!(!verify(&sig, b"tampered", &kp.public_key_bytes()));
    }

    #[test]
    fn verify_rejects_structurally_bad_key() {
        assert!(!verify(&[0u8; 64], b"hello", &[0u8; 32]));
    }

    #[test]
    fn signed_action_verifies_and_ignores_timestamp_tampering() {
        let kp = Keypair::from_seed_phrase("alpha");
        let env = create_signed_action(
            &kp,
            ActionType::CreateServer,
            json!({"id": "s1", "name": "Test"}),
        )
        .unwrap();
        assert!(env.verify());

        let mut tampered = env.clone();
        if let serde_json::Value::Object(ref mut m) = tampered.payload {
            m.insert("timestamp".into(), json!(999999999u64));
        }
        // Timestamp is advisory and excluded from the signed bytes, so
        // changing it alone does not invalidate the signature.
        assert!(tampered.verify());

        let mut corrupted = env;
        if let serde_json::Value::Object(ref mut m) = corrupted.payload {
            m.insert("name".into(), json!("Evil"));
        }
        assert!(!corrupted.verify());
    }

    #[test]
    fn generate_id_has_requested_length() {
        let id = generate_id(16);
        assert_eq!(id.len(), 32); // hex doubles byte length
    }
}
