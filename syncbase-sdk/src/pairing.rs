//! Blind-pairing primitive: turns an invite token into the shared log key
//! and encryption key needed to admit a new writer.
//!
//! Create invite -> token; candidate presents token -> admitter matches by
//! invite-id -> returns shared key + encryption key. Both keys are derived
//! from the invite token via HKDF-SHA256, in the same spirit as the
//! original X3DH key agreement (`IdentityKeyPair` / `kdf_x3dh` in
//! `freeq-sdk/src/x3dh.rs`) but collapsed to the single-token case blind
//! pairing actually needs — no ephemeral ratchet session, just "derive two
//! 32-byte secrets from shared material."

use hkdf::Hkdf;
use sha2::Sha256;

use crate::crypto::generate_id;
use crate::error::SdkError;

/// A freshly minted invite, before it is wrapped into a `create-invite`
/// action and appended to the log.
#[derive(Debug, Clone)]
pub struct Invite {
    /// Raw invite bytes (used as the primary key in the `invite` collection).
    pub id: Vec<u8>,
    /// Base-32, transport-safe encoding of `id`.
    pub token: String,
    /// Public key the admitter will match the candidate's handshake against.
    pub public_key: [u8; 32],
}

/// Keys derived once a candidate's token is matched by the admitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedKeys {
    /// Key for the replicated log / discovery topic.
    pub server_key: [u8; 32],
    /// Key for encrypting view contents at rest / in transit.
    pub encryption_key: [u8; 32],
}

/// Create a new invite: a random 16-byte id, its base-32 token form, and a
/// throwaway public key the admitter can match candidates against.
pub fn create_invite() -> Invite {
    let id_hex = generate_id(16);
    let id = hex::decode(&id_hex).expect("generate_id produces valid hex");
    let token = encode_token(&id);
    // In a full blind-pairing handshake this would be a fresh X25519/Noise
    // public key published alongside the invite; here it's derived
    // deterministically from the id so admitter-side matching is a pure
    // function of the token, which is all the core needs from this
    // interface.
    let public_key = derive(&id, b"syncbase-invite-pubkey");
    Invite {
        id,
        token,
        public_key,
    }
}

/// Base-32 (RFC 4648, lowercase) encode an invite id for transport. The
/// `base32` crate only emits uppercase, so we lowercase on the way out and
/// uppercase on the way back in — decode is still the exact inverse.
pub fn encode_token(id: &[u8]) -> String {
    base32::encode(base32::Alphabet::Rfc4648 { padding: false }, id).to_lowercase()
}

/// Decode a transport token back into raw invite bytes. Whitespace is
/// rejected — callers must pass the exact token text.
pub fn decode_token(token: &str) -> Result<Vec<u8>, SdkError> {
    if token.chars().any(char::is_whitespace) {
        return Err(SdkError::InvalidToken("whitespace in token".into()));
    }
    base32::decode(base32::Alphabet::Rfc4648 { padding: false }, &token.to_uppercase())
        .ok_or_else(|| SdkError::InvalidToken("not valid base32".into()))
}

/// Candidate side: derive the same keys the admitter will derive, once the
/// admitter confirms a match on `invite_id`.
pub fn derive_paired_keys(invite_id: &[u8]) -> PairedKeys {
    PairedKeys {
        server_key: derive(invite_id, b"syncbase-server-key"),
        encryption_key: derive(invite_id, b"syncbase-encryption-key"),
    }
}

fn derive(invite_id: &[u8], info: &[u8]) -> [u8; 32] {
    // 32 bytes of 0xFF as salt, matching the teacher's X3DH KDF convention
    // of a fixed, well-known salt for a single-secret derivation.
    let salt = [0xFFu8; 32];
    let hk = Hkdf::<Sha256>::new(Some(&salt), invite_id);
    let mut out = [0u8; 32];
    hk.expand(info, &mut out).expect("32 bytes is a valid HKDF output length");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips() {
        let invite = create_invite();
        let decoded = decode_token(&invite.token).unwrap();
        assert_eq!(decoded, invite.id);
    }

    #[test]
    fn whitespace_in_token_is_rejected() {
        let invite = create_invite();
        let spaced = format!(" {}", invite.token);
        assert!(matches!(decode_token(&spaced), Err(SdkError::InvalidToken(_))));
    }

    #[test]
    fn candidate_and_admitter_derive_same_keys() {
        let invite = create_invite();
        let candidate_keys = derive_paired_keys(&invite.id);
        let admitter_keys = derive_paired_keys(&invite.id);
        assert_eq!(candidate_keys, admitter_keys);
    }

    #[test]
    fn different_invites_derive_different_keys() {
        let a = create_invite();
        let b = create_invite();
        assert_ne!(derive_paired_keys(&a.id), derive_paired_keys(&b.id));
    }
}
