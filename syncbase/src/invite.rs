//! Create, verify, revoke, and claim invites; binds blind-pairing to
//! log-level membership.
//!
//! Grounded on the teacher's X3DH-based pairing flow
//! (`freeq-sdk/src/x3dh.rs`), collapsed to the single shared-secret case
//! `syncbase_sdk::pairing` implements, and wired to the log the way the
//! teacher's connection layer wires a handshake to a registered peer.

use serde_json::json;
use syncbase_sdk::codec::ActionType;
use syncbase_sdk::crypto::{create_signed_action, now_ms, Keypair};
use syncbase_sdk::pairing::{self, Invite, PairedKeys};

use crate::error::SyncError;
use crate::log::ReplicatedLog;
use crate::view::{InviteRow, View};

/// Result of successfully creating an invite: the token to hand out and
/// the absolute expiry the claim side must respect.
#[derive(Debug, Clone)]
pub struct CreatedInvite {
    pub token: String,
    pub expires: u64,
}

/// Owner/admin/moderator side: mint a new invite and append it to the log.
pub fn create_invite(
    keypair: &Keypair,
    log: &dyn ReplicatedLog,
    expire_in_ms: u64,
) -> Result<CreatedInvite, SyncError> {
    let invite = pairing::create_invite();
    let expires = now_ms() + expire_in_ms;
    let payload = json!({
        "id": hex::encode(&invite.id),
        "invite": invite.token,
        "publicKey": hex::encode(invite.public_key),
        "expires": expires,
    });
    let envelope = create_signed_action(keypair, ActionType::CreateInvite, payload)?;
    log.append(envelope, false)?;
    Ok(CreatedInvite {
        token: invite.token,
        expires,
    })
}

/// Owner/admin/moderator side: tombstone an invite by deleting its row.
pub fn revoke_invite(keypair: &Keypair, log: &dyn ReplicatedLog, invite_id_hex: &str) -> Result<(), SyncError> {
    let payload = json!({ "id": invite_id_hex });
    let envelope = create_signed_action(keypair, ActionType::RevokeInvite, payload)?;
    log.append(envelope, false)?;
    Ok(())
}

/// Joining peer: decode a token, run the candidate side of blind pairing,
/// and append a `claim-invite` optimistically. Returns the derived keys the
/// caller needs to open the shared log and decrypt its contents.
pub fn claim_invite(
    keypair: &Keypair,
    log: &dyn ReplicatedLog,
    token: &str,
) -> Result<PairedKeys, SyncError> {
    let invite_id = pairing::decode_token(token)?;
    let keys = pairing::derive_paired_keys(&invite_id);
    let payload = json!({
        "id": syncbase_sdk::crypto::generate_id(16),
        "code": hex::encode(&invite_id),
    });
    let envelope = create_signed_action(keypair, ActionType::ClaimInvite, payload)?;
    log.append(envelope, true)?;
    Ok(keys)
}

/// Existing peer's admit side: given a claimed invite id, look it up and
/// confirm the candidate if it's still active. Returns `None` if the
/// invite is missing or expired — the candidate registration is simply
/// dropped, per the admit-flow error policy.
pub fn admit_candidate(view: &View, invite_id: &[u8]) -> Result<Option<PairedKeys>, SyncError> {
    let Some(invite) = view.get::<InviteRow>(invite_id)? else {
        return Ok(None);
    };
    if invite.expires <= now_ms() {
        return Ok(None);
    }
    Ok(Some(pairing::derive_paired_keys(invite_id)))
}

/// Re-derive an `Invite` description from a stored row, for display
/// (e.g. listing active invites in a CLI).
pub fn describe(row: &InviteRow) -> Invite {
    let id = hex::decode(&row.id).unwrap_or_default();
    let public_key = hex::decode(&row.public_key)
        .ok()
        .and_then(|b| b.try_into().ok())
        .unwrap_or([0u8; 32]);
    Invite {
        id,
        token: row.invite.clone(),
        public_key,
    }
}
