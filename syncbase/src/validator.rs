//! Pure, view-parameterized authorization and structural checks.
//!
//! Every function here is `(action, view) -> bool`-shaped: no mutation, no
//! side effects, safe to call speculatively before the router commits to
//! applying an entry. Grounded on the teacher's policy engine
//! (`freeq-server/src/policy/types.rs`'s `AuthoritySet`/`Permission` closed
//! sets), simplified from the teacher's open requirement DSL down to the
//! fixed five-role table this payload actually needs.

use serde_json::Value;
use syncbase_sdk::canonical;
use syncbase_sdk::crypto::Envelope;

use crate::view::{Collection, InviteRow, MessageRow, RoleKind, RoleRow, Row, ServerRow, View};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ManageServer,
    ManageChannels,
    SendMessages,
    DeleteMessages,
    SetRole,
    CreateInvites,
    ManageInvites,
    EditServer,
    EditChannel,
    DeleteChannel,
}

/// Closed role -> permission-set mapping, matching the authorization table
/// exactly. No role gains a permission not listed here.
pub fn role_permissions(role: RoleKind) -> &'static [Permission] {
    use Permission::*;
    match role {
        RoleKind::Owner => &[
            ManageServer,
            ManageChannels,
            SendMessages,
            DeleteMessages,
            SetRole,
            CreateInvites,
            ManageInvites,
            EditServer,
            EditChannel,
            DeleteChannel,
        ],
        RoleKind::Admin => &[
            ManageServer,
            ManageChannels,
            SendMessages,
            DeleteMessages,
            SetRole,
            CreateInvites,
            ManageInvites,
            EditChannel,
        ],
        RoleKind::Moderator => &[SendMessages, DeleteMessages, CreateInvites, ManageInvites],
        RoleKind::Member => &[SendMessages],
        RoleKind::Guest => &[],
    }
}

pub fn role_has(role: RoleKind, perm: Permission) -> bool {
    role_permissions(role).contains(&perm)
}

/// Look up the caller's current role, defaulting to `Guest` for a signer
/// with no role row (e.g. a not-yet-admitted candidate).
pub fn role_of(view: &View, user_id: &str) -> Result<RoleKind, crate::error::SyncError> {
    Ok(view
        .find_one::<RoleRow>(|r| r.user_id == user_id)?
        .map(|r| r.role)
        .unwrap_or(RoleKind::Guest))
}

/// Signature check, run before any structural or authorization check on
/// every non-optimistic action.
pub fn verify_signature(envelope: &Envelope) -> bool {
    envelope.verify()
}

fn obj(payload: &Value) -> Option<&serde_json::Map<String, Value>> {
    payload.as_object()
}

fn str_field<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    obj(payload)?.get(field)?.as_str()
}

fn u64_field(payload: &Value, field: &str) -> Option<u64> {
    obj(payload)?.get(field)?.as_u64()
}

pub fn validate_create_server(payload: &Value, view: &View) -> Result<bool, crate::error::SyncError> {
    if str_field(payload, "id").is_none() || str_field(payload, "name").is_none() {
        return Ok(false);
    }
    Ok(view.find_one::<ServerRow>(|_| true)?.is_none())
}

pub fn validate_update_server(
    payload: &Value,
    signer: &str,
    view: &View,
) -> Result<bool, crate::error::SyncError> {
    let Some(id) = str_field(payload, "id") else {
        return Ok(false);
    };
    if view.get::<ServerRow>(id.as_bytes())?.is_none() {
        return Ok(false);
    }
    let role = role_of(view, signer)?;
    Ok(role_has(role, Permission::ManageServer))
}

pub fn validate_create_channel(
    payload: &Value,
    signer: &str,
    view: &View,
) -> Result<bool, crate::error::SyncError> {
    use crate::view::ChannelRow;
    if view.find_one::<ServerRow>(|_| true)?.is_none() {
        return Ok(false);
    }
    let (Some(channel_id), Some(name)) = (str_field(payload, "channelId"), str_field(payload, "name"))
    else {
        return Ok(false);
    };
    let role = role_of(view, signer)?;
    if !role_has(role, Permission::ManageChannels) {
        return Ok(false);
    }
    // The unique-name invariant must hold identically at every peer
    // regardless of which writer's create-channel it witnessed first: a
    // name collision from a *different* channelId is only accepted if this
    // signer lexicographically precedes the incumbent's creator, i.e. this
    // entry is the tie-break winner the incumbent loses to on full replay.
    match view.find::<ChannelRow>(|c| c.name == name && c.channel_id != channel_id)?.into_iter().next() {
        Some(incumbent) => Ok(signer < incumbent.created_by.as_str()),
        None => Ok(true),
    }
}

pub fn validate_update_channel(
    payload: &Value,
    signer: &str,
    view: &View,
) -> Result<bool, crate::error::SyncError> {
    use crate::view::ChannelRow;
    let Some(channel_id) = str_field(payload, "channelId") else {
        return Ok(false);
    };
    let Some(existing) = view.get::<ChannelRow>(channel_id.as_bytes())? else {
        return Ok(false);
    };
    if let Some(new_name) = str_field(payload, "name")
        && new_name != existing.name
        && view
            .find::<ChannelRow>(|c| c.name == new_name)?
            .into_iter()
            .any(|c| c.channel_id != existing.channel_id)
    {
        return Ok(false);
    }
    let role = role_of(view, signer)?;
    Ok(role_has(role, Permission::ManageChannels))
}

pub fn validate_delete_channel(
    payload: &Value,
    signer: &str,
    view: &View,
) -> Result<bool, crate::error::SyncError> {
    use crate::view::ChannelRow;
    let Some(channel_id) = str_field(payload, "channelId") else {
        return Ok(false);
    };
    if view.get::<ChannelRow>(channel_id.as_bytes())?.is_none() {
        return Ok(false);
    }
    let role = role_of(view, signer)?;
    Ok(role_has(role, Permission::ManageChannels))
}

pub fn validate_send_message(
    payload: &Value,
    signer: &str,
    view: &View,
) -> Result<bool, crate::error::SyncError> {
    use crate::view::ChannelRow;
    if str_field(payload, "id").is_none()
        || str_field(payload, "channelId").is_none()
        || str_field(payload, "content").is_none()
        || u64_field(payload, "timestamp").is_none()
    {
        return Ok(false);
    }
    let channel_id = str_field(payload, "channelId").unwrap();
    if view.get::<ChannelRow>(channel_id.as_bytes())?.is_none() {
        return Ok(false);
    }
    let role = role_of(view, signer)?;
    Ok(role_has(role, Permission::SendMessages))
}

pub fn validate_edit_message(
    payload: &Value,
    signer: &str,
    view: &View,
) -> Result<bool, crate::error::SyncError> {
    let Some((id, channel_id)) = message_keys(payload) else {
        return Ok(false);
    };
    let Some(message) = view.get::<MessageRow>(&MessageRow::key_for(&channel_id, &id))? else {
        return Ok(false);
    };
    Ok(message.author == signer)
}

pub fn validate_delete_message(
    payload: &Value,
    signer: &str,
    view: &View,
) -> Result<bool, crate::error::SyncError> {
    let Some((id, channel_id)) = message_keys(payload) else {
        return Ok(false);
    };
    let Some(message) = view.get::<MessageRow>(&MessageRow::key_for(&channel_id, &id))? else {
        return Ok(false);
    };
    if message.author == signer {
        return Ok(true);
    }
    let role = role_of(view, signer)?;
    Ok(role_has(role, Permission::DeleteMessages))
}

fn message_keys(payload: &Value) -> Option<(String, String)> {
    Some((
        str_field(payload, "id")?.to_string(),
        str_field(payload, "channelId")?.to_string(),
    ))
}

/// `_validateSetRole`'s `authorRole` resolves to the signer's own current
/// role: always fetch it fresh rather than trust a caller-supplied role.
pub fn validate_set_role(
    payload: &Value,
    signer: &str,
    view: &View,
) -> Result<bool, crate::error::SyncError> {
    if view.find_one::<ServerRow>(|_| true)?.is_none() {
        return Ok(false);
    }
    let Some(target_role) = str_field(payload, "role").and_then(parse_role) else {
        return Ok(false);
    };
    if str_field(payload, "userId").is_none() {
        return Ok(false);
    }
    let author_role = role_of(view, signer)?;
    Ok(match author_role {
        RoleKind::Owner => true,
        RoleKind::Admin => matches!(target_role, RoleKind::Moderator | RoleKind::Member),
        _ => false,
    })
}

fn parse_role(s: &str) -> Option<RoleKind> {
    match s.to_uppercase().as_str() {
        "OWNER" => Some(RoleKind::Owner),
        "ADMIN" => Some(RoleKind::Admin),
        "MODERATOR" => Some(RoleKind::Moderator),
        "MEMBER" => Some(RoleKind::Member),
        "GUEST" => Some(RoleKind::Guest),
        _ => None,
    }
}

pub fn validate_create_invite(
    payload: &Value,
    signer: &str,
    view: &View,
) -> Result<bool, crate::error::SyncError> {
    if view.find_one::<ServerRow>(|_| true)?.is_none() {
        return Ok(false);
    }
    let Some(id) = str_field(payload, "id") else {
        return Ok(false);
    };
    let Ok(raw) = hex::decode(id) else {
        return Ok(false);
    };
    if view.get::<InviteRow>(&raw)?.is_some() {
        return Ok(false);
    }
    let role = role_of(view, signer)?;
    Ok(role_has(role, Permission::CreateInvites))
}

pub fn validate_claim_invite(
    payload: &Value,
    signer: &str,
    now_ms: u64,
    view: &View,
) -> Result<bool, crate::error::SyncError> {
    use crate::view::UserRow;
    let Some(code) = str_field(payload, "code") else {
        return Ok(false);
    };
    let Ok(raw) = hex::decode(code) else {
        return Ok(false);
    };
    let Some(invite) = view.get::<InviteRow>(&raw)? else {
        return Ok(false);
    };
    if invite.expires <= now_ms {
        return Ok(false);
    }
    Ok(view.get::<UserRow>(signer.as_bytes())?.is_none())
}

pub fn validate_revoke_invite(
    payload: &Value,
    signer: &str,
    view: &View,
) -> Result<bool, crate::error::SyncError> {
    let Some(id) = str_field(payload, "id") else {
        return Ok(false);
    };
    let Ok(raw) = hex::decode(id) else {
        return Ok(false);
    };
    if view.get::<InviteRow>(&raw)?.is_none() {
        return Ok(false);
    }
    let role = role_of(view, signer)?;
    Ok(role_has(role, Permission::ManageInvites))
}

/// True iff `collection` currently has at least one row — used by the
/// one-time-server-row invariant.
pub fn collection_nonempty(view: &View, collection: Collection) -> Result<bool, crate::error::SyncError> {
    Ok(view.count(collection)? > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::{ChannelRow, ChannelType};
    use serde_json::json;

    fn fresh_view() -> View {
        View::open_temporary().unwrap()
    }

    #[test]
    fn create_server_requires_fields_and_no_existing_row() {
        let view = fresh_view();
        assert!(!validate_create_server(&json!({"id": "s1"}), &view).unwrap());
        assert!(validate_create_server(&json!({"id": "s1", "name": "S"}), &view).unwrap());
        view.insert(&ServerRow {
            id: "s1".into(),
            name: "S".into(),
            created_at: 1,
            description: None,
            avatar: None,
        })
        .unwrap();
        assert!(!validate_create_server(&json!({"id": "s1", "name": "S"}), &view).unwrap());
    }

    #[test]
    fn owner_can_manage_channels_guest_cannot() {
        assert!(role_has(RoleKind::Owner, Permission::ManageChannels));
        assert!(!role_has(RoleKind::Guest, Permission::ManageChannels));
        assert!(!role_has(RoleKind::Member, Permission::ManageChannels));
    }

    #[test]
    fn set_role_admin_cannot_promote_to_admin() {
        let view = fresh_view();
        view.insert(&ServerRow {
            id: "s1".into(),
            name: "S".into(),
            created_at: 1,
            description: None,
            avatar: None,
        })
        .unwrap();
        view.insert(&RoleRow {
            user_id: "admin-key".into(),
            server_id: "s1".into(),
            role: RoleKind::Admin,
            updated_at: 1,
            updated_by: "owner-key".into(),
        })
        .unwrap();
        let promote_to_admin = json!({"userId": "target", "role": "ADMIN"});
        assert!(!validate_set_role(&promote_to_admin, "admin-key", &view).unwrap());
        let promote_to_member = json!({"userId": "target", "role": "MEMBER"});
        assert!(validate_set_role(&promote_to_member, "admin-key", &view).unwrap());
    }

    #[test]
    fn send_message_requires_existing_channel() {
        let view = fresh_view();
        view.insert(&RoleRow {
            user_id: "u1".into(),
            server_id: "s1".into(),
            role: RoleKind::Member,
            updated_at: 1,
            updated_by: "u1".into(),
        })
        .unwrap();
        let payload = json!({"id": "m1", "channelId": "c1", "content": "hi", "timestamp": 1});
        assert!(!validate_send_message(&payload, "u1", &view).unwrap());
        view.insert(&ChannelRow {
            id: "c1".into(),
            channel_id: "c1".into(),
            name: "general".into(),
            kind: ChannelType::Text,
            topic: None,
            created_by: "u1".into(),
            created_at: 1,
            position: 0,
        })
        .unwrap();
        assert!(validate_send_message(&payload, "u1", &view).unwrap());
    }

    #[test]
    fn edit_message_requires_authorship() {
        let view = fresh_view();
        view.insert(&MessageRow {
            id: "m1".into(),
            channel_id: "c1".into(),
            author: "u1".into(),
            content: "hi".into(),
            timestamp: 1,
            edited_at: None,
            deleted_at: None,
            deleted_by: None,
            attachments: vec![],
        })
        .unwrap();
        let payload = json!({"id": "m1", "channelId": "c1", "content": "edited"});
        assert!(validate_edit_message(&payload, "u1", &view).unwrap());
        assert!(!validate_edit_message(&payload, "u2", &view).unwrap());
    }

    #[test]
    fn claim_invite_rejects_expired() {
        let view = fresh_view();
        view.insert(&InviteRow {
            id: hex::encode([1u8; 16]),
            invite: "token".into(),
            public_key: hex::encode([2u8; 32]),
            expires: 100,
            server_id: Some("s1".into()),
            created_by: Some("owner".into()),
            code: None,
        })
        .unwrap();
        let payload = json!({"code": hex::encode([1u8; 16])});
        assert!(!validate_claim_invite(&payload, "candidate", 200, &view).unwrap());
        assert!(validate_claim_invite(&payload, "candidate", 50, &view).unwrap());
    }
}
