//! Deterministic per-entry apply: validate, then mutate the view.
//!
//! Grounded on the teacher's connection/dispatch loop shape (one handler per
//! message kind, folded over an ordered batch) generalized from network
//! frames to log entries, with the partitioning and dedupe rules specified
//! for convergence under partial cross-writer ordering.

use std::collections::HashSet;

use serde_json::json;
use syncbase_sdk::codec::ActionType;
use syncbase_sdk::crypto;

use crate::error::SyncError;
use crate::events::{EventBus, ViewEvent};
use crate::log::LogEntry;
use crate::validator;
use crate::view::{
    ChannelRow, ChannelType, InviteRow, MessageRow, RoleKind, RoleRow, ServerRow, UserRow, View,
};

/// Flush cadence within a partition.
const FLUSH_EVERY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ActionCategory {
    Invite,
    Server,
    Channel,
    Message,
    Other,
}

fn category(action_type: ActionType) -> ActionCategory {
    match action_type {
        ActionType::CreateInvite | ActionType::ClaimInvite | ActionType::RevokeInvite => {
            ActionCategory::Invite
        }
        ActionType::CreateServer | ActionType::UpdateServer => ActionCategory::Server,
        ActionType::CreateChannel | ActionType::UpdateChannel | ActionType::DeleteChannel => {
            ActionCategory::Channel
        }
        ActionType::SendMessage | ActionType::EditMessage | ActionType::DeleteMessage => {
            ActionCategory::Message
        }
        ActionType::SetRole => ActionCategory::Other,
    }
}

/// Handles dedupe, acknowledgement bookkeeping, and dispatch for one
/// instance's view. Holds no log reference: the caller feeds it batches
/// pulled from whatever `ReplicatedLog` it's wired to.
pub struct Router {
    processed: sled::Tree,
    acked: sled::Tree,
}

impl Router {
    pub fn new(db: &sled::Db) -> Result<Self, SyncError> {
        Ok(Router {
            processed: db.open_tree("processed")?,
            acked: db.open_tree("acked_writers")?,
        })
    }

    fn action_id(action_type: ActionType, payload: &serde_json::Value) -> Vec<u8> {
        let ts = payload.get("timestamp").and_then(|v| v.as_u64()).unwrap_or(0);
        format!("{}:{ts}", action_type.tag()).into_bytes()
    }

    fn already_processed(&self, id: &[u8]) -> Result<bool, SyncError> {
        Ok(self.processed.contains_key(id)?)
    }

    fn mark_processed(&self, id: &[u8]) -> Result<(), SyncError> {
        self.processed.insert(id, &[])?;
        Ok(())
    }

    fn acknowledge(&self, writer: &str, cursor: u64) -> Result<(), SyncError> {
        self.acked.insert(writer.as_bytes(), &cursor.to_be_bytes())?;
        Ok(())
    }

    /// Apply one batch of entries, in log order, following the partitioning,
    /// dedupe, tie-break, and flush-cadence rules.
    pub fn apply_batch(
        &self,
        entries: &[LogEntry],
        view: &View,
        events: Option<&EventBus>,
    ) -> Result<(), SyncError> {
        let mut partitions: [Vec<&LogEntry>; 5] = Default::default();
        for entry in entries {
            let idx = category(entry.envelope.action_type) as usize;
            partitions[idx].push(entry);
        }

        for partition in &mut partitions {
            // Ties on equal (type, timestamp) resolve by writer-key
            // lexicographic order, independent of arrival order, so every
            // peer converges on the same winner regardless of batch timing.
            partition.sort_by(|a, b| {
                let a_id = Self::action_id(a.envelope.action_type, &a.envelope.payload);
                let b_id = Self::action_id(b.envelope.action_type, &b.envelope.payload);
                a_id.cmp(&b_id).then_with(|| a.envelope.signer.cmp(&b.envelope.signer))
            });

            let mut seen_this_run: HashSet<Vec<u8>> = HashSet::new();
            let mut since_flush = 0usize;

            for entry in partition.iter() {
                let id = Self::action_id(entry.envelope.action_type, &entry.envelope.payload);
                if !seen_this_run.insert(id.clone()) || self.already_processed(&id)? {
                    continue;
                }

                self.acknowledge(&entry.from, entry.cursor)?;

                let verified = if entry.optimistic && entry.envelope.action_type.allows_optimistic_skip()
                {
                    true
                } else {
                    validator::verify_signature(&entry.envelope)
                };

                if verified && self.validate(entry, view)? {
                    self.dispatch(entry, view, events)?;
                } else {
                    tracing::debug!(
                        action = ?entry.envelope.action_type,
                        signer = %entry.envelope.signer,
                        "skipping invalid or unauthorized entry"
                    );
                }

                self.mark_processed(&id)?;
                since_flush += 1;
                if since_flush >= FLUSH_EVERY {
                    view.flush()?;
                    since_flush = 0;
                }
            }
            view.flush()?;
        }

        view.flush()?;
        Ok(())
    }

    fn validate(&self, entry: &LogEntry, view: &View) -> Result<bool, SyncError> {
        let signer = &entry.envelope.signer;
        let payload = &entry.envelope.payload;
        match entry.envelope.action_type {
            ActionType::CreateServer => validator::validate_create_server(payload, view),
            ActionType::UpdateServer => validator::validate_update_server(payload, signer, view),
            ActionType::CreateChannel => validator::validate_create_channel(payload, signer, view),
            ActionType::UpdateChannel => validator::validate_update_channel(payload, signer, view),
            ActionType::DeleteChannel => validator::validate_delete_channel(payload, signer, view),
            ActionType::SendMessage => validator::validate_send_message(payload, signer, view),
            ActionType::EditMessage => validator::validate_edit_message(payload, signer, view),
            ActionType::DeleteMessage => validator::validate_delete_message(payload, signer, view),
            ActionType::SetRole => validator::validate_set_role(payload, signer, view),
            ActionType::CreateInvite => validator::validate_create_invite(payload, signer, view),
            ActionType::ClaimInvite => {
                let now = payload.get("timestamp").and_then(|v| v.as_u64()).unwrap_or(crypto::now_ms());
                validator::validate_claim_invite(payload, signer, now, view)
            }
            ActionType::RevokeInvite => validator::validate_revoke_invite(payload, signer, view),
        }
    }

    fn dispatch(
        &self,
        entry: &LogEntry,
        view: &View,
        events: Option<&EventBus>,
    ) -> Result<(), SyncError> {
        let signer = entry.envelope.signer.clone();
        let payload = &entry.envelope.payload;
        match entry.envelope.action_type {
            ActionType::CreateServer => handle_create_server(payload, &signer, view)?,
            ActionType::UpdateServer => handle_update_server(payload, view)?,
            ActionType::CreateChannel => handle_create_channel(payload, &signer, view)?,
            ActionType::UpdateChannel => handle_update_channel(payload, view)?,
            ActionType::DeleteChannel => handle_delete_channel(payload, view)?,
            ActionType::SendMessage => handle_send_message(payload, &signer, view)?,
            ActionType::EditMessage => handle_edit_message(payload, view)?,
            ActionType::DeleteMessage => handle_delete_message(payload, &signer, view)?,
            ActionType::SetRole => handle_set_role(payload, &signer, view)?,
            ActionType::CreateInvite => handle_create_invite(payload, &signer, view)?,
            ActionType::ClaimInvite => handle_claim_invite(payload, &signer, view)?,
            ActionType::RevokeInvite => handle_revoke_invite(payload, view)?,
        }
        if let Some(bus) = events {
            bus.publish(ViewEvent::Applied {
                action_type: entry.envelope.action_type,
            });
        }
        Ok(())
    }
}

fn field<'a>(payload: &'a serde_json::Value, key: &str) -> &'a str {
    payload.get(key).and_then(|v| v.as_str()).unwrap_or_default()
}

fn opt_field(payload: &serde_json::Value, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str()).map(str::to_owned)
}

fn handle_create_server(payload: &serde_json::Value, signer: &str, view: &View) -> Result<(), SyncError> {
    if view.find_one::<ServerRow>(|_| true)?.is_some() {
        return Ok(());
    }
    let now = payload.get("timestamp").and_then(|v| v.as_u64()).unwrap_or_else(crypto::now_ms);
    view.insert(&ServerRow {
        id: field(payload, "id").to_string(),
        name: field(payload, "name").to_string(),
        created_at: now,
        description: opt_field(payload, "description"),
        avatar: opt_field(payload, "avatar"),
    })?;
    view.insert(&UserRow {
        id: signer.to_string(),
        public_key: signer.to_string(),
        username: format!("user-{}", &signer[..8.min(signer.len())]),
        joined_at: now,
        invite_code: None,
        avatar: None,
        status: None,
    })?;
    view.insert(&RoleRow {
        user_id: signer.to_string(),
        server_id: field(payload, "id").to_string(),
        role: RoleKind::Owner,
        updated_at: now,
        updated_by: signer.to_string(),
    })?;
    Ok(())
}

fn handle_update_server(payload: &serde_json::Value, view: &View) -> Result<(), SyncError> {
    let id = field(payload, "id");
    let Some(existing) = view.get::<ServerRow>(id.as_bytes())? else {
        return Ok(());
    };
    view.delete::<ServerRow>(id.as_bytes())?;
    view.insert(&ServerRow {
        id: existing.id,
        name: opt_field(payload, "name").unwrap_or(existing.name),
        created_at: existing.created_at,
        description: opt_field(payload, "description").or(existing.description),
        avatar: opt_field(payload, "avatar").or(existing.avatar),
    })?;
    Ok(())
}

fn handle_create_channel(payload: &serde_json::Value, signer: &str, view: &View) -> Result<(), SyncError> {
    let channel_id = field(payload, "channelId");
    if view.get::<ChannelRow>(channel_id.as_bytes())?.is_some() {
        return Ok(());
    }
    let name = field(payload, "name");
    // Validation already confirmed this signer wins any name collision's
    // tie-break; evict the loser so every peer converges on the same row.
    if let Some(loser) = view.find::<ChannelRow>(|c| c.name == name && c.channel_id != channel_id)?.into_iter().next() {
        for message in view.find_prefix::<MessageRow>(&MessageRow::channel_prefix(&loser.channel_id))? {
            view.delete::<MessageRow>(&MessageRow::key_for(&message.channel_id, &message.id))?;
        }
        view.delete::<ChannelRow>(loser.channel_id.as_bytes())?;
    }
    let now = payload.get("timestamp").and_then(|v| v.as_u64()).unwrap_or_else(crypto::now_ms);
    let kind = match field(payload, "type") {
        "VOICE" => ChannelType::Voice,
        _ => ChannelType::Text,
    };
    let position = view.count(crate::view::Collection::Channel)? as i64;
    view.insert(&ChannelRow {
        id: channel_id.to_string(),
        channel_id: channel_id.to_string(),
        name: name.to_string(),
        kind,
        topic: opt_field(payload, "topic"),
        created_by: signer.to_string(),
        created_at: now,
        position,
    })?;
    Ok(())
}

fn handle_update_channel(payload: &serde_json::Value, view: &View) -> Result<(), SyncError> {
    let channel_id = field(payload, "channelId");
    let Some(existing) = view.get::<ChannelRow>(channel_id.as_bytes())? else {
        return Ok(());
    };
    view.delete::<ChannelRow>(channel_id.as_bytes())?;
    view.insert(&ChannelRow {
        name: opt_field(payload, "name").unwrap_or(existing.name),
        topic: opt_field(payload, "topic").or(existing.topic),
        ..existing
    })?;
    Ok(())
}

fn handle_delete_channel(payload: &serde_json::Value, view: &View) -> Result<(), SyncError> {
    let channel_id = field(payload, "channelId");
    view.delete::<ChannelRow>(channel_id.as_bytes())?;
    for message in view.find_prefix::<MessageRow>(&MessageRow::channel_prefix(channel_id))? {
        view.delete::<MessageRow>(&MessageRow::key_for(&message.channel_id, &message.id))?;
    }
    Ok(())
}

fn handle_send_message(payload: &serde_json::Value, signer: &str, view: &View) -> Result<(), SyncError> {
    let id = field(payload, "id");
    let channel_id = field(payload, "channelId");
    let key = MessageRow::key_for(channel_id, id);
    if view.get::<MessageRow>(&key)?.is_some() {
        return Ok(());
    }
    let timestamp = payload.get("timestamp").and_then(|v| v.as_u64()).unwrap_or_else(crypto::now_ms);
    let attachments = payload
        .get("attachments")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default();
    view.insert(&MessageRow {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        author: signer.to_string(),
        content: field(payload, "content").to_string(),
        timestamp,
        edited_at: None,
        deleted_at: None,
        deleted_by: None,
        attachments,
    })?;
    Ok(())
}

fn handle_edit_message(payload: &serde_json::Value, view: &View) -> Result<(), SyncError> {
    let id = field(payload, "id");
    let channel_id = field(payload, "channelId");
    let key = MessageRow::key_for(channel_id, id);
    let Some(existing) = view.get::<MessageRow>(&key)? else {
        return Ok(());
    };
    view.delete::<MessageRow>(&key)?;
    let now = payload.get("timestamp").and_then(|v| v.as_u64()).unwrap_or_else(crypto::now_ms);
    view.insert(&MessageRow {
        content: opt_field(payload, "content").unwrap_or(existing.content),
        edited_at: Some(now),
        ..existing
    })?;
    Ok(())
}

fn handle_delete_message(payload: &serde_json::Value, signer: &str, view: &View) -> Result<(), SyncError> {
    let id = field(payload, "id");
    let channel_id = field(payload, "channelId");
    let key = MessageRow::key_for(channel_id, id);
    let Some(existing) = view.get::<MessageRow>(&key)? else {
        return Ok(());
    };
    view.delete::<MessageRow>(&key)?;
    let now = payload.get("timestamp").and_then(|v| v.as_u64()).unwrap_or_else(crypto::now_ms);
    // Soft delete: keep the row as a tombstone so causally-dependent edits
    // replayed later still have a primary key to land on.
    view.insert(&MessageRow {
        deleted_at: Some(now),
        deleted_by: Some(signer.to_string()),
        ..existing
    })?;
    Ok(())
}

fn handle_set_role(payload: &serde_json::Value, signer: &str, view: &View) -> Result<(), SyncError> {
    let user_id = field(payload, "userId");
    let role = match field(payload, "role").to_uppercase().as_str() {
        "OWNER" => RoleKind::Owner,
        "ADMIN" => RoleKind::Admin,
        "MODERATOR" => RoleKind::Moderator,
        "MEMBER" => RoleKind::Member,
        _ => RoleKind::Guest,
    };
    let Some(existing) = view.find_one::<ServerRow>(|_| true)? else {
        return Ok(());
    };
    view.delete::<RoleRow>(user_id.as_bytes())?;
    let now = payload.get("timestamp").and_then(|v| v.as_u64()).unwrap_or_else(crypto::now_ms);
    view.insert(&RoleRow {
        user_id: user_id.to_string(),
        server_id: existing.id,
        role,
        updated_at: now,
        updated_by: signer.to_string(),
    })?;
    Ok(())
}

fn handle_create_invite(payload: &serde_json::Value, signer: &str, view: &View) -> Result<(), SyncError> {
    let id_hex = field(payload, "id");
    let Ok(raw) = hex::decode(id_hex) else {
        return Ok(());
    };
    if view.get::<InviteRow>(&raw)?.is_some() {
        return Ok(());
    }
    let server_id = view.find_one::<ServerRow>(|_| true)?.map(|s| s.id);
    view.insert(&InviteRow {
        id: id_hex.to_string(),
        invite: field(payload, "invite").to_string(),
        public_key: field(payload, "publicKey").to_string(),
        expires: payload.get("expires").and_then(|v| v.as_u64()).unwrap_or(0),
        server_id,
        created_by: Some(signer.to_string()),
        code: None,
    })?;
    Ok(())
}

fn handle_claim_invite(payload: &serde_json::Value, signer: &str, view: &View) -> Result<(), SyncError> {
    if view.get::<UserRow>(signer.as_bytes())?.is_some() {
        return Ok(());
    }
    let now = payload.get("timestamp").and_then(|v| v.as_u64()).unwrap_or_else(crypto::now_ms);
    let Some(existing) = view.find_one::<ServerRow>(|_| true)? else {
        return Ok(());
    };
    view.insert(&UserRow {
        id: signer.to_string(),
        public_key: signer.to_string(),
        username: format!("user-{}", &signer[..8.min(signer.len())]),
        joined_at: now,
        invite_code: Some(field(payload, "code").to_string()),
        avatar: None,
        status: None,
    })?;
    view.insert(&RoleRow {
        user_id: signer.to_string(),
        server_id: existing.id,
        role: RoleKind::Member,
        updated_at: now,
        updated_by: signer.to_string(),
    })?;
    Ok(())
}

fn handle_revoke_invite(payload: &serde_json::Value, view: &View) -> Result<(), SyncError> {
    let id_hex = field(payload, "id");
    if let Ok(raw) = hex::decode(id_hex) {
        view.delete::<InviteRow>(&raw)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncbase_sdk::crypto::{create_signed_action, Keypair};

    fn db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn entry(cursor: u64, kp: &Keypair, action_type: ActionType, payload: serde_json::Value) -> LogEntry {
        let envelope = create_signed_action(kp, action_type, payload).unwrap();
        LogEntry {
            cursor,
            from: hex::encode(kp.public_key_bytes()),
            envelope,
            optimistic: false,
        }
    }

    #[test]
    fn create_server_then_message_flow() {
        let db = db();
        let view = View::open_temporary().unwrap();
        let router = Router::new(&db).unwrap();
        let owner = Keypair::from_seed_phrase("alpha");

        let e1 = entry(0, &owner, ActionType::CreateServer, json!({"id": "s1", "name": "S1"}));
        router.apply_batch(&[e1], &view, None).unwrap();
        assert!(view.find_one::<ServerRow>(|_| true).unwrap().is_some());

        let signer = hex::encode(owner.public_key_bytes());
        let role = view.find_one::<RoleRow>(|r| r.user_id == signer).unwrap().unwrap();
        assert_eq!(role.role, RoleKind::Owner);

        let e2 = entry(
            1,
            &owner,
            ActionType::CreateChannel,
            json!({"channelId": "c1", "name": "general", "type": "TEXT"}),
        );
        router.apply_batch(&[e2], &view, None).unwrap();

        let e3 = entry(
            2,
            &owner,
            ActionType::SendMessage,
            json!({"id": "m1", "channelId": "c1", "content": "hi"}),
        );
        router.apply_batch(&[e3], &view, None).unwrap();

        let messages = view.find_prefix::<MessageRow>(&MessageRow::channel_prefix("c1")).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[0].author, signer);
    }

    #[test]
    fn duplicate_channel_name_only_one_wins() {
        let db = db();
        let view = View::open_temporary().unwrap();
        let router = Router::new(&db).unwrap();
        let owner = Keypair::from_seed_phrase("alpha");
        let other = Keypair::from_seed_phrase("beta");

        router
            .apply_batch(&[entry(0, &owner, ActionType::CreateServer, json!({"id": "s1", "name": "S1"}))], &view, None)
            .unwrap();
        router
            .apply_batch(
                &[entry(1, &owner, ActionType::SetRole, json!({"userId": hex::encode(other.public_key_bytes()), "role": "ADMIN"}))],
                &view,
                None,
            )
            .unwrap();

        let payload = json!({"channelId": "dup-a", "name": "dup", "type": "TEXT", "timestamp": 500});
        let mut payload_b = payload.clone();
        payload_b["channelId"] = json!("dup-b");

        let a = entry(2, &owner, ActionType::CreateChannel, payload);
        let b = entry(3, &other, ActionType::CreateChannel, payload_b);
        router.apply_batch(&[a, b], &view, None).unwrap();

        let channels = view.find::<ChannelRow>(|c| c.name == "dup").unwrap();
        assert_eq!(channels.len(), 1);
    }

    #[test]
    fn duplicate_entries_are_idempotent() {
        let db = db();
        let view = View::open_temporary().unwrap();
        let router = Router::new(&db).unwrap();
        let owner = Keypair::from_seed_phrase("alpha");

        let e = entry(0, &owner, ActionType::CreateServer, json!({"id": "s1", "name": "S1", "timestamp": 42}));
        router.apply_batch(&[e.clone()], &view, None).unwrap();
        router.apply_batch(&[e], &view, None).unwrap();

        assert_eq!(view.count(crate::view::Collection::Server).unwrap(), 1);
    }
}
