//! Lifecycle owner: wires Crypto, Codec, View, Validator, Router, and
//! InviteMgr together and exposes the public write/read API.
//!
//! Grounded on the teacher's `ChannelState`/server wiring
//! (`freeq-server/src/server.rs`): one owning struct holds every
//! component and every public method is a thin wrapper that builds a
//! payload, signs it, appends it, then (synchronously, for this
//! single-process log) drives one apply pass so the caller can read back
//! the projected result immediately.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde_json::json;
use syncbase_sdk::codec::ActionType;
use syncbase_sdk::crypto::{create_signed_action, generate_id, Keypair};

use crate::error::SyncError;
use crate::events::{EventBus, ViewEvent};
use crate::invite::{self, CreatedInvite};
use crate::log::{Cursor, LocalLog, ReplicatedLog};
use crate::router::Router;
use crate::validator::{self, Permission};
use crate::view::{ChannelRow, ChannelType, MessageRow, RoleKind, ServerRow, View};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    New = 0,
    Opening = 1,
    Ready = 2,
    Closing = 3,
    Closed = 4,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LifecycleState::New,
            1 => LifecycleState::Opening,
            2 => LifecycleState::Ready,
            3 => LifecycleState::Closing,
            _ => LifecycleState::Closed,
        }
    }
}

/// One local SyncBase process; equals one logical server.
pub struct Instance {
    keypair: Keypair,
    db: Arc<sled::Db>,
    view: View,
    log: LocalLog,
    router: Router,
    events: EventBus,
    state: AtomicU8,
    last_applied: std::sync::Mutex<Option<Cursor>>,
}

impl Instance {
    /// Open an instance rooted at `data_dir`, deriving the local identity
    /// from `seed_phrase`. Replays any existing log into a fresh view on
    /// open, per the "re-derive by replay only" persistence contract.
    pub fn open(data_dir: impl AsRef<Path>, seed_phrase: &str) -> Result<Self, SyncError> {
        let data_dir: PathBuf = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| SyncError::Internal(format!("create data dir: {e}")))?;
        let db = Arc::new(sled::open(data_dir.join("store"))?);
        let keypair = Keypair::from_seed_phrase(seed_phrase);
        let writer_key = hex::encode(keypair.public_key_bytes());
        let discovery_key = syncbase_sdk::canonical::sha256_hex(writer_key.as_bytes())
            .into_bytes();
        let log = LocalLog::open(&db, writer_key, discovery_key)?;
        let view = View::open(data_dir.join("view"))?;
        let router = Router::new(&db)?;

        let instance = Instance {
            keypair,
            db,
            view,
            log,
            router,
            events: EventBus::default(),
            state: AtomicU8::new(LifecycleState::Opening as u8),
            last_applied: std::sync::Mutex::new(None),
        };
        instance.catch_up()?;
        instance.state.store(LifecycleState::Ready as u8, Ordering::SeqCst);
        Ok(instance)
    }

    /// Open an ephemeral instance backed by temporary storage. Used by
    /// tests and by spectator peers that don't persist across restarts.
    pub fn open_temporary(seed_phrase: &str) -> Result<Self, SyncError> {
        let db = Arc::new(sled::Config::new().temporary(true).open()?);
        let keypair = Keypair::from_seed_phrase(seed_phrase);
        let writer_key = hex::encode(keypair.public_key_bytes());
        let discovery_key = syncbase_sdk::canonical::sha256_hex(writer_key.as_bytes()).into_bytes();
        let log = LocalLog::open(&db, writer_key, discovery_key)?;
        let view = View::open_temporary()?;
        let router = Router::new(&db)?;
        let instance = Instance {
            keypair,
            db,
            view,
            log,
            router,
            events: EventBus::default(),
            state: AtomicU8::new(LifecycleState::Ready as u8),
            last_applied: std::sync::Mutex::new(None),
        };
        instance.catch_up()?;
        Ok(instance)
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_initialized(&self) -> Result<bool, SyncError> {
        Ok(self.view.find_one::<ServerRow>(|_| true)?.is_some())
    }

    pub fn signer(&self) -> String {
        hex::encode(self.keypair.public_key_bytes())
    }

    /// Single-writer apply-loop step: replay whatever the log has past the
    /// last cursor this instance has seen and fold it into the view.
    fn catch_up(&self) -> Result<(), SyncError> {
        let mut last = self.last_applied.lock().unwrap();
        let entries = self.log.replay(*last)?;
        if entries.is_empty() {
            return Ok(());
        }
        self.router.apply_batch(&entries, &self.view, Some(&self.events))?;
        *last = entries.last().map(|e| e.cursor);
        self.events.publish(ViewEvent::Flushed);
        Ok(())
    }

    fn append_and_apply(&self, action_type: ActionType, payload: serde_json::Value) -> Result<(), SyncError> {
        let envelope = create_signed_action(&self.keypair, action_type, payload)?;
        self.log.append(envelope, false)?;
        self.catch_up()
    }

    pub fn close(&self) -> Result<(), SyncError> {
        self.state.store(LifecycleState::Closing as u8, Ordering::SeqCst);
        self.view.flush()?;
        self.db.flush()?;
        self.state.store(LifecycleState::Closed as u8, Ordering::SeqCst);
        Ok(())
    }

    pub fn on(&self) -> tokio::sync::broadcast::Receiver<ViewEvent> {
        self.events.subscribe()
    }

    // ---- write API ----

    pub fn initialize(&self, name: &str, description: Option<&str>) -> Result<(), SyncError> {
        let id = generate_id(16);
        let mut payload = json!({ "id": id, "name": name });
        if let Some(d) = description {
            payload["description"] = json!(d);
        }
        self.append_and_apply(ActionType::CreateServer, payload)
    }

    pub fn get_server_info(&self) -> Result<Option<ServerRow>, SyncError> {
        self.view.find_one(|_| true)
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<crate::view::UserRow>, SyncError> {
        self.view.get(user_id.as_bytes())
    }

    pub fn create_channel(&self, name: &str, kind: ChannelType) -> Result<String, SyncError> {
        self.require(Permission::ManageChannels)?;
        let channel_id = generate_id(16);
        let type_str = match kind {
            ChannelType::Text => "TEXT",
            ChannelType::Voice => "VOICE",
        };
        self.append_and_apply(
            ActionType::CreateChannel,
            json!({ "channelId": channel_id, "name": name, "type": type_str }),
        )?;
        Ok(channel_id)
    }

    pub fn update_channel(&self, channel_id: &str, name: Option<&str>, topic: Option<&str>) -> Result<(), SyncError> {
        self.require(Permission::ManageChannels)?;
        let mut payload = json!({ "channelId": channel_id });
        if let Some(n) = name {
            payload["name"] = json!(n);
        }
        if let Some(t) = topic {
            payload["topic"] = json!(t);
        }
        self.append_and_apply(ActionType::UpdateChannel, payload)
    }

    pub fn delete_channel(&self, channel_id: &str) -> Result<(), SyncError> {
        self.require(Permission::ManageChannels)?;
        self.append_and_apply(ActionType::DeleteChannel, json!({ "channelId": channel_id }))
    }

    pub fn get_channels(&self) -> Result<Vec<ChannelRow>, SyncError> {
        self.view.find(|_| true)
    }

    pub fn send_message(&self, channel_id: &str, content: &str) -> Result<String, SyncError> {
        self.require(Permission::SendMessages)?;
        let id = generate_id(16);
        self.append_and_apply(
            ActionType::SendMessage,
            json!({ "id": id, "channelId": channel_id, "content": content }),
        )?;
        Ok(id)
    }

    pub fn edit_message(&self, message_id: &str, channel_id: &str, content: &str) -> Result<(), SyncError> {
        let signer = self.signer();
        let owns = self
            .view
            .get::<MessageRow>(&MessageRow::key_for(channel_id, message_id))?
            .is_some_and(|m| m.author == signer);
        if !owns {
            return Err(SyncError::Unauthorized("message author"));
        }
        self.append_and_apply(
            ActionType::EditMessage,
            json!({ "id": message_id, "channelId": channel_id, "content": content }),
        )
    }

    pub fn delete_message(&self, message_id: &str, channel_id: &str) -> Result<(), SyncError> {
        let signer = self.signer();
        let Some(message) = self.view.get::<MessageRow>(&MessageRow::key_for(channel_id, message_id))? else {
            return Err(SyncError::NotFound);
        };
        let role = validator::role_of(&self.view, &signer)?;
        if message.author != signer && !validator::role_has(role, Permission::DeleteMessages) {
            return Err(SyncError::Unauthorized("message author or DELETE_MESSAGES"));
        }
        self.append_and_apply(
            ActionType::DeleteMessage,
            json!({ "id": message_id, "channelId": channel_id }),
        )
    }

    pub fn get_messages(&self, channel_id: &str) -> Result<Vec<MessageRow>, SyncError> {
        self.view.find_prefix(&MessageRow::channel_prefix(channel_id))
    }

    pub fn set_role(&self, user_id: &str, role: RoleKind) -> Result<(), SyncError> {
        let signer = self.signer();
        let author_role = validator::role_of(&self.view, &signer)?;
        let authorized = match author_role {
            RoleKind::Owner => true,
            RoleKind::Admin => matches!(role, RoleKind::Moderator | RoleKind::Member),
            _ => false,
        };
        if !authorized {
            return Err(SyncError::Unauthorized("SET_ROLE"));
        }
        let role_str = match role {
            RoleKind::Owner => "OWNER",
            RoleKind::Admin => "ADMIN",
            RoleKind::Moderator => "MODERATOR",
            RoleKind::Member => "MEMBER",
            RoleKind::Guest => "GUEST",
        };
        self.append_and_apply(ActionType::SetRole, json!({ "userId": user_id, "role": role_str }))
    }

    pub fn create_invite(&self, expire_in_minutes: u64) -> Result<CreatedInvite, SyncError> {
        self.require(Permission::CreateInvites)?;
        let created = invite::create_invite(&self.keypair, &self.log, expire_in_minutes * 60_000)?;
        self.catch_up()?;
        Ok(created)
    }

    pub fn claim_invite(&self, token: &str) -> Result<(), SyncError> {
        invite::claim_invite(&self.keypair, &self.log, token)?;
        self.catch_up()
    }

    pub fn revoke_invite(&self, invite_id_hex: &str) -> Result<(), SyncError> {
        self.require(Permission::ManageInvites)?;
        invite::revoke_invite(&self.keypair, &self.log, invite_id_hex)?;
        self.catch_up()
    }

    pub fn has_permission(&self, perm: Permission) -> Result<bool, SyncError> {
        let role = validator::role_of(&self.view, &self.signer())?;
        Ok(validator::role_has(role, perm))
    }

    fn require(&self, perm: Permission) -> Result<(), SyncError> {
        if self.has_permission(perm)? {
            Ok(())
        } else {
            Err(SyncError::Unauthorized(match perm {
                Permission::ManageServer => "MANAGE_SERVER",
                Permission::ManageChannels => "MANAGE_CHANNELS",
                Permission::SendMessages => "SEND_MESSAGES",
                Permission::DeleteMessages => "DELETE_MESSAGES",
                Permission::SetRole => "SET_ROLE",
                Permission::CreateInvites => "CREATE_INVITES",
                Permission::ManageInvites => "MANAGE_INVITES",
                Permission::EditServer => "EDIT_SERVER",
                Permission::EditChannel => "EDIT_CHANNEL",
                Permission::DeleteChannel => "DELETE_CHANNEL",
            }))
        }
    }

    /// Drain another instance's log into this one. Stand-in for the
    /// out-of-scope replication transport: production deployments replace
    /// this with a real multi-writer sync protocol (iroh-gossip, etc.);
    /// the apply semantics downstream are unaffected by how entries
    /// arrive.
    pub fn sync_from(&self, other: &Instance) -> Result<(), SyncError> {
        let entries = other.log.replay(None)?;
        self.router.apply_batch(&entries, &self.view, Some(&self.events))?;
        self.events.publish(ViewEvent::Flushed);
        Ok(())
    }
}
