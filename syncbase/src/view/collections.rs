//! Typed rows for the six collections in the data model.

use serde::{Deserialize, Serialize};

/// Which sled tree a row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Server,
    Channel,
    Message,
    User,
    Role,
    Invite,
}

impl Collection {
    pub fn tree_name(self) -> &'static str {
        match self {
            Collection::Server => "server",
            Collection::Channel => "channel",
            Collection::Message => "message",
            Collection::User => "user",
            Collection::Role => "role",
            Collection::Invite => "invite",
        }
    }
}

/// A typed row: knows its own collection and primary-key encoding.
pub trait Row: Serialize + for<'de> Deserialize<'de> {
    fn collection() -> Collection;
    fn primary_key(&self) -> Vec<u8>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerRow {
    pub id: String,
    pub name: String,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl Row for ServerRow {
    fn collection() -> Collection {
        Collection::Server
    }
    fn primary_key(&self) -> Vec<u8> {
        self.id.as_bytes().to_vec()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelType {
    Text,
    Voice,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelRow {
    pub id: String,
    pub channel_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub created_by: String,
    pub created_at: u64,
    pub position: i64,
}

impl Row for ChannelRow {
    fn collection() -> Collection {
        Collection::Channel
    }
    fn primary_key(&self) -> Vec<u8> {
        self.channel_id.as_bytes().to_vec()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub author: String,
    pub content: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    /// Transport is a list of opaque strings; stored as a plain list so the
    /// round trip through a single sled value stays exact.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

impl MessageRow {
    /// Ordered so a range scan over one channel's messages is a contiguous
    /// prefix of the tree: `channelId \x00 id`.
    pub fn key_for(channel_id: &str, id: &str) -> Vec<u8> {
        let mut key = channel_id.as_bytes().to_vec();
        key.push(0);
        key.extend_from_slice(id.as_bytes());
        key
    }

    pub fn channel_prefix(channel_id: &str) -> Vec<u8> {
        let mut key = channel_id.as_bytes().to_vec();
        key.push(0);
        key
    }
}

impl Row for MessageRow {
    fn collection() -> Collection {
        Collection::Message
    }
    fn primary_key(&self) -> Vec<u8> {
        Self::key_for(&self.channel_id, &self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRow {
    /// Equal to the signer's hex-encoded public key.
    pub id: String,
    pub public_key: String,
    pub username: String,
    pub joined_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Row for UserRow {
    fn collection() -> Collection {
        Collection::User
    }
    fn primary_key(&self) -> Vec<u8> {
        self.id.as_bytes().to_vec()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoleKind {
    // Ordered weakest-first so `RoleKind::Admin > RoleKind::Member` reads
    // naturally wherever a relative-strength comparison is useful.
    Guest,
    Member,
    Moderator,
    Admin,
    Owner,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleRow {
    pub user_id: String,
    pub server_id: String,
    pub role: RoleKind,
    pub updated_at: u64,
    pub updated_by: String,
}

impl Row for RoleRow {
    fn collection() -> Collection {
        Collection::Role
    }
    fn primary_key(&self) -> Vec<u8> {
        self.user_id.as_bytes().to_vec()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InviteRow {
    /// Hex-encoded raw invite bytes.
    pub id: String,
    /// Opaque base-32 transport token.
    pub invite: String,
    pub public_key: String,
    pub expires: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Row for InviteRow {
    fn collection() -> Collection {
        Collection::Invite
    }
    fn primary_key(&self) -> Vec<u8> {
        hex::decode(&self.id).unwrap_or_else(|_| self.id.as_bytes().to_vec())
    }
}
