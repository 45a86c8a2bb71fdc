//! The sled-backed materialized view: a set of trees, one per collection,
//! rebuilt deterministically by replaying the log through the router.
//!
//! `sled` is borrowed from the wider pack (amunchain-amunchain) rather than
//! the teacher's own `rusqlite`: the teacher's `policy/store.rs` persists a
//! flat document and doesn't need ordered range scans, but the message
//! collection here does (list a channel's messages in order), and sled's
//! ordered byte-keyed trees give that for free without a SQL layer.

use serde::de::DeserializeOwned;
use sled::Db;

use crate::error::SyncError;
use crate::view::collections::{Collection, Row};

/// A materialized, queryable snapshot of the log, one tree per collection.
pub struct View {
    db: Db,
}

impl View {
    /// Open (or create) a view rooted at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, SyncError> {
        let db = sled::open(path)?;
        Ok(View { db })
    }

    /// Open an ephemeral, temporary-directory-backed view. Used by tests and
    /// by spectator instances that never persist across restarts.
    pub fn open_temporary() -> Result<Self, SyncError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(View { db })
    }

    fn tree(&self, collection: Collection) -> Result<sled::Tree, SyncError> {
        Ok(self.db.open_tree(collection.tree_name())?)
    }

    /// Fetch a row by primary key.
    pub fn get<R: Row>(&self, key: &[u8]) -> Result<Option<R>, SyncError> {
        let tree = self.tree(R::collection())?;
        match tree.get(key)? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert a row, failing with `Conflict` if its primary key already
    /// exists. Callers that want upsert semantics should `delete` first.
    pub fn insert<R: Row>(&self, row: &R) -> Result<(), SyncError> {
        let tree = self.tree(R::collection())?;
        let key = row.primary_key();
        let bytes = serde_json::to_vec(row)
            .map_err(|e| SyncError::Internal(format!("serialize row: {e}")))?;
        let previous = tree.compare_and_swap(&key, None as Option<&[u8]>, Some(bytes))?;
        if previous.is_err() {
            return Err(SyncError::Conflict(format!(
                "{} already exists for this key",
                R::collection().tree_name()
            )));
        }
        Ok(())
    }

    /// Insert or overwrite a row regardless of whether the key already
    /// exists. Used by handlers that implement "last writer wins" update
    /// semantics (e.g. `update-channel`, `set-role`).
    pub fn upsert<R: Row>(&self, row: &R) -> Result<(), SyncError> {
        let tree = self.tree(R::collection())?;
        let key = row.primary_key();
        let bytes = serde_json::to_vec(row)
            .map_err(|e| SyncError::Internal(format!("serialize row: {e}")))?;
        tree.insert(key, bytes)?;
        Ok(())
    }

    /// Delete a row by primary key. Not an error if absent.
    pub fn delete<R: Row>(&self, key: &[u8]) -> Result<(), SyncError> {
        let tree = self.tree(R::collection())?;
        tree.remove(key)?;
        Ok(())
    }

    /// Collect every row in a collection matching `predicate`.
    pub fn find<R: Row>(&self, mut predicate: impl FnMut(&R) -> bool) -> Result<Vec<R>, SyncError> {
        let tree = self.tree(R::collection())?;
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            let row: R = deserialize(&bytes)?;
            if predicate(&row) {
                out.push(row);
            }
        }
        Ok(out)
    }

    /// Collect every row whose key starts with `prefix`, in key order. Used
    /// for the message collection's per-channel range scan.
    pub fn find_prefix<R: Row>(&self, prefix: &[u8]) -> Result<Vec<R>, SyncError> {
        let tree = self.tree(R::collection())?;
        let mut out = Vec::new();
        for entry in tree.scan_prefix(prefix) {
            let (_, bytes) = entry?;
            out.push(deserialize(&bytes)?);
        }
        Ok(out)
    }

    /// First row matching `predicate`, if any.
    pub fn find_one<R: Row>(&self, predicate: impl FnMut(&R) -> bool) -> Result<Option<R>, SyncError> {
        Ok(self.find(predicate)?.into_iter().next())
    }

    /// Number of rows currently stored in a collection.
    pub fn count(&self, collection: Collection) -> Result<usize, SyncError> {
        Ok(self.tree(collection)?.len())
    }

    /// Flush every tree to disk. Called by the router at its periodic
    /// checkpoints and after the final batch of a replay.
    pub fn flush(&self) -> Result<(), SyncError> {
        self.db.flush()?;
        Ok(())
    }
}

fn deserialize<R: DeserializeOwned>(bytes: &[u8]) -> Result<R, SyncError> {
    serde_json::from_slice(bytes).map_err(|e| SyncError::Internal(format!("deserialize row: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::collections::{ChannelRow, ChannelType, MessageRow, ServerRow};

    fn server(id: &str) -> ServerRow {
        ServerRow {
            id: id.into(),
            name: "Test".into(),
            created_at: 1,
            description: None,
            avatar: None,
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let view = View::open_temporary().unwrap();
        view.insert(&server("s1")).unwrap();
        let got: ServerRow = view.get(b"s1").unwrap().unwrap();
        assert_eq!(got.name, "Test");
    }

    #[test]
    fn insert_twice_conflicts() {
        let view = View::open_temporary().unwrap();
        view.insert(&server("s1")).unwrap();
        assert!(matches!(view.insert(&server("s1")), Err(SyncError::Conflict(_))));
    }

    #[test]
    fn upsert_overwrites() {
        let view = View::open_temporary().unwrap();
        view.insert(&server("s1")).unwrap();
        let mut updated = server("s1");
        updated.name = "Renamed".into();
        view.upsert(&updated).unwrap();
        let got: ServerRow = view.get(b"s1").unwrap().unwrap();
        assert_eq!(got.name, "Renamed");
    }

    #[test]
    fn delete_removes_row() {
        let view = View::open_temporary().unwrap();
        view.insert(&server("s1")).unwrap();
        view.delete::<ServerRow>(b"s1").unwrap();
        assert!(view.get::<ServerRow>(b"s1").unwrap().is_none());
    }

    #[test]
    fn find_filters_by_predicate() {
        let view = View::open_temporary().unwrap();
        view.insert(&ChannelRow {
            id: "a".into(),
            channel_id: "a".into(),
            name: "general".into(),
            kind: ChannelType::Text,
            topic: None,
            created_by: "u1".into(),
            created_at: 1,
            position: 0,
        })
        .unwrap();
        view.insert(&ChannelRow {
            id: "b".into(),
            channel_id: "b".into(),
            name: "voice-lounge".into(),
            kind: ChannelType::Voice,
            topic: None,
            created_by: "u1".into(),
            created_at: 2,
            position: 1,
        })
        .unwrap();
        let text_only = view
            .find::<ChannelRow>(|c| c.kind == ChannelType::Text)
            .unwrap();
        assert_eq!(text_only.len(), 1);
        assert_eq!(text_only[0].name, "general");
    }

    #[test]
    fn find_prefix_scans_one_channel_in_key_order() {
        let view = View::open_temporary().unwrap();
        for (channel, id) in [("c1", "m2"), ("c1", "m1"), ("c2", "m3")] {
            view.insert(&MessageRow {
                id: id.into(),
                channel_id: channel.into(),
                author: "u1".into(),
                content: "hi".into(),
                timestamp: 1,
                edited_at: None,
                deleted_at: None,
                deleted_by: None,
                attachments: vec![],
            })
            .unwrap();
        }
        let rows: Vec<MessageRow> = view
            .find_prefix(&MessageRow::channel_prefix("c1"))
            .unwrap();
        assert_eq!(rows.len(), 2);
        // key order is channelId \0 id, so "m1" sorts before "m2"
        assert_eq!(rows[0].id, "m1");
        assert_eq!(rows[1].id, "m2");
    }
}
