//! The append-only, multi-writer log and its replication transport are
//! treated as an external collaborator; the core needs a concrete,
//! swappable implementation of its interface to be testable: local append,
//! linearized replay, per-entry writer attribution.
//!
//! `LocalLog` is a single-process stand-in backed by its own sled tree,
//! keyed by a monotonic insertion sequence. A production deployment swaps
//! this for a real multi-writer replicated log (e.g. iroh-gossip or a
//! Hypercore-style append log, as the teacher's `freeq-server/src/iroh.rs`
//! wires up for its own transport); that swap only has to honor the
//! `ReplicatedLog` trait below.
//!
//! Each entry's `(action_type, payload)` is put through
//! `syncbase_sdk::codec::encode`/`decode` before it touches disk, so the
//! tag-byte wire format is exercised on every real append and replay, not
//! only in the codec's own isolated round-trip tests.

use serde::{Deserialize, Serialize};
use sled::Db;

use syncbase_sdk::codec;
use syncbase_sdk::crypto::Envelope;

use crate::error::SyncError;

/// Position in the log. Totally ordered; used by `LocalLog` as an opaque
/// replay cursor, and by the router to detect "already applied".
pub type Cursor = u64;

/// One logical log record: a signed envelope plus the writer key the
/// replication transport attributes it to (for `LocalLog`, always the
/// local peer's own key, since there's only one writer per process).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub cursor: Cursor,
    pub envelope: Envelope,
    pub from: String,
    /// Set by the caller when the entry is an optimistic, not-yet-confirmed
    /// append (only ever true for `claim-invite`).
    pub optimistic: bool,
}

/// On-disk shape of one entry: the envelope's `(action_type, payload)` leg
/// collapsed into its tag-byte wire encoding, with the signing metadata and
/// writer attribution stored alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    cursor: Cursor,
    signer: String,
    signature: String,
    encoded: Vec<u8>,
    from: String,
    optimistic: bool,
}

/// The log's interface, as the core core depends on it. `append` is local
/// and synchronous from the writer's point of view; `replay` yields every
/// entry in linearized order starting after `from`.
pub trait ReplicatedLog {
    fn append(&self, envelope: Envelope, optimistic: bool) -> Result<Cursor, SyncError>;
    fn replay(&self, from: Option<Cursor>) -> Result<Vec<LogEntry>, SyncError>;
    fn len(&self) -> Result<u64, SyncError>;
    fn is_empty(&self) -> Result<bool, SyncError> {
        Ok(self.len()? == 0)
    }
    fn discovery_key(&self) -> &[u8];
}

/// Single-process, sled-backed log. Entries are stored keyed by
/// big-endian `Cursor` so `replay` is a plain ordered scan.
pub struct LocalLog {
    tree: sled::Tree,
    writer_key: String,
    discovery_key: Vec<u8>,
    next: std::sync::atomic::AtomicU64,
}

impl LocalLog {
    pub fn open(db: &Db, writer_key: String, discovery_key: Vec<u8>) -> Result<Self, SyncError> {
        let tree = db.open_tree("log")?;
        let next = tree
            .iter()
            .keys()
            .last()
            .transpose()?
            .map(|k| u64::from_be_bytes(k.as_ref().try_into().unwrap_or_default()) + 1)
            .unwrap_or(0);
        Ok(LocalLog {
            tree,
            writer_key,
            discovery_key,
            next: std::sync::atomic::AtomicU64::new(next),
        })
    }
}

impl ReplicatedLog for LocalLog {
    fn append(&self, envelope: Envelope, optimistic: bool) -> Result<Cursor, SyncError> {
        let cursor = self.next.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let encoded = codec::encode(envelope.action_type, &envelope.payload)?;
        let entry = StoredEntry {
            cursor,
            signer: envelope.signer,
            signature: envelope.signature,
            encoded,
            from: self.writer_key.clone(),
            optimistic,
        };
        let bytes = serde_json::to_vec(&entry)
            .map_err(|e| SyncError::Internal(format!("serialize log entry: {e}")))?;
        self.tree.insert(cursor.to_be_bytes(), bytes)?;
        self.tree.flush()?;
        Ok(cursor)
    }

    fn replay(&self, from: Option<Cursor>) -> Result<Vec<LogEntry>, SyncError> {
        let start = from.map(|c| c + 1).unwrap_or(0);
        let mut out = Vec::new();
        for entry in self.tree.scan_prefix(&[] as &[u8]) {
            let (key, bytes) = entry?;
            let cursor = u64::from_be_bytes(key.as_ref().try_into().unwrap_or_default());
            if cursor < start {
                continue;
            }
            let stored: StoredEntry = serde_json::from_slice(&bytes)
                .map_err(|e| SyncError::Internal(format!("deserialize log entry: {e}")))?;
            let (action_type, payload) = codec::decode(&stored.encoded)?;
            out.push(LogEntry {
                cursor: stored.cursor,
                envelope: Envelope {
                    action_type,
                    payload,
                    signer: stored.signer,
                    signature: stored.signature,
                },
                from: stored.from,
                optimistic: stored.optimistic,
            });
        }
        Ok(out)
    }

    fn len(&self) -> Result<u64, SyncError> {
        Ok(self.tree.len() as u64)
    }

    fn discovery_key(&self) -> &[u8] {
        &self.discovery_key
    }
}
