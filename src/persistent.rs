//! Persistent-store contract: the on-disk/WAL capability the core
//! consumes but never implements. A filesystem-dictionary backing store is
//! an external collaborator; this module only fixes the boundary it must
//! satisfy.

use crate::error::EngineResult;
use crate::tx::TxId;

/// An opaque, core-agnostic snapshot blob. The core never inspects the
/// bytes; it only round-trips them through [`PersistentStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotBlob(pub Vec<u8>);

/// An opaque write-ahead-log record for one committed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Transaction the record describes.
    pub tx_id: TxId,
    /// Core-opaque payload; format is owned by the adapter.
    pub bytes: Vec<u8>,
}

/// Capability a [`crate::Context`] consumes for durability. The core calls
/// these at startup, on commit, and on controlled shutdown; it ships no
/// implementation of its own — the on-disk format is opaque to the core.
pub trait PersistentStore: Send + Sync {
    /// Opens (or creates) the backing store at `path`.
    ///
    /// # Errors
    /// Implementation-defined; the core propagates whatever [`crate::error::EngineError`] is returned.
    fn open(&self, path: &std::path::Path) -> EngineResult<()>;

    /// Persists a full snapshot, replacing any prior one.
    ///
    /// # Errors
    /// Implementation-defined.
    fn save_snapshot(&self, segments: &SnapshotBlob) -> EngineResult<()>;

    /// Loads the most recently saved snapshot, if any.
    ///
    /// # Errors
    /// Implementation-defined.
    fn load_snapshot(&self) -> EngineResult<Option<SnapshotBlob>>;

    /// Appends one committed transaction's record to the write-ahead log.
    ///
    /// # Errors
    /// Implementation-defined.
    fn append_wal(&self, record: &TransactionRecord) -> EngineResult<()>;

    /// Replays WAL records committed at or after `from_id`, in commit order.
    ///
    /// # Errors
    /// Implementation-defined.
    fn replay_wal(&self, from_id: TxId) -> EngineResult<Vec<TransactionRecord>>;
}

/// An in-memory, do-nothing [`PersistentStore`] used to exercise the call
/// sites in tests. Not exported outside `#[cfg(test)]`: the core ships no
/// real adapter.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct NullStore {
    records: parking_lot::Mutex<Vec<TransactionRecord>>,
}

#[cfg(test)]
impl PersistentStore for NullStore {
    fn open(&self, _path: &std::path::Path) -> EngineResult<()> {
        Ok(())
    }

    fn save_snapshot(&self, _segments: &SnapshotBlob) -> EngineResult<()> {
        Ok(())
    }

    fn load_snapshot(&self) -> EngineResult<Option<SnapshotBlob>> {
        Ok(None)
    }

    fn append_wal(&self, record: &TransactionRecord) -> EngineResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn replay_wal(&self, from_id: TxId) -> EngineResult<Vec<TransactionRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.tx_id >= from_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_store_replays_appended_records_from_id() {
        let store = NullStore::default();
        store
            .append_wal(&TransactionRecord {
                tx_id: TxId::from_raw(1),
                bytes: vec![1],
            })
            .unwrap();
        store
            .append_wal(&TransactionRecord {
                tx_id: TxId::from_raw(2),
                bytes: vec![2],
            })
            .unwrap();
        let replayed = store.replay_wal(TxId::from_raw(2)).unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].tx_id, TxId::from_raw(2));
    }
}
