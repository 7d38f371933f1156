// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Embedded recovery-record store backed by redb (pure Rust, ACID).
//!
//! One record per user, keyed `purchase-recovery:{user_id}`. A record is
//! written the moment an on-ramp reports payment success and removed only
//! once the delivered funds have been settled into the deposit account, so
//! a crash anywhere in between leaves a durable marker for startup recovery.

use std::path::Path;

use redb::{Database, ReadableDatabase, TableDefinition};

use crate::models::RecoveryRecord;

/// Recovery records: composite user key → serialized RecoveryRecord (JSON bytes).
const RECOVERY_RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("recovery_records");

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redb database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage key for a user's single in-flight recovery record.
fn record_key(user_id: &str) -> String {
    format!("purchase-recovery:{user_id}")
}

// =============================================================================
// RecoveryStore
// =============================================================================

/// Embedded ACID store holding at most one recovery record per user.
pub struct RecoveryStore {
    db: Database,
}

impl RecoveryStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Create the table upfront so reads never race table creation.
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(RECOVERY_RECORDS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Fetch the user's recovery record, if any.
    pub fn get(&self, user_id: &str) -> StoreResult<Option<RecoveryRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(RECOVERY_RECORDS) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match table.get(record_key(user_id).as_str())? {
            Some(value) => {
                let record: RecoveryRecord = serde_json::from_slice(value.value())?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Write (or overwrite) the user's recovery record.
    ///
    /// Overwriting is deliberate: a new payment supersedes any stale marker
    /// left by an earlier session for the same user.
    pub fn set(&self, user_id: &str, record: &RecoveryRecord) -> StoreResult<()> {
        let json = serde_json::to_vec(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RECOVERY_RECORDS)?;
            table.insert(record_key(user_id).as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Remove the user's recovery record. Removing an absent key is a no-op.
    pub fn remove(&self, user_id: &str) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(RECOVERY_RECORDS)?;
            table.remove(record_key(user_id).as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Vendor, RECOVERY_RECORD_TTL_MS};

    fn sample_record(created_at_epoch_ms: i64) -> RecoveryRecord {
        RecoveryRecord {
            purchase_amount_minor: 1_500,
            target_token: "So11111111111111111111111111111111111111112".to_string(),
            vendor: Vendor::Coinflow,
            created_at_epoch_ms,
            intended_source_amount: 15_000_000,
        }
    }

    fn open_temp_store() -> (tempfile::TempDir, RecoveryStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = RecoveryStore::open(&dir.path().join("recovery.redb")).expect("open store");
        (dir, store)
    }

    #[test]
    fn get_returns_none_for_unknown_user() {
        let (_dir, store) = open_temp_store();
        assert!(store.get("user-1").expect("get").is_none());
    }

    #[test]
    fn set_then_get_round_trips() {
        let (_dir, store) = open_temp_store();
        let now = crate::models::now_epoch_ms();
        let record = sample_record(now);

        store.set("user-1", &record).expect("set");
        let loaded = store.get("user-1").expect("get").expect("record present");

        assert_eq!(loaded.purchase_amount_minor, record.purchase_amount_minor);
        assert_eq!(loaded.target_token, record.target_token);
        assert_eq!(loaded.intended_source_amount, record.intended_source_amount);
        assert!(!loaded.is_expired(now));
    }

    #[test]
    fn set_overwrites_existing_record() {
        let (_dir, store) = open_temp_store();
        let first = sample_record(1_000);
        let mut second = sample_record(2_000);
        second.purchase_amount_minor = 9_900;

        store.set("user-1", &first).expect("set first");
        store.set("user-1", &second).expect("set second");

        let loaded = store.get("user-1").expect("get").expect("record present");
        assert_eq!(loaded.purchase_amount_minor, 9_900);
        assert_eq!(loaded.created_at_epoch_ms, 2_000);
    }

    #[test]
    fn remove_clears_record_and_tolerates_absent_key() {
        let (_dir, store) = open_temp_store();
        store
            .set("user-1", &sample_record(crate::models::now_epoch_ms()))
            .expect("set");

        store.remove("user-1").expect("remove");
        assert!(store.get("user-1").expect("get").is_none());

        // Second remove is a no-op.
        store.remove("user-1").expect("remove absent");
    }

    #[test]
    fn records_are_scoped_per_user() {
        let (_dir, store) = open_temp_store();
        store
            .set("user-1", &sample_record(crate::models::now_epoch_ms()))
            .expect("set");

        assert!(store.get("user-2").expect("get").is_none());
    }

    #[test]
    fn stale_record_reports_expired() {
        let now = crate::models::now_epoch_ms();
        let record = sample_record(now - RECOVERY_RECORD_TTL_MS - 1);
        assert!(record.is_expired(now));
    }
}
