// (c) Cartesi and individual authors (see AUTHORS)
// SPDX-License-Identifier: Apache-2.0 (see LICENSE)

use std::sync::{Arc, Mutex, MutexGuard};

use alloy_primitives::{Address, B256};
use channel_core::ChannelState;
use rusqlite::{Connection, TransactionBehavior};
use rusqlite_migration::{M, Migrations};

use super::sql::{
    sql_delete_channel, sql_replace_recipients, sql_select_channels, sql_select_ids_by_owner,
    sql_upsert_channel,
};
use super::{StorageError, StorageOpenError};

const MIGRATION_0001_SCHEMA: &str = include_str!("migrations/0001_schema.sql");

/// Durable channel store over a single SQLite connection. Cloning shares the
/// connection; writes run on the blocking pool so the async request path is
/// never parked on file I/O.
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    pub fn open(path: &str) -> Result<Self, StorageOpenError> {
        let mut conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Self::run_migrations(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn run_migrations(conn: &mut Connection) -> Result<(), StorageOpenError> {
        Migrations::new(vec![M::up(MIGRATION_0001_SCHEMA)]).to_latest(conn)?;
        Ok(())
    }

    /// Full bootstrap read on service start.
    pub fn load_all(&self) -> Result<Vec<ChannelState>, StorageError> {
        let conn = self.lock_conn();
        Ok(sql_select_channels(&conn)?)
    }

    pub fn find_by_owner(&self, owner: Address) -> Result<Vec<B256>, StorageError> {
        let conn = self.lock_conn();
        Ok(sql_select_ids_by_owner(&conn, owner)?)
    }

    /// Atomically writes the channel row and its full recipient list. Durable
    /// (synchronous=FULL, WAL) before this returns; the caller commits to
    /// memory only afterwards.
    pub async fn upsert_channel(&self, channel: ChannelState) -> Result<(), StorageError> {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let mut conn = lock(&conn);
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            sql_upsert_channel(&tx, &channel)?;
            sql_replace_recipients(&tx, &channel)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Removes a terminal or long-expired channel. Returns false when the id
    /// was already gone.
    pub async fn delete_channel(&self, channel_id: B256) -> Result<bool, StorageError> {
        let conn = Arc::clone(&self.conn);
        run_blocking(move || {
            let conn = lock(&conn);
            let deleted = sql_delete_channel(&conn, channel_id)?;
            Ok(deleted > 0)
        })
        .await
    }

    fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        lock(&self.conn)
    }
}

fn lock(conn: &Arc<Mutex<Connection>>) -> MutexGuard<'_, Connection> {
    conn.lock().expect("storage connection mutex poisoned")
}

async fn run_blocking<T, F>(work: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| StorageError::Background(err.to_string()))?
}
