pub mod flip_store;
pub mod wager_store;
pub mod wallet_store;

pub use flip_store::{FlipStore, LeaderboardUpdate, LedgerStore, RecordOutcome};
pub use wager_store::WagerStore;
pub use wallet_store::WalletStore;

use crate::error::{GrinflipError, Result};
use rusqlite::Connection;
use std::path::Path;
use tokio::sync::Mutex;

pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GrinflipError::internal(format!("Failed to create directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)?;
        Self::with_connection(conn).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?).await
    }

    async fn with_connection(conn: Connection) -> Result<Self> {
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        // Player wallets
        conn.execute(
            "CREATE TABLE IF NOT EXISTS wallets (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                address TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                encrypted_seed BLOB NOT NULL
            )",
            [],
        )?;

        // Wager journal, one row per wager, rewritten on every transition
        conn.execute(
            "CREATE TABLE IF NOT EXISTS wagers (
                id TEXT PRIMARY KEY,
                wallet TEXT NOT NULL,
                amount INTEGER NOT NULL,
                side TEXT NOT NULL,
                state TEXT NOT NULL,
                commitment TEXT,
                server_seed TEXT,
                client_seed TEXT,
                result TEXT,
                debit_txid TEXT,
                credit_txid TEXT,
                failure TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS wagers_state ON wagers(state)",
            [],
        )?;

        // Append-only flip audit log
        conn.execute(
            "CREATE TABLE IF NOT EXISTS flips (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                wager_id TEXT NOT NULL,
                wallet_address TEXT NOT NULL,
                side TEXT NOT NULL,
                result TEXT NOT NULL,
                amount INTEGER NOT NULL,
                won INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (wager_id, status)
            )",
            [],
        )?;

        // Per-wallet aggregates, guarded by a version column
        conn.execute(
            "CREATE TABLE IF NOT EXISTS leaderboard (
                wallet_address TEXT PRIMARY KEY,
                total_wins INTEGER NOT NULL,
                current_streak INTEGER NOT NULL,
                longest_streak INTEGER NOT NULL,
                total_flips INTEGER NOT NULL,
                version INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    pub async fn get_connection(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}
