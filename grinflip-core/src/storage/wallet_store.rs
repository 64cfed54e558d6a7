use crate::error::Result;
use crate::storage::Storage;
use crate::types::WalletAddress;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletData {
    pub id: String,
    pub name: String,
    pub address: WalletAddress,
    pub created_at: DateTime<Utc>,
    pub encrypted_seed: Vec<u8>,
}

pub struct WalletStore<'a> {
    storage: &'a Storage,
}

fn wallet_from_row(row: &Row<'_>) -> rusqlite::Result<WalletData> {
    let address: String = row.get(2)?;
    let address = WalletAddress::parse(&address).map_err(|_| {
        rusqlite::Error::InvalidColumnType(2, "address".to_string(), rusqlite::types::Type::Text)
    })?;

    Ok(WalletData {
        id: row.get(0)?,
        name: row.get(1)?,
        address,
        created_at: DateTime::from_timestamp(row.get(3)?, 0).unwrap_or_else(Utc::now),
        encrypted_seed: row.get(4)?,
    })
}

impl<'a> WalletStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn save_wallet(&self, wallet_data: &WalletData) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "INSERT OR REPLACE INTO wallets (id, name, address, created_at, encrypted_seed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                wallet_data.id,
                wallet_data.name,
                wallet_data.address.as_str(),
                wallet_data.created_at.timestamp(),
                wallet_data.encrypted_seed,
            ],
        )?;

        Ok(())
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<WalletData>> {
        let conn = self.storage.get_connection().await;

        let wallet = conn
            .query_row(
                "SELECT id, name, address, created_at, encrypted_seed
                 FROM wallets WHERE name = ?1",
                params![name],
                wallet_from_row,
            )
            .optional()?;

        Ok(wallet)
    }

    pub async fn list_wallets(&self) -> Result<Vec<WalletData>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT id, name, address, created_at, encrypted_seed
             FROM wallets ORDER BY created_at DESC, name",
        )?;

        let wallets = stmt
            .query_map([], wallet_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(wallets)
    }

    pub async fn delete_wallet(&self, wallet_id: &str) -> Result<()> {
        let conn = self.storage.get_connection().await;
        conn.execute("DELETE FROM wallets WHERE id = ?1", params![wallet_id])?;
        Ok(())
    }

    pub async fn wallet_exists(&self, name: &str) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM wallets WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }
}
