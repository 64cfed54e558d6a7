use crate::error::Result;
use crate::storage::Storage;
use crate::types::{Side, TokenAmount, TxId, WalletAddress};
use crate::wager::{Wager, WagerState};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Journal of wager lifecycles, used to find wagers that need reconciliation.
#[derive(Clone)]
pub struct WagerStore {
    storage: Arc<Storage>,
}

const WAGER_COLUMNS: &str = "id, wallet, amount, side, state, commitment, server_seed, client_seed,
     result, debit_txid, credit_txid, failure, created_at, updated_at";

fn bad_column(idx: usize, name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, name.to_string(), rusqlite::types::Type::Text)
}

fn decode_hex(value: Option<String>, idx: usize, name: &str) -> rusqlite::Result<Option<Vec<u8>>> {
    value
        .map(|v| hex::decode(v).map_err(|_| bad_column(idx, name)))
        .transpose()
}

fn wager_from_row(row: &Row<'_>) -> rusqlite::Result<Wager> {
    let id: String = row.get(0)?;
    let wallet: String = row.get(1)?;
    let amount: i64 = row.get(2)?;
    let side: String = row.get(3)?;
    let state: String = row.get(4)?;
    let result: Option<String> = row.get(8)?;

    Ok(Wager {
        id: Uuid::parse_str(&id).map_err(|_| bad_column(0, "id"))?,
        wallet: WalletAddress::parse(&wallet).map_err(|_| bad_column(1, "wallet"))?,
        amount: TokenAmount::from_units(amount as u64),
        side: Side::from_str(&side).map_err(|_| bad_column(3, "side"))?,
        state: WagerState::from_str(&state).map_err(|_| bad_column(4, "state"))?,
        commitment: row.get(5)?,
        server_seed: decode_hex(row.get(6)?, 6, "server_seed")?,
        client_seed: decode_hex(row.get(7)?, 7, "client_seed")?,
        result: result
            .map(|r| Side::from_str(&r).map_err(|_| bad_column(8, "result")))
            .transpose()?,
        debit_txid: row.get::<_, Option<String>>(9)?.map(TxId::new),
        credit_txid: row.get::<_, Option<String>>(10)?.map(TxId::new),
        failure: row.get(11)?,
        created_at: DateTime::from_timestamp_millis(row.get(12)?).unwrap_or_else(Utc::now),
        updated_at: DateTime::from_timestamp_millis(row.get(13)?).unwrap_or_else(Utc::now),
    })
}

impl WagerStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Insert or overwrite the journal row for `wager`.
    pub async fn save(&self, wager: &Wager) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "INSERT OR REPLACE INTO wagers
             (id, wallet, amount, side, state, commitment, server_seed, client_seed,
              result, debit_txid, credit_txid, failure, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                wager.id.to_string(),
                wager.wallet.as_str(),
                wager.amount.units() as i64,
                wager.side.as_str(),
                wager.state.as_str(),
                wager.commitment,
                wager.server_seed.as_ref().map(hex::encode),
                wager.client_seed.as_ref().map(hex::encode),
                wager.result.map(|r| r.as_str()),
                wager.debit_txid.as_ref().map(|t| t.as_str()),
                wager.credit_txid.as_ref().map(|t| t.as_str()),
                wager.failure,
                wager.created_at.timestamp_millis(),
                wager.updated_at.timestamp_millis(),
            ],
        )?;

        Ok(())
    }

    pub async fn load(&self, id: Uuid) -> Result<Option<Wager>> {
        let conn = self.storage.get_connection().await;

        let wager = conn
            .query_row(
                &format!("SELECT {} FROM wagers WHERE id = ?1", WAGER_COLUMNS),
                params![id.to_string()],
                wager_from_row,
            )
            .optional()?;

        Ok(wager)
    }

    pub async fn list_by_state(&self, state: WagerState) -> Result<Vec<Wager>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM wagers WHERE state = ?1 ORDER BY created_at",
            WAGER_COLUMNS
        ))?;
        let wagers = stmt
            .query_map(params![state.as_str()], wager_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(wagers)
    }

    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Wager>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM wagers ORDER BY created_at DESC LIMIT ?1",
            WAGER_COLUMNS
        ))?;
        let wagers = stmt
            .query_map(params![limit as i64], wager_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(wagers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    #[tokio::test]
    async fn test_save_and_reload() {
        let store = WagerStore::new(Arc::new(Storage::in_memory().await.unwrap()));
        let mut wager = Wager::new(
            WalletAddress::parse(WALLET).unwrap(),
            TokenAmount::from_units(250),
            Side::Tails,
        );
        wager.server_seed = Some(vec![7u8; 32]);
        wager.commitment = Some("abcd".to_string());
        wager.advance(WagerState::SeedCommitted).unwrap();
        store.save(&wager).await.unwrap();

        let loaded = store.load(wager.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, WagerState::SeedCommitted);
        assert_eq!(loaded.server_seed, Some(vec![7u8; 32]));
        assert_eq!(loaded.amount, TokenAmount::from_units(250));
        assert_eq!(loaded.side, Side::Tails);
    }

    #[tokio::test]
    async fn test_list_by_state() {
        let store = WagerStore::new(Arc::new(Storage::in_memory().await.unwrap()));
        let wallet = WalletAddress::parse(WALLET).unwrap();

        let mut failed = Wager::new(wallet.clone(), TokenAmount::from_units(1), Side::Heads);
        failed.state = WagerState::CreditPending;
        failed.fail(WagerState::CreditFailed, "timeout").unwrap();
        store.save(&failed).await.unwrap();

        let fresh = Wager::new(wallet, TokenAmount::from_units(1), Side::Heads);
        store.save(&fresh).await.unwrap();

        let pending = store.list_by_state(WagerState::CreditFailed).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, failed.id);
        assert_eq!(store.list_recent(10).await.unwrap().len(), 2);
    }
}
