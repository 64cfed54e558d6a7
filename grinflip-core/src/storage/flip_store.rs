use crate::error::{GrinflipError, Result};
use crate::storage::Storage;
use crate::types::{FlipRecord, FlipStatus, LeaderboardEntry, NewFlip, Side, TokenAmount, WalletAddress};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Leaderboard row the caller computed, and the version it was computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardUpdate {
    pub entry: LeaderboardEntry,
    /// `None` when the wallet had no row yet.
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded { flip_id: i64 },
    /// The same wager/status pair was already appended.
    Duplicate,
}

/// Storage contract of the flip ledger: an append-only `flips` collection and
/// a `leaderboard` collection updated by compare-and-swap.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn leaderboard_entry(
        &self,
        wallet: &WalletAddress,
    ) -> Result<Option<(LeaderboardEntry, u64)>>;

    /// Append `flip` and apply `update` in one transaction. A stale
    /// `expected_version` fails with [`GrinflipError::Conflict`] and nothing
    /// is written.
    async fn commit_flip(
        &self,
        flip: &NewFlip,
        update: Option<LeaderboardUpdate>,
    ) -> Result<RecordOutcome>;

    /// Newest first, one row per wager (the latest status).
    async fn recent_flips(&self, limit: usize) -> Result<Vec<FlipRecord>>;

    /// Ordered by total wins, descending.
    async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>>;

    async fn flips_for_wager(&self, wager_id: Uuid) -> Result<Vec<FlipRecord>>;
}

#[derive(Clone)]
pub struct FlipStore {
    storage: Arc<Storage>,
}

fn bad_column(idx: usize, name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, name.to_string(), rusqlite::types::Type::Text)
}

fn flip_from_row(row: &Row<'_>) -> rusqlite::Result<FlipRecord> {
    let wager_id: String = row.get(1)?;
    let wallet: String = row.get(2)?;
    let side: String = row.get(3)?;
    let result: String = row.get(4)?;
    let amount: i64 = row.get(5)?;
    let status: String = row.get(7)?;

    Ok(FlipRecord {
        id: row.get(0)?,
        wager_id: Uuid::parse_str(&wager_id).map_err(|_| bad_column(1, "wager_id"))?,
        wallet: WalletAddress::parse(&wallet).map_err(|_| bad_column(2, "wallet_address"))?,
        side: Side::from_str(&side).map_err(|_| bad_column(3, "side"))?,
        result: Side::from_str(&result).map_err(|_| bad_column(4, "result"))?,
        amount: TokenAmount::from_units(amount as u64),
        won: row.get(6)?,
        status: FlipStatus::from_str(&status).map_err(|_| bad_column(7, "status"))?,
        created_at: DateTime::from_timestamp_millis(row.get(8)?).unwrap_or_else(Utc::now),
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<(LeaderboardEntry, u64)> {
    let wallet: String = row.get(0)?;
    let entry = LeaderboardEntry {
        wallet: WalletAddress::parse(&wallet).map_err(|_| bad_column(0, "wallet_address"))?,
        total_wins: row.get::<_, i64>(1)? as u64,
        current_streak: row.get::<_, i64>(2)? as u64,
        longest_streak: row.get::<_, i64>(3)? as u64,
        total_flips: row.get::<_, i64>(4)? as u64,
    };
    Ok((entry, row.get::<_, i64>(5)? as u64))
}

const FLIP_COLUMNS: &str =
    "f.id, f.wager_id, f.wallet_address, f.side, f.result, f.amount, f.won, f.status, f.created_at";

impl FlipStore {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl LedgerStore for FlipStore {
    async fn leaderboard_entry(
        &self,
        wallet: &WalletAddress,
    ) -> Result<Option<(LeaderboardEntry, u64)>> {
        let conn = self.storage.get_connection().await;

        let entry = conn
            .query_row(
                "SELECT wallet_address, total_wins, current_streak, longest_streak, total_flips, version
                 FROM leaderboard WHERE wallet_address = ?1",
                params![wallet.as_str()],
                entry_from_row,
            )
            .optional()?;

        Ok(entry)
    }

    async fn commit_flip(
        &self,
        flip: &NewFlip,
        update: Option<LeaderboardUpdate>,
    ) -> Result<RecordOutcome> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO flips
             (wager_id, wallet_address, side, result, amount, won, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                flip.wager_id.to_string(),
                flip.wallet.as_str(),
                flip.side.as_str(),
                flip.result.as_str(),
                flip.amount.units() as i64,
                flip.won(),
                flip.status.as_str(),
                flip.created_at.timestamp_millis(),
            ],
        )?;
        if inserted == 0 {
            return Ok(RecordOutcome::Duplicate);
        }
        let flip_id = tx.last_insert_rowid();

        if let Some(update) = update {
            let entry = &update.entry;
            let changed = match update.expected_version {
                Some(version) => tx.execute(
                    "UPDATE leaderboard
                     SET total_wins = ?1, current_streak = ?2, longest_streak = ?3,
                         total_flips = ?4, version = version + 1
                     WHERE wallet_address = ?5 AND version = ?6",
                    params![
                        entry.total_wins as i64,
                        entry.current_streak as i64,
                        entry.longest_streak as i64,
                        entry.total_flips as i64,
                        entry.wallet.as_str(),
                        version as i64,
                    ],
                )?,
                None => tx.execute(
                    "INSERT OR IGNORE INTO leaderboard
                     (wallet_address, total_wins, current_streak, longest_streak, total_flips, version)
                     VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                    params![
                        entry.wallet.as_str(),
                        entry.total_wins as i64,
                        entry.current_streak as i64,
                        entry.longest_streak as i64,
                        entry.total_flips as i64,
                    ],
                )?,
            };

            if changed == 0 {
                // dropping `tx` rolls the flip insert back
                return Err(GrinflipError::conflict(format!(
                    "Leaderboard row for {} changed underneath",
                    entry.wallet
                )));
            }
        }

        tx.commit()?;
        Ok(RecordOutcome::Recorded { flip_id })
    }

    async fn recent_flips(&self, limit: usize) -> Result<Vec<FlipRecord>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM flips f
             WHERE NOT EXISTS (SELECT 1 FROM flips g WHERE g.wager_id = f.wager_id AND g.id > f.id)
             ORDER BY f.created_at DESC, f.id DESC LIMIT ?1",
            FLIP_COLUMNS
        ))?;
        let flips = stmt
            .query_map(params![limit as i64], flip_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(flips)
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT wallet_address, total_wins, current_streak, longest_streak, total_flips, version
             FROM leaderboard
             ORDER BY total_wins DESC, longest_streak DESC, wallet_address
             LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit as i64], entry_from_row)?
            .map(|row| row.map(|(entry, _)| entry))
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    async fn flips_for_wager(&self, wager_id: Uuid) -> Result<Vec<FlipRecord>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM flips f WHERE f.wager_id = ?1 ORDER BY f.id",
            FLIP_COLUMNS
        ))?;
        let flips = stmt
            .query_map(params![wager_id.to_string()], flip_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(flips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn flip(side: Side, result: Side, status: FlipStatus) -> NewFlip {
        NewFlip {
            wager_id: Uuid::new_v4(),
            wallet: WalletAddress::parse(WALLET).unwrap(),
            side,
            result,
            amount: TokenAmount::from_units(100),
            status,
            created_at: Utc::now(),
        }
    }

    async fn store() -> FlipStore {
        FlipStore::new(Arc::new(Storage::in_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn test_insert_then_compare_and_swap() {
        let store = store().await;
        let wallet = WalletAddress::parse(WALLET).unwrap();

        let mut entry = LeaderboardEntry::new(wallet.clone());
        entry.apply(true);
        let first = flip(Side::Heads, Side::Heads, FlipStatus::Settled);
        store
            .commit_flip(
                &first,
                Some(LeaderboardUpdate {
                    entry: entry.clone(),
                    expected_version: None,
                }),
            )
            .await
            .unwrap();

        let (stored, version) = store.leaderboard_entry(&wallet).await.unwrap().unwrap();
        assert_eq!(stored, entry);
        assert_eq!(version, 0);

        entry.apply(false);
        let second = flip(Side::Heads, Side::Tails, FlipStatus::Settled);
        store
            .commit_flip(
                &second,
                Some(LeaderboardUpdate {
                    entry: entry.clone(),
                    expected_version: Some(0),
                }),
            )
            .await
            .unwrap();

        let (stored, version) = store.leaderboard_entry(&wallet).await.unwrap().unwrap();
        assert_eq!(stored.total_flips, 2);
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn test_stale_version_rolls_back_flip() {
        let store = store().await;
        let wallet = WalletAddress::parse(WALLET).unwrap();

        let mut entry = LeaderboardEntry::new(wallet.clone());
        entry.apply(true);
        store
            .commit_flip(
                &flip(Side::Heads, Side::Heads, FlipStatus::Settled),
                Some(LeaderboardUpdate {
                    entry: entry.clone(),
                    expected_version: None,
                }),
            )
            .await
            .unwrap();

        let stale = flip(Side::Tails, Side::Tails, FlipStatus::Settled);
        let err = store
            .commit_flip(
                &stale,
                Some(LeaderboardUpdate {
                    entry,
                    expected_version: Some(41),
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GrinflipError::Conflict(_)));
        assert!(store.flips_for_wager(stale.wager_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_flip_ignored() {
        let store = store().await;
        let record = flip(Side::Heads, Side::Tails, FlipStatus::Settled);
        assert!(matches!(
            store.commit_flip(&record, None).await.unwrap(),
            RecordOutcome::Recorded { .. }
        ));
        assert_eq!(
            store.commit_flip(&record, None).await.unwrap(),
            RecordOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn test_recent_flips_shows_latest_status() {
        let store = store().await;
        let pending = flip(Side::Heads, Side::Heads, FlipStatus::PendingReconciliation);
        store.commit_flip(&pending, None).await.unwrap();

        let settled = NewFlip {
            status: FlipStatus::Settled,
            ..pending.clone()
        };
        store.commit_flip(&settled, None).await.unwrap();
        store
            .commit_flip(&flip(Side::Tails, Side::Heads, FlipStatus::Settled), None)
            .await
            .unwrap();

        let recent = store.recent_flips(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        let reconciled = recent.iter().find(|f| f.wager_id == pending.wager_id).unwrap();
        assert_eq!(reconciled.status, FlipStatus::Settled);
        assert!(reconciled.won);

        // audit trail keeps both rows
        assert_eq!(store.flips_for_wager(pending.wager_id).await.unwrap().len(), 2);
    }
}
