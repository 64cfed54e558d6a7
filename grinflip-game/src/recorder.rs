use crate::{GameError, Result};
use grinflip_core::config::LedgerConfig;
use grinflip_core::storage::LeaderboardUpdate;
use grinflip_core::{
    FlipRecord, FlipStatus, GrinflipError, LeaderboardEntry, LedgerStore, NewFlip,
    RecordOutcome, Side, WalletAddress,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

enum Command {
    Record(NewFlip),
    Flush(oneshot::Sender<()>),
}

/// Scoreboard over a window of recent flips. Heads and tails count the side
/// players picked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlipStats {
    pub flips: u64,
    pub wins: u64,
    pub heads: u64,
    pub tails: u64,
}

impl FlipStats {
    pub fn from_flips(flips: &[FlipRecord]) -> Self {
        flips.iter().fold(Self::default(), |mut stats, flip| {
            stats.flips += 1;
            if flip.won {
                stats.wins += 1;
            }
            match flip.side {
                Side::Heads => stats.heads += 1,
                Side::Tails => stats.tails += 1,
            }
            stats
        })
    }

    fn percent(&self, part: u64) -> f64 {
        if self.flips == 0 {
            0.0
        } else {
            part as f64 * 100.0 / self.flips as f64
        }
    }

    pub fn win_rate(&self) -> f64 {
        self.percent(self.wins)
    }

    pub fn heads_rate(&self) -> f64 {
        self.percent(self.heads)
    }

    pub fn tails_rate(&self) -> f64 {
        self.percent(self.tails)
    }
}

/// Appends flips and keeps the leaderboard in step.
///
/// Settlement hands flips over with [`LedgerRecorder::submit`] and moves on; a
/// background task writes them with retries. A failed write is logged and
/// never reaches the funds path.
#[derive(Clone)]
pub struct LedgerRecorder {
    store: Arc<dyn LedgerStore>,
    config: LedgerConfig,
    queue: mpsc::UnboundedSender<Command>,
}

impl LedgerRecorder {
    /// Start the background writer. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let recorder = Self {
            store,
            config,
            queue,
        };
        tokio::spawn(recorder.clone().run(receiver));
        recorder
    }

    async fn run(self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = receiver.recv().await {
            match command {
                Command::Record(flip) => self.record_with_retry(&flip).await,
                Command::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!("Ledger recorder stopped");
    }

    async fn record_with_retry(&self, flip: &NewFlip) {
        let attempts = self.config.max_record_attempts.max(1);
        let mut backoff = self.config.retry_backoff();

        for attempt in 1..=attempts {
            match self.record(flip).await {
                Ok(RecordOutcome::Recorded { flip_id }) => {
                    tracing::debug!("Recorded flip {} for wager {}", flip_id, flip.wager_id);
                    return;
                }
                Ok(RecordOutcome::Duplicate) => {
                    tracing::debug!("Wager {} already recorded as {}", flip.wager_id, flip.status.as_str());
                    return;
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        "Recording wager {} failed ({}/{}): {}",
                        flip.wager_id,
                        attempt,
                        attempts,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    tracing::error!(
                        "Giving up on recording wager {} after {} attempts: {}",
                        flip.wager_id,
                        attempts,
                        e
                    );
                }
            }
        }
    }

    /// Append `flip` and fold it into the leaderboard in one store
    /// transaction. A concurrent leaderboard writer makes the transaction fail
    /// with a conflict; the read-modify-write is then redone on fresh data.
    pub async fn record(&self, flip: &NewFlip) -> Result<RecordOutcome> {
        let attempts = self.config.max_record_attempts.max(1);

        for _ in 0..attempts {
            let update = match flip.status {
                FlipStatus::Settled => Some(self.leaderboard_update(flip).await?),
                FlipStatus::PendingReconciliation => None,
            };

            match self.store.commit_flip(flip, update).await {
                Err(GrinflipError::Conflict(reason)) => {
                    tracing::debug!("Leaderboard conflict for {}: {}", flip.wallet.short(), reason);
                }
                other => return Ok(other?),
            }
        }

        Err(GameError::ledger(format!(
            "Leaderboard for {} kept changing underneath {} attempts",
            flip.wallet, attempts
        )))
    }

    async fn leaderboard_update(&self, flip: &NewFlip) -> Result<LeaderboardUpdate> {
        let (mut entry, expected_version) = match self.store.leaderboard_entry(&flip.wallet).await? {
            Some((entry, version)) => (entry, Some(version)),
            None => (LeaderboardEntry::new(flip.wallet.clone()), None),
        };
        entry.apply(flip.won());

        Ok(LeaderboardUpdate {
            entry,
            expected_version,
        })
    }

    /// Queue `flip` for the background writer.
    pub fn submit(&self, flip: NewFlip) {
        let wager_id = flip.wager_id;
        if self.queue.send(Command::Record(flip)).is_err() {
            tracing::error!("Ledger recorder is gone, wager {} not recorded", wager_id);
        }
    }

    /// Wait until every flip submitted before this call has been handled.
    pub async fn flush(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.queue
            .send(Command::Flush(done))
            .map_err(|_| GameError::ledger("Ledger recorder is gone"))?;
        wait.await
            .map_err(|_| GameError::ledger("Ledger recorder stopped before flushing"))
    }

    pub async fn recent_flips(&self, limit: Option<usize>) -> Result<Vec<FlipRecord>> {
        let limit = limit.unwrap_or(self.config.page_size);
        Ok(self.store.recent_flips(limit).await?)
    }

    pub async fn stats(&self, limit: Option<usize>) -> Result<FlipStats> {
        Ok(FlipStats::from_flips(&self.recent_flips(limit).await?))
    }

    pub async fn leaderboard(&self, limit: Option<usize>) -> Result<Vec<LeaderboardEntry>> {
        let limit = limit.unwrap_or(self.config.page_size);
        Ok(self.store.leaderboard(limit).await?)
    }

    pub async fn entry(&self, wallet: &WalletAddress) -> Result<Option<LeaderboardEntry>> {
        Ok(self
            .store
            .leaderboard_entry(wallet)
            .await?
            .map(|(entry, _)| entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use grinflip_core::{FlipStore, Side, Storage, TokenAmount};
    use uuid::Uuid;

    const WALLET: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    async fn recorder() -> LedgerRecorder {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        LedgerRecorder::spawn(Arc::new(FlipStore::new(storage)), LedgerConfig::default())
    }

    fn flip(won: bool, status: FlipStatus) -> NewFlip {
        NewFlip {
            wager_id: Uuid::new_v4(),
            wallet: WalletAddress::parse(WALLET).unwrap(),
            side: Side::Heads,
            result: if won { Side::Heads } else { Side::Tails },
            amount: TokenAmount::from_units(100),
            status,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_streaks_through_recorder() {
        let recorder = recorder().await;
        for won in [true, true, false, true, true, true] {
            recorder.submit(flip(won, FlipStatus::Settled));
        }
        recorder.flush().await.unwrap();

        let entry = recorder
            .entry(&WalletAddress::parse(WALLET).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.current_streak, 3);
        assert_eq!(entry.longest_streak, 3);
        assert_eq!(entry.total_wins, 5);
        assert_eq!(entry.total_flips, 6);
        assert_eq!(recorder.recent_flips(None).await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_duplicate_is_ignored() {
        let recorder = recorder().await;
        let entry = flip(true, FlipStatus::Settled);

        assert!(matches!(
            recorder.record(&entry).await.unwrap(),
            RecordOutcome::Recorded { .. }
        ));
        assert_eq!(recorder.record(&entry).await.unwrap(), RecordOutcome::Duplicate);

        let board = recorder.leaderboard(None).await.unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].total_flips, 1);
    }

    #[tokio::test]
    async fn test_pending_flip_skips_leaderboard() {
        let recorder = recorder().await;
        recorder
            .record(&flip(true, FlipStatus::PendingReconciliation))
            .await
            .unwrap();

        assert!(recorder.leaderboard(None).await.unwrap().is_empty());
        let recent = recorder.recent_flips(None).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert!(!recent[0].won);
    }

    #[tokio::test]
    async fn test_concurrent_records_for_one_wallet() {
        let recorder = recorder().await;
        let (a, b) = (flip(true, FlipStatus::Settled), flip(false, FlipStatus::Settled));

        let (first, second) = tokio::join!(recorder.record(&a), recorder.record(&b));
        first.unwrap();
        second.unwrap();

        let entry = recorder
            .entry(&WalletAddress::parse(WALLET).unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.total_flips, 2);
        assert_eq!(entry.total_wins, 1);
    }

    #[tokio::test]
    async fn test_stats_over_recent_flips() {
        let recorder = recorder().await;
        assert_eq!(recorder.stats(None).await.unwrap(), FlipStats::default());
        assert_eq!(FlipStats::default().win_rate(), 0.0);

        let mut tails_pick = flip(false, FlipStatus::Settled);
        tails_pick.side = Side::Tails;
        tails_pick.result = Side::Heads;
        for entry in [
            flip(true, FlipStatus::Settled),
            flip(false, FlipStatus::Settled),
            flip(true, FlipStatus::PendingReconciliation),
            tails_pick,
        ] {
            recorder.record(&entry).await.unwrap();
        }

        let stats = recorder.stats(None).await.unwrap();
        assert_eq!(
            stats,
            FlipStats {
                flips: 4,
                wins: 1,
                heads: 3,
                tails: 1,
            }
        );
        assert_eq!(stats.win_rate(), 25.0);
        assert_eq!(stats.heads_rate(), 75.0);
        assert_eq!(stats.tails_rate(), 25.0);

        // window follows the limit
        assert_eq!(recorder.stats(Some(1)).await.unwrap().flips, 1);
    }

    #[tokio::test]
    async fn test_flush_on_empty_queue() {
        let recorder = recorder().await;
        recorder.flush().await.unwrap();
        assert!(recorder.recent_flips(Some(5)).await.unwrap().is_empty());
    }
}
