use crate::chain::{
    BalanceOracle, Checkpoint, SignedTransfer, TransferError, TransferPrimitive, TransferSpec,
};
use crate::error::{GrinflipError, Result};
use crate::types::{TokenAmount, TxId, WalletAddress};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::Duration;

/// Number of blocks a checkpoint stays usable.
pub const DEFAULT_VALIDITY_WINDOW: u64 = 150;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLog {
    pub txid: TxId,
    pub spec: TransferSpec,
    pub reference: Option<String>,
    pub height: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerState {
    token: String,
    height: u64,
    balances: HashMap<WalletAddress, u64>,
    transfers: Vec<TransferLog>,
    references: HashMap<String, TxId>,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    from: Option<WalletAddress>,
    error: TransferError,
    remaining: u32,
}

#[derive(Debug, Default)]
struct Faults {
    failures: Vec<InjectedFailure>,
    expire_next: u32,
    drop_acks: u32,
    latency: Duration,
    oracle_offline: bool,
}

/// In-process token ledger: one mint, signature-checked transfers, a moving
/// checkpoint with a validity window. Backs the CLI and the tests; faults can
/// be injected to exercise every failure path of settlement.
pub struct SandboxLedger {
    state: Mutex<LedgerState>,
    faults: Mutex<Faults>,
    validity_window: u64,
}

/// Exclusive hold on a snapshot between loading and saving it. Another
/// process opening the same snapshot blocks until this is dropped.
#[derive(Debug)]
pub struct SnapshotLock {
    _file: File,
}

impl SnapshotLock {
    fn open(snapshot: &Path) -> Result<File> {
        if let Some(parent) = snapshot.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(snapshot.with_extension("lock"))?)
    }

    pub fn acquire(snapshot: &Path) -> Result<Self> {
        if let Some(lock) = Self::try_acquire(snapshot)? {
            return Ok(lock);
        }
        tracing::info!(
            "Sandbox ledger {} is in use, waiting for it",
            snapshot.display()
        );
        let file = Self::open(snapshot)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }

    /// `None` while another holder has the snapshot.
    pub fn try_acquire(snapshot: &Path) -> Result<Option<Self>> {
        let file = Self::open(snapshot)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(_) => Ok(None),
        }
    }
}

fn checkpoint_hash(height: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"grinflip/sandbox/checkpoint");
    hasher.update(height.to_be_bytes());
    hex::encode(hasher.finalize())
}

impl SandboxLedger {
    pub fn new(token: impl Into<String>) -> Self {
        Self::from_state(LedgerState {
            token: token.into(),
            ..LedgerState::default()
        })
    }

    fn from_state(state: LedgerState) -> Self {
        Self {
            state: Mutex::new(state),
            faults: Mutex::new(Faults::default()),
            validity_window: DEFAULT_VALIDITY_WINDOW,
        }
    }

    pub fn with_validity_window(mut self, blocks: u64) -> Self {
        self.validity_window = blocks;
        self
    }

    /// Lock the snapshot at `path` and load it. Keep the lock until the
    /// changed ledger is saved back, or concurrent writers overwrite each other.
    pub fn open(path: &Path, token: &str) -> Result<(Self, SnapshotLock)> {
        let lock = SnapshotLock::acquire(path)?;
        let ledger = Self::load_or_new(path, token)?;
        Ok((ledger, lock))
    }

    /// Load a snapshot written by [`SandboxLedger::save`], or start empty.
    pub fn load_or_new(path: &Path, token: &str) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(token));
        }
        let content = std::fs::read_to_string(path)?;
        let state: LedgerState = serde_json::from_str(&content)?;
        if state.token != token {
            return Err(GrinflipError::config(format!(
                "Sandbox ledger at {} holds token {}, configured token is {}",
                path.display(),
                state.token,
                token
            )));
        }
        Ok(Self::from_state(state))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = {
            let state = self.state.lock();
            serde_json::to_string_pretty(&*state)?
        };
        let staged = path.with_extension("tmp");
        std::fs::write(&staged, content)?;
        std::fs::rename(&staged, path)?;
        Ok(())
    }

    /// Mint `amount` into `wallet`.
    pub fn fund(&self, wallet: &WalletAddress, amount: TokenAmount) -> Result<TokenAmount> {
        let mut state = self.state.lock();
        let balance = state.balances.entry(wallet.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount.units())
            .ok_or_else(|| GrinflipError::internal("Sandbox balance overflow"))?;
        tracing::debug!("Sandbox minted {} to {}", amount, wallet);
        Ok(TokenAmount::from_units(*balance))
    }

    pub fn balance_of(&self, wallet: &WalletAddress) -> TokenAmount {
        let state = self.state.lock();
        TokenAmount::from_units(state.balances.get(wallet).copied().unwrap_or(0))
    }

    pub fn transfers(&self) -> Vec<TransferLog> {
        self.state.lock().transfers.clone()
    }

    pub fn height(&self) -> u64 {
        self.state.lock().height
    }

    /// Move the chain forward without any transfer.
    pub fn advance(&self, blocks: u64) {
        self.state.lock().height += blocks;
    }

    /// Fail the next `count` submissions (from `from`, or from anyone) with `error`.
    pub fn fail_next(&self, from: Option<WalletAddress>, error: TransferError, count: u32) {
        self.faults.lock().failures.push(InjectedFailure {
            from,
            error,
            remaining: count,
        });
    }

    /// Treat the checkpoint of the next `count` submissions as expired.
    pub fn expire_next_checkpoints(&self, count: u32) {
        self.faults.lock().expire_next = count;
    }

    /// Apply the next `count` transfers but report a network error to the submitter.
    pub fn drop_next_acks(&self, count: u32) {
        self.faults.lock().drop_acks = count;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.faults.lock().latency = latency;
    }

    pub fn set_oracle_offline(&self, offline: bool) {
        self.faults.lock().oracle_offline = offline;
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    fn take_injected(&self, from: &WalletAddress) -> Option<TransferError> {
        let mut faults = self.faults.lock();
        if faults.expire_next > 0 {
            faults.expire_next -= 1;
            return Some(TransferError::CheckpointExpired(0));
        }
        let failure = faults.failures.iter_mut().find(|f| {
            f.remaining > 0 && f.from.as_ref().map_or(true, |wallet| wallet == from)
        })?;
        failure.remaining -= 1;
        Some(failure.error.clone())
    }

    fn take_dropped_ack(&self) -> bool {
        let mut faults = self.faults.lock();
        if faults.drop_acks > 0 {
            faults.drop_acks -= 1;
            return true;
        }
        false
    }

    fn apply(&self, transfer: &SignedTransfer) -> std::result::Result<TxId, TransferError> {
        let mut state = self.state.lock();
        let unsigned = &transfer.transfer;

        if unsigned.token != state.token {
            return Err(TransferError::SignatureRejected(format!(
                "Transfer is for token {}, ledger holds {}",
                unsigned.token, state.token
            )));
        }

        let checkpoint = &unsigned.checkpoint;
        if checkpoint.height > state.height
            || state.height - checkpoint.height > self.validity_window
            || checkpoint.hash != checkpoint_hash(checkpoint.height)
        {
            return Err(TransferError::CheckpointExpired(checkpoint.height));
        }

        let spec = &unsigned.spec;
        let available = state.balances.get(&spec.from).copied().unwrap_or(0);
        if available < spec.amount.units() {
            return Err(TransferError::InsufficientFunds {
                need: spec.amount.units(),
                available,
            });
        }

        let to_balance = state.balances.get(&spec.to).copied().unwrap_or(0);
        if spec.from != spec.to {
            let credited = to_balance.checked_add(spec.amount.units()).ok_or_else(|| {
                TransferError::SignatureRejected("Recipient balance overflow".to_string())
            })?;
            state
                .balances
                .insert(spec.from.clone(), available - spec.amount.units());
            state.balances.insert(spec.to.clone(), credited);
        }

        let txid = TxId::new(&transfer.signature[..32.min(transfer.signature.len())]);
        state.height += 1;
        let height = state.height;
        state.transfers.push(TransferLog {
            txid: txid.clone(),
            spec: spec.clone(),
            reference: unsigned.reference.clone(),
            height,
            timestamp: Utc::now(),
        });
        if let Some(reference) = &unsigned.reference {
            state.references.insert(reference.clone(), txid.clone());
        }

        Ok(txid)
    }
}

#[async_trait]
impl TransferPrimitive for SandboxLedger {
    async fn latest_checkpoint(&self) -> std::result::Result<Checkpoint, TransferError> {
        let height = self.state.lock().height;
        Ok(Checkpoint {
            height,
            hash: checkpoint_hash(height),
        })
    }

    async fn submit(&self, transfer: SignedTransfer) -> std::result::Result<TxId, TransferError> {
        let latency = self.faults.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        transfer.verify()?;

        if let Some(error) = self.take_injected(&transfer.transfer.spec.from) {
            tracing::debug!("Sandbox injected failure: {}", error);
            return Err(error);
        }

        let txid = self.apply(&transfer)?;
        tracing::debug!(
            "Sandbox applied {} -> {} ({}) as {}",
            transfer.transfer.spec.from.short(),
            transfer.transfer.spec.to.short(),
            transfer.transfer.spec.amount,
            txid
        );

        if self.take_dropped_ack() {
            return Err(TransferError::NetworkError(
                "Connection reset before acknowledgement".to_string(),
            ));
        }

        Ok(txid)
    }

    async fn confirm(&self, txid: &TxId) -> std::result::Result<(), TransferError> {
        let state = self.state.lock();
        if state.transfers.iter().any(|t| &t.txid == txid) {
            Ok(())
        } else {
            Err(TransferError::UnknownTransaction(txid.to_string()))
        }
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> std::result::Result<Option<TxId>, TransferError> {
        Ok(self.state.lock().references.get(reference).cloned())
    }
}

#[async_trait]
impl BalanceOracle for SandboxLedger {
    async fn get_balance(&self, wallet: &WalletAddress) -> Result<TokenAmount> {
        if self.faults.lock().oracle_offline {
            return Err(GrinflipError::oracle("Sandbox oracle offline"));
        }
        Ok(self.balance_of(wallet))
    }
}
