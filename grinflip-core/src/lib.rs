//! GrinFlip core - shared types, storage and chain contracts for the coin-flip house
//!
//! Everything the game engine needs from the outside world lives here: keys,
//! configuration, the sqlite journal and ledger, and the balance/transfer
//! contracts with their sandbox and JSON-RPC implementations.

pub mod chain;
pub mod config;
pub mod error;
pub mod keystore;
pub mod storage;
pub mod types;
pub mod wager;
pub mod wallet;

pub use chain::{
    BalanceOracle, Checkpoint, RpcBalanceOracle, SandboxLedger, SignedTransfer, SnapshotLock,
    TransferError, TransferPrimitive, TransferSpec, UnsignedTransfer,
};
pub use config::FlipConfig;
pub use error::{GrinflipError, Result};
pub use keystore::EncryptedKeystore;
pub use storage::{FlipStore, LedgerStore, RecordOutcome, Storage, WagerStore};
pub use types::{
    FlipRecord, FlipStatus, LeaderboardEntry, NewFlip, Side, TokenAmount, TxId, WalletAddress,
};
pub use wager::{Wager, WagerState};
pub use wallet::{Approval, LocalWallet, WalletCapability, WalletManager};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_wallet_creation_on_disk() {
        let temp_dir = tempdir().unwrap();
        let storage = Storage::new(&temp_dir.path().join("grinflip.db")).await.unwrap();
        let manager = WalletManager::new(Arc::new(storage));

        let (wallet, _mnemonic) = manager.create_wallet("alice").await.unwrap();
        assert_eq!(wallet.name(), "alice");

        let reloaded = manager.load_wallet("alice").await.unwrap();
        assert_eq!(reloaded.address(), wallet.address());
    }
}
