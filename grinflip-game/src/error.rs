use grinflip_core::{TransferError, TxId, WalletAddress};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GameError>;

/// Why a wager did not reach a normal outcome.
#[derive(Error, Debug)]
pub enum GameError {
    #[error("GrinFlip core error: {0}")]
    Core(#[from] grinflip_core::GrinflipError),

    /// Rejected before any funds moved.
    #[error("Wager rejected: {0}")]
    Validation(String),

    /// The player's debit did not confirm; nothing moved.
    #[error("Debit failed: {0}")]
    Debit(String),

    #[error("Credit failed: {0}")]
    Credit(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Randomness unavailable: {0}")]
    Randomness(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Signer error: {0}")]
    Signer(#[from] SignerError),
}

impl GameError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }
}

/// Failure of the custodial house signer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("House signer busy, try again")]
    Busy,

    #[error("Transfer from {0} is not the house account")]
    NotHouseAccount(WalletAddress),

    #[error("Checkpoint kept expiring after {0} attempts")]
    RetriesExhausted(u32),

    #[error("Transfer rejected: {0}")]
    Transfer(#[from] TransferError),

    #[error("Confirmation of {0} timed out")]
    Timeout(TxId),

    #[error("House transfer {0} did not finish in time")]
    Stalled(String),
}

impl SignerError {
    /// Whether the same request may succeed if submitted again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SignerError::Busy
            | SignerError::RetriesExhausted(_)
            | SignerError::Timeout(_)
            | SignerError::Stalled(_) => true,
            SignerError::Transfer(e) => e.is_transient(),
            SignerError::NotHouseAccount(_) => false,
        }
    }
}
