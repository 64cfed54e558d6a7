use crate::chain::TransferError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GrinflipError>;

#[derive(Error, Debug)]
pub enum GrinflipError {
    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Key error: {0}")]
    Key(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Storage conflict: {0}")]
    Conflict(String),

    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error("Balance oracle error: {0}")]
    Oracle(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Wallet not found: {name}")]
    WalletNotFound { name: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Signing declined: {0}")]
    SigningDeclined(String),

    #[error("Keystore error: {0}")]
    Keystore(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dialog error: {0}")]
    Dialog(String),
}

impl GrinflipError {
    pub fn wallet(msg: impl Into<String>) -> Self {
        Self::Wallet(msg.into())
    }

    pub fn key(msg: impl Into<String>) -> Self {
        Self::Key(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn oracle(msg: impl Into<String>) -> Self {
        Self::Oracle(msg.into())
    }

    pub fn keystore(msg: impl Into<String>) -> Self {
        Self::Keystore(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn dialog(msg: impl Into<String>) -> Self {
        Self::Dialog(msg.into())
    }

    /// Whether the failure came from a signature the player refused to give.
    pub fn is_declined(&self) -> bool {
        matches!(self, Self::SigningDeclined(_))
    }
}

// conversion from dialoguer::Error
impl From<dialoguer::Error> for GrinflipError {
    fn from(err: dialoguer::Error) -> Self {
        GrinflipError::Dialog(err.to_string())
    }
}

impl From<reqwest::Error> for GrinflipError {
    fn from(err: reqwest::Error) -> Self {
        GrinflipError::Oracle(err.to_string())
    }
}
