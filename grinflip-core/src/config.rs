use crate::error::{GrinflipError, Result};
use crate::types::{TokenAmount, WalletAddress};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Process-wide settings, fixed at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlipConfig {
    pub min_bet: TokenAmount,
    pub max_bet: TokenAmount,
    pub token_mint: String,
    pub token_decimals: u8,
    pub house_address: String,
    pub rpc_url: String,
    pub debit_timeout_secs: u64,
    pub credit_attempts: u32,
    pub credit_backoff_ms: u64,
    pub signer: SignerConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    pub queue_timeout_ms: u64,
    pub max_checkpoint_retries: u32,
    pub confirm_timeout_secs: u64,
    /// Upper bound on one house transfer once it holds the queue.
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub page_size: usize,
    pub max_record_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            queue_timeout_ms: 30_000,
            max_checkpoint_retries: 3,
            confirm_timeout_secs: 60,
            operation_timeout_ms: 120_000,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            max_record_attempts: 5,
            retry_backoff_ms: 200,
        }
    }
}

impl Default for FlipConfig {
    fn default() -> Self {
        Self {
            min_bet: TokenAmount::from_units(1_000_000),
            max_bet: TokenAmount::from_units(1_000_000_000_000),
            token_mint: "7JofsgKgD3MerQDa7hEe4dfkY3c3nMnsThZzUuYyTFpE".to_string(),
            token_decimals: 9,
            house_address: String::new(),
            rpc_url: "http://localhost:8899".to_string(),
            debit_timeout_secs: 60,
            credit_attempts: 3,
            credit_backoff_ms: 500,
            signer: SignerConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl SignerConfig {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl LedgerConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl FlipConfig {
    /// Default settings bound to a house account.
    pub fn new(house_address: &WalletAddress) -> Self {
        Self {
            house_address: house_address.to_string(),
            ..Self::default()
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GrinflipError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: FlipConfig = serde_json::from_str(&content)
            .map_err(|e| GrinflipError::config(format!("Malformed {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Read settings from `GRINFLIP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    GrinflipError::config(format!("Missing required environment variable: {}", key))
                })
        };
        let number = |key: &str, raw: String| {
            raw.trim()
                .parse::<u64>()
                .map_err(|e| GrinflipError::config(format!("{} is not a number: {}", key, e)))
        };

        let defaults = Self::default();
        let mut config = Self {
            min_bet: TokenAmount::from_units(number(
                "GRINFLIP_MIN_BET",
                required("GRINFLIP_MIN_BET")?,
            )?),
            max_bet: TokenAmount::from_units(number(
                "GRINFLIP_MAX_BET",
                required("GRINFLIP_MAX_BET")?,
            )?),
            token_mint: required("GRINFLIP_TOKEN_MINT")?,
            house_address: required("GRINFLIP_HOUSE_ADDRESS")?,
            rpc_url: required("GRINFLIP_RPC_URL")?,
            ..defaults
        };

        if let Some(raw) = lookup("GRINFLIP_TOKEN_DECIMALS") {
            config.token_decimals = raw
                .trim()
                .parse()
                .map_err(|e| GrinflipError::config(format!("GRINFLIP_TOKEN_DECIMALS: {}", e)))?;
        }
        if let Some(raw) = lookup("GRINFLIP_DEBIT_TIMEOUT_SECS") {
            config.debit_timeout_secs = number("GRINFLIP_DEBIT_TIMEOUT_SECS", raw)?;
        }
        if let Some(raw) = lookup("GRINFLIP_SIGNER_QUEUE_TIMEOUT_MS") {
            config.signer.queue_timeout_ms = number("GRINFLIP_SIGNER_QUEUE_TIMEOUT_MS", raw)?;
        }
        if let Some(raw) = lookup("GRINFLIP_SIGNER_OPERATION_TIMEOUT_MS") {
            config.signer.operation_timeout_ms =
                number("GRINFLIP_SIGNER_OPERATION_TIMEOUT_MS", raw)?;
        }
        if let Some(raw) = lookup("GRINFLIP_PAGE_SIZE") {
            config.ledger.page_size = number("GRINFLIP_PAGE_SIZE", raw)? as usize;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_bet == TokenAmount::ZERO {
            return Err(GrinflipError::config("Minimum bet must be greater than 0"));
        }

        if self.min_bet > self.max_bet {
            return Err(GrinflipError::config(format!(
                "Minimum bet {} exceeds maximum bet {}",
                self.min_bet, self.max_bet
            )));
        }

        if self.max_bet.checked_mul(2).is_none() {
            return Err(GrinflipError::config("Maximum bet payout overflows"));
        }

        if self.token_mint.trim().is_empty() {
            return Err(GrinflipError::config("Token mint cannot be empty"));
        }

        if self.token_decimals > 18 {
            return Err(GrinflipError::config("Token decimals must be at most 18"));
        }

        WalletAddress::parse(&self.house_address)
            .map_err(|e| GrinflipError::config(format!("Invalid house address: {}", e)))?;

        if !(self.rpc_url.starts_with("http://") || self.rpc_url.starts_with("https://")) {
            return Err(GrinflipError::config(format!(
                "RPC URL must be http(s): '{}'",
                self.rpc_url
            )));
        }

        if self.debit_timeout_secs == 0 {
            return Err(GrinflipError::config("Debit timeout must be greater than 0"));
        }

        if self.credit_attempts == 0 {
            return Err(GrinflipError::config("Credit attempts must be at least 1"));
        }

        if self.signer.operation_timeout_ms == 0 {
            return Err(GrinflipError::config("Signer operation timeout must be greater than 0"));
        }

        if self.ledger.page_size == 0 {
            return Err(GrinflipError::config("Page size must be greater than 0"));
        }

        Ok(())
    }

    pub fn house(&self) -> Result<WalletAddress> {
        WalletAddress::parse(&self.house_address)
    }

    pub fn debit_timeout(&self) -> Duration {
        Duration::from_secs(self.debit_timeout_secs)
    }

    pub fn credit_backoff(&self) -> Duration {
        Duration::from_millis(self.credit_backoff_ms)
    }

    /// Whether `amount` is inside `[min_bet, max_bet]`.
    pub fn accepts(&self, amount: TokenAmount) -> bool {
        amount >= self.min_bet && amount <= self.max_bet
    }
}
