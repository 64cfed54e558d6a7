use crate::error::{GrinflipError, Result};
use bitcoin::secp256k1::XOnlyPublicKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Coin side a player bets on, and the side a flip lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Heads,
    Tails,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Heads => "heads",
            Side::Tails => "tails",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Heads => Side::Tails,
            Side::Tails => Side::Heads,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = GrinflipError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heads" | "h" => Ok(Side::Heads),
            "tails" | "t" => Ok(Side::Tails),
            other => Err(GrinflipError::internal(format!(
                "Unknown side '{}', expected heads or tails",
                other
            ))),
        }
    }
}

/// Token amount in the smallest unit of the configured mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenAmount(u64);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(0);

    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    pub const fn units(&self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: TokenAmount) -> Option<TokenAmount> {
        self.0.checked_add(other.0).map(TokenAmount)
    }

    pub fn checked_sub(self, other: TokenAmount) -> Option<TokenAmount> {
        self.0.checked_sub(other.0).map(TokenAmount)
    }

    pub fn checked_mul(self, factor: u64) -> Option<TokenAmount> {
        self.0.checked_mul(factor).map(TokenAmount)
    }

    /// Parse a decimal token amount, e.g. "1.5" with 9 decimals -> 1_500_000_000.
    pub fn parse(s: &str, decimals: u8) -> Result<Self> {
        let s = s.trim();
        let invalid = || GrinflipError::internal(format!("Invalid token amount '{}'", s));
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if (whole.is_empty() && frac.is_empty()) || frac.len() > decimals as usize {
            return Err(invalid());
        }
        let digits = |part: &str| part.is_empty() || part.bytes().all(|b| b.is_ascii_digit());
        if !digits(whole) || !digits(frac) {
            return Err(invalid());
        }

        let scale = 10u64.checked_pow(decimals as u32).ok_or_else(invalid)?;
        let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
        let frac: u64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = decimals as usize);
            padded.parse().map_err(|_| invalid())?
        };

        whole
            .checked_mul(scale)
            .and_then(|units| units.checked_add(frac))
            .map(TokenAmount)
            .ok_or_else(invalid)
    }

    /// Render with a decimal point, e.g. 1_500_000_000 with 9 decimals -> "1.5".
    pub fn display(&self, decimals: u8) -> String {
        if decimals == 0 {
            return self.0.to_string();
        }
        let scale = 10u64.pow(decimals as u32);
        let whole = self.0 / scale;
        let frac = self.0 % scale;
        if frac == 0 {
            return whole.to_string();
        }
        let frac = format!("{:0width$}", frac, width = decimals as usize);
        format!("{}.{}", whole, frac.trim_end_matches('0'))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public identity of a token holder: hex x-only secp256k1 key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn from_public_key(key: &XOnlyPublicKey) -> Self {
        Self(key.to_string())
    }

    pub fn parse(s: &str) -> Result<Self> {
        let key = XOnlyPublicKey::from_str(s.trim())
            .map_err(|e| GrinflipError::InvalidAddress(format!("{}: {}", s, e)))?;
        Ok(Self::from_public_key(&key))
    }

    pub fn public_key(&self) -> Result<XOnlyPublicKey> {
        XOnlyPublicKey::from_str(&self.0)
            .map_err(|e| GrinflipError::InvalidAddress(format!("{}: {}", self.0, e)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> String {
        if self.0.len() <= 8 {
            return self.0.clone();
        }
        format!("{}...{}", &self.0[..4], &self.0[self.0.len() - 4..])
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a confirmed or submitted transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlipStatus {
    Settled,
    PendingReconciliation,
}

impl FlipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlipStatus::Settled => "settled",
            FlipStatus::PendingReconciliation => "pending_reconciliation",
        }
    }
}

impl FromStr for FlipStatus {
    type Err = GrinflipError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "settled" => Ok(FlipStatus::Settled),
            "pending_reconciliation" => Ok(FlipStatus::PendingReconciliation),
            other => Err(GrinflipError::internal(format!("Unknown flip status: {}", other))),
        }
    }
}

/// Immutable audit entry for one settled (or reconciliation-pending) flip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlipRecord {
    pub id: i64,
    pub wager_id: Uuid,
    pub wallet: WalletAddress,
    pub side: Side,
    pub result: Side,
    pub amount: TokenAmount,
    pub won: bool,
    pub status: FlipStatus,
    pub created_at: DateTime<Utc>,
}

/// A flip waiting to be appended; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFlip {
    pub wager_id: Uuid,
    pub wallet: WalletAddress,
    pub side: Side,
    pub result: Side,
    pub amount: TokenAmount,
    pub status: FlipStatus,
    pub created_at: DateTime<Utc>,
}

impl NewFlip {
    /// A flip only counts as won once its payout settled.
    pub fn won(&self) -> bool {
        self.status == FlipStatus::Settled && self.side == self.result
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub wallet: WalletAddress,
    pub total_wins: u64,
    pub current_streak: u64,
    pub longest_streak: u64,
    pub total_flips: u64,
}

impl LeaderboardEntry {
    pub fn new(wallet: WalletAddress) -> Self {
        Self {
            wallet,
            total_wins: 0,
            current_streak: 0,
            longest_streak: 0,
            total_flips: 0,
        }
    }

    /// Fold one flip result into the aggregate.
    pub fn apply(&mut self, won: bool) {
        self.total_flips += 1;
        if won {
            self.total_wins += 1;
            self.current_streak += 1;
        } else {
            self.current_streak = 0;
        }
        self.longest_streak = self.longest_streak.max(self.current_streak);
    }
}
