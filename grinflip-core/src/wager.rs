use crate::error::{GrinflipError, Result};
use crate::types::{Side, TokenAmount, TxId, WalletAddress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of a single wager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WagerState {
    Created,
    SeedCommitted,
    OutcomeResolved,
    DebitPending,
    DebitConfirmed,
    CreditPending,
    CreditConfirmed,
    Recorded,
    DebitFailed,
    CreditFailed,
}

impl WagerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WagerState::Created => "created",
            WagerState::SeedCommitted => "seed_committed",
            WagerState::OutcomeResolved => "outcome_resolved",
            WagerState::DebitPending => "debit_pending",
            WagerState::DebitConfirmed => "debit_confirmed",
            WagerState::CreditPending => "credit_pending",
            WagerState::CreditConfirmed => "credit_confirmed",
            WagerState::Recorded => "recorded",
            WagerState::DebitFailed => "debit_failed",
            WagerState::CreditFailed => "credit_failed",
        }
    }

    /// Allowed edges of the settlement state machine.
    ///
    /// `CreditFailed -> CreditPending` is the reconciliation edge; every
    /// pre-debit state may fall into `DebitFailed` (cancellation, timeout).
    pub fn can_transition_to(&self, next: WagerState) -> bool {
        use WagerState::*;
        matches!(
            (self, next),
            (Created, SeedCommitted)
                | (SeedCommitted, OutcomeResolved)
                | (OutcomeResolved, DebitPending)
                | (DebitPending, DebitConfirmed)
                | (DebitConfirmed, CreditPending)
                | (DebitConfirmed, Recorded)
                | (CreditPending, CreditConfirmed)
                | (CreditPending, CreditFailed)
                | (CreditConfirmed, Recorded)
                | (CreditFailed, CreditPending)
                | (Created, DebitFailed)
                | (SeedCommitted, DebitFailed)
                | (OutcomeResolved, DebitFailed)
                | (DebitPending, DebitFailed)
        )
    }

    /// Stake already taken but the wager is not yet on the ledger.
    pub const UNFINISHED: [WagerState; 4] = [
        WagerState::DebitConfirmed,
        WagerState::CreditPending,
        WagerState::CreditConfirmed,
        WagerState::CreditFailed,
    ];
}

impl fmt::Display for WagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WagerState {
    type Err = GrinflipError;

    fn from_str(s: &str) -> Result<Self> {
        use WagerState::*;
        Ok(match s {
            "created" => Created,
            "seed_committed" => SeedCommitted,
            "outcome_resolved" => OutcomeResolved,
            "debit_pending" => DebitPending,
            "debit_confirmed" => DebitConfirmed,
            "credit_pending" => CreditPending,
            "credit_confirmed" => CreditConfirmed,
            "recorded" => Recorded,
            "debit_failed" => DebitFailed,
            "credit_failed" => CreditFailed,
            other => {
                return Err(GrinflipError::internal(format!(
                    "Unknown wager state: {}",
                    other
                )))
            }
        })
    }
}

/// One bet attempt as it moves through settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wager {
    pub id: Uuid,
    pub wallet: WalletAddress,
    pub amount: TokenAmount,
    pub side: Side,
    pub state: WagerState,
    pub commitment: Option<String>,
    pub server_seed: Option<Vec<u8>>,
    pub client_seed: Option<Vec<u8>>,
    pub result: Option<Side>,
    pub debit_txid: Option<TxId>,
    pub credit_txid: Option<TxId>,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wager {
    pub fn new(wallet: WalletAddress, amount: TokenAmount, side: Side) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            wallet,
            amount,
            side,
            state: WagerState::Created,
            commitment: None,
            server_seed: None,
            client_seed: None,
            result: None,
            debit_txid: None,
            credit_txid: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing edges the state machine does not have.
    pub fn advance(&mut self, next: WagerState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(GrinflipError::internal(format!(
                "Wager {}: illegal transition {} -> {}",
                self.id, self.state, next
            )));
        }
        tracing::debug!("Wager {} {} -> {}", self.id, self.state, next);
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn fail(&mut self, next: WagerState, reason: impl Into<String>) -> Result<()> {
        self.advance(next)?;
        self.failure = Some(reason.into());
        Ok(())
    }

    pub fn is_win(&self) -> Option<bool> {
        self.result.map(|result| result == self.side)
    }

    /// Amount the house pays back on a win.
    pub fn payout(&self) -> Option<TokenAmount> {
        self.amount.checked_mul(2)
    }

    /// Idempotency key used for the house credit leg.
    pub fn credit_key(&self) -> String {
        format!("credit:{}", self.id)
    }

    pub fn debit_key(&self) -> String {
        format!("debit:{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wager() -> Wager {
        Wager::new(
            WalletAddress::parse(
                "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
            )
            .unwrap(),
            TokenAmount::from_units(100),
            Side::Heads,
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut w = wager();
        for next in [
            WagerState::SeedCommitted,
            WagerState::OutcomeResolved,
            WagerState::DebitPending,
            WagerState::DebitConfirmed,
            WagerState::CreditPending,
            WagerState::CreditConfirmed,
            WagerState::Recorded,
        ] {
            w.advance(next).unwrap();
        }
        assert!(!WagerState::UNFINISHED.contains(&w.state));
    }

    #[test]
    fn test_loss_skips_credit() {
        let mut w = wager();
        w.advance(WagerState::SeedCommitted).unwrap();
        w.advance(WagerState::OutcomeResolved).unwrap();
        w.advance(WagerState::DebitPending).unwrap();
        w.advance(WagerState::DebitConfirmed).unwrap();
        w.advance(WagerState::Recorded).unwrap();
    }

    #[test]
    fn test_no_cancel_after_debit() {
        let mut w = wager();
        w.advance(WagerState::SeedCommitted).unwrap();
        w.advance(WagerState::OutcomeResolved).unwrap();
        w.advance(WagerState::DebitPending).unwrap();
        assert!(!WagerState::UNFINISHED.contains(&w.state));
        w.advance(WagerState::DebitConfirmed).unwrap();
        assert!(WagerState::UNFINISHED.contains(&w.state));
        assert!(w.advance(WagerState::DebitFailed).is_err());
    }

    #[test]
    fn test_credit_failure_reconciles() {
        let mut w = wager();
        w.state = WagerState::CreditPending;
        w.fail(WagerState::CreditFailed, "house busy").unwrap();
        assert_eq!(w.failure.as_deref(), Some("house busy"));
        w.advance(WagerState::CreditPending).unwrap();
        assert!(w.advance(WagerState::Recorded).is_err());
    }

    #[test]
    fn test_state_round_trip_names() {
        for state in [
            WagerState::Created,
            WagerState::CreditFailed,
            WagerState::DebitPending,
        ] {
            assert_eq!(state.as_str().parse::<WagerState>().unwrap(), state);
        }
    }
}
