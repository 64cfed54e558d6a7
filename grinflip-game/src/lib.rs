//! Provably fair coin flip against a custodial house
//!
//! A wager is committed to before the player contributes a client seed, the
//! player's stake is debited, and a win is paid back twice over by the house
//! signer. Every settled flip lands in an append-only ledger.

pub mod error;
pub mod fairness;
pub mod recorder;
pub mod settlement;
pub mod signer;

pub use error::{GameError, Result, SignerError};
pub use fairness::{Commitment, FairnessProof, ServerSeed};
pub use recorder::{FlipStats, LedgerRecorder};
pub use settlement::{
    proof_for, CancelHandle, CancelSignal, ReconcileReport, SettlementCoordinator, Verdict,
    WagerReceipt, WagerRequest,
};
pub use signer::CustodialSigner;
