//! Contracts for the token network the house settles against.
//!
//! The game never talks to a concrete chain; it needs a balance read and a
//! signed-transfer primitive. `sandbox` is an in-process implementation of
//! both, `rpc` reads balances from a JSON-RPC asset indexer.

pub mod rpc;
pub mod sandbox;

pub use rpc::RpcBalanceOracle;
pub use sandbox::{SandboxLedger, SnapshotLock};

use crate::error::Result;
use crate::types::{TokenAmount, TxId, WalletAddress};
use crate::wallet::{sign_digest, verify_digest};
use async_trait::async_trait;
use bitcoin::key::Keypair;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Typed failure of the transfer primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Insufficient funds: need {need}, have {available}")]
    InsufficientFunds { need: u64, available: u64 },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Signature rejected: {0}")]
    SignatureRejected(String),

    #[error("Checkpoint {0} expired")]
    CheckpointExpired(u64),

    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),
}

impl TransferError {
    /// Failures where resubmitting the same transfer can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransferError::NetworkError(_) | TransferError::CheckpointExpired(_)
        )
    }
}

/// Recent network position a transfer is built against. A transfer is only
/// accepted while its checkpoint is still inside the network's validity window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub height: u64,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSpec {
    pub from: WalletAddress,
    pub to: WalletAddress,
    pub amount: TokenAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransfer {
    pub spec: TransferSpec,
    pub token: String,
    pub checkpoint: Checkpoint,
    /// Caller-chosen tag the network indexes, used for idempotent retries.
    pub reference: Option<String>,
}

impl UnsignedTransfer {
    pub fn new(spec: TransferSpec, token: impl Into<String>, checkpoint: Checkpoint) -> Self {
        Self {
            spec,
            token: token.into(),
            checkpoint,
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Digest the signer commits to. Every field is length-prefixed.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(b"grinflip/transfer/v1");
        for field in [
            self.spec.from.as_str().as_bytes(),
            self.spec.to.as_str().as_bytes(),
            self.token.as_bytes(),
            self.checkpoint.hash.as_bytes(),
            self.reference.as_deref().unwrap_or("").as_bytes(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field);
        }
        hasher.update(self.spec.amount.units().to_be_bytes());
        hasher.update(self.checkpoint.height.to_be_bytes());
        hasher.finalize().into()
    }

    pub fn sign(self, keypair: &Keypair) -> SignedTransfer {
        let signature = sign_digest(keypair, self.digest());
        SignedTransfer {
            transfer: self,
            signature: hex::encode(signature),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransfer {
    pub transfer: UnsignedTransfer,
    pub signature: String,
}

impl SignedTransfer {
    /// Check the signature against the sending account's key.
    pub fn verify(&self) -> std::result::Result<(), TransferError> {
        let signature = hex::decode(&self.signature)
            .map_err(|e| TransferError::SignatureRejected(format!("Malformed signature: {}", e)))?;
        verify_digest(&self.transfer.spec.from, self.transfer.digest(), &signature)
            .map_err(|e| TransferError::SignatureRejected(e.to_string()))
    }

    pub fn spec(&self) -> &TransferSpec {
        &self.transfer.spec
    }
}

/// Read-only balance source. Answers are hints; the transfer primitive is the
/// authority on whether funds suffice.
#[async_trait]
pub trait BalanceOracle: Send + Sync {
    async fn get_balance(&self, wallet: &WalletAddress) -> Result<TokenAmount>;
}

#[async_trait]
pub trait TransferPrimitive: Send + Sync {
    async fn latest_checkpoint(&self) -> std::result::Result<Checkpoint, TransferError>;

    async fn submit(&self, transfer: SignedTransfer) -> std::result::Result<TxId, TransferError>;

    /// Suspend until `txid` is final.
    async fn confirm(&self, txid: &TxId) -> std::result::Result<(), TransferError>;

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> std::result::Result<Option<TxId>, TransferError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::{generate_mnemonic, mnemonic_to_keypair};

    fn transfer(keypair: &Keypair) -> UnsignedTransfer {
        let from = WalletAddress::from_public_key(&keypair.x_only_public_key().0);
        let to = WalletAddress::parse(
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
        )
        .unwrap();
        UnsignedTransfer::new(
            TransferSpec {
                from,
                to,
                amount: TokenAmount::from_units(500),
            },
            "mint",
            Checkpoint {
                height: 7,
                hash: "abc".to_string(),
            },
        )
    }

    #[test]
    fn test_signed_transfer_verifies() {
        let keypair = mnemonic_to_keypair(&generate_mnemonic().unwrap()).unwrap();
        let signed = transfer(&keypair).with_reference("credit:1").sign(&keypair);
        assert!(signed.verify().is_ok());
    }

    #[test]
    fn test_tampered_transfer_rejected() {
        let keypair = mnemonic_to_keypair(&generate_mnemonic().unwrap()).unwrap();
        let mut signed = transfer(&keypair).sign(&keypair);
        signed.transfer.spec.amount = TokenAmount::from_units(5_000);
        assert!(matches!(
            signed.verify(),
            Err(TransferError::SignatureRejected(_))
        ));
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let owner = mnemonic_to_keypair(&generate_mnemonic().unwrap()).unwrap();
        let thief = mnemonic_to_keypair(&generate_mnemonic().unwrap()).unwrap();
        let signed = transfer(&owner).sign(&thief);
        assert!(signed.verify().is_err());
    }

    #[test]
    fn test_reference_changes_digest() {
        let keypair = mnemonic_to_keypair(&generate_mnemonic().unwrap()).unwrap();
        let plain = transfer(&keypair);
        let tagged = plain.clone().with_reference("credit:1");
        assert_ne!(plain.digest(), tagged.digest());
    }
}
