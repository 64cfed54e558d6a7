use crate::chain::{SignedTransfer, UnsignedTransfer};
use crate::error::{GrinflipError, Result};
use crate::types::WalletAddress;
use crate::wallet::{keypair_address, sign_message, WalletCapability};
use async_trait::async_trait;
use bitcoin::key::Keypair;

/// How a local wallet answers transfer-signing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    /// Sign without asking.
    Auto,
    /// Ask on the terminal before every transfer.
    Prompt,
}

/// A player wallet whose key lives on this machine.
pub struct LocalWallet {
    id: String,
    name: String,
    keypair: Keypair,
    approval: Approval,
    decimals: u8,
}

impl LocalWallet {
    pub fn new(id: String, name: String, keypair: Keypair) -> Self {
        Self {
            id,
            name,
            keypair,
            approval: Approval::Auto,
            decimals: 9,
        }
    }

    pub fn with_approval(mut self, approval: Approval, decimals: u8) -> Self {
        self.approval = approval;
        self.decimals = decimals;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn confirm(&self, transfer: &UnsignedTransfer) -> Result<bool> {
        let prompt = format!(
            "Wallet '{}': send {} to {}?",
            self.name,
            transfer.spec.amount.display(self.decimals),
            transfer.spec.to.short()
        );

        // dialoguer blocks on stdin
        tokio::task::spawn_blocking(move || {
            dialoguer::Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
                .map_err(GrinflipError::from)
        })
        .await
        .map_err(|e| GrinflipError::internal(format!("Approval prompt failed: {}", e)))?
    }
}

#[async_trait]
impl WalletCapability for LocalWallet {
    fn address(&self) -> WalletAddress {
        keypair_address(&self.keypair)
    }

    async fn sign_transfer(&self, transfer: UnsignedTransfer) -> Result<SignedTransfer> {
        if transfer.spec.from != self.address() {
            return Err(GrinflipError::wallet(format!(
                "Wallet '{}' cannot sign for {}",
                self.name, transfer.spec.from
            )));
        }

        if self.approval == Approval::Prompt && !self.confirm(&transfer).await? {
            return Err(GrinflipError::SigningDeclined(format!(
                "Wallet '{}' declined the transfer",
                self.name
            )));
        }

        tracing::debug!(
            "Wallet '{}' signed transfer of {} at checkpoint {}",
            self.name,
            transfer.spec.amount,
            transfer.checkpoint.height
        );
        Ok(transfer.sign(&self.keypair))
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(sign_message(&self.keypair, message))
    }
}

impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("address", &self.address())
            .field("approval", &self.approval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Checkpoint, TransferSpec};
    use crate::types::TokenAmount;
    use crate::wallet::{generate_mnemonic, mnemonic_to_keypair, verify_message};

    fn wallet() -> LocalWallet {
        let keypair = mnemonic_to_keypair(&generate_mnemonic().unwrap()).unwrap();
        LocalWallet::new("id".to_string(), "alice".to_string(), keypair)
    }

    #[tokio::test]
    async fn test_signs_own_transfers_only() {
        let alice = wallet();
        let bob = wallet();

        let checkpoint = Checkpoint {
            height: 1,
            hash: "h".to_string(),
        };
        let own = UnsignedTransfer::new(
            TransferSpec {
                from: alice.address(),
                to: bob.address(),
                amount: TokenAmount::from_units(10),
            },
            "mint",
            checkpoint.clone(),
        );
        let signed = alice.sign_transfer(own).await.unwrap();
        signed.verify().unwrap();

        let foreign = UnsignedTransfer::new(
            TransferSpec {
                from: bob.address(),
                to: alice.address(),
                amount: TokenAmount::from_units(10),
            },
            "mint",
            checkpoint,
        );
        assert!(alice.sign_transfer(foreign).await.is_err());
    }

    #[tokio::test]
    async fn test_message_signing() {
        let alice = wallet();
        let sig = alice.sign_message(b"seed").await.unwrap();
        verify_message(&alice.address(), b"seed", &sig).unwrap();
    }
}
