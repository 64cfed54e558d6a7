use crate::error::{GrinflipError, Result};
use crate::storage::wallet_store::WalletData;
use crate::storage::{Storage, WalletStore};
use crate::wallet::{generate_mnemonic, keypair_address, mnemonic_to_keypair, Approval, LocalWallet};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Player wallets kept on this machine.
pub struct WalletManager {
    storage: Arc<Storage>,
    wallets: Arc<RwLock<HashMap<String, Arc<LocalWallet>>>>,
    approval: Approval,
    decimals: u8,
}

impl WalletManager {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            wallets: Arc::new(RwLock::new(HashMap::new())),
            approval: Approval::Auto,
            decimals: 9,
        }
    }

    /// Approval mode handed to every wallet this manager opens.
    pub fn with_approval(mut self, approval: Approval, decimals: u8) -> Self {
        self.approval = approval;
        self.decimals = decimals;
        self
    }

    fn open(&self, id: String, name: String, keypair: bitcoin::key::Keypair) -> Arc<LocalWallet> {
        Arc::new(LocalWallet::new(id, name, keypair).with_approval(self.approval, self.decimals))
    }

    pub async fn create_wallet(&self, name: &str) -> Result<(Arc<LocalWallet>, String)> {
        let mnemonic = generate_mnemonic()?;
        let wallet = self.import_wallet(name, &mnemonic).await?;
        Ok((wallet, mnemonic))
    }

    pub async fn import_wallet(&self, name: &str, mnemonic: &str) -> Result<Arc<LocalWallet>> {
        let wallet_store = WalletStore::new(&self.storage);
        if wallet_store.wallet_exists(name).await? {
            return Err(GrinflipError::wallet(format!(
                "Wallet '{}' already exists",
                name
            )));
        }

        let keypair = mnemonic_to_keypair(mnemonic)?;

        let wallet_id = Uuid::new_v4().to_string();
        let wallet_data = WalletData {
            id: wallet_id.clone(),
            name: name.to_string(),
            address: keypair_address(&keypair),
            created_at: Utc::now(),
            encrypted_seed: self.encrypt_seed(mnemonic)?,
        };
        wallet_store.save_wallet(&wallet_data).await?;

        let wallet = self.open(wallet_id.clone(), name.to_string(), keypair);
        {
            let mut wallets = self.wallets.write();
            wallets.insert(wallet_id, wallet.clone());
        }

        tracing::info!("Created wallet '{}' at {}", name, wallet_data.address);
        Ok(wallet)
    }

    pub async fn load_wallet(&self, name: &str) -> Result<Arc<LocalWallet>> {
        {
            let wallets = self.wallets.read();
            if let Some(wallet) = wallets.values().find(|w| w.name() == name) {
                return Ok(wallet.clone());
            }
        }

        let wallet_store = WalletStore::new(&self.storage);
        let wallet_data = wallet_store
            .find_by_name(name)
            .await?
            .ok_or_else(|| GrinflipError::WalletNotFound {
                name: name.to_string(),
            })?;

        let mnemonic = self.decrypt_seed(&wallet_data.encrypted_seed)?;
        let keypair = mnemonic_to_keypair(&mnemonic)?;
        if keypair_address(&keypair) != wallet_data.address {
            return Err(GrinflipError::key(format!(
                "Stored seed for '{}' does not match its address",
                name
            )));
        }

        let wallet = self.open(wallet_data.id.clone(), wallet_data.name.clone(), keypair);
        {
            let mut wallets = self.wallets.write();
            wallets.insert(wallet_data.id, wallet.clone());
        }

        Ok(wallet)
    }

    pub async fn list_wallets(&self) -> Result<Vec<WalletData>> {
        WalletStore::new(&self.storage).list_wallets().await
    }

    pub async fn delete_wallet(&self, name: &str) -> Result<()> {
        let wallet_store = WalletStore::new(&self.storage);
        let wallet_data = wallet_store
            .find_by_name(name)
            .await?
            .ok_or_else(|| GrinflipError::WalletNotFound {
                name: name.to_string(),
            })?;

        {
            let mut wallets = self.wallets.write();
            wallets.remove(&wallet_data.id);
        }
        wallet_store.delete_wallet(&wallet_data.id).await?;

        tracing::info!("Deleted wallet '{}'", name);
        Ok(())
    }

    // TODO: encrypt player seeds with the keystore cipher once the CLI asks for a player password
    fn encrypt_seed(&self, mnemonic: &str) -> Result<Vec<u8>> {
        Ok(mnemonic.as_bytes().to_vec())
    }

    fn decrypt_seed(&self, encrypted_seed: &[u8]) -> Result<String> {
        String::from_utf8(encrypted_seed.to_vec())
            .map_err(|e| GrinflipError::internal(format!("Failed to decrypt seed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::WalletCapability;

    #[tokio::test]
    async fn test_create_and_reload() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let manager = WalletManager::new(storage.clone());

        let (wallet, mnemonic) = manager.create_wallet("alice").await.unwrap();
        assert_eq!(mnemonic.split_whitespace().count(), 24);

        // fresh manager skips the cache
        let reloaded = WalletManager::new(storage).load_wallet("alice").await.unwrap();
        assert_eq!(wallet.address(), reloaded.address());
    }

    #[tokio::test]
    async fn test_duplicate_and_missing() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let manager = WalletManager::new(storage);

        manager.create_wallet("alice").await.unwrap();
        assert!(manager.create_wallet("alice").await.is_err());
        assert!(matches!(
            manager.load_wallet("bob").await,
            Err(GrinflipError::WalletNotFound { .. })
        ));

        manager.delete_wallet("alice").await.unwrap();
        assert!(manager.list_wallets().await.unwrap().is_empty());
    }
}
