use anyhow::{bail, Context as _, Result};
use grinflip_core::keystore::PASSWORD_ENV;
use grinflip_core::{
    Approval, EncryptedKeystore, FlipConfig, FlipStore, SandboxLedger, SnapshotLock, Storage,
    WagerStore, WalletAddress, WalletCapability, WalletManager,
};
use grinflip_game::{CustodialSigner, LedgerRecorder, SettlementCoordinator};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const HOUSE: &str = "house";

/// Everything a command may need, rooted at the data directory.
pub struct Context {
    data_dir: PathBuf,
    storage: Arc<Storage>,
}

impl Context {
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let storage = Storage::new(&data_dir.join("grinflip.db")).await?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            storage: Arc::new(storage),
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn keystore_path(&self) -> PathBuf {
        self.data_dir.join("house.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("sandbox.json")
    }

    /// Environment first (`GRINFLIP_*`), then `config.json`.
    pub fn config(&self) -> Result<FlipConfig> {
        if std::env::var_os("GRINFLIP_HOUSE_ADDRESS").is_some() {
            return Ok(FlipConfig::from_env()?);
        }
        let path = self.config_path();
        if !path.exists() {
            bail!("No configuration at {}; run 'grinflip init' first", path.display());
        }
        Ok(FlipConfig::from_file(&path)?)
    }

    pub fn wallets(&self, approval: Approval, decimals: u8) -> WalletManager {
        WalletManager::new(self.storage.clone()).with_approval(approval, decimals)
    }

    pub fn journal(&self) -> WagerStore {
        WagerStore::new(self.storage.clone())
    }

    pub fn recorder(&self, config: &FlipConfig) -> LedgerRecorder {
        LedgerRecorder::spawn(
            Arc::new(FlipStore::new(self.storage.clone())),
            config.ledger.clone(),
        )
    }

    /// Open the sandbox ledger for this command. Hold the returned lock until
    /// after [`Context::save_ledger`].
    pub async fn ledger(
        &self,
        config: &FlipConfig,
    ) -> Result<(Arc<SandboxLedger>, SnapshotLock)> {
        let path = self.ledger_path();
        let token = config.token_mint.clone();
        let (ledger, lock) =
            tokio::task::spawn_blocking(move || SandboxLedger::open(&path, &token)).await??;
        Ok((Arc::new(ledger), lock))
    }

    pub fn save_ledger(&self, ledger: &SandboxLedger) -> Result<()> {
        ledger.save(&self.ledger_path())?;
        Ok(())
    }

    /// Resolve a wallet name, or `house`, to its address.
    pub async fn address_of(&self, config: &FlipConfig, name: &str) -> Result<WalletAddress> {
        if name == HOUSE {
            return Ok(config.house()?);
        }
        let wallet = self
            .wallets(Approval::Auto, config.token_decimals)
            .load_wallet(name)
            .await?;
        Ok(wallet.address())
    }

    /// Unlock the house key and wire up settlement against the sandbox ledger.
    pub async fn coordinator(
        &self,
        config: &FlipConfig,
        ledger: Arc<SandboxLedger>,
    ) -> Result<SettlementCoordinator> {
        let keystore = EncryptedKeystore::load(&self.keystore_path())
            .with_context(|| format!("Cannot read house keystore {}", self.keystore_path().display()))?;
        let password = house_password(false)?;
        let keypair = keystore.keypair(&password)?;

        let signer = Arc::new(CustodialSigner::new(keypair, config, ledger.clone())?);
        let coordinator = SettlementCoordinator::new(
            config.clone(),
            ledger.clone(),
            ledger,
            signer,
            self.recorder(config),
            self.journal(),
        )?;
        Ok(coordinator)
    }
}

/// House password from the environment, or asked for on the terminal.
pub fn house_password(confirm: bool) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }

    let mut prompt = dialoguer::Password::new().with_prompt("House keystore password");
    if confirm {
        prompt = prompt.with_confirmation("Repeat password", "Passwords do not match");
    }
    Ok(prompt.interact()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_config_points_to_init() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::open(dir.path()).await.unwrap();
        if std::env::var_os("GRINFLIP_HOUSE_ADDRESS").is_none() {
            let err = ctx.config().unwrap_err();
            assert!(err.to_string().contains("grinflip init"));
        }
    }

    #[tokio::test]
    async fn test_ledger_stays_locked_for_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::open(dir.path()).await.unwrap();
        let config = FlipConfig::default();

        let (_ledger, lock) = ctx.ledger(&config).await.unwrap();
        assert!(SnapshotLock::try_acquire(&ctx.ledger_path()).unwrap().is_none());
        drop(lock);
        assert!(SnapshotLock::try_acquire(&ctx.ledger_path()).unwrap().is_some());
    }
}
