use crate::{GameError, Result, SignerError};
use bitcoin::key::Keypair;
use grinflip_core::config::SignerConfig;
use grinflip_core::wallet::keypair_address;
use grinflip_core::{
    FlipConfig, GrinflipError, TransferError, TransferPrimitive, TransferSpec, TxId,
    UnsignedTransfer, WalletAddress,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// The only holder of the house key.
///
/// Requests are serialized through a FIFO queue so at most one house transfer
/// is in flight. A request that cannot enter the queue within
/// `queue_timeout` fails with [`SignerError::Busy`].
pub struct CustodialSigner {
    keypair: Keypair,
    address: WalletAddress,
    token: String,
    primitive: Arc<dyn TransferPrimitive>,
    queue: tokio::sync::Mutex<()>,
    completed: Mutex<HashMap<String, TxId>>,
    config: SignerConfig,
}

impl CustodialSigner {
    /// Bind `keypair` to the configured house account. A key that does not
    /// belong to that account is refused.
    pub fn new(
        keypair: Keypair,
        config: &FlipConfig,
        primitive: Arc<dyn TransferPrimitive>,
    ) -> Result<Self> {
        let expected = config.house()?;
        let address = keypair_address(&keypair);
        if address != expected {
            return Err(GameError::Core(GrinflipError::config(format!(
                "House key belongs to {}, configured house account is {}",
                address, expected
            ))));
        }

        tracing::info!("Custodial signer ready for house account {}", address.short());

        Ok(Self {
            keypair,
            address,
            token: config.token_mint.clone(),
            primitive,
            queue: tokio::sync::Mutex::new(()),
            completed: Mutex::new(HashMap::new()),
            config: config.signer.clone(),
        })
    }

    pub fn address(&self) -> &WalletAddress {
        &self.address
    }

    /// Sign, submit and confirm a house transfer.
    ///
    /// `idempotency_key` is attached to the transfer as its reference; a key
    /// that already produced a transfer returns that transfer's id instead of
    /// paying twice. Once the queue is held the whole operation is bounded by
    /// `operation_timeout`, so a hung network call cannot keep the key.
    pub async fn sign_and_broadcast(
        &self,
        spec: TransferSpec,
        idempotency_key: &str,
    ) -> std::result::Result<TxId, SignerError> {
        if spec.from != self.address {
            return Err(SignerError::NotHouseAccount(spec.from));
        }

        let _turn = tokio::time::timeout(self.config.queue_timeout(), self.queue.lock())
            .await
            .map_err(|_| {
                tracing::warn!("Signer queue timeout for {}", idempotency_key);
                SignerError::Busy
            })?;

        match tokio::time::timeout(
            self.config.operation_timeout(),
            self.broadcast(&spec, idempotency_key),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(
                    "House transfer {} stalled for {:?}, releasing the queue",
                    idempotency_key,
                    self.config.operation_timeout()
                );
                Err(SignerError::Stalled(idempotency_key.to_string()))
            }
        }
    }

    async fn broadcast(
        &self,
        spec: &TransferSpec,
        idempotency_key: &str,
    ) -> std::result::Result<TxId, SignerError> {
        let known = self.completed.lock().get(idempotency_key).cloned();
        if let Some(txid) = known {
            tracing::debug!("{} already settled as {}", idempotency_key, txid);
            return Ok(txid);
        }

        let txid = match self.primitive.find_by_reference(idempotency_key).await? {
            Some(txid) => {
                tracing::info!("Found earlier transfer {} for {}", txid, idempotency_key);
                txid
            }
            None => self.submit(spec, idempotency_key).await?,
        };

        tokio::time::timeout(self.config.confirm_timeout(), self.primitive.confirm(&txid))
            .await
            .map_err(|_| SignerError::Timeout(txid.clone()))??;

        self.completed
            .lock()
            .insert(idempotency_key.to_string(), txid.clone());

        tracing::info!(
            "House sent {} to {} ({})",
            spec.amount,
            spec.to.short(),
            txid
        );
        Ok(txid)
    }

    async fn submit(
        &self,
        spec: &TransferSpec,
        idempotency_key: &str,
    ) -> std::result::Result<TxId, SignerError> {
        let max_attempts = self.config.max_checkpoint_retries + 1;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let checkpoint = self.primitive.latest_checkpoint().await?;
            let signed = UnsignedTransfer::new(spec.clone(), self.token.as_str(), checkpoint)
                .with_reference(idempotency_key)
                .sign(&self.keypair);

            match self.primitive.submit(signed).await {
                Ok(txid) => return Ok(txid),
                Err(TransferError::CheckpointExpired(height)) if attempt < max_attempts => {
                    tracing::warn!(
                        "Checkpoint {} expired for {}, resubmitting ({}/{})",
                        height,
                        idempotency_key,
                        attempt,
                        max_attempts
                    );
                }
                Err(TransferError::CheckpointExpired(_)) => {
                    return Err(SignerError::RetriesExhausted(attempt));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl std::fmt::Debug for CustodialSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustodialSigner")
            .field("address", &self.address)
            .field("token", &self.token)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use grinflip_core::wallet::{generate_mnemonic, mnemonic_to_keypair};
    use grinflip_core::{Checkpoint, SandboxLedger, SignedTransfer, TokenAmount};
    use std::time::Duration;

    /// Network whose submissions never come back.
    struct HungNetwork;

    #[async_trait]
    impl TransferPrimitive for HungNetwork {
        async fn latest_checkpoint(&self) -> std::result::Result<Checkpoint, TransferError> {
            Ok(Checkpoint {
                height: 1,
                hash: "genesis".to_string(),
            })
        }

        async fn submit(&self, _transfer: SignedTransfer) -> std::result::Result<TxId, TransferError> {
            std::future::pending().await
        }

        async fn confirm(&self, _txid: &TxId) -> std::result::Result<(), TransferError> {
            Ok(())
        }

        async fn find_by_reference(
            &self,
            _reference: &str,
        ) -> std::result::Result<Option<TxId>, TransferError> {
            Ok(None)
        }
    }

    struct Fixture {
        ledger: Arc<SandboxLedger>,
        signer: Arc<CustodialSigner>,
        player: WalletAddress,
    }

    fn fixture(tune: impl FnOnce(&mut FlipConfig)) -> Fixture {
        let keypair = mnemonic_to_keypair(&generate_mnemonic().unwrap()).unwrap();
        let mut config = FlipConfig::new(&keypair_address(&keypair));
        tune(&mut config);

        let ledger = Arc::new(SandboxLedger::new(config.token_mint.clone()));
        ledger
            .fund(&keypair_address(&keypair), TokenAmount::from_units(10_000))
            .unwrap();
        let signer = Arc::new(CustodialSigner::new(keypair, &config, ledger.clone()).unwrap());
        let player =
            keypair_address(&mnemonic_to_keypair(&generate_mnemonic().unwrap()).unwrap());

        Fixture {
            ledger,
            signer,
            player,
        }
    }

    fn payout(f: &Fixture, units: u64) -> TransferSpec {
        TransferSpec {
            from: f.signer.address().clone(),
            to: f.player.clone(),
            amount: TokenAmount::from_units(units),
        }
    }

    #[tokio::test]
    async fn test_rejects_foreign_house_key() {
        let keypair = mnemonic_to_keypair(&generate_mnemonic().unwrap()).unwrap();
        let other = mnemonic_to_keypair(&generate_mnemonic().unwrap()).unwrap();
        let config = FlipConfig::new(&keypair_address(&other));
        let ledger = Arc::new(SandboxLedger::new(config.token_mint.clone()));
        assert!(CustodialSigner::new(keypair, &config, ledger).is_err());
    }

    #[tokio::test]
    async fn test_rejects_non_house_source() {
        let f = fixture(|_| {});
        let spec = TransferSpec {
            from: f.player.clone(),
            to: f.signer.address().clone(),
            amount: TokenAmount::from_units(1),
        };
        assert!(matches!(
            f.signer.sign_and_broadcast(spec, "k").await,
            Err(SignerError::NotHouseAccount(_))
        ));
    }

    #[tokio::test]
    async fn test_same_key_pays_once() {
        let f = fixture(|_| {});
        let first = f.signer.sign_and_broadcast(payout(&f, 200), "credit:a").await.unwrap();
        let second = f.signer.sign_and_broadcast(payout(&f, 200), "credit:a").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.ledger.transfers().len(), 1);
        assert_eq!(f.ledger.balance_of(&f.player).units(), 200);
    }

    #[tokio::test]
    async fn test_lost_ack_is_recovered_by_reference() {
        let f = fixture(|_| {});
        f.ledger.drop_next_acks(1);

        let err = f
            .signer
            .sign_and_broadcast(payout(&f, 300), "credit:b")
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        f.signer.sign_and_broadcast(payout(&f, 300), "credit:b").await.unwrap();
        assert_eq!(f.ledger.transfers().len(), 1);
        assert_eq!(f.ledger.balance_of(&f.player).units(), 300);
    }

    #[tokio::test]
    async fn test_expired_checkpoint_is_retried() {
        let f = fixture(|c| c.signer.max_checkpoint_retries = 3);
        f.ledger.expire_next_checkpoints(2);

        f.signer.sign_and_broadcast(payout(&f, 50), "credit:c").await.unwrap();
        assert_eq!(f.ledger.transfers().len(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_retries_exhausted() {
        let f = fixture(|c| c.signer.max_checkpoint_retries = 2);
        f.ledger.expire_next_checkpoints(5);

        assert_eq!(
            f.signer.sign_and_broadcast(payout(&f, 50), "credit:d").await,
            Err(SignerError::RetriesExhausted(3))
        );
        assert!(f.ledger.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_queue_timeout_is_busy() {
        let f = fixture(|c| c.signer.queue_timeout_ms = 50);
        f.ledger.set_latency(Duration::from_millis(500));

        let (first, second) = tokio::join!(
            f.signer.sign_and_broadcast(payout(&f, 10), "credit:e"),
            f.signer.sign_and_broadcast(payout(&f, 10), "credit:f"),
        );

        assert!(first.is_ok());
        assert_eq!(second, Err(SignerError::Busy));
        assert_eq!(f.ledger.transfers().len(), 1);
    }

    #[tokio::test]
    async fn test_hung_submit_releases_the_queue() {
        let keypair = mnemonic_to_keypair(&generate_mnemonic().unwrap()).unwrap();
        let house = keypair_address(&keypair);
        let mut config = FlipConfig::new(&house);
        config.signer.operation_timeout_ms = 100;
        config.signer.queue_timeout_ms = 1_000;
        let signer = CustodialSigner::new(keypair, &config, Arc::new(HungNetwork)).unwrap();

        let player = keypair_address(&mnemonic_to_keypair(&generate_mnemonic().unwrap()).unwrap());
        let spec = TransferSpec {
            from: house,
            to: player,
            amount: TokenAmount::from_units(10),
        };

        for key in ["credit:h", "credit:i"] {
            let outcome = tokio::time::timeout(
                Duration::from_secs(5),
                signer.sign_and_broadcast(spec.clone(), key),
            )
            .await
            .expect("signer must give up on its own");
            let err = outcome.unwrap_err();
            assert_eq!(err, SignerError::Stalled(key.to_string()));
            assert!(err.is_retryable());
        }
    }

    #[tokio::test]
    async fn test_insufficient_house_funds_is_not_retryable() {
        let f = fixture(|_| {});
        let err = f
            .signer
            .sign_and_broadcast(payout(&f, 1_000_000), "credit:g")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignerError::Transfer(TransferError::InsufficientFunds { .. })
        ));
        assert!(!err.is_retryable());
    }
}
