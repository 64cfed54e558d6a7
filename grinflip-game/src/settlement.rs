use crate::fairness::{self, Commitment, FairnessProof, ServerSeed};
use crate::recorder::LedgerRecorder;
use crate::signer::CustodialSigner;
use crate::{GameError, Result, SignerError};
use chrono::Utc;
use grinflip_core::{
    BalanceOracle, FlipConfig, FlipStatus, NewFlip, Side, TokenAmount, TransferPrimitive,
    TransferSpec, TxId, UnsignedTransfer, Wager, WagerState, WagerStore, WalletAddress,
    WalletCapability,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WagerRequest {
    pub amount: TokenAmount,
    pub side: Side,
}

/// Player-side cancel switch for one wager.
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

/// Observed by settlement until the debit confirms; ignored afterwards.
#[derive(Clone)]
pub struct CancelSignal {
    receiver: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (sender, receiver) = watch::channel(false);
        (
            CancelHandle { sender },
            CancelSignal {
                receiver: Some(receiver),
            },
        )
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self { receiver: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.receiver.as_ref().map_or(false, |r| *r.borrow())
    }

    /// Resolve once cancelled. Pends forever if the handle is dropped unused.
    pub async fn cancelled(&mut self) {
        if let Some(receiver) = self.receiver.as_mut() {
            if receiver.wait_for(|cancelled| *cancelled).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Verdict {
    Won { payout: TokenAmount },
    Lost,
    /// The player won but the payout has not landed yet.
    PendingReconciliation { payout: TokenAmount },
}

/// Definitive answer for a wager that got past the debit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerReceipt {
    pub wager_id: Uuid,
    pub wallet: WalletAddress,
    pub side: Side,
    pub result: Side,
    pub amount: TokenAmount,
    pub verdict: Verdict,
    pub proof: FairnessProof,
    pub debit_txid: TxId,
    pub credit_txid: Option<TxId>,
}

impl WagerReceipt {
    /// The one message the player sees for this wager.
    pub fn message(&self, decimals: u8) -> String {
        match &self.verdict {
            Verdict::Won { payout } => format!(
                "The coin landed {}. You won {}!",
                self.result,
                payout.display(decimals)
            ),
            Verdict::Lost => format!(
                "The coin landed {}. You lost {}.",
                self.result,
                self.amount.display(decimals)
            ),
            Verdict::PendingReconciliation { payout } => format!(
                "The coin landed {}. You won {}; the payout is delayed and will be \
                 settled by reconciliation (wager {}).",
                self.result,
                payout.display(decimals),
                self.wager_id
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Winners paid now (or found already paid).
    pub settled: Vec<(Uuid, TxId)>,
    /// Losing wagers that only needed recording.
    pub recorded: Vec<Uuid>,
    pub still_pending: Vec<(Uuid, String)>,
}

/// Drives one wager from bet to recorded outcome.
pub struct SettlementCoordinator {
    config: FlipConfig,
    house: WalletAddress,
    oracle: Arc<dyn BalanceOracle>,
    primitive: Arc<dyn TransferPrimitive>,
    signer: Arc<CustodialSigner>,
    recorder: LedgerRecorder,
    journal: WagerStore,
}

impl SettlementCoordinator {
    pub fn new(
        config: FlipConfig,
        oracle: Arc<dyn BalanceOracle>,
        primitive: Arc<dyn TransferPrimitive>,
        signer: Arc<CustodialSigner>,
        recorder: LedgerRecorder,
        journal: WagerStore,
    ) -> Result<Self> {
        config.validate()?;
        let house = config.house()?;
        if signer.address() != &house {
            return Err(GameError::validation(format!(
                "Signer holds {}, configured house is {}",
                signer.address(),
                house
            )));
        }

        Ok(Self {
            config,
            house,
            oracle,
            primitive,
            signer,
            recorder,
            journal,
        })
    }

    pub fn config(&self) -> &FlipConfig {
        &self.config
    }

    pub fn recorder(&self) -> &LedgerRecorder {
        &self.recorder
    }

    /// Run a wager to completion.
    ///
    /// Errors mean no funds moved (validation, randomness, debit). Once the
    /// debit confirms the wager always ends in a receipt, even if the payout
    /// has to wait for reconciliation.
    pub async fn settle(
        &self,
        request: WagerRequest,
        player: &dyn WalletCapability,
        mut cancel: CancelSignal,
    ) -> Result<WagerReceipt> {
        let wallet = player.address();
        self.validate(&request, &wallet).await?;

        let mut wager = Wager::new(wallet, request.amount, request.side);
        tracing::info!(
            "Wager {}: {} on {} by {}",
            wager.id,
            wager.amount,
            wager.side,
            wager.wallet.short()
        );
        self.journal(&wager).await;

        let (server_seed, commitment) = match fairness::commit() {
            Ok(committed) => committed,
            Err(e) => {
                self.fail_debit(&mut wager, e.to_string()).await;
                return Err(e);
            }
        };
        wager.server_seed = Some(server_seed.as_bytes().to_vec());
        wager.commitment = Some(commitment.to_string());
        self.transition(&mut wager, WagerState::SeedCommitted).await?;

        let message = fairness::client_seed_message(wager.id, &commitment, Utc::now().timestamp_millis());
        let client_seed = match self
            .player_step(&mut cancel, "Client seed", player.sign_message(message.as_bytes()))
            .await
        {
            Ok(seed) => seed,
            Err(reason) => return Err(self.fail_debit(&mut wager, reason).await),
        };

        let result = fairness::reveal(&server_seed, &client_seed);
        wager.client_seed = Some(client_seed.clone());
        wager.result = Some(result);
        self.transition(&mut wager, WagerState::OutcomeResolved).await?;

        self.transition(&mut wager, WagerState::DebitPending).await?;
        let debit_txid = match self
            .player_step(&mut cancel, "Debit", self.debit(&wager, player))
            .await
        {
            Ok(txid) => txid,
            Err(reason) => match self.landed_debit(&wager).await {
                Some(txid) => {
                    tracing::warn!(
                        "Wager {}: debit {} landed despite '{}', continuing",
                        wager.id,
                        txid,
                        reason
                    );
                    txid
                }
                None => return Err(self.fail_debit(&mut wager, reason).await),
            },
        };
        wager.debit_txid = Some(debit_txid.clone());
        self.transition(&mut wager, WagerState::DebitConfirmed).await?;

        let proof = FairnessProof::new(commitment, &server_seed, &client_seed, result);

        if result != wager.side {
            self.transition(&mut wager, WagerState::Recorded).await?;
            self.recorder.submit(self.flip(&wager, result, FlipStatus::Settled));
            tracing::info!("Wager {}: landed {}, player lost", wager.id, result);
            return Ok(self.receipt(&wager, debit_txid, Verdict::Lost, proof));
        }

        let payout = self.payout(&wager)?;
        self.transition(&mut wager, WagerState::CreditPending).await?;

        match self.credit(&wager, payout).await {
            Ok(txid) => {
                wager.credit_txid = Some(txid);
                self.transition(&mut wager, WagerState::CreditConfirmed).await?;
                self.transition(&mut wager, WagerState::Recorded).await?;
                self.recorder.submit(self.flip(&wager, result, FlipStatus::Settled));
                tracing::info!("Wager {}: landed {}, paid {}", wager.id, result, payout);
                Ok(self.receipt(&wager, debit_txid, Verdict::Won { payout }, proof))
            }
            Err(e) => {
                tracing::error!(
                    "Wager {}: credit of {} to {} failed, pending reconciliation: {}",
                    wager.id,
                    payout,
                    wager.wallet,
                    e
                );
                self.mark_credit_failed(&mut wager, e.to_string()).await;
                self.recorder
                    .submit(self.flip(&wager, result, FlipStatus::PendingReconciliation));
                Ok(self.receipt(
                    &wager,
                    debit_txid,
                    Verdict::PendingReconciliation { payout },
                    proof,
                ))
            }
        }
    }

    /// Finish every wager whose stake was taken but whose outcome never
    /// reached `Recorded`: failed payouts, and wagers a crash left in
    /// `DebitConfirmed`, `CreditPending` or `CreditConfirmed`. Payouts reuse
    /// the wager's idempotency key, so a credit that did land is never paid
    /// twice.
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport> {
        let mut unfinished = Vec::new();
        for state in WagerState::UNFINISHED {
            unfinished.extend(self.journal.list_by_state(state).await?);
        }

        let mut report = ReconcileReport::default();
        for wager in unfinished {
            let id = wager.id;
            if let Err(e) = self.reconcile(wager, &mut report).await {
                tracing::error!("Reconciling wager {} failed: {}", id, e);
                report.still_pending.push((id, e.to_string()));
            }
        }
        Ok(report)
    }

    async fn reconcile(&self, mut wager: Wager, report: &mut ReconcileReport) -> Result<()> {
        let Some(result) = wager.result else {
            report
                .still_pending
                .push((wager.id, "wager has no resolved outcome".to_string()));
            return Ok(());
        };

        if result != wager.side {
            self.transition(&mut wager, WagerState::Recorded).await?;
            self.recorder.submit(self.flip(&wager, result, FlipStatus::Settled));
            tracing::info!("Reconciled wager {}: lost, recorded", wager.id);
            report.recorded.push(wager.id);
            return Ok(());
        }

        let txid = match (wager.state, wager.credit_txid.clone()) {
            (WagerState::CreditConfirmed, Some(txid)) => txid,
            _ => {
                let payout = self.payout(&wager)?;
                if matches!(
                    wager.state,
                    WagerState::DebitConfirmed | WagerState::CreditFailed
                ) {
                    self.transition(&mut wager, WagerState::CreditPending).await?;
                }

                match self.credit(&wager, payout).await {
                    Ok(txid) => txid,
                    Err(e) if wager.state == WagerState::CreditPending => {
                        tracing::warn!("Wager {} still pending: {}", wager.id, e);
                        self.mark_credit_failed(&mut wager, e.to_string()).await;
                        report.still_pending.push((wager.id, e.to_string()));
                        return Ok(());
                    }
                    Err(e) => {
                        report.still_pending.push((wager.id, e.to_string()));
                        return Ok(());
                    }
                }
            }
        };

        wager.credit_txid = Some(txid.clone());
        wager.failure = None;
        if wager.state == WagerState::CreditPending {
            self.transition(&mut wager, WagerState::CreditConfirmed).await?;
        }
        self.transition(&mut wager, WagerState::Recorded).await?;
        self.recorder.submit(self.flip(&wager, result, FlipStatus::Settled));
        tracing::info!("Reconciled wager {}: paid ({})", wager.id, txid);
        report.settled.push((wager.id, txid));
        Ok(())
    }

    async fn validate(&self, request: &WagerRequest, wallet: &WalletAddress) -> Result<()> {
        if !self.config.accepts(request.amount) {
            return Err(GameError::validation(format!(
                "Bet must be between {} and {}",
                self.config.min_bet.display(self.config.token_decimals),
                self.config.max_bet.display(self.config.token_decimals)
            )));
        }

        if wallet == &self.house {
            return Err(GameError::validation("The house account cannot wager"));
        }

        match self.oracle.get_balance(wallet).await {
            Ok(balance) if balance < request.amount => Err(GameError::validation(format!(
                "Insufficient balance: have {}, bet {}",
                balance.display(self.config.token_decimals),
                request.amount.display(self.config.token_decimals)
            ))),
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!("Balance check for {} unavailable: {}", wallet.short(), e);
                Ok(())
            }
        }
    }

    /// Await a step that depends on the player, bounded by the debit timeout
    /// and abandoned on cancellation.
    async fn player_step<T, F>(
        &self,
        cancel: &mut CancelSignal,
        what: &str,
        step: F,
    ) -> std::result::Result<T, String>
    where
        F: Future<Output = grinflip_core::Result<T>>,
    {
        if cancel.is_cancelled() {
            return Err(format!("{} cancelled by player", what));
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(format!("{} cancelled by player", what)),
            outcome = tokio::time::timeout(self.config.debit_timeout(), step) => match outcome {
                Err(_) => Err(format!("{} timed out", what)),
                Ok(Err(e)) => Err(format!("{}: {}", what, e)),
                Ok(Ok(value)) => Ok(value),
            },
        }
    }

    async fn debit(
        &self,
        wager: &Wager,
        player: &dyn WalletCapability,
    ) -> grinflip_core::Result<TxId> {
        let checkpoint = self.primitive.latest_checkpoint().await?;
        let transfer = UnsignedTransfer::new(
            TransferSpec {
                from: wager.wallet.clone(),
                to: self.house.clone(),
                amount: wager.amount,
            },
            self.config.token_mint.as_str(),
            checkpoint,
        )
        .with_reference(wager.debit_key());

        let signed = player.sign_transfer(transfer).await?;
        let txid = self.primitive.submit(signed).await?;
        self.primitive.confirm(&txid).await?;
        Ok(txid)
    }

    /// A debit abandoned on our side may still have reached the network.
    async fn landed_debit(&self, wager: &Wager) -> Option<TxId> {
        let txid = self
            .primitive
            .find_by_reference(&wager.debit_key())
            .await
            .ok()??;
        self.primitive.confirm(&txid).await.ok()?;
        Some(txid)
    }

    async fn credit(
        &self,
        wager: &Wager,
        payout: TokenAmount,
    ) -> std::result::Result<TxId, SignerError> {
        let spec = TransferSpec {
            from: self.house.clone(),
            to: wager.wallet.clone(),
            amount: payout,
        };
        let key = wager.credit_key();
        let attempts = self.config.credit_attempts.max(1);

        let mut attempt = 1;
        loop {
            match self.signer.sign_and_broadcast(spec.clone(), &key).await {
                Ok(txid) => return Ok(txid),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(
                        "Credit for wager {} failed ({}/{}): {}",
                        wager.id,
                        attempt,
                        attempts,
                        e
                    );
                    tokio::time::sleep(self.config.credit_backoff() * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn payout(&self, wager: &Wager) -> Result<TokenAmount> {
        wager
            .payout()
            .ok_or_else(|| GameError::Credit(format!("Payout for wager {} overflows", wager.id)))
    }

    async fn transition(&self, wager: &mut Wager, next: WagerState) -> Result<()> {
        wager
            .advance(next)
            .map_err(|e| GameError::InvalidTransition(e.to_string()))?;
        self.journal(wager).await;
        Ok(())
    }

    async fn fail_debit(&self, wager: &mut Wager, reason: String) -> GameError {
        tracing::warn!("Wager {}: {}", wager.id, reason);
        if let Err(e) = wager.fail(WagerState::DebitFailed, reason.clone()) {
            return GameError::InvalidTransition(e.to_string());
        }
        self.journal(wager).await;
        GameError::Debit(reason)
    }

    /// The journal row is what reconciliation reads, so this save is retried
    /// instead of best effort. If it still fails the row stays at
    /// `CreditPending`, which reconciliation also picks up.
    async fn mark_credit_failed(&self, wager: &mut Wager, reason: String) {
        if let Err(e) = wager.fail(WagerState::CreditFailed, reason) {
            tracing::error!("Wager {}: {}", wager.id, e);
            return;
        }

        let attempts = self.config.ledger.max_record_attempts.max(1);
        let mut backoff = self.config.ledger.retry_backoff();
        for attempt in 1..=attempts {
            match self.journal.save(wager).await {
                Ok(()) => return,
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        "Journaling credit failure of wager {} failed ({}/{}): {}",
                        wager.id,
                        attempt,
                        attempts,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => tracing::error!(
                    "Wager {} owes {} but its credit failure could not be journaled: {}",
                    wager.id,
                    wager.wallet,
                    e
                ),
            }
        }
    }

    /// Journal writes never change the outcome of a wager.
    async fn journal(&self, wager: &Wager) {
        if let Err(e) = self.journal.save(wager).await {
            tracing::warn!("Failed to journal wager {} ({}): {}", wager.id, wager.state, e);
        }
    }

    fn flip(&self, wager: &Wager, result: Side, status: FlipStatus) -> NewFlip {
        NewFlip {
            wager_id: wager.id,
            wallet: wager.wallet.clone(),
            side: wager.side,
            result,
            amount: wager.amount,
            status,
            created_at: Utc::now(),
        }
    }

    fn receipt(
        &self,
        wager: &Wager,
        debit_txid: TxId,
        verdict: Verdict,
        proof: FairnessProof,
    ) -> WagerReceipt {
        WagerReceipt {
            wager_id: wager.id,
            wallet: wager.wallet.clone(),
            side: wager.side,
            result: proof.result,
            amount: wager.amount,
            verdict,
            proof,
            debit_txid,
            credit_txid: wager.credit_txid.clone(),
        }
    }
}

/// Rebuild the fairness proof of a journaled wager once its seeds are known.
pub fn proof_for(wager: &Wager) -> Result<Option<FairnessProof>> {
    let (Some(commitment), Some(seed), Some(client_seed), Some(result)) = (
        wager.commitment.as_deref(),
        wager.server_seed.as_deref(),
        wager.client_seed.as_deref(),
        wager.result,
    ) else {
        return Ok(None);
    };

    Ok(Some(FairnessProof::new(
        Commitment::parse(commitment)?,
        &ServerSeed::from_bytes(seed)?,
        client_seed,
        result,
    )))
}
