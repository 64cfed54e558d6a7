use crate::context::Context;
use anyhow::{bail, Context as _, Result};
use clap::Args;
use comfy_table::{presets::UTF8_FULL, Table};
use grinflip_core::{Approval, Side, TokenAmount};
use grinflip_game::{
    proof_for, CancelSignal, Commitment, FairnessProof, ReconcileReport, WagerReceipt,
    WagerRequest,
};
use uuid::Uuid;

#[derive(Args)]
pub struct FlipArgs {
    /// Player wallet name
    pub wallet: String,
    /// heads or tails
    pub side: Side,
    /// Stake, in tokens
    pub amount: String,
    /// Sign the stake transfer without asking
    #[arg(short, long)]
    pub yes: bool,
    /// Print the receipt as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Wager to check, as recorded on this machine
    #[arg(conflicts_with_all = ["commitment", "server_seed", "client_seed", "result"])]
    pub wager_id: Option<Uuid>,
    #[arg(long, requires_all = ["server_seed", "client_seed", "result"])]
    pub commitment: Option<String>,
    #[arg(long)]
    pub server_seed: Option<String>,
    /// Hex-encoded client seed (the player's signature)
    #[arg(long)]
    pub client_seed: Option<String>,
    #[arg(long)]
    pub result: Option<Side>,
}

pub async fn handle_flip(ctx: &Context, args: FlipArgs) -> Result<()> {
    let config = ctx.config()?;
    let approval = if args.yes {
        Approval::Auto
    } else {
        Approval::Prompt
    };
    let wallet = ctx
        .wallets(approval, config.token_decimals)
        .load_wallet(&args.wallet)
        .await?;
    let request = WagerRequest {
        amount: TokenAmount::parse(&args.amount, config.token_decimals)?,
        side: args.side,
    };

    let (ledger, _lock) = ctx.ledger(&config).await?;
    let coordinator = ctx.coordinator(&config, ledger.clone()).await?;

    let (handle, cancel) = CancelSignal::pair();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling wager...");
            handle.cancel();
        }
    });

    let outcome = coordinator.settle(request, &*wallet, cancel).await;
    interrupt.abort();

    // the debit may have landed even when settlement errored
    ctx.save_ledger(&ledger)?;
    if let Err(e) = coordinator.recorder().flush().await {
        tracing::warn!("Ledger flush failed: {}", e);
    }

    let receipt = outcome?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    } else {
        print_receipt(&receipt, config.token_decimals);
    }
    Ok(())
}

fn print_receipt(receipt: &WagerReceipt, decimals: u8) {
    println!("{}", receipt.message(decimals));
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec!["Wager".to_string(), receipt.wager_id.to_string()]);
    table.add_row(vec![
        "Bet".to_string(),
        format!("{} on {}", receipt.amount.display(decimals), receipt.side),
    ]);
    table.add_row(vec!["Result".to_string(), receipt.result.to_string()]);
    table.add_row(vec!["Debit".to_string(), receipt.debit_txid.to_string()]);
    if let Some(credit) = &receipt.credit_txid {
        table.add_row(vec!["Credit".to_string(), credit.to_string()]);
    }
    table.add_row(vec!["Commitment".to_string(), receipt.proof.commitment.to_string()]);
    table.add_row(vec!["Server seed".to_string(), receipt.proof.server_seed.clone()]);
    table.add_row(vec!["Client seed".to_string(), receipt.proof.client_seed.clone()]);
    println!("{}", table);
    println!("Check it with: grinflip verify {}", receipt.wager_id);
}

pub async fn handle_verify(ctx: &Context, args: VerifyArgs) -> Result<()> {
    let proof = match args.wager_id {
        Some(id) => {
            let wager = ctx
                .journal()
                .load(id)
                .await?
                .with_context(|| format!("No wager {} on this machine", id))?;
            match proof_for(&wager)? {
                Some(proof) => proof,
                None => bail!(
                    "Wager {} never resolved an outcome (state: {})",
                    id,
                    wager.state
                ),
            }
        }
        None => match (args.commitment, args.server_seed, args.client_seed, args.result) {
            (Some(commitment), Some(server_seed), Some(client_seed), Some(result)) => {
                FairnessProof {
                    commitment: Commitment::parse(&commitment)?,
                    server_seed,
                    client_seed,
                    result,
                }
            }
            _ => bail!("Give a wager id, or --commitment, --server-seed, --client-seed and --result"),
        },
    };

    if proof.verify()? {
        println!("Valid: commitment {} opens to the server seed", proof.commitment);
        println!("and the seeds produce {}.", proof.result);
        Ok(())
    } else {
        bail!(
            "Proof does not check out: the commitment or the result {} does not match the seeds",
            proof.result
        )
    }
}

pub async fn handle_reconcile(ctx: &Context) -> Result<()> {
    let config = ctx.config()?;
    let (ledger, _lock) = ctx.ledger(&config).await?;
    let coordinator = ctx.coordinator(&config, ledger.clone()).await?;

    let report = coordinator.reconcile_pending().await;
    ctx.save_ledger(&ledger)?;
    coordinator.recorder().flush().await?;

    print_report(&report?);
    Ok(())
}

fn print_report(report: &ReconcileReport) {
    if report == &ReconcileReport::default() {
        println!("No unfinished wagers.");
        return;
    }

    for (wager_id, txid) in &report.settled {
        println!("Paid wager {} ({})", wager_id, txid);
    }
    for wager_id in &report.recorded {
        println!("Recorded lost wager {}", wager_id);
    }
    for (wager_id, reason) in &report.still_pending {
        println!("Still pending: wager {}: {}", wager_id, reason);
    }
}
