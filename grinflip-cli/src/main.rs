mod commands;
mod context;

use clap::{Parser, Subcommand};
use context::Context;
use grinflip_core::{GrinflipError, TransferError};
use grinflip_game::{GameError, SignerError};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "grinflip")]
#[command(about = "Provably fair coin flip against a custodial house")]
#[command(version)]
struct Cli {
    /// Data directory for wallets, journal and sandbox ledger
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the house keystore and configuration
    Init(commands::InitArgs),

    /// Player wallet commands
    #[command(subcommand)]
    Wallet(commands::WalletCommands),

    /// Mint sandbox tokens to a wallet or the house
    Fund {
        /// Wallet name, or `house`
        wallet: String,
        /// Amount, in tokens
        amount: String,
    },

    /// Show a token balance
    Balance {
        /// Wallet name, or `house`
        wallet: String,
        /// Ask the configured RPC endpoint instead of the sandbox
        #[arg(long)]
        rpc: bool,
    },

    /// Place a wager
    Flip(commands::FlipArgs),

    /// Check the fairness proof of a flip
    Verify(commands::VerifyArgs),

    /// Finish wagers whose stake was taken but never settled
    Reconcile,

    /// Most recent flips
    Recent {
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Win rate and side split over recent flips
    Stats {
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Top wallets by wins
    Leaderboard {
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Settlement journal
    Wagers {
        #[arg(short, long)]
        limit: Option<usize>,
        /// Only wagers waiting for reconciliation
        #[arg(long)]
        pending: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "grinflip={0},grinflip_core={0},grinflip_game={0}",
            log_level
        )))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("grinflip")
    });

    let ctx = Context::open(&data_dir).await?;

    let result = match cli.command {
        Commands::Init(args) => commands::handle_init(&ctx, args).await,
        Commands::Wallet(cmd) => commands::handle_wallet_command(cmd, &ctx).await,
        Commands::Fund { wallet, amount } => commands::handle_fund(&ctx, &wallet, &amount).await,
        Commands::Balance { wallet, rpc } => commands::handle_balance(&ctx, &wallet, rpc).await,
        Commands::Flip(args) => commands::handle_flip(&ctx, args).await,
        Commands::Verify(args) => commands::handle_verify(&ctx, args).await,
        Commands::Reconcile => commands::handle_reconcile(&ctx).await,
        Commands::Recent { limit } => commands::handle_recent(&ctx, limit).await,
        Commands::Stats { limit } => commands::handle_stats(&ctx, limit).await,
        Commands::Leaderboard { limit } => commands::handle_leaderboard(&ctx, limit).await,
        Commands::Wagers { limit, pending } => {
            commands::handle_wagers(&ctx, limit, pending).await
        }
    };

    if let Err(e) = result {
        report(&e);
        std::process::exit(1);
    }

    Ok(())
}

fn report(e: &anyhow::Error) {
    let core = e
        .downcast_ref::<GrinflipError>()
        .or_else(|| match e.downcast_ref::<GameError>() {
            Some(GameError::Core(inner)) => Some(inner),
            _ => None,
        });

    match core {
        Some(GrinflipError::WalletNotFound { name }) => {
            eprintln!("Error: Wallet '{}' not found", name);
            eprintln!("Use 'grinflip wallet list' to see available wallets");
            return;
        }
        Some(GrinflipError::InvalidAddress(addr)) => {
            eprintln!("Error: Invalid address: {}", addr);
            return;
        }
        Some(GrinflipError::Keystore(reason)) => {
            eprintln!("Error: Cannot unlock the house keystore: {}", reason);
            eprintln!("Check the password, or set GRINFLIP_HOUSE_PASSWORD");
            return;
        }
        _ => {}
    }

    match e.downcast_ref::<GameError>() {
        Some(GameError::Debit(reason)) => {
            eprintln!("Error: Stake was not taken: {}", reason);
        }
        Some(GameError::Signer(SignerError::Busy)) => {
            eprintln!("Error: The house is busy settling other wagers, try again shortly");
        }
        Some(GameError::Signer(SignerError::Transfer(TransferError::InsufficientFunds {
            ..
        }))) => {
            eprintln!("Error: The house bankroll cannot cover this payout");
        }
        _ => eprintln!("Error: {:#}", e),
    }
}
