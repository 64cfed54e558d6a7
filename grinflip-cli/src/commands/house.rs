use crate::context::{house_password, Context, HOUSE};
use anyhow::{bail, Result};
use clap::Args;
use grinflip_core::wallet::{generate_mnemonic, keypair_address, mnemonic_to_keypair};
use grinflip_core::{BalanceOracle, EncryptedKeystore, FlipConfig, RpcBalanceOracle, TokenAmount};

#[derive(Args)]
pub struct InitArgs {
    /// Import an existing house mnemonic instead of generating one
    #[arg(long)]
    pub mnemonic: Option<String>,
    /// Smallest accepted bet, in tokens
    #[arg(long, default_value = "0.001")]
    pub min_bet: String,
    /// Largest accepted bet, in tokens
    #[arg(long, default_value = "1000")]
    pub max_bet: String,
    /// Token mint the house settles in
    #[arg(long)]
    pub token_mint: Option<String>,
    /// JSON-RPC endpoint used by `balance --rpc`
    #[arg(long)]
    pub rpc_url: Option<String>,
    /// Sandbox tokens minted to the house account
    #[arg(long, default_value = "1000000")]
    pub bankroll: String,
    /// Overwrite an existing house keystore
    #[arg(long)]
    pub force: bool,
}

pub async fn handle_init(ctx: &Context, args: InitArgs) -> Result<()> {
    if ctx.keystore_path().exists() && !args.force {
        bail!(
            "House keystore already exists at {} (use --force to replace it)",
            ctx.keystore_path().display()
        );
    }

    let (mnemonic, generated) = match args.mnemonic {
        Some(m) => (m, false),
        None => (generate_mnemonic()?, true),
    };
    let house = keypair_address(&mnemonic_to_keypair(&mnemonic)?);

    let mut config = FlipConfig::new(&house);
    if let Some(mint) = args.token_mint {
        config.token_mint = mint;
    }
    if let Some(url) = args.rpc_url {
        config.rpc_url = url;
    }
    config.min_bet = TokenAmount::parse(&args.min_bet, config.token_decimals)?;
    config.max_bet = TokenAmount::parse(&args.max_bet, config.token_decimals)?;
    config.validate()?;

    let password = house_password(true)?;
    EncryptedKeystore::seal(&mnemonic, &password)?.save(&ctx.keystore_path())?;
    config.save(&ctx.config_path())?;

    let (ledger, _lock) = ctx.ledger(&config).await?;
    let bankroll = TokenAmount::parse(&args.bankroll, config.token_decimals)?;
    if bankroll > TokenAmount::ZERO {
        ledger.fund(&house, bankroll)?;
    }
    ctx.save_ledger(&ledger)?;

    println!("House initialized.");
    println!("  Address: {}", house);
    println!("  Token:   {}", config.token_mint);
    println!(
        "  Bets:    {} - {}",
        config.min_bet.display(config.token_decimals),
        config.max_bet.display(config.token_decimals)
    );
    println!(
        "  Bankroll: {}",
        ledger.balance_of(&house).display(config.token_decimals)
    );
    if generated {
        println!();
        println!("IMPORTANT: Save the house mnemonic securely!");
        println!("Mnemonic: {}", mnemonic);
    }

    Ok(())
}

/// Mint sandbox tokens to a wallet (or `house`).
pub async fn handle_fund(ctx: &Context, wallet: &str, amount: &str) -> Result<()> {
    let config = ctx.config()?;
    let address = ctx.address_of(&config, wallet).await?;
    let amount = TokenAmount::parse(amount, config.token_decimals)?;

    let (ledger, _lock) = ctx.ledger(&config).await?;
    let balance = ledger.fund(&address, amount)?;
    ctx.save_ledger(&ledger)?;

    println!(
        "Funded '{}' with {}. Balance: {}",
        wallet,
        amount.display(config.token_decimals),
        balance.display(config.token_decimals)
    );
    Ok(())
}

pub async fn handle_balance(ctx: &Context, wallet: &str, rpc: bool) -> Result<()> {
    let config = ctx.config()?;
    let address = ctx.address_of(&config, wallet).await?;

    let (balance, source) = if rpc {
        let oracle = RpcBalanceOracle::new(config.rpc_url.as_str(), config.token_mint.as_str())?;
        (oracle.get_balance(&address).await?, config.rpc_url.clone())
    } else {
        let (ledger, _lock) = ctx.ledger(&config).await?;
        (ledger.get_balance(&address).await?, "sandbox".to_string())
    };

    let label = if wallet == HOUSE { "House" } else { wallet };
    println!("{} ({}):", label, address.short());
    println!(
        "  Balance: {} ({} units, {})",
        balance.display(config.token_decimals),
        balance.units(),
        source
    );
    Ok(())
}
