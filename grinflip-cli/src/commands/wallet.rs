use crate::context::Context;
use anyhow::Result;
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use dialoguer::{Confirm, Password};
use grinflip_core::{Approval, BalanceOracle, WalletCapability};

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Create a new player wallet
    Create {
        /// Wallet name
        name: String,
    },
    /// Import a player wallet from mnemonic
    Import {
        /// Wallet name
        name: String,
        /// Mnemonic phrase (will prompt if not provided)
        #[arg(short, long)]
        mnemonic: Option<String>,
    },
    /// List all wallets
    List,
    /// Show wallet address and balance
    Info {
        /// Wallet name
        name: String,
    },
    /// Delete a wallet
    Delete {
        /// Wallet name
        name: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn handle_wallet_command(cmd: WalletCommands, ctx: &Context) -> Result<()> {
    let manager = ctx.wallets(Approval::Auto, 9);

    match cmd {
        WalletCommands::Create { name } => {
            println!("Creating wallet '{}'...", name);
            let (wallet, mnemonic) = manager.create_wallet(&name).await?;

            println!("Wallet created successfully!");
            println!();
            println!("IMPORTANT: Save your mnemonic phrase securely!");
            println!("Mnemonic: {}", mnemonic);
            println!();
            println!("Wallet Details:");
            println!("  Name: {}", wallet.name());
            println!("  ID: {}", wallet.id());
            println!("  Address: {}", wallet.address());
        }

        WalletCommands::Import { name, mnemonic } => {
            let mnemonic = match mnemonic {
                Some(m) => m,
                None => Password::new()
                    .with_prompt("Enter mnemonic phrase")
                    .interact()?,
            };

            println!("Importing wallet '{}'...", name);
            let wallet = manager.import_wallet(&name, &mnemonic).await?;

            println!("Wallet imported successfully!");
            println!("  Name: {}", wallet.name());
            println!("  ID: {}", wallet.id());
            println!("  Address: {}", wallet.address());
        }

        WalletCommands::List => {
            let wallets = manager.list_wallets().await?;

            if wallets.is_empty() {
                println!("No wallets found.");
                println!("Create a new wallet with: grinflip wallet create <name>");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["Name", "Address", "Created"]);

            for wallet in wallets {
                table.add_row(vec![
                    wallet.name,
                    wallet.address.to_string(),
                    wallet.created_at.format("%Y-%m-%d %H:%M").to_string(),
                ]);
            }

            println!("{}", table);
        }

        WalletCommands::Info { name } => {
            let wallet = manager.load_wallet(&name).await?;
            println!("Wallet: {}", wallet.name());
            println!("  ID: {}", wallet.id());
            println!("  Address: {}", wallet.address());

            // balance needs a configured house; a bare wallet still shows its address
            if let Ok(config) = ctx.config() {
                let (ledger, _lock) = ctx.ledger(&config).await?;
                let balance = ledger.get_balance(&wallet.address()).await?;
                println!("  Balance: {}", balance.display(config.token_decimals));

                if let Some(entry) = ctx.recorder(&config).entry(&wallet.address()).await? {
                    println!(
                        "  Record: {} wins / {} flips, streak {} (best {})",
                        entry.total_wins,
                        entry.total_flips,
                        entry.current_streak,
                        entry.longest_streak
                    );
                }
            }
        }

        WalletCommands::Delete { name, force } => {
            if !force {
                let confirmed = Confirm::new()
                    .with_prompt(format!(
                        "Delete wallet '{}'? Funds are lost without the mnemonic",
                        name
                    ))
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            manager.delete_wallet(&name).await?;
            println!("Wallet '{}' deleted.", name);
        }
    }

    Ok(())
}
