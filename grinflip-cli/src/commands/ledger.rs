use crate::context::Context;
use anyhow::Result;
use comfy_table::{presets::UTF8_FULL, Table};
use grinflip_core::{FlipStatus, WagerState};

pub async fn handle_recent(ctx: &Context, limit: Option<usize>) -> Result<()> {
    let config = ctx.config()?;
    let flips = ctx.recorder(&config).recent_flips(limit).await?;

    if flips.is_empty() {
        println!("No flips recorded yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "Time", "Wallet", "Bet", "Side", "Result", "Outcome"]);

    for flip in flips {
        let outcome = match flip.status {
            FlipStatus::PendingReconciliation => "payout pending",
            FlipStatus::Settled if flip.won => "won",
            FlipStatus::Settled => "lost",
        };
        table.add_row(vec![
            flip.id.to_string(),
            flip.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            flip.wallet.short(),
            flip.amount.display(config.token_decimals),
            flip.side.to_string(),
            flip.result.to_string(),
            outcome.to_string(),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub async fn handle_leaderboard(ctx: &Context, limit: Option<usize>) -> Result<()> {
    let config = ctx.config()?;
    let entries = ctx.recorder(&config).leaderboard(limit).await?;

    if entries.is_empty() {
        println!("Leaderboard is empty.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Rank", "Wallet", "Wins", "Flips", "Streak", "Best"]);

    for (rank, entry) in entries.iter().enumerate() {
        table.add_row(vec![
            (rank + 1).to_string(),
            entry.wallet.short(),
            entry.total_wins.to_string(),
            entry.total_flips.to_string(),
            entry.current_streak.to_string(),
            entry.longest_streak.to_string(),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub async fn handle_stats(ctx: &Context, limit: Option<usize>) -> Result<()> {
    let config = ctx.config()?;
    let stats = ctx.recorder(&config).stats(limit).await?;

    if stats.flips == 0 {
        println!("No flips recorded yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Flips", "Wins", "Win %", "Heads %", "Tails %"]);
    table.add_row(vec![
        stats.flips.to_string(),
        stats.wins.to_string(),
        format!("{:.1}", stats.win_rate()),
        format!("{:.1}", stats.heads_rate()),
        format!("{:.1}", stats.tails_rate()),
    ]);

    println!("{}", table);
    Ok(())
}

/// Settlement journal, including wagers that never reached the ledger.
pub async fn handle_wagers(ctx: &Context, limit: Option<usize>, pending: bool) -> Result<()> {
    let config = ctx.config()?;
    let journal = ctx.journal();
    let wagers = if pending {
        let mut unfinished = Vec::new();
        for state in WagerState::UNFINISHED {
            unfinished.extend(journal.list_by_state(state).await?);
        }
        unfinished
    } else {
        journal
            .list_recent(limit.unwrap_or(config.ledger.page_size))
            .await?
    };

    if wagers.is_empty() {
        println!("No wagers found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Wager", "Wallet", "Bet", "Side", "Result", "State", "Note"]);

    for wager in wagers {
        table.add_row(vec![
            wager.id.to_string(),
            wager.wallet.short(),
            wager.amount.display(config.token_decimals),
            wager.side.to_string(),
            wager.result.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
            wager.state.to_string(),
            wager.failure.unwrap_or_default(),
        ]);
    }

    println!("{}", table);
    Ok(())
}
