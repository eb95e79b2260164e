//! Coin transaction command.

use super::{builder, load_config, load_key, open_storage, resolve_address, SESSION_PASSWORD};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::Path;
use tokenchain_chain::CoinTransfer;
use tokenchain_core::MempoolTransaction;

#[derive(Args)]
pub struct TxArgs {
    #[command(subcommand)]
    command: TxCommand,
}

#[derive(Subcommand)]
enum TxCommand {
    /// Queue a coin transfer
    Send {
        /// Sender key name
        #[arg(short, long)]
        from: String,

        /// Recipient address (hex) or key name
        #[arg(short, long)]
        to: String,

        /// Amount delivered to the recipient; the fee is added on top
        #[arg(short, long)]
        amount: u64,
    },
}

pub async fn run(args: TxArgs, data_dir: &Path) -> Result<()> {
    match args.command {
        TxCommand::Send { from, to, amount } => send(data_dir, &from, &to, amount).await,
    }
}

async fn send(data_dir: &Path, from: &str, to: &str, amount: u64) -> Result<()> {
    let config = load_config(data_dir)?;
    let sender = load_key(data_dir, from)?;
    let to = resolve_address(data_dir, to)?;
    let storage = open_storage(data_dir)?;

    let request = CoinTransfer {
        from: sender.address(),
        to,
        amount,
        password: SESSION_PASSWORD.into(),
    };
    let entry = builder(&storage, &config, sender)?
        .transfer_coin(request)
        .await
        .context("Transfer rejected")?;
    storage.flush()?;

    print_queued(&entry);
    Ok(())
}

pub(super) fn print_queued(entry: &MempoolTransaction) {
    println!();
    println!("{}  Transaction queued", "✓".green().bold());
    println!("    Id:    {}", entry.id.to_string().bright_cyan());
    println!("    Hash:  {}", entry.hash().to_hex().bright_yellow());
    println!("    From:  {}", entry.from.to_hex().bright_yellow());
    println!("    To:    {}", entry.to.to_hex().bright_yellow());
    println!("    Value: {}", entry.value.to_string().bright_cyan());
    println!("    Nonce: {}", entry.nonce.to_string().bright_cyan());
    println!();
    println!(
        "It will be included once {} processes the mempool.",
        "tokenchain run".bright_cyan()
    );
}
