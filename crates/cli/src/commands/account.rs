//! Account management command.

use super::{load_config, open_storage, resolve_address};
use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::Path;
use tokenchain_chain::{list_key_names, KeyFile};
use tokenchain_core::Keypair;
use tokenchain_storage::{AccountStore, TokenStore};

#[derive(Args)]
pub struct AccountArgs {
    #[command(subcommand)]
    command: AccountCommand,
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Generate a new keypair
    New {
        /// Name for the keypair file
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Check account balance
    Balance {
        /// Account address (hex) or key name
        address: String,
    },
    /// List all keypairs
    List,
}

pub fn run(args: AccountArgs, data_dir: &Path) -> Result<()> {
    match args.command {
        AccountCommand::New { name } => new_keypair(data_dir, name),
        AccountCommand::Balance { address } => check_balance(data_dir, &address),
        AccountCommand::List => list_keypairs(data_dir),
    }
}

fn new_keypair(data_dir: &Path, name: Option<String>) -> Result<()> {
    let keypair = Keypair::generate();
    let address = keypair.address();
    let name = name.unwrap_or_else(|| format!("account_{}", &address.to_hex()[2..10]));

    if KeyFile::path(data_dir, &name).exists() {
        bail!("A key named '{}' already exists", name);
    }
    let file = KeyFile::from_keypair(&keypair);
    let path = file.save(data_dir, &name)?;

    println!("{}", "Generated new keypair:".bold().cyan());
    println!();
    println!("  Name:        {}", name.bright_cyan());
    println!("  Address:     {}", file.address.bright_yellow());
    println!("  Public Key:  {}", file.public_key.bright_black());
    println!();
    println!(
        "{}  Saved to: {}",
        "✓".green().bold(),
        path.display().to_string().bright_black()
    );
    println!();
    println!("{}", "Keep your private key safe!".yellow().bold());

    Ok(())
}

fn check_balance(data_dir: &Path, input: &str) -> Result<()> {
    let address = resolve_address(data_dir, input)?;
    let config = load_config(data_dir)?;
    let storage = open_storage(data_dir)?;

    let account = AccountStore::new(&storage, config.chain_id).get(&address)?;
    let tokens = TokenStore::new(&storage).list_by_owner(&address)?;

    println!();
    println!("  Address: {}", address.to_hex().bright_yellow());
    match account {
        Some(account) => {
            println!("  Balance: {}", account.balance.to_string().bright_cyan());
            println!("  Nonce:   {}", account.nonce.to_string().bright_cyan());
        }
        None => println!("  Balance: {}", "0 (no account yet)".bright_black()),
    }
    println!("  Tokens:  {}", tokens.len().to_string().bright_cyan());
    println!();

    Ok(())
}

fn list_keypairs(data_dir: &Path) -> Result<()> {
    let names = list_key_names(data_dir)?;

    if names.is_empty() {
        println!("{}", "No keypairs found.".yellow());
        println!(
            "Use {} to create a new keypair.",
            "tokenchain account new".bright_cyan()
        );
        return Ok(());
    }

    println!("{}", "Saved Keypairs:".bold().cyan());
    println!();
    for name in names {
        match KeyFile::load(data_dir, &name) {
            Ok(file) => println!(
                "  {} {}",
                format!("{}:", name).bright_black(),
                file.address.bright_yellow()
            ),
            Err(err) => println!(
                "  {} {}",
                format!("{}:", name).bright_black(),
                err.to_string().red()
            ),
        }
    }
    println!();

    Ok(())
}
