//! Initialize chain command.

use super::{db_path, open_storage};
use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use std::fs;
use std::path::Path;
use tokenchain_chain::{genesis, ChainConfig, KeyFile};
use tokenchain_consensus::Authority;
use tokenchain_core::{BlockData, ChainId, Keypair};

#[derive(Args)]
pub struct InitArgs {
    /// Chain identifier
    #[arg(long, default_value = "1")]
    chain_id: ChainId,

    /// Fee charged on every transaction
    #[arg(long, default_value = "1")]
    fee: u64,

    /// Leading zero hex digits required of block hashes
    #[arg(long, default_value = "2")]
    difficulty: u16,

    /// Coins credited to the authority at genesis
    #[arg(long, default_value = "1000000")]
    supply: u64,

    /// Pub/sub channel for chain-head notifications
    #[arg(long, default_value = "chain-state")]
    channel: String,

    /// Name of the authority key file
    #[arg(long, default_value = "authority")]
    authority_name: String,
}

pub fn run(args: InitArgs, data_dir: &Path) -> Result<()> {
    println!("{}", "Initializing tokenchain...".bold().cyan());
    println!();

    let (config, genesis) = initialize(&args, data_dir)?;

    println!("{}  Created data directory", "✓".green().bold());
    println!(
        "{}  Authority: {}",
        "✓".green().bold(),
        config.authority.bright_yellow()
    );
    println!(
        "{}  Saved authority key to: {}",
        "✓".green().bold(),
        KeyFile::path(data_dir, &config.authority_key)
            .display()
            .to_string()
            .bright_black()
    );
    println!(
        "{}  Saved config to: {}",
        "✓".green().bold(),
        ChainConfig::path(data_dir).display().to_string().bright_black()
    );

    println!();
    println!("{}  Created genesis block", "✓".green().bold());
    println!("    Hash:   {}", genesis.hash.to_hex().bright_yellow());
    println!("    Number: {}", "0".bright_cyan());
    println!(
        "    Supply: {}",
        config.initial_supply.to_string().bright_cyan()
    );

    println!();
    println!("{}", "Chain initialized successfully!".green().bold());
    println!();
    println!("Next steps:");
    println!(
        "  • Use {} to create accounts",
        "tokenchain account new".bright_cyan()
    );
    println!(
        "  • Use {} to queue transactions",
        "tokenchain tx send".bright_cyan()
    );
    println!(
        "  • Use {} to produce blocks",
        "tokenchain run".bright_cyan()
    );

    Ok(())
}

/// Write config, authority key and genesis into `data_dir`.
fn initialize(args: &InitArgs, data_dir: &Path) -> Result<(ChainConfig, BlockData)> {
    if ChainConfig::path(data_dir).exists() || db_path(data_dir).exists() {
        bail!(
            "{} already holds a chain; remove it or pick another --data-dir",
            data_dir.display()
        );
    }
    fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

    let keypair = Keypair::generate();
    let config = ChainConfig {
        chain_id: args.chain_id,
        authority: keypair.address().to_hex(),
        authority_key: args.authority_name.clone(),
        transaction_fee: args.fee,
        difficulty: args.difficulty,
        initial_supply: args.supply,
        state_channel: args.channel.clone(),
    };
    config.validate()?;

    KeyFile::from_keypair(&keypair).save(data_dir, &config.authority_key)?;
    config.save(data_dir)?;

    let storage = open_storage(data_dir)?;
    let authority = Authority::new(config.authority_key.clone(), keypair);
    let genesis = genesis::initialize(&storage, &config, &authority)
        .context("Failed to write genesis block")?;
    storage.flush()?;

    Ok((config, genesis))
}
