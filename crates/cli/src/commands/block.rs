//! Block operations command.

use super::{load_config, open_storage};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::Path;
use tokenchain_consensus::BlockVerifier;
use tokenchain_core::{BlockData, Hash};
use tokenchain_storage::{BlockStore, ChainStateStore, Storage};

#[derive(Args)]
pub struct BlockArgs {
    #[command(subcommand)]
    command: BlockCommand,
}

#[derive(Subcommand)]
enum BlockCommand {
    /// List recent blocks
    List {
        /// Number of blocks to show
        #[arg(short, long, default_value = "10")]
        count: usize,
    },
    /// Show detailed block information
    Info {
        /// Block number or hash (hex format)
        block_id: String,
    },
    /// Re-check stored blocks: hashes, Merkle roots, work, signatures and links
    Verify {
        /// Only this block number; the whole chain otherwise
        number: Option<u64>,
    },
}

pub fn run(args: BlockArgs, data_dir: &Path) -> Result<()> {
    let config = load_config(data_dir)?;
    let storage = open_storage(data_dir)?;
    let head = ChainStateStore::new(&storage)
        .get_by_chain_id(config.chain_id)?
        .context("Chain has no head. Did you run 'tokenchain init'?")?;

    match args.command {
        BlockCommand::List { count } => list_blocks(&storage, head.latest_block_number, count),
        BlockCommand::Info { block_id } => show_block_info(&storage, &block_id),
        BlockCommand::Verify { number } => verify(&storage, head.latest_block_number, number),
    }
}

fn format_timestamp(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn list_blocks(storage: &Storage, latest: u64, count: usize) -> Result<()> {
    println!();
    println!("{}", "Recent Blocks:".bold().cyan());
    println!();

    for block in BlockStore::new(storage).recent(latest, count)? {
        println!(
            "  {} {} {} {}",
            format!("#{}", block.number()).bright_black(),
            block.hash.to_hex()[..18].bright_yellow(),
            format!("({} txs)", block.transactions.len()).bright_black(),
            format_timestamp(block.header.timestamp).bright_black()
        );
    }

    println!();
    Ok(())
}

fn find_block(storage: &Storage, block_id: &str) -> Result<BlockData> {
    let blocks = BlockStore::new(storage);
    let block = if let Ok(number) = block_id.parse::<u64>() {
        blocks.get_by_number(number)?
    } else {
        let hash = Hash::from_hex(block_id)
            .with_context(|| format!("Invalid block hash: {}", block_id))?;
        blocks.get_by_hash(&hash)?
    };
    block.with_context(|| format!("Block not found: {}", block_id))
}

fn show_block_info(storage: &Storage, block_id: &str) -> Result<()> {
    let block = find_block(storage, block_id)?;
    let header = &block.header;

    println!();
    println!("{}", "Block Information:".bold().cyan());
    println!();
    println!("  Number:       {}", header.number.to_string().bright_cyan());
    println!("  Hash:         {}", block.hash.to_hex().bright_yellow());
    println!("  Parent Hash:  {}", header.prev_hash.to_hex().bright_black());
    println!(
        "  Timestamp:    {}",
        format_timestamp(header.timestamp).bright_black()
    );
    println!("  Validator:    {}", block.validator.id.bright_black());
    println!("  Beneficiary:  {}", header.beneficiary.to_hex().bright_yellow());
    println!(
        "  Difficulty:   {}",
        header.difficulty.to_string().bright_cyan()
    );
    println!("  Nonce:        {}", header.nonce.to_string().bright_cyan());
    println!(
        "  Fee:          {}",
        header.transaction_fee.to_string().bright_cyan()
    );
    println!("  State Root:   {}", header.state_root.to_hex().bright_black());
    println!("  Tokens Root:  {}", header.tokens_root.to_hex().bright_black());
    println!(
        "  Tx Root:      {}",
        header.transactions_root.to_hex().bright_black()
    );
    println!(
        "  Latest Token: {}",
        header.latest_token_id.to_string().bright_cyan()
    );
    println!(
        "  Transactions: {}",
        block.transactions.len().to_string().bright_cyan()
    );
    println!();

    if !block.transactions.is_empty() {
        println!("{}", "Transactions:".bold());
        println!();
        for (i, tx) in block.transactions.iter().enumerate() {
            let signed = &tx.signed;
            println!(
                "  {} {} {:?} {} → {} value {} fee {}",
                format!("{}.", i + 1).bright_black(),
                signed.hash().to_hex()[..18].bright_yellow(),
                signed.kind,
                signed.from.to_hex().bright_black(),
                signed.to.to_hex().bright_black(),
                signed.value,
                tx.fee
            );
            if let Some(token_id) = signed.token_id {
                println!("       token #{}", token_id);
            }
        }
        println!();
    }

    Ok(())
}

fn verify(storage: &Storage, latest: u64, only: Option<u64>) -> Result<()> {
    let blocks = BlockStore::new(storage);
    let numbers = match only {
        Some(number) => number..=number,
        None => 0..=latest,
    };

    let mut checked = 0;
    for number in numbers {
        let block = blocks
            .get_by_number(number)?
            .with_context(|| format!("Block #{} is missing", number))?;

        let result = if number == 0 {
            BlockVerifier::verify_block(&block)
        } else {
            let parent = blocks
                .get_by_hash(&block.header.prev_hash)?
                .with_context(|| format!("Parent of block #{} is missing", number))?;
            BlockVerifier::verify_child(&block, &parent)
        };
        if let Err(err) = result {
            bail!("Block #{} failed verification: {}", number, err);
        }
        checked += 1;
    }

    println!(
        "{}  {} block(s) verified",
        "✓".green().bold(),
        checked.to_string().bright_cyan()
    );
    Ok(())
}
