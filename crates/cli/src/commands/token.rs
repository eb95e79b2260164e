//! Token operations command.

use super::{builder, load_config, load_key, open_storage, resolve_address, SESSION_PASSWORD};
use crate::commands::tx::print_queued;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::Path;
use tokenchain_chain::{TokenBurn, TokenMint, TokenTransfer};
use tokenchain_core::TokenId;
use tokenchain_storage::TokenStore;

#[derive(Args)]
pub struct TokenArgs {
    #[command(subcommand)]
    command: TokenCommand,
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Mint a new token (signed by the authority key)
    Mint {
        /// Recipient address (hex) or key name
        #[arg(short, long)]
        to: String,

        /// Metadata URI
        #[arg(short, long)]
        uri: String,
    },
    /// Transfer a token you own
    Transfer {
        /// Owner key name
        #[arg(short, long)]
        from: String,

        /// Recipient address (hex) or key name
        #[arg(short, long)]
        to: String,

        /// Token id
        #[arg(long)]
        id: TokenId,
    },
    /// Burn a token you own
    Burn {
        /// Owner key name
        #[arg(short, long)]
        from: String,

        /// Token id
        #[arg(long)]
        id: TokenId,
    },
    /// List tokens
    List {
        /// Only tokens owned by this address (hex) or key name
        #[arg(short, long)]
        owner: Option<String>,
    },
}

pub async fn run(args: TokenArgs, data_dir: &Path) -> Result<()> {
    match args.command {
        TokenCommand::Mint { to, uri } => mint(data_dir, &to, uri).await,
        TokenCommand::Transfer { from, to, id } => transfer(data_dir, &from, &to, id).await,
        TokenCommand::Burn { from, id } => burn(data_dir, &from, id).await,
        TokenCommand::List { owner } => list(data_dir, owner.as_deref()),
    }
}

async fn mint(data_dir: &Path, to: &str, uri: String) -> Result<()> {
    let config = load_config(data_dir)?;
    let authority = load_key(data_dir, &config.authority_key)?;
    let to = resolve_address(data_dir, to)?;
    let storage = open_storage(data_dir)?;

    let entry = builder(&storage, &config, authority)?
        .mint_token(TokenMint {
            to,
            metadata_uri: uri,
            password: SESSION_PASSWORD.into(),
        })
        .await
        .context("Mint rejected")?;
    storage.flush()?;

    if let Some(id) = entry.token_id {
        println!("  Token id: {}", id.to_string().bright_cyan());
    }
    print_queued(&entry);
    Ok(())
}

async fn transfer(data_dir: &Path, from: &str, to: &str, token_id: TokenId) -> Result<()> {
    let config = load_config(data_dir)?;
    let owner = load_key(data_dir, from)?;
    let to = resolve_address(data_dir, to)?;
    let storage = open_storage(data_dir)?;

    let request = TokenTransfer {
        from: owner.address(),
        to,
        token_id,
        password: SESSION_PASSWORD.into(),
    };
    let entry = builder(&storage, &config, owner)?
        .transfer_token(request)
        .await
        .context("Token transfer rejected")?;
    storage.flush()?;

    print_queued(&entry);
    Ok(())
}

async fn burn(data_dir: &Path, from: &str, token_id: TokenId) -> Result<()> {
    let config = load_config(data_dir)?;
    let owner = load_key(data_dir, from)?;
    let storage = open_storage(data_dir)?;

    let request = TokenBurn {
        from: owner.address(),
        token_id,
        password: SESSION_PASSWORD.into(),
    };
    let entry = builder(&storage, &config, owner)?
        .burn_token(request)
        .await
        .context("Burn rejected")?;
    storage.flush()?;

    print_queued(&entry);
    Ok(())
}

fn list(data_dir: &Path, owner: Option<&str>) -> Result<()> {
    let owner = owner.map(|o| resolve_address(data_dir, o)).transpose()?;
    let storage = open_storage(data_dir)?;
    let tokens = TokenStore::new(&storage);
    let tokens = match owner {
        Some(owner) => tokens.list_by_owner(&owner)?,
        None => tokens.list()?,
    };

    if tokens.is_empty() {
        println!("{}", "No tokens found.".yellow());
        return Ok(());
    }

    println!();
    println!("{}", "Tokens:".bold().cyan());
    println!();
    for token in tokens {
        let owner = if token.is_burned() {
            "burned".red().to_string()
        } else {
            token.owner.to_hex().bright_yellow().to_string()
        };
        println!(
            "  {} {} {} {}",
            format!("#{}", token.id).bright_black(),
            owner,
            token.metadata_uri.bright_cyan(),
            format!("(nonce {})", token.nonce).bright_black()
        );
    }
    println!();

    Ok(())
}
