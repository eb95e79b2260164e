//! Run the authority node.

use super::{load_config, load_key, open_storage};
use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::path::Path;
use tokenchain_chain::Node;
use tokenchain_consensus::Authority;
use tokio::sync::watch;
use tracing::{info, warn};

pub async fn run(data_dir: &Path) -> Result<()> {
    let config = load_config(data_dir)?;
    let keypair = load_key(data_dir, &config.authority_key)?;
    if keypair.address() != config.authority_address()? {
        bail!(
            "Key '{}' does not belong to the configured authority {}",
            config.authority_key,
            config.authority
        );
    }
    let storage = open_storage(data_dir)?;

    println!("{}", "Starting tokenchain node...".bold().cyan());
    println!("  Chain:     {}", config.chain_id.to_string().bright_cyan());
    println!("  Authority: {}", config.authority.bright_yellow());
    println!("  Channel:   {}", config.state_channel.bright_black());
    println!("  Press Ctrl-C to stop.");
    println!();

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown requested"),
            Err(err) => warn!(error = %err, "failed to listen for Ctrl-C; stopping"),
        }
        let _ = stop.send(true);
    });

    let authority = Authority::new(config.authority_key.clone(), keypair);
    Node::new(storage, &config, authority)
        .run(shutdown)
        .await
        .context("Node stopped with an error")?;

    println!("{}  Node stopped", "✓".green().bold());
    Ok(())
}
