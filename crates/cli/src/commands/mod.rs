//! CLI commands module.

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenchain_chain::{
    load_keypair, ChainConfig, KeyFile, KeyedMutex, MemoryKeystore, TransactionBuilder,
};
use tokenchain_core::{Address, Keypair};
use tokenchain_storage::Storage;

mod account;
mod block;
mod init;
mod run;
mod token;
mod tx;

/// Key files are stored unencrypted, so the CLI unlocks them with an empty
/// keystore password.
const SESSION_PASSWORD: &str = "";

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new chain
    Init(init::InitArgs),
    /// Run the authority node
    Run,
    /// Account management
    Account(account::AccountArgs),
    /// Coin transactions
    Tx(tx::TxArgs),
    /// Token operations
    Token(token::TokenArgs),
    /// Block operations
    Block(block::BlockArgs),
}

pub async fn run(cmd: Commands, data_dir: &Path) -> Result<()> {
    match cmd {
        Commands::Init(args) => init::run(args, data_dir),
        Commands::Run => run::run(data_dir).await,
        Commands::Account(args) => account::run(args, data_dir),
        Commands::Tx(args) => tx::run(args, data_dir).await,
        Commands::Token(args) => token::run(args, data_dir).await,
        Commands::Block(args) => block::run(args, data_dir),
    }
}

fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("db")
}

/// Open the database of an initialized data directory.
fn open_storage(data_dir: &Path) -> Result<Storage> {
    Storage::open(db_path(data_dir)).with_context(|| {
        format!(
            "Failed to open storage in {}. Did you run 'tokenchain init'? Is the node running?",
            data_dir.display()
        )
    })
}

fn load_config(data_dir: &Path) -> Result<ChainConfig> {
    ChainConfig::load(data_dir).context("Failed to load config.json. Did you run 'tokenchain init'?")
}

fn load_key(data_dir: &Path, name: &str) -> Result<Keypair> {
    load_keypair(data_dir, name).with_context(|| {
        format!(
            "Failed to load key '{}'. Use 'tokenchain account new' to create one.",
            name
        )
    })
}

/// Accept either a hex address or the name of a key file.
fn resolve_address(data_dir: &Path, input: &str) -> Result<Address> {
    if let Ok(address) = Address::from_hex(input) {
        return Ok(address);
    }
    let file = KeyFile::load(data_dir, input)
        .with_context(|| format!("'{}' is neither an address nor a key name", input))?;
    Address::from_hex(&file.address).context("Key file holds an invalid address")
}

/// A builder whose keystore holds only `signer`.
fn builder(storage: &Storage, config: &ChainConfig, signer: Keypair) -> Result<TransactionBuilder> {
    let keystore = Arc::new(MemoryKeystore::new());
    keystore.insert(signer, SESSION_PASSWORD);
    Ok(TransactionBuilder::new(
        storage.clone(),
        config.chain_id,
        config.authority_address()?,
        keystore,
        Arc::new(KeyedMutex::new()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_address_accepts_hex_and_key_names() {
        let dir = tempfile::tempdir().unwrap();
        let keypair = Keypair::generate();
        KeyFile::from_keypair(&keypair).save(dir.path(), "alice").unwrap();

        assert_eq!(resolve_address(dir.path(), "alice").unwrap(), keypair.address());
        assert_eq!(
            resolve_address(dir.path(), &keypair.address().to_hex()).unwrap(),
            keypair.address()
        );
        assert!(resolve_address(dir.path(), "bob").is_err());
    }
}
