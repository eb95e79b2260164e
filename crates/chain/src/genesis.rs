//! Chain initialisation.

use crate::config::{ChainConfig, ConfigError};
use thiserror::Error;
use tokenchain_consensus::Authority;
use tokenchain_core::{
    genesis_block, Account, Address, BlockData, BlockchainState, ChainId, CryptoError, GenesisSpec,
};
use tokenchain_storage::{
    AccountStore, BlockStore, ChainStateStore, Storage, StorageError, TokenStore, UnitOfWork,
};
use tracing::info;

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("chain {0} is already initialized")]
    AlreadyInitialized(ChainId),

    #[error("configured authority {configured} does not match key {key}")]
    AuthorityMismatch { configured: Address, key: Address },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("signing failed: {0}")]
    Signing(#[from] CryptoError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Write the authority account, block 0 and the initial chain head, all in
/// one unit of work.
pub fn initialize(
    storage: &Storage,
    config: &ChainConfig,
    authority: &Authority,
) -> Result<BlockData, GenesisError> {
    let configured = config.authority_address()?;
    if configured != authority.address() {
        return Err(GenesisError::AuthorityMismatch {
            configured,
            key: authority.address(),
        });
    }

    let uow = UnitOfWork::begin(storage);
    let heads = ChainStateStore::new(&uow);
    if heads.get_by_chain_id(config.chain_id)?.is_some() {
        return Err(GenesisError::AlreadyInitialized(config.chain_id));
    }

    let accounts = AccountStore::new(&uow, config.chain_id);
    accounts.upsert(&Account::with_balance(
        config.chain_id,
        configured,
        config.initial_supply,
    ))?;

    let spec = GenesisSpec {
        chain_id: config.chain_id,
        authority: configured,
        difficulty: config.difficulty,
        transaction_fee: config.transaction_fee,
        state_root: accounts.hash_state()?,
        tokens_root: TokenStore::new(&uow).hash_state()?,
    };
    let genesis = genesis_block(&spec, authority.signer(), authority.validator().clone())?;

    BlockStore::new(&uow).upsert(&genesis)?;
    heads.upsert_by_chain_id(&BlockchainState {
        chain_id: config.chain_id,
        latest_hash: genesis.hash,
        latest_block_number: 0,
        latest_token_id: 0,
        transaction_fee: config.transaction_fee,
    })?;
    uow.commit()?;

    info!(
        chain_id = config.chain_id,
        hash = %genesis.hash,
        authority = %configured,
        supply = config.initial_supply,
        "genesis block written"
    );
    Ok(genesis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenchain_consensus::BlockVerifier;
    use tokenchain_core::Keypair;

    fn config(authority: &Authority) -> ChainConfig {
        ChainConfig {
            chain_id: 1,
            authority: authority.address().to_hex(),
            authority_key: "authority".into(),
            transaction_fee: 1,
            difficulty: 1,
            initial_supply: 1_000,
            state_channel: "chain-state".into(),
        }
    }

    #[test]
    fn test_initialize_writes_block_and_head() {
        let storage = Storage::open_temporary().unwrap();
        let authority = Authority::new("authority", Keypair::generate());

        let genesis = initialize(&storage, &config(&authority), &authority).unwrap();
        BlockVerifier::verify_block(&genesis).unwrap();

        let head = ChainStateStore::new(&storage).get_by_chain_id(1).unwrap().unwrap();
        assert_eq!(head.latest_hash, genesis.hash);
        assert_eq!(head.latest_block_number, 0);

        let account = AccountStore::new(&storage, 1)
            .get(&authority.address())
            .unwrap()
            .unwrap();
        assert_eq!(account.balance, 1_000);
        assert_eq!(
            genesis.header.state_root,
            AccountStore::new(&storage, 1).hash_state().unwrap()
        );
    }

    #[test]
    fn test_initialize_twice_fails() {
        let storage = Storage::open_temporary().unwrap();
        let authority = Authority::new("authority", Keypair::generate());
        initialize(&storage, &config(&authority), &authority).unwrap();

        assert!(matches!(
            initialize(&storage, &config(&authority), &authority),
            Err(GenesisError::AlreadyInitialized(1))
        ));
    }

    #[test]
    fn test_authority_mismatch() {
        let storage = Storage::open_temporary().unwrap();
        let authority = Authority::new("authority", Keypair::generate());
        let other = Authority::new("other", Keypair::generate());

        assert!(matches!(
            initialize(&storage, &config(&other), &authority),
            Err(GenesisError::AuthorityMismatch { .. })
        ));
        assert!(ChainStateStore::new(&storage).get_by_chain_id(1).unwrap().is_none());
    }
}
