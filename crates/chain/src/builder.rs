//! Client-side transaction builders.
//!
//! Each builder checks its inputs against the ledger, picks the next nonce
//! (and for mints the next token id) taking still-pending mempool entries
//! into account, signs through a [`SigningOracle`], validates the result and
//! enqueues it.
//!
//! Every builder holds the sender's account lock from reading the pending
//! set until the entry is in the mempool. Token builders take
//! `token-services` first and the account lock second.

use crate::lock::{DistributedMutex, LockError, TOKEN_SERVICES_LOCK_KEY};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokenchain_consensus::{TransactionValidator, ValidationError};
use tokenchain_core::{
    hash, Account, Address, ChainId, CryptoError, Hash, Keypair, MempoolTransaction, Signature,
    SignedTransaction, Signer, Token, TokenId, Transaction, TransactionError,
};
use tokenchain_storage::{
    AccountStore, ChainStateStore, MempoolStore, Storage, StorageError, TokenStore,
};
use tracing::info;

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no key for {0}")]
    UnknownKey(Address),

    #[error("wrong password")]
    WrongPassword,

    #[error("signing failed: {0}")]
    Signing(#[from] CryptoError),

    #[error("signed transaction does not verify: {0}")]
    InvalidSignature(#[from] TransactionError),

    #[error("chain {0} is not initialized")]
    ChainNotInitialized(ChainId),

    #[error("account {0} does not exist")]
    UnknownAccount(Address),

    #[error("insufficient balance (required {required}, available {available})")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("token {0} does not exist")]
    TokenNotFound(TokenId),

    #[error("token {0} is burned")]
    TokenBurned(TokenId),

    #[error("token {token_id} is owned by {owner}, not {sender}")]
    NotTokenOwner {
        token_id: TokenId,
        owner: Address,
        sender: Address,
    },

    #[error("{0} overflow")]
    Overflow(&'static str),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),
}

pub type Result<T> = std::result::Result<T, BuilderError>;

fn account_lock_key(address: &Address) -> String {
    format!("account:{}", address)
}

/// Signs digests on behalf of an account holder.
pub trait SigningOracle: Send + Sync {
    fn sign(&self, address: &Address, password: &str, digest: &Hash) -> Result<Signature>;
}

struct StoredKey {
    password_digest: Hash,
    keypair: Keypair,
}

/// Password-protected keys held in memory.
#[derive(Default)]
pub struct MemoryKeystore {
    keys: RwLock<HashMap<Address, StoredKey>>,
}

impl MemoryKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, keypair: Keypair, password: &str) -> Address {
        let address = keypair.address();
        let stored = StoredKey {
            password_digest: hash(password.as_bytes()),
            keypair,
        };
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, stored);
        address
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(address)
    }
}

impl SigningOracle for MemoryKeystore {
    fn sign(&self, address: &Address, password: &str, digest: &Hash) -> Result<Signature> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        let stored = keys.get(address).ok_or(BuilderError::UnknownKey(*address))?;
        if hash(password.as_bytes()) != stored.password_digest {
            return Err(BuilderError::WrongPassword);
        }
        Ok(stored.keypair.sign_hash(digest)?)
    }
}

#[derive(Debug, Clone)]
pub struct CoinTransfer {
    pub from: Address,
    pub to: Address,
    /// Delivered to `to`; the fee comes on top.
    pub amount: u64,
    pub password: String,
}

/// Minted by the authority.
#[derive(Debug, Clone)]
pub struct TokenMint {
    pub to: Address,
    pub metadata_uri: String,
    /// Unlocks the authority's key.
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct TokenTransfer {
    pub from: Address,
    pub to: Address,
    pub token_id: TokenId,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct TokenBurn {
    pub from: Address,
    pub token_id: TokenId,
    pub password: String,
}

/// What the mempool already holds on top of the committed ledger.
struct Pending {
    entries: Vec<MempoolTransaction>,
}

impl Pending {
    fn load(storage: &Storage, chain_id: ChainId) -> Result<Self> {
        let entries = MempoolStore::new(storage)
            .list()?
            .into_iter()
            .filter(|entry| entry.chain_id == chain_id)
            .collect();
        Ok(Self { entries })
    }

    fn next_nonce(&self, account: &Account) -> Result<u64> {
        self.entries
            .iter()
            .filter(|entry| entry.from == account.address)
            .map(|entry| entry.nonce)
            .fold(account.nonce, u64::max)
            .checked_add(1)
            .ok_or(BuilderError::Overflow("account nonce"))
    }

    /// Balance not yet spoken for by pending transactions.
    fn available(&self, account: &Account) -> u64 {
        let committed: u64 = self
            .entries
            .iter()
            .filter(|entry| entry.from == account.address)
            .fold(0u64, |sum, entry| sum.saturating_add(entry.value));
        account.balance.saturating_sub(committed)
    }

    fn next_token_nonce(&self, token: &Token) -> Result<u64> {
        self.entries
            .iter()
            .filter(|entry| entry.token_id == Some(token.id))
            .filter_map(|entry| entry.token_nonce)
            .fold(token.nonce, u64::max)
            .checked_add(1)
            .ok_or(BuilderError::Overflow("token nonce"))
    }

    fn next_token_id(&self, latest: TokenId) -> Result<TokenId> {
        self.entries
            .iter()
            .filter_map(|entry| entry.token_id)
            .fold(latest, u64::max)
            .checked_add(1)
            .ok_or(BuilderError::Overflow("token id"))
    }
}

/// Builds, signs and enqueues transactions for one chain.
pub struct TransactionBuilder {
    storage: Storage,
    chain_id: ChainId,
    authority: Address,
    oracle: Arc<dyn SigningOracle>,
    lock: Arc<dyn DistributedMutex>,
    validator: TransactionValidator,
}

impl TransactionBuilder {
    pub fn new(
        storage: Storage,
        chain_id: ChainId,
        authority: Address,
        oracle: Arc<dyn SigningOracle>,
        lock: Arc<dyn DistributedMutex>,
    ) -> Self {
        Self {
            storage,
            chain_id,
            authority,
            oracle,
            lock,
            validator: TransactionValidator::new(chain_id),
        }
    }

    /// Send `amount` coins; the sender pays `amount` plus the current fee.
    pub async fn transfer_coin(&self, request: CoinTransfer) -> Result<MempoolTransaction> {
        if request.amount == 0 {
            return Err(BuilderError::InvalidInput("amount must be positive".into()));
        }

        let _account = self.lock.acquire(&account_lock_key(&request.from)).await?;

        let fee = self.transaction_fee()?;
        let value = request
            .amount
            .checked_add(fee)
            .ok_or(BuilderError::Overflow("transaction value"))?;

        let pending = Pending::load(&self.storage, self.chain_id)?;
        let sender = self.funded_account(&request.from, value, &pending)?;
        let nonce = pending.next_nonce(&sender)?;

        let tx = Transaction::coin(self.chain_id, nonce, request.from, request.to, value);
        self.sign_and_submit(tx, &request.password).await
    }

    /// Mint a new token to `to`, signed by the authority.
    pub async fn mint_token(&self, request: TokenMint) -> Result<MempoolTransaction> {
        if request.metadata_uri.trim().is_empty() {
            return Err(BuilderError::InvalidInput("metadata uri is empty".into()));
        }
        if request.to == Address::BURN {
            return Err(BuilderError::InvalidInput("cannot mint to the burn address".into()));
        }

        let _services = self.lock.acquire(TOKEN_SERVICES_LOCK_KEY).await?;
        let _account = self.lock.acquire(&account_lock_key(&self.authority)).await?;

        let fee = self.transaction_fee()?;
        let pending = Pending::load(&self.storage, self.chain_id)?;
        let authority = self.funded_account(&self.authority, fee, &pending)?;
        let nonce = pending.next_nonce(&authority)?;
        let token_id = pending.next_token_id(self.latest_token_id()?)?;

        let tx = Transaction::token(
            self.chain_id,
            nonce,
            self.authority,
            request.to,
            fee,
            token_id,
            request.metadata_uri,
            0,
        );
        self.sign_and_submit(tx, &request.password).await
    }

    pub async fn transfer_token(&self, request: TokenTransfer) -> Result<MempoolTransaction> {
        if request.to == Address::BURN {
            return Err(BuilderError::InvalidInput(
                "use a burn to send a token to the burn address".into(),
            ));
        }
        self.move_token(request.from, request.to, request.token_id, &request.password)
            .await
    }

    /// Send the token to the all-zero burn address.
    pub async fn burn_token(&self, request: TokenBurn) -> Result<MempoolTransaction> {
        self.move_token(request.from, Address::BURN, request.token_id, &request.password)
            .await
    }

    async fn move_token(
        &self,
        from: Address,
        to: Address,
        token_id: TokenId,
        password: &str,
    ) -> Result<MempoolTransaction> {
        let _services = self.lock.acquire(TOKEN_SERVICES_LOCK_KEY).await?;
        let _account = self.lock.acquire(&account_lock_key(&from)).await?;

        let token = TokenStore::new(&self.storage)
            .get(token_id)?
            .ok_or(BuilderError::TokenNotFound(token_id))?;
        if token.is_burned() {
            return Err(BuilderError::TokenBurned(token_id));
        }
        if token.owner != from {
            return Err(BuilderError::NotTokenOwner {
                token_id,
                owner: token.owner,
                sender: from,
            });
        }

        let fee = self.transaction_fee()?;
        let pending = Pending::load(&self.storage, self.chain_id)?;
        let sender = self.funded_account(&from, fee, &pending)?;
        let nonce = pending.next_nonce(&sender)?;
        let token_nonce = pending.next_token_nonce(&token)?;

        let tx = Transaction::token(
            self.chain_id,
            nonce,
            from,
            to,
            fee,
            token_id,
            token.metadata_uri,
            token_nonce,
        );
        self.sign_and_submit(tx, password).await
    }

    fn transaction_fee(&self) -> Result<u64> {
        Ok(ChainStateStore::new(&self.storage)
            .get_by_chain_id(self.chain_id)?
            .ok_or(BuilderError::ChainNotInitialized(self.chain_id))?
            .transaction_fee)
    }

    fn latest_token_id(&self) -> Result<TokenId> {
        let head = ChainStateStore::new(&self.storage)
            .get_by_chain_id(self.chain_id)?
            .ok_or(BuilderError::ChainNotInitialized(self.chain_id))?;
        let stored = TokenStore::new(&self.storage).latest_id()?;
        Ok(head.latest_token_id.max(stored))
    }

    /// The sender's account, if it can cover `required` after its pending
    /// transactions.
    fn funded_account(
        &self,
        address: &Address,
        required: u64,
        pending: &Pending,
    ) -> Result<Account> {
        let account = AccountStore::new(&self.storage, self.chain_id)
            .get(address)?
            .ok_or(BuilderError::UnknownAccount(*address))?;
        let available = pending.available(&account);
        if available < required {
            return Err(BuilderError::InsufficientBalance {
                required,
                available,
            });
        }
        Ok(account)
    }

    async fn sign_and_submit(&self, tx: Transaction, password: &str) -> Result<MempoolTransaction> {
        let nonce = tx.nonce;
        let signature = self.oracle.sign(&tx.from, password, &tx.signing_hash())?;
        let signed = SignedTransaction::new(tx, signature);
        signed.verify()?;

        let mempool = MempoolStore::new(&self.storage);
        let entry = mempool.prepare(signed)?;
        self.validator
            .validate_queued(&self.storage, &entry, nonce)?;
        mempool.upsert(&entry)?;

        info!(
            tx_id = entry.id,
            kind = ?entry.kind,
            nonce,
            from = %entry.from,
            to = %entry.to,
            value = entry.value,
            "transaction submitted"
        );
        Ok(entry)
    }
}
