//! Ledger state transitions for coin and token transactions.
//!
//! The engine only ever writes through the store it is handed, which in
//! block production is the open unit of work; a failure part-way through a
//! transaction leaves nothing behind once that unit is dropped.

use thiserror::Error;
use tokenchain_core::{
    Account, Address, BlockchainState, ChainId, Token, TokenId, Transaction, TransactionError,
};
use tokenchain_storage::{AccountStore, KvStore, StorageError, TokenStore};
use tracing::debug;

/// Errors that can occur while applying a transaction to the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("sender account {0} does not exist")]
    UnknownSender(Address),

    #[error("insufficient balance (required {required}, available {available})")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("value {value} does not cover the transaction fee {fee}")]
    FeeExceedsValue { value: u64, fee: u64 },

    #[error("balance of {0} would overflow")]
    BalanceOverflow(Address),

    #[error("token {token_id} nonce {got} is not above stored nonce {stored}")]
    StaleTokenNonce {
        token_id: TokenId,
        stored: u64,
        got: u64,
    },

    #[error("malformed transaction: {0}")]
    Malformed(#[from] TransactionError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl LedgerError {
    /// Whether retrying the same transaction can never succeed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LedgerError::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// What applying one transaction produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerOutcome {
    /// Fee moved to the authority.
    pub fee: u64,
    /// `latest_token_id` after this transaction.
    pub latest_token_id: TokenId,
}

/// Mutates accounts and tokens of one chain.
#[derive(Debug, Clone, Copy)]
pub struct LedgerEngine {
    chain_id: ChainId,
    /// Receives every fee.
    authority: Address,
}

impl LedgerEngine {
    pub fn new(chain_id: ChainId, authority: Address) -> Self {
        Self {
            chain_id,
            authority,
        }
    }

    /// Apply `tx` on top of the chain head `head`.
    pub fn apply<S: KvStore>(
        &self,
        store: &S,
        tx: &Transaction,
        head: &BlockchainState,
    ) -> Result<LedgerOutcome> {
        if tx.is_token() {
            self.apply_token(store, tx, head)
        } else {
            self.apply_coin(store, tx, head)
        }
    }

    /// Sender pays `value`; the recipient receives `value - fee`; the
    /// authority receives `fee`.
    fn apply_coin<S: KvStore>(
        &self,
        store: &S,
        tx: &Transaction,
        head: &BlockchainState,
    ) -> Result<LedgerOutcome> {
        let fee = head.transaction_fee;
        let amount = tx.value.checked_sub(fee).ok_or(LedgerError::FeeExceedsValue {
            value: tx.value,
            fee,
        })?;

        let accounts = AccountStore::new(store, self.chain_id);
        self.debit_sender(&accounts, &tx.from, tx.value)?;
        self.credit(&accounts, &tx.to, amount)?;
        self.credit(&accounts, &self.authority, fee)?;

        debug!(from = %tx.from, to = %tx.to, amount, fee, "coin transfer applied");
        Ok(LedgerOutcome {
            fee,
            latest_token_id: head.latest_token_id,
        })
    }

    /// Sender pays the fee carried in `value`; the token moves to `to`
    /// (the burn address for a burn) if its nonce moved forward.
    fn apply_token<S: KvStore>(
        &self,
        store: &S,
        tx: &Transaction,
        head: &BlockchainState,
    ) -> Result<LedgerOutcome> {
        let (token_id, metadata_uri, token_nonce) = tx.token_fields()?;
        let fee = tx.value;

        let accounts = AccountStore::new(store, self.chain_id);
        self.debit_sender(&accounts, &tx.from, fee)?;
        if !accounts.exists(&tx.to)? {
            accounts.upsert(&Account::new(self.chain_id, tx.to))?;
        }
        self.credit(&accounts, &self.authority, fee)?;

        let tokens = TokenStore::new(store);
        let token = Token::new(token_id, tx.to, metadata_uri, token_nonce);
        if !tokens.upsert_if_nonce_gt(&token)? {
            let stored = tokens.get(token_id)?.map(|t| t.nonce).unwrap_or_default();
            return Err(LedgerError::StaleTokenNonce {
                token_id,
                stored,
                got: token_nonce,
            });
        }

        debug!(token_id, owner = %tx.to, token_nonce, "token write applied");
        Ok(LedgerOutcome {
            fee,
            latest_token_id: head.latest_token_id.max(token_id),
        })
    }

    /// Debit `amount` from the sender and bump its nonce.
    fn debit_sender<S: KvStore>(
        &self,
        accounts: &AccountStore<'_, S>,
        address: &Address,
        amount: u64,
    ) -> Result<()> {
        let mut sender = accounts
            .get(address)?
            .ok_or(LedgerError::UnknownSender(*address))?;
        if !sender.debit(amount) {
            return Err(LedgerError::InsufficientBalance {
                required: amount,
                available: sender.balance,
            });
        }
        sender.increment_nonce();
        accounts.upsert(&sender)?;
        Ok(())
    }

    /// Credit `amount`, creating the account first if needed.
    ///
    /// Reads the account fresh, so sender, recipient and authority may be
    /// the same address.
    fn credit<S: KvStore>(
        &self,
        accounts: &AccountStore<'_, S>,
        address: &Address,
        amount: u64,
    ) -> Result<()> {
        let mut account = accounts.get_or_new(address)?;
        if !account.credit(amount) {
            return Err(LedgerError::BalanceOverflow(*address));
        }
        accounts.upsert(&account)?;
        Ok(())
    }
}
