//! Account state.

use crate::crypto::Address;
use serde::{Deserialize, Serialize};

/// Identifier of a chain; every record carries the chain it belongs to.
pub type ChainId = u16;

/// A coin-holding account.
///
/// Accounts come into existence on their first credit (or at genesis) and are
/// never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub chain_id: ChainId,
    pub address: Address,
    pub balance: u64,
    /// Number of transactions this account has sent.
    pub nonce: u64,
}

impl Account {
    /// A fresh, empty account.
    pub fn new(chain_id: ChainId, address: Address) -> Self {
        Self::with_balance(chain_id, address, 0)
    }

    pub fn with_balance(chain_id: ChainId, address: Address, balance: u64) -> Self {
        Self {
            chain_id,
            address,
            balance,
            nonce: 0,
        }
    }

    /// The nonce the next transaction from this account must carry.
    pub fn next_nonce(&self) -> u64 {
        self.nonce.saturating_add(1)
    }

    pub fn increment_nonce(&mut self) {
        self.nonce = self.nonce.saturating_add(1);
    }

    /// Add to the balance. Returns false (and leaves the balance unchanged)
    /// on overflow.
    pub fn credit(&mut self, amount: u64) -> bool {
        match self.balance.checked_add(amount) {
            Some(balance) => {
                self.balance = balance;
                true
            }
            None => false,
        }
    }

    /// Subtract from the balance. Returns false if the balance is too small.
    pub fn debit(&mut self, amount: u64) -> bool {
        if self.balance >= amount {
            self.balance -= amount;
            true
        } else {
            false
        }
    }

    pub fn has_balance(&self, amount: u64) -> bool {
        self.balance >= amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        Address::from_bytes([0xAA; 20])
    }

    #[test]
    fn test_new_account_is_empty() {
        let account = Account::new(1, addr());
        assert_eq!(account.balance, 0);
        assert_eq!(account.nonce, 0);
        assert_eq!(account.next_nonce(), 1);
    }

    #[test]
    fn test_nonce_increment() {
        let mut account = Account::new(1, addr());
        account.increment_nonce();
        account.increment_nonce();
        assert_eq!(account.nonce, 2);
        assert_eq!(account.next_nonce(), 3);
    }

    #[test]
    fn test_credit_and_debit() {
        let mut account = Account::with_balance(1, addr(), 100);

        assert!(account.credit(50));
        assert_eq!(account.balance, 150);

        assert!(account.debit(100));
        assert_eq!(account.balance, 50);

        assert!(!account.debit(100));
        assert_eq!(account.balance, 50);
    }

    #[test]
    fn test_credit_overflow_is_refused() {
        let mut account = Account::with_balance(1, addr(), u64::MAX);
        assert!(!account.credit(1));
        assert_eq!(account.balance, u64::MAX);
    }

    #[test]
    fn test_has_balance() {
        let account = Account::with_balance(1, addr(), 100);
        assert!(account.has_balance(100));
        assert!(!account.has_balance(101));
    }
}
