//! Proof-of-work nonce search.
//!
//! A header satisfies difficulty `d` when its `0x`-prefixed hex hash starts
//! with `"0x"` followed by `d` zeros, i.e. the hash has at least `d` leading
//! zero hex digits. Difficulty 0 accepts any hash.

use crate::{ConsensusError, Result};
use tokenchain_core::{BlockHeader, Hash};
use tokio::sync::watch;
use tracing::debug;

/// Hex digits in a 32-byte hash.
const MAX_DIFFICULTY: u16 = 64;

pub struct ProofOfWork;

impl ProofOfWork {
    pub fn meets_difficulty(hash: &Hash, difficulty: u16) -> bool {
        hash.leading_zero_digits() >= difficulty as usize
    }

    /// Whether `header` (nonce included) satisfies its own difficulty.
    pub fn verify(header: &BlockHeader) -> bool {
        Self::meets_difficulty(&header.hash(), header.difficulty)
    }

    /// Search nonces from 0 upward until the header hash meets
    /// `header.difficulty`, leaving the winning nonce in the header.
    ///
    /// `cancel` is checked before every attempt; once it reads `true` the
    /// search stops with [`ConsensusError::Cancelled`], including when it is
    /// already set on entry.
    pub fn solve(header: &mut BlockHeader, cancel: &watch::Receiver<bool>) -> Result<Hash> {
        if header.difficulty > MAX_DIFFICULTY {
            return Err(ConsensusError::UnreachableDifficulty(header.difficulty));
        }

        header.nonce = 0;
        loop {
            if *cancel.borrow() {
                return Err(ConsensusError::Cancelled);
            }

            let hash = header.hash();
            if Self::meets_difficulty(&hash, header.difficulty) {
                debug!(nonce = header.nonce, %hash, "proof-of-work solved");
                return Ok(hash);
            }

            header.nonce = header
                .nonce
                .checked_add(1)
                .ok_or(ConsensusError::NonceSpaceExhausted)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenchain_core::Address;

    fn header(difficulty: u16) -> BlockHeader {
        BlockHeader {
            chain_id: 1,
            number: 1,
            prev_hash: Hash::ZERO,
            timestamp: 1_700_000_000_000,
            difficulty,
            beneficiary: Address::from_bytes([1u8; 20]),
            transaction_fee: 1,
            state_root: Hash::ZERO,
            transactions_root: Hash::ZERO,
            nonce: 0,
            latest_token_id: 0,
            tokens_root: Hash::ZERO,
        }
    }

    #[test]
    fn test_solve_meets_difficulty() {
        let (_tx, cancel) = watch::channel(false);
        let mut header = header(2);

        let hash = ProofOfWork::solve(&mut header, &cancel).unwrap();
        assert_eq!(hash, header.hash());
        assert!(hash.to_hex().starts_with("0x00"));
        assert!(ProofOfWork::verify(&header));
    }

    #[test]
    fn test_difficulty_zero_accepts_first_nonce() {
        let (_tx, cancel) = watch::channel(false);
        let mut header = header(0);
        header.nonce = 42;

        ProofOfWork::solve(&mut header, &cancel).unwrap();
        assert_eq!(header.nonce, 0);
    }

    #[test]
    fn test_cancelled_before_start() {
        let (tx, cancel) = watch::channel(false);
        tx.send(true).unwrap();

        let mut header = header(1);
        assert!(matches!(
            ProofOfWork::solve(&mut header, &cancel),
            Err(ConsensusError::Cancelled)
        ));
    }

    #[test]
    fn test_cancelled_while_searching() {
        let (tx, cancel) = watch::channel(false);
        let search = std::thread::spawn(move || {
            let mut header = header(40);
            let result = ProofOfWork::solve(&mut header, &cancel);
            (result, header.nonce)
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        let cancelled_at = std::time::Instant::now();
        tx.send(true).unwrap();
        let (result, nonce) = search.join().unwrap();

        assert!(matches!(result, Err(ConsensusError::Cancelled)));
        assert!(nonce > 0, "search had not started");
        assert!(cancelled_at.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_tampered_nonce_fails_verification() {
        let (_tx, cancel) = watch::channel(false);
        let mut header = header(3);
        ProofOfWork::solve(&mut header, &cancel).unwrap();

        // Walk forward until a nonce that does not satisfy the target.
        while ProofOfWork::verify(&header) {
            header.nonce += 1;
        }
        assert!(!ProofOfWork::verify(&header));
    }

    #[test]
    fn test_unreachable_difficulty() {
        let (_tx, cancel) = watch::channel(false);
        let mut header = header(65);
        assert!(matches!(
            ProofOfWork::solve(&mut header, &cancel),
            Err(ConsensusError::UnreachableDifficulty(65))
        ));
    }
}
