//! Blocks, persisted block data and the chain-head record.

use crate::account::ChainId;
use crate::crypto::{Address, CryptoError, PublicKey, Signature, Signer};
use crate::hash::{hash_encoded, Hash};
use crate::merkle::MerkleTree;
use crate::token::TokenId;
use crate::transaction::BlockTransaction;
use serde::{Deserialize, Serialize};

/// Current Unix time in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Block header. The authority's signature is kept beside the header in
/// [`BlockData`], so the header hash (and the proof-of-work over it) does not
/// depend on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub chain_id: ChainId,
    /// Height; 0 for genesis.
    pub number: u64,
    pub prev_hash: Hash,
    /// Unix milliseconds.
    pub timestamp: u64,
    /// Required leading zero hex digits of the header hash.
    pub difficulty: u16,
    /// Receives the transaction fees of this block.
    pub beneficiary: Address,
    pub transaction_fee: u64,
    /// Root over every account of the chain after this block.
    pub state_root: Hash,
    /// Merkle root over the block's transactions.
    pub transactions_root: Hash,
    /// Proof-of-work solution.
    pub nonce: u64,
    pub latest_token_id: TokenId,
    /// Root over every token after this block.
    pub tokens_root: Hash,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        hash_encoded(self)
    }
}

/// A block being assembled by the authority.
#[derive(Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<BlockTransaction>,
    /// Kept for inclusion proofs.
    pub merkle_tree: MerkleTree,
}

impl Block {
    /// Build a block; `transactions_root` is derived from `transactions`,
    /// overriding whatever the header carried.
    pub fn new(mut header: BlockHeader, transactions: Vec<BlockTransaction>) -> Self {
        let merkle_tree = MerkleTree::from_transactions(&transactions);
        header.transactions_root = merkle_tree.root();
        Self {
            header,
            transactions,
            merkle_tree,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn is_genesis(&self) -> bool {
        self.header.number == 0 && self.header.prev_hash == Hash::ZERO
    }
}

/// The block producer's identity, recorded on every block so that the next
/// block can be attributed to the same authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub id: String,
    pub public_key: PublicKey,
}

impl Validator {
    pub fn new(id: impl Into<String>, public_key: PublicKey) -> Self {
        Self {
            id: id.into(),
            public_key,
        }
    }

    pub fn address(&self) -> Address {
        self.public_key.to_address()
    }

    /// Check a header signature against this validator's key.
    pub fn verify(&self, header_hash: &Hash, signature: &Signature) -> bool {
        signature
            .recover(header_hash)
            .map(|key| key == self.public_key)
            .unwrap_or(false)
    }
}

/// A committed block as it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    pub hash: Hash,
    pub header: BlockHeader,
    pub header_signature: Signature,
    pub transactions: Vec<BlockTransaction>,
    pub validator: Validator,
}

impl BlockData {
    pub fn new(block: Block, header_signature: Signature, validator: Validator) -> Self {
        Self {
            hash: block.header.hash(),
            header: block.header,
            header_signature,
            transactions: block.transactions,
            validator,
        }
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn merkle_tree(&self) -> MerkleTree {
        MerkleTree::from_transactions(&self.transactions)
    }

    pub fn verify_transactions_root(&self) -> bool {
        self.merkle_tree().root() == self.header.transactions_root
    }

    pub fn verify_header_signature(&self) -> bool {
        self.validator
            .verify(&self.header.hash(), &self.header_signature)
    }
}

/// The singleton chain-head pointer of one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainState {
    pub chain_id: ChainId,
    pub latest_hash: Hash,
    pub latest_block_number: u64,
    pub latest_token_id: TokenId,
    pub transaction_fee: u64,
}

impl BlockchainState {
    /// Head pointer after committing `block`.
    pub fn advanced_to(&self, block: &BlockData) -> Self {
        Self {
            chain_id: self.chain_id,
            latest_hash: block.hash,
            latest_block_number: block.header.number,
            latest_token_id: block.header.latest_token_id,
            transaction_fee: block.header.transaction_fee,
        }
    }
}

/// Inputs for block 0.
#[derive(Debug, Clone)]
pub struct GenesisSpec {
    pub chain_id: ChainId,
    pub authority: Address,
    pub difficulty: u16,
    pub transaction_fee: u64,
    pub state_root: Hash,
    pub tokens_root: Hash,
}

/// Build and sign the genesis block.
///
/// Genesis carries no transactions and no proof-of-work; the authority's
/// signature alone anchors the chain.
pub fn genesis_block<S: Signer + ?Sized>(
    spec: &GenesisSpec,
    signer: &S,
    validator: Validator,
) -> Result<BlockData, CryptoError> {
    let header = BlockHeader {
        chain_id: spec.chain_id,
        number: 0,
        prev_hash: Hash::ZERO,
        timestamp: current_timestamp_ms(),
        difficulty: spec.difficulty,
        beneficiary: spec.authority,
        transaction_fee: spec.transaction_fee,
        state_root: spec.state_root,
        transactions_root: Hash::ZERO,
        nonce: 0,
        latest_token_id: 0,
        tokens_root: spec.tokens_root,
    };
    let block = Block::new(header, Vec::new());
    let signature = signer.sign_hash(&block.hash())?;
    Ok(BlockData::new(block, signature, validator))
}
