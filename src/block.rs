use crate::error::Result;
use crate::merkle_tree;
use crate::ProofOfWork;
use crate::Transaction;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    // empty for the genesis block
    prev_block_hash: Vec<u8>,
    transactions: Vec<Transaction>,
    // difficulty the block was mined at
    target_bits: u32,
    nonce: u64,
    hash: Vec<u8>,
}

impl Block {
    /// Assembles a block on top of `prev_block_hash` and mines it.
    pub fn new_block(
        transactions: Vec<Transaction>,
        prev_block_hash: Vec<u8>,
        target_bits: u32,
    ) -> Result<Block> {
        let mut block = Block {
            prev_block_hash,
            transactions,
            target_bits,
            nonce: 0,
            hash: vec![],
        };
        let (nonce, hash) = ProofOfWork::new_proof_of_work(&block).run()?;
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    pub fn new_genesis_block(coinbase: Vec<Transaction>, target_bits: u32) -> Result<Block> {
        Block::new_block(coinbase, vec![], target_bits)
    }

    /*All transactions in a block are committed to by a single hash:
    the merkle root over the serialized transactions, in block order. */
    pub fn hash_transactions(&self) -> Result<Vec<u8>> {
        let mut transactions = vec![];
        for tx in &self.transactions {
            transactions.push(bincode::serialize(tx)?);
        }
        let m_tree = merkle_tree::new_merkle_tree(&transactions);
        Ok(m_tree.root_node.data)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize_block(data: &[u8]) -> Result<Block> {
        Ok(bincode::deserialize(data)?)
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash.is_empty()
    }

    pub fn get_prev_block_hash(&self) -> &[u8] {
        &self.prev_block_hash
    }

    pub fn get_hash(&self) -> &[u8] {
        &self.hash
    }

    pub fn get_transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn get_nonce(&self) -> u64 {
        self.nonce
    }

    pub fn get_target_bits(&self) -> u32 {
        self.target_bits
    }

    #[cfg(test)]
    pub(crate) fn with_nonce(&self, nonce: u64) -> Block {
        Block {
            nonce,
            ..self.clone()
        }
    }

    #[cfg(test)]
    pub(crate) fn with_target_bits(&self, target_bits: u32) -> Block {
        Block {
            target_bits,
            ..self.clone()
        }
    }
}
