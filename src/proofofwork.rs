use crate::error::{LedgerError, Result};
use crate::Block;
use log::{debug, info};
use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use std::ops::ShlAssign;

const MAX_NONCE: u64 = u64::MAX;
// how often the search reports progress
const PROGRESS_INTERVAL: u64 = 1 << 20;

pub struct ProofOfWork<'a> {
    block: &'a Block,
    target_bits: u32,
    target: BigUint,
}

impl<'a> ProofOfWork<'a> {
    /// The difficulty is read from the block, so validation needs nothing else.
    pub fn new_proof_of_work(block: &'a Block) -> ProofOfWork<'a> {
        let target_bits = block.get_target_bits();
        /* the target is the upper boundary of a range:
        a hash lower than the boundary is valid */
        let mut target = BigUint::from(1u32);
        target.shl_assign(256 - target_bits.min(256));
        ProofOfWork {
            block,
            target_bits,
            target,
        }
    }

    // nonce here is the counter from the Hashcash description
    fn prepare_data(&self, merkle_root: &[u8], nonce: u64) -> Vec<u8> {
        let mut data = vec![];
        data.extend(self.block.get_prev_block_hash());
        data.extend(merkle_root);
        data.extend(self.target_bits.to_be_bytes());
        data.extend(nonce.to_be_bytes());
        data
    }

    fn meets_target(&self, hash: &[u8]) -> bool {
        BigUint::from_bytes_be(hash) < self.target
    }

    /// Searches nonces from zero until the block digest falls below the target.
    pub fn run(&self) -> Result<(u64, Vec<u8>)> {
        let merkle_root = self.block.hash_transactions()?;
        let mut hasher = Sha256::new();

        info!("Mining a new block, target bits {}", self.target_bits);
        for nonce in 0..MAX_NONCE {
            hasher.update(self.prepare_data(&merkle_root, nonce));
            let hash = hasher.finalize_reset().to_vec();

            if self.meets_target(&hash) {
                info!("Found nonce {}: {}", nonce, hex::encode(&hash));
                return Ok((nonce, hash));
            }
            if nonce > 0 && nonce % PROGRESS_INTERVAL == 0 {
                debug!("Tried {} nonces", nonce);
            }
        }
        Err(LedgerError::NonceExhausted)
    }

    /// Recomputes the digest from the block's own contents and checks it
    /// against both the target and the stored hash.
    pub fn validate(&self) -> Result<bool> {
        let merkle_root = self.block.hash_transactions()?;
        let data = self.prepare_data(&merkle_root, self.block.get_nonce());
        let hash = Sha256::digest(data).to_vec();

        Ok(self.meets_target(&hash) && hash == self.block.get_hash())
    }
}
