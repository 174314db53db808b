use crate::error::{LedgerError, Result};
use crate::{Block, Blockchain, TXOutput, Transaction};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Batch, Tree};
use std::collections::BTreeMap;

pub const UTXO_TREE: &str = "chainstate";

/// Unspent outputs of one transaction, each paired with its original
/// index and kept in ascending index order.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TXOutputs {
    pub outputs: Vec<(usize, TXOutput)>,
}

impl TXOutputs {
    fn from_transaction(tx: &Transaction) -> TXOutputs {
        TXOutputs {
            outputs: tx.get_vout().iter().cloned().enumerate().collect(),
        }
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn deserialize(data: &[u8]) -> Result<TXOutputs> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Index of unspent outputs keyed by transaction id, derived from the chain.
pub struct UtxoSet {
    blockchain: Blockchain,
    utxo_tree: Tree,
}

impl UtxoSet {
    pub fn new(blockchain: Blockchain) -> Result<UtxoSet> {
        let utxo_tree = blockchain.get_db().open_tree(UTXO_TREE)?;
        Ok(UtxoSet {
            blockchain,
            utxo_tree,
        })
    }

    /// Rebuilds the index from a full chain scan, replacing whatever the
    /// tree held in one atomic batch. Returns the number of entries.
    pub fn reindex(&self) -> Result<usize> {
        let _guard = self.blockchain.lock_writer();

        let utxo_map = self.blockchain.find_utxo()?;
        let mut batch = Batch::default();
        for item in self.utxo_tree.iter() {
            let (k, _) = item?;
            batch.remove(k);
        }
        for (txid, outs) in &utxo_map {
            batch.insert(txid.as_slice(), outs.serialize()?);
        }
        self.utxo_tree.apply_batch(batch)?;
        self.utxo_tree.flush()?;

        info!("Reindexed UTXO set: {} transactions", utxo_map.len());
        Ok(utxo_map.len())
    }

    /// First-fit selection in key order: walks the index until outputs owned
    /// by `pub_key_hash` cover `amount`. Returns the accumulated value and
    /// the picked output indices by hex transaction id.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, BTreeMap<String, Vec<usize>>)> {
        let mut unspent_outputs: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut accumulated = 0;

        'scan: for item in self.utxo_tree.iter() {
            let (k, v) = item?;
            let outs = TXOutputs::deserialize(&v)?;
            for (idx, out) in outs.outputs.iter() {
                if accumulated >= amount {
                    break 'scan;
                }
                if out.is_locked_with_key(pub_key_hash) {
                    accumulated += out.get_value();
                    unspent_outputs
                        .entry(hex::encode(&k))
                        .or_default()
                        .push(*idx);
                }
            }
        }

        Ok((accumulated, unspent_outputs))
    }

    // finds UTXO for a public key hash
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let mut utxo = Vec::new();
        for item in self.utxo_tree.iter() {
            let (_, v) = item?;
            let outs = TXOutputs::deserialize(&v)?;
            utxo.extend(
                outs.outputs
                    .into_iter()
                    .map(|(_, out)| out)
                    .filter(|out| out.is_locked_with_key(pub_key_hash)),
            );
        }
        Ok(utxo)
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        Ok(self
            .find_utxo(pub_key_hash)?
            .iter()
            .map(TXOutput::get_value)
            .sum())
    }

    /*updates the UTXO set with transactions from the Block.
    The Block is considered to be the tip of the blockchain and must be
    applied exactly once, in admission order. */
    pub fn update(&self, block: &Block) -> Result<()> {
        let _guard = self.blockchain.lock_writer();
        self.apply_block(block)
    }

    /// Admits `transactions` as a new block and applies it to the index.
    /// Every input must claim an output the index still holds.
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        let _guard = self.blockchain.lock_writer();
        for tx in &transactions {
            self.check_unspent(tx)?;
        }
        let block = self.blockchain.admit_block(transactions)?;
        self.apply_block(&block)?;
        Ok(block)
    }

    fn check_unspent(&self, tx: &Transaction) -> Result<()> {
        if tx.is_coinbase() {
            return Ok(());
        }
        for vin in tx.get_vin() {
            let unspent = match self.utxo_tree.get(vin.get_txid())? {
                Some(v) => TXOutputs::deserialize(&v)?
                    .outputs
                    .iter()
                    .any(|(idx, _)| *idx == vin.get_vout()),
                None => false,
            };
            if !unspent {
                return Err(LedgerError::MissingReference(format!(
                    "output {}:{} is not unspent",
                    hex::encode(vin.get_txid()),
                    vin.get_vout()
                )));
            }
        }
        Ok(())
    }

    // caller holds the writer lock
    fn apply_block(&self, block: &Block) -> Result<()> {
        self.utxo_tree
            .transaction(|tx_tree| -> ConflictableTransactionResult<(), LedgerError> {
                for tx in block.get_transactions() {
                    if !tx.is_coinbase() {
                        for vin in tx.get_vin() {
                            let missing = || {
                                ConflictableTransactionError::Abort(LedgerError::NotFound(format!(
                                    "unspent output {}:{}",
                                    hex::encode(vin.get_txid()),
                                    vin.get_vout()
                                )))
                            };
                            let outs_bytes = tx_tree.get(vin.get_txid())?.ok_or_else(missing)?;
                            let mut outs = TXOutputs::deserialize(&outs_bytes)
                                .map_err(ConflictableTransactionError::Abort)?;
                            let before = outs.outputs.len();
                            outs.outputs.retain(|(idx, _)| *idx != vin.get_vout());
                            if outs.outputs.len() == before {
                                return Err(missing());
                            }

                            if outs.outputs.is_empty() {
                                tx_tree.remove(vin.get_txid())?;
                            } else {
                                let outs_bytes =
                                    outs.serialize().map_err(ConflictableTransactionError::Abort)?;
                                tx_tree.insert(vin.get_txid(), outs_bytes)?;
                            }
                        }
                    }

                    let new_outputs = TXOutputs::from_transaction(tx)
                        .serialize()
                        .map_err(ConflictableTransactionError::Abort)?;
                    tx_tree.insert(tx.get_id(), new_outputs)?;
                }
                Ok(())
            })?;
        self.utxo_tree.flush()?;
        debug!("Applied block {} to UTXO set", hex::encode(block.get_hash()));
        Ok(())
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    // number of transaction ids with unspent outputs
    pub fn count_transactions(&self) -> Result<usize> {
        let mut count = 0;
        for item in self.utxo_tree.iter() {
            item?;
            count += 1;
        }
        Ok(count)
    }
}
