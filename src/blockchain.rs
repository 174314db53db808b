use crate::config::Config;
use crate::error::{LedgerError, Result};
use crate::transaction::new_coinbase_tx;
use crate::utxo_set::TXOutputs;
use crate::{Block, Transaction};
use log::{debug, info, warn};
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};
use sled::{Db, Tree};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

pub const BLOCKS_TREE: &str = "blocks";
const TIP_BLOCK_HASH_KEY: &str = "lh";
const GENESIS_COINBASE_DATA: &[u8] = b"First transaction from Genesis";

/// Append-only chain of blocks persisted in sled. Clones share the same
/// database, tip and writer lock.
#[derive(Clone)]
pub struct Blockchain {
    // hash of the last admitted block
    tip_hash: Arc<RwLock<Vec<u8>>>,
    db: Db,
    blocks: Tree,
    config: Config,
    writer: Arc<Mutex<()>>,
}

impl Blockchain {
    /// Creates a new chain whose genesis coinbase pays `reward_pub_key_hash`.
    pub fn create_blockchain(config: Config, reward_pub_key_hash: &[u8]) -> Result<Blockchain> {
        config.validate()?;
        let db = sled::open(&config.db_path)?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        if blocks.contains_key(TIP_BLOCK_HASH_KEY)? {
            return Err(LedgerError::AlreadyExists);
        }

        let coinbase =
            new_coinbase_tx(reward_pub_key_hash, GENESIS_COINBASE_DATA, config.subsidy)?;
        let genesis = Block::new_genesis_block(vec![coinbase], config.target_bits)?;
        commit_block(&blocks, &genesis, None)?;
        info!("Genesis block {} created", hex::encode(genesis.get_hash()));

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(genesis.get_hash().to_vec())),
            db,
            blocks,
            config,
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Opens an existing chain and loads its tip.
    pub fn open(config: Config) -> Result<Blockchain> {
        config.validate()?;
        if !config.db_path.exists() {
            return Err(LedgerError::NotFound(format!(
                "no blockchain at {}",
                config.db_path.display()
            )));
        }
        let db = sled::open(&config.db_path)?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        let tip_hash = blocks
            .get(TIP_BLOCK_HASH_KEY)?
            .ok_or_else(|| {
                LedgerError::NotFound(format!("no blockchain at {}", config.db_path.display()))
            })?
            .to_vec();
        debug!("Opened blockchain at tip {}", hex::encode(&tip_hash));

        Ok(Blockchain {
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            db,
            blocks,
            config,
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Verifies, mines and persists a block holding `transactions`.
    pub fn add_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        let _guard = self.lock_writer();
        self.admit_block(transactions)
    }

    // caller holds the writer lock
    pub(crate) fn admit_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        self.check_transactions(&transactions)?;

        let tip_hash = self.get_tip_hash();
        let block = Block::new_block(transactions, tip_hash.clone(), self.config.target_bits)?;
        commit_block(&self.blocks, &block, Some(tip_hash.as_slice()))?;
        *self.tip_hash.write().unwrap_or_else(|e| e.into_inner()) = block.get_hash().to_vec();
        info!(
            "Block {} admitted with {} transactions",
            hex::encode(block.get_hash()),
            block.get_transactions().len()
        );
        Ok(block)
    }

    /* Every transaction must verify, may only claim outputs that neither the
    chain nor an earlier input of the block has spent, and must carry an id
    not seen before. */
    fn check_transactions(&self, transactions: &[Transaction]) -> Result<()> {
        let (mut known_ids, mut spent) = self.chain_history()?;
        for tx in transactions {
            if !self.verify_transaction(tx)? {
                warn!("Rejecting transaction {}", hex::encode(tx.get_id()));
                return Err(LedgerError::InvalidSignature(hex::encode(tx.get_id())));
            }
            if !tx.is_coinbase() {
                for vin in tx.get_vin() {
                    if !spent.insert((vin.get_txid().to_vec(), vin.get_vout())) {
                        warn!("Rejecting transaction {}", hex::encode(tx.get_id()));
                        return Err(LedgerError::MissingReference(format!(
                            "output {}:{} already spent",
                            hex::encode(vin.get_txid()),
                            vin.get_vout()
                        )));
                    }
                }
            }
            if !known_ids.insert(tx.get_id().to_vec()) {
                warn!("Rejecting transaction {}", hex::encode(tx.get_id()));
                return Err(LedgerError::DuplicateTransaction(hex::encode(tx.get_id())));
            }
        }
        Ok(())
    }

    // ids of every admitted transaction and every outpoint their inputs claim
    fn chain_history(&self) -> Result<(HashSet<Vec<u8>>, HashSet<(Vec<u8>, usize)>)> {
        let mut ids = HashSet::new();
        let mut spent = HashSet::new();
        for block in self.iterator() {
            for tx in block?.get_transactions() {
                ids.insert(tx.get_id().to_vec());
                if tx.is_coinbase() {
                    continue;
                }
                for vin in tx.get_vin() {
                    spent.insert((vin.get_txid().to_vec(), vin.get_vout()));
                }
            }
        }
        Ok((ids, spent))
    }

    /// A fresh cursor from the current tip back to genesis.
    pub fn iterator(&self) -> BlockchainIterator {
        BlockchainIterator {
            current_hash: self.get_tip_hash(),
            blocks: self.blocks.clone(),
        }
    }

    pub fn get_block(&self, hash: &[u8]) -> Result<Block> {
        read_block(&self.blocks, hash)
    }

    /// Scans the chain for the transaction with id `id`.
    pub fn find_transaction(&self, id: &[u8]) -> Result<Transaction> {
        for block in self.iterator() {
            if let Some(tx) = block?.get_transactions().iter().find(|tx| tx.get_id() == id) {
                return Ok(tx.clone());
            }
        }
        Err(LedgerError::NotFound(format!("transaction {}", hex::encode(id))))
    }

    /* Walks tip to genesis collecting every output not claimed by an input.
    Later blocks are visited first, and each block back to front, so an
    output's spend is always seen before the output itself. */
    pub fn find_utxo(&self) -> Result<BTreeMap<Vec<u8>, TXOutputs>> {
        let mut utxo: BTreeMap<Vec<u8>, TXOutputs> = BTreeMap::new();
        let mut spent_txos: HashMap<Vec<u8>, Vec<usize>> = HashMap::new();

        for block in self.iterator() {
            let block = block?;
            for tx in block.get_transactions().iter().rev() {
                let spent = spent_txos.get(tx.get_id());
                for (out_idx, out) in tx.get_vout().iter().enumerate() {
                    if spent.map_or(false, |outs| outs.contains(&out_idx)) {
                        continue;
                    }
                    utxo.entry(tx.get_id().to_vec())
                        .or_default()
                        .outputs
                        .push((out_idx, out.clone()));
                }

                if !tx.is_coinbase() {
                    for vin in tx.get_vin() {
                        spent_txos
                            .entry(vin.get_txid().to_vec())
                            .or_default()
                            .push(vin.get_vout());
                    }
                }
            }
        }
        Ok(utxo)
    }

    // resolves every transaction referenced by the inputs of `tx`
    fn prev_transactions(&self, tx: &Transaction) -> Result<HashMap<String, Transaction>> {
        let mut prev_txs = HashMap::new();
        for vin in tx.get_vin() {
            let txid = hex::encode(vin.get_txid());
            if prev_txs.contains_key(&txid) {
                continue;
            }
            let prev_tx = self.find_transaction(vin.get_txid()).map_err(|e| match e {
                LedgerError::NotFound(what) => LedgerError::MissingReference(what),
                other => other,
            })?;
            prev_txs.insert(txid, prev_tx);
        }
        Ok(prev_txs)
    }

    pub fn sign_transaction(&self, tx: &mut Transaction, private_key: &[u8]) -> Result<()> {
        let prev_txs = self.prev_transactions(tx)?;
        tx.sign(private_key, &prev_txs)
    }

    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.prev_transactions(tx)?;
        tx.verify(&prev_txs)
    }

    /// Number of blocks reachable from the tip.
    pub fn height(&self) -> Result<usize> {
        let mut height = 0;
        for block in self.iterator() {
            block?;
            height += 1;
        }
        Ok(height)
    }

    pub fn get_tip_hash(&self) -> Vec<u8> {
        self.tip_hash
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn get_config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn get_db(&self) -> &Db {
        &self.db
    }

    // serializes every mutation of the chain and of the UTXO index
    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/* Writes the block and moves the tip in one sled transaction. The stored
tip must still equal `expected_tip` (None: no chain yet). */
fn commit_block(blocks: &Tree, block: &Block, expected_tip: Option<&[u8]>) -> Result<()> {
    let data = block.serialize()?;
    blocks.transaction(|tx_db| -> ConflictableTransactionResult<(), LedgerError> {
        let current = tx_db.get(TIP_BLOCK_HASH_KEY)?;
        match (current.as_deref(), expected_tip) {
            (None, None) => {}
            (Some(_), None) => {
                return Err(ConflictableTransactionError::Abort(LedgerError::AlreadyExists))
            }
            (current, Some(expected)) if current != Some(expected) => {
                return Err(ConflictableTransactionError::Abort(LedgerError::StaleTip(
                    hex::encode(expected),
                )))
            }
            _ => {}
        }
        tx_db.insert(block.get_hash(), data.as_slice())?;
        tx_db.insert(TIP_BLOCK_HASH_KEY, block.get_hash())?;
        Ok(())
    })?;
    blocks.flush()?;
    Ok(())
}

fn read_block(blocks: &Tree, hash: &[u8]) -> Result<Block> {
    let data = blocks
        .get(hash)?
        .ok_or_else(|| LedgerError::NotFound(format!("block {}", hex::encode(hash))))?;
    Block::deserialize_block(&data)
}

/// Cursor following `prev_block_hash` links from a fixed starting hash.
/// Blocks are never rewritten, so a cursor is unaffected by later appends.
pub struct BlockchainIterator {
    current_hash: Vec<u8>,
    blocks: Tree,
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_hash.is_empty() {
            return None;
        }
        let block = read_block(&self.blocks, &self.current_hash);
        match &block {
            Ok(block) => self.current_hash = block.get_prev_block_hash().to_vec(),
            Err(_) => self.current_hash.clear(),
        }
        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::tests_support::spend_output;
    use crate::Wallet;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            db_path: dir.path().join("blocks"),
            wallet_file: dir.path().join("wallets.dat"),
            target_bits: 6,
            subsidy: 20,
        }
    }

    fn create_chain(dir: &TempDir, owner: &Wallet) -> Blockchain {
        Blockchain::create_blockchain(test_config(dir), &owner.get_pub_key_hash()).unwrap()
    }

    fn transfer(bc: &Blockchain, from: &Wallet, prev: &Transaction, to: &[u8]) -> Transaction {
        let value = prev.get_vout()[0].get_value();
        let mut prev_txs = HashMap::new();
        prev_txs.insert(hex::encode(prev.get_id()), prev.clone());
        let mut tx = spend_output(from, prev, 0, to, value);
        bc.sign_transaction(&mut tx, from.get_private_key()).unwrap();
        assert!(tx.verify(&prev_txs).unwrap());
        tx
    }

    #[test]
    fn test_create_and_open() {
        let dir = TempDir::new().unwrap();
        let wallet = Wallet::new_wallet().unwrap();
        let bc = create_chain(&dir, &wallet);
        let tip = bc.get_tip_hash();
        drop(bc);

        let reopened = Blockchain::open(test_config(&dir)).unwrap();
        assert_eq!(reopened.get_tip_hash(), tip);
        assert_eq!(reopened.height().unwrap(), 1);
    }

    #[test]
    fn test_open_missing_chain() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Blockchain::open(test_config(&dir)),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn test_iterator_ends_at_genesis() {
        let dir = TempDir::new().unwrap();
        let alice = Wallet::new_wallet().unwrap();
        let bc = create_chain(&dir, &alice);
        bc.add_block(vec![]).unwrap();
        let last = bc.add_block(vec![]).unwrap();

        let blocks: Vec<Block> = bc.iterator().collect::<Result<_>>().unwrap();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0], last);
        assert_eq!(blocks.iter().filter(|b| b.is_genesis()).count(), 1);
        assert!(blocks[2].is_genesis());
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].get_prev_block_hash(), pair[1].get_hash());
        }
    }

    #[test]
    fn test_cursor_is_pinned_to_its_tip() {
        let dir = TempDir::new().unwrap();
        let alice = Wallet::new_wallet().unwrap();
        let bc = create_chain(&dir, &alice);

        let cursor = bc.iterator();
        bc.add_block(vec![]).unwrap();
        assert_eq!(cursor.count(), 1);
        assert_eq!(bc.iterator().count(), 2);
    }

    #[test]
    fn test_find_transaction() {
        let dir = TempDir::new().unwrap();
        let alice = Wallet::new_wallet().unwrap();
        let bc = create_chain(&dir, &alice);
        bc.add_block(vec![]).unwrap();

        let genesis = bc.iterator().last().unwrap().unwrap();
        let coinbase = &genesis.get_transactions()[0];
        assert_eq!(&bc.find_transaction(coinbase.get_id()).unwrap(), coinbase);
        assert!(matches!(
            bc.find_transaction(&[0u8; 32]),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn test_rejects_invalid_signature() {
        let dir = TempDir::new().unwrap();
        let alice = Wallet::new_wallet().unwrap();
        let bob = Wallet::new_wallet().unwrap();
        let bc = create_chain(&dir, &alice);
        let coinbase = bc.iterator().next().unwrap().unwrap().get_transactions()[0].clone();
        let tip = bc.get_tip_hash();

        // bob tries to spend alice's reward
        let stolen = transfer_unchecked(&bc, &bob, &coinbase, &bob.get_pub_key_hash());
        assert!(matches!(
            bc.add_block(vec![stolen]),
            Err(LedgerError::InvalidSignature(_))
        ));
        assert_eq!(bc.get_tip_hash(), tip);
    }

    #[test]
    fn test_rejects_double_claim_in_block() {
        let dir = TempDir::new().unwrap();
        let alice = Wallet::new_wallet().unwrap();
        let bob = Wallet::new_wallet().unwrap();
        let bc = create_chain(&dir, &alice);
        let coinbase = bc.iterator().next().unwrap().unwrap().get_transactions()[0].clone();

        let first = transfer(&bc, &alice, &coinbase, &bob.get_pub_key_hash());
        let second = transfer(&bc, &alice, &coinbase, &alice.get_pub_key_hash());
        assert!(matches!(
            bc.add_block(vec![first, second]),
            Err(LedgerError::MissingReference(_))
        ));
        assert_eq!(bc.height().unwrap(), 1);
    }

    #[test]
    fn test_rejects_output_spent_in_earlier_block() {
        let dir = TempDir::new().unwrap();
        let alice = Wallet::new_wallet().unwrap();
        let bob = Wallet::new_wallet().unwrap();
        let bc = create_chain(&dir, &alice);
        let coinbase = bc.iterator().next().unwrap().unwrap().get_transactions()[0].clone();

        let first = transfer(&bc, &alice, &coinbase, &bob.get_pub_key_hash());
        let second = transfer(&bc, &alice, &coinbase, &alice.get_pub_key_hash());
        bc.add_block(vec![first]).unwrap();
        let tip = bc.get_tip_hash();

        assert!(matches!(
            bc.add_block(vec![second]),
            Err(LedgerError::MissingReference(_))
        ));
        assert_eq!(bc.get_tip_hash(), tip);
        assert_eq!(bc.height().unwrap(), 2);
    }

    #[test]
    fn test_stale_tip_is_refused() {
        let dir = TempDir::new().unwrap();
        let alice = Wallet::new_wallet().unwrap();
        let bc = create_chain(&dir, &alice);
        let block = Block::new_block(vec![], vec![1u8; 32], 1).unwrap();

        assert!(matches!(
            commit_block(&bc.blocks, &block, Some(&[1u8; 32][..])),
            Err(LedgerError::StaleTip(_))
        ));
        assert!(matches!(
            commit_block(&bc.blocks, &block, None),
            Err(LedgerError::AlreadyExists)
        ));
    }

    fn transfer_unchecked(
        bc: &Blockchain,
        from: &Wallet,
        prev: &Transaction,
        to: &[u8],
    ) -> Transaction {
        let value = prev.get_vout()[0].get_value();
        let mut tx = spend_output(from, prev, 0, to, value);
        bc.sign_transaction(&mut tx, from.get_private_key()).unwrap();
        tx
    }
}
