use crate::error::{LedgerError, Result};
use crate::wallet::hash_pub_key;
use crate::{UtxoSet, Wallet};
use log::debug;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{
    EcdsaKeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_FIXED, ECDSA_P256_SHA256_FIXED_SIGNING,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

const COINBASE_DATA_LEN: usize = 20;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Content hash of the transaction with its id and every signature
    /// cleared. Input and output order is part of the hash.
    pub fn hash(&self) -> Result<Vec<u8>> {
        let mut tx_copy = self.clone();
        tx_copy.id = vec![];
        for input in tx_copy.vin.iter_mut() {
            input.signature = vec![];
        }
        let encode = bincode::serialize(&tx_copy)?;
        Ok(Sha256::digest(encode).to_vec())
    }

    fn set_id(&mut self) -> Result<()> {
        self.id = self.hash()?;
        Ok(())
    }

    // the reward transaction references no prior output
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty()
    }

    /* copy used for signing: signatures and public keys are cleared,
    the caller fills in the owner hash of the input being signed */
    fn trimmed_copy(&self) -> Transaction {
        let vin = self
            .vin
            .iter()
            .map(|input| TXInput {
                txid: input.txid.clone(),
                vout: input.vout,
                signature: vec![],
                pub_key: vec![],
            })
            .collect();
        Transaction {
            id: self.id.clone(),
            vin,
            vout: self.vout.clone(),
        }
    }

    // hash signed for input `idx`, given the owner hash of the output it spends
    fn signing_hash(trimmed: &mut Transaction, idx: usize, pub_key_hash: &[u8]) -> Result<Vec<u8>> {
        trimmed.vin[idx].pub_key = pub_key_hash.to_vec();
        let hash = trimmed.hash();
        trimmed.vin[idx].pub_key = vec![];
        hash
    }

    fn referenced_output<'a>(
        input: &TXInput,
        prev_txs: &'a HashMap<String, Transaction>,
    ) -> Result<&'a TXOutput> {
        let txid = hex::encode(&input.txid);
        let prev_tx = prev_txs
            .get(&txid)
            .ok_or_else(|| LedgerError::MissingReference(format!("transaction {}", txid)))?;
        prev_tx.vout.get(input.vout).ok_or_else(|| {
            LedgerError::MissingReference(format!("output {}:{}", txid, input.vout))
        })
    }

    /// Signs every input with `private_key` (PKCS#8). `prev_txs` maps the
    /// hex id of each referenced transaction to that transaction.
    pub fn sign(
        &mut self,
        private_key: &[u8],
        prev_txs: &HashMap<String, Transaction>,
    ) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, private_key)
            .map_err(|e| LedgerError::Key(e.to_string()))?;
        let rng = SystemRandom::new();

        let mut tx_copy = self.trimmed_copy();
        for idx in 0..self.vin.len() {
            let prev_output = Transaction::referenced_output(&self.vin[idx], prev_txs)?;
            let hash = Transaction::signing_hash(&mut tx_copy, idx, &prev_output.pub_key_hash)?;
            let signature = key_pair
                .sign(&rng, &hash)
                .map_err(|_| LedgerError::Key("signing failed".to_string()))?;
            self.vin[idx].signature = signature.as_ref().to_vec();
        }
        Ok(())
    }

    /// Checks every input signature. A referenced transaction or output
    /// absent from `prev_txs` is an error; a bad signature or a public key
    /// not matching the output owner yields `Ok(false)`.
    pub fn verify(&self, prev_txs: &HashMap<String, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }
        if self.vin.is_empty() {
            return Ok(false);
        }

        let mut tx_copy = self.trimmed_copy();
        for (idx, input) in self.vin.iter().enumerate() {
            let prev_output = Transaction::referenced_output(input, prev_txs)?;
            if !prev_output.is_locked_with_key(&hash_pub_key(&input.pub_key)) {
                debug!("input {} of {} is not owned by its key", idx, hex::encode(&self.id));
                return Ok(false);
            }
            let hash = Transaction::signing_hash(&mut tx_copy, idx, &prev_output.pub_key_hash)?;
            let public_key = UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, &input.pub_key);
            if public_key.verify(&hash, &input.signature).is_err() {
                debug!("input {} of {} has a bad signature", idx, hex::encode(&self.id));
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn get_id(&self) -> &[u8] {
        &self.id
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        &self.vout
    }

    pub fn get_vin(&self) -> &[TXInput] {
        &self.vin
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: u64, pub_key_hash: Vec<u8>) -> TXOutput {
        TXOutput {
            value,
            pub_key_hash,
        }
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash == pub_key_hash
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        &self.pub_key_hash
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TXInput {
    // id of the transaction holding the spent output
    txid: Vec<u8>,
    // index of the output in that transaction
    vout: usize,
    signature: Vec<u8>,
    // spender's public key, or the coinbase data of a coinbase input
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn new(txid: &[u8], vout: usize) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout,
            signature: vec![],
            pub_key: vec![],
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        &self.txid
    }

    pub fn get_vout(&self) -> usize {
        self.vout
    }

    pub fn get_pub_key(&self) -> &[u8] {
        &self.pub_key
    }

    pub fn get_signature(&self) -> &[u8] {
        &self.signature
    }
}

/// Creates a reward transaction paying `subsidy` to `to_pub_key_hash`.
/// Empty `data` is replaced with random bytes so every coinbase gets its own id.
pub fn new_coinbase_tx(to_pub_key_hash: &[u8], data: &[u8], subsidy: u64) -> Result<Transaction> {
    let data = if data.is_empty() {
        let mut random = [0u8; COINBASE_DATA_LEN];
        SystemRandom::new()
            .fill(&mut random)
            .map_err(|_| LedgerError::Key("random generator failed".to_string()))?;
        hex::encode(random).into_bytes()
    } else {
        data.to_vec()
    };
    let txin = TXInput {
        txid: vec![],
        vout: 0,
        signature: vec![],
        pub_key: data,
    };
    let txout = TXOutput::new(subsidy, to_pub_key_hash.to_vec());
    let mut tx = Transaction {
        id: vec![],
        vin: vec![txin],
        vout: vec![txout],
    };
    tx.set_id()?;
    Ok(tx)
}

/// Builds and signs a transfer of `amount` from `wallet` to the owner of
/// `to_pub_key_hash`, spending outputs picked from the UTXO index.
pub fn new_utxo_transaction(
    wallet: &Wallet,
    to_pub_key_hash: &[u8],
    amount: u64,
    utxo_set: &UtxoSet,
) -> Result<Transaction> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    let from_pub_key_hash = wallet.get_pub_key_hash();
    let (acc, valid_outputs) = utxo_set.find_spendable_outputs(&from_pub_key_hash, amount)?;
    if acc < amount {
        return Err(LedgerError::InsufficientFunds {
            required: amount,
            available: acc,
        });
    }

    let mut txs_inputs = Vec::new();
    for (txid, outs) in valid_outputs.iter() {
        let txid = hex::decode(txid).map_err(|e| LedgerError::MissingReference(e.to_string()))?;
        for out in outs {
            let mut input = TXInput::new(&txid, *out);
            input.pub_key = wallet.public_key.clone();
            txs_inputs.push(input);
        }
    }

    let mut txs_outputs = vec![TXOutput::new(amount, to_pub_key_hash.to_vec())];
    // change
    if acc > amount {
        txs_outputs.push(TXOutput::new(acc - amount, from_pub_key_hash));
    }

    let mut tx = Transaction {
        id: vec![],
        vin: txs_inputs,
        vout: txs_outputs,
    };
    tx.set_id()?;
    utxo_set
        .get_blockchain()
        .sign_transaction(&mut tx, wallet.get_private_key())?;
    Ok(tx)
}
