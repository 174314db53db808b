use crate::error::{LedgerError, Result};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/* Address layout
Version  Public key hash                           Checksum
00       62E907B15CBF27D5425399EBF6F0FB50EBB88F18  C29B7D93
*/

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;
const PUB_KEY_HASH_LEN: usize = 20;

#[derive(Clone, Serialize, Deserialize)]
pub struct Wallet {
    private_key: Vec<u8>, // PKCS#8 document
    pub public_key: Vec<u8>,
}

impl Wallet {
    pub fn new_wallet() -> Result<Wallet> {
        let private_key = new_key_pair()?;
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &private_key)
            .map_err(|e| LedgerError::Key(e.to_string()))?;
        let public_key = key_pair.public_key().as_ref().to_vec();
        Ok(Wallet {
            private_key,
            public_key,
        })
    }

    pub fn get_address(&self) -> String {
        calc_address(&hash_pub_key(&self.public_key))
    }

    pub fn get_pub_key_hash(&self) -> Vec<u8> {
        hash_pub_key(&self.public_key)
    }

    pub fn get_private_key(&self) -> &[u8] {
        &self.private_key
    }
}

pub fn new_key_pair() -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
        .map_err(|_| LedgerError::Key("key generation failed".to_string()))?;
    Ok(pkcs8.as_ref().to_vec())
}

pub fn hash_pub_key(pub_key: &[u8]) -> Vec<u8> {
    let public_sha256 = Sha256::digest(pub_key);
    Ripemd160::digest(public_sha256).to_vec()
}

// double sha256, first four bytes
pub fn check_sum(payload: &[u8]) -> Vec<u8> {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    second[..ADDRESS_CHECK_SUM_LEN].to_vec()
}

pub fn validate_address(address: &str) -> bool {
    address_to_pub_key_hash(address).is_ok()
}

/// Decodes an address and returns the public key hash it carries.
pub fn address_to_pub_key_hash(address: &str) -> Result<Vec<u8>> {
    let payload = bs58::decode(address)
        .into_vec()
        .map_err(|e| LedgerError::InvalidAddress(format!("{}: {}", address, e)))?;
    if payload.len() != 1 + PUB_KEY_HASH_LEN + ADDRESS_CHECK_SUM_LEN {
        return Err(LedgerError::InvalidAddress(format!(
            "{}: unexpected length {}",
            address,
            payload.len()
        )));
    }
    let (body, actual_check_sum) = payload.split_at(payload.len() - ADDRESS_CHECK_SUM_LEN);
    if body[0] != VERSION || check_sum(body) != actual_check_sum {
        return Err(LedgerError::InvalidAddress(format!(
            "{}: checksum mismatch",
            address
        )));
    }
    Ok(body[1..].to_vec())
}

// calculate address from public key hash
pub fn calc_address(pub_key_hash: &[u8]) -> String {
    let mut payload = vec![VERSION];
    payload.extend(pub_key_hash);
    let check_sum = check_sum(&payload);
    payload.extend(check_sum);
    bs58::encode(payload).into_string()
}
