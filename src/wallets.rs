use crate::error::Result;
use crate::Wallet;
use log::info;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub struct Wallets {
    wallets: HashMap<String, Wallet>,
    path: PathBuf,
}

impl Wallets {
    // creates Wallets and fills it from the file if it exists
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Wallets> {
        let path = path.as_ref().to_path_buf();
        let wallets = if path.exists() {
            let buf = fs::read(&path)?;
            bincode::deserialize(&buf)?
        } else {
            HashMap::new()
        };
        Ok(Wallets { wallets, path })
    }

    // addresses stored in the wallet file, sorted
    pub fn get_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.wallets.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new_wallet()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        Ok(address)
    }

    pub fn save_to_file(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let wallets = bincode::serialize(&self.wallets)?;
        fs::write(&self.path, wallets)?;
        info!("Saved {} wallets to {}", self.wallets.len(), self.path.display());
        Ok(())
    }
}
