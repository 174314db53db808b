use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_TARGET_BITS: u32 = 16;
const DEFAULT_SUBSIDY: u64 = 20;

/// Settings handed to the ledger when it is created or opened.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// directory of the sled database
    pub db_path: PathBuf,
    pub wallet_file: PathBuf,
    /// number of leading zero bits a block hash must have
    pub target_bits: u32,
    /// reward paid by a coinbase transaction
    pub subsidy: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: PathBuf::from("./tmp/blocks"),
            wallet_file: PathBuf::from("./tmp/wallets.dat"),
            target_bits: DEFAULT_TARGET_BITS,
            subsidy: DEFAULT_SUBSIDY,
        }
    }
}

impl Config {
    /// Reads a TOML file; keys left out keep their default value.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let text = fs::read_to_string(&path).map_err(|e| {
            LedgerError::Config(format!("couldn't read {}: {}", path.as_ref().display(), e))
        })?;
        let config: Config =
            toml::from_str(&text).map_err(|e| LedgerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_bits == 0 || self.target_bits > 255 {
            return Err(LedgerError::Config(format!(
                "target_bits must be within 1..=255, got {}",
                self.target_bits
            )));
        }
        Ok(())
    }
}
