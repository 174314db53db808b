use crate::error::{LedgerError, Result};
use crate::transaction;
use crate::wallet;
use crate::{Blockchain, Config, ProofOfWork, Transaction, UtxoSet, Wallets};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Single-node UTXO ledger")]
pub struct Cli {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// database directory, overrides the config file
    #[arg(long)]
    db: Option<PathBuf>,

    /// leading zero bits required of a block hash, overrides the config file
    #[arg(long)]
    difficulty: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a blockchain and send the genesis block reward to ADDRESS
    #[command(name = "createblockchain")]
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },
    /// Print all the blocks of the blockchain
    #[command(name = "printchain")]
    PrintChain,
    /// Send AMOUNT of coins from FROM address to TO
    #[command(name = "send")]
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
    },
    /// Get balance of ADDRESS
    #[command(name = "getbalance")]
    GetBalance {
        #[arg(long)]
        address: String,
    },
    /// Rebuild the UTXO set from the chain
    #[command(name = "reindexutxo")]
    ReindexUtxo,
    /// Generate a new key-pair and save it into the wallet file
    #[command(name = "createwallet")]
    CreateWallet,
    /// List all addresses from the wallet file
    #[command(name = "listaddresses")]
    ListAddresses,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(db) = &self.db {
            config.db_path = db.clone();
        }
        if let Some(difficulty) = self.difficulty {
            config.target_bits = difficulty;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn run(&self) -> Result<()> {
        let config = self.load_config()?;
        match &self.command {
            Command::CreateBlockchain { address } => Cli::create_blockchain(config, address),
            Command::PrintChain => Cli::print_chain(config),
            Command::Send { from, to, amount } => Cli::send(config, from, to, *amount),
            Command::GetBalance { address } => Cli::get_balance(config, address),
            Command::ReindexUtxo => Cli::reindex_utxo(config),
            Command::CreateWallet => Cli::create_wallet(config),
            Command::ListAddresses => Cli::list_addresses(config),
        }
    }

    fn create_blockchain(config: Config, address: &str) -> Result<()> {
        let pub_key_hash = wallet::address_to_pub_key_hash(address)?;
        let blockchain = Blockchain::create_blockchain(config, &pub_key_hash)?;
        UtxoSet::new(blockchain)?.reindex()?;
        println!("Done!");
        Ok(())
    }

    fn print_chain(config: Config) -> Result<()> {
        let blockchain = Blockchain::open(config)?;
        for block in blockchain.iterator() {
            let block = block?;
            println!("Prev. block: {}", hex::encode(block.get_prev_block_hash()));
            println!("Hash: {}", hex::encode(block.get_hash()));
            println!("Nonce: {}", block.get_nonce());
            println!("Target bits: {}", block.get_target_bits());
            let pow = ProofOfWork::new_proof_of_work(&block);
            println!("PoW: {}", pow.validate()?);
            for tx in block.get_transactions() {
                Cli::print_transaction(tx);
            }
            println!();
        }
        println!("Height: {}", blockchain.height()?);
        Ok(())
    }

    fn print_transaction(tx: &Transaction) {
        println!("Transaction {}:", hex::encode(tx.get_id()));
        if tx.is_coinbase() {
            println!("  Coinbase: {}", String::from_utf8_lossy(tx.get_vin()[0].get_pub_key()));
        } else {
            for tx_in in tx.get_vin() {
                println!("  TXInput:");
                println!("    TXID: {}", hex::encode(tx_in.get_txid()));
                println!("    Out: {}", tx_in.get_vout());
                println!("    Signature: {}", hex::encode(tx_in.get_signature()));
                let pub_key_hash = wallet::hash_pub_key(tx_in.get_pub_key());
                println!("    Address: {}", wallet::calc_address(&pub_key_hash));
            }
        }
        for (idx, tx_out) in tx.get_vout().iter().enumerate() {
            println!("  TXOutput {}:", idx);
            println!("    Value: {}", tx_out.get_value());
            println!("    Address: {}", wallet::calc_address(tx_out.get_pub_key_hash()));
        }
    }

    fn send(config: Config, from: &str, to: &str, amount: u64) -> Result<()> {
        let to_pub_key_hash = wallet::address_to_pub_key_hash(to)?;
        wallet::address_to_pub_key_hash(from)?;

        let wallets = Wallets::load(&config.wallet_file)?;
        let sender = wallets
            .get_wallet(from)
            .ok_or_else(|| LedgerError::NotFound(format!("wallet for {}", from)))?;

        let utxo_set = UtxoSet::new(Blockchain::open(config)?)?;
        let tx = transaction::new_utxo_transaction(sender, &to_pub_key_hash, amount, &utxo_set)?;
        utxo_set.mine_block(vec![tx])?;
        println!("Success!");
        Ok(())
    }

    fn get_balance(config: Config, address: &str) -> Result<()> {
        let pub_key_hash = wallet::address_to_pub_key_hash(address)?;
        let utxo_set = UtxoSet::new(Blockchain::open(config)?)?;
        let balance = utxo_set.get_balance(&pub_key_hash)?;
        println!("Balance of '{}': {}", address, balance);
        Ok(())
    }

    fn reindex_utxo(config: Config) -> Result<()> {
        let utxo_set = UtxoSet::new(Blockchain::open(config)?)?;
        let count = utxo_set.reindex()?;
        println!("Done! There are {} transactions in the UTXO set.", count);
        Ok(())
    }

    fn create_wallet(config: Config) -> Result<()> {
        let mut wallets = Wallets::load(&config.wallet_file)?;
        let address = wallets.create_wallet()?;
        wallets.save_to_file()?;
        println!("Your new address is: {}", address);
        Ok(())
    }

    fn list_addresses(config: Config) -> Result<()> {
        let wallets = Wallets::load(&config.wallet_file)?;
        for address in wallets.get_addresses() {
            println!("{}", address);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::try_parse_from([
            "utxo-ledger",
            "--db",
            "/tmp/other",
            "--difficulty",
            "9",
            "getbalance",
            "--address",
            "x",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/other"));
        assert_eq!(config.target_bits, 9);
    }

    #[test]
    fn test_send_requires_amount() {
        assert!(Cli::try_parse_from(["utxo-ledger", "send", "--from", "a", "--to", "b"]).is_err());
    }

    #[test]
    fn test_invalid_address_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("blocks");
        let cli = Cli::try_parse_from([
            "utxo-ledger",
            "--db",
            db.to_str().unwrap(),
            "createblockchain",
            "--address",
            "addr1",
        ])
        .unwrap();
        assert!(matches!(cli.run(), Err(LedgerError::InvalidAddress(_))));
        assert!(!db.exists());
    }
}
