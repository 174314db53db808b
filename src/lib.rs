mod block;
pub use block::Block;

mod blockchain;
pub use blockchain::Blockchain;
pub use blockchain::BlockchainIterator;

mod proofofwork;
pub use proofofwork::ProofOfWork;

pub mod merkle_tree;

mod cli;
pub use cli::Cli;

pub mod config;
pub use config::Config;

pub mod error;
pub use error::{LedgerError, Result};

pub mod transaction;
pub use transaction::TXInput;
pub use transaction::TXOutput;
pub use transaction::Transaction;

mod utxo_set;
pub use utxo_set::TXOutputs;
pub use utxo_set::UtxoSet;
pub use utxo_set::UTXO_TREE;

pub mod wallet;
pub use wallet::Wallet;

mod wallets;
pub use wallets::Wallets;
