use sled::transaction::TransactionError;
use thiserror::Error;

/// Errors that can occur while operating on the ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("blockchain already exists")]
    AlreadyExists,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("missing reference: {0}")]
    MissingReference(String),

    #[error("transaction {0} is already on the chain")]
    DuplicateTransaction(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(u64),

    #[error("storage failure: {0}")]
    StorageFailure(#[from] sled::Error),

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("key error: {0}")]
    Key(String),

    #[error("chain tip moved underneath the writer: {0}")]
    StaleTip(String),

    #[error("nonce space exhausted")]
    NonceExhausted,

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransactionError<LedgerError>> for LedgerError {
    fn from(err: TransactionError<LedgerError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => LedgerError::StorageFailure(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
