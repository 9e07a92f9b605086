// Error types shared across the crate

use thiserror::Error;

/// Failures while framing or parsing wire messages. Any of these leaves
/// the connection unrecoverable.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer disconnected")]
    Disconnected,

    #[error("message size too large: {0} bytes")]
    OversizeMessage(u32),

    #[error("checksum mismatch: expected {expected:02x?}, got {actual:02x?}")]
    BadChecksum { expected: [u8; 4], actual: [u8; 4] },

    #[error("malformed {command} payload: {reason}")]
    Malformed { command: String, reason: String },

    #[error("unknown inventory type: {0}")]
    UnknownInventoryType(u32),

    #[error("too many inventory entries: {0}")]
    TooManyEntries(u64),
}

impl ProtocolError {
    pub fn malformed(command: &str, reason: impl Into<String>) -> Self {
        ProtocolError::Malformed {
            command: command.to_string(),
            reason: reason.into(),
        }
    }
}

/// A block failed verification. The message carries the diagnostic,
/// e.g. "Difficulty target is bad" or "Unexpected change in difficulty".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct VerificationError(pub String);

impl VerificationError {
    pub fn new(msg: impl Into<String>) -> Self {
        VerificationError(msg.into())
    }
}

/// Block store failures. Disk-backed stores must leave their on-disk
/// state consistent when one of these is returned.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),

    #[error("corrupt block store: {0}")]
    Corrupt(String),

    #[error("block store has no chain head")]
    MissingChainHead,
}

/// Failures reported by `BlockChain::add`.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Wallet operation failures.
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("insufficient funds: available {available}, need {needed}")]
    InsufficientFunds { available: i64, needed: i64 },

    #[error("keychain is empty")]
    EmptyKeychain,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad wallet file: {0}")]
    BadFormat(String),
}

/// Failures while creating and broadcasting a spend.
#[derive(Error, Debug)]
pub enum SendError {
    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Base58Check address parse failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid base58: {0}")]
    Base58(String),

    #[error("address checksum mismatch")]
    BadChecksum,

    #[error("invalid address length: {0}")]
    BadLength(usize),
}

/// Coin amount parse/arithmetic failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid amount: {0}")]
    Invalid(String),

    #[error("fractional nanocoins: {0}")]
    FractionalNanocoins(String),

    #[error("amount overflow")]
    Overflow,
}
