// Core data structures: hashes, amounts, scripts, transactions, blocks

mod block;
mod hash;
pub mod script;
pub mod serialize;
mod transaction;
mod types;

pub use block::{Block, BlockHeader, BLOCK_SUBSIDY};
pub use hash::{checksum4, hash160, hash256};
pub use script::Script;
pub use serialize::Serializable;
pub use transaction::{OutPoint, Transaction, TxInput, TxOutput};
pub use types::{to_friendly_string, to_nanocoins, Amount, Hash256, CENT, COIN};
