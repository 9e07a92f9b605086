// Consensus: proof-of-work arithmetic and the chain engine

mod chain;
pub mod pow;

pub use chain::BlockChain;
pub use pow::{
    block_work, decode_compact, decode_compact_signed, encode_compact, hash_to_u256, U256,
};
