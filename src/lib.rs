// bitlight: a lightweight simplified-payment-verification Bitcoin
// client. It downloads and verifies the proof-of-work header chain
// from a single remote node, tracks a wallet of keys and relevant
// transactions, and can assemble, sign, and broadcast spends.

pub mod consensus;
pub mod core;
pub mod error;
pub mod network;
pub mod params;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use consensus::BlockChain;
pub use core::{Block, BlockHeader, Hash256, Transaction, TxInput, TxOutput};
pub use network::{Message, Peer};
pub use params::NetworkParams;
pub use storage::{BlockStore, MemoryBlockStore, SledBlockStore, StoredBlock};
pub use wallet::{Address, BalanceType, EcKey, Wallet, WalletListener};
