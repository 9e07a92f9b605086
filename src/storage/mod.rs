// Block header storage

mod block_store;

pub use block_store::{BlockStore, MemoryBlockStore, SledBlockStore, StoredBlock};
