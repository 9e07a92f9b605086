// Persistent header storage

use crate::consensus::pow::{block_work, decode_compact, U256};
use crate::core::{BlockHeader, Hash256};
use crate::error::StoreError;
use crate::params::NetworkParams;
use std::collections::HashMap;
use std::path::Path;

/// A block header annotated with its position in the chain: cumulative
/// work over all ancestors and height from genesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub header: BlockHeader,
    pub chain_work: U256,
    pub height: u32,
}

impl StoredBlock {
    /// Wrap a genesis header at height zero.
    pub fn genesis(header: BlockHeader) -> Self {
        let work = block_work(decode_compact(header.bits));
        Self {
            header,
            chain_work: work,
            height: 0,
        }
    }

    /// Extend this block with a successor header, accumulating
    /// 2^256/(target+1) of work.
    pub fn build_next(&self, header: BlockHeader) -> Self {
        let work = block_work(decode_compact(header.bits));
        Self {
            header,
            chain_work: self.chain_work + work,
            height: self.height + 1,
        }
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// 116-byte record: header, chain work big-endian, height LE.
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.header.serialize();
        let mut work = [0u8; 32];
        self.chain_work.to_big_endian(&mut work);
        bytes.extend_from_slice(&work);
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() != 116 {
            return Err(StoreError::Corrupt(format!(
                "stored block record has {} bytes, expected 116",
                bytes.len()
            )));
        }
        let header = BlockHeader::deserialize(&bytes[..80])
            .map_err(StoreError::Corrupt)?;
        let chain_work = U256::from_big_endian(&bytes[80..112]);
        let mut height_bytes = [0u8; 4];
        height_bytes.copy_from_slice(&bytes[112..116]);
        Ok(Self {
            header,
            chain_work,
            height: u32::from_le_bytes(height_bytes),
        })
    }
}

/// Header storage with a chain-head pointer. Stores never hold
/// transactions, only headers and their chain position.
pub trait BlockStore: Send {
    fn put(&mut self, block: &StoredBlock) -> Result<(), StoreError>;
    fn get(&self, hash: &Hash256) -> Result<Option<StoredBlock>, StoreError>;
    fn chain_head(&self) -> Result<StoredBlock, StoreError>;
    fn set_chain_head(&mut self, block: &StoredBlock) -> Result<(), StoreError>;
}

/// In-memory store for tests and throwaway chains.
pub struct MemoryBlockStore {
    blocks: HashMap<Hash256, StoredBlock>,
    head: Hash256,
}

impl MemoryBlockStore {
    pub fn new(params: &NetworkParams) -> Self {
        let genesis = StoredBlock::genesis(params.genesis.header.clone());
        let head = genesis.hash();
        let mut blocks = HashMap::new();
        blocks.insert(head, genesis);
        Self { blocks, head }
    }
}

impl BlockStore for MemoryBlockStore {
    fn put(&mut self, block: &StoredBlock) -> Result<(), StoreError> {
        self.blocks.insert(block.hash(), block.clone());
        Ok(())
    }

    fn get(&self, hash: &Hash256) -> Result<Option<StoredBlock>, StoreError> {
        Ok(self.blocks.get(hash).cloned())
    }

    fn chain_head(&self) -> Result<StoredBlock, StoreError> {
        self.blocks
            .get(&self.head)
            .cloned()
            .ok_or(StoreError::MissingChainHead)
    }

    fn set_chain_head(&mut self, block: &StoredBlock) -> Result<(), StoreError> {
        self.head = block.hash();
        Ok(())
    }
}

const CHAIN_HEAD_KEY: &[u8] = b"chainhead";

/// Disk-backed store on sled. The chain-head pointer is flushed on
/// every update so a crash never leaves it dangling.
pub struct SledBlockStore {
    db: sled::Db,
}

impl SledBlockStore {
    pub fn open<P: AsRef<Path>>(path: P, params: &NetworkParams) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let store = Self { db };
        store.seed_genesis(params)?;
        Ok(store)
    }

    /// Temporary on-disk store for tests.
    pub fn temporary(params: &NetworkParams) -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        let store = Self { db };
        store.seed_genesis(params)?;
        Ok(store)
    }

    fn seed_genesis(&self, params: &NetworkParams) -> Result<(), StoreError> {
        if self.db.get(CHAIN_HEAD_KEY)?.is_none() {
            let genesis = StoredBlock::genesis(params.genesis.header.clone());
            self.db
                .insert(Self::block_key(&genesis.hash()), genesis.to_bytes())?;
            self.db
                .insert(CHAIN_HEAD_KEY, genesis.hash().as_bytes().as_slice())?;
            self.db.flush()?;
        }
        Ok(())
    }

    fn block_key(hash: &Hash256) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(b'b');
        key.extend_from_slice(hash.as_bytes());
        key
    }
}

impl BlockStore for SledBlockStore {
    fn put(&mut self, block: &StoredBlock) -> Result<(), StoreError> {
        self.db.insert(Self::block_key(&block.hash()), block.to_bytes())?;
        Ok(())
    }

    fn get(&self, hash: &Hash256) -> Result<Option<StoredBlock>, StoreError> {
        match self.db.get(Self::block_key(hash))? {
            Some(bytes) => Ok(Some(StoredBlock::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn chain_head(&self) -> Result<StoredBlock, StoreError> {
        let hash_bytes = self.db.get(CHAIN_HEAD_KEY)?.ok_or(StoreError::MissingChainHead)?;
        let hash = Hash256::from_slice(&hash_bytes).map_err(StoreError::Corrupt)?;
        self.get(&hash)?.ok_or(StoreError::MissingChainHead)
    }

    fn set_chain_head(&mut self, block: &StoredBlock) -> Result<(), StoreError> {
        self.db
            .insert(CHAIN_HEAD_KEY, block.hash().as_bytes().as_slice())?;
        self.db.flush()?;
        Ok(())
    }
}
