// Block data structures and verification

use crate::consensus::pow::{decode_compact, hash_to_u256};
use crate::core::{hash256, Hash256, Serializable, Transaction, TxOutput};
use crate::core::serialize::{read_varint, write_varint};
use crate::error::VerificationError;
use crate::params::NetworkParams;
use crate::wallet::Address;
use std::io::{Cursor, Read, Write};

/// Block subsidy paid by a coinbase, in nanocoins.
pub const BLOCK_SUBSIDY: u64 = 50 * 100_000_000;

/// Block header - 80 bytes on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block_hash: Hash256,
    pub merkle_root: Hash256,
    /// Unix timestamp
    pub timestamp: u32,
    /// Difficulty target in compact form
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub fn new(
        version: u32,
        prev_block_hash: Hash256,
        merkle_root: Hash256,
        timestamp: u32,
        bits: u32,
        nonce: u32,
    ) -> Self {
        Self {
            version,
            prev_block_hash,
            merkle_root,
            timestamp,
            bits,
            nonce,
        }
    }

    /// Block hash: double SHA256 of the 80 serialized header bytes.
    pub fn hash(&self) -> Hash256 {
        hash256(&self.serialize())
    }

    /// True iff the hash, read as a 256-bit big-endian integer, does
    /// not exceed the header's own expanded target.
    pub fn check_proof_of_work(&self) -> bool {
        hash_to_u256(&self.hash()) <= decode_compact(self.bits)
    }

    /// Grind the nonce until the header satisfies its own target.
    pub fn solve(&mut self) {
        while !self.check_proof_of_work() {
            self.nonce = self.nonce.wrapping_add(1);
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(80);
        buf.write_all(&self.version.to_le_bytes()).unwrap();
        buf.write_all(self.prev_block_hash.as_bytes()).unwrap();
        buf.write_all(self.merkle_root.as_bytes()).unwrap();
        buf.write_all(&self.timestamp.to_le_bytes()).unwrap();
        buf.write_all(&self.bits.to_le_bytes()).unwrap();
        buf.write_all(&self.nonce.to_le_bytes()).unwrap();
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, String> {
        if data.len() < 80 {
            return Err(format!("block header too short: {} bytes", data.len()));
        }
        let mut cursor = Cursor::new(data);
        Self::from_reader(&mut cursor)
    }

    pub fn from_reader(reader: &mut dyn Read) -> Result<Self, String> {
        let mut version_bytes = [0u8; 4];
        reader.read_exact(&mut version_bytes).map_err(|e| e.to_string())?;

        let mut prev_hash_bytes = [0u8; 32];
        reader.read_exact(&mut prev_hash_bytes).map_err(|e| e.to_string())?;

        let mut merkle_bytes = [0u8; 32];
        reader.read_exact(&mut merkle_bytes).map_err(|e| e.to_string())?;

        let mut timestamp_bytes = [0u8; 4];
        reader.read_exact(&mut timestamp_bytes).map_err(|e| e.to_string())?;

        let mut bits_bytes = [0u8; 4];
        reader.read_exact(&mut bits_bytes).map_err(|e| e.to_string())?;

        let mut nonce_bytes = [0u8; 4];
        reader.read_exact(&mut nonce_bytes).map_err(|e| e.to_string())?;

        Ok(Self {
            version: u32::from_le_bytes(version_bytes),
            prev_block_hash: Hash256::new(prev_hash_bytes),
            merkle_root: Hash256::new(merkle_bytes),
            timestamp: u32::from_le_bytes(timestamp_bytes),
            bits: u32::from_le_bytes(bits_bytes),
            nonce: u32::from_le_bytes(nonce_bytes),
        })
    }
}

/// Block: header plus transactions. A header received on its own
/// carries an empty transaction list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Merkle root over txids: pairwise double SHA256, duplicating the
    /// last element at each odd level.
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Hash256 {
        if transactions.is_empty() {
            return Hash256::zero();
        }

        let mut hashes: Vec<Hash256> = transactions.iter().map(|tx| tx.txid()).collect();

        while hashes.len() > 1 {
            let mut next_level = Vec::with_capacity((hashes.len() + 1) / 2);
            for chunk in hashes.chunks(2) {
                let left = chunk[0];
                let right = if chunk.len() == 2 { chunk[1] } else { chunk[0] };

                let mut combined = Vec::with_capacity(64);
                combined.extend_from_slice(left.as_bytes());
                combined.extend_from_slice(right.as_bytes());
                next_level.push(hash256(&combined));
            }
            hashes = next_level;
        }

        hashes[0]
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.header.prev_block_hash.is_zero()
    }

    /// Verify everything that can be checked without context: proof of
    /// work against the header's own target, the target against the
    /// network limit, and the merkle root when transactions are
    /// attached.
    pub fn verify(&self, params: &NetworkParams) -> Result<(), VerificationError> {
        if !self.header.check_proof_of_work() {
            return Err(VerificationError::new(format!(
                "Hash is higher than target: {} vs {:08x}",
                self.hash(),
                self.header.bits
            )));
        }

        let target = decode_compact(self.header.bits);
        if target > decode_compact(params.proof_of_work_limit) {
            return Err(VerificationError::new(format!(
                "Difficulty target is bad: {:08x}",
                self.header.bits
            )));
        }

        if !self.transactions.is_empty() {
            let calculated = Self::calculate_merkle_root(&self.transactions);
            if calculated != self.header.merkle_root {
                return Err(VerificationError::new(format!(
                    "Merkle hashes do not match: {} vs {}",
                    calculated, self.header.merkle_root
                )));
            }
        }

        Ok(())
    }

    /// Build and solve a successor block carrying a single coinbase
    /// that pays `to` the block subsidy. The difficulty target is
    /// inherited; the timestamp is supplied by the caller so tests can
    /// drive the clock.
    pub fn create_next_block(&self, to: &Address, time: u32) -> Block {
        // The coinbase script is never executed; embedding the time
        // keeps sibling test blocks distinct.
        let mut script_sig = vec![0x04];
        script_sig.extend_from_slice(&time.to_le_bytes());

        let coinbase = Transaction::coinbase(
            script_sig,
            TxOutput::new(BLOCK_SUBSIDY, to.script_pubkey()),
        );
        let merkle_root = Self::calculate_merkle_root(std::slice::from_ref(&coinbase));

        let mut header = BlockHeader::new(
            1,
            self.hash(),
            merkle_root,
            time,
            self.header.bits,
            0,
        );
        header.solve();

        Block::new(header, vec![coinbase])
    }
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = self.header.serialize();
        write_varint(&mut buf, self.transactions.len() as u64).unwrap();
        for tx in &self.transactions {
            buf.write_all(&tx.serialize()).unwrap();
        }
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor::new(data);
        Self::from_reader(&mut cursor)
    }
}

impl Block {
    pub fn from_reader(reader: &mut dyn Read) -> Result<Self, String> {
        let header = BlockHeader::from_reader(reader)?;

        let tx_count = read_varint(reader).map_err(|e| e.to_string())? as usize;
        let mut transactions = Vec::with_capacity(tx_count.min(1024));
        for _ in 0..tx_count {
            transactions.push(Transaction::from_reader(reader)?);
        }

        Ok(Self {
            header,
            transactions,
        })
    }
}
