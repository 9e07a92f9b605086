// Transaction data structures

use crate::core::{hash160, hash256, Hash256, Script, Serializable};
use crate::core::serialize::{read_var_bytes, read_varint, write_var_bytes, write_varint};
use std::io::{Cursor, Read, Write};

/// Reference to a previous transaction output: (txid, output index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, index: u32) -> Self {
        Self { txid, index }
    }

    /// The null reference used by coinbase inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash256::zero(),
            index: 0xffffffff,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == 0xffffffff
    }
}

/// Transaction input: a previous-output reference plus the scriptSig
/// proving the right to spend it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub outpoint: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxInput {
    pub fn new(outpoint: OutPoint, script_sig: Vec<u8>) -> Self {
        Self {
            outpoint,
            script_sig,
            sequence: 0xffffffff,
        }
    }

    /// Coinbase input: null previous-output reference, arbitrary script.
    pub fn coinbase(script_sig: Vec<u8>) -> Self {
        Self {
            outpoint: OutPoint::null(),
            script_sig,
            sequence: 0xffffffff,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.outpoint.is_null()
    }

    /// Recover the sender address hash from a pay-to-address scriptSig
    /// (the hash160 of the pushed public key).
    pub fn from_address_hash(&self) -> Result<[u8; 20], String> {
        let (_, pubkey) = Script::parse_script_sig(&self.script_sig)?;
        Ok(hash160(&pubkey))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_all(self.outpoint.txid.as_bytes()).unwrap();
        buf.write_all(&self.outpoint.index.to_le_bytes()).unwrap();
        write_var_bytes(&mut buf, &self.script_sig).unwrap();
        buf.write_all(&self.sequence.to_le_bytes()).unwrap();
        buf
    }

    pub fn deserialize(reader: &mut dyn Read) -> Result<Self, String> {
        let mut hash_bytes = [0u8; 32];
        reader.read_exact(&mut hash_bytes).map_err(|e| e.to_string())?;

        let mut index_bytes = [0u8; 4];
        reader.read_exact(&mut index_bytes).map_err(|e| e.to_string())?;

        let script_sig = read_var_bytes(reader).map_err(|e| e.to_string())?;

        let mut sequence_bytes = [0u8; 4];
        reader.read_exact(&mut sequence_bytes).map_err(|e| e.to_string())?;

        Ok(Self {
            outpoint: OutPoint::new(Hash256::new(hash_bytes), u32::from_le_bytes(index_bytes)),
            script_sig,
            sequence: u32::from_le_bytes(sequence_bytes),
        })
    }
}

/// Transaction output: value in nanocoins plus the scriptPubKey naming
/// the spending condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    pub fn new(value: u64, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_all(&self.value.to_le_bytes()).unwrap();
        write_var_bytes(&mut buf, &self.script_pubkey).unwrap();
        buf
    }

    pub fn deserialize(reader: &mut dyn Read) -> Result<Self, String> {
        let mut value_bytes = [0u8; 8];
        reader.read_exact(&mut value_bytes).map_err(|e| e.to_string())?;
        let script_pubkey = read_var_bytes(reader).map_err(|e| e.to_string())?;

        Ok(Self {
            value: u64::from_le_bytes(value_bytes),
            script_pubkey,
        })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Coinbase transaction paying the block subsidy.
    pub fn coinbase(script_sig: Vec<u8>, output: TxOutput) -> Self {
        Self {
            version: 1,
            inputs: vec![TxInput::coinbase(script_sig)],
            outputs: vec![output],
            lock_time: 0,
        }
    }

    /// A transaction is coinbase iff its single input carries the null
    /// previous-output reference.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Transaction id: double SHA256 of the serialization.
    pub fn txid(&self) -> Hash256 {
        hash256(&self.serialize())
    }

    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|out| out.value).sum()
    }

    /// Digest covered by an input's signature: the transaction with
    /// every scriptSig cleared, the connected scriptPubKey substituted
    /// at the signed input, and the hash type appended as u32 LE.
    pub fn hash_for_signature(
        &self,
        input_index: usize,
        connected_script: &[u8],
        hash_type: u32,
    ) -> Hash256 {
        let mut tx = self.clone();
        for (i, input) in tx.inputs.iter_mut().enumerate() {
            input.script_sig = if i == input_index {
                connected_script.to_vec()
            } else {
                Vec::new()
            };
        }
        let mut buf = tx.serialize();
        buf.extend_from_slice(&hash_type.to_le_bytes());
        hash256(&buf)
    }

    /// Deserialize from a reader, consuming exactly one transaction.
    pub fn from_reader(reader: &mut dyn Read) -> Result<Self, String> {
        let mut version_bytes = [0u8; 4];
        reader.read_exact(&mut version_bytes).map_err(|e| e.to_string())?;
        let version = u32::from_le_bytes(version_bytes);

        let input_count = read_varint(reader).map_err(|e| e.to_string())? as usize;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            inputs.push(TxInput::deserialize(reader)?);
        }

        let output_count = read_varint(reader).map_err(|e| e.to_string())? as usize;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            outputs.push(TxOutput::deserialize(reader)?);
        }

        let mut lock_time_bytes = [0u8; 4];
        reader.read_exact(&mut lock_time_bytes).map_err(|e| e.to_string())?;

        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time: u32::from_le_bytes(lock_time_bytes),
        })
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_all(&self.version.to_le_bytes()).unwrap();

        write_varint(&mut buf, self.inputs.len() as u64).unwrap();
        for input in &self.inputs {
            buf.write_all(&input.serialize()).unwrap();
        }

        write_varint(&mut buf, self.outputs.len() as u64).unwrap();
        for output in &self.outputs {
            buf.write_all(&output.serialize()).unwrap();
        }

        buf.write_all(&self.lock_time.to_le_bytes()).unwrap();
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor::new(data);
        Self::from_reader(&mut cursor)
    }
}
