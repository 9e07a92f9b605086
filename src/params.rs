// Per-network protocol parameters and genesis blocks

use crate::core::{Block, BlockHeader, Hash256, Transaction, TxOutput};

/// Which chain this client follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkId {
    Production,
    TestNet,
    UnitTests,
}

impl NetworkId {
    pub fn name(&self) -> &'static str {
        match self {
            NetworkId::Production => "prodnet",
            NetworkId::TestNet => "testnet",
            NetworkId::UnitTests => "unittests",
        }
    }
}

/// Everything that differs between the production chain, the public
/// test chain, and the trivial-difficulty chain used by unit tests.
#[derive(Debug, Clone)]
pub struct NetworkParams {
    pub id: NetworkId,
    /// Packet magic, serialized big-endian on the wire.
    pub magic: u32,
    pub port: u16,
    /// Version byte prefixed to pay-to-address hashes.
    pub address_header: u8,
    /// Easiest allowed difficulty target, compact form.
    pub proof_of_work_limit: u32,
    /// Seconds the retarget window is expected to span.
    pub target_timespan: u32,
    /// Blocks between difficulty retargets.
    pub interval: u32,
    pub genesis: Block,
}

impl NetworkParams {
    pub fn production() -> Self {
        Self {
            id: NetworkId::Production,
            magic: 0xf9beb4d9,
            port: 8333,
            address_header: 0x00,
            proof_of_work_limit: 0x1d00ffff,
            target_timespan: 14 * 24 * 60 * 60,
            interval: 2016,
            genesis: genesis_block(1231006505, 0x1d00ffff, 2083236893),
        }
    }

    pub fn testnet() -> Self {
        Self {
            id: NetworkId::TestNet,
            magic: 0xfabfb5da,
            port: 18333,
            address_header: 0x6f,
            proof_of_work_limit: 0x1d0fffff,
            target_timespan: 14 * 24 * 60 * 60,
            interval: 2016,
            genesis: genesis_block(1296688602, 0x1d07fff8, 384568319),
        }
    }

    /// Trivial difficulty and a short retarget cycle so tests can mine
    /// blocks instantly.
    pub fn unit_tests() -> Self {
        Self {
            id: NetworkId::UnitTests,
            magic: 0xfabfb5da,
            port: 18333,
            address_header: 0x6f,
            proof_of_work_limit: 0x207fffff,
            target_timespan: 200,
            interval: 10,
            genesis: genesis_block(1296688602, 0x207fffff, 2),
        }
    }
}

/// The Satoshi genesis coinbase, shared by every network: the Times
/// headline embedded in the input script, 50 coins to the original
/// public key.
fn genesis_coinbase() -> Transaction {
    let script_sig = hex::decode(
        "04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e\
         206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73",
    )
    .expect("genesis input script is valid hex");
    let script_pubkey = hex::decode(
        "4104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4\
         f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac",
    )
    .expect("genesis output script is valid hex");

    Transaction::coinbase(script_sig, TxOutput::new(50 * 100_000_000, script_pubkey))
}

fn genesis_block(timestamp: u32, bits: u32, nonce: u32) -> Block {
    let coinbase = genesis_coinbase();
    let merkle_root = Block::calculate_merkle_root(std::slice::from_ref(&coinbase));
    let header = BlockHeader::new(1, Hash256::zero(), merkle_root, timestamp, bits, nonce);
    Block::new(header, vec![coinbase])
}
