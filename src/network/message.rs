// Typed peer protocol messages

use crate::core::serialize::{
    read_i64_le, read_u16_be, read_u32_le, read_u64_le, read_var_str, read_varint, write_i64_le,
    write_u16_be, write_u32_le, write_u64_le, write_var_str, write_varint,
};
use crate::core::{Block, Hash256, Serializable, Transaction};
use crate::error::ProtocolError;
use std::io::{Cursor, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

/// The protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 31800;

/// Framing carries a payload checksum from this protocol version on.
pub const CHECKSUM_VERSION: u32 = 209;

/// Addr records carry a last-seen timestamp above this version.
pub const ADDR_TIME_VERSION: u32 = 31402;

/// Hard cap on inventory entries per message.
pub const MAX_INV_ENTRIES: u64 = 50_000;

/// A network endpoint as carried in `version` and `addr` payloads:
/// services, 16-byte IPv6(-mapped) address, big-endian port, and a
/// timestamp that is only on the wire in newer-protocol addr messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub services: u64,
    pub addr: IpAddr,
    pub port: u16,
    pub time: Option<u32>,
}

impl PeerAddress {
    pub fn new(addr: IpAddr, port: u16, services: u64) -> Self {
        Self {
            services,
            addr,
            port,
            time: None,
        }
    }

    pub fn from_socket_addr(addr: SocketAddr, services: u64) -> Self {
        Self::new(addr.ip(), addr.port(), services)
    }

    pub fn write(&self, buf: &mut Vec<u8>, protocol_version: u32) {
        if protocol_version > ADDR_TIME_VERSION {
            write_u32_le(buf, self.time.unwrap_or(0)).unwrap();
        }
        write_u64_le(buf, self.services).unwrap();
        let v6 = match self.addr {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        buf.extend_from_slice(&v6.octets());
        write_u16_be(buf, self.port).unwrap();
    }

    pub fn read(reader: &mut dyn Read, protocol_version: u32) -> std::io::Result<Self> {
        let time = if protocol_version > ADDR_TIME_VERSION {
            Some(read_u32_le(reader)?)
        } else {
            None
        };
        let services = read_u64_le(reader)?;
        let mut ip = [0u8; 16];
        reader.read_exact(&mut ip)?;
        let v6 = Ipv6Addr::from(ip);
        let addr = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        let port = read_u16_be(reader)?;
        Ok(Self {
            services,
            addr,
            port,
            time,
        })
    }
}

/// Inventory entry type. Only three values exist on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvType {
    Error,
    Tx,
    Block,
}

impl InvType {
    pub fn from_u32(value: u32) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(InvType::Error),
            1 => Ok(InvType::Tx),
            2 => Ok(InvType::Block),
            other => Err(ProtocolError::UnknownInventoryType(other)),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            InvType::Error => 0,
            InvType::Tx => 1,
            InvType::Block => 2,
        }
    }
}

/// One inventory entry: a type tag and a hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryItem {
    pub inv_type: InvType,
    pub hash: Hash256,
}

impl InventoryItem {
    pub fn new(inv_type: InvType, hash: Hash256) -> Self {
        Self { inv_type, hash }
    }
}

/// The `version` handshake payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: u32,
    pub services: u64,
    pub timestamp: i64,
    pub addr_recv: PeerAddress,
    pub addr_from: PeerAddress,
    pub nonce: u64,
    pub sub_version: String,
    pub start_height: u32,
}

impl VersionMessage {
    pub fn new(recipient: SocketAddr, start_height: u32) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Self {
            version: PROTOCOL_VERSION,
            services: 0,
            timestamp,
            addr_recv: PeerAddress::from_socket_addr(recipient, 0),
            addr_from: PeerAddress::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0, 0),
            nonce: rand::random(),
            sub_version: concat!("bitlight/", env!("CARGO_PKG_VERSION")).to_string(),
            start_height,
        }
    }
}

/// A parsed peer message. Commands we do not understand come through
/// as `Unknown` carrying the raw payload; they are never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionMessage),
    Verack,
    Addr(Vec<PeerAddress>),
    Inv(Vec<InventoryItem>),
    GetData(Vec<InventoryItem>),
    GetBlocks {
        version: u32,
        locator: Vec<Hash256>,
        stop: Hash256,
    },
    Block(Block),
    Tx(Transaction),
    Unknown {
        command: String,
        payload: Vec<u8>,
    },
}

impl Message {
    /// The wire command string for this message.
    pub fn command(&self) -> &str {
        match self {
            Message::Version(_) => "version",
            Message::Verack => "verack",
            Message::Addr(_) => "addr",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::GetBlocks { .. } => "getblocks",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
            Message::Unknown { command, .. } => command,
        }
    }

    /// Serialize the payload only; framing is added by the wire layer.
    pub fn serialize_payload(&self, protocol_version: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Message::Version(v) => {
                write_u32_le(&mut buf, v.version).unwrap();
                write_u64_le(&mut buf, v.services).unwrap();
                write_i64_le(&mut buf, v.timestamp).unwrap();
                // Handshake address records never carry a timestamp.
                v.addr_recv.write(&mut buf, 0);
                v.addr_from.write(&mut buf, 0);
                write_u64_le(&mut buf, v.nonce).unwrap();
                write_var_str(&mut buf, &v.sub_version).unwrap();
                write_u32_le(&mut buf, v.start_height).unwrap();
            }
            Message::Verack => {}
            Message::Addr(addresses) => {
                write_varint(&mut buf, addresses.len() as u64).unwrap();
                for address in addresses {
                    address.write(&mut buf, protocol_version);
                }
            }
            Message::Inv(items) | Message::GetData(items) => {
                write_varint(&mut buf, items.len() as u64).unwrap();
                for item in items {
                    write_u32_le(&mut buf, item.inv_type.as_u32()).unwrap();
                    buf.extend_from_slice(item.hash.as_bytes());
                }
            }
            Message::GetBlocks {
                version,
                locator,
                stop,
            } => {
                write_u32_le(&mut buf, *version).unwrap();
                write_varint(&mut buf, locator.len() as u64).unwrap();
                for hash in locator {
                    buf.extend_from_slice(hash.as_bytes());
                }
                buf.extend_from_slice(stop.as_bytes());
            }
            Message::Block(block) => buf = block.serialize(),
            Message::Tx(tx) => buf = tx.serialize(),
            Message::Unknown { payload, .. } => buf = payload.clone(),
        }
        buf
    }

    /// Parse a payload for a command. Unknown commands are accepted
    /// verbatim.
    pub fn parse(
        command: &str,
        payload: &[u8],
        protocol_version: u32,
    ) -> Result<Message, ProtocolError> {
        let malformed =
            |reason: String| -> ProtocolError { ProtocolError::malformed(command, reason) };
        let io_err = |e: std::io::Error| ProtocolError::malformed(command, e.to_string());
        let mut cursor = Cursor::new(payload);

        match command {
            "version" => {
                let version = read_u32_le(&mut cursor).map_err(io_err)?;
                let services = read_u64_le(&mut cursor).map_err(io_err)?;
                let timestamp = read_i64_le(&mut cursor).map_err(io_err)?;
                let addr_recv = PeerAddress::read(&mut cursor, 0).map_err(io_err)?;
                let addr_from = PeerAddress::read(&mut cursor, 0).map_err(io_err)?;
                let nonce = read_u64_le(&mut cursor).map_err(io_err)?;
                let sub_version = read_var_str(&mut cursor).map_err(io_err)?;
                let start_height = read_u32_le(&mut cursor).map_err(io_err)?;
                Ok(Message::Version(VersionMessage {
                    version,
                    services,
                    timestamp,
                    addr_recv,
                    addr_from,
                    nonce,
                    sub_version,
                    start_height,
                }))
            }
            "verack" => Ok(Message::Verack),
            "addr" => {
                let count = read_varint(&mut cursor).map_err(io_err)?;
                let mut addresses = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    addresses.push(PeerAddress::read(&mut cursor, protocol_version).map_err(io_err)?);
                }
                Ok(Message::Addr(addresses))
            }
            "inv" | "getdata" => {
                let count = read_varint(&mut cursor).map_err(io_err)?;
                if count > MAX_INV_ENTRIES {
                    return Err(ProtocolError::TooManyEntries(count));
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let inv_type = InvType::from_u32(read_u32_le(&mut cursor).map_err(io_err)?)?;
                    let mut hash = [0u8; 32];
                    cursor.read_exact(&mut hash).map_err(io_err)?;
                    items.push(InventoryItem::new(inv_type, Hash256::new(hash)));
                }
                if command == "inv" {
                    Ok(Message::Inv(items))
                } else {
                    Ok(Message::GetData(items))
                }
            }
            "getblocks" => {
                let version = read_u32_le(&mut cursor).map_err(io_err)?;
                let count = read_varint(&mut cursor).map_err(io_err)?;
                if count > MAX_INV_ENTRIES {
                    return Err(ProtocolError::TooManyEntries(count));
                }
                let mut locator = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let mut hash = [0u8; 32];
                    cursor.read_exact(&mut hash).map_err(io_err)?;
                    locator.push(Hash256::new(hash));
                }
                let mut stop = [0u8; 32];
                cursor.read_exact(&mut stop).map_err(io_err)?;
                Ok(Message::GetBlocks {
                    version,
                    locator,
                    stop: Hash256::new(stop),
                })
            }
            "block" => Block::deserialize(payload).map(Message::Block).map_err(malformed),
            "tx" => Transaction::deserialize(payload).map(Message::Tx).map_err(malformed),
            _ => Ok(Message::Unknown {
                command: command.to_string(),
                payload: payload.to_vec(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_address_fixture() {
        // services 1, 10.0.0.1, port 8333 (0x208d), no timestamp.
        let bytes = hex::decode("010000000000000000000000000000000000ffff0a000001208d").unwrap();

        let mut cursor = Cursor::new(bytes.as_slice());
        let address = PeerAddress::read(&mut cursor, 0).unwrap();

        assert_eq!(address.services, 1);
        assert_eq!(address.addr, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(address.port, 8333);

        let mut out = Vec::new();
        address.write(&mut out, 0);
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_peer_address_with_timestamp() {
        let mut address = PeerAddress::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), 18333, 1);
        address.time = Some(1234567890);

        let mut buf = Vec::new();
        address.write(&mut buf, PROTOCOL_VERSION);
        assert_eq!(buf.len(), 30);

        let mut cursor = Cursor::new(buf.as_slice());
        let parsed = PeerAddress::read(&mut cursor, PROTOCOL_VERSION).unwrap();
        assert_eq!(parsed, address);
    }

    #[test]
    fn test_version_round_trip() {
        let recipient: SocketAddr = "10.0.0.1:8333".parse().unwrap();
        let message = Message::Version(VersionMessage::new(recipient, 42));

        let payload = message.serialize_payload(0);
        let parsed = Message::parse("version", &payload, 0).unwrap();
        assert_eq!(parsed, message);
        assert_eq!(parsed.serialize_payload(0), payload);
    }

    #[test]
    fn test_verack_is_empty() {
        assert!(Message::Verack.serialize_payload(PROTOCOL_VERSION).is_empty());
        assert_eq!(
            Message::parse("verack", &[], PROTOCOL_VERSION).unwrap(),
            Message::Verack
        );
    }

    #[test]
    fn test_addr_round_trip_with_times() {
        let mut a = PeerAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 8333, 1);
        a.time = Some(1700000000);
        let mut b = PeerAddress::new(IpAddr::V6("2001:db8::1".parse().unwrap()), 18333, 5);
        b.time = Some(1700000100);

        let message = Message::Addr(vec![a, b]);
        let payload = message.serialize_payload(PROTOCOL_VERSION);
        let parsed = Message::parse("addr", &payload, PROTOCOL_VERSION).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_inv_round_trip() {
        let message = Message::Inv(vec![
            InventoryItem::new(InvType::Tx, Hash256::new([1; 32])),
            InventoryItem::new(InvType::Block, Hash256::new([2; 32])),
        ]);

        let payload = message.serialize_payload(PROTOCOL_VERSION);
        let parsed = Message::parse("inv", &payload, PROTOCOL_VERSION).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_inv_rejects_unknown_type() {
        let mut payload = Vec::new();
        write_varint(&mut payload, 1).unwrap();
        write_u32_le(&mut payload, 7).unwrap();
        payload.extend_from_slice(&[0u8; 32]);

        assert!(matches!(
            Message::parse("inv", &payload, PROTOCOL_VERSION),
            Err(ProtocolError::UnknownInventoryType(7))
        ));
    }

    #[test]
    fn test_inv_rejects_oversized_count() {
        let mut payload = Vec::new();
        write_varint(&mut payload, MAX_INV_ENTRIES + 1).unwrap();

        assert!(matches!(
            Message::parse("inv", &payload, PROTOCOL_VERSION),
            Err(ProtocolError::TooManyEntries(_))
        ));
    }

    #[test]
    fn test_inv_truncated_is_error() {
        let mut payload = Vec::new();
        write_varint(&mut payload, 2).unwrap();
        write_u32_le(&mut payload, 1).unwrap();
        payload.extend_from_slice(&[0u8; 32]);
        // second entry missing

        assert!(matches!(
            Message::parse("inv", &payload, PROTOCOL_VERSION),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn test_getblocks_round_trip() {
        let message = Message::GetBlocks {
            version: PROTOCOL_VERSION,
            locator: vec![Hash256::new([3; 32]), Hash256::new([4; 32])],
            stop: Hash256::zero(),
        };

        let payload = message.serialize_payload(PROTOCOL_VERSION);
        let parsed = Message::parse("getblocks", &payload, PROTOCOL_VERSION).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_tx_and_block_round_trip() {
        let params = crate::params::NetworkParams::unit_tests();
        let genesis = params.genesis.clone();

        let block_payload = Message::Block(genesis.clone()).serialize_payload(PROTOCOL_VERSION);
        let parsed = Message::parse("block", &block_payload, PROTOCOL_VERSION).unwrap();
        match parsed {
            Message::Block(block) => assert_eq!(block.hash(), genesis.hash()),
            other => panic!("expected block, got {:?}", other.command()),
        }

        let tx = genesis.transactions[0].clone();
        let tx_payload = Message::Tx(tx.clone()).serialize_payload(PROTOCOL_VERSION);
        let parsed = Message::parse("tx", &tx_payload, PROTOCOL_VERSION).unwrap();
        assert_eq!(parsed, Message::Tx(tx));
    }

    #[test]
    fn test_unknown_command_is_not_an_error() {
        let parsed = Message::parse("alert", &[1, 2, 3], PROTOCOL_VERSION).unwrap();
        match &parsed {
            Message::Unknown { command, payload } => {
                assert_eq!(command, "alert");
                assert_eq!(payload, &vec![1, 2, 3]);
            }
            other => panic!("expected unknown, got {:?}", other.command()),
        }
        assert_eq!(parsed.serialize_payload(PROTOCOL_VERSION), vec![1, 2, 3]);
    }
}
