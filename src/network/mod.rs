// Peer protocol: typed messages, framing, connection management

pub mod message;
mod peer;
pub mod wire;

pub use message::{
    InvType, InventoryItem, Message, PeerAddress, VersionMessage, MAX_INV_ENTRIES,
    PROTOCOL_VERSION,
};
pub use peer::{DownloadListener, Peer, PeerSender, CONNECT_TIMEOUT};
