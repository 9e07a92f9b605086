// Peer connection: handshake, reader loop, broadcast

use crate::consensus::BlockChain;
use crate::core::{Amount, Hash256, Transaction};
use crate::error::{ProtocolError, SendError};
use crate::network::message::{
    InvType, InventoryItem, Message, VersionMessage, PROTOCOL_VERSION,
};
use crate::network::wire;
use crate::params::NetworkParams;
use crate::wallet::{Address, ChainKind, Wallet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// How long the initial TCP connect may take before we give up.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Progress callback for the initial chain download.
pub trait DownloadListener: Send + Sync {
    fn blocks_left(&self, count: u32);
}

/// A connection to a single remote node. The reader side is driven by
/// `run` on its own task; writes go through a shared handle guarded by
/// a mutex so frames from different tasks never interleave.
pub struct Peer {
    params: NetworkParams,
    pub addr: SocketAddr,
    reader: OwnedReadHalf,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    /// min(local, peer) after the handshake; zero before it.
    protocol_version: u32,
    our_height: u32,
    pub peer_version: Option<VersionMessage>,
    blocks_left: u32,
    download_listener: Option<Arc<dyn DownloadListener>>,
}

impl Peer {
    /// Open a TCP connection, bounded by `CONNECT_TIMEOUT`.
    pub async fn connect(
        addr: SocketAddr,
        params: NetworkParams,
        our_height: u32,
    ) -> Result<Self, ProtocolError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ))
            })??;
        log::info!("connected to {}", addr);
        let (reader, writer) = stream.into_split();
        Ok(Self {
            params,
            addr,
            reader,
            writer: Arc::new(Mutex::new(writer)),
            protocol_version: 0,
            our_height,
            peer_version: None,
            blocks_left: 0,
            download_listener: None,
        })
    }

    pub fn set_download_listener(&mut self, listener: Arc<dyn DownloadListener>) {
        self.download_listener = Some(listener);
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Exchange version/verack. The negotiated protocol version is the
    /// minimum of ours and theirs; checksumming switches on from 209.
    pub async fn handshake(&mut self) -> Result<(), ProtocolError> {
        let version = VersionMessage::new(self.addr, self.our_height);
        self.send(&Message::Version(version)).await?;

        let message =
            wire::read_message(&mut self.reader, &self.params, self.protocol_version).await?;
        let Message::Version(theirs) = message else {
            return Err(ProtocolError::malformed(
                "version",
                format!("expected version, got '{}'", message.command()),
            ));
        };
        self.protocol_version = PROTOCOL_VERSION.min(theirs.version);
        log::info!(
            "peer {} speaks protocol {} (negotiated {}), sub-version '{}', height {}",
            self.addr,
            theirs.version,
            self.protocol_version,
            theirs.sub_version,
            theirs.start_height
        );
        self.peer_version = Some(theirs);

        self.send(&Message::Verack).await?;
        let message =
            wire::read_message(&mut self.reader, &self.params, self.protocol_version).await?;
        if !matches!(message, Message::Verack) {
            return Err(ProtocolError::malformed(
                "verack",
                format!("expected verack, got '{}'", message.command()),
            ));
        }
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<(), ProtocolError> {
        let mut writer = self.writer.lock().await;
        wire::write_message(&mut *writer, message, &self.params, self.protocol_version).await
    }

    /// A handle other tasks can use to write to this connection.
    pub fn sender(&self) -> PeerSender {
        PeerSender {
            writer: self.writer.clone(),
            params: self.params.clone(),
            protocol_version: self.protocol_version,
        }
    }

    /// Kick off the initial block download: tell the peer where our
    /// chain ends and report progress against its advertised height.
    pub async fn start_blockchain_download(
        &mut self,
        chain: &StdMutex<BlockChain>,
    ) -> Result<(), ProtocolError> {
        let (our_height, head, genesis) = {
            let chain = chain.lock().expect("chain lock poisoned");
            (
                chain.best_chain_height(),
                chain.chain_head().hash(),
                chain.genesis_hash(),
            )
        };
        let peer_height = self
            .peer_version
            .as_ref()
            .map(|v| v.start_height)
            .unwrap_or(0);
        self.blocks_left = peer_height.saturating_sub(our_height);
        log::info!(
            "starting chain download, {} blocks to fetch",
            self.blocks_left
        );
        if let Some(listener) = &self.download_listener {
            listener.blocks_left(self.blocks_left);
        }
        self.send_getblocks(head, genesis).await
    }

    async fn send_getblocks(&self, head: Hash256, genesis: Hash256) -> Result<(), ProtocolError> {
        let locator = if head == genesis {
            vec![genesis]
        } else {
            vec![head, genesis]
        };
        self.send(&Message::GetBlocks {
            version: PROTOCOL_VERSION,
            locator,
            stop: Hash256::zero(),
        })
        .await
    }

    /// The reader loop: deliver messages in wire order to the chain
    /// and wallet until the peer hangs up.
    pub async fn run(
        mut self,
        chain: Arc<StdMutex<BlockChain>>,
        wallet: Arc<StdMutex<Wallet>>,
    ) -> Result<(), ProtocolError> {
        loop {
            let message =
                match wire::read_message(&mut self.reader, &self.params, self.protocol_version)
                    .await
                {
                    Ok(message) => message,
                    Err(ProtocolError::Disconnected) => {
                        log::info!("peer {} disconnected", self.addr);
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                };

            match message {
                Message::Inv(items) => {
                    let wanted: Vec<InventoryItem> = items
                        .into_iter()
                        .filter(|item| item.inv_type != InvType::Error)
                        .collect();
                    log::debug!("peer {} announced {} items", self.addr, wanted.len());
                    if !wanted.is_empty() {
                        self.send(&Message::GetData(wanted)).await?;
                    }
                }
                Message::Block(block) => {
                    let hash = block.hash();
                    let result = {
                        let mut chain = chain.lock().expect("chain lock poisoned");
                        chain.add(block)
                    };
                    match result {
                        Ok(true) => {
                            if self.blocks_left > 0 {
                                self.blocks_left -= 1;
                                if let Some(listener) = &self.download_listener {
                                    listener.blocks_left(self.blocks_left);
                                }
                            }
                        }
                        Ok(false) => {
                            // The parent is missing; ask the peer to
                            // fill the gap from our chain head.
                            log::info!("block {} did not connect, requesting ancestors", hash);
                            let (head, genesis) = {
                                let chain = chain.lock().expect("chain lock poisoned");
                                (chain.chain_head().hash(), chain.genesis_hash())
                            };
                            self.send_getblocks(head, genesis).await?;
                        }
                        Err(e) => {
                            log::error!("peer {} sent bad block {}: {}", self.addr, hash, e);
                        }
                    }
                }
                Message::Tx(tx) => {
                    let mut wallet = wallet.lock().expect("wallet lock poisoned");
                    if wallet.is_relevant(&tx) {
                        wallet.receive(&tx, None, ChainKind::BestChain);
                    }
                }
                Message::Addr(addresses) => {
                    log::debug!("peer {} sent {} addresses", self.addr, addresses.len());
                }
                Message::Unknown { command, payload } => {
                    log::debug!(
                        "ignoring unknown '{}' message ({} bytes)",
                        command,
                        payload.len()
                    );
                }
                other => {
                    log::debug!("unhandled '{}' message", other.command());
                }
            }
        }
    }
}

/// Write-side handle, cloneable across tasks. All writes serialize on
/// the connection's write mutex.
#[derive(Clone)]
pub struct PeerSender {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    params: NetworkParams,
    protocol_version: u32,
}

impl PeerSender {
    pub async fn broadcast_transaction(&self, tx: &Transaction) -> Result<(), ProtocolError> {
        log::info!("broadcasting tx {}", tx.txid());
        let mut writer = self.writer.lock().await;
        wire::write_message(
            &mut *writer,
            &Message::Tx(tx.clone()),
            &self.params,
            self.protocol_version,
        )
        .await
    }

    /// Create a spend, commit it to the wallet, and broadcast it.
    pub async fn send_coins(
        &self,
        wallet: &StdMutex<Wallet>,
        to: &Address,
        value: Amount,
    ) -> Result<Transaction, SendError> {
        let tx = {
            let mut wallet = wallet.lock().expect("wallet lock poisoned");
            let tx = wallet.create_send(to, value, None)?;
            wallet.confirm_send(&tx);
            tx
        };
        self.broadcast_transaction(&tx).await?;
        Ok(tx)
    }
}
