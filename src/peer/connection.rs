//! Per-connection plumbing: handshake, the read loop that dispatches
//! incoming messages, and the write loop that serializes outbound sends
//! onto the socket.

use super::node::PeerNode;
use crate::core::{PeerId, ProtocolError, Result};
use crate::protocol::{write_message, FrameReader, Message};
use log::{debug, warn};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Live connection state, owned by `PeerNode`'s connections map.
pub struct ConnectionHandle {
    pub addr: SocketAddr,
    /// They have told us they will refuse our `request_block`.
    pub choked_by_them: bool,
    /// We will refuse their `request_block`.
    pub choked_by_us: bool,
    pub sender: mpsc::UnboundedSender<Message>,
}

/// Dials `addr`, performs the initiator side of the handshake, and spawns
/// the read/write tasks on success.
pub async fn dial(node: PeerNode, peer_id_hint: PeerId, addr: SocketAddr) -> Result<()> {
    let stream = timeout(node.config().dial_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| crate::core::NetworkError::Timeout)??;
    let (mut read_half, mut write_half) = stream.into_split();

    write_message(&mut write_half, &Message::Handshake { peer_id: node.peer_id() }).await?;
    let mut reader = FrameReader::new();
    let remote_id = match reader.read_message(&mut read_half).await? {
        Message::Handshake { peer_id } => peer_id,
        _ => return Err(ProtocolError::HandshakeExpected.into()),
    };
    if remote_id != peer_id_hint {
        debug!("{}: peer at {addr} identified as {remote_id}, not {peer_id_hint} as advertised by the tracker", node.peer_id());
    }

    establish(node, remote_id, addr, read_half, write_half, reader).await;
    Ok(())
}

/// Accepts the responder side of an inbound connection. Closes the socket
/// without mutating any state if the first frame is not a handshake.
pub async fn accept(node: PeerNode, stream: TcpStream, addr: SocketAddr) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut reader = FrameReader::new();

    let remote_id = match reader.read_message(&mut read_half).await {
        Ok(Message::Handshake { peer_id }) => peer_id,
        Ok(_) => {
            warn!("{}: first message from {addr} was not a handshake, closing", node.peer_id());
            return;
        }
        Err(e) => {
            debug!("{}: handshake read from {addr} failed: {e}", node.peer_id());
            return;
        }
    };

    if let Err(e) = write_message(&mut write_half, &Message::Handshake { peer_id: node.peer_id() }).await {
        debug!("{}: handshake reply to {remote_id} failed: {e}", node.peer_id());
        return;
    }

    establish(node, remote_id, addr, read_half, write_half, reader).await;
}

async fn establish<R, W>(node: PeerNode, remote_id: PeerId, addr: SocketAddr, read_half: R, write_half: W, reader: FrameReader)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    node.register_connection(remote_id.clone(), addr, tx.clone()).await;

    let owned = node.owned_blocks().await;
    let _ = tx.send(Message::Have { blocks: owned });

    tokio::spawn(run_write_loop(write_half, rx));
    tokio::spawn(run_read_loop(node, remote_id, reader, read_half));
}

async fn run_write_loop<W: AsyncWrite + Unpin>(mut write_half: W, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = write_message(&mut write_half, &message).await {
            debug!("write loop closing: {e}");
            break;
        }
    }
}

async fn run_read_loop<R: AsyncRead + Unpin>(node: PeerNode, peer_id: PeerId, mut reader: FrameReader, mut read_half: R) {
    loop {
        match reader.read_message(&mut read_half).await {
            Ok(Message::Have { blocks }) => {
                node.update_peer_blocks(&peer_id, blocks).await;
            }
            Ok(Message::RequestBlock { block_id }) => {
                if node.is_unchoked_by_us(&peer_id).await {
                    if let Some(data) = node.get_block_data(&block_id).await {
                        node.send_to(&peer_id, Message::block_data(block_id, &data)).await;
                    }
                }
            }
            Ok(Message::BlockData { block_id, data }) => match hex::decode(&data) {
                Ok(bytes) => node.accept_block(block_id, bytes).await,
                Err(e) => {
                    debug!("{}: malformed block_data from {peer_id}: {e}", node.peer_id());
                    break;
                }
            },
            Ok(Message::Choke) => node.set_choked_by_them(&peer_id, true).await,
            Ok(Message::Unchoke) => node.set_choked_by_them(&peer_id, false).await,
            Ok(Message::Handshake { .. }) => {
                debug!("{}: unexpected second handshake from {peer_id}, closing", node.peer_id());
                break;
            }
            Err(e) => {
                debug!("{}: connection to {peer_id} closed: {e}", node.peer_id());
                break;
            }
        }
    }
    node.cleanup_peer(&peer_id).await;
}
