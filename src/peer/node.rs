//! Owns the listen socket, outgoing dialer, and the two periodic scheduling
//! tasks. Wires `BlockStore` and `ChokeController` into a running swarm
//! member, following the accept-loop / task-spawn / shutdown-channel idiom
//! this crate's network layer has always used.

use super::connection::{self, ConnectionHandle};
use crate::block_store::BlockStore;
use crate::choke::ChokeController;
use crate::core::{Config, PeerId, Result};
use crate::protocol::Message;
use crate::tracker::TrackerClient;
use log::{debug, info, warn};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::sleep;

/// What we know about a peer independent of whether we currently hold a live
/// connection to it: where to find it, and the last HAVE set it advertised.
#[derive(Debug, Clone)]
pub struct PeerDirectoryEntry {
    pub address: SocketAddr,
    pub advertised_blocks: HashSet<String>,
    pub last_seen: Instant,
}

struct Inner {
    peer_id: PeerId,
    config: Config,
    tracker: TrackerClient,
    file_name: Mutex<String>,
    block_store: Mutex<BlockStore>,
    choke: Mutex<ChokeController>,
    connections: Mutex<HashMap<PeerId, ConnectionHandle>>,
    directory: RwLock<HashMap<PeerId, PeerDirectoryEntry>>,
    running: AtomicBool,
    listen_addr: Mutex<Option<SocketAddr>>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
}

/// A running (or not-yet-started) swarm member. Cheap to clone: every task
/// holds a clone backed by the same `Arc<Inner>`.
#[derive(Clone)]
pub struct PeerNode {
    inner: Arc<Inner>,
}

impl PeerNode {
    pub fn new(peer_id: PeerId, config: Config, tracker_addr: String) -> Self {
        let tracker = TrackerClient::new(tracker_addr.clone(), config.tracker_timeout);
        Self {
            inner: Arc::new(Inner {
                peer_id,
                tracker,
                file_name: Mutex::new(String::new()),
                block_store: Mutex::new(BlockStore::new("", config.block_size)),
                choke: Mutex::new(ChokeController::new(&config)),
                connections: Mutex::new(HashMap::new()),
                directory: RwLock::new(HashMap::new()),
                running: AtomicBool::new(false),
                listen_addr: Mutex::new(None),
                shutdown_tx: Mutex::new(None),
                config,
            }),
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.inner.peer_id.clone()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub async fn listen_addr(&self) -> Option<SocketAddr> {
        *self.inner.listen_addr.lock().await
    }

    /// Loads `path` as a complete local copy and configures this node as a
    /// seeder for it.
    pub async fn share_file(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        let store = BlockStore::load_from_file(file_name.clone(), self.inner.config.block_size, path).await?;
        info!("{}: sharing {} ({} blocks)", self.peer_id(), file_name, store.total_block_count());
        *self.inner.file_name.lock().await = file_name;
        *self.inner.block_store.lock().await = store;
        Ok(())
    }

    /// Configures this node as a leecher for `file_name`, with no blocks yet.
    pub async fn download_file(&self, file_name: impl Into<String>) -> Result<()> {
        let file_name = file_name.into();
        *self.inner.block_store.lock().await = BlockStore::new(file_name.clone(), self.inner.config.block_size);
        *self.inner.file_name.lock().await = file_name;
        Ok(())
    }

    pub async fn is_complete(&self) -> bool {
        self.inner.block_store.lock().await.is_complete()
    }

    pub async fn status_string(&self) -> String {
        self.inner.block_store.lock().await.status_string()
    }

    /// Binds the listen socket, registers with the tracker, and spawns the
    /// acceptor plus the two periodic tasks. `listen_port = 0` lets the OS
    /// pick a port.
    pub async fn start(&self, listen_port: u16) -> Result<SocketAddr> {
        let listener = TcpListener::bind(("0.0.0.0", listen_port))
            .await
            .map_err(|_| crate::core::NetworkError::BindFailed {
                addr: format!("0.0.0.0:{listen_port}"),
            })?;
        let local_addr = listener.local_addr()?;
        *self.inner.listen_addr.lock().await = Some(local_addr);
        self.inner.running.store(true, Ordering::SeqCst);

        let owned_blocks: Vec<String> = self.inner.block_store.lock().await.owned_blocks().into_iter().collect();
        let file_name = self.inner.file_name.lock().await.clone();
        if let Err(e) = self
            .inner
            .tracker
            .register(&self.peer_id(), &file_name, ("127.0.0.1".to_string(), local_addr.port()), owned_blocks)
            .await
        {
            warn!("{}: initial tracker registration failed: {e}", self.peer_id());
        }

        let (tx, mut shutdown_rx) = mpsc::channel(1);
        *self.inner.shutdown_tx.lock().await = Some(tx);

        let acceptor_node = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, addr)) => {
                                let node = acceptor_node.clone();
                                tokio::spawn(async move {
                                    connection::accept(node, stream, addr).await;
                                });
                            }
                            Err(e) => warn!("{}: accept failed: {e}", acceptor_node.peer_id()),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("{}: acceptor shutting down", acceptor_node.peer_id());
                        break;
                    }
                }
            }
        });

        let manager_node = self.clone();
        tokio::spawn(async move { manager_node.run_manager_task().await });

        let choke_node = self.clone();
        tokio::spawn(async move { choke_node.run_choke_task().await });

        Ok(local_addr)
    }

    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.inner.shutdown_tx.lock().await.take() {
            let _ = tx.send(()).await;
        }
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // --- state accessors used by the connection read/write loops ---

    pub(super) async fn register_connection(&self, peer_id: PeerId, addr: SocketAddr, sender: mpsc::UnboundedSender<Message>) {
        let mut connections = self.inner.connections.lock().await;
        connections.insert(
            peer_id.clone(),
            ConnectionHandle {
                addr,
                choked_by_them: true,
                choked_by_us: true,
                sender,
            },
        );
        drop(connections);
        let mut directory = self.inner.directory.write().await;
        directory
            .entry(peer_id)
            .and_modify(|e| e.last_seen = Instant::now())
            .or_insert(PeerDirectoryEntry {
                address: addr,
                advertised_blocks: HashSet::new(),
                last_seen: Instant::now(),
            });
    }

    pub(super) async fn cleanup_peer(&self, peer_id: &PeerId) {
        self.inner.connections.lock().await.remove(peer_id);
        self.inner.block_store.lock().await.remove_peer(peer_id);
        self.inner.choke.lock().await.unregister(peer_id);
        debug!("{}: cleaned up connection to {peer_id}", self.peer_id());
    }

    pub(super) async fn owned_blocks(&self) -> Vec<String> {
        self.inner.block_store.lock().await.owned_blocks().into_iter().collect()
    }

    pub(super) async fn update_peer_blocks(&self, peer_id: &PeerId, blocks: Vec<String>) {
        let set: HashSet<String> = blocks.into_iter().collect();
        self.inner.block_store.lock().await.update_peer_blocks(peer_id, &set);
        let mut directory = self.inner.directory.write().await;
        if let Some(entry) = directory.get_mut(peer_id) {
            entry.advertised_blocks = set;
            entry.last_seen = Instant::now();
        }
    }

    pub(super) async fn is_unchoked_by_us(&self, peer_id: &PeerId) -> bool {
        self.inner.choke.lock().await.is_unchoked(peer_id)
    }

    pub(super) async fn get_block_data(&self, block_id: &str) -> Option<Vec<u8>> {
        self.inner.block_store.lock().await.get_block_data(block_id).map(|b| b.to_vec())
    }

    /// Stores an inbound block. On acceptance, broadcasts the updated HAVE
    /// set, pushes it to the tracker, and becomes a seeder if now complete.
    pub(super) async fn accept_block(&self, block_id: String, data: Vec<u8>) {
        let accepted = self.inner.block_store.lock().await.add_block(block_id, data);
        if !accepted {
            return;
        }
        self.broadcast_have().await;
        self.push_blocks_to_tracker().await;
        if self.is_complete().await {
            self.become_seeder().await;
        }
    }

    async fn become_seeder(&self) {
        let file_name = self.inner.file_name.lock().await.clone();
        let output_dir = self.inner.config.download_dir.clone();
        if let Err(e) = tokio::fs::create_dir_all(&output_dir).await {
            warn!("{}: could not create download dir: {e}", self.peer_id());
            return;
        }
        let output_path: PathBuf = output_dir.join(&file_name);
        let store = self.inner.block_store.lock().await;
        match store.reconstruct_file(&output_path).await {
            Ok(path) => info!("{}: download complete, wrote {}", self.peer_id(), path.display()),
            Err(e) => warn!("{}: reconstruction failed: {e}", self.peer_id()),
        }
    }

    pub(super) async fn send_to(&self, peer_id: &PeerId, message: Message) {
        let connections = self.inner.connections.lock().await;
        if let Some(handle) = connections.get(peer_id) {
            let _ = handle.sender.send(message);
        }
    }

    async fn broadcast_have(&self) {
        let owned = self.owned_blocks().await;
        let connections = self.inner.connections.lock().await;
        for handle in connections.values() {
            let _ = handle.sender.send(Message::Have { blocks: owned.clone() });
        }
    }

    async fn push_blocks_to_tracker(&self) {
        let owned = self.owned_blocks().await;
        let file_name = self.inner.file_name.lock().await.clone();
        if let Err(e) = self.inner.tracker.update_blocks(&self.peer_id(), &file_name, owned).await {
            warn!("{}: tracker UPDATE_BLOCKS failed: {e}", self.peer_id());
        }
    }

    pub(super) async fn set_choked_by_them(&self, peer_id: &PeerId, choked: bool) {
        if let Some(handle) = self.inner.connections.lock().await.get_mut(peer_id) {
            handle.choked_by_them = choked;
        }
    }

    async fn set_choked_by_us(&self, peer_id: &PeerId, choked: bool) {
        if let Some(handle) = self.inner.connections.lock().await.get_mut(peer_id) {
            handle.choked_by_us = choked;
        }
    }

    // --- periodic tasks ---

    async fn run_manager_task(&self) {
        // Status is logged roughly every 10s; the manager tick itself runs
        // every `request_interval` (5s default), so every other tick.
        let mut tick: u32 = 0;
        loop {
            sleep(self.inner.config.request_interval).await;
            if !self.is_running() {
                break;
            }

            if !self.is_complete().await {
                self.refresh_peers_from_tracker().await;
            }
            self.dial_known_undialed_peers().await;
            if !self.is_complete().await {
                self.request_one_block().await;
            }

            tick = tick.wrapping_add(1);
            if tick % 2 == 0 {
                info!("{}: {}", self.peer_id(), self.status_string().await);
            }
        }
    }

    async fn refresh_peers_from_tracker(&self) {
        let file_name = self.inner.file_name.lock().await.clone();
        match self.inner.tracker.get_peers(&self.peer_id(), &file_name).await {
            Ok(peers) => {
                let mut directory = self.inner.directory.write().await;
                for peer in peers {
                    let addr = match format!("{}:{}", peer.address.0, peer.address.1).parse() {
                        Ok(addr) => addr,
                        Err(_) => continue,
                    };
                    directory
                        .entry(peer.peer_id)
                        .and_modify(|e| e.last_seen = Instant::now())
                        .or_insert(PeerDirectoryEntry {
                            address: addr,
                            advertised_blocks: peer.blocks.into_iter().collect(),
                            last_seen: Instant::now(),
                        });
                }
            }
            Err(e) => warn!("{}: tracker GET_PEERS failed: {e}", self.peer_id()),
        }
    }

    async fn dial_known_undialed_peers(&self) {
        let candidates: Vec<(PeerId, SocketAddr)> = {
            let directory = self.inner.directory.read().await;
            let connections = self.inner.connections.lock().await;
            if connections.len() >= self.inner.config.max_connections {
                return;
            }
            directory
                .iter()
                .filter(|(id, _)| !connections.contains_key(*id) && **id != self.peer_id())
                .map(|(id, entry)| (id.clone(), entry.address))
                .collect()
        };
        let slots = self.inner.config.max_connections.saturating_sub(self.inner.connections.lock().await.len());
        for (peer_id, addr) in candidates.into_iter().take(slots) {
            let node = self.clone();
            tokio::spawn(async move {
                if let Err(e) = connection::dial(node.clone(), peer_id.clone(), addr).await {
                    debug!("{}: dial to {peer_id} at {addr} failed: {e}", node.peer_id());
                }
            });
        }
    }

    async fn request_one_block(&self) {
        let rarest = self.inner.block_store.lock().await.rarest_missing();
        let connections = self.inner.connections.lock().await;
        for block_id in rarest {
            let holders = self.inner.block_store.lock().await.holders_of(&block_id);
            let candidates: Vec<PeerId> = connections
                .iter()
                .filter(|(id, handle)| holders.contains(id.as_str()) && !handle.choked_by_them)
                .map(|(id, _)| id.clone())
                .collect();
            if candidates.is_empty() {
                continue;
            }
            let target = candidates[rand::thread_rng().gen_range(0..candidates.len())].clone();
            drop(connections);
            self.send_to(&target, Message::RequestBlock { block_id }).await;
            return;
        }
    }

    async fn run_choke_task(&self) {
        loop {
            sleep(self.inner.config.evaluation_interval).await;
            if !self.is_running() {
                break;
            }

            let owned = self.inner.block_store.lock().await.owned_blocks();
            let interested: Vec<PeerId> = {
                let connections = self.inner.connections.lock().await;
                let store = self.inner.block_store.lock().await;
                connections
                    .keys()
                    .filter(|id| {
                        let theirs = store.peer_blocks(*id);
                        !owned.is_subset(&theirs)
                    })
                    .cloned()
                    .collect::<Vec<PeerId>>()
            };
            let rarity = self.inner.block_store.lock().await.block_rarity();

            let (to_choke, to_unchoke) = self.inner.choke.lock().await.evaluate(&interested, &rarity);
            for peer_id in to_choke {
                self.set_choked_by_us(&peer_id, true).await;
                self.send_to(&peer_id, Message::Choke).await;
            }
            for peer_id in to_unchoke {
                self.set_choked_by_us(&peer_id, false).await;
                self.send_to(&peer_id, Message::Unchoke).await;
            }
        }
    }
}
