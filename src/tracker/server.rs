//! Accept loop answering one request per connection, then closing it.

use super::{TrackerRegistry, TrackerRequest, TrackerResponse};
use crate::protocol::FrameReader;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

pub struct Tracker {
    registry: Arc<Mutex<TrackerRegistry>>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    local_addr: Mutex<Option<std::net::SocketAddr>>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(TrackerRegistry::new())),
            shutdown_tx: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    pub async fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Binds `addr` and runs the accept loop until `stop()` is called.
    /// Returns once the listen socket is closed.
    pub async fn run(self: &Arc<Self>, addr: &str) -> crate::core::Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|_| crate::core::NetworkError::BindFailed { addr: addr.to_string() })?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        info!("tracker: listening on {local_addr}");

        let (tx, mut rx) = mpsc::channel(1);
        *self.shutdown_tx.lock().await = Some(tx);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let tracker = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = tracker.handle_connection(stream).await {
                                    debug!("tracker: connection from {peer_addr} ended: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            warn!("tracker: accept failed: {e}");
                        }
                    }
                }
                _ = rx.recv() => {
                    info!("tracker: shutting down");
                    break;
                }
            }
        }
        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(()).await;
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> crate::core::Result<()> {
        let (mut read_half, mut write_half) = stream.split();
        let mut reader = FrameReader::new();
        let raw: serde_json::Value = reader.read_json(&mut read_half).await?;
        let peer_id_for_session = raw.get("peer_id").and_then(|v| v.as_str()).map(str::to_string);

        let response = match serde_json::from_value::<TrackerRequest>(raw) {
            Ok(request) => self.dispatch(request).await,
            Err(_) => TrackerResponse::error("Comando desconhecido"),
        };
        let result = crate::protocol::write_json(&mut write_half, &response).await;
        if let Err(e) = &result {
            if let Some(peer_id) = &peer_id_for_session {
                if self.registry.lock().await.remove(peer_id) {
                    warn!("tracker: evicted {peer_id} after connection error: {e}");
                }
            }
        }
        result
    }

    async fn dispatch(&self, request: TrackerRequest) -> TrackerResponse {
        let mut registry = self.registry.lock().await;
        match request {
            TrackerRequest::Register { peer_id, file_name, address, blocks } => {
                registry.register(&file_name, &peer_id, address, blocks);
                TrackerResponse::ok()
            }
            TrackerRequest::GetPeers { peer_id, file_name } => {
                let peers = registry.get_peers(&file_name, &peer_id);
                TrackerResponse::ok_with_peers(peers)
            }
            TrackerRequest::UpdateBlocks { peer_id, file_name, blocks } => {
                if registry.update_blocks(&file_name, &peer_id, blocks) {
                    TrackerResponse::ok()
                } else {
                    TrackerResponse::error(format!("unknown peer {peer_id} for file {file_name}"))
                }
            }
            TrackerRequest::Remove { peer_id } => {
                if registry.remove(&peer_id) {
                    TrackerResponse::ok()
                } else {
                    TrackerResponse::fail()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackerClient;

    #[tokio::test]
    async fn register_then_get_peers_round_trips_over_tcp() {
        let tracker = Arc::new(Tracker::new());
        let server = Arc::clone(&tracker);
        let handle = tokio::spawn(async move {
            server.run("127.0.0.1:0").await.unwrap();
        });
        // Wait for the listener to bind.
        let mut addr = None;
        for _ in 0..100 {
            if let Some(a) = tracker.local_addr().await {
                addr = Some(a);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let addr = addr.expect("tracker bound in time");

        let client = TrackerClient::new(addr.to_string(), std::time::Duration::from_secs(5));
        client
            .register("Peer-a", "f", ("127.0.0.1".into(), 9001), vec!["f_0".into()])
            .await
            .unwrap();
        let peers = client.get_peers("Peer-b", "f").await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, "Peer-a");

        tracker.stop().await;
        let _ = handle.await;
    }

    #[tokio::test]
    async fn unknown_command_gets_portuguese_error_response() {
        let tracker = Arc::new(Tracker::new());
        let server = Arc::clone(&tracker);
        let handle = tokio::spawn(async move {
            server.run("127.0.0.1:0").await.unwrap();
        });
        let mut addr = None;
        for _ in 0..100 {
            if let Some(a) = tracker.local_addr().await {
                addr = Some(a);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let addr = addr.expect("tracker bound in time");

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let bogus = serde_json::json!({"command": "DANCE", "peer_id": "Peer-a"});
        crate::protocol::write_json(&mut stream, &bogus).await.unwrap();
        let mut reader = FrameReader::new();
        let response: TrackerResponse = reader.read_json(&mut stream).await.unwrap();
        assert_eq!(response.status, "error");
        assert_eq!(response.message.as_deref(), Some("Comando desconhecido"));

        tracker.stop().await;
        let _ = handle.await;
    }
}
