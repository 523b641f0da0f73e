//! One-shot RPC helper: connect, send one request, read one response, close.
//! No persistent session with the tracker is assumed.

use super::{Address, PeerAdvertisement, TrackerRequest, TrackerResponse};
use crate::core::{Result, TrackerError};
use crate::protocol::{write_json, FrameReader};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

pub struct TrackerClient {
    addr: String,
    rpc_timeout: Duration,
}

impl TrackerClient {
    pub fn new(addr: impl Into<String>, rpc_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            rpc_timeout,
        }
    }

    async fn roundtrip(&self, request: TrackerRequest) -> Result<TrackerResponse> {
        let fut = async {
            let mut stream = TcpStream::connect(&self.addr).await?;
            write_json(&mut stream, &request).await?;
            let mut reader = FrameReader::new();
            reader.read_json::<_, TrackerResponse>(&mut stream).await
        };
        timeout(self.rpc_timeout, fut).await.map_err(|_| {
            TrackerError::Unreachable {
                addr: self.addr.clone(),
                reason: "timed out".to_string(),
            }
            .into()
        })?
    }

    pub async fn register(
        &self,
        peer_id: &str,
        file_name: &str,
        address: Address,
        blocks: Vec<String>,
    ) -> Result<()> {
        let response = self
            .roundtrip(TrackerRequest::Register {
                peer_id: peer_id.to_string(),
                file_name: file_name.to_string(),
                address,
                blocks,
            })
            .await?;
        ensure_ok(response)
    }

    pub async fn get_peers(
        &self,
        peer_id: &str,
        file_name: &str,
    ) -> Result<Vec<PeerAdvertisement>> {
        let response = self
            .roundtrip(TrackerRequest::GetPeers {
                peer_id: peer_id.to_string(),
                file_name: file_name.to_string(),
            })
            .await?;
        if !response.is_ok() {
            return Err(TrackerError::Rejected {
                message: response.message.unwrap_or_default(),
            }
            .into());
        }
        Ok(response.peers.unwrap_or_default())
    }

    pub async fn update_blocks(
        &self,
        peer_id: &str,
        file_name: &str,
        blocks: Vec<String>,
    ) -> Result<()> {
        let response = self
            .roundtrip(TrackerRequest::UpdateBlocks {
                peer_id: peer_id.to_string(),
                file_name: file_name.to_string(),
                blocks,
            })
            .await?;
        ensure_ok(response)
    }

    pub async fn remove(&self, peer_id: &str) -> Result<()> {
        let response = self
            .roundtrip(TrackerRequest::Remove {
                peer_id: peer_id.to_string(),
            })
            .await?;
        ensure_ok(response)
    }
}

fn ensure_ok(response: TrackerResponse) -> Result<()> {
    if response.is_ok() {
        Ok(())
    } else {
        Err(TrackerError::Rejected {
            message: response.message.unwrap_or_default(),
        }
        .into())
    }
}
