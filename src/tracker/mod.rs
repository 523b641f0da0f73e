//! Peer membership and block-availability registry. Unlike peer-to-peer
//! connections, a tracker exchange is one request, one response, then the
//! connection closes.

mod client;
mod registry;
mod server;

pub use client::TrackerClient;
pub use registry::TrackerRegistry;
pub use server::Tracker;

use serde::{Deserialize, Serialize};

/// One (ip, port) pair as carried in tracker JSON.
pub type Address = (String, u16);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum TrackerRequest {
    #[serde(rename = "REGISTER")]
    Register {
        peer_id: String,
        file_name: String,
        address: Address,
        blocks: Vec<String>,
    },
    #[serde(rename = "GET_PEERS")]
    GetPeers { peer_id: String, file_name: String },
    #[serde(rename = "UPDATE_BLOCKS")]
    UpdateBlocks {
        peer_id: String,
        file_name: String,
        blocks: Vec<String>,
    },
    #[serde(rename = "REMOVE")]
    Remove { peer_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerAdvertisement {
    pub peer_id: String,
    pub address: Address,
    pub blocks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peers: Option<Vec<PeerAdvertisement>>,
}

impl TrackerResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            message: None,
            peers: None,
        }
    }

    pub fn ok_with_peers(peers: Vec<PeerAdvertisement>) -> Self {
        Self {
            status: "ok".to_string(),
            message: None,
            peers: Some(peers),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.into()),
            peers: None,
        }
    }

    pub fn fail() -> Self {
        Self {
            status: "fail".to_string(),
            message: None,
            peers: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}
