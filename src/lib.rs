//! MiniBit: a simplified BitTorrent-style peer-to-peer file distribution
//! system. A swarm of peers exchanges fixed-size blocks of a named file,
//! coordinated by a lightweight tracker that only tracks membership and
//! block availability; all transfer is strictly peer-to-peer.

pub mod block_store;
pub mod choke;
pub mod core;
pub mod peer;
pub mod protocol;
pub mod tracker;

pub use core::*;

/// Re-exports for common use sites (the CLI binary, integration tests).
pub mod prelude {
    pub use crate::block_store::BlockStore;
    pub use crate::choke::ChokeController;
    pub use crate::core::*;
    pub use crate::peer::PeerNode;
    pub use crate::protocol::Message;
    pub use crate::tracker::{Tracker, TrackerClient};
    pub use anyhow::{Error, Result};
}