//! Peer node: listen socket, outgoing dialer, per-connection message loops,
//! and the periodic connection/request and choke tasks that wire
//! `BlockStore` and `ChokeController` into a running swarm member.

mod connection;
mod node;

pub use node::{PeerDirectoryEntry, PeerNode};