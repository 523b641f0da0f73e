//! In-memory membership registry: `file_name -> peer_id -> (address, blocks)`.
//! Every mutation is serialized by the caller holding the single lock around
//! the whole `TrackerRegistry` (see `Tracker`).

use super::{Address, PeerAdvertisement};
use rand::seq::SliceRandom;
use std::collections::HashMap;

const MAX_PEERS_RETURNED: usize = 5;

#[derive(Debug, Clone)]
struct Entry {
    address: Address,
    blocks: Vec<String>,
}

#[derive(Debug, Default)]
pub struct TrackerRegistry {
    files: HashMap<String, HashMap<String, Entry>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, file_name: &str, peer_id: &str, address: Address, blocks: Vec<String>) {
        self.files
            .entry(file_name.to_string())
            .or_default()
            .insert(peer_id.to_string(), Entry { address, blocks });
    }

    /// Up to `MAX_PEERS_RETURNED` other peers registered for `file_name`,
    /// uniformly sampled if more exist, excluding `requester`.
    pub fn get_peers(&self, file_name: &str, requester: &str) -> Vec<PeerAdvertisement> {
        let Some(peers) = self.files.get(file_name) else {
            return Vec::new();
        };
        let mut candidates: Vec<PeerAdvertisement> = peers
            .iter()
            .filter(|(id, _)| id.as_str() != requester)
            .map(|(id, entry)| PeerAdvertisement {
                peer_id: id.clone(),
                address: entry.address.clone(),
                blocks: entry.blocks.clone(),
            })
            .collect();
        let mut rng = rand::thread_rng();
        candidates.shuffle(&mut rng);
        candidates.truncate(MAX_PEERS_RETURNED);
        candidates
    }

    /// Updates the advertised block set for an already-registered peer.
    /// Returns `false` if the peer is not registered for `file_name`.
    pub fn update_blocks(&mut self, file_name: &str, peer_id: &str, blocks: Vec<String>) -> bool {
        match self.files.get_mut(file_name).and_then(|peers| peers.get_mut(peer_id)) {
            Some(entry) => {
                entry.blocks = blocks;
                true
            }
            None => false,
        }
    }

    /// Removes `peer_id` from every file's registry. Returns `true` if it was
    /// present anywhere.
    pub fn remove(&mut self, peer_id: &str) -> bool {
        let mut removed = false;
        for peers in self.files.values_mut() {
            if peers.remove(peer_id).is_some() {
                removed = true;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_get_peers_excludes_requester() {
        let mut reg = TrackerRegistry::new();
        reg.register("f", "Peer-a", ("127.0.0.1".into(), 9001), vec!["f_0".into()]);
        reg.register("f", "Peer-b", ("127.0.0.1".into(), 9002), vec!["f_1".into()]);
        let peers = reg.get_peers("f", "Peer-a");
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, "Peer-b");
    }

    #[test]
    fn get_peers_caps_at_five() {
        let mut reg = TrackerRegistry::new();
        for i in 0..8 {
            reg.register("f", &format!("Peer-{i}"), ("127.0.0.1".into(), 9000 + i), vec![]);
        }
        let peers = reg.get_peers("f", "Peer-0");
        assert_eq!(peers.len(), 5);
    }

    #[test]
    fn update_blocks_fails_for_unknown_peer() {
        let mut reg = TrackerRegistry::new();
        assert!(!reg.update_blocks("f", "Peer-ghost", vec![]));
        reg.register("f", "Peer-a", ("127.0.0.1".into(), 9001), vec![]);
        assert!(reg.update_blocks("f", "Peer-a", vec!["f_0".into()]));
    }

    #[test]
    fn remove_purges_peer_from_every_file() {
        let mut reg = TrackerRegistry::new();
        reg.register("f1", "Peer-a", ("127.0.0.1".into(), 9001), vec![]);
        reg.register("f2", "Peer-a", ("127.0.0.1".into(), 9001), vec![]);
        assert!(reg.remove("Peer-a"));
        assert!(reg.get_peers("f1", "Peer-x").is_empty());
        assert!(reg.get_peers("f2", "Peer-x").is_empty());
        assert!(!reg.remove("Peer-a"));
    }
}
