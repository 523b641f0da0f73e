//! Owned blocks, swarm-wide availability, and file reconstruction.

use crate::core::{block_index, BlockId, BlockStoreError, PeerId, Result};
use log::{debug, info};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Holds the blocks we own, who else holds what, and the file's block
/// ordering. One instance per shared/downloaded file.
#[derive(Debug, Default)]
pub struct BlockStore {
    file_name: String,
    block_size: usize,
    /// Blocks we have locally.
    owned: HashMap<BlockId, Vec<u8>>,
    /// Full ordered list of this file's block ids, once known.
    all_block_ids: Vec<BlockId>,
    /// block id -> set of peers known to hold it.
    peer_block_map: HashMap<BlockId, HashSet<PeerId>>,
    total_block_count: usize,
}

impl BlockStore {
    pub fn new(file_name: impl Into<String>, block_size: usize) -> Self {
        Self {
            file_name: file_name.into(),
            block_size,
            ..Default::default()
        }
    }

    /// Reads `path` sequentially and populates the store as a complete
    /// seeder: `total_block_count = ceil(file_size / block_size)`.
    pub async fn load_from_file(file_name: impl Into<String>, block_size: usize, path: impl AsRef<Path>) -> Result<Self> {
        let file_name = file_name.into();
        let mut store = Self::new(file_name.clone(), block_size);
        let mut file = File::open(path).await?;
        let mut index = 0u64;
        loop {
            let mut buf = vec![0u8; block_size];
            let mut filled = 0;
            while filled < block_size {
                let n = file.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            buf.truncate(filled);
            let id = format!("{}_{}", file_name, index);
            store.all_block_ids.push(id.clone());
            store.owned.insert(id, buf);
            index += 1;
            if filled < block_size {
                break;
            }
        }
        store.total_block_count = store.all_block_ids.len();
        info!(
            "{}: loaded {} blocks from disk ({} bytes/block)",
            file_name, store.total_block_count, block_size
        );
        Ok(store)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn total_block_count(&self) -> usize {
        self.total_block_count
    }

    /// Stores a block. Returns `false` (no-op) if already owned or if the
    /// id is known not to belong to this file.
    pub fn add_block(&mut self, id: BlockId, data: Vec<u8>) -> bool {
        if self.owned.contains_key(&id) {
            return false;
        }
        if !self.all_block_ids.is_empty() && !self.all_block_ids.contains(&id) {
            return false;
        }
        self.owned.insert(id, data);
        true
    }

    pub fn get_block_data(&self, id: &str) -> Option<&[u8]> {
        self.owned.get(id).map(Vec::as_slice)
    }

    pub fn owned_blocks(&self) -> HashSet<BlockId> {
        self.owned.keys().cloned().collect()
    }

    pub fn missing_blocks(&self) -> HashSet<BlockId> {
        self.all_block_ids
            .iter()
            .filter(|id| !self.owned.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.total_block_count > 0 && self.owned.len() == self.total_block_count
    }

    /// Updates availability knowledge for `peer_id`. Bootstraps
    /// `all_block_ids` from this peer's advertised set if we don't yet
    /// know the file's shape (leecher with no local copy).
    pub fn update_peer_blocks(&mut self, peer_id: &PeerId, advertised: &HashSet<BlockId>) {
        if self.total_block_count == 0 && !advertised.is_empty() {
            let mut ids: Vec<BlockId> = advertised.iter().cloned().collect();
            ids.sort_by_key(|id| block_index(id).unwrap_or(u64::MAX));
            self.total_block_count = ids.len();
            self.all_block_ids = ids;
            debug!(
                "{}: bootstrapped block list ({} blocks) from peer {}",
                self.file_name, self.total_block_count, peer_id
            );
        }

        for (id, holders) in self.peer_block_map.iter_mut() {
            if !advertised.contains(id) {
                holders.remove(peer_id);
            }
        }
        for id in advertised {
            self.peer_block_map
                .entry(id.clone())
                .or_default()
                .insert(peer_id.clone());
        }
    }

    /// Removes all trace of `peer_id` from availability tracking.
    pub fn remove_peer(&mut self, peer_id: &PeerId) {
        for holders in self.peer_block_map.values_mut() {
            holders.remove(peer_id);
        }
    }

    /// Missing blocks sorted ascending by number of known holders (rarest
    /// first); unheld blocks (rarity 0) sort first. Ties break by index.
    pub fn rarest_missing(&self) -> Vec<BlockId> {
        let mut missing: Vec<BlockId> = self.missing_blocks().into_iter().collect();
        missing.sort_by_key(|id| {
            let rarity = self.peer_block_map.get(id).map_or(0, HashSet::len);
            (rarity, block_index(id).unwrap_or(u64::MAX))
        });
        missing
    }

    /// Peers known to hold block `id`.
    pub fn holders_of(&self, id: &str) -> HashSet<PeerId> {
        self.peer_block_map.get(id).cloned().unwrap_or_default()
    }

    pub fn peer_blocks(&self, peer_id: &PeerId) -> HashSet<BlockId> {
        self.peer_block_map
            .iter()
            .filter(|(_, holders)| holders.contains(peer_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn block_rarity(&self) -> HashMap<BlockId, usize> {
        self.all_block_ids
            .iter()
            .map(|id| (id.clone(), self.peer_block_map.get(id).map_or(0, HashSet::len)))
            .collect()
    }

    /// Concatenates owned blocks in index order to `output_path`. The
    /// caller is responsible for creating the parent directory.
    pub async fn reconstruct_file(&self, output_path: impl AsRef<Path>) -> Result<PathBuf> {
        if !self.is_complete() {
            return Err(BlockStoreError::IncompleteFile.into());
        }
        let path = output_path.as_ref().to_path_buf();
        let mut file = File::create(&path).await?;
        for id in &self.all_block_ids {
            let data = self
                .owned
                .get(id)
                .ok_or_else(|| BlockStoreError::UnknownBlock { id: id.clone() })?;
            file.write_all(data).await?;
        }
        file.flush().await?;
        info!("{}: reconstructed file at {}", self.file_name, path.display());
        Ok(path)
    }

    /// Human-readable one-line progress summary for the periodic status log.
    pub fn status_string(&self) -> String {
        if self.total_block_count == 0 {
            return format!("{}: idle (block list not yet known)", self.file_name);
        }
        let owned = self.owned.len();
        let pct = (owned as f64 / self.total_block_count as f64) * 100.0;
        format!(
            "{}: {:.1}% | {}/{} blocks",
            self.file_name, pct, owned, self.total_block_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_block_rejects_duplicates() {
        let mut store = BlockStore::new("f", 4);
        assert!(store.add_block("f_0".into(), vec![1, 2, 3, 4]));
        assert!(!store.add_block("f_0".into(), vec![9, 9, 9, 9]));
        assert_eq!(store.get_block_data("f_0").unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn owned_and_missing_partition_all_block_ids() {
        let mut store = BlockStore::new("f", 4);
        store.all_block_ids = vec!["f_0".into(), "f_1".into(), "f_2".into()];
        store.total_block_count = 3;
        store.add_block("f_0".into(), vec![0; 4]);
        let owned = store.owned_blocks();
        let missing = store.missing_blocks();
        assert!(owned.is_disjoint(&missing));
        let union: HashSet<_> = owned.union(&missing).cloned().collect();
        let expected: HashSet<_> = store.all_block_ids.iter().cloned().collect();
        assert_eq!(union, expected);
    }

    #[test]
    fn is_complete_guards_against_zero_total() {
        let store = BlockStore::new("f", 4);
        assert!(!store.is_complete());
    }

    #[test]
    fn update_peer_blocks_bootstraps_all_block_ids_from_first_have() {
        let mut store = BlockStore::new("f", 4);
        let mut advertised = HashSet::new();
        advertised.insert("f_1".to_string());
        advertised.insert("f_0".to_string());
        store.update_peer_blocks(&"Peer-aaa".to_string(), &advertised);
        assert_eq!(store.total_block_count, 2);
        assert_eq!(store.all_block_ids, vec!["f_0".to_string(), "f_1".to_string()]);
    }

    #[test]
    fn update_peer_blocks_is_idempotent() {
        let mut store = BlockStore::new("f", 4);
        let mut advertised = HashSet::new();
        advertised.insert("f_0".to_string());
        let peer = "Peer-aaa".to_string();
        store.update_peer_blocks(&peer, &advertised);
        let before = store.peer_block_map.clone();
        store.update_peer_blocks(&peer, &advertised);
        assert_eq!(store.peer_block_map, before);
    }

    #[test]
    fn remove_peer_purges_every_entry() {
        let mut store = BlockStore::new("f", 4);
        let mut advertised = HashSet::new();
        advertised.insert("f_0".to_string());
        advertised.insert("f_1".to_string());
        let peer = "Peer-aaa".to_string();
        store.update_peer_blocks(&peer, &advertised);
        store.remove_peer(&peer);
        for holders in store.peer_block_map.values() {
            assert!(!holders.contains(&peer));
        }
    }

    #[test]
    fn holders_of_reflects_update_peer_blocks() {
        let mut store = BlockStore::new("f", 4);
        let mut advertised = HashSet::new();
        advertised.insert("f_0".to_string());
        store.update_peer_blocks(&"Peer-aaa".to_string(), &advertised);
        let holders = store.holders_of("f_0");
        assert_eq!(holders.len(), 1);
        assert!(holders.contains("Peer-aaa"));
        assert!(store.holders_of("f_1").is_empty());
    }

    #[test]
    fn rarest_missing_orders_by_holder_count_then_index() {
        let mut store = BlockStore::new("f", 4);
        store.all_block_ids = vec!["f_0".into(), "f_1".into(), "f_2".into(), "f_3".into()];
        store.total_block_count = 4;
        for (peer, blocks) in [
            ("Peer-a", vec!["f_0", "f_2", "f_3"]),
            ("Peer-b", vec!["f_2", "f_3"]),
            ("Peer-c", vec!["f_0", "f_3"]),
        ] {
            let set: HashSet<BlockId> = blocks.into_iter().map(String::from).collect();
            store.update_peer_blocks(&peer.to_string(), &set);
        }
        // rarity: f_0=2, f_1=0, f_2=2, f_3=3
        assert_eq!(store.rarest_missing(), vec!["f_1", "f_0", "f_2", "f_3"]);
    }

    #[test]
    fn is_complete_implies_no_rarest_missing() {
        let mut store = BlockStore::new("f", 4);
        store.all_block_ids = vec!["f_0".into(), "f_1".into()];
        store.total_block_count = 2;
        store.add_block("f_0".into(), vec![0; 4]);
        store.add_block("f_1".into(), vec![0; 2]);
        assert!(store.is_complete());
        assert!(store.rarest_missing().is_empty());
    }

    #[tokio::test]
    async fn load_from_file_handles_exact_multiple_and_short_last_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exact.bin");
        tokio::fs::write(&path, vec![7u8; 8]).await.unwrap();
        let store = BlockStore::load_from_file("exact.bin", 4, &path).await.unwrap();
        assert_eq!(store.total_block_count(), 2);
        assert_eq!(store.get_block_data("exact.bin_1").unwrap().len(), 4);

        let short_path = dir.path().join("short.bin");
        tokio::fs::write(&short_path, vec![7u8; 6]).await.unwrap();
        let store = BlockStore::load_from_file("short.bin", 4, &short_path).await.unwrap();
        assert_eq!(store.total_block_count(), 2);
        assert_eq!(store.get_block_data("short.bin_1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reconstruct_file_round_trips_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("in.bin");
        let original: Vec<u8> = (0u8..=255).cycle().take(40000).collect();
        tokio::fs::write(&input_path, &original).await.unwrap();

        let store = BlockStore::load_from_file("in.bin", 16384, &input_path).await.unwrap();
        assert!(store.is_complete());

        let output_path = dir.path().join("out.bin");
        store.reconstruct_file(&output_path).await.unwrap();
        let written = tokio::fs::read(&output_path).await.unwrap();
        assert_eq!(written, original);
    }

    #[tokio::test]
    async fn reconstruct_file_fails_when_incomplete() {
        let store = BlockStore::new("f", 4);
        let dir = tempfile::tempdir().unwrap();
        let err = store.reconstruct_file(dir.path().join("out.bin")).await;
        assert!(err.is_err());
    }
}
