//! Tit-for-tat choke/unchoke scheduling: a fixed set of unchoked peers plus
//! one periodically-rotated optimistic slot.

use crate::core::{Config, PeerId};
use log::info;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

#[derive(Debug)]
pub struct ChokeController {
    max_fixed_unchoked: usize,
    optimistic_interval: std::time::Duration,
    fixed_unchoked: HashSet<PeerId>,
    optimistic_unchoked: Option<PeerId>,
    optimistic_since: Option<Instant>,
}

impl ChokeController {
    pub fn new(config: &Config) -> Self {
        Self {
            max_fixed_unchoked: config.max_fixed_unchoked,
            optimistic_interval: config.optimistic_interval,
            fixed_unchoked: HashSet::new(),
            optimistic_unchoked: None,
            optimistic_since: None,
        }
    }

    /// True iff `peer_id` currently sits in the fixed or optimistic slot.
    pub fn is_unchoked(&self, peer_id: &PeerId) -> bool {
        self.fixed_unchoked.contains(peer_id) || self.optimistic_unchoked.as_ref() == Some(peer_id)
    }

    fn currently_unchoked(&self) -> HashSet<PeerId> {
        let mut set = self.fixed_unchoked.clone();
        if let Some(p) = &self.optimistic_unchoked {
            set.insert(p.clone());
        }
        set
    }

    /// Re-evaluates who should be unchoked given the currently interested
    /// peers (those missing at least one block we hold). Returns
    /// `(to_choke, to_unchoke)`, the peers that must transition.
    ///
    /// `rarity_map` is accepted to mirror the canonical BitTorrent
    /// rate-ranked policy's inputs, but the default ranking (per the
    /// source this crate follows) is uniform random over interested peers.
    pub fn evaluate(
        &mut self,
        interested: &[PeerId],
        _rarity_map: &HashMap<String, usize>,
    ) -> (Vec<PeerId>, Vec<PeerId>) {
        let previous = self.currently_unchoked();

        if interested.is_empty() {
            self.fixed_unchoked.clear();
            self.optimistic_unchoked = None;
            self.optimistic_since = None;
            let to_choke: Vec<PeerId> = previous.into_iter().collect();
            if !to_choke.is_empty() {
                info!("choke: no interested peers, choking everyone ({:?})", to_choke);
            }
            return (to_choke, Vec::new());
        }

        let mut shuffled: Vec<PeerId> = interested.to_vec();
        let mut rng = rand::thread_rng();
        shuffled.shuffle(&mut rng);

        let new_fixed: HashSet<PeerId> = shuffled
            .iter()
            .take(self.max_fixed_unchoked)
            .cloned()
            .collect();

        let optimistic_still_valid = self
            .optimistic_unchoked
            .as_ref()
            .map(|p| interested.contains(p) && !new_fixed.contains(p))
            .unwrap_or(false);
        let interval_elapsed = self
            .optimistic_since
            .map(|since| since.elapsed() >= self.optimistic_interval)
            .unwrap_or(true);

        let new_optimistic = if optimistic_still_valid && !interval_elapsed {
            self.optimistic_unchoked.clone()
        } else {
            let candidates: Vec<&PeerId> = shuffled
                .iter()
                .filter(|p| !new_fixed.contains(*p))
                .collect();
            candidates.choose(&mut rng).map(|p| (*p).clone())
        };

        if new_optimistic != self.optimistic_unchoked {
            self.optimistic_since = Some(Instant::now());
        }

        self.fixed_unchoked = new_fixed;
        self.optimistic_unchoked = new_optimistic;

        let newly_unchoked = self.currently_unchoked();
        let to_unchoke: Vec<PeerId> = newly_unchoked.difference(&previous).cloned().collect();
        let to_choke: Vec<PeerId> = previous.difference(&newly_unchoked).cloned().collect();

        if !to_choke.is_empty() || !to_unchoke.is_empty() {
            info!(
                "choke: unchoking {:?}, choking {:?} (fixed={:?}, optimistic={:?})",
                to_unchoke, to_choke, self.fixed_unchoked, self.optimistic_unchoked
            );
        }

        (to_choke, to_unchoke)
    }

    /// Purges `peer_id` from every slot. The optimistic slot is cleared
    /// outright rather than re-selected immediately; re-selection happens
    /// on the next `evaluate` call.
    pub fn unregister(&mut self, peer_id: &PeerId) {
        self.fixed_unchoked.remove(peer_id);
        if self.optimistic_unchoked.as_ref() == Some(peer_id) {
            self.optimistic_unchoked = None;
            self.optimistic_since = None;
        }
    }
}
