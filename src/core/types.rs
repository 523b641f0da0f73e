//! Core types and configuration defaults

use std::path::PathBuf;
use std::time::Duration;

/// Identifier a peer picks for itself at startup: `Peer-<6 hex chars>`.
pub type PeerId = String;

/// Identifier of a single block: `{file_name}_{index}`.
pub type BlockId = String;

/// Extracts the numeric index suffix of a block id (`"movie.mp4_12"` -> `12`).
///
/// Returns `None` if the id has no `_` separator or the suffix does not parse
/// as a non-negative integer, per the block id format boundary case.
pub fn block_index(id: &str) -> Option<u64> {
    id.rsplit_once('_').and_then(|(_, suffix)| suffix.parse().ok())
}

/// Tunable parameters for a running node, with MiniBit's documented defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Size of a block in bytes. Last block of a file may be shorter.
    pub block_size: usize,
    /// Upper bound on the fixed (non-optimistic) unchoke slots.
    pub max_fixed_unchoked: usize,
    /// Upper bound on simultaneously dialed/accepted connections.
    pub max_connections: usize,
    /// How often the choke task re-evaluates who is unchoked.
    pub evaluation_interval: Duration,
    /// Minimum time an optimistic-unchoke slot is held before rotation.
    pub optimistic_interval: Duration,
    /// Period of the connection/request manager task.
    pub request_interval: Duration,
    /// Timeout for a single tracker RPC (connect + send + recv).
    pub tracker_timeout: Duration,
    /// Timeout for dialing a peer.
    pub dial_timeout: Duration,
    /// Directory leechers write completed downloads into.
    pub download_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: 16384,
            max_fixed_unchoked: 4,
            max_connections: 10,
            evaluation_interval: Duration::from_secs(10),
            optimistic_interval: Duration::from_secs(30),
            request_interval: Duration::from_secs(5),
            tracker_timeout: Duration::from_secs(5),
            dial_timeout: Duration::from_secs(5),
            download_dir: PathBuf::from("downloads"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_index_parses_suffix() {
        assert_eq!(block_index("movie.mp4_12"), Some(12));
        assert_eq!(block_index("a_b_7"), Some(7));
    }

    #[test]
    fn block_index_rejects_malformed() {
        assert_eq!(block_index("noseparator"), None);
        assert_eq!(block_index("movie.mp4_abc"), None);
    }

    #[test]
    fn default_config_matches_documented_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.block_size, 16384);
        assert_eq!(cfg.max_fixed_unchoked, 4);
        assert_eq!(cfg.max_connections, 10);
        assert_eq!(cfg.evaluation_interval, Duration::from_secs(10));
        assert_eq!(cfg.optimistic_interval, Duration::from_secs(30));
    }
}
