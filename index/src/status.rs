//! Point-in-time snapshot of the index's scalar fields.

use serde::{Deserialize, Serialize};

use crate::hash::BlockHash;

/// Everything a progress display needs, read under one lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainStatus {
    /// Height of the most recently added (or surviving) tip.
    pub tip_height: u64,

    /// Hash paired with `tip_height`.
    pub tip_hash: BlockHash,

    /// Best height the remote server has reported. Zero means unknown.
    pub server_tip_height: u64,

    /// `server_tip_height - tip_height`, floored at zero.
    pub hashes_left: u64,

    /// Number of entries in the index.
    pub hash_count: usize,
}

impl ChainStatus {
    /// Caught up with a known server tip.
    ///
    /// A server tip of zero means we have not heard from the server yet, so
    /// a fresh index is never considered synced.
    pub fn is_synced(&self) -> bool {
        self.server_tip_height > 0 && self.hashes_left == 0
    }

    /// Fraction of the remote chain already indexed, in `[0.0, 1.0]`.
    pub fn progress(&self) -> f64 {
        if self.server_tip_height == 0 {
            return 0.0;
        }
        (self.tip_height as f64 / self.server_tip_height as f64).clamp(0.0, 1.0)
    }
}
