use serde::{Deserialize, Serialize};

use crate::constants::QUOTA_WINDOW_SECS;

/// Creation history for one quota fingerprint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreationLog {
    /// Unix timestamps (seconds) of recent site creations, oldest first
    pub created_at: Vec<i64>,
    /// Public keys of the recorded sites, parallel to `created_at`
    pub public_keys: Vec<String>,
}

impl CreationLog {
    /// Drop entries that fell out of the trailing window
    pub fn prune(&mut self, now: i64) {
        let cutoff = now - QUOTA_WINDOW_SECS;
        let keep_from = self
            .created_at
            .iter()
            .position(|&t| t > cutoff)
            .unwrap_or(self.created_at.len());

        self.created_at.drain(..keep_from);
        self.public_keys.drain(..keep_from.min(self.public_keys.len()));
    }

    /// Number of creations in the trailing window
    pub fn recent(&self, now: i64) -> u64 {
        let cutoff = now - QUOTA_WINDOW_SECS;
        self.created_at.iter().filter(|&&t| t > cutoff).count() as u64
    }

    pub fn record(&mut self, public_key: &str, now: i64) {
        self.created_at.push(now);
        self.public_keys.push(public_key.to_string());
    }
}
