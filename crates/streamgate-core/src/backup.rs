//! Ledger of users' original bitrate limits, restored on shutdown.

use std::collections::BTreeMap;

use crate::source::MediaServer;

/// First-seen `RemoteClientBitrateLimit` (bps) per user we have modified.
#[derive(Debug, Clone, Default)]
pub struct LimitBackup {
    originals: BTreeMap<String, i64>,
}

impl LimitBackup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `original_bps` unless the user is already recorded.
    pub fn record(&mut self, user_id: &str, original_bps: i64) {
        self.originals
            .entry(user_id.to_string())
            .or_insert(original_bps);
    }

    pub fn original(&self, user_id: &str) -> Option<i64> {
        self.originals.get(user_id).copied()
    }

    pub fn len(&self) -> usize {
        self.originals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }

    /// Write every recorded limit back. Returns `true` if all succeeded;
    /// restored users are dropped from the ledger, failed ones are kept.
    pub async fn restore<M: MediaServer>(&mut self, server: &M) -> bool {
        let mut all_ok = true;
        let mut restored = Vec::new();

        for (user_id, &original_bps) in &self.originals {
            let mut policy = match server.user_policy(user_id).await {
                Ok(policy) => policy,
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        error = %e,
                        "cannot read policy for restore"
                    );
                    all_ok = false;
                    continue;
                }
            };
            policy.remote_client_bitrate_limit = original_bps;
            match server.set_user_policy(user_id, &policy).await {
                Ok(()) => {
                    tracing::info!(user_id = %user_id, original_bps, "restored bitrate limit");
                    restored.push(user_id.clone());
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        error = %e,
                        "failed to restore bitrate limit"
                    );
                    all_ok = false;
                }
            }
        }

        for user_id in restored {
            self.originals.remove(&user_id);
        }
        all_ok
    }
}
