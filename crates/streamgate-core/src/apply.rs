//! # Limit Application Protocol
//!
//! Pushes one user's computed limit to the media server's policy store.
//!
//! - Read-before-write: the stored limit is fetched first; no local cache
//!   of applied limits is kept.
//! - A limit within the change tolerance of the stored one is skipped.
//! - A changed limit on a playing session forces stop → settle → resume so
//!   the client renegotiates quality under the new cap. Idle sessions pick
//!   the limit up on their next playback start.
//! - Dry run reads and logs but never writes or restarts.

use std::time::Duration;

use crate::backup::LimitBackup;
use crate::error::ApplyError;
use crate::session::{ResumeRequest, SessionInfo};
use crate::source::MediaServer;
use crate::{bps_to_mbps, limit_to_bps};

/// Why a user's limit was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The stored policy could not be read.
    PolicyUnavailable,
    /// The stored limit already matches within tolerance.
    Unchanged,
}

/// Result of applying one user's limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied {
        old_bps: i64,
        new_bps: i64,
        restarted: bool,
    },
    Simulated {
        old_bps: i64,
        new_bps: i64,
        would_restart: bool,
    },
    Skipped(SkipReason),
}

/// Settings for applying limits.
#[derive(Debug, Clone)]
pub struct LimitApplier {
    pub dry_run: bool,
    /// Pause between stop and resume.
    pub restart_settle: Duration,
    /// Changes up to this many bps are not pushed.
    pub tolerance_bps: i64,
    /// Record original limits for restore on shutdown.
    pub backup_originals: bool,
}

impl Default for LimitApplier {
    fn default() -> Self {
        LimitApplier {
            dry_run: false,
            restart_settle: Duration::from_millis(800),
            tolerance_bps: 0,
            backup_originals: true,
        }
    }
}

fn playback_state(session: &SessionInfo) -> &'static str {
    if session.is_playing() {
        "playing"
    } else {
        "idle"
    }
}

impl LimitApplier {
    /// Apply `new_limit_mbps` to `user_id`.
    pub async fn apply<M: MediaServer>(
        &self,
        server: &M,
        backup: &mut LimitBackup,
        user_id: &str,
        new_limit_mbps: f64,
        session: &SessionInfo,
    ) -> Result<ApplyOutcome, ApplyError> {
        let new_bps = limit_to_bps(new_limit_mbps);
        let policy = server.user_policy(user_id).await;

        if self.dry_run {
            // Unreadable policy is reported as unlimited (0).
            let old_bps = match &policy {
                Ok(p) => p.remote_client_bitrate_limit,
                Err(e) => {
                    tracing::debug!(user_id, error = %e, "policy unavailable during dry run");
                    0
                }
            };
            let would_restart = session.is_playing();
            if would_restart {
                tracing::info!(
                    "[DRY RUN] Would change user {user_id} from {:.2} Mbps to {:.2} Mbps ({}) - would restart stream (session {})",
                    bps_to_mbps(old_bps),
                    bps_to_mbps(new_bps),
                    playback_state(session),
                    session.id,
                );
            } else {
                tracing::info!(
                    "[DRY RUN] Would change user {user_id} from {:.2} Mbps to {:.2} Mbps ({})",
                    bps_to_mbps(old_bps),
                    bps_to_mbps(new_bps),
                    playback_state(session),
                );
            }
            return Ok(ApplyOutcome::Simulated {
                old_bps,
                new_bps,
                would_restart,
            });
        }

        let mut policy = match policy {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "cannot read user policy, skipping");
                return Ok(ApplyOutcome::Skipped(SkipReason::PolicyUnavailable));
            }
        };

        let old_bps = policy.remote_client_bitrate_limit;
        if (old_bps - new_bps).abs() <= self.tolerance_bps {
            tracing::debug!(user_id, old_bps, new_bps, "limit unchanged");
            return Ok(ApplyOutcome::Skipped(SkipReason::Unchanged));
        }

        if self.backup_originals {
            backup.record(user_id, old_bps);
        }

        policy.remote_client_bitrate_limit = new_bps;
        server
            .set_user_policy(user_id, &policy)
            .await
            .map_err(|source| ApplyError::PolicyWrite {
                user_id: user_id.to_string(),
                source,
            })?;

        tracing::info!(
            user_id,
            "changed limit from {:.2} Mbps to {:.2} Mbps ({})",
            bps_to_mbps(old_bps),
            bps_to_mbps(new_bps),
            playback_state(session),
        );

        let restarted = if session.is_playing() {
            restart_session(server, session, user_id, self.restart_settle).await?;
            tracing::info!(user_id, session_id = %session.id, "restarted stream");
            true
        } else {
            false
        };

        Ok(ApplyOutcome::Applied {
            old_bps,
            new_bps,
            restarted,
        })
    }
}

/// Build the resume command that continues `session` where it stopped.
pub fn resume_request(session: &SessionInfo, fallback_user_id: &str) -> Option<ResumeRequest> {
    let item = session.now_playing_item.as_ref()?;
    Some(ResumeRequest {
        session_id: session.id.clone(),
        item_id: item.id.clone(),
        position_ticks: session.position_ticks(),
        media_source_id: session.media_source_id().map(str::to_string),
        controlling_user_id: session
            .user_id
            .clone()
            .unwrap_or_else(|| fallback_user_id.to_string()),
    })
}

/// Stop the session, wait `settle`, then resume at the same position.
///
/// Resume is never issued if stop failed.
pub async fn restart_session<M: MediaServer>(
    server: &M,
    session: &SessionInfo,
    user_id: &str,
    settle: Duration,
) -> Result<(), ApplyError> {
    let Some(request) = resume_request(session, user_id) else {
        return Ok(());
    };

    server
        .stop_playback(&session.id)
        .await
        .map_err(|source| ApplyError::Stop {
            session_id: session.id.clone(),
            source,
        })?;

    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }

    server
        .resume_playback(&request)
        .await
        .map_err(|source| ApplyError::Resume {
            session_id: session.id.clone(),
            source,
        })
}
