//! Collaborator capabilities consumed by the control loop.
//!
//! Implementations carry their own request timeouts; the core trusts them
//! and never imposes a deadline of its own.

use std::net::IpAddr;

use crate::error::SourceError;
use crate::session::{ResumeRequest, SessionInfo, UserInfo, UserPolicy};

/// Uplink usage measurement (router side).
#[allow(async_fn_in_trait)]
pub trait UsageSource {
    /// Connectivity probe.
    async fn check(&self) -> Result<(), SourceError>;

    /// Current upload usage in Mbps, for the whole uplink or for one host.
    async fn upload_usage(&self, ip: Option<IpAddr>) -> Result<f64, SourceError>;

    /// Total upload capacity in Mbps.
    async fn total_capacity(&self) -> Result<f64, SourceError>;
}

/// Session list, policy store and playback transport (media server side).
#[allow(async_fn_in_trait)]
pub trait MediaServer {
    /// Connectivity probe.
    async fn check(&self) -> Result<(), SourceError>;

    async fn active_sessions(&self) -> Result<Vec<SessionInfo>, SourceError>;

    async fn user_info(&self, user_id: &str) -> Result<UserInfo, SourceError>;

    async fn user_policy(&self, user_id: &str) -> Result<UserPolicy, SourceError>;

    async fn set_user_policy(&self, user_id: &str, policy: &UserPolicy)
        -> Result<(), SourceError>;

    async fn stop_playback(&self, session_id: &str) -> Result<(), SourceError>;

    async fn resume_playback(&self, request: &ResumeRequest) -> Result<(), SourceError>;
}
