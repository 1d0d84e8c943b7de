//! Uplink bandwidth allocation for remote media-streaming sessions.
//!
//! This crate contains:
//! - **Usage estimation**: rolling average of uplink upload usage
//! - **Demand classification**: above-threshold flag for high-demand mode
//! - **Streamer tracking**: join/leave diff of external sessions per cycle
//! - **Allocation**: equal-split, priority-based and demand-based strategies
//! - **Limit application**: read-before-write policy push with playback restart
//! - **Controller**: the single-owner polling cycle tying it together

pub mod allocation;
pub mod apply;
pub mod backup;
pub mod config;
pub mod controller;
pub mod demand;
pub mod error;
pub mod estimator;
pub mod network;
pub mod session;
pub mod source;
pub mod tracker;

/// Bits per second in one Mbps.
pub const BPS_PER_MBPS: f64 = 1_000_000.0;

/// Convert a limit in Mbps to the integer bps stored in a user policy.
pub fn mbps_to_bps(mbps: f64) -> i64 {
    (mbps.max(0.0) * BPS_PER_MBPS).round() as i64
}

/// Bitrate limit written to a user policy. Never zero, which the server
/// treats as unlimited.
pub fn limit_to_bps(mbps: f64) -> i64 {
    mbps_to_bps(mbps).max(1)
}

/// Convert a policy bps value back to Mbps.
pub fn bps_to_mbps(bps: i64) -> f64 {
    bps as f64 / BPS_PER_MBPS
}
