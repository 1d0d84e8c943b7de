//! Session, user and policy records exchanged with the media server.
//!
//! Field names follow the Jellyfin JSON schema (PascalCase). `UserPolicy`
//! keeps every field it does not model so a policy can be read, edited and
//! written back without losing server-side settings.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// One active session as reported by the media server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// `"ip:port"` of the client.
    #[serde(default)]
    pub remote_end_point: Option<String>,
    #[serde(default)]
    pub now_playing_item: Option<NowPlayingItem>,
    #[serde(default)]
    pub play_state: Option<PlayState>,
}

impl SessionInfo {
    /// Playback is in progress.
    pub fn is_playing(&self) -> bool {
        self.now_playing_item.is_some()
    }

    /// Media source currently used for playback.
    ///
    /// Prefers the play state; falls back to the item's first media source.
    pub fn media_source_id(&self) -> Option<&str> {
        self.play_state
            .as_ref()
            .and_then(|p| p.media_source_id.as_deref())
            .or_else(|| {
                self.now_playing_item
                    .as_ref()
                    .and_then(|item| item.media_sources.first())
                    .map(|ms| ms.id.as_str())
            })
    }

    pub fn position_ticks(&self) -> i64 {
        self.play_state
            .as_ref()
            .and_then(|p| p.position_ticks)
            .unwrap_or(0)
    }

    /// Bitrate of the playing item in bps, if the server reports one.
    pub fn playing_bitrate_bps(&self) -> Option<u64> {
        let item = self.now_playing_item.as_ref()?;
        item.bitrate
            .or_else(|| item.media_sources.iter().find_map(|ms| ms.bitrate))
            .filter(|&b| b > 0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NowPlayingItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub bitrate: Option<u64>,
    #[serde(default)]
    pub media_sources: Vec<MediaSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaSource {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub bitrate: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayState {
    #[serde(default)]
    pub position_ticks: Option<i64>,
    #[serde(default)]
    pub media_source_id: Option<String>,
}

/// User record; only the fields the allocator reads are typed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub policy: Option<UserPolicy>,
}

impl UserInfo {
    pub fn is_administrator(&self) -> bool {
        self.policy.as_ref().is_some_and(|p| p.is_administrator)
    }
}

/// A user's server-side policy. `remote_client_bitrate_limit` is in bps,
/// 0 meaning unlimited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserPolicy {
    #[serde(default)]
    pub is_administrator: bool,
    #[serde(default)]
    pub remote_client_bitrate_limit: i64,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Parameters for resuming playback after a forced stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeRequest {
    pub session_id: String,
    pub item_id: String,
    pub position_ticks: i64,
    pub media_source_id: Option<String>,
    pub controlling_user_id: String,
}

/// One externally located active session, rebuilt every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Streamer {
    pub user_id: String,
    pub remote_ip: IpAddr,
    pub session: SessionInfo,
    pub user: Option<UserInfo>,
}

impl Streamer {
    pub fn is_administrator(&self) -> bool {
        self.user.as_ref().is_some_and(UserInfo::is_administrator)
    }

    /// Known demand of the playing item in Mbps.
    pub fn demand_mbps(&self) -> Option<f64> {
        self.session
            .playing_bitrate_bps()
            .map(|bps| bps as f64 / crate::BPS_PER_MBPS)
    }
}

/// Streamers keyed by user ID.
pub type StreamerSet = BTreeMap<String, Streamer>;
