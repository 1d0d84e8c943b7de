//! Daemon configuration: TOML file, `${VAR}` substitution, validation.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::allocation::{AllocationStrategy, LimitBounds};
use crate::error::ConfigError;
use crate::network::parse_ranges;

/// How the router's uplink usage is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterSourceKind {
    /// OpenWrt LuCI HTTP interface.
    #[default]
    Luci,
    /// Local `/sys/class/net` counters (daemon runs on the router).
    Sysfs,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub source: RouterSourceKind,
    pub host: String,
    pub username: String,
    pub password: String,
    pub luci_port: u16,
    pub wan_interface: String,
    /// Host whose own traffic is subtracted from the uplink total.
    pub media_server_ip: Option<String>,
    pub timeout_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            source: RouterSourceKind::Luci,
            host: String::new(),
            username: String::new(),
            password: String::new(),
            luci_port: 80,
            wan_interface: "eth0".into(),
            media_server_ip: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JellyfinConfig {
    pub host: String,
    pub port: u16,
    pub api_key: String,
    pub use_https: bool,
    pub timeout_secs: u64,
}

impl Default for JellyfinConfig {
    fn default() -> Self {
        JellyfinConfig {
            host: String::new(),
            port: 8096,
            api_key: String::new(),
            use_https: false,
            timeout_secs: 10,
        }
    }
}

impl JellyfinConfig {
    pub fn base_url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub internal_ranges: Vec<String>,
    pub test_mode: bool,
    pub test_external_ranges: Vec<String>,
}

/// What a failed usage reading is taken to mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageFailurePolicy {
    /// Record a 0.0 Mbps sample.
    #[default]
    AssumeIdle,
    /// Skip the sample and treat available bandwidth as zero for the cycle.
    AssumeSaturated,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BandwidthConfig {
    pub algorithm: AllocationStrategy,
    pub min_per_user: f64,
    pub max_per_user: f64,
    pub reserved_bandwidth: f64,
    /// 0 means query the router.
    pub total_upload_mbps: f64,
    /// Smoothing window, minutes.
    pub spike_duration: u64,
    pub low_usage_threshold: f64,
    pub admin_weight: f64,
    pub change_tolerance_mbps: f64,
    pub on_usage_failure: UsageFailurePolicy,
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        BandwidthConfig {
            algorithm: AllocationStrategy::EqualSplit,
            min_per_user: 2.0,
            max_per_user: 50.0,
            reserved_bandwidth: 10.0,
            total_upload_mbps: 0.0,
            spike_duration: 3,
            low_usage_threshold: 10.0,
            admin_weight: 2.0,
            change_tolerance_mbps: 0.0,
            on_usage_failure: UsageFailurePolicy::AssumeIdle,
        }
    }
}

impl BandwidthConfig {
    pub fn bounds(&self) -> LimitBounds {
        LimitBounds {
            min_per_user: self.min_per_user,
            max_per_user: self.max_per_user,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.spike_duration * 60)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Seconds between cycles.
    pub update_interval: u64,
    pub log_level: String,
    /// Empty disables file logging.
    pub log_file: String,
    pub log_backup_count: usize,
    pub dry_run: bool,
    pub backup_user_settings: bool,
    pub pid_file: String,
    pub restart_settle_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            update_interval: 30,
            log_level: "info".into(),
            log_file: "streamgate.log".into(),
            log_backup_count: 5,
            dry_run: false,
            backup_user_settings: true,
            pid_file: "/tmp/streamgate.pid".into(),
            restart_settle_ms: 800,
        }
    }
}

impl DaemonConfig {
    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub router: RouterConfig,
    pub jellyfin: JellyfinConfig,
    pub network: NetworkConfig,
    pub bandwidth: BandwidthConfig,
    pub daemon: DaemonConfig,
}

impl Config {
    /// Read, substitute environment variables, parse and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let expanded = expand_env(&text, |name| std::env::var(name).ok());
        Self::from_toml_str(&expanded)
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.router.source == RouterSourceKind::Luci && self.router.host.trim().is_empty() {
            return invalid("router.host is required");
        }
        if self.router.source == RouterSourceKind::Sysfs
            && self.router.wan_interface.trim().is_empty()
        {
            return invalid("router.wan_interface is required for the sysfs source");
        }
        if let Some(ip) = &self.router.media_server_ip {
            if ip.parse::<std::net::IpAddr>().is_err() {
                return Err(ConfigError::Invalid(format!(
                    "router.media_server_ip {ip:?} is not an IP address"
                )));
            }
        }
        if self.jellyfin.host.trim().is_empty() {
            return invalid("jellyfin.host is required");
        }
        if self.jellyfin.api_key.trim().is_empty() {
            return invalid("jellyfin.api_key is required");
        }
        if self.network.internal_ranges.is_empty() {
            return invalid("at least one network.internal_ranges entry is required");
        }
        parse_ranges(&self.network.internal_ranges)?;
        parse_ranges(&self.network.test_external_ranges)?;

        let bw = &self.bandwidth;
        for (name, value) in [
            ("min_per_user", bw.min_per_user),
            ("max_per_user", bw.max_per_user),
            ("reserved_bandwidth", bw.reserved_bandwidth),
            ("total_upload_mbps", bw.total_upload_mbps),
            ("low_usage_threshold", bw.low_usage_threshold),
            ("admin_weight", bw.admin_weight),
            ("change_tolerance_mbps", bw.change_tolerance_mbps),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "bandwidth.{name} must be a finite number"
                )));
            }
        }
        // A zero limit reads as unlimited on the server.
        if bw.min_per_user <= 0.0 {
            return invalid("bandwidth.min_per_user must be greater than zero");
        }
        if bw.min_per_user >= bw.max_per_user {
            return invalid("bandwidth.min_per_user must be less than max_per_user");
        }
        if bw.spike_duration == 0 {
            return invalid("bandwidth.spike_duration must be greater than zero");
        }
        if bw.admin_weight <= 0.0 {
            return invalid("bandwidth.admin_weight must be greater than zero");
        }
        if bw.change_tolerance_mbps < 0.0 {
            return invalid("bandwidth.change_tolerance_mbps must not be negative");
        }
        if bw.total_upload_mbps < 0.0 {
            return invalid("bandwidth.total_upload_mbps must not be negative");
        }
        if self.daemon.update_interval == 0 {
            return invalid("daemon.update_interval must be greater than zero");
        }
        Ok(())
    }
}

/// Replace `${NAME}` with `lookup(NAME)`. Unknown names are left verbatim.
pub fn expand_env(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
