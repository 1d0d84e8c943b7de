//! Uplink usage sources: an OpenWrt router polled over LuCI, or the local
//! counters and tools when streamgate runs on the router itself.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;

use streamgate_core::config::{RouterConfig, RouterSourceKind};
use streamgate_core::controller::DEFAULT_TOTAL_CAPACITY_MBPS;
use streamgate_core::error::SourceError;
use streamgate_core::source::UsageSource;

const SYSFS_NET: &str = "/sys/class/net";

/// Usage source selected by `router.source`.
pub enum RouterSource {
    Luci(LuciClient),
    Sysfs(SysfsCounters),
}

impl RouterSource {
    pub fn from_config(config: &RouterConfig) -> Result<Self, SourceError> {
        Ok(match config.source {
            RouterSourceKind::Luci => RouterSource::Luci(LuciClient::new(config)?),
            RouterSourceKind::Sysfs => {
                RouterSource::Sysfs(SysfsCounters::new(SYSFS_NET, &config.wan_interface))
            }
        })
    }
}

impl UsageSource for RouterSource {
    async fn check(&self) -> Result<(), SourceError> {
        match self {
            RouterSource::Luci(c) => c.check().await,
            RouterSource::Sysfs(c) => c.check().await,
        }
    }

    async fn upload_usage(&self, ip: Option<IpAddr>) -> Result<f64, SourceError> {
        match self {
            RouterSource::Luci(c) => c.upload_usage(ip).await,
            RouterSource::Sysfs(c) => c.upload_usage(ip).await,
        }
    }

    async fn total_capacity(&self) -> Result<f64, SourceError> {
        match self {
            RouterSource::Luci(c) => c.total_capacity().await,
            RouterSource::Sysfs(c) => c.total_capacity().await,
        }
    }
}

// ─── LuCI ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BandwidthReading {
    #[serde(default)]
    upload_mbps: f64,
}

/// LuCI web interface client. The session cookie is reused until the router
/// rejects it, then the client logs in again.
pub struct LuciClient {
    http: Client,
    base_url: String,
    username: String,
    password: String,
    logged_in: Mutex<bool>,
}

impl LuciClient {
    pub fn new(config: &RouterConfig) -> Result<Self, SourceError> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(transport)?;
        Ok(LuciClient {
            http,
            base_url: format!("http://{}:{}", config.host, config.luci_port),
            username: config.username.clone(),
            password: config.password.clone(),
            logged_in: Mutex::new(false),
        })
    }

    fn luci_url(&self) -> String {
        format!("{}/cgi-bin/luci", self.base_url)
    }

    async fn ensure_login(&self) -> Result<(), SourceError> {
        let mut logged_in = self.logged_in.lock().await;
        if *logged_in {
            return Ok(());
        }
        let form = [
            ("luci_username", self.username.as_str()),
            ("luci_password", self.password.as_str()),
        ];
        let response = self
            .http
            .post(self.luci_url())
            .form(&form)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            tracing::error!(status = %response.status(), "LuCI authentication failed");
            return Err(SourceError::Status {
                code: response.status().as_u16(),
            });
        }
        tracing::debug!("LuCI authentication successful");
        *logged_in = true;
        Ok(())
    }

    async fn read_bandwidth(&self, ip: Option<IpAddr>) -> Result<f64, SourceError> {
        let mut request = self
            .http
            .get(format!("{}/admin/status/realtime/bandwidth", self.luci_url()));
        if let Some(ip) = ip {
            request = request.query(&[("ip", ip.to_string())]);
        }
        let response = request.send().await.map_err(transport)?;
        if !response.status().is_success() {
            return Err(SourceError::Status {
                code: response.status().as_u16(),
            });
        }
        let reading: BandwidthReading = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(reading.upload_mbps)
    }
}

impl UsageSource for LuciClient {
    async fn check(&self) -> Result<(), SourceError> {
        let response = self
            .http
            .get(self.luci_url())
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(SourceError::Status {
                code: response.status().as_u16(),
            });
        }
        tracing::info!(url = %self.base_url, "connected to router");
        Ok(())
    }

    async fn upload_usage(&self, ip: Option<IpAddr>) -> Result<f64, SourceError> {
        self.ensure_login().await?;
        match self.read_bandwidth(ip).await {
            Err(SourceError::Status { code: 401 | 403 }) => {
                tracing::info!("LuCI session expired, logging in again");
                *self.logged_in.lock().await = false;
                self.ensure_login().await?;
                self.read_bandwidth(ip).await
            }
            other => other,
        }
    }

    async fn total_capacity(&self) -> Result<f64, SourceError> {
        // LuCI exposes no shaper rate.
        Ok(DEFAULT_TOTAL_CAPACITY_MBPS)
    }
}

fn transport(e: reqwest::Error) -> SourceError {
    SourceError::Transport(e.to_string())
}

// ─── On-router counters ─────────────────────────────────────────────────

/// Counters read on the router itself: the WAN interface transmit counter
/// for total usage, iptables FORWARD byte counters for one host, and the SQM
/// upload rate from uci for capacity.
pub struct SysfsCounters {
    tx_bytes: PathBuf,
    sample_interval: Duration,
    iptables: String,
    uci: String,
}

impl SysfsCounters {
    pub fn new(net_root: impl Into<PathBuf>, interface: &str) -> Self {
        let tx_bytes = net_root
            .into()
            .join(interface)
            .join("statistics")
            .join("tx_bytes");
        SysfsCounters {
            tx_bytes,
            sample_interval: Duration::from_secs(1),
            iptables: "iptables".into(),
            uci: "uci".into(),
        }
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Replace the `iptables` and `uci` programs.
    pub fn with_tools(mut self, iptables: impl Into<String>, uci: impl Into<String>) -> Self {
        self.iptables = iptables.into();
        self.uci = uci.into();
        self
    }

    async fn read_tx_bytes(&self) -> Result<u64, SourceError> {
        let raw = tokio::fs::read_to_string(&self.tx_bytes)
            .await
            .map_err(|e| SourceError::Transport(format!("{}: {e}", self.tx_bytes.display())))?;
        raw.trim()
            .parse()
            .map_err(|_| SourceError::Decode(format!("bad counter value {:?}", raw.trim())))
    }

    async fn forward_bytes(&self, ip: IpAddr) -> Result<u64, SourceError> {
        let listing = run_tool(&self.iptables, &["-nvx", "-L", "FORWARD"]).await?;
        Ok(forward_bytes_from(&listing, ip))
    }
}

/// Stdout of `program args..`. A missing program or a failing exit status is
/// a transport error.
async fn run_tool(program: &str, args: &[&str]) -> Result<String, SourceError> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| SourceError::Transport(format!("{program}: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SourceError::Transport(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Sum of the byte counters of `iptables -nvx -L` rules whose source is `ip`.
fn forward_bytes_from(listing: &str, ip: IpAddr) -> u64 {
    let ip = ip.to_string();
    listing
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let source = fields.get(7)?.trim_end_matches("/32");
            if source != ip {
                return None;
            }
            fields.get(1)?.parse::<u64>().ok()
        })
        .sum()
}

/// SQM upload rate in Mbps from the kbit/s value uci prints.
fn sqm_upload_mbps(raw: &str) -> Result<f64, SourceError> {
    let raw = raw.trim();
    let kbit: f64 = raw
        .parse()
        .map_err(|_| SourceError::Decode(format!("bad SQM upload rate {raw:?}")))?;
    if !kbit.is_finite() || kbit < 0.0 {
        return Err(SourceError::Decode(format!("bad SQM upload rate {raw:?}")));
    }
    Ok(kbit / 1000.0)
}

/// Mbps over `interval` for a counter that moved from `before` to `after`.
/// A counter reset reads as zero.
fn rate_mbps(before: u64, after: u64, interval: Duration) -> f64 {
    let secs = interval.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    after.saturating_sub(before) as f64 * 8.0 / 1_000_000.0 / secs
}

impl UsageSource for SysfsCounters {
    async fn check(&self) -> Result<(), SourceError> {
        self.read_tx_bytes().await?;
        tracing::info!(path = %self.tx_bytes.display(), "reading local interface counters");
        Ok(())
    }

    async fn upload_usage(&self, ip: Option<IpAddr>) -> Result<f64, SourceError> {
        let Some(ip) = ip else {
            let before = self.read_tx_bytes().await?;
            tokio::time::sleep(self.sample_interval).await;
            let after = self.read_tx_bytes().await?;
            return Ok(rate_mbps(before, after, self.sample_interval));
        };
        if ip.is_ipv6() {
            return Err(SourceError::Unsupported(
                "per-host counters are read from IPv4 iptables only",
            ));
        }
        let before = self.forward_bytes(ip).await?;
        tokio::time::sleep(self.sample_interval).await;
        let after = self.forward_bytes(ip).await?;
        Ok(rate_mbps(before, after, self.sample_interval))
    }

    /// Zero when no SQM shaper rate is set.
    async fn total_capacity(&self) -> Result<f64, SourceError> {
        let raw = run_tool(&self.uci, &["get", "sqm.@queue[0].upload"]).await?;
        sqm_upload_mbps(&raw)
    }
}
