//! Internal/external address classification.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::config::NetworkConfig;
use crate::error::ConfigError;

/// An address prefix such as `192.168.0.0/16` or `fd00::/8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpRange {
    network: IpAddr,
    prefix_len: u8,
}

impl IpRange {
    pub fn contains(&self, ip: IpAddr) -> bool {
        // Compare IPv4-mapped IPv6 clients against IPv4 ranges.
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            v4 => v4,
        };
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = mask_u32(self.prefix_len);
                u32::from(net) & mask == u32::from(addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = mask_u128(self.prefix_len);
                u128::from(net) & mask == u128::from(addr) & mask
            }
            _ => false,
        }
    }
}

fn mask_u32(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

fn mask_u128(prefix_len: u8) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix_len))
    }
}

impl FromStr for IpRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };
        let network: IpAddr = addr
            .parse()
            .map_err(|_| format!("invalid address in range {s:?}"))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix_len = match prefix {
            Some(p) => p
                .parse::<u8>()
                .ok()
                .filter(|&p| p <= max)
                .ok_or_else(|| format!("invalid prefix length in range {s:?}"))?,
            None => max,
        };
        Ok(IpRange {
            network,
            prefix_len,
        })
    }
}

/// Parse a list of CIDR strings, failing on the first bad entry.
pub fn parse_ranges(ranges: &[String]) -> Result<Vec<IpRange>, ConfigError> {
    ranges
        .iter()
        .map(|r| r.parse::<IpRange>().map_err(ConfigError::Invalid))
        .collect()
}

/// Decides whether a client address is outside the local network.
#[derive(Debug, Clone)]
pub struct IpClassifier {
    internal: Vec<IpRange>,
    /// In test mode only these ranges count as external.
    test_external: Option<Vec<IpRange>>,
}

impl IpClassifier {
    pub fn new(config: &NetworkConfig) -> Result<Self, ConfigError> {
        let internal = parse_ranges(&config.internal_ranges)?;
        let test_external = if config.test_mode {
            Some(parse_ranges(&config.test_external_ranges)?)
        } else {
            None
        };
        Ok(IpClassifier {
            internal,
            test_external,
        })
    }

    pub fn is_external(&self, ip: IpAddr) -> bool {
        match &self.test_external {
            Some(ranges) => ranges.iter().any(|r| r.contains(ip)),
            None => !self.internal.iter().any(|r| r.contains(ip)),
        }
    }
}

/// Extract the client address from a `RemoteEndPoint` value.
///
/// Accepts `a.b.c.d:port`, `[v6]:port` and bare IPv4/IPv6 addresses.
pub fn parse_endpoint_ip(endpoint: &str) -> Option<IpAddr> {
    let endpoint = endpoint.trim();
    if let Ok(sock) = endpoint.parse::<SocketAddr>() {
        return Some(sock.ip());
    }
    if let Ok(ip) = endpoint.trim_matches(['[', ']']).parse::<IpAddr>() {
        return Some(ip);
    }
    endpoint
        .rsplit_once(':')
        .and_then(|(host, _port)| host.parse::<IpAddr>().ok())
}
