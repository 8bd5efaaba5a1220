//! Shared data model: assets, network segments and event asset links

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Resolved asset metadata for one network-addressable entity.
///
/// The same type doubles as the pre-enrichment stub: an event's address
/// fields are lifted into an `Asset` carrying only `host` and/or `ip`,
/// which enrichment then replaces with the registry's full projection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(default)]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
}

impl Asset {
    /// Stub carrying only an IP address
    pub fn from_ip(ip: IpAddr) -> Self {
        Self {
            ip: Some(ip),
            ..Self::default()
        }
    }

    /// Stub carrying only a hostname
    pub fn from_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Back-fill the segment label. Never overwrites an existing label.
    pub fn set_segment(&mut self, name: &str) {
        if self.segment.is_none() {
            self.segment = Some(name.to_string());
        }
    }

    /// True when neither hostname nor address is known
    pub fn is_empty(&self) -> bool {
        self.host.is_empty() && self.ip.is_none()
    }
}

/// A named network range used to tag assets by containment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSegment {
    pub name: String,
    pub net: IpNet,
}

impl NetworkSegment {
    pub fn new(name: impl Into<String>, net: IpNet) -> Self {
        Self {
            name: name.into(),
            net,
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.net.contains(&ip)
    }
}

/// The asset-bearing fields of a decoded event.
///
/// Every supported event kind exposes a reporting `asset`; flow-carrying
/// kinds additionally expose `source` and `destination`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventAssets {
    pub asset: Asset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Asset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Asset>,
}

impl EventAssets {
    pub fn new(asset: Asset) -> Self {
        Self {
            asset,
            source: None,
            destination: None,
        }
    }
}
