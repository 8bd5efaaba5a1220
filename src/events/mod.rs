//! Typed telemetry events and the decode dispatch enumeration
//!
//! Each supported kind decodes from raw JSON bytes into a tolerant struct
//! (unknown fields ignored) and exposes its asset-bearing fields as
//! [`EventAssets`] links, built once at decode time from the kind's own
//! address fields.

use crate::error::{EnrichdError, Result};
use crate::models::{Asset, EventAssets};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// The fixed enumeration of supported telemetry kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Suricata EVE alerts and flow records
    Suricata,
    /// Windows event log / sysmon records in winlogbeat shape
    Windows,
    /// BSD-style syslog records
    Syslog,
    /// Process execution audit records (snoopy-style)
    ProcessExec,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Suricata,
        EventKind::Windows,
        EventKind::Syslog,
        EventKind::ProcessExec,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Suricata => "suricata",
            EventKind::Windows => "windows",
            EventKind::Syslog => "syslog",
            EventKind::ProcessExec => "process_exec",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EnrichdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "suricata" => Ok(EventKind::Suricata),
            "windows" | "eventlog" | "sysmon" => Ok(EventKind::Windows),
            "syslog" => Ok(EventKind::Syslog),
            "process_exec" | "snoopy" => Ok(EventKind::ProcessExec),
            other => Err(EnrichdError::Config(format!(
                "unknown event kind: {}",
                other
            ))),
        }
    }
}

/// Suricata EVE record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suricata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<SuricataAlert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<EventAssets>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuricataAlert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Windows event log / sysmon record in winlogbeat shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Windows {
    #[serde(
        rename = "@timestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<WindowsHost>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<WindowsEventData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<EventAssets>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowsHost {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowsEventData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<IpAddr>,
}

/// Syslog record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Syslog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<EventAssets>,
}

/// Process execution audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessExec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tty: Option<String>,
    /// Remote client address when the session came in over ssh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<EventAssets>,
}

/// A decoded telemetry event of any supported kind
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Event {
    Suricata(Suricata),
    Windows(Windows),
    Syslog(Syslog),
    ProcessExec(ProcessExec),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Suricata(_) => EventKind::Suricata,
            Event::Windows(_) => EventKind::Windows,
            Event::Syslog(_) => EventKind::Syslog,
            Event::ProcessExec(_) => EventKind::ProcessExec,
        }
    }

    /// Build the asset links from the kind's own address fields.
    ///
    /// Leaves `assets` as `None` when the event exposes neither a
    /// reporting host nor any address, which marks malformed input for
    /// the enrichment step.
    pub fn link_assets(&mut self) {
        match self {
            Event::Suricata(ev) => {
                let asset = match (&ev.host, ev.src_ip, ev.dest_ip) {
                    (Some(host), _, _) if !host.is_empty() => Asset::from_host(host.clone()),
                    (_, Some(ip), _) | (_, None, Some(ip)) => Asset::from_ip(ip),
                    _ => return,
                };
                let mut links = EventAssets::new(asset);
                links.source = ev.src_ip.map(Asset::from_ip);
                links.destination = ev.dest_ip.map(Asset::from_ip);
                ev.assets = Some(links);
            }
            Event::Windows(ev) => {
                let host = ev
                    .host
                    .as_ref()
                    .and_then(|h| h.name.clone())
                    .or_else(|| ev.computer_name.clone())
                    .filter(|h| !h.is_empty());
                let Some(host) = host else { return };
                let mut links = EventAssets::new(Asset::from_host(host));
                if let Some(data) = &ev.event_data {
                    links.source = data
                        .source_ip
                        .or(data.ip_address)
                        .map(Asset::from_ip);
                    links.destination = data.destination_ip.map(Asset::from_ip);
                }
                ev.assets = Some(links);
            }
            Event::Syslog(ev) => {
                if ev.host.is_empty() && ev.ip.is_none() {
                    return;
                }
                let mut asset = Asset::from_host(ev.host.clone());
                asset.ip = ev.ip;
                ev.assets = Some(EventAssets::new(asset));
            }
            Event::ProcessExec(ev) => {
                if ev.host.is_empty() {
                    return;
                }
                let mut links = EventAssets::new(Asset::from_host(ev.host.clone()));
                links.source = ev.ssh_ip.map(Asset::from_ip);
                ev.assets = Some(links);
            }
        }
    }

    pub fn assets(&self) -> Option<&EventAssets> {
        match self {
            Event::Suricata(ev) => ev.assets.as_ref(),
            Event::Windows(ev) => ev.assets.as_ref(),
            Event::Syslog(ev) => ev.assets.as_ref(),
            Event::ProcessExec(ev) => ev.assets.as_ref(),
        }
    }

    pub fn assets_mut(&mut self) -> Option<&mut EventAssets> {
        match self {
            Event::Suricata(ev) => ev.assets.as_mut(),
            Event::Windows(ev) => ev.assets.as_mut(),
            Event::Syslog(ev) => ev.assets.as_mut(),
            Event::ProcessExec(ev) => ev.assets.as_mut(),
        }
    }

    /// Short human-readable description, used in error reporting
    pub fn summary(&self) -> String {
        match self {
            Event::Suricata(ev) => format!(
                "event_type={} src={:?} dest={:?}",
                ev.event_type.as_deref().unwrap_or("-"),
                ev.src_ip,
                ev.dest_ip
            ),
            Event::Windows(ev) => format!(
                "event_id={:?} channel={}",
                ev.event_id,
                ev.channel.as_deref().unwrap_or("-")
            ),
            Event::Syslog(ev) => format!(
                "host={} program={}",
                ev.host,
                ev.program.as_deref().unwrap_or("-")
            ),
            Event::ProcessExec(ev) => format!(
                "host={} cmd={}",
                ev.host,
                ev.cmd.as_deref().unwrap_or("-")
            ),
        }
    }
}
