//! Enrichment handler
//!
//! Decodes raw event bytes by declared kind and substitutes full asset
//! metadata for the event's asset-bearing fields, using a registry built
//! once at startup from the persistent store. Host-keyed lookup misses
//! are tracked for later inspection; counters expose throughput and
//! per-kind parse failures.

use crate::error::{EnrichdError, Result};
use crate::events::{Event, EventKind};
use crate::models::Asset;
use crate::store::KvStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Store prefix under which registry records are persisted
pub const REGISTRY_PREFIX: &str = "assets";

/// External-registry snapshot describing one asset plus every key
/// (address or hostname) by which it may be referenced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub host: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub addrs: Vec<IpAddr>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

impl RegistryRecord {
    /// Every lookup key this record answers to: each address, the
    /// hostname and all aliases, deduplicated in that order
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.addrs.iter().map(|ip| ip.to_string()).collect();
        if !self.host.is_empty() {
            keys.push(self.host.clone());
        }
        keys.extend(self.aliases.iter().filter(|a| !a.is_empty()).cloned());
        let mut seen = std::collections::HashSet::new();
        keys.retain(|k| seen.insert(k.clone()));
        keys
    }

    /// Canonical asset projection
    pub fn to_asset(&self) -> Asset {
        Asset {
            host: self.host.clone(),
            ip: self.addrs.first().copied(),
            domain: if self.domain.is_empty() {
                None
            } else {
                Some(self.domain.clone())
            },
            segment: None,
            os: self.os.clone(),
            team: self.team.clone(),
        }
    }
}

/// Handler configuration
#[derive(Clone, Default)]
pub struct HandlerConfig {
    pub store: Option<Arc<dyn KvStore>>,
}

/// Per-kind parse error counters
#[derive(Default)]
struct ParseErrs {
    suricata: AtomicU64,
    windows: AtomicU64,
    syslog: AtomicU64,
    process_exec: AtomicU64,
}

impl ParseErrs {
    fn bump(&self, kind: EventKind) {
        let counter = match kind {
            EventKind::Suricata => &self.suricata,
            EventKind::Windows => &self.windows,
            EventKind::Syslog => &self.syslog,
            EventKind::ProcessExec => &self.process_exec,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Default)]
struct Counts {
    events: AtomicU64,
    missing_meta: AtomicU64,
    asset_pickups: AtomicU64,
    asset_updates: AtomicU64,
    assets: AtomicUsize,
    parse_errs: ParseErrs,
}

/// Read-only counter snapshot for observability collaborators
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CountsSnapshot {
    pub events: u64,
    pub missing_meta: u64,
    pub asset_pickups: u64,
    pub asset_updates: u64,
    pub assets: usize,
    pub parse_errs: ParseErrsSnapshot,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ParseErrsSnapshot {
    pub suricata: u64,
    pub windows: u64,
    pub syslog: u64,
    pub process_exec: u64,
}

impl ParseErrsSnapshot {
    pub fn total(&self) -> u64 {
        self.suricata + self.windows + self.syslog + self.process_exec
    }
}

/// Event decode and asset substitution handler
pub struct Handler {
    counts: Counts,
    missing: DashMap<String, ()>,
    assets: DashMap<String, RegistryRecord>,
    store: Arc<dyn KvStore>,
}

impl Handler {
    /// Build the handler, loading the registry from the persistent
    /// store. Registry keys are first-writer-wins: a later record with
    /// a colliding key never overwrites an earlier one, preserving
    /// load order.
    pub fn new(config: HandlerConfig) -> Result<Self> {
        let store = config.store.ok_or(EnrichdError::MissingPersistence)?;

        let assets: DashMap<String, RegistryRecord> = DashMap::new();
        for (key, bytes) in store.scan(REGISTRY_PREFIX)? {
            let record: RegistryRecord =
                serde_json::from_slice(&bytes).map_err(|e| EnrichdError::Json {
                    source: e,
                    context: format!("malformed registry record under key {}", key),
                })?;
            for k in record.keys() {
                if let Entry::Vacant(slot) = assets.entry(k) {
                    slot.insert(record.clone());
                }
            }
        }

        let counts = Counts::default();
        counts.assets.store(assets.len(), Ordering::Relaxed);
        tracing::debug!("asset registry loaded with {} keys", assets.len());

        Ok(Self {
            counts,
            missing: DashMap::new(),
            assets,
            store,
        })
    }

    /// Ingest one registry record. Insert-if-absent per key; each newly
    /// inserted key is persisted to the backing store. Re-adding an
    /// existing record is a no-op besides the pickup counter.
    pub fn add_asset(&self, record: RegistryRecord) -> Result<()> {
        self.counts.asset_pickups.fetch_add(1, Ordering::Relaxed);

        for key in record.keys() {
            if let Entry::Vacant(slot) = self.assets.entry(key.clone()) {
                let bytes = serde_json::to_vec(&record).map_err(|e| EnrichdError::Json {
                    source: e,
                    context: format!("Failed to serialize registry record for {}", key),
                })?;
                self.store.set(REGISTRY_PREFIX, &key, &bytes)?;
                slot.insert(record.clone());
                self.counts.asset_updates.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.counts.assets.store(self.assets.len(), Ordering::Relaxed);
        Ok(())
    }

    /// Decode raw bytes into a typed event, dispatching on the declared
    /// kind. The total-events counter is bumped before the parse, so
    /// failures are counted too.
    pub fn decode(&self, raw: &[u8], kind: EventKind) -> Result<Event> {
        self.counts.events.fetch_add(1, Ordering::Relaxed);

        let parsed = match kind {
            EventKind::Suricata => serde_json::from_slice(raw).map(Event::Suricata),
            EventKind::Windows => serde_json::from_slice(raw).map(Event::Windows),
            EventKind::Syslog => serde_json::from_slice(raw).map(Event::Syslog),
            EventKind::ProcessExec => serde_json::from_slice(raw).map(Event::ProcessExec),
        };

        let mut event = parsed.map_err(|e| {
            self.counts.parse_errs.bump(kind);
            EnrichdError::Decode { kind, source: e }
        })?;
        event.link_assets();
        Ok(event)
    }

    /// Substitute full asset metadata for the event's asset-bearing
    /// fields. The required `asset` is always replaced; `source` and
    /// `destination` only when present. Lookup misses degrade to the
    /// original stub rather than failing the event.
    pub fn enrich(&self, event: &mut Event) -> Result<()> {
        let kind = event.kind();
        if event.assets().is_none() {
            self.counts.missing_meta.fetch_add(1, Ordering::Relaxed);
            return Err(EnrichdError::MissingAssetData {
                kind,
                summary: event.summary(),
            });
        }

        if let Some(links) = event.assets_mut() {
            links.asset = self.lookup(&links.asset);
            if let Some(source) = links.source.as_mut() {
                *source = self.lookup(source);
            }
            if let Some(destination) = links.destination.as_mut() {
                *destination = self.lookup(destination);
            }
        }
        Ok(())
    }

    /// Registry lookup: IP key first, then hostname. A host-keyed miss
    /// is recorded (deduplicated); IP-keyed misses are not.
    fn lookup(&self, stub: &Asset) -> Asset {
        if let Some(ip) = stub.ip {
            if let Some(record) = self.assets.get(&ip.to_string()) {
                return record.to_asset();
            }
        }
        if !stub.host.is_empty() {
            if let Some(record) = self.assets.get(&stub.host) {
                return record.to_asset();
            }
            self.missing.insert(stub.host.clone(), ());
        }
        stub.clone()
    }

    /// Unordered snapshot of hostnames that missed every registry key
    pub fn missing_keys(&self) -> Vec<String> {
        self.missing.iter().map(|e| e.key().clone()).collect()
    }

    /// Current counter snapshot
    pub fn counts(&self) -> CountsSnapshot {
        CountsSnapshot {
            events: self.counts.events.load(Ordering::Relaxed),
            missing_meta: self.counts.missing_meta.load(Ordering::Relaxed),
            asset_pickups: self.counts.asset_pickups.load(Ordering::Relaxed),
            asset_updates: self.counts.asset_updates.load(Ordering::Relaxed),
            assets: self.counts.assets.load(Ordering::Relaxed),
            parse_errs: ParseErrsSnapshot {
                suricata: self.counts.parse_errs.suricata.load(Ordering::Relaxed),
                windows: self.counts.parse_errs.windows.load(Ordering::Relaxed),
                syslog: self.counts.parse_errs.syslog.load(Ordering::Relaxed),
                process_exec: self.counts.parse_errs.process_exec.load(Ordering::Relaxed),
            },
        }
    }

    /// Registry size in keys
    pub fn registry_len(&self) -> usize {
        self.assets.len()
    }

    /// The handler owns no resources beyond the shared store; provided
    /// for symmetry with the cache
    pub fn close(&self) -> Result<()> {
        Ok(())
    }
}
