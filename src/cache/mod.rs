//! Global asset cache
//!
//! Thread-safe, TTL-evicting, self-persisting cache mapping an IP address
//! to asset metadata, with fallback to an external directory service on
//! miss. A single background housekeeper task per cache instance prunes
//! stale negative entries and periodically dumps confirmed assets to an
//! NDJSON file so they survive restarts.

use crate::directory::DirectorySettings;
use crate::error::{EnrichdError, Result};
use crate::models::{Asset, NetworkSegment};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;

/// Capacity of the error channel; overflow is dropped, never blocks
const ERROR_CAPACITY: usize = 100;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// NDJSON persistence path for confirmed assets
    pub persist_path: Option<PathBuf>,
    /// Enable pruning of stale negative entries
    pub prune: bool,
    /// How often the pruner scans the map
    pub prune_interval: Duration,
    /// Age past which a negative entry is eligible for deletion
    pub prune_window: Duration,
    /// How often confirmed assets are dumped to the persistence file
    pub dump_interval: Duration,
    /// Directory service handle; `None` disables external lookups
    pub directory: Option<DirectorySettings>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            persist_path: None,
            prune: true,
            prune_interval: Duration::from_secs(30),
            prune_window: Duration::from_secs(120),
            dump_interval: Duration::from_secs(5),
            directory: None,
        }
    }
}

/// One cache entry: resolved metadata plus eviction bookkeeping.
///
/// `is_asset == false` marks a negative entry (lookup attempted, nothing
/// authoritative found); only negative entries are ever pruned, only
/// positive ones are ever persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAsset {
    pub data: Asset,
    pub is_asset: bool,
    /// Wall-clock time of the last create/refresh, informational
    pub seen: DateTime<Utc>,
    /// Monotonic refresh time driving TTL eviction; reset on load
    #[serde(skip, default = "Instant::now")]
    pub updated: Instant,
}

impl CachedAsset {
    fn negative(ip: IpAddr) -> Self {
        Self {
            data: Asset::from_ip(ip),
            is_asset: false,
            seen: Utc::now(),
            updated: Instant::now(),
        }
    }
}

/// Counter snapshot for observability
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub lookups: u64,
    pub hits: u64,
    pub pruned: u64,
    pub dumped: u64,
    pub dropped_errors: u64,
}

#[derive(Default)]
struct Counters {
    lookups: AtomicU64,
    hits: AtomicU64,
    pruned: AtomicU64,
    dumped: AtomicU64,
}

/// Bounded, non-blocking error sink; saturation drops instead of
/// applying backpressure to the housekeeper or callers
struct ErrorSink {
    tx: mpsc::Sender<EnrichdError>,
    dropped: AtomicU64,
}

impl ErrorSink {
    fn send(&self, err: EnrichdError) {
        if self.tx.try_send(err).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

struct CacheShared {
    assets: DashMap<IpAddr, CachedAsset>,
    segments: DashMap<String, NetworkSegment>,
    directory: Option<DirectorySettings>,
    persist_path: Option<PathBuf>,
    prune_enabled: bool,
    prune_interval: Duration,
    prune_window: Duration,
    dump_interval: Duration,
    errors: ErrorSink,
    counters: Counters,
}

/// Concurrent IP -> asset cache with a background housekeeper.
///
/// All methods take `&self` and are safe to call from any number of
/// tasks; the housekeeper interleaves with callers per-entry, never
/// holding the whole map.
pub struct GlobalCache {
    shared: Arc<CacheShared>,
    housekeeper: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    error_rx: Mutex<Option<mpsc::Receiver<EnrichdError>>>,
}

impl GlobalCache {
    /// Build the cache, load any persisted assets and spawn the
    /// housekeeper. Must be called within a tokio runtime.
    ///
    /// Construction-time I/O and parse errors are fatal; a persistence
    /// path naming a directory is a configuration error.
    pub fn new(config: CacheConfig) -> Result<Self> {
        if let Some(path) = &config.persist_path {
            if path.is_dir() {
                return Err(EnrichdError::Config(format!(
                    "asset persistence path {} is a directory, expected a regular file",
                    path.display()
                )));
            }
        }

        let (err_tx, err_rx) = mpsc::channel(ERROR_CAPACITY);
        let shared = Arc::new(CacheShared {
            assets: DashMap::new(),
            segments: DashMap::new(),
            directory: config.directory,
            persist_path: config.persist_path,
            prune_enabled: config.prune,
            prune_interval: config.prune_interval,
            prune_window: config.prune_window,
            dump_interval: config.dump_interval,
            errors: ErrorSink {
                tx: err_tx,
                dropped: AtomicU64::new(0),
            },
            counters: Counters::default(),
        });

        if let Some(path) = shared.persist_path.clone() {
            if path.exists() {
                let count = load_persisted(&shared.assets, &path)?;
                tracing::debug!("loaded {} assets from {}", count, path.display());
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(housekeeper(shared.clone(), shutdown_rx));

        Ok(Self {
            shared,
            housekeeper: Mutex::new(Some(handle)),
            shutdown: shutdown_tx,
            error_rx: Mutex::new(Some(err_rx)),
        })
    }

    /// Resolve an IP to its cached record.
    ///
    /// Returns `true` only for a pre-existing cache hit. On miss the
    /// directory service (when configured) is consulted synchronously in
    /// the calling task; the outcome, positive or negative, is stored
    /// before returning so the next call is a pure hit. Concurrent
    /// misses for the same key may each consult the directory.
    pub fn get(&self, ip: IpAddr) -> (CachedAsset, bool) {
        self.shared.counters.lookups.fetch_add(1, Ordering::Relaxed);

        if let Some(entry) = self.shared.assets.get(&ip) {
            self.shared.counters.hits.fetch_add(1, Ordering::Relaxed);
            return (entry.value().clone(), true);
        }

        let mut record = CachedAsset::negative(ip);
        if let Some(dir) = &self.shared.directory {
            match dir.client.lookup(ip, &dir.fields) {
                Ok(Some(mut data)) => {
                    data.ip.get_or_insert(ip);
                    record.data = data;
                    record.is_asset = true;
                }
                Ok(None) => {}
                Err(e) => self.shared.errors.send(e),
            }
        }

        self.shared.assets.insert(ip, record.clone());
        (record, false)
    }

    /// Register a network segment for containment tagging
    pub fn set_segment(&self, segment: NetworkSegment) {
        self.shared.segments.insert(segment.name.clone(), segment);
    }

    /// Back-fill segment labels for entries whose address falls inside a
    /// registered segment. Labels already present are left alone.
    /// Returns the number of entries updated.
    pub fn apply_segments(&self) -> usize {
        let mut updated = 0;
        for mut entry in self.shared.assets.iter_mut() {
            if entry.data.segment.is_some() {
                continue;
            }
            let Some(ip) = entry.data.ip else { continue };
            for seg in self.shared.segments.iter() {
                if seg.contains(ip) {
                    entry.data.set_segment(&seg.name);
                    updated += 1;
                    break;
                }
            }
        }
        updated
    }

    /// Take the error receiver. Yields `Some` exactly once; an external
    /// collaborator is expected to drain and report it.
    pub fn take_errors(&self) -> Option<mpsc::Receiver<EnrichdError>> {
        self.error_rx.lock().expect("error receiver lock poisoned").take()
    }

    /// Current counter snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            lookups: self.shared.counters.lookups.load(Ordering::Relaxed),
            hits: self.shared.counters.hits.load(Ordering::Relaxed),
            pruned: self.shared.counters.pruned.load(Ordering::Relaxed),
            dumped: self.shared.counters.dumped.load(Ordering::Relaxed),
            dropped_errors: self.shared.errors.dropped.load(Ordering::Relaxed),
        }
    }

    /// Number of cached entries, positive and negative
    pub fn len(&self) -> usize {
        self.shared.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.assets.is_empty()
    }

    /// Whether a key is currently cached, without triggering resolution
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.shared.assets.contains_key(&ip)
    }

    /// Signal the housekeeper and wait for it to exit
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let handle = self
            .housekeeper
            .lock()
            .expect("housekeeper lock poisoned")
            .take();
        if let Some(handle) = handle {
            tracing::debug!("waiting for asset cache housekeeper to exit");
            let _ = handle.await;
        }
    }
}

/// Background loop: two independent timers plus the shutdown signal.
/// Pruning and dumping never overlap each other but both interleave with
/// caller-driven map operations.
async fn housekeeper(shared: Arc<CacheShared>, mut shutdown: watch::Receiver<bool>) {
    tracing::trace!("asset cache housekeeper started");

    let start = time::Instant::now();
    let mut prune_tick = time::interval_at(start + shared.prune_interval, shared.prune_interval);
    let mut dump_tick = time::interval_at(start + shared.dump_interval, shared.dump_interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                break;
            }
            _ = prune_tick.tick() => {
                if shared.prune_enabled {
                    let removed = prune(&shared);
                    tracing::trace!(
                        "pruned {} expired entries from asset cache, {} remain",
                        removed,
                        shared.assets.len()
                    );
                }
            }
            _ = dump_tick.tick() => {
                if let Some(path) = &shared.persist_path {
                    match dump(&shared, path) {
                        Ok(0) => {}
                        Ok(count) => tracing::trace!("dumped {} assets to {}", count, path.display()),
                        Err(e) => shared.errors.send(e),
                    }
                }
            }
        }
    }

    tracing::trace!("asset cache housekeeper exited");
}

/// Delete negative entries older than the prune window. Confirmed
/// assets are never deleted regardless of age.
fn prune(shared: &CacheShared) -> u64 {
    let now = Instant::now();
    let window = shared.prune_window;
    let mut removed = 0u64;
    shared.assets.retain(|_, record| {
        let stale = !record.is_asset && now.duration_since(record.updated) > window;
        if stale {
            removed += 1;
        }
        !stale
    });
    shared.counters.pruned.fetch_add(removed, Ordering::Relaxed);
    removed
}

/// Write every confirmed asset as one JSON object per line. Skipped when
/// nothing is confirmed. The write goes to a temp file that is renamed
/// over the target, so a failed cycle leaves the previous file intact.
fn dump(shared: &CacheShared, path: &Path) -> Result<usize> {
    let confirmed: Vec<CachedAsset> = shared
        .assets
        .iter()
        .filter(|entry| entry.is_asset)
        .map(|entry| entry.value().clone())
        .collect();
    if confirmed.is_empty() {
        return Ok(0);
    }

    let mut buf = String::new();
    for record in &confirmed {
        let line = serde_json::to_string(record).map_err(|e| EnrichdError::Json {
            source: e,
            context: "Failed to serialize asset record".to_string(),
        })?;
        buf.push_str(&line);
        buf.push('\n');
    }

    // append to the full file name so targets sharing a stem never
    // collide on one temp path
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, buf).map_err(|e| EnrichdError::Io {
        source: e,
        context: format!("Failed to write asset dump: {}", tmp.display()),
    })?;
    std::fs::rename(&tmp, path).map_err(|e| EnrichdError::Io {
        source: e,
        context: format!("Failed to replace asset dump: {}", path.display()),
    })?;

    shared
        .counters
        .dumped
        .store(confirmed.len() as u64, Ordering::Relaxed);
    Ok(confirmed.len())
}

/// Load persisted records line-by-line. Any malformed line is fatal.
fn load_persisted(assets: &DashMap<IpAddr, CachedAsset>, path: &Path) -> Result<usize> {
    let file = std::fs::File::open(path).map_err(|e| EnrichdError::Io {
        source: e,
        context: format!("Failed to open asset dump: {}", path.display()),
    })?;

    let mut count = 0;
    for (lineno, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| EnrichdError::Io {
            source: e,
            context: format!("Failed to read asset dump: {}", path.display()),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let mut record: CachedAsset =
            serde_json::from_str(&line).map_err(|e| EnrichdError::Json {
                source: e,
                context: format!("malformed asset record at {}:{}", path.display(), lineno + 1),
            })?;
        let Some(ip) = record.data.ip else {
            return Err(EnrichdError::Config(format!(
                "persisted asset record without ip at {}:{}",
                path.display(),
                lineno + 1
            )));
        };
        record.updated = Instant::now();
        assets.insert(ip, record);
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryFields, DirectoryLookup};

    /// Directory stub that confirms a fixed set of addresses and counts
    /// how many lookups it served
    struct StubDirectory {
        known: Vec<(IpAddr, &'static str)>,
        calls: AtomicU64,
        fail: bool,
    }

    impl StubDirectory {
        fn settings(known: Vec<(IpAddr, &'static str)>, fail: bool) -> DirectorySettings {
            DirectorySettings {
                client: Arc::new(Self {
                    known,
                    calls: AtomicU64::new(0),
                    fail,
                }),
                fields: DirectoryFields::default(),
            }
        }
    }

    impl DirectoryLookup for StubDirectory {
        fn lookup(&self, ip: IpAddr, _fields: &DirectoryFields) -> Result<Option<Asset>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EnrichdError::Directory("directory unreachable".to_string()));
            }
            Ok(self.known.iter().find(|(k, _)| *k == ip).map(|(k, host)| {
                let mut asset = Asset::from_host(*host);
                asset.ip = Some(*k);
                asset
            }))
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_miss_without_directory_is_stored_negative() {
        let cache = GlobalCache::new(CacheConfig::default()).unwrap();

        let (record, found) = cache.get(ip("10.0.0.1"));
        assert!(!found);
        assert!(!record.is_asset);
        assert_eq!(record.data.ip, Some(ip("10.0.0.1")));

        // second call is a pure cache hit
        let (record, found) = cache.get(ip("10.0.0.1"));
        assert!(found);
        assert!(!record.is_asset);
        assert_eq!(cache.stats().hits, 1);

        cache.close().await;
    }

    #[tokio::test]
    async fn test_directory_hit_promotes_entry() {
        let config = CacheConfig {
            directory: Some(StubDirectory::settings(vec![(ip("10.0.0.5"), "web01")], false)),
            ..CacheConfig::default()
        };
        let cache = GlobalCache::new(config).unwrap();

        let (record, found) = cache.get(ip("10.0.0.5"));
        assert!(!found, "freshly resolved entries report a miss");
        assert!(record.is_asset);
        assert_eq!(record.data.host, "web01");

        // hit path must not consult the directory again
        let (record, found) = cache.get(ip("10.0.0.5"));
        assert!(found);
        assert!(record.is_asset);

        cache.close().await;
    }

    #[tokio::test]
    async fn test_directory_error_is_nonfatal_and_queued() {
        let config = CacheConfig {
            directory: Some(StubDirectory::settings(vec![], true)),
            ..CacheConfig::default()
        };
        let cache = GlobalCache::new(config).unwrap();
        let mut errors = cache.take_errors().unwrap();
        assert!(cache.take_errors().is_none());

        let (record, found) = cache.get(ip("10.0.0.9"));
        assert!(!found);
        assert!(!record.is_asset, "directory failure degrades to negative entry");

        let err = errors.try_recv().unwrap();
        assert!(matches!(err, EnrichdError::Directory(_)));

        cache.close().await;
    }

    #[tokio::test]
    async fn test_error_channel_saturation_drops_and_counts() {
        let config = CacheConfig {
            directory: Some(StubDirectory::settings(vec![], true)),
            ..CacheConfig::default()
        };
        let cache = GlobalCache::new(config).unwrap();

        // nobody drains: every distinct miss queues one directory error
        for i in 0..150u32 {
            let addr: IpAddr = format!("10.1.0.{}", i).parse().unwrap();
            let (_, found) = cache.get(addr);
            assert!(!found);
        }
        assert_eq!(cache.len(), 150, "saturation never blocks or loses entries");
        assert_eq!(
            cache.stats().dropped_errors,
            150 - ERROR_CAPACITY as u64,
            "overflow past the channel capacity is dropped and counted"
        );

        let mut errors = cache.take_errors().unwrap();
        let mut queued = 0usize;
        while errors.try_recv().is_ok() {
            queued += 1;
        }
        assert_eq!(queued, ERROR_CAPACITY);

        cache.close().await;
    }

    #[tokio::test]
    async fn test_prune_deletes_only_stale_negative_entries() {
        let config = CacheConfig {
            prune: true,
            prune_interval: Duration::from_millis(20),
            prune_window: Duration::from_millis(10),
            directory: Some(StubDirectory::settings(vec![(ip("10.0.0.5"), "web01")], false)),
            ..CacheConfig::default()
        };
        let cache = GlobalCache::new(config).unwrap();

        cache.get(ip("10.0.0.5")); // positive
        cache.get(ip("10.0.0.6")); // negative

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.contains(ip("10.0.0.5")), "positive entries are never pruned");
        assert!(!cache.contains(ip("10.0.0.6")), "stale negative entry must be pruned");
        assert!(cache.stats().pruned >= 1);

        // re-resolution after pruning
        let (_, found) = cache.get(ip("10.0.0.6"));
        assert!(!found);

        cache.close().await;
    }

    #[tokio::test]
    async fn test_prune_disabled_keeps_negative_entries() {
        let config = CacheConfig {
            prune: false,
            prune_interval: Duration::from_millis(20),
            prune_window: Duration::from_millis(10),
            ..CacheConfig::default()
        };
        let cache = GlobalCache::new(config).unwrap();

        cache.get(ip("10.0.0.7"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.contains(ip("10.0.0.7")));

        cache.close().await;
    }

    #[tokio::test]
    async fn test_persistence_path_must_not_be_directory() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = CacheConfig {
            persist_path: Some(temp_dir.path().to_path_buf()),
            ..CacheConfig::default()
        };
        assert!(matches!(
            GlobalCache::new(config),
            Err(EnrichdError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_persisted_line_is_fatal() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("assets.json");
        std::fs::write(&path, "{\"not\": \"an asset record\"\n").unwrap();

        let config = CacheConfig {
            persist_path: Some(path),
            ..CacheConfig::default()
        };
        assert!(GlobalCache::new(config).is_err());
    }

    #[tokio::test]
    async fn test_segment_backfill_applies_once() {
        let config = CacheConfig {
            directory: Some(StubDirectory::settings(vec![(ip("10.0.0.5"), "web01")], false)),
            ..CacheConfig::default()
        };
        let cache = GlobalCache::new(config).unwrap();
        cache.get(ip("10.0.0.5"));

        cache.set_segment(NetworkSegment::new("dmz", "10.0.0.0/24".parse().unwrap()));
        assert_eq!(cache.apply_segments(), 1);

        let (record, _) = cache.get(ip("10.0.0.5"));
        assert_eq!(record.data.segment.as_deref(), Some("dmz"));

        // a competing segment never overwrites the existing label
        cache.set_segment(NetworkSegment::new("corp", "10.0.0.0/16".parse().unwrap()));
        assert_eq!(cache.apply_segments(), 0);
        let (record, _) = cache.get(ip("10.0.0.5"));
        assert_eq!(record.data.segment.as_deref(), Some("dmz"));

        cache.close().await;
    }

    #[tokio::test]
    async fn test_close_is_bounded() {
        let cache = GlobalCache::new(CacheConfig::default()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), cache.close())
            .await
            .expect("close must return once the housekeeper exits");
    }
}
