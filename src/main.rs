use enrichd::cache::GlobalCache;
use enrichd::cli::{Cli, Commands, ConfigAction};
use enrichd::config::{Config, ConfigValidator};
use enrichd::directory::{DirectoryFields, DirectorySettings, FileDirectory};
use enrichd::enrich::{Handler, HandlerConfig, REGISTRY_PREFIX};
use enrichd::error::{EnrichdError, Result};
use enrichd::events::EventKind;
use enrichd::models::EventAssets;
use enrichd::store::SqliteStore;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            input,
            output,
            kind,
        } => {
            let kind = kind.as_deref().map(str::parse::<EventKind>).transpose()?;
            cmd_run(cli.config, input, output, kind)?;
        }
        Commands::Status => {
            cmd_status(cli.config)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "enrichd=debug" } else { "enrichd=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_run(
    config_path: Option<PathBuf>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    kind: Option<EventKind>,
) -> Result<()> {
    let config = load_config(config_path)?;

    let runtime = tokio::runtime::Runtime::new().map_err(|e| EnrichdError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })?;
    runtime.block_on(run(config, input, output, kind))
}

async fn run(
    config: Config,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    kind: Option<EventKind>,
) -> Result<()> {
    let db_file = expand_tilde(&config.registry.db_file);
    let store = Arc::new(SqliteStore::new(&db_file)?);
    let handler = Handler::new(HandlerConfig { store: Some(store) })?;
    tracing::info!("asset registry loaded: {} keys", handler.registry_len());

    let (directory, directory_err) = open_directory(&config);
    if let Some(err) = directory_err {
        // non-fatal: the cache degrades to negative-only resolution
        tracing::warn!("continuing without directory lookups: {}", err);
    }
    let cache = GlobalCache::new(config.cache_config(directory))?;

    // An external collaborator drains the cache's error channel; here
    // that collaborator is a logging task.
    if let Some(mut errors) = cache.take_errors() {
        tokio::spawn(async move {
            while let Some(err) = errors.recv().await {
                tracing::warn!("asset cache error: {}", err);
            }
        });
    }

    let reader: Box<dyn tokio::io::AsyncRead + Unpin> = match &input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await.map_err(|e| EnrichdError::Io {
                source: e,
                context: format!("Failed to open input: {}", path.display()),
            })?;
            Box::new(file)
        }
        None => Box::new(tokio::io::stdin()),
    };
    let mut lines = tokio::io::BufReader::new(reader).lines();

    let mut writer: Box<dyn Write> = match &output {
        Some(path) => {
            let file = std::fs::File::create(path).map_err(|e| EnrichdError::Io {
                source: e,
                context: format!("Failed to create output: {}", path.display()),
            })?;
            Box::new(std::io::BufWriter::new(file))
        }
        None => Box::new(std::io::stdout().lock()),
    };

    let log_interval = Duration::from_secs(config.logging.interval_secs);
    let mut log_tick =
        tokio::time::interval_at(tokio::time::Instant::now() + log_interval, log_interval);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.map_err(|e| EnrichdError::Io {
                    source: e,
                    context: "Failed to read input stream".to_string(),
                })?;
                let Some(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(err) = process_line(&handler, &cache, writer.as_mut(), &line, kind) {
                    match err {
                        EnrichdError::Io { .. } => return Err(err),
                        other => tracing::warn!("skipping event: {}", other),
                    }
                }
            }
            _ = log_tick.tick() => {
                log_progress(&handler, &cache);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, stopping");
                break;
            }
        }
    }

    writer.flush().map_err(|e| EnrichdError::Io {
        source: e,
        context: "Failed to flush output".to_string(),
    })?;

    log_progress(&handler, &cache);
    let missing = handler.missing_keys();
    if !missing.is_empty() {
        tracing::info!("{} hostnames missed every registry key", missing.len());
        tracing::debug!("missing keys: {:?}", missing);
    }

    cache.close().await;
    handler.close()?;
    Ok(())
}

/// One input line with an explicit kind declaration
#[derive(serde::Deserialize)]
struct Envelope<'a> {
    kind: EventKind,
    #[serde(borrow)]
    event: &'a serde_json::value::RawValue,
}

fn process_line(
    handler: &Handler,
    cache: &GlobalCache,
    writer: &mut dyn Write,
    line: &str,
    forced: Option<EventKind>,
) -> Result<()> {
    let mut event = match forced {
        Some(kind) => handler.decode(line.as_bytes(), kind)?,
        None => {
            let envelope: Envelope =
                serde_json::from_str(line).map_err(|e| EnrichdError::Json {
                    source: e,
                    context: "invalid event envelope, expected {\"kind\": .., \"event\": ..}"
                        .to_string(),
                })?;
            handler.decode(envelope.event.get().as_bytes(), envelope.kind)?
        }
    };

    handler.enrich(&mut event)?;
    if let Some(links) = event.assets_mut() {
        cache_backfill(cache, links);
    }

    let json = serde_json::to_string(&event).map_err(|e| EnrichdError::Json {
        source: e,
        context: "Failed to serialize enriched event".to_string(),
    })?;
    writeln!(writer, "{}", json).map_err(|e| EnrichdError::Io {
        source: e,
        context: "Failed to write enriched event".to_string(),
    })?;
    Ok(())
}

/// Second-chance lookup through the global cache for stubs the registry
/// could not resolve. Only IP-keyed stubs qualify; the cache consults
/// the directory service on miss and remembers the outcome either way.
fn cache_backfill(cache: &GlobalCache, links: &mut EventAssets) {
    for slot in [Some(&mut links.asset), links.source.as_mut(), links.destination.as_mut()]
        .into_iter()
        .flatten()
    {
        if !slot.host.is_empty() {
            continue;
        }
        let Some(ip) = slot.ip else { continue };
        let (record, _) = cache.get(ip);
        if record.is_asset {
            *slot = record.data;
        }
    }
}

/// Open the directory handle configured for cache fallback. An open
/// failure is returned as a value, not raised: the caller still gets a
/// usable (directory-less) configuration.
fn open_directory(config: &Config) -> (Option<DirectorySettings>, Option<EnrichdError>) {
    if !config.directory.enabled {
        return (None, None);
    }
    let Some(table_file) = config.directory.table_file.as_ref() else {
        return (None, None);
    };
    match FileDirectory::open(&expand_tilde(table_file)) {
        Ok(dir) => (
            Some(DirectorySettings {
                client: Arc::new(dir),
                fields: DirectoryFields::with_prefix(&config.directory.field_prefix),
            }),
            None,
        ),
        Err(e) => (None, Some(e)),
    }
}

fn log_progress(handler: &Handler, cache: &GlobalCache) {
    let counts = handler.counts();
    let stats = cache.stats();
    tracing::info!(
        "events={} parse_errs={} missing_meta={} registry_keys={} cache_entries={} cache_hits={}/{}",
        counts.events,
        counts.parse_errs.total(),
        counts.missing_meta,
        counts.assets,
        cache.len(),
        stats.hits,
        stats.lookups,
    );
}

fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;

    let db_file = expand_tilde(&config.registry.db_file);
    let store = SqliteStore::new(&db_file)?;
    println!(
        "registry: {} keys ({})",
        store.count(REGISTRY_PREFIX)?,
        db_file.display()
    );

    match &config.cache.persist_file {
        Some(path) => {
            let path = expand_tilde(path);
            let entries = std::fs::read_to_string(&path)
                .map(|c| c.lines().filter(|l| !l.trim().is_empty()).count())
                .unwrap_or(0);
            println!("cached assets: {} ({})", entries, path.display());
        }
        None => println!("cached assets: persistence disabled"),
    }
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let content = toml::to_string_pretty(&config)?;
            println!("{}", content);
        }
        ConfigAction::Validate { file } => {
            let path = file
                .or(config_path)
                .map_or_else(Config::default_path, Ok)?;
            let config = Config::load(&path)?;
            ConfigValidator::validate(&config)?;
            println!("✓ Configuration is valid: {}", path.display());
        }
        ConfigAction::Init { force } => {
            let path = config_path.map_or_else(Config::default_path, Ok)?;
            if path.exists() && !force {
                return Err(EnrichdError::Config(format!(
                    "config already exists at {}, use --force to overwrite",
                    path.display()
                )));
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| EnrichdError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }
            Config::default().save(&path)?;
            println!("✓ Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => {
            let path = Config::default_path()?;
            if path.exists() {
                Config::load(&path)
            } else {
                tracing::debug!("no config file at {}, using defaults", path.display());
                Ok(Config::default())
            }
        }
    }
}

/// Expand tilde in path
fn expand_tilde(path: &Path) -> PathBuf {
    if path.starts_with("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.strip_prefix("~").unwrap());
        }
    }
    path.to_path_buf()
}
