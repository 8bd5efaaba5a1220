//! Directory-service lookup boundary
//!
//! The external directory service maps an address to authoritative asset
//! metadata. Only the call contract lives here; the cache consumes it as
//! a trait object and never sees the underlying protocol.

use crate::error::{EnrichdError, Result};
use crate::models::Asset;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::BufRead;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// Synchronous lookup contract: `Ok(Some(..))` for a confirmed asset,
/// `Ok(None)` when the service has no authoritative answer.
pub trait DirectoryLookup: Send + Sync {
    fn lookup(&self, ip: IpAddr, fields: &DirectoryFields) -> Result<Option<Asset>>;
}

/// The three service-specific projections of one underlying record.
/// Field names are configuration, not hard-coded protocol constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryFields {
    pub original: String,
    pub pretty: String,
    pub kernel: String,
}

impl DirectoryFields {
    /// Derive the three field names from a common prefix
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            original: format!("{}.original", prefix),
            pretty: format!("{}.pretty", prefix),
            kernel: format!("{}.kernel", prefix),
        }
    }
}

impl Default for DirectoryFields {
    fn default() -> Self {
        Self::with_prefix("asset")
    }
}

/// A directory client handle plus its configured field set
#[derive(Clone)]
pub struct DirectorySettings {
    pub client: Arc<dyn DirectoryLookup>,
    pub fields: DirectoryFields,
}

impl fmt::Debug for DirectorySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectorySettings")
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

/// File-backed directory table: one JSON asset record per line, keyed by
/// the record's `ip`. Stands in for a live directory endpoint in offline
/// runs and tests.
pub struct FileDirectory {
    table: HashMap<IpAddr, Asset>,
}

impl FileDirectory {
    /// Load the table from an NDJSON file. An unreadable file or a
    /// malformed line fails the open; the caller decides whether that is
    /// fatal (for the cache it is not).
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| EnrichdError::Io {
            source: e,
            context: format!("Failed to open directory table: {}", path.display()),
        })?;

        let mut table = HashMap::new();
        for (lineno, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| EnrichdError::Io {
                source: e,
                context: format!("Failed to read directory table: {}", path.display()),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let asset: Asset = serde_json::from_str(&line).map_err(|e| EnrichdError::Json {
                source: e,
                context: format!(
                    "malformed directory record at {}:{}",
                    path.display(),
                    lineno + 1
                ),
            })?;
            let Some(ip) = asset.ip else {
                return Err(EnrichdError::Directory(format!(
                    "directory record without ip at {}:{}",
                    path.display(),
                    lineno + 1
                )));
            };
            table.insert(ip, asset);
        }

        tracing::debug!("loaded {} directory records from {}", table.len(), path.display());
        Ok(Self { table })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl DirectoryLookup for FileDirectory {
    fn lookup(&self, ip: IpAddr, _fields: &DirectoryFields) -> Result<Option<Asset>> {
        Ok(self.table.get(&ip).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fields_from_prefix() {
        let fields = DirectoryFields::with_prefix("target");
        assert_eq!(fields.original, "target.original");
        assert_eq!(fields.pretty, "target.pretty");
        assert_eq!(fields.kernel, "target.kernel");
    }

    #[test]
    fn test_file_directory_lookup() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("directory.json");
        std::fs::write(
            &path,
            "{\"host\":\"web01\",\"ip\":\"10.0.0.1\",\"domain\":\"corp.example\"}\n\
             {\"host\":\"db01\",\"ip\":\"10.0.0.2\"}\n",
        )
        .unwrap();

        let dir = FileDirectory::open(&path).unwrap();
        assert_eq!(dir.len(), 2);

        let fields = DirectoryFields::default();
        let hit = dir
            .lookup("10.0.0.1".parse().unwrap(), &fields)
            .unwrap()
            .unwrap();
        assert_eq!(hit.host, "web01");
        assert_eq!(hit.domain.as_deref(), Some("corp.example"));

        assert!(dir
            .lookup("10.9.9.9".parse().unwrap(), &fields)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_file_directory_rejects_record_without_ip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("directory.json");
        std::fs::write(&path, "{\"host\":\"orphan\"}\n").unwrap();
        assert!(FileDirectory::open(&path).is_err());
    }
}
