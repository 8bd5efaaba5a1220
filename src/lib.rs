//! Enrichd - asset enrichment for security telemetry
//!
//! Enrichd consumes a stream of security telemetry events (IDS alerts,
//! Windows event logs, syslog, process-exec records) and substitutes full
//! network-asset metadata for each event's asset-bearing fields, so that
//! downstream consumers can correlate raw events with known infrastructure.

pub mod cache;
pub mod cli;
pub mod config;
pub mod directory;
pub mod enrich;
pub mod error;
pub mod events;
pub mod models;
pub mod store;

pub use error::{EnrichdError, Result};
