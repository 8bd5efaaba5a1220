use crate::config::Config;
use crate::error::{EnrichdError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_cache(config, &mut errors);
        Self::validate_directory(config, &mut errors);
        Self::validate_registry(config, &mut errors);
        Self::validate_logging(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EnrichdError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_cache(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.cache.prune_interval_secs == 0 {
            errors.push(ValidationError::new(
                "cache.prune_interval_secs",
                "Prune interval must be greater than 0",
            ));
        }

        if config.cache.prune_window_secs == 0 {
            errors.push(ValidationError::new(
                "cache.prune_window_secs",
                "Prune window must be greater than 0",
            ));
        }

        if config.cache.dump_interval_secs == 0 {
            errors.push(ValidationError::new(
                "cache.dump_interval_secs",
                "Dump interval must be greater than 0",
            ));
        }

        // Note: whether the persist path names a directory is checked at
        // cache construction, after tilde expansion.
        if let Some(path) = &config.cache.persist_file {
            if path.as_os_str().is_empty() {
                errors.push(ValidationError::new(
                    "cache.persist_file",
                    "Persist file path cannot be empty",
                ));
            }
        }
    }

    fn validate_directory(config: &Config, errors: &mut Vec<ValidationError>) {
        if !config.directory.enabled {
            return;
        }

        if config.directory.table_file.is_none() {
            errors.push(ValidationError::new(
                "directory.table_file",
                "Directory table file is required when the directory is enabled",
            ));
        }

        if config.directory.field_prefix.is_empty() {
            errors.push(ValidationError::new(
                "directory.field_prefix",
                "Field prefix cannot be empty",
            ));
        }
    }

    fn validate_registry(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.registry.db_file.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "registry.db_file",
                "Registry database path cannot be empty",
            ));
        }
    }

    fn validate_logging(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.logging.interval_secs == 0 {
            errors.push(ValidationError::new(
                "logging.interval_secs",
                "Log interval must be greater than 0",
            ));
        }
    }
}
