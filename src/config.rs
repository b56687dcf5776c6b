//! Segment configuration: defaults, plus optional layering from a TOML file and `STRATA_*`
//! environment variables.

use crate::codec::BlockCompression;
use crate::error::DbError;
use crate::meta::{MetaFormat, MetaSerializer};
use crate::telemetry::{noop_event_listener, DbEventListener};
use crate::types::Timestamp;

use config::{Config, Environment, File, FileFormat};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Window width after which a memory segment reports itself frozen (10 minutes of seconds).
pub const DEFAULT_FREEZE_WINDOW: Timestamp = 600;

/// Configuration options shared by memory and disk segments.
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    /// A memory segment is frozen once `max_ts - min_ts >= freeze_window`.
    pub freeze_window: Timestamp,
    /// Compression applied to each series block on marshal.
    pub compression: BlockCompression,
    /// Metadata encoding. Writer and reader of a segment file must agree.
    pub meta_format: MetaFormat,
    /// Upper bound on how long `close` waits for in-flight readers. `None` waits indefinitely.
    pub close_timeout: Option<Duration>,
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn DbEventListener>,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            freeze_window: DEFAULT_FREEZE_WINDOW,
            compression: BlockCompression::None,
            meta_format: MetaFormat::Json,
            close_timeout: None,
            event_listener: noop_event_listener(),
        }
    }
}

impl SegmentConfig {
    pub fn serializer(&self) -> Arc<dyn MetaSerializer> {
        self.meta_format.serializer()
    }

    pub fn validate(&self) -> Result<(), DbError> {
        if self.freeze_window <= 0 {
            return Err(DbError::ConfigError(format!(
                "freeze_window must be positive, got {}",
                self.freeze_window
            )));
        }
        Ok(())
    }
}

/// File/env view of [`SegmentConfig`]. Every field optional for layering.
#[derive(Debug, Default, serde::Deserialize)]
pub struct SegmentFileConfig {
    pub freeze_window: Option<Timestamp>,
    /// Table form in TOML: `[compression]` with `type = "lz4"`.
    pub compression: Option<BlockCompression>,
    pub meta_format: Option<MetaFormat>,
    pub close_timeout_ms: Option<u64>,
}

impl SegmentFileConfig {
    /// Overwrites only the fields that are `Some`.
    pub fn merge_into(&self, base: &mut SegmentConfig) {
        if let Some(w) = self.freeze_window {
            base.freeze_window = w;
        }
        if let Some(c) = self.compression {
            base.compression = c;
        }
        if let Some(f) = self.meta_format {
            base.meta_format = f;
        }
        if let Some(ms) = self.close_timeout_ms {
            base.close_timeout = Some(Duration::from_millis(ms));
        }
    }
}

/// Loads defaults, then the TOML file at `path` (if given), then `STRATA_*` environment
/// variables (`__` separates nested keys).
pub fn load_segment_config(path: Option<&Path>) -> Result<SegmentConfig, DbError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        if !path.exists() {
            return Err(DbError::ConfigError(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        builder = builder.add_source(File::from(path).format(FileFormat::Toml));
    }
    builder = builder.add_source(
        Environment::with_prefix("STRATA")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .ignore_empty(true),
    );

    let merged = builder
        .build()
        .map_err(|e| DbError::ConfigError(e.to_string()))?;
    let partial: SegmentFileConfig = merged
        .try_deserialize()
        .map_err(|e| DbError::ConfigError(e.to_string()))?;

    let mut cfg = SegmentConfig::default();
    partial.merge_into(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = SegmentConfig::default();
        assert_eq!(cfg.freeze_window, 600);
        assert_eq!(cfg.meta_format, MetaFormat::Json);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn merge_only_overwrites_present_fields() {
        let mut cfg = SegmentConfig::default();
        let partial = SegmentFileConfig {
            close_timeout_ms: Some(250),
            ..Default::default()
        };
        partial.merge_into(&mut cfg);
        assert_eq!(cfg.close_timeout, Some(Duration::from_millis(250)));
        assert_eq!(cfg.freeze_window, DEFAULT_FREEZE_WINDOW);
        assert_eq!(cfg.compression, BlockCompression::None);
    }

    #[test]
    fn non_positive_window_rejected() {
        let cfg = SegmentConfig {
            freeze_window: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(DbError::ConfigError(_))));
    }
}
