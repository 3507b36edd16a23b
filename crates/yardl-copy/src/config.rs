//! TOML configuration for `yardl-copy`.
//!
//! ```toml
//! [schema]
//! current = "schemas/current.json"
//! previous = ["schemas/v0.json"]
//!
//! [copy]
//! skip = 0
//! max = 10
//! batch_size = 3
//!
//! [reader]
//! completion = "allow_partial"
//! log_level = "info"
//!
//! [writer]
//! indexed = true
//! ```
//!
//! Only `[schema] current` is required.  Schema files are read verbatim apart
//! from trailing whitespace, since headers are matched by exact text.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use yardl_core::protocol::coded_stream::DEFAULT_BUFFER_SIZE;
use yardl_core::{
    Completion, CopyOptions, ProtocolDefinition, ReaderOptions, WriterOptions, YardlError,
};

/// Error type for loading configuration and the schemas it points at.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file could not be read.
    #[error("I/O error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A schema file does not describe a protocol.
    #[error("invalid schema in {path}: {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: YardlError,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CopyConfig {
    pub schema: SchemaConfig,
    #[serde(default)]
    pub copy: CopyOptions,
    #[serde(default)]
    pub reader: ReaderConfig,
    /// Output settings; `indexed` appends a seek index.
    #[serde(default)]
    pub writer: WriterOptions,
}

/// Where the current and previous schema texts live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaConfig {
    pub current: PathBuf,
    /// Oldest first is not required; the list order defines schema indices.
    #[serde(default)]
    pub previous: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReaderConfig {
    #[serde(default)]
    pub completion: Completion,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            completion: Completion::default(),
            log_level: default_log_level(),
            buffer_size: default_buffer_size(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CopyConfig {
    /// Reads and parses the TOML file at `path`.
    ///
    /// Relative schema paths are resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text)?;
        if let Some(dir) = path.parent() {
            config.schema.current = dir.join(&config.schema.current);
            for previous in &mut config.schema.previous {
                *previous = dir.join(&*previous);
            }
        }
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            completion: self.reader.completion,
            buffer_size: self.reader.buffer_size,
        }
    }

    /// Loads the current schema and registers the previous ones.
    pub fn load_definition(&self) -> Result<ProtocolDefinition, ConfigError> {
        let current = read_schema(&self.schema.current)?;
        let previous = self
            .schema
            .previous
            .iter()
            .map(|p| read_schema(p))
            .collect::<Result<Vec<_>, _>>()?;

        let definition =
            ProtocolDefinition::parse(&current).map_err(|source| ConfigError::Schema {
                path: self.schema.current.clone(),
                source,
            })?;
        Ok(definition.with_previous_schemas(previous))
    }
}

fn read_schema(path: &Path) -> Result<String, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text.trim_end().to_string())
}
