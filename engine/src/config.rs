//! Engine configuration.
//!
//! Stored as TOML. Every field has a default, so an empty file (or no file at
//! all) is a valid configuration:
//!
//! ```toml
//! token_delimiter = "&token"
//!
//! [limits]
//! max_file_bytes = 2000000
//! max_total_bytes = 10000000
//!
//! [default_metadata]
//! cache-control = "public, max-age=15552000"
//!
//! [local]
//! root = "storage"
//! base_url = "http://localhost:9199/v0/b/local"
//! chunk_size = 262144
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, DispatchError};
use crate::model::{Metadata, SourceFile};

/// Query component that carries the ephemeral access token in download URLs.
pub const DEFAULT_TOKEN_DELIMITER: &str = "&token";

/// Default chunk size for the local backend: 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stable URLs are download URLs truncated at the first occurrence of this
    pub token_delimiter: String,

    pub limits: UploadLimits,

    /// Metadata applied to every upload; per-call metadata wins on conflicts
    pub default_metadata: Metadata,

    pub local: LocalStorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            token_delimiter: DEFAULT_TOKEN_DELIMITER.to_string(),
            limits: UploadLimits::default(),
            default_metadata: Metadata::new(),
            local: LocalStorageConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Defaults overlaid with the caller's metadata.
    pub fn merged_metadata(&self, metadata: Option<Metadata>) -> Metadata {
        let mut merged = self.default_metadata.clone();
        if let Some(metadata) = metadata {
            merged.extend(metadata);
        }
        merged
    }
}

/// Size limits checked before anything is dispatched. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadLimits {
    pub max_file_bytes: Option<u64>,
    pub max_total_bytes: Option<u64>,
}

impl UploadLimits {
    pub fn check_file(&self, file: &SourceFile) -> Result<(), DispatchError> {
        match self.max_file_bytes {
            Some(limit) if file.size() > limit => Err(DispatchError::FileTooLarge {
                file: file.name().to_string(),
                size: file.size(),
                limit,
            }),
            _ => Ok(()),
        }
    }

    pub fn check_batch(&self, files: &[SourceFile]) -> Result<(), DispatchError> {
        for file in files {
            self.check_file(file)?;
        }
        let total: u64 = files.iter().map(SourceFile::size).sum();
        match self.max_total_bytes {
            Some(limit) if total > limit => Err(DispatchError::BatchTooLarge { total, limit }),
            _ => Ok(()),
        }
    }
}

/// Settings for `LocalStorage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStorageConfig {
    /// Directory objects are written under
    pub root: PathBuf,
    /// Prefix of generated download URLs
    pub base_url: String,
    /// Bytes written between progress reports
    pub chunk_size: usize,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        LocalStorageConfig {
            root: PathBuf::from("storage"),
            base_url: "http://localhost:9199/v0/b/local".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}
