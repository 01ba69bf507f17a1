//! Studio configuration
//!
//! Every key has a default, so an empty file (or no file) is a valid
//! configuration. Values are range checked by [`StudioConfig::validate`],
//! which [`StudioConfig::load`] always runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bundle::{MergeOptions, DEFAULT_PACKAGE_ENTRY};
use crate::compression::CompressionLevel;
use crate::compute::VoxelizerOptions;
use crate::package::WorldMetadata;
use crate::publish::CID_PLACEHOLDER;

const DEFAULT_TEMPLATE_PATH: &str = "viewer.zip";
const DEFAULT_STREAM_DEPTH: usize = 16;
const DEFAULT_VIEWER_URL: &str = "https://ipfs.io/ipfs/{cid}";
const MAX_CHUNK_SIZE: u32 = 256;
const MAX_STREAM_DEPTH: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{key} out of range: {message}")]
    OutOfRange { key: &'static str, message: String },
}

fn out_of_range(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::OutOfRange {
        key,
        message: message.into(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub voxelizer: VoxelizerOptions,
    pub metadata: MetadataDefaults,
    pub channel: ChannelConfig,
    pub bundle: BundleConfig,
    pub publish: PublishConfig,
}

/// Metadata a freshly generated world starts with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataDefaults {
    pub chunk_size: u32,
    pub scale: f64,
    pub spawn: [f64; 3],
    pub version: String,
    pub author: Option<String>,
    pub name: Option<String>,
}

impl Default for MetadataDefaults {
    fn default() -> Self {
        let metadata = WorldMetadata::default();
        Self {
            chunk_size: metadata.chunk_size,
            scale: metadata.scale,
            spawn: metadata.spawn,
            version: metadata.version,
            author: None,
            name: None,
        }
    }
}

impl MetadataDefaults {
    pub fn to_metadata(&self) -> WorldMetadata {
        WorldMetadata {
            chunk_size: self.chunk_size,
            scale: self.scale,
            spawn: self.spawn,
            version: self.version.clone(),
            author: self.author.clone(),
            name: self.name.clone(),
            extra: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Per-request deadline in milliseconds, 0 disables it
    pub request_timeout_ms: u64,
}

impl ChannelConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    pub template_path: PathBuf,
    pub package_entry: String,
    pub compression: CompressionLevel,
    /// Output chunks the merge worker may run ahead of the consumer
    pub stream_depth: usize,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            template_path: PathBuf::from(DEFAULT_TEMPLATE_PATH),
            package_entry: DEFAULT_PACKAGE_ENTRY.to_string(),
            compression: CompressionLevel::Default,
            stream_depth: DEFAULT_STREAM_DEPTH,
        }
    }
}

impl BundleConfig {
    pub fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            package_entry: self.package_entry.clone(),
            level: self.compression,
            ..MergeOptions::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Viewer link with `{cid}` standing in for the content id
    pub viewer_url: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            viewer_url: DEFAULT_VIEWER_URL.to_string(),
        }
    }
}

impl StudioConfig {
    /// Read, parse and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&raw)?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.voxelizer
            .validate()
            .map_err(|message| out_of_range("voxelizer", message))?;

        let metadata = &self.metadata;
        if !(1..=MAX_CHUNK_SIZE).contains(&metadata.chunk_size) {
            return Err(out_of_range(
                "metadata.chunk_size",
                format!("expected 1..={}, got {}", MAX_CHUNK_SIZE, metadata.chunk_size),
            ));
        }
        metadata
            .to_metadata()
            .validate()
            .map_err(|message| out_of_range("metadata", message))?;

        let entry = &self.bundle.package_entry;
        if entry.is_empty() || entry.starts_with('/') {
            return Err(out_of_range(
                "bundle.package_entry",
                format!("expected a relative path, got {:?}", entry),
            ));
        }
        if !(1..=MAX_STREAM_DEPTH).contains(&self.bundle.stream_depth) {
            return Err(out_of_range(
                "bundle.stream_depth",
                format!("expected 1..={}, got {}", MAX_STREAM_DEPTH, self.bundle.stream_depth),
            ));
        }

        if !self.publish.viewer_url.contains(CID_PLACEHOLDER) {
            return Err(out_of_range(
                "publish.viewer_url",
                format!("must contain {}", CID_PLACEHOLDER),
            ));
        }
        Ok(())
    }
}
