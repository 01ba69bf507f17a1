use serde::{Deserialize, Serialize};

/// Metadata embedded in the header of a world package
///
/// Serialized as camelCase JSON. Keys this struct does not know about are
/// kept in `extra` so a decode/encode cycle never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldMetadata {
    /// Edge length of a chunk in voxels
    pub chunk_size: u32,
    /// World units per voxel
    pub scale: f64,
    /// Spawn point in voxel space
    pub spawn: [f64; 3],
    /// Package format version string
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for WorldMetadata {
    fn default() -> Self {
        Self {
            chunk_size: 32,
            scale: 0.125,
            spawn: [0.0, 8.0, 0.0],
            version: "0.0.1".to_string(),
            author: None,
            name: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl WorldMetadata {
    /// Check the values a viewer relies on
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunkSize must be at least 1".to_string());
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(format!("scale must be a positive number, got {}", self.scale));
        }
        if self.spawn.iter().any(|c| !c.is_finite()) {
            return Err(format!("spawn must be finite, got {:?}", self.spawn));
        }
        if self.version.is_empty() {
            return Err("version must not be empty".to_string());
        }
        Ok(())
    }

    /// Base file name for downloads of this world
    pub fn file_stem(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => "world",
        }
    }
}
