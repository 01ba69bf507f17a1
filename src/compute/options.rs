use serde::{Deserialize, Serialize};

use crate::package::WorldMetadata;

/// Voxelizer tuning knobs
///
/// Serialized camelCase on the wire; the snake_case spellings are accepted
/// too so the same type can be read from config files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VoxelizerOptions {
    /// Color gain applied to sampled points, in (0, 16]
    pub gain: f32,
    /// Sampling grid step, 1..=16
    pub grid: u32,
    /// Voxels per point-cloud unit, 1..=1024
    pub resolution: u32,
    /// Rotation around X in degrees, [-360, 360]
    #[serde(alias = "rotate_x")]
    pub rotate_x: f32,
    #[serde(alias = "rotate_y")]
    pub rotate_y: f32,
    #[serde(alias = "rotate_z")]
    pub rotate_z: f32,
}

impl Default for VoxelizerOptions {
    fn default() -> Self {
        Self {
            gain: 1.7,
            grid: 1,
            resolution: 10,
            rotate_x: -90.0,
            rotate_y: 0.0,
            rotate_z: 0.0,
        }
    }
}

impl VoxelizerOptions {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.gain > 0.0 && self.gain <= 16.0) {
            return Err(format!("gain must be in (0, 16], got {}", self.gain));
        }
        if !(1..=16).contains(&self.grid) {
            return Err(format!("grid must be in 1..=16, got {}", self.grid));
        }
        if !(1..=1024).contains(&self.resolution) {
            return Err(format!("resolution must be in 1..=1024, got {}", self.resolution));
        }
        for (axis, angle) in [("x", self.rotate_x), ("y", self.rotate_y), ("z", self.rotate_z)] {
            if !(-360.0..=360.0).contains(&angle) {
                return Err(format!("rotate_{} must be in [-360, 360], got {}", axis, angle));
            }
        }
        Ok(())
    }
}

/// Everything a generate request needs besides the geometry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(flatten)]
    pub voxelizer: VoxelizerOptions,
    /// Written into the package header by the backend
    pub metadata: WorldMetadata,
}
