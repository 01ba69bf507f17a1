use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::compute::VoxelizerOptions;

/// Flat vertex buffers of a point cloud
///
/// Both buffers hold one xyz / rgb triple per point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointGeometry {
    pub color: Vec<f32>,
    pub position: Vec<f32>,
}

/// Axis-aligned bounds of a point cloud
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl GeometryBounds {
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

impl PointGeometry {
    pub fn point_count(&self) -> usize {
        self.position.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    /// Check that the buffers describe whole, matching points
    pub fn validate(&self) -> Result<(), String> {
        if self.position.len() % 3 != 0 {
            return Err(format!(
                "position buffer length {} is not a multiple of 3",
                self.position.len()
            ));
        }
        if self.color.len() != self.position.len() {
            return Err(format!(
                "color buffer has {} components, position buffer has {}",
                self.color.len(),
                self.position.len()
            ));
        }
        Ok(())
    }

    fn points_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        self.position.chunks_exact_mut(3)
    }

    pub fn bounds(&self) -> Option<GeometryBounds> {
        let mut points = self.position.chunks_exact(3).map(Vec3::from_slice);
        let first = points.next()?;
        let (min, max) = points.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Some(GeometryBounds { min, max })
    }

    /// Rotate about the origin around X, then Y, then Z (degrees)
    pub fn rotate_degrees(&mut self, x: f32, y: f32, z: f32) {
        if x == 0.0 && y == 0.0 && z == 0.0 {
            return;
        }
        let rotation = Quat::from_rotation_z(z.to_radians())
            * Quat::from_rotation_y(y.to_radians())
            * Quat::from_rotation_x(x.to_radians());

        for point in self.points_mut() {
            let rotated = rotation * Vec3::from_slice(point);
            rotated.write_to_slice(point);
        }
    }

    pub fn translate(&mut self, offset: Vec3) {
        for point in self.points_mut() {
            (Vec3::from_slice(point) + offset).write_to_slice(point);
        }
    }
}

/// Orient geometry the way the voxelizer expects it
///
/// Applies the configured rotations, then lifts the cloud by half its
/// height.
pub fn prepare_for_voxelization(geometry: &mut PointGeometry, options: &VoxelizerOptions) {
    geometry.rotate_degrees(options.rotate_x, options.rotate_y, options.rotate_z);
    if let Some(bounds) = geometry.bounds() {
        geometry.translate(Vec3::new(0.0, bounds.size().y * 0.5, 0.0));
    }
}
