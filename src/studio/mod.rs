//! Orchestration of the load / generate / download workflow
//!
//! [`Studio`] is the only writer of the current world. Every load, generate
//! and reset bumps a generation counter; a compute result that comes back
//! for an older generation is dropped and its caller gets
//! [`StudioError::Superseded`]. Changing the voxelizer options only
//! supersedes a generate. Downloads work on a copy of the package and
//! only write a patched header back when nothing replaced the world meanwhile.

use parking_lot::Mutex;

use crate::bundle::{FileTemplate, MergeStream, TemplateCache};
use crate::channel::TaskChannel;
use crate::compute::{ComputeBackend, ComputeUnit, GenerateOptions, PointGeometry, VoxelizerOptions};
use crate::config::{BundleConfig, StudioConfig};
use crate::error::{StudioError, StudioResult};
use crate::package::{self, WorldMetadata, WorldPackage};
use crate::publish::{self, ContentStore, Published};

/// A finished artifact and the file name to save it under
#[derive(Debug, Clone, PartialEq)]
pub struct Download {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

struct StudioState {
    generation: u64,
    /// Bumped on every voxelizer option change
    options_revision: u64,
    geometry: Option<PointGeometry>,
    package: Option<WorldPackage>,
    voxelizer: VoxelizerOptions,
    metadata: WorldMetadata,
}

/// Package copy with its metadata edit applied, ready to ship
struct PreparedPackage {
    generation: u64,
    /// Metadata edit that was applied, if the package was dirty
    applied: Option<WorldMetadata>,
    stem: String,
    package: WorldPackage,
    compressed: Vec<u8>,
}

pub struct Studio {
    unit: ComputeUnit,
    channel: TaskChannel,
    state: Mutex<StudioState>,
    templates: TemplateCache,
    bundle: BundleConfig,
    viewer_url: String,
}

impl Studio {
    /// Start a studio whose viewer template is read from `bundle.template_path`
    pub fn from_config<B: ComputeBackend>(backend: B, config: &StudioConfig) -> StudioResult<Self> {
        let templates = TemplateCache::new(FileTemplate::new(&config.bundle.template_path));
        Self::new(backend, config, templates)
    }

    pub fn new<B: ComputeBackend>(backend: B, config: &StudioConfig, templates: TemplateCache) -> StudioResult<Self> {
        config.validate()?;
        let unit = ComputeUnit::spawn(backend, config.channel.request_timeout()).map_err(StudioError::ComputeUnit)?;
        let channel = unit.channel();

        Ok(Self {
            unit,
            channel,
            state: Mutex::new(StudioState {
                generation: 0,
                options_revision: 0,
                geometry: None,
                package: None,
                voxelizer: config.voxelizer,
                metadata: config.metadata.to_metadata(),
            }),
            templates,
            bundle: config.bundle.clone(),
            viewer_url: config.publish.viewer_url.clone(),
        })
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn has_point_cloud(&self) -> bool {
        self.state.lock().geometry.is_some()
    }

    pub fn has_package(&self) -> bool {
        self.state.lock().package.is_some()
    }

    pub fn metadata(&self) -> WorldMetadata {
        self.state.lock().metadata.clone()
    }

    pub fn voxelizer_options(&self) -> VoxelizerOptions {
        self.state.lock().voxelizer
    }

    /// Parse a point-cloud file, replacing the current cloud and world
    ///
    /// Returns the number of points.
    pub async fn load(&self, buffer: Vec<u8>) -> StudioResult<usize> {
        let generation = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.geometry = None;
            state.package = None;
            state.generation
        };
        log::info!("Loading point cloud ({} bytes)", buffer.len());

        let geometry = self.channel.load(buffer).await?;

        let mut state = self.state.lock();
        if state.generation != generation {
            log::warn!("Discarding point cloud from superseded load {}", generation);
            return Err(StudioError::Superseded);
        }
        let points = geometry.point_count();
        state.geometry = Some(geometry);
        log::info!("Loaded {} points", points);
        Ok(points)
    }

    /// Voxelize the loaded cloud with the current options
    ///
    /// Returns the size of the new world package in bytes.
    pub async fn generate(&self) -> StudioResult<usize> {
        let (generation, revision, geometry, options) = {
            let mut state = self.state.lock();
            let geometry = state.geometry.clone().ok_or(StudioError::NoPointCloud)?;
            let options = GenerateOptions {
                voxelizer: state.voxelizer,
                metadata: state.metadata.clone(),
            };
            state.generation += 1;
            state.package = None;
            (state.generation, state.options_revision, geometry, options)
        };
        let requested = options.metadata.clone();
        log::info!(
            "Generating world from {} points at resolution {}",
            geometry.point_count(),
            options.voxelizer.resolution
        );

        let buffer = self.channel.generate(geometry, options).await?;

        let mut state = self.state.lock();
        if state.generation != generation || state.options_revision != revision {
            log::warn!("Discarding world from superseded generate {}", generation);
            return Err(StudioError::Superseded);
        }
        let mut package = WorldPackage::from_bytes(buffer)?;
        if state.metadata != requested {
            // Edited while the unit was voxelizing
            package.set_metadata(state.metadata.clone());
        }
        let size = package.len();
        state.package = Some(package);
        log::info!("Generated world package ({} bytes)", size);
        Ok(size)
    }

    /// Replace the world metadata
    ///
    /// An existing package is marked dirty; its header is rewritten on the
    /// next download or publish.
    pub fn update_metadata(&self, metadata: WorldMetadata) -> StudioResult<()> {
        metadata.validate().map_err(StudioError::InvalidOptions)?;
        let mut state = self.state.lock();
        if let Some(package) = state.package.as_mut() {
            package.set_metadata(metadata.clone());
        }
        state.metadata = metadata;
        Ok(())
    }

    /// Replace the voxelizer options
    ///
    /// The current world no longer matches them, so it is dropped and a
    /// generate still in flight is superseded. The loaded cloud, and a load
    /// still in flight, are kept.
    pub fn set_voxelizer_options(&self, options: VoxelizerOptions) -> StudioResult<()> {
        options.validate().map_err(StudioError::InvalidOptions)?;
        let mut state = self.state.lock();
        state.voxelizer = options;
        state.options_revision += 1;
        state.package = None;
        Ok(())
    }

    /// Forget the cloud and the world
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.generation += 1;
        state.geometry = None;
        state.package = None;
        log::debug!("Studio reset to generation {}", state.generation);
    }

    /// Compressed world package as `<name>.bin`
    pub fn download_world(&self) -> StudioResult<Download> {
        let prepared = self.prepare_package()?;
        let file_name = format!("{}.bin", prepared.stem);
        let bytes = self.finish_prepared(prepared);
        Ok(Download { file_name, bytes })
    }

    /// Viewer template plus the compressed world as `<name>.zip`
    pub async fn download_viewer(&self) -> StudioResult<Download> {
        let prepared = self.prepare_package()?;
        let template = self.templates.get()?;
        let stream = MergeStream::spawn(
            template,
            prepared.compressed.clone(),
            self.bundle.merge_options(),
            self.bundle.stream_depth,
        )?;
        let archive = stream.collect_archive().await?;

        let file_name = format!("{}.zip", prepared.stem);
        self.finish_prepared(prepared);
        log::info!("Built viewer bundle {} ({} bytes)", file_name, archive.len());
        Ok(Download {
            file_name,
            bytes: archive,
        })
    }

    /// Upload the compressed world and return its viewer link
    pub async fn publish(&self, store: &dyn ContentStore) -> StudioResult<Published> {
        let prepared = self.prepare_package()?;
        let published = publish::publish_package(store, prepared.compressed.clone(), &self.viewer_url).await?;
        self.finish_prepared(prepared);
        Ok(published)
    }

    /// Stop the compute unit; requests still in flight fail with `Closed`
    pub fn shutdown(mut self) {
        self.unit.terminate();
    }

    fn prepare_package(&self) -> StudioResult<PreparedPackage> {
        let (generation, mut package) = {
            let state = self.state.lock();
            let package = state.package.clone().ok_or(StudioError::NoPackage)?;
            (state.generation, package)
        };

        let metadata = package.metadata()?;
        let applied = package.is_dirty().then(|| metadata.clone());
        package.commit_metadata()?;
        let compressed = package::compress(package.bytes(), self.bundle.compression)?;

        Ok(PreparedPackage {
            generation,
            applied,
            stem: metadata.file_stem().to_string(),
            package,
            compressed,
        })
    }

    /// Store the patched package if the world is still the one we copied
    /// and nobody edited its metadata since
    fn finish_prepared(&self, prepared: PreparedPackage) -> Vec<u8> {
        let PreparedPackage {
            generation,
            applied,
            package,
            compressed,
            ..
        } = prepared;

        if let Some(applied) = applied {
            let mut state = self.state.lock();
            if state.generation == generation {
                if let Some(current) = state.package.as_mut() {
                    let unchanged = current.is_dirty() && current.metadata().ok().as_ref() == Some(&applied);
                    if unchanged {
                        *current = package;
                        log::debug!("Wrote patched metadata back into generation {}", generation);
                    }
                }
            }
        }
        compressed
    }
}
