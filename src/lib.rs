//! Point cloud to voxel world studio
//!
//! A [`Studio`] drives a background [`ComputeUnit`] over a [`TaskChannel`],
//! keeps the current world package, and turns it into downloads: a
//! compressed `.bin`, a viewer `.zip` merged from a template archive, or a
//! published link.

pub mod bundle;
pub mod channel;
pub mod compression;
pub mod compute;
pub mod config;
pub mod error;
pub mod package;
pub mod publish;
pub mod studio;

pub use bundle::{ArchiveError, MergeOptions, MergeStream, TemplateCache};
pub use channel::{ChannelError, TaskChannel};
pub use compression::CompressionLevel;
pub use compute::{ComputeBackend, ComputeUnit, GenerateOptions, PointGeometry, VoxelizerOptions};
pub use config::{ConfigError, StudioConfig};
pub use error::{StudioError, StudioResult};
pub use package::{CodecError, WorldMetadata, WorldPackage};
pub use publish::{ContentId, ContentStore, Published, StorageError};
pub use studio::{Download, Studio};
