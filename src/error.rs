use crate::bundle::ArchiveError;
use crate::channel::ChannelError;
use crate::config::ConfigError;
use crate::package::CodecError;
use crate::publish::StorageError;

pub type StudioResult<T> = Result<T, StudioError>;

/// Everything a studio operation can fail with
#[derive(Debug, thiserror::Error)]
pub enum StudioError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start compute unit: {0}")]
    ComputeUnit(#[source] std::io::Error),

    #[error("no point cloud loaded")]
    NoPointCloud,

    #[error("no world has been generated")]
    NoPackage,

    #[error("result discarded, a newer operation replaced it")]
    Superseded,

    #[error("invalid options: {0}")]
    InvalidOptions(String),
}
