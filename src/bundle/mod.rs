//! Viewer bundle assembly
//!
//! A cached template archive is re-streamed entry by entry into a new zip,
//! followed by the compressed world package. Nothing is assembled in memory
//! until the caller concatenates the emitted output chunks.

pub mod merge;
pub mod reader;
pub mod template;
pub mod writer;

pub use merge::{merge_archive, merge_into, MergeOptions, MergeStream, DEFAULT_PACKAGE_ENTRY};
pub use reader::{EntryChunks, TemplateEntry, TemplateReader};
pub use template::{FileTemplate, MemoryTemplate, TemplateCache, TemplateSource};
pub use writer::{ChunkCollector, ChunkSink, EntryMethod, EntryWriter, ZipStreamWriter};

use crate::compression::CompressionError;

/// Result type for archive operations
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors that abort an archive merge
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("template archive is unreadable: {0}")]
    Template(#[from] zip::result::ZipError),

    #[error("failed to read template entry {path}: {source}")]
    TemplateData {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("template archive unavailable: {0}")]
    TemplateUnavailable(String),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error("entry {path} was not finished before the next write")]
    UnfinishedEntry { path: String },

    #[error("invalid entry path {0:?}")]
    InvalidPath(String),

    #[error("{0} exceeds the zip format limit")]
    LimitExceeded(String),

    #[error("archive output is incomplete")]
    Incomplete,

    #[error("failed to start archive worker: {0}")]
    Worker(#[source] std::io::Error),

    #[error("archive merge aborted before completion")]
    Aborted,
}
