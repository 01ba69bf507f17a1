use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bundle::{ArchiveError, ArchiveResult, TemplateReader};

/// Where the viewer template archive comes from
pub trait TemplateSource: Send + Sync {
    fn fetch(&self) -> ArchiveResult<Vec<u8>>;

    /// Human readable origin, used in logs
    fn describe(&self) -> String;
}

/// Template read from a zip file on disk
#[derive(Debug, Clone)]
pub struct FileTemplate {
    path: PathBuf,
}

impl FileTemplate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TemplateSource for FileTemplate {
    fn fetch(&self) -> ArchiveResult<Vec<u8>> {
        std::fs::read(&self.path)
            .map_err(|e| ArchiveError::TemplateUnavailable(format!("{}: {}", self.path.display(), e)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Template already held in memory
#[derive(Debug, Clone)]
pub struct MemoryTemplate(pub Vec<u8>);

impl TemplateSource for MemoryTemplate {
    fn fetch(&self) -> ArchiveResult<Vec<u8>> {
        Ok(self.0.clone())
    }

    fn describe(&self) -> String {
        format!("in-memory template ({} bytes)", self.0.len())
    }
}

/// Fetch-once holder for the template archive
///
/// The first successful [`TemplateCache::get`] keeps the bytes for every later
/// merge. A fetch that fails, or returns something that is not a zip, is not
/// cached and will be retried on the next call.
pub struct TemplateCache {
    source: Box<dyn TemplateSource>,
    cached: Mutex<Option<Arc<[u8]>>>,
}

impl TemplateCache {
    pub fn new(source: impl TemplateSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cached: Mutex::new(None),
        }
    }

    pub fn get(&self) -> ArchiveResult<Arc<[u8]>> {
        let mut cached = self.cached.lock();
        if let Some(bytes) = cached.as_ref() {
            return Ok(Arc::clone(bytes));
        }

        let bytes = self.source.fetch()?;
        let entries = TemplateReader::open(&bytes)?.len();
        log::info!(
            "Loaded viewer template from {} ({} bytes, {} entries)",
            self.source.describe(),
            bytes.len(),
            entries
        );

        let bytes: Arc<[u8]> = bytes.into();
        *cached = Some(Arc::clone(&bytes));
        Ok(bytes)
    }

    pub fn is_cached(&self) -> bool {
        self.cached.lock().is_some()
    }

    /// Drop the cached bytes so the next `get` fetches again
    pub fn invalidate(&self) {
        self.cached.lock().take();
    }
}
