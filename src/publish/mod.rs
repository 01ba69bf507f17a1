//! Publishing compressed worlds to content-addressed storage

use std::collections::HashMap;
use std::fmt;

use futures::future::{self, BoxFuture};
use parking_lot::Mutex;

/// Placeholder replaced by the content id in viewer URL templates
pub const CID_PLACEHOLDER: &str = "{cid}";

/// Identifier a store derives from the bytes it was given
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("content store unreachable: {0}")]
    Unreachable(String),

    #[error("content store rejected the upload: {0}")]
    Rejected(String),
}

/// Content-addressed storage collaborator
pub trait ContentStore: Send + Sync {
    fn put(&self, bytes: Vec<u8>) -> BoxFuture<'_, Result<ContentId, StorageError>>;
}

/// Outcome of a successful publish
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub cid: ContentId,
    pub url: String,
    pub size: usize,
}

/// Substitute `cid` into a viewer URL template
pub fn viewer_url(template: &str, cid: &ContentId) -> String {
    template.replace(CID_PLACEHOLDER, cid.as_str())
}

/// Upload compressed package bytes and build the viewer link
pub async fn publish_package(
    store: &dyn ContentStore,
    compressed: Vec<u8>,
    url_template: &str,
) -> Result<Published, StorageError> {
    let size = compressed.len();
    let cid = store.put(compressed).await?;
    let url = viewer_url(url_template, &cid);
    log::info!("Published {} bytes as {}", size, cid);
    Ok(Published { cid, url, size })
}

/// Store keeping uploads in process memory, keyed by checksum and size
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<ContentId, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cid: &ContentId) -> Option<Vec<u8>> {
        self.objects.lock().get(cid).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// Store `bytes` under `base`, or under `base-1`, `base-2`, ... when a
    /// different object already holds the id
    fn insert(&self, base: String, bytes: Vec<u8>) -> ContentId {
        let mut objects = self.objects.lock();
        let mut cid = ContentId(base.clone());
        let mut suffix = 0u64;
        loop {
            match objects.get(&cid) {
                Some(existing) if *existing == bytes => return cid,
                Some(_) => {
                    suffix += 1;
                    cid = ContentId(format!("{}-{}", base, suffix));
                }
                None => {
                    objects.insert(cid.clone(), bytes);
                    return cid;
                }
            }
        }
    }
}

impl ContentStore for MemoryStore {
    fn put(&self, bytes: Vec<u8>) -> BoxFuture<'_, Result<ContentId, StorageError>> {
        if bytes.is_empty() {
            return Box::pin(future::ready(Err(StorageError::Rejected("empty upload".to_string()))));
        }
        let base = format!("mem-{:08x}-{}", crc32fast::hash(&bytes), bytes.len());
        let cid = self.insert(base, bytes);
        Box::pin(future::ready(Ok(cid)))
    }
}
