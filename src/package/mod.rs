//! World package format: header-prefixed metadata over packed chunk data

pub mod codec;
pub mod metadata;

pub use codec::{compress, decode, decompress, encode, patch_metadata, DecodedPackage, MAX_METADATA_LEN};
pub use metadata::WorldMetadata;

use crate::compression::CompressionError;

/// Result type for package codec operations
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while reading, writing or compressing packages
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("package truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("invalid metadata header: {0}")]
    InvalidMetadata(#[source] serde_json::Error),

    #[error("metadata is {len} bytes, header limit is {max}")]
    MetadataTooLarge { len: usize, max: usize },

    #[error("failed to serialize metadata: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error(transparent)]
    Compression(#[from] CompressionError),
}

/// Package bytes plus any metadata edit not yet written into them
///
/// Metadata edits are recorded and only spliced into the bytes on demand.
#[derive(Debug, Clone)]
pub struct WorldPackage {
    bytes: Vec<u8>,
    pending_metadata: Option<WorldMetadata>,
}

impl WorldPackage {
    /// Wrap freshly packed bytes, checking that the header decodes
    pub fn from_bytes(bytes: Vec<u8>) -> CodecResult<Self> {
        decode(&bytes)?;
        Ok(Self {
            bytes,
            pending_metadata: None,
        })
    }

    /// Bytes as last written; excludes pending metadata edits
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.pending_metadata.is_some()
    }

    /// Current metadata, pending edits included
    pub fn metadata(&self) -> CodecResult<WorldMetadata> {
        match &self.pending_metadata {
            Some(metadata) => Ok(metadata.clone()),
            None => Ok(decode(&self.bytes)?.metadata),
        }
    }

    /// Record a metadata edit and mark the package dirty
    pub fn set_metadata(&mut self, metadata: WorldMetadata) {
        self.pending_metadata = Some(metadata);
    }

    /// Package bytes with any pending metadata applied
    ///
    /// Leaves `self` untouched; see [`WorldPackage::commit_metadata`] to write
    /// the edit back.
    pub fn resolved_bytes(&self) -> CodecResult<std::borrow::Cow<'_, [u8]>> {
        match &self.pending_metadata {
            Some(metadata) => Ok(std::borrow::Cow::Owned(patch_metadata(&self.bytes, metadata)?)),
            None => Ok(std::borrow::Cow::Borrowed(&self.bytes)),
        }
    }

    /// Apply the pending metadata edit in place
    ///
    /// On error the bytes and the pending edit are both kept as they were.
    pub fn commit_metadata(&mut self) -> CodecResult<()> {
        if let Some(metadata) = &self.pending_metadata {
            self.bytes = patch_metadata(&self.bytes, metadata)?;
            self.pending_metadata = None;
        }
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_undecodable_bytes() {
        assert!(WorldPackage::from_bytes(vec![9]).is_err());
    }

    #[test]
    fn test_dirty_flag_lifecycle() {
        let bytes = encode(&WorldMetadata::default(), b"chunks").unwrap();
        let mut package = WorldPackage::from_bytes(bytes.clone()).unwrap();
        assert!(!package.is_dirty());
        assert_eq!(&*package.resolved_bytes().unwrap(), &bytes[..]);

        let edited = WorldMetadata {
            name: Some("edited".to_string()),
            ..WorldMetadata::default()
        };
        package.set_metadata(edited.clone());
        assert!(package.is_dirty());
        assert_eq!(package.metadata().unwrap(), edited);
        // Not yet written
        assert_eq!(package.bytes(), &bytes[..]);

        let resolved = package.resolved_bytes().unwrap().into_owned();
        assert_eq!(decode(&resolved).unwrap().metadata, edited);

        package.commit_metadata().unwrap();
        assert!(!package.is_dirty());
        assert_eq!(package.bytes(), &resolved[..]);
        assert_eq!(decode(package.bytes()).unwrap().payload, b"chunks");
    }

    #[test]
    fn test_failed_commit_keeps_state() {
        let bytes = encode(&WorldMetadata::default(), b"chunks").unwrap();
        let mut package = WorldPackage::from_bytes(bytes.clone()).unwrap();
        package.set_metadata(WorldMetadata {
            author: Some("a".repeat(70_000)),
            ..WorldMetadata::default()
        });

        assert!(matches!(
            package.commit_metadata(),
            Err(CodecError::MetadataTooLarge { .. })
        ));
        assert!(package.is_dirty());
        assert_eq!(package.bytes(), &bytes[..]);
    }
}
