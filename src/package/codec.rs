//! World package binary layout
//!
//! ```text
//! [u16 LE metadata length N][N bytes UTF-8 JSON metadata][payload ...]
//! ```
//!
//! The payload is the packed chunk data produced by the compute backend and
//! is treated as opaque bytes.

use crate::compression::{self, CompressionLevel};
use crate::package::{CodecError, CodecResult, WorldMetadata};

/// Size of the metadata length prefix
pub const LENGTH_PREFIX: usize = 2;

/// Largest metadata header the length prefix can describe
pub const MAX_METADATA_LEN: usize = u16::MAX as usize;

/// A decoded view over package bytes
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPackage<'a> {
    pub metadata_len: u16,
    pub metadata: WorldMetadata,
    /// Borrowed from the input, never copied
    pub payload: &'a [u8],
}

/// Read the length prefix and return the offset where the payload starts
pub fn payload_offset(bytes: &[u8]) -> CodecResult<usize> {
    if bytes.len() < LENGTH_PREFIX {
        return Err(CodecError::Truncated {
            needed: LENGTH_PREFIX,
            available: bytes.len(),
        });
    }

    let metadata_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
    let offset = LENGTH_PREFIX + metadata_len;
    if bytes.len() < offset {
        return Err(CodecError::Truncated {
            needed: offset,
            available: bytes.len(),
        });
    }

    Ok(offset)
}

/// Split package bytes into metadata and payload
pub fn decode(bytes: &[u8]) -> CodecResult<DecodedPackage<'_>> {
    let offset = payload_offset(bytes)?;
    let metadata = serde_json::from_slice(&bytes[LENGTH_PREFIX..offset])
        .map_err(CodecError::InvalidMetadata)?;

    Ok(DecodedPackage {
        metadata_len: (offset - LENGTH_PREFIX) as u16,
        metadata,
        payload: &bytes[offset..],
    })
}

/// Serialize metadata into a complete header (length prefix included)
fn encode_header(metadata: &WorldMetadata) -> CodecResult<Vec<u8>> {
    let json = serde_json::to_vec(metadata).map_err(CodecError::Serialize)?;
    if json.len() > MAX_METADATA_LEN {
        return Err(CodecError::MetadataTooLarge {
            len: json.len(),
            max: MAX_METADATA_LEN,
        });
    }

    let mut header = Vec::with_capacity(LENGTH_PREFIX + json.len());
    header.extend_from_slice(&(json.len() as u16).to_le_bytes());
    header.extend_from_slice(&json);
    Ok(header)
}

/// Build a package from metadata and payload
pub fn encode(metadata: &WorldMetadata, payload: &[u8]) -> CodecResult<Vec<u8>> {
    let mut bytes = encode_header(metadata)?;
    bytes.reserve_exact(payload.len());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Replace the metadata header of an existing package
///
/// Only the length prefix of the old header is read, so a package whose
/// metadata no longer parses can still be repaired. The payload is copied
/// byte for byte and `bytes` itself is left untouched.
pub fn patch_metadata(bytes: &[u8], metadata: &WorldMetadata) -> CodecResult<Vec<u8>> {
    let offset = payload_offset(bytes)?;
    let header = encode_header(metadata)?;
    let payload = &bytes[offset..];

    let mut patched = Vec::with_capacity(header.len() + payload.len());
    patched.extend_from_slice(&header);
    patched.extend_from_slice(payload);

    log::debug!(
        "Patched package metadata: header {} -> {} bytes, payload {} bytes",
        offset,
        header.len(),
        payload.len()
    );
    Ok(patched)
}

/// Deflate a finished package for download or publishing
pub fn compress(bytes: &[u8], level: CompressionLevel) -> CodecResult<Vec<u8>> {
    Ok(compression::deflate(bytes, level)?)
}

/// Inflate a `.bin` download back into package bytes
pub fn decompress(bytes: &[u8]) -> CodecResult<Vec<u8>> {
    Ok(compression::inflate(bytes)?)
}
