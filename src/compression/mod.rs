//! Raw deflate primitives shared by the package codec and the archive writer
//!
//! Everything here produces and consumes raw DEFLATE streams (no zlib or gzip
//! framing), which is what both `.bin` downloads and zip entries carry.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression as FlateCompression;
use serde::{Deserialize, Serialize};

/// Result type for compression operations
pub type CompressionResult<T> = Result<T, CompressionError>;

/// A deflate or inflate pass failed
#[derive(Debug, thiserror::Error)]
#[error("{operation} failed: {source}")]
pub struct CompressionError {
    pub operation: &'static str,
    #[source]
    pub source: std::io::Error,
}

impl CompressionError {
    fn new(operation: &'static str, source: std::io::Error) -> Self {
        Self { operation, source }
    }
}

/// Compression level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Fast,
    #[default]
    Default,
    Best,
}

impl CompressionLevel {
    fn to_flate2(self) -> FlateCompression {
        match self {
            CompressionLevel::Fast => FlateCompression::fast(),
            CompressionLevel::Default => FlateCompression::default(),
            CompressionLevel::Best => FlateCompression::best(),
        }
    }
}

/// Deflate a whole buffer in one pass
pub fn deflate(data: &[u8], level: CompressionLevel) -> CompressionResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), level.to_flate2());
    encoder
        .write_all(data)
        .map_err(|e| CompressionError::new("deflate", e))?;
    encoder
        .finish()
        .map_err(|e| CompressionError::new("deflate finalization", e))
}

/// Inflate a whole raw deflate buffer in one pass
pub fn inflate(data: &[u8]) -> CompressionResult<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data);
    let mut inflated = Vec::with_capacity(data.len() * 2);
    decoder
        .read_to_end(&mut inflated)
        .map_err(|e| CompressionError::new("inflate", e))?;
    Ok(inflated)
}

/// Incremental deflate encoder
///
/// Input is pushed in arbitrary pieces; each push hands back whatever
/// compressed output the encoder has produced so far, so callers can forward
/// it without holding the full compressed stream.
pub struct DeflateStream {
    encoder: DeflateEncoder<Vec<u8>>,
}

impl DeflateStream {
    pub fn new(level: CompressionLevel) -> Self {
        Self {
            encoder: DeflateEncoder::new(Vec::new(), level.to_flate2()),
        }
    }

    /// Feed more input, returning any compressed bytes ready to emit
    pub fn push(&mut self, data: &[u8]) -> CompressionResult<Vec<u8>> {
        self.encoder
            .write_all(data)
            .map_err(|e| CompressionError::new("deflate", e))?;
        Ok(std::mem::take(self.encoder.get_mut()))
    }

    /// Flush the final block and return the remaining compressed bytes
    pub fn finish(self) -> CompressionResult<Vec<u8>> {
        self.encoder
            .finish()
            .map_err(|e| CompressionError::new("deflate finalization", e))
    }
}
