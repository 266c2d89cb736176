//! Pluggable compression capability.
//!
//! The engine treats compression as an opaque string-to-string transform.
//! Compressed payloads carry a marker prefix so `is_compressed` can tell
//! them apart from plain JSON without guessing.

use std::io::{Read, Write};

use base64::Engine as _;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{Result, StorageError};

/// Marker prefix identifying a compressed payload.
pub const COMPRESSION_MARKER: &str = "cmp1:";

/// String-to-string compression capability consumed by the storage engine.
pub trait Compressor: Send + Sync {
    /// Compresses a payload. The result must satisfy `is_compressed`.
    fn compress(&self, data: &str) -> Result<String>;

    /// Decompresses a payload previously produced by `compress`.
    fn decompress(&self, data: &str) -> Result<String>;

    /// Returns whether `data` is a compressed payload.
    fn is_compressed(&self, data: &str) -> bool;
}

/// Deflate + base64 compressor.
///
/// Output format: `cmp1:<base64(deflate(payload))>`. Base64 keeps the value
/// representable in string-only media.
pub struct DeflateCompressor {
    level: Compression,
}

impl DeflateCompressor {
    /// Creates a compressor with the default compression level.
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Default for DeflateCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for DeflateCompressor {
    fn compress(&self, data: &str) -> Result<String> {
        let mut encoder = DeflateEncoder::new(Vec::new(), self.level);
        encoder
            .write_all(data.as_bytes())
            .map_err(|e| StorageError::Compression(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| StorageError::Compression(e.to_string()))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(compressed);
        Ok(format!("{}{}", COMPRESSION_MARKER, encoded))
    }

    fn decompress(&self, data: &str) -> Result<String> {
        let encoded = data
            .strip_prefix(COMPRESSION_MARKER)
            .ok_or_else(|| StorageError::Compression("missing compression marker".to_string()))?;
        let compressed = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| StorageError::Compression(e.to_string()))?;

        let mut decoder = DeflateDecoder::new(compressed.as_slice());
        let mut output = String::new();
        decoder
            .read_to_string(&mut output)
            .map_err(|e| StorageError::Compression(e.to_string()))?;
        Ok(output)
    }

    fn is_compressed(&self, data: &str) -> bool {
        data.starts_with(COMPRESSION_MARKER)
    }
}
