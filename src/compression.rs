//! Compression pipe for GDS array streams

use crate::error::{GdsError, Result};
use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::Compression as FlateCompression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;

/// Size of one chunk frame header: raw length + compressed length
pub const CHUNK_HEADER_LEN: usize = 8;

/// Compression methods supported by the pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionMethod {
    /// No compression
    None = 0,
    /// Deflate/ZIP compression
    Deflate = 1,
    /// Run-length encoding
    RLE = 2,
    /// Zstandard compression
    Zstd = 3,
}

impl CompressionMethod {
    /// Get the method from a byte value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionMethod::None),
            1 => Some(CompressionMethod::Deflate),
            2 => Some(CompressionMethod::RLE),
            3 => Some(CompressionMethod::Zstd),
            _ => None,
        }
    }
}

/// Compression level (0-9, where 0 is no compression and 9 is maximum)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub fn new(level: u8) -> Self {
        Self(level.min(9))
    }

    pub fn none() -> Self {
        Self(0)
    }

    pub fn fast() -> Self {
        Self(1)
    }

    pub fn best() -> Self {
        Self(9)
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(6)
    }
}

/// Trait for compression/decompression operations
pub trait Compressor: Send + Sync {
    /// Compress data
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>>;

    /// Decompress data
    fn decompress(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>>;

    /// Get the compression method
    fn method(&self) -> CompressionMethod;
}

/// No compression
#[derive(Debug, Default)]
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn compress(&self, data: &[u8], _level: CompressionLevel) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8], _expected_size: Option<usize>) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::None
    }
}

/// Deflate compression
#[derive(Debug, Default)]
pub struct DeflateCompressor;

impl Compressor for DeflateCompressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(data, FlateCompression::new(level.value() as u32));
        let mut compressed = Vec::new();
        encoder
            .read_to_end(&mut compressed)
            .map_err(|e| GdsError::Compression(e.to_string()))?;
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
        let mut decoder = DeflateDecoder::new(data);
        let mut decompressed = Vec::with_capacity(expected_size.unwrap_or(0));
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| GdsError::Decompression(e.to_string()))?;
        Ok(decompressed)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Deflate
    }
}

/// Zstandard compression
#[derive(Debug, Default)]
pub struct ZstdCompressor;

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        // zstd levels run 1..=22; stretch the 0-9 scale over the useful range
        let level = match level.value() {
            0 => 1,
            v => (v as i32) * 2,
        };
        zstd::encode_all(data, level).map_err(|e| GdsError::Compression(e.to_string()))
    }

    fn decompress(&self, data: &[u8], _expected_size: Option<usize>) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| GdsError::Decompression(e.to_string()))
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Zstd
    }
}

/// Run-length encoding compressor
#[derive(Debug, Default)]
pub struct RLECompressor;

impl RLECompressor {
    fn compress_internal(data: &[u8]) -> Vec<u8> {
        let mut compressed = Vec::new();
        let mut i = 0;

        while i < data.len() {
            let byte = data[i];
            let mut count = 1usize;
            while i + count < data.len() && data[i + count] == byte && count < 255 {
                count += 1;
            }
            // count (1 byte) + value (1 byte)
            compressed.push(count as u8);
            compressed.push(byte);
            i += count;
        }

        compressed
    }

    fn decompress_internal(data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
        if data.len() % 2 != 0 {
            return Err(GdsError::Decompression(
                "RLE data must have even length".to_string(),
            ));
        }

        let mut decompressed = Vec::with_capacity(expected_size.unwrap_or(0));
        for chunk in data.chunks_exact(2) {
            decompressed.extend(std::iter::repeat(chunk[1]).take(chunk[0] as usize));
        }
        Ok(decompressed)
    }
}

impl Compressor for RLECompressor {
    fn compress(&self, data: &[u8], _level: CompressionLevel) -> Result<Vec<u8>> {
        Ok(Self::compress_internal(data))
    }

    fn decompress(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
        Self::decompress_internal(data, expected_size)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::RLE
    }
}

/// Get a compressor for a given method
pub fn get_compressor(method: CompressionMethod) -> Box<dyn Compressor> {
    match method {
        CompressionMethod::None => Box::new(NoneCompressor),
        CompressionMethod::Deflate => Box::new(DeflateCompressor),
        CompressionMethod::RLE => Box::new(RLECompressor),
        CompressionMethod::Zstd => Box::new(ZstdCompressor),
    }
}

/// Coder selected for an array, parsed from names like `"ZIP.max"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompressionSpec {
    pub method: CompressionMethod,
    pub level: CompressionLevel,
}

impl CompressionSpec {
    pub fn none() -> Self {
        Self {
            method: CompressionMethod::None,
            level: CompressionLevel::none(),
        }
    }

    /// Parse a coder name. The empty string means no compression.
    pub fn parse(name: &str) -> Result<Self> {
        let (method, level) = match name {
            "" => return Ok(Self::none()),
            "ZIP" | "ZIP.def" | "ZIP.default" => {
                (CompressionMethod::Deflate, CompressionLevel::default())
            }
            "ZIP.fast" => (CompressionMethod::Deflate, CompressionLevel::fast()),
            "ZIP.max" => (CompressionMethod::Deflate, CompressionLevel::best()),
            "ZSTD" | "ZSTD.default" => (CompressionMethod::Zstd, CompressionLevel::default()),
            "ZSTD.fast" => (CompressionMethod::Zstd, CompressionLevel::fast()),
            "ZSTD.max" => (CompressionMethod::Zstd, CompressionLevel::best()),
            "RLE" => (CompressionMethod::RLE, CompressionLevel::default()),
            other => {
                return Err(GdsError::Configuration(format!(
                    "unknown compression coder '{}'",
                    other
                )))
            }
        };
        Ok(Self { method, level })
    }

    pub fn is_none(&self) -> bool {
        self.method == CompressionMethod::None
    }

    /// Canonical coder name, empty for no compression
    pub fn name(&self) -> String {
        let base = match self.method {
            CompressionMethod::None => return String::new(),
            CompressionMethod::RLE => return "RLE".to_string(),
            CompressionMethod::Deflate => "ZIP",
            CompressionMethod::Zstd => "ZSTD",
        };
        match self.level.value() {
            1 => format!("{}.fast", base),
            9 => format!("{}.max", base),
            _ => base.to_string(),
        }
    }
}

impl Default for CompressionSpec {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Display for CompressionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A compression transform between an array and its stream.
///
/// Data is cut into independently compressed chunks of `chunk_size` raw
/// bytes, each framed as `raw_len: u32 LE`, `comp_len: u32 LE`, payload.
pub struct Pipe {
    spec: CompressionSpec,
    chunk_size: usize,
    compressor: Box<dyn Compressor>,
    raw_size: u64,
    compressed_size: u64,
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipe")
            .field("spec", &self.spec)
            .field("chunk_size", &self.chunk_size)
            .field("raw_size", &self.raw_size)
            .field("compressed_size", &self.compressed_size)
            .finish()
    }
}

impl Pipe {
    pub fn new(spec: CompressionSpec, chunk_size: usize) -> Self {
        Self {
            spec,
            chunk_size: chunk_size.max(1),
            compressor: get_compressor(spec.method),
            raw_size: 0,
            compressed_size: 0,
        }
    }

    /// Restore a pipe with recorded sizes
    pub fn with_sizes(mut self, raw_size: u64, compressed_size: u64) -> Self {
        self.raw_size = raw_size;
        self.compressed_size = compressed_size;
        self
    }

    pub fn spec(&self) -> CompressionSpec {
        self.spec
    }

    pub fn coder_name(&self) -> String {
        self.spec.name()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total raw bytes passed through the pipe
    pub fn raw_size(&self) -> u64 {
        self.raw_size
    }

    /// Total framed bytes emitted by the pipe
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    /// Compressed-to-raw ratio, NaN when nothing was written
    pub fn ratio(&self) -> f64 {
        self.compressed_size as f64 / self.raw_size as f64
    }

    /// Compress one chunk into a framed block
    pub fn encode_chunk(&mut self, raw: &[u8]) -> Result<Vec<u8>> {
        let payload = self.compressor.compress(raw, self.spec.level)?;
        let raw_len = u32::try_from(raw.len())
            .map_err(|_| GdsError::Compression(format!("chunk of {} bytes", raw.len())))?;
        let comp_len = u32::try_from(payload.len())
            .map_err(|_| GdsError::Compression(format!("chunk of {} bytes", payload.len())))?;

        let mut frame = Vec::with_capacity(CHUNK_HEADER_LEN + payload.len());
        frame.extend_from_slice(&raw_len.to_le_bytes());
        frame.extend_from_slice(&comp_len.to_le_bytes());
        frame.extend_from_slice(&payload);

        self.raw_size += raw.len() as u64;
        self.compressed_size += frame.len() as u64;
        tracing::debug!(
            coder = %self.spec,
            raw = raw.len(),
            framed = frame.len(),
            "pipe chunk flushed"
        );
        Ok(frame)
    }

    /// Decompress the payload of a chunk whose header announced `raw_len`
    pub fn decode_chunk(&self, payload: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        let raw = self.compressor.decompress(payload, Some(raw_len))?;
        if raw.len() != raw_len {
            return Err(GdsError::corrupt(format!(
                "chunk decompressed to {} bytes, header says {}",
                raw.len(),
                raw_len
            )));
        }
        Ok(raw)
    }
}

/// Parse a chunk frame header into `(raw_len, comp_len)`
pub fn parse_chunk_header(header: &[u8]) -> Result<(usize, usize)> {
    if header.len() < CHUNK_HEADER_LEN {
        return Err(GdsError::corrupt("truncated chunk header"));
    }
    let raw_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let comp_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    Ok((raw_len, comp_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_compression() {
        let compressor = NoneCompressor;
        let data = b"Hello, world!";
        let compressed = compressor
            .compress(data, CompressionLevel::default())
            .unwrap();
        assert_eq!(compressed, data);
        let decompressed = compressor.decompress(&compressed, None).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_deflate() {
        let compressor = DeflateCompressor;
        let data = b"AACCGGTT".repeat(100);
        let compressed = compressor
            .compress(&data, CompressionLevel::default())
            .unwrap();
        assert!(compressed.len() < data.len());
        let decompressed = compressor
            .decompress(&compressed, Some(data.len()))
            .unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_zstd() {
        let compressor = ZstdCompressor;
        let data = b"AACCGGTT".repeat(100);
        let compressed = compressor.compress(&data, CompressionLevel::best()).unwrap();
        assert!(compressed.len() < data.len());
        let decompressed = compressor.decompress(&compressed, None).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_rle_mixed() {
        let compressor = RLECompressor;
        let mut data = vec![1u8; 300];
        data.extend(vec![2u8; 50]);
        let compressed = compressor
            .compress(&data, CompressionLevel::default())
            .unwrap();
        assert_eq!(compressed, vec![255, 1, 45, 1, 50, 2]);
        let decompressed = compressor.decompress(&compressed, None).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_parse_coder_names() {
        let spec = CompressionSpec::parse("ZIP.max").unwrap();
        assert_eq!(spec.method, CompressionMethod::Deflate);
        assert_eq!(spec.level, CompressionLevel::best());
        assert_eq!(spec.name(), "ZIP.max");
        assert!(CompressionSpec::parse("").unwrap().is_none());
        assert_eq!(CompressionSpec::parse("ZIP.def").unwrap().name(), "ZIP");
        assert_eq!(CompressionSpec::parse("ZSTD.fast").unwrap().name(), "ZSTD.fast");
        assert!(CompressionSpec::parse("LZ4").is_err());
    }

    #[test]
    fn test_pipe_chunk_frame() {
        let mut pipe = Pipe::new(CompressionSpec::parse("ZIP").unwrap(), 1024);
        let raw = vec![7u8; 1000];
        let frame = pipe.encode_chunk(&raw).unwrap();
        let (raw_len, comp_len) = parse_chunk_header(&frame).unwrap();
        assert_eq!(raw_len, 1000);
        assert_eq!(comp_len, frame.len() - CHUNK_HEADER_LEN);
        let back = pipe.decode_chunk(&frame[CHUNK_HEADER_LEN..], raw_len).unwrap();
        assert_eq!(back, raw);
        assert_eq!(pipe.raw_size(), 1000);
        assert!(pipe.ratio() < 0.1);
    }

    #[test]
    fn test_pipe_rejects_wrong_length() {
        let mut pipe = Pipe::new(CompressionSpec::parse("RLE").unwrap(), 16);
        let frame = pipe.encode_chunk(&[1, 1, 1]).unwrap();
        assert!(pipe.decode_chunk(&frame[CHUNK_HEADER_LEN..], 4).is_err());
    }
}
