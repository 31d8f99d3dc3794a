//! Open options and scan configuration

use crate::error::{GdsError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default size of the read window kept by a streamed allocator
pub const DEFAULT_STREAM_WINDOW: usize = 64 * 1024;

/// Default number of raw bytes compressed into one pipe chunk
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Options used when creating or opening a GDS file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOptions {
    /// Open without write access
    pub read_only: bool,

    /// Allow independent reader handles to be forked from this file
    pub allow_fork: bool,

    /// Bytes cached by the read window of a streamed allocator
    pub stream_window: usize,

    /// Raw bytes per compressed chunk for newly created arrays
    pub chunk_size: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            allow_fork: false,
            stream_window: DEFAULT_STREAM_WINDOW,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only options
    pub fn read_only() -> Self {
        Self::default().with_read_only(true)
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_allow_fork(mut self, allow_fork: bool) -> Self {
        self.allow_fork = allow_fork;
        self
    }

    pub fn with_stream_window(mut self, bytes: usize) -> Self {
        self.stream_window = bytes;
        self
    }

    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Reject option combinations that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.stream_window == 0 {
            return Err(GdsError::Configuration(
                "stream window must be at least one byte".to_string(),
            ));
        }
        if self.chunk_size == 0 || self.chunk_size > u32::MAX as usize {
            return Err(GdsError::Configuration(format!(
                "chunk size {} is outside 1..=u32::MAX",
                self.chunk_size
            )));
        }
        Ok(())
    }

    /// Load options from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let options: OpenOptions = serde_json::from_str(&text)?;
        options.validate()?;
        Ok(options)
    }
}

/// Block sizes used by the block scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// SNPs per block when scanning along the SNP axis
    pub block_snp: usize,

    /// Samples per block when scanning along the sample axis
    pub block_sample: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            block_snp: 256,
            block_sample: 32,
        }
    }
}
