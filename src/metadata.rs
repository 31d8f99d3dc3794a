//! GDS metadata structures

use crate::error::Result;
use crate::utils::format_bytes;
use serde::{Deserialize, Serialize};

/// GDS file format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GdsVersion {
    pub major: u16,
    pub minor: u16,
}

impl GdsVersion {
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    pub fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub fn is_compatible(&self, other: &Self) -> bool {
        self.major == other.major
    }
}

impl Default for GdsVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Summary of one node in the object tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    /// Node name, empty for the root
    pub name: String,

    /// Class name (`dFolder`, `dBit2`, ...)
    pub class_name: String,

    /// Dimension lengths, outermost first
    pub dims: Vec<u64>,

    /// Logically committed elements
    pub total_count: u64,

    /// Elements physically written
    pub current_count: u64,

    /// Bits per element, 0 for non-array nodes
    pub bit_width: u64,

    /// Coder name, empty when uncompressed
    pub coder: String,

    /// Uncompressed data size in bytes
    pub raw_size: u64,

    /// Stored data size in bytes
    pub stored_size: u64,

    /// Whether a compressed writer is still open
    pub writer_open: bool,
}

impl NodeDescription {
    /// Stored-to-raw ratio; NaN for empty arrays
    pub fn compression_ratio(&self) -> f64 {
        self.stored_size as f64 / self.raw_size as f64
    }

    pub fn summary(&self) -> String {
        let dims = self
            .dims
            .iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(" x ");
        if self.coder.is_empty() {
            format!("{} {} [{}], {}", self.name, self.class_name, dims, format_bytes(self.raw_size))
        } else {
            format!(
                "{} {} [{}], {} ({}: {:.1}%)",
                self.name,
                self.class_name,
                dims,
                format_bytes(self.stored_size),
                self.coder,
                self.compression_ratio() * 100.0
            )
        }
    }
}

/// Size of one logical stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub id: u32,
    pub size: u64,
}

/// Physical layout report of an open file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDiagnostics {
    pub version: GdsVersion,

    /// Physical size of the container in bytes
    pub file_size: u64,

    /// Bytes referenced by live streams
    pub used_bytes: u64,

    pub streams: Vec<StreamInfo>,
}

impl FileDiagnostics {
    /// Bytes no stream refers to; reclaimed by tidying up the file
    pub fn wasted_bytes(&self, header_and_directory: u64) -> u64 {
        self.file_size
            .saturating_sub(self.used_bytes + header_and_directory)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        let v1_0 = GdsVersion::new(1, 0);
        let v1_1 = GdsVersion::new(1, 1);
        let v2_0 = GdsVersion::new(2, 0);

        assert!(v1_0.is_compatible(&v1_1));
        assert!(!v1_0.is_compatible(&v2_0));
    }

    #[test]
    fn test_node_description() {
        let desc = NodeDescription {
            name: "genotype".into(),
            class_name: "dBit2".into(),
            dims: vec![4, 1000],
            total_count: 4000,
            current_count: 4000,
            bit_width: 2,
            coder: "ZIP".into(),
            raw_size: 1000,
            stored_size: 250,
            writer_open: false,
        };
        assert_eq!(desc.compression_ratio(), 0.25);
        assert!(desc.summary().contains("4 x 1000"));
        assert!(desc.summary().contains("25.0%"));
    }

    #[test]
    fn test_diagnostics_json() {
        let diag = FileDiagnostics {
            version: GdsVersion::CURRENT,
            file_size: 200,
            used_bytes: 100,
            streams: vec![StreamInfo { id: 0, size: 60 }, StreamInfo { id: 1, size: 40 }],
        };
        assert_eq!(diag.wasted_bytes(64), 36);
        let json = diag.to_json().unwrap();
        let back: FileDiagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, diag);
    }
}
