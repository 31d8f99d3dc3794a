//! gdsarray - GDS hierarchical array container
//!
//! A pure Rust implementation of the GDS (CoreArray) file format: a single
//! file holding a tree of folders, labels and typed N-dimensional arrays,
//! each array living in its own block stream.
//!
//! # Features
//!
//! - Integers of 1 to 31 bits, 8/16/32/64-bit integers, floats and strings
//! - Bit-packed storage, row-wise growth along the first dimension
//! - Selection-mask reads and writes
//! - Chunked Deflate/Zstd compression of append-only arrays
//! - Genotype workspace with SNP/sample selection and orientation-aware reads
//! - Barrier-synchronized and work-pulling multi-threaded block scanning
//! - Buffered per-SNP or per-sample access and a packed 2-bit genotype cache
//!
//! # Example
//!
//! ```rust,no_run
//! use gdsarray::{ElementKind, GdsFile, OpenOptions};
//!
//! # fn example() -> gdsarray::Result<()> {
//! let mut file = GdsFile::create("genotypes.gds")?;
//! let root = file.root_mut().folder_mut()?;
//! let geno = root.add_array("genotype", ElementKind::bits(2, false)?, &[0, 1000], "ZIP")?;
//! geno.array_mut()?.append(&vec![0u8; 1000])?;
//! file.close()?;
//!
//! let file = GdsFile::open("genotypes.gds", OpenOptions::read_only())?;
//! let row: Vec<u8> = file.resolve("genotype")?.array()?.read(&[0, 0], &[1, 1000], None)?;
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod array;
pub mod block_store;
pub mod codec;
pub mod compression;
pub mod config;
pub mod cursor;
pub mod error;
pub mod file;
pub mod genomem;
pub mod io;
pub mod layout;
pub mod metadata;
pub mod node;
pub mod progress;
pub mod registry;
pub mod scanner;
pub mod selection;
pub mod serial;
pub mod threads;
pub mod types;
pub mod utils;
pub mod workspace;

// Re-exports
pub use allocator::{Allocator, LoadMode};
pub use array::{GdsArray, ReadPlan, Selection};
pub use block_store::{BlockStore, BlockStream, StreamId};
pub use codec::Element;
pub use compression::{CompressionMethod, CompressionSpec, Compressor};
pub use config::{OpenOptions, ScanConfig};
pub use cursor::{Cursor, CursorMut};
pub use error::{GdsError, RecordError, Result};
pub use file::GdsFile;
pub use genomem::{AccessPattern, BufferedAxis, PackedGenotypes};
pub use io::{FileStorage, MemoryStorage, Storage};
pub use layout::DimLayout;
pub use metadata::{FileDiagnostics, GdsVersion, NodeDescription};
pub use node::{Attributes, Folder, GdsNode, NodeKind};
pub use progress::{Progress, ProgressReport};
pub use registry::ClassRegistry;
pub use scanner::{BlockScanner, ScanBlock, ScanSummary, WorkQueue};
pub use types::{AttrValue, ElementKind, StrEncoding};
pub use workspace::{GenotypeWorkspace, Orientation, ScanAxis};

/// Version of the gdsarray implementation
pub const GDSARRAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// File prefix of every GDS file
pub const GDS_PREFIX: &[u8; 12] = b"COREARRAYx0A";
