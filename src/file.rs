//! GDS file lifecycle - main API for creating, opening and closing files

use crate::block_store::{BlockStore, ROOT_STREAM};
use crate::config::OpenOptions;
use crate::error::{GdsError, RecordError, Result};
use crate::io::{FileStorage, MemoryStorage, Storage};
use crate::metadata::{FileDiagnostics, GdsVersion, StreamInfo};
use crate::node::{Folder, GdsNode, LoadContext, NodeKind};
use crate::registry;
use crate::serial::{StructReader, StructWriter};
use std::path::{Path, PathBuf};

/// Open GDS file: a block store plus the object tree rooted in stream 0.
///
/// Changes reach the storage on [`sync`](Self::sync) and
/// [`close`](Self::close); dropping a writable file without either loses
/// the object tree updates made since the last sync.
#[derive(Debug)]
pub struct GdsFile {
    store: BlockStore,
    root: GdsNode,
    options: OpenOptions,
    path: Option<PathBuf>,
}

impl GdsFile {
    /// Create (or truncate) a file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_options(path, OpenOptions::default())
    }

    pub fn create_with_options(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let result = (|| {
            let storage = FileStorage::create(path)?;
            Self::init(Box::new(storage), options, Some(path.to_path_buf()))
        })();
        result.record_error()
    }

    /// Create a file that lives in memory only
    pub fn create_in_memory() -> Result<Self> {
        Self::init(Box::new(MemoryStorage::new()), OpenOptions::default(), None).record_error()
    }

    fn init(storage: Box<dyn Storage>, options: OpenOptions, path: Option<PathBuf>) -> Result<Self> {
        options.validate()?;
        let store = BlockStore::create(storage)?;
        let root = GdsNode::new("", NodeKind::Folder(Folder::in_store(store.clone(), options.clone())));
        let mut file = Self {
            store,
            root,
            options,
            path,
        };
        file.sync()?;
        tracing::info!(path = ?file.path, "created GDS file");
        Ok(file)
    }

    /// Open an existing file
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref();
        let result = (|| {
            options.validate()?;
            let storage = FileStorage::open(path, options.read_only)?;
            Self::open_storage(Box::new(storage), options, Some(path.to_path_buf()))
        })();
        result.record_error()
    }

    /// Open a file held by any storage backend
    pub fn open_storage(
        storage: Box<dyn Storage>,
        options: OpenOptions,
        path: Option<PathBuf>,
    ) -> Result<Self> {
        BlockStore::open(storage, options.read_only)
            .and_then(|store| Self::from_store(store, options, path))
            .record_error()
    }

    fn from_store(store: BlockStore, options: OpenOptions, path: Option<PathBuf>) -> Result<Self> {
        let bytes = store.read_all(ROOT_STREAM)?;
        if bytes.is_empty() {
            return Err(GdsError::corrupt("the file has no object tree"));
        }
        let block = StructReader::parse(&bytes)?;
        let ctx = LoadContext {
            store: &store,
            options: &options,
            registry: registry::global(),
        };
        let root = GdsNode::load(&ctx, &block)?;
        if !root.is_folder() {
            return Err(GdsError::corrupt(format!(
                "the root node is a {}, not a folder",
                root.class_name()
            )));
        }
        tracing::info!(
            path = ?path,
            read_only = options.read_only,
            streams = store.stream_ids().len(),
            "opened GDS file"
        );
        Ok(Self {
            store,
            root,
            options,
            path,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.store.is_read_only()
    }

    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    /// Path on disk, `None` for in-memory files
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn root(&self) -> &GdsNode {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut GdsNode {
        &mut self.root
    }

    /// Node at `path`; it must exist
    pub fn resolve(&self, path: &str) -> Result<&GdsNode> {
        self.root
            .resolve(path, true)
            .and_then(|node| node.ok_or_else(|| GdsError::NotFound(path.to_string())))
            .record_error()
    }

    pub fn resolve_mut(&mut self, path: &str) -> Result<&mut GdsNode> {
        self.root
            .resolve_mut(path, true)
            .and_then(|node| node.ok_or_else(|| GdsError::NotFound(path.to_string())))
            .record_error()
    }

    /// Flush pending compressed chunks, rewrite the object tree and the
    /// directory, then flush the storage
    pub fn sync(&mut self) -> Result<()> {
        self.sync_inner().record_error()
    }

    fn sync_inner(&mut self) -> Result<()> {
        if self.is_read_only() {
            return Ok(());
        }
        self.root.visit_arrays_mut(&mut |_, array| array.flush())?;
        let mut w = StructWriter::new();
        w.begin_struct();
        self.root.save_fields(&mut w)?;
        w.end_struct()?;
        self.store.replace(ROOT_STREAM, &w.into_bytes()?)?;
        self.store.sync()
    }

    /// Finish every open compressed writer, sync and release the file
    pub fn close(mut self) -> Result<()> {
        let result = (|| {
            if !self.is_read_only() {
                self.root.visit_arrays_mut(&mut |path, array| {
                    if array.is_writer_open() {
                        tracing::warn!(path, "closing compressed writer left open");
                        array.close_writer()?;
                    }
                    Ok(())
                })?;
            }
            self.sync_inner()
        })();
        tracing::info!(path = ?self.path, ok = result.is_ok(), "closed GDS file");
        result.record_error()
    }

    /// Stream sizes and space usage
    pub fn diagnostics(&self) -> Result<FileDiagnostics> {
        let streams = self
            .store
            .stream_ids()
            .into_iter()
            .map(|id| {
                Ok(StreamInfo {
                    id,
                    size: self.store.stream_len(id)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(FileDiagnostics {
            version: GdsVersion::CURRENT,
            file_size: self.store.file_size()?,
            used_bytes: self.store.used_bytes(),
            streams,
        })
    }

    /// Write a compacted copy of the file to `dest` and open it
    pub fn tidy_up(&mut self, dest: impl AsRef<Path>) -> Result<GdsFile> {
        let dest = dest.as_ref();
        let result = (|| {
            let storage = FileStorage::create(dest)?;
            self.tidy_up_into(Box::new(storage), Some(dest.to_path_buf()))
        })();
        result.record_error()
    }

    /// Write a compacted copy into `storage` and open it
    pub fn tidy_up_into(&mut self, storage: Box<dyn Storage>, path: Option<PathBuf>) -> Result<GdsFile> {
        self.sync_inner()?;
        let before = self.store.file_size()?;
        let store = self.store.tidy_up(storage)?;
        tracing::info!(before, after = store.file_size()?, "tidied up GDS file");
        Self::from_store(store, self.options.clone().with_read_only(false), path)
    }

    /// Independent read-only handle on the last synced state of this file
    pub fn fork_reader(&self) -> Result<GdsFile> {
        let result = (|| {
            if !self.options.allow_fork {
                return Err(GdsError::Configuration(
                    "the file was not opened with allow_fork".into(),
                ));
            }
            let path = self.path.as_ref().ok_or_else(|| {
                GdsError::Configuration("in-memory files cannot be forked".into())
            })?;
            GdsFile::open(path, self.options.clone().with_read_only(true))
        })();
        result.record_error()
    }
}
