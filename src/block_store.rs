//! Block store: many logical byte streams inside one physical container
//!
//! Physical layout:
//!
//! ```text
//! 0   prefix "COREARRAYx0A"
//! 12  version major u16, minor u16
//! 16  directory offset u64
//! 24  directory length u64
//! 32  directory CRC32 u32
//! 36  reserved u32
//! 40  stream extents ..., directory
//! ```
//!
//! All integers are little-endian. The directory is bincode-encoded and is
//! rewritten after the last data byte on every sync.

use crate::error::{GdsError, Result};
use crate::io::{Storage, StorageBackend};
use crate::metadata::GdsVersion;
use crate::utils::{calculate_checksum, verify_checksum};
use crate::GDS_PREFIX;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Length of the fixed file header
pub const HEADER_LEN: u64 = 40;

/// Identifier of a logical stream
pub type StreamId = u32;

/// Stream holding the serialized object tree
pub const ROOT_STREAM: StreamId = 0;

/// Contiguous physical range holding part of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub offset: u64,
    pub len: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Directory {
    next_id: StreamId,
    streams: Vec<(StreamId, Vec<Extent>)>,
}

struct StoreInner {
    storage: Box<dyn Storage>,
    streams: BTreeMap<StreamId, Vec<Extent>>,
    next_id: StreamId,
    end_of_data: u64,
    read_only: bool,
}

impl StoreInner {
    fn extents(&self, id: StreamId) -> Result<&Vec<Extent>> {
        self.streams
            .get(&id)
            .ok_or_else(|| GdsError::NotFound(format!("stream {}", id)))
    }

    fn extents_mut(&mut self, id: StreamId) -> Result<&mut Vec<Extent>> {
        self.streams
            .get_mut(&id)
            .ok_or_else(|| GdsError::NotFound(format!("stream {}", id)))
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(GdsError::read_only("the file is opened read-only"));
        }
        Ok(())
    }

    fn stream_len(&self, id: StreamId) -> Result<u64> {
        Ok(self.extents(id)?.iter().map(|e| e.len).sum())
    }

    /// Copy bytes between a logical stream range and `buf`, in place
    fn transfer(&mut self, id: StreamId, offset: u64, buf: &mut [u8], write: bool) -> Result<()> {
        let extents = self.extents(id)?.clone();
        let mut logical = 0u64;
        let mut done = 0usize;
        let want = buf.len();

        for extent in extents {
            if done == want {
                break;
            }
            let pos = offset + done as u64;
            if pos < logical + extent.len {
                let within = pos - logical;
                let n = ((extent.len - within) as usize).min(want - done);
                let physical = extent.offset + within;
                if write {
                    self.storage.write_at(physical, &buf[done..done + n])?;
                } else {
                    self.storage.read_at(physical, &mut buf[done..done + n])?;
                }
                done += n;
            }
            logical += extent.len;
        }

        if done < want {
            return Err(GdsError::corrupt(format!(
                "stream {} has {} bytes, access wants {} at {}",
                id, logical, want, offset
            )));
        }
        Ok(())
    }

    fn append(&mut self, id: StreamId, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let end = self.end_of_data;
        self.storage.write_at(end, data)?;
        let extents = self.extents_mut(id)?;
        match extents.last_mut() {
            Some(last) if last.offset + last.len == end => last.len += data.len() as u64,
            _ => extents.push(Extent {
                offset: end,
                len: data.len() as u64,
            }),
        }
        self.end_of_data += data.len() as u64;
        Ok(())
    }

    fn write_header(&mut self, dir_offset: u64, dir: &[u8]) -> Result<()> {
        let version = GdsVersion::CURRENT;
        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        header.extend_from_slice(GDS_PREFIX);
        header.extend_from_slice(&version.major.to_le_bytes());
        header.extend_from_slice(&version.minor.to_le_bytes());
        header.extend_from_slice(&dir_offset.to_le_bytes());
        header.extend_from_slice(&(dir.len() as u64).to_le_bytes());
        header.extend_from_slice(&calculate_checksum(dir).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        self.storage.write_at(0, &header)
    }

    fn write_directory(&mut self) -> Result<()> {
        let dir = Directory {
            next_id: self.next_id,
            streams: self
                .streams
                .iter()
                .map(|(id, extents)| (*id, extents.clone()))
                .collect(),
        };
        let encoded = bincode::serialize(&dir)?;
        let dir_offset = self.end_of_data;
        self.storage.write_at(dir_offset, &encoded)?;
        self.storage.set_len(dir_offset + encoded.len() as u64)?;
        self.write_header(dir_offset, &encoded)
    }
}

/// Shared handle to a block store
#[derive(Clone)]
pub struct BlockStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl fmt::Debug for BlockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BlockStore")
            .field("streams", &inner.streams.len())
            .field("end_of_data", &inner.end_of_data)
            .field("read_only", &inner.read_only)
            .finish()
    }
}

impl BlockStore {
    /// Initialize an empty store on `storage`, discarding its contents
    pub fn create(mut storage: Box<dyn Storage>) -> Result<Self> {
        storage.set_len(0)?;
        let mut inner = StoreInner {
            storage,
            streams: BTreeMap::new(),
            next_id: ROOT_STREAM + 1,
            end_of_data: HEADER_LEN,
            read_only: false,
        };
        inner.streams.insert(ROOT_STREAM, Vec::new());
        inner.write_directory()?;
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// Load the header and directory of an existing store
    pub fn open(mut storage: Box<dyn Storage>, read_only: bool) -> Result<Self> {
        let file_len = storage.len()?;
        if file_len < HEADER_LEN {
            return Err(GdsError::corrupt(format!(
                "{} bytes is too short for a GDS header",
                file_len
            )));
        }
        let header = storage.read_bytes(0, HEADER_LEN as usize)?;
        if &header[..GDS_PREFIX.len()] != GDS_PREFIX {
            return Err(GdsError::corrupt("invalid file prefix"));
        }

        let u16_at = |i: usize| u16::from_le_bytes([header[i], header[i + 1]]);
        let u64_at = |i: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&header[i..i + 8]);
            u64::from_le_bytes(b)
        };
        let version = GdsVersion::new(u16_at(12), u16_at(14));
        if !version.is_compatible(&GdsVersion::CURRENT) {
            return Err(GdsError::UnsupportedVersion(version.major, version.minor));
        }
        let dir_offset = u64_at(16);
        let dir_len = u64_at(24);
        let checksum = u32::from_le_bytes([header[32], header[33], header[34], header[35]]);

        if dir_offset < HEADER_LEN
            || dir_offset
                .checked_add(dir_len)
                .map_or(true, |end| end > file_len)
        {
            return Err(GdsError::corrupt(format!(
                "directory at {}+{} lies outside a {} byte file",
                dir_offset, dir_len, file_len
            )));
        }
        let encoded = storage.read_bytes(dir_offset, dir_len as usize)?;
        if !verify_checksum(&encoded, checksum) {
            return Err(GdsError::corrupt("directory checksum mismatch"));
        }
        let dir: Directory = bincode::deserialize(&encoded)?;

        let mut streams = BTreeMap::new();
        for (id, extents) in dir.streams {
            if extents
                .iter()
                .any(|e| e.offset < HEADER_LEN || e.offset + e.len > dir_offset)
            {
                return Err(GdsError::corrupt(format!("stream {} has a bad extent", id)));
            }
            streams.insert(id, extents);
        }
        if !streams.contains_key(&ROOT_STREAM) {
            return Err(GdsError::corrupt("missing root stream"));
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(StoreInner {
                storage,
                streams,
                next_id: dir.next_id,
                end_of_data: dir_offset,
                read_only,
            })),
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.lock().read_only
    }

    pub fn backend(&self) -> StorageBackend {
        self.inner.lock().storage.backend()
    }

    /// Allocate a new empty stream
    pub fn new_stream(&self) -> Result<StreamId> {
        let mut inner = self.inner.lock();
        inner.check_writable()?;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.streams.insert(id, Vec::new());
        tracing::debug!(stream = id, "allocated stream");
        Ok(id)
    }

    /// Open a handle on an existing stream
    pub fn stream(&self, id: StreamId) -> Result<BlockStream> {
        self.inner.lock().extents(id)?;
        Ok(BlockStream {
            store: self.clone(),
            id,
        })
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.inner.lock().streams.contains_key(&id)
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.inner.lock().streams.keys().copied().collect()
    }

    pub fn stream_len(&self, id: StreamId) -> Result<u64> {
        self.inner.lock().stream_len(id)
    }

    /// Read `buf.len()` bytes of stream `id` starting at `offset`
    pub fn read(&self, id: StreamId, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.lock().transfer(id, offset, buf, false)
    }

    /// Read a whole stream
    pub fn read_all(&self, id: StreamId) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        let len = inner.stream_len(id)? as usize;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)?;
        buf.resize(len, 0);
        inner.transfer(id, 0, &mut buf, false)?;
        Ok(buf)
    }

    /// Overwrite and/or extend stream `id` at `offset`; gaps are not allowed
    pub fn write(&self, id: StreamId, offset: u64, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_writable()?;
        let len = inner.stream_len(id)?;
        if offset > len {
            return Err(GdsError::out_of_range(format!(
                "write at {} past the end of stream {} ({} bytes)",
                offset, id, len
            )));
        }
        let overlap = ((len - offset) as usize).min(data.len());
        if overlap > 0 {
            let mut head = data[..overlap].to_vec();
            inner.transfer(id, offset, &mut head, true)?;
        }
        inner.append(id, &data[overlap..])
    }

    pub fn append(&self, id: StreamId, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_writable()?;
        inner.append(id, data)
    }

    /// Shrink stream `id` to `new_len` bytes; the dropped space is leaked
    /// until the file is tidied up
    pub fn truncate(&self, id: StreamId, new_len: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_writable()?;
        let extents = inner.extents_mut(id)?;
        let mut kept = 0u64;
        let mut keep = Vec::with_capacity(extents.len());
        for extent in extents.iter() {
            if kept >= new_len {
                break;
            }
            let len = extent.len.min(new_len - kept);
            keep.push(Extent {
                offset: extent.offset,
                len,
            });
            kept += len;
        }
        *extents = keep;
        Ok(())
    }

    /// Replace the whole content of a stream
    pub fn replace(&self, id: StreamId, data: &[u8]) -> Result<()> {
        self.truncate(id, 0)?;
        self.append(id, data)
    }

    pub fn delete_stream(&self, id: StreamId) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_writable()?;
        if id == ROOT_STREAM {
            return Err(GdsError::read_only("the root stream cannot be deleted"));
        }
        inner
            .streams
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| GdsError::NotFound(format!("stream {}", id)))
    }

    /// Write the directory and header, then flush the storage
    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.read_only {
            return Ok(());
        }
        inner.write_directory()?;
        inner.storage.sync()
    }

    /// Size of the physical container in bytes
    pub fn file_size(&self) -> Result<u64> {
        self.inner.lock().storage.len()
    }

    /// Bytes referenced by streams
    pub fn used_bytes(&self) -> u64 {
        let inner = self.inner.lock();
        inner
            .streams
            .values()
            .flat_map(|extents| extents.iter().map(|e| e.len))
            .sum()
    }

    /// Copy every stream, compacted, into a new store on `dest`
    pub fn tidy_up(&self, dest: Box<dyn Storage>) -> Result<BlockStore> {
        let target = BlockStore::create(dest)?;
        {
            let mut src = self.inner.lock();
            let mut dst = target.inner.lock();
            let ids: Vec<StreamId> = src.streams.keys().copied().collect();
            for id in ids {
                let len = src.stream_len(id)? as usize;
                let mut data = vec![0u8; len];
                src.transfer(id, 0, &mut data, false)?;
                dst.streams.insert(id, Vec::new());
                dst.append(id, &data)?;
            }
            dst.next_id = src.next_id;
        }
        target.sync()?;
        Ok(target)
    }
}

/// Handle on one logical stream
#[derive(Clone, Debug)]
pub struct BlockStream {
    store: BlockStore,
    id: StreamId,
}

impl BlockStream {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    pub fn len(&self) -> Result<u64> {
        self.store.stream_len(self.id)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn is_read_only(&self) -> bool {
        self.store.is_read_only()
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.store.read(self.id, offset, buf)
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.store.write(self.id, offset, data)
    }

    pub fn append(&self, data: &[u8]) -> Result<()> {
        self.store.append(self.id, data)
    }

    pub fn truncate(&self, new_len: u64) -> Result<()> {
        self.store.truncate(self.id, new_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileStorage, MemoryStorage};
    use tempfile::TempDir;

    #[test]
    fn test_interleaved_streams() {
        let store = BlockStore::create(Box::new(MemoryStorage::new())).unwrap();
        let a = store.new_stream().unwrap();
        let b = store.new_stream().unwrap();

        store.append(a, b"aaaa").unwrap();
        store.append(b, b"bb").unwrap();
        store.append(a, b"AA").unwrap();

        assert_eq!(store.read_all(a).unwrap(), b"aaaaAA");
        assert_eq!(store.read_all(b).unwrap(), b"bb");

        // overwrite across the extent boundary and extend past the end
        store.write(a, 3, b"xyzw").unwrap();
        assert_eq!(store.read_all(a).unwrap(), b"aaaxyzw");

        let mut buf = [0u8; 3];
        store.read(a, 2, &mut buf).unwrap();
        assert_eq!(&buf, b"axy");
        assert!(store.read(a, 6, &mut buf).is_err());
        assert!(store.write(b, 5, b"x").is_err());
    }

    #[test]
    fn test_truncate_and_delete() {
        let store = BlockStore::create(Box::new(MemoryStorage::new())).unwrap();
        let id = store.new_stream().unwrap();
        store.append(id, b"0123456789").unwrap();
        store.truncate(id, 4).unwrap();
        assert_eq!(store.read_all(id).unwrap(), b"0123");

        store.delete_stream(id).unwrap();
        assert!(!store.contains(id));
        assert!(store.delete_stream(ROOT_STREAM).is_err());
    }

    #[test]
    fn test_reopen_and_tidy_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.gds");

        let store = BlockStore::create(Box::new(FileStorage::create(&path).unwrap())).unwrap();
        let id = store.new_stream().unwrap();
        store.append(id, &[1, 2, 3]).unwrap();
        store.append(ROOT_STREAM, b"tree").unwrap();
        store.append(id, &[4, 5]).unwrap();
        store.truncate(id, 1).unwrap();
        store.sync().unwrap();
        drop(store);

        let store =
            BlockStore::open(Box::new(FileStorage::open(&path, true).unwrap()), true).unwrap();
        assert_eq!(store.read_all(id).unwrap(), vec![1]);
        assert_eq!(store.read_all(ROOT_STREAM).unwrap(), b"tree");
        assert!(store.append(id, &[9]).is_err());

        let tidy = store.tidy_up(Box::new(MemoryStorage::new())).unwrap();
        assert_eq!(tidy.read_all(id).unwrap(), vec![1]);
        assert_eq!(tidy.used_bytes(), 5);
        assert!(tidy.file_size().unwrap() < store.file_size().unwrap());
        assert_eq!(tidy.new_stream().unwrap(), id + 1);
    }

    #[test]
    fn test_rejects_bad_prefix() {
        let mut image = MemoryStorage::new();
        image.write_at(0, &[0u8; 64]).unwrap();
        let result = BlockStore::open(Box::new(image), true);
        assert!(matches!(result, Err(GdsError::CorruptStream(_))));
    }

    #[test]
    fn test_rejects_bad_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.gds");
        let store = BlockStore::create(Box::new(FileStorage::create(&path).unwrap())).unwrap();
        store.sync().unwrap();
        drop(store);

        let mut image = std::fs::read(&path).unwrap();
        let last = image.len() - 1;
        image[last] ^= 0xFF;
        let result = BlockStore::open(Box::new(MemoryStorage::from_vec(image)), true);
        assert!(matches!(result, Err(GdsError::CorruptStream(_))));
    }

    #[test]
    fn test_rejects_future_major_version() {
        let store = BlockStore::create(Box::new(MemoryStorage::new())).unwrap();
        store.sync().unwrap();
        let mut image = {
            let mut inner = store.inner.lock();
            let len = inner.storage.len().unwrap() as usize;
            inner.storage.read_bytes(0, len).unwrap().to_vec()
        };
        image[12] = 9;
        let result = BlockStore::open(Box::new(MemoryStorage::from_vec(image)), true);
        assert!(matches!(result, Err(GdsError::UnsupportedVersion(9, 0))));
    }
}
