//! Byte-region allocators backing array data
//!
//! An [`Allocator`] is either a heap buffer or a window onto a block-store
//! stream. A streamed allocator may sit behind a compression [`Pipe`], in
//! which case it is forward-only while writing and read-only once the
//! writer is closed.

use crate::block_store::BlockStream;
use crate::compression::{parse_chunk_header, Pipe, CHUNK_HEADER_LEN};
use crate::error::{GdsError, Result};
use parking_lot::Mutex;

/// Capacity above which growth switches from fixed steps to a quarter of the
/// current capacity
const SMALL_CAPACITY: usize = 64;

/// Growth step for small buffers
const SMALL_STEP: usize = 16;

/// Upper bound of a single proportional growth step
const MEDIUM_BLOCK: usize = 16 * 1024 * 1024;

/// Bytes moved per pass by `move_bytes`/`fill` on streams
const COPY_BLOCK: usize = 64 * 1024;

/// Where array data is kept when a file is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Whole array decoded into a heap buffer
    InMemory,
    /// Read on demand from the block store
    Streamed,
}

/// Heap-backed byte region
#[derive(Debug, Default)]
pub struct MemoryBlock {
    data: Vec<u8>,
    capacity: usize,
    reallocations: usize,
    read_only: bool,
}

impl MemoryBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap loaded bytes; `read_only` blocks later writes
    pub fn from_vec(data: Vec<u8>, read_only: bool) -> Self {
        Self {
            capacity: data.len(),
            data,
            reallocations: 0,
            read_only,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Grow the logical size, reserving with the amortized policy
    fn need_len(&mut self, new_len: usize) -> Result<()> {
        if new_len > self.capacity {
            let delta_needed = new_len - self.capacity;
            let step = if self.capacity > SMALL_CAPACITY {
                (self.capacity >> 2).min(MEDIUM_BLOCK)
            } else {
                SMALL_STEP
            };
            self.reserve_to(self.capacity + step.max(delta_needed))?;
        }
        if new_len > self.data.len() {
            self.data.resize(new_len, 0);
        }
        Ok(())
    }

    fn reserve_to(&mut self, capacity: usize) -> Result<()> {
        if capacity > self.data.capacity() {
            self.data.try_reserve_exact(capacity - self.data.len())?;
        }
        self.capacity = capacity;
        self.reallocations += 1;
        Ok(())
    }
}

/// Byte range of one compressed chunk
#[derive(Debug, Clone, Copy)]
struct ChunkEntry {
    raw_start: u64,
    raw_len: usize,
    stream_offset: u64,
    comp_len: usize,
}

#[derive(Debug)]
struct Window {
    offset: u64,
    data: Vec<u8>,
}

/// Access mode of a streamed allocator
#[derive(Debug)]
enum StreamMode {
    /// Uncompressed bytes, read through a cached window
    Raw {
        window: Mutex<Option<Window>>,
        window_size: usize,
    },
    /// Compressed, forward-only writer
    PipeWrite { pipe: Pipe, pending: Vec<u8> },
    /// Compressed, read-only
    PipeRead {
        pipe: Pipe,
        chunks: Vec<ChunkEntry>,
        tail: Vec<u8>,
        cache: Mutex<Option<(usize, Vec<u8>)>>,
    },
}

/// Byte region stored in a block-store stream
#[derive(Debug)]
pub struct StreamedBlock {
    stream: BlockStream,
    mode: StreamMode,
    size: u64,
}

impl StreamedBlock {
    fn pipe_read_size(chunks: &[ChunkEntry], tail: &[u8]) -> u64 {
        chunks
            .last()
            .map_or(0, |c| c.raw_start + c.raw_len as u64)
            + tail.len() as u64
    }

    fn index_chunks(stream: &BlockStream) -> Result<Vec<ChunkEntry>> {
        let stream_len = stream.len()?;
        let mut chunks = Vec::new();
        let mut offset = 0u64;
        let mut raw_start = 0u64;
        let mut header = [0u8; CHUNK_HEADER_LEN];
        while offset < stream_len {
            if offset + CHUNK_HEADER_LEN as u64 > stream_len {
                return Err(GdsError::corrupt("truncated chunk header in compressed stream"));
            }
            stream.read(offset, &mut header)?;
            let (raw_len, comp_len) = parse_chunk_header(&header)?;
            let payload = offset + CHUNK_HEADER_LEN as u64;
            if payload + comp_len as u64 > stream_len {
                return Err(GdsError::corrupt(format!(
                    "chunk at {} claims {} bytes, stream has {}",
                    offset, comp_len, stream_len
                )));
            }
            chunks.push(ChunkEntry {
                raw_start,
                raw_len,
                stream_offset: payload,
                comp_len,
            });
            raw_start += raw_len as u64;
            offset = payload + comp_len as u64;
        }
        Ok(chunks)
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        match &self.mode {
            StreamMode::Raw {
                window,
                window_size,
            } => {
                if buf.len() >= *window_size {
                    return self.stream.read(offset, buf);
                }
                let end = offset + buf.len() as u64;
                let mut guard = window.lock();
                let hit = matches!(&*guard, Some(w) if w.offset <= offset
                    && end <= w.offset + w.data.len() as u64);
                if !hit {
                    let len = (*window_size as u64).min(self.size - offset) as usize;
                    let mut data = vec![0u8; len];
                    self.stream.read(offset, &mut data)?;
                    *guard = Some(Window { offset, data });
                }
                if let Some(w) = guard.as_ref() {
                    let start = (offset - w.offset) as usize;
                    buf.copy_from_slice(&w.data[start..start + buf.len()]);
                }
                Ok(())
            }
            StreamMode::PipeWrite { .. } => Err(GdsError::read_only(
                "the compressed array is still being written; call close_writer \
                 to switch it to read mode first",
            )),
            StreamMode::PipeRead {
                pipe,
                chunks,
                tail,
                cache,
            } => {
                let mut pos = offset;
                let mut done = 0usize;
                let chunk_end = Self::pipe_read_size(chunks, &[]);
                while done < buf.len() {
                    if pos >= chunk_end {
                        let start = (pos - chunk_end) as usize;
                        let n = buf.len() - done;
                        buf[done..].copy_from_slice(&tail[start..start + n]);
                        break;
                    }
                    let idx = chunks.partition_point(|c| c.raw_start + c.raw_len as u64 <= pos);
                    let chunk = chunks[idx];
                    let mut guard = cache.lock();
                    if !matches!(&*guard, Some((cached, _)) if *cached == idx) {
                        let mut payload = vec![0u8; chunk.comp_len];
                        self.stream.read(chunk.stream_offset, &mut payload)?;
                        *guard = Some((idx, pipe.decode_chunk(&payload, chunk.raw_len)?));
                    }
                    if let Some((_, raw)) = guard.as_ref() {
                        let start = (pos - chunk.raw_start) as usize;
                        let n = (chunk.raw_len - start).min(buf.len() - done);
                        buf[done..done + n].copy_from_slice(&raw[start..start + n]);
                        done += n;
                        pos += n as u64;
                    }
                }
                Ok(())
            }
        }
    }

    fn invalidate_window(&self) {
        if let StreamMode::Raw { window, .. } = &self.mode {
            *window.lock() = None;
        }
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        match &mut self.mode {
            StreamMode::Raw { .. } => {
                self.stream.write(offset, data)?;
                self.invalidate_window();
            }
            StreamMode::PipeWrite { pipe, pending } => {
                if offset != self.size {
                    return Err(GdsError::read_only(format!(
                        "compressed streams are forward-only: write at {} but the end is {}",
                        offset, self.size
                    )));
                }
                pending.extend_from_slice(data);
                while pending.len() >= pipe.chunk_size() {
                    let rest = pending.split_off(pipe.chunk_size());
                    let frame = pipe.encode_chunk(pending)?;
                    self.stream.append(&frame)?;
                    *pending = rest;
                }
            }
            StreamMode::PipeRead { .. } => {
                return Err(GdsError::read_only(
                    "compressed data in read mode cannot be modified",
                ))
            }
        }
        self.size = self.size.max(offset + data.len() as u64);
        Ok(())
    }

    fn set_size(&mut self, new_size: u64) -> Result<()> {
        match &self.mode {
            StreamMode::Raw { .. } => {
                if new_size < self.size {
                    self.stream.truncate(new_size)?;
                } else {
                    let mut remaining = new_size - self.size;
                    let zeros = vec![0u8; COPY_BLOCK.min(remaining as usize)];
                    while remaining > 0 {
                        let n = (remaining as usize).min(zeros.len());
                        self.stream.append(&zeros[..n])?;
                        remaining -= n as u64;
                    }
                }
                self.invalidate_window();
                self.size = new_size;
                Ok(())
            }
            _ if new_size == self.size => Ok(()),
            _ => Err(GdsError::read_only(
                "compressed arrays cannot be resized in place",
            )),
        }
    }

    fn flush(&mut self) -> Result<()> {
        if let StreamMode::PipeWrite { pipe, pending } = &mut self.mode {
            if !pending.is_empty() {
                let frame = pipe.encode_chunk(pending)?;
                self.stream.append(&frame)?;
                pending.clear();
            }
        }
        Ok(())
    }
}

/// Byte-addressable region backing one array
#[derive(Debug)]
pub enum Allocator {
    InMemory(MemoryBlock),
    Streamed(StreamedBlock),
}

impl Default for Allocator {
    fn default() -> Self {
        Allocator::InMemory(MemoryBlock::new())
    }
}

impl Allocator {
    /// Empty heap region
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Uncompressed region over `stream`
    pub fn streamed(stream: BlockStream, window_size: usize) -> Result<Self> {
        let size = stream.len()?;
        Ok(Allocator::Streamed(StreamedBlock {
            stream,
            mode: StreamMode::Raw {
                window: Mutex::new(None),
                window_size: window_size.max(1),
            },
            size,
        }))
    }

    /// Forward-only compressed writer appending chunks to `stream`
    pub fn pipe_writer(stream: BlockStream, pipe: Pipe) -> Self {
        let size = pipe.raw_size();
        Allocator::Streamed(StreamedBlock {
            stream,
            mode: StreamMode::PipeWrite {
                pipe,
                pending: Vec::new(),
            },
            size,
        })
    }

    /// Read-only view of the chunks in `stream`, followed by `tail` bytes
    /// not yet written to the stream
    pub fn pipe_reader(stream: BlockStream, pipe: Pipe, tail: Vec<u8>) -> Result<Self> {
        let chunks = StreamedBlock::index_chunks(&stream)?;
        let size = StreamedBlock::pipe_read_size(&chunks, &tail);
        Ok(Allocator::Streamed(StreamedBlock {
            stream,
            mode: StreamMode::PipeRead {
                pipe,
                chunks,
                tail,
                cache: Mutex::new(None),
            },
            size,
        }))
    }

    /// Logical size in bytes
    pub fn size(&self) -> u64 {
        match self {
            Allocator::InMemory(block) => block.data.len() as u64,
            Allocator::Streamed(block) => block.size,
        }
    }

    pub fn load_mode(&self) -> LoadMode {
        match self {
            Allocator::InMemory(_) => LoadMode::InMemory,
            Allocator::Streamed(_) => LoadMode::Streamed,
        }
    }

    /// Whether only appends at the end are accepted
    pub fn is_forward_only(&self) -> bool {
        matches!(
            self,
            Allocator::Streamed(StreamedBlock {
                mode: StreamMode::PipeWrite { .. },
                ..
            })
        )
    }

    pub fn is_writable(&self) -> bool {
        match self {
            Allocator::InMemory(block) => !block.read_only,
            Allocator::Streamed(block) => {
                !block.stream.is_read_only()
                    && !matches!(block.mode, StreamMode::PipeRead { .. })
            }
        }
    }

    /// Compression pipe, if any
    pub fn pipe(&self) -> Option<&Pipe> {
        match self {
            Allocator::Streamed(StreamedBlock {
                mode: StreamMode::PipeWrite { pipe, .. } | StreamMode::PipeRead { pipe, .. },
                ..
            }) => Some(pipe),
            _ => None,
        }
    }

    pub fn stream(&self) -> Option<&BlockStream> {
        match self {
            Allocator::Streamed(block) => Some(&block.stream),
            Allocator::InMemory(_) => None,
        }
    }

    /// Number of times the heap buffer was grown
    pub fn reallocations(&self) -> usize {
        match self {
            Allocator::InMemory(block) => block.reallocations,
            Allocator::Streamed(_) => 0,
        }
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        if offset + len as u64 > self.size() {
            return Err(GdsError::out_of_range(format!(
                "byte range {}+{} exceeds the allocated {} bytes",
                offset,
                len,
                self.size()
            )));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        match self {
            Allocator::InMemory(block) if block.read_only => {
                Err(GdsError::read_only("the array was loaded from a read-only file"))
            }
            _ => Ok(()),
        }
    }

    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.check_range(offset, buf.len())?;
        match self {
            Allocator::InMemory(block) => {
                let start = offset as usize;
                buf.copy_from_slice(&block.data[start..start + buf.len()]);
                Ok(())
            }
            Allocator::Streamed(block) => block.read(offset, buf),
        }
    }

    /// Write `data` at `offset`; the region grows when writing past the end
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        if offset > self.size() {
            return Err(GdsError::out_of_range(format!(
                "write at {} leaves a gap after the {} allocated bytes",
                offset,
                self.size()
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        match self {
            Allocator::InMemory(block) => {
                let start = offset as usize;
                let end = start + data.len();
                block.need_len(end)?;
                block.data[start..end].copy_from_slice(data);
                Ok(())
            }
            Allocator::Streamed(block) => block.write(offset, data),
        }
    }

    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        let end = self.size();
        self.write(end, data)
    }

    /// Copy `len` bytes from `src` to `dst`; the ranges may overlap
    pub fn move_bytes(&mut self, src: u64, dst: u64, len: u64) -> Result<()> {
        self.check_writable()?;
        if len == 0 || src == dst {
            return Ok(());
        }
        self.check_range(src, len as usize)?;
        self.check_range(dst, len as usize)?;
        match self {
            Allocator::InMemory(block) => {
                let (src, dst, len) = (src as usize, dst as usize, len as usize);
                block.data.copy_within(src..src + len, dst);
                Ok(())
            }
            Allocator::Streamed(block) => {
                let mut buf = vec![0u8; COPY_BLOCK.min(len as usize)];
                let step = buf.len() as u64;
                let mut moved = 0u64;
                while moved < len {
                    let n = step.min(len - moved);
                    // walk backwards when moving towards higher offsets
                    let at = if dst > src { len - moved - n } else { moved };
                    block.read(src + at, &mut buf[..n as usize])?;
                    block.write(dst + at, &buf[..n as usize])?;
                    moved += n;
                }
                Ok(())
            }
        }
    }

    /// Set `len` bytes at `offset` to `value`
    pub fn fill(&mut self, offset: u64, len: u64, value: u8) -> Result<()> {
        self.check_writable()?;
        self.check_range(offset, len as usize)?;
        match self {
            Allocator::InMemory(block) => {
                let start = offset as usize;
                block.data[start..start + len as usize].fill(value);
                Ok(())
            }
            Allocator::Streamed(block) => {
                let buf = vec![value; COPY_BLOCK.min(len as usize)];
                let mut done = 0u64;
                while done < len {
                    let n = (buf.len() as u64).min(len - done);
                    block.write(offset + done, &buf[..n as usize])?;
                    done += n;
                }
                Ok(())
            }
        }
    }

    /// Truncate or zero-extend to `new_size` bytes
    pub fn set_size(&mut self, new_size: u64) -> Result<()> {
        self.check_writable()?;
        match self {
            Allocator::InMemory(block) => {
                let new_len = new_size as usize;
                if new_len > block.data.len() {
                    block.need_len(new_len)
                } else {
                    block.data.truncate(new_len);
                    Ok(())
                }
            }
            Allocator::Streamed(block) => block.set_size(new_size),
        }
    }

    /// Reserve (or release) heap capacity; streams ignore this
    pub fn set_capacity(&mut self, capacity: u64) -> Result<()> {
        if let Allocator::InMemory(block) = self {
            let capacity = (capacity as usize).max(block.data.len());
            if capacity > block.capacity {
                block.reserve_to(capacity)?;
            } else {
                block.data.shrink_to(capacity);
                block.capacity = capacity;
            }
        }
        Ok(())
    }

    /// Emit pending compressed bytes as a chunk without finalizing
    pub fn flush(&mut self) -> Result<()> {
        match self {
            Allocator::Streamed(block) => block.flush(),
            Allocator::InMemory(_) => Ok(()),
        }
    }

    /// Finish a compressed writer and switch to the read-only variant
    pub fn close_writer(&mut self) -> Result<()> {
        if !self.is_forward_only() {
            return Ok(());
        }
        self.flush()?;
        if let Allocator::Streamed(block) = std::mem::take(self) {
            if let StreamMode::PipeWrite { pipe, .. } = block.mode {
                tracing::debug!(
                    stream = block.stream.id(),
                    raw = pipe.raw_size(),
                    compressed = pipe.compressed_size(),
                    "closed compressed writer"
                );
                *self = Allocator::pipe_reader(block.stream, pipe, Vec::new())?;
            }
        }
        Ok(())
    }

    /// Copy the whole region into a heap block
    pub fn to_memory(&self, read_only: bool) -> Result<MemoryBlock> {
        let size = self.size() as usize;
        let mut data = Vec::new();
        data.try_reserve_exact(size)?;
        data.resize(size, 0);
        self.read(0, &mut data)?;
        Ok(MemoryBlock::from_vec(data, read_only))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_store::BlockStore;
    use crate::compression::CompressionSpec;
    use crate::io::MemoryStorage;

    fn new_stream() -> BlockStream {
        let store = BlockStore::create(Box::new(MemoryStorage::new())).unwrap();
        let id = store.new_stream().unwrap();
        store.stream(id).unwrap()
    }

    #[test]
    fn test_memory_read_write() {
        let mut alloc = Allocator::in_memory();
        alloc.append(b"hello").unwrap();
        alloc.write(5, b" world").unwrap();
        assert_eq!(alloc.size(), 11);

        let mut buf = [0u8; 5];
        alloc.read(6, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
        assert!(alloc.read(8, &mut buf).is_err());
        assert!(alloc.write(20, b"x").is_err());
    }

    #[test]
    fn test_move_and_fill() {
        for mut alloc in [
            Allocator::in_memory(),
            Allocator::streamed(new_stream(), 4).unwrap(),
        ] {
            alloc.append(b"abcdefgh").unwrap();
            alloc.move_bytes(0, 2, 5).unwrap();
            let mut buf = [0u8; 8];
            alloc.read(0, &mut buf).unwrap();
            assert_eq!(&buf, b"ababcdeh");

            alloc.move_bytes(2, 0, 6).unwrap();
            alloc.read(0, &mut buf).unwrap();
            assert_eq!(&buf, b"abcdeheh");

            alloc.fill(1, 3, b'z').unwrap();
            alloc.read(0, &mut buf).unwrap();
            assert_eq!(&buf, b"azzzeheh");

            alloc.set_size(3).unwrap();
            alloc.set_size(5).unwrap();
            let mut buf = [0xFFu8; 5];
            alloc.read(0, &mut buf).unwrap();
            assert_eq!(&buf, b"azz\0\0");
        }
    }

    #[test]
    fn test_amortized_growth() {
        let mut alloc = Allocator::in_memory();
        for i in 0..10_000u32 {
            alloc.append(&[i as u8]).unwrap();
        }
        assert_eq!(alloc.size(), 10_000);
        assert!(alloc.reallocations() < 40, "{}", alloc.reallocations());
    }

    #[test]
    fn test_raw_stream_window() {
        let mut alloc = Allocator::streamed(new_stream(), 16).unwrap();
        let data: Vec<u8> = (0..100).collect();
        alloc.append(&data).unwrap();

        let mut buf = [0u8; 4];
        alloc.read(10, &mut buf).unwrap();
        assert_eq!(buf, [10, 11, 12, 13]);
        alloc.write(12, &[0xAA]).unwrap();
        alloc.read(10, &mut buf).unwrap();
        assert_eq!(buf, [10, 11, 0xAA, 13]);

        let mut big = vec![0u8; 40];
        alloc.read(60, &mut big).unwrap();
        assert_eq!(big, data[60..].to_vec());
    }

    #[test]
    fn test_pipe_is_forward_only_then_read_only() {
        let stream = new_stream();
        let pipe = Pipe::new(CompressionSpec::parse("ZIP").unwrap(), 64);
        let mut alloc = Allocator::pipe_writer(stream, pipe);
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 7) as u8).collect();

        alloc.append(&data[..500]).unwrap();
        assert!(alloc.write(10, &[1]).is_err());
        assert!(alloc.read(0, &mut [0u8; 1]).is_err());
        alloc.append(&data[500..]).unwrap();

        alloc.close_writer().unwrap();
        assert!(!alloc.is_writable());
        assert_eq!(alloc.size(), 1000);
        assert!(alloc.append(&[1]).is_err());

        let mut buf = vec![0u8; 300];
        alloc.read(50, &mut buf).unwrap();
        assert_eq!(buf, data[50..350].to_vec());

        let pipe = alloc.pipe().unwrap();
        assert_eq!(pipe.raw_size(), 1000);
        assert!(pipe.compressed_size() > 0);

        let memory = alloc.to_memory(true).unwrap();
        assert_eq!(memory.as_slice(), &data[..]);
    }

    #[test]
    fn test_pipe_reader_tail() {
        let stream = new_stream();
        let mut pipe = Pipe::new(CompressionSpec::parse("RLE").unwrap(), 8);
        let frame = pipe.encode_chunk(&[5; 8]).unwrap();
        stream.append(&frame).unwrap();

        let alloc = Allocator::pipe_reader(stream, pipe, vec![9]).unwrap();
        assert_eq!(alloc.size(), 9);
        let mut buf = [0u8; 3];
        alloc.read(6, &mut buf).unwrap();
        assert_eq!(buf, [5, 5, 9]);
    }
}
