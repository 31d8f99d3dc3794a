//! Dimensional array container
//!
//! A [`GdsArray`] is a row-major array of one [`ElementKind`] over an
//! [`Allocator`]. `current_count` counts elements physically written;
//! `total_count` counts elements visible to readers and only advances in
//! whole units of the outermost dimension, so a partially appended row stays
//! hidden until it is complete.

use crate::allocator::{Allocator, LoadMode, MemoryBlock};
use crate::block_store::{BlockStore, BlockStream};
use crate::codec::{self, Element, Remainder, STAGING_ELEMENTS};
use crate::compression::{CompressionSpec, Pipe};
use crate::config::OpenOptions;
use crate::error::{GdsError, Result};
use crate::layout::DimLayout;
use crate::metadata::NodeDescription;
use crate::selection::{check_mask, fill_selection};
use crate::serial::{SerialValue, StructReader, StructWriter};
use crate::types::ElementKind;

/// Per-dimension selection masks; `None` selects the whole requested range
pub type Selection<'a> = [Option<&'a [bool]>];

/// Decomposition of a region access into contiguous codec calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPlan {
    /// Outermost dimension merged into each contiguous run
    pub run_dim: usize,
    /// Number of bulk codec calls
    pub run_count: u64,
    /// Elements covered by each call
    pub elements_per_run: u64,
    /// Runs are copied straight out; otherwise they are filtered by the
    /// innermost mask
    pub dense: bool,
    /// Elements delivered to the caller
    pub element_count: u64,
}

/// Number of elements a region access delivers
fn region_count(length: &[u64], selection: Option<&Selection<'_>>) -> u64 {
    length
        .iter()
        .enumerate()
        .map(|(i, &len)| {
            match selection.and_then(|sel| sel.get(i).copied().flatten()) {
                Some(mask) => mask.iter().filter(|&&b| b).count() as u64,
                None => len,
            }
        })
        .product()
}

/// Walk a region as contiguous runs.
///
/// `f(first_element, run_len, mask)` is called once per run; `mask` is set
/// only when the innermost dimension is sparse, in which case it has
/// `run_len` entries.
fn for_each_run<F>(
    layout: &DimLayout,
    start: &[u64],
    length: &[u64],
    selection: Option<&Selection<'_>>,
    mut f: F,
) -> Result<ReadPlan>
where
    F: FnMut(u64, u64, Option<&[bool]>) -> Result<()>,
{
    let rank = layout.rank();
    if rank == 0 {
        if !start.is_empty() || !length.is_empty() {
            return Err(GdsError::invalid_dimension("a scalar takes an empty region"));
        }
        f(0, 1, None)?;
        return Ok(ReadPlan {
            run_dim: 0,
            run_count: 1,
            elements_per_run: 1,
            dense: true,
            element_count: 1,
        });
    }
    layout.check_region(start, length)?;

    let masks: Vec<Option<&[bool]>> = match selection {
        None => vec![None; rank],
        Some(sel) if sel.len() == rank => sel.to_vec(),
        Some(sel) => {
            return Err(GdsError::SelectionMismatch(format!(
                "{} masks for a rank-{} array",
                sel.len(),
                rank
            )))
        }
    };
    for (i, mask) in masks.iter().enumerate() {
        if let Some(mask) = mask {
            check_mask(mask, length[i] as usize, &format!("dimension {}", i))?;
        }
    }
    let infos: Vec<_> = masks
        .iter()
        .zip(length)
        .map(|(mask, &len)| fill_selection(*mask, len as usize))
        .collect();
    if infos.iter().any(|s| s.is_empty()) {
        return Ok(ReadPlan {
            run_dim: rank - 1,
            run_count: 0,
            elements_per_run: 0,
            dense: true,
            element_count: 0,
        });
    }

    let dims = layout.dims();
    let full = |j: usize| {
        infos[j].dense
            && start[j] + infos[j].start as u64 == 0
            && infos[j].block_len as u64 == dims[j].length
    };
    let mut k = rank - 1;
    while k > 0 && full(k) && infos[k - 1].dense {
        k -= 1;
    }

    let run_len: u64 = infos[k..].iter().map(|s| s.block_len as u64).product();
    let run_mask = match masks[k] {
        Some(mask) if !infos[k].dense => {
            Some(&mask[infos[k].start..infos[k].start + infos[k].block_len])
        }
        _ => None,
    };
    let run_base = (start[k] + infos[k].start as u64) * dims[k].element_count;

    // absolute indices of every selected position in the outer dimensions
    let outer: Vec<Vec<u64>> = (0..k)
        .map(|i| {
            let info = infos[i];
            (info.start..info.start + info.block_len)
                .filter(|&j| masks[i].map_or(true, |m| m[j]))
                .map(|j| start[i] + j as u64)
                .collect()
        })
        .collect();
    let run_count: u64 = outer.iter().map(|v| v.len() as u64).product();

    let mut odometer = vec![0usize; k];
    for _ in 0..run_count {
        let base: u64 = odometer
            .iter()
            .enumerate()
            .map(|(i, &p)| outer[i][p] * dims[i].element_count)
            .sum::<u64>()
            + run_base;
        f(base, run_len, run_mask)?;
        for i in (0..k).rev() {
            odometer[i] += 1;
            if odometer[i] < outer[i].len() {
                break;
            }
            odometer[i] = 0;
        }
    }

    Ok(ReadPlan {
        run_dim: k,
        run_count,
        elements_per_run: run_len,
        dense: run_mask.is_none(),
        element_count: region_count(length, selection),
    })
}

/// Consecutive `true` stretches of a mask as `(offset, len)`
fn true_runs(mask: &[bool]) -> Vec<(u64, usize)> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < mask.len() {
        if mask[i] {
            let begin = i;
            while i < mask.len() && mask[i] {
                i += 1;
            }
            runs.push((begin as u64, i - begin));
        } else {
            i += 1;
        }
    }
    runs
}

/// `(raw, compressed)` byte counts of the pipe behind `allocator`
fn pipe_sizes_of(allocator: &Allocator) -> (u64, u64) {
    allocator
        .pipe()
        .map(|pipe| (pipe.raw_size(), pipe.compressed_size()))
        .unwrap_or_default()
}

/// Typed multi-dimensional array
#[derive(Debug)]
pub struct GdsArray {
    kind: ElementKind,
    layout: DimLayout,
    current_count: u64,
    total_count: u64,
    allocator: Allocator,
    remainder: Remainder,
    stream: Option<BlockStream>,
    compression: CompressionSpec,
    chunk_size: usize,
    window_size: usize,
    writer_open: bool,
    pipe_sizes: (u64, u64),
}

impl GdsArray {
    fn with_allocator(kind: ElementKind, lengths: &[u64], allocator: Allocator) -> Self {
        let options = OpenOptions::default();
        Self {
            kind,
            layout: DimLayout::new(lengths, kind.bit_width()),
            current_count: 0,
            total_count: 0,
            allocator,
            remainder: Remainder::default(),
            stream: None,
            compression: CompressionSpec::none(),
            chunk_size: options.chunk_size,
            window_size: options.stream_window,
            writer_open: false,
            pipe_sizes: (0, 0),
        }
    }

    /// Heap-backed array with the given lengths, zero-filled.
    ///
    /// Use an outermost length of 0 to start empty and append rows.
    pub fn new(kind: ElementKind, lengths: &[u64]) -> Result<Self> {
        let mut array = Self::with_allocator(kind, lengths, Allocator::in_memory());
        array.zero_fill_capacity()?;
        Ok(array)
    }

    /// Array stored in `stream`, compressed unless `compression` is none
    pub fn new_streamed(
        kind: ElementKind,
        lengths: &[u64],
        stream: BlockStream,
        compression: CompressionSpec,
        options: &OpenOptions,
    ) -> Result<Self> {
        let allocator = if compression.is_none() {
            Allocator::streamed(stream.clone(), options.stream_window)?
        } else {
            Allocator::pipe_writer(stream.clone(), Pipe::new(compression, options.chunk_size))
        };
        let mut array = Self::with_allocator(kind, lengths, allocator);
        array.stream = Some(stream);
        array.compression = compression;
        array.chunk_size = options.chunk_size;
        array.window_size = options.stream_window;
        array.writer_open = !compression.is_none();
        array.zero_fill_capacity()?;
        Ok(array)
    }

    fn zero_fill_capacity(&mut self) -> Result<()> {
        let elements = self.layout.element_capacity();
        if elements == 0 {
            return Ok(());
        }
        if self.allocator.is_forward_only() {
            let zeros = vec![0u8; (elements as usize).min(STAGING_ELEMENTS)];
            let mut left = elements;
            while left > 0 {
                let n = (left as usize).min(zeros.len());
                self.append_raw_zeros(n)?;
                left -= n as u64;
            }
        } else {
            self.allocator.set_size(self.layout.bytes_for(elements))?;
        }
        self.current_count = elements;
        self.total_count = elements;
        Ok(())
    }

    fn append_raw_zeros(&mut self, n: usize) -> Result<()> {
        match self.kind {
            ElementKind::Bits { .. } => {
                let zeros = vec![0u8; n];
                codec::append_elements(&mut self.allocator, self.kind, &zeros, &mut self.remainder)
            }
            _ => {
                let bytes = self.layout.bytes_for(n as u64) as usize;
                self.allocator.append(&vec![0u8; bytes])
            }
        }
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn class_name(&self) -> String {
        self.kind.class_name()
    }

    pub fn rank(&self) -> usize {
        self.layout.rank()
    }

    /// Dimension lengths, outermost first
    pub fn dims(&self) -> Vec<u64> {
        self.layout.lengths()
    }

    pub fn dim_length(&self, dim: usize) -> u64 {
        self.layout.length(dim)
    }

    pub fn layout(&self) -> &DimLayout {
        &self.layout
    }

    pub fn bit_width(&self) -> u64 {
        self.kind.bit_width()
    }

    /// Elements visible to readers
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Elements physically written, including an incomplete last row
    pub fn current_count(&self) -> u64 {
        self.current_count
    }

    pub fn compression(&self) -> CompressionSpec {
        self.compression
    }

    pub fn load_mode(&self) -> LoadMode {
        self.allocator.load_mode()
    }

    pub fn is_writable(&self) -> bool {
        self.allocator.is_writable()
    }

    /// Whether a compressed writer is still accepting appends
    pub fn is_writer_open(&self) -> bool {
        self.writer_open
    }

    pub fn stream_id(&self) -> Option<u32> {
        self.stream.as_ref().map(|s| s.id())
    }

    pub fn remainder(&self) -> Remainder {
        self.remainder
    }

    /// Heap growth events of the backing allocator
    pub fn reallocations(&self) -> usize {
        self.allocator.reallocations()
    }

    pub(crate) fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    fn check_writable(&self) -> Result<()> {
        if self.allocator.is_writable() {
            return Ok(());
        }
        if self.allocator.pipe().is_some() {
            Err(GdsError::read_only(
                "the compressed array is in read mode and cannot be modified",
            ))
        } else {
            Err(GdsError::read_only("the array belongs to a read-only file"))
        }
    }

    fn check_random_access(&self) -> Result<()> {
        self.check_writable()?;
        if self.allocator.is_forward_only() {
            return Err(GdsError::read_only(
                "the compressed array accepts appends only; call close_writer to switch \
                 it to read mode first",
            ));
        }
        Ok(())
    }

    fn check_appendable(&self) -> Result<()> {
        self.check_writable()?;
        if self.rank() == 0 {
            return Err(GdsError::invalid_dimension("cannot append to a scalar"));
        }
        if self.layout.unit_count() == 0 {
            return Err(GdsError::invalid_dimension(format!(
                "inner dimensions {} hold no elements",
                self.layout.summary()
            )));
        }
        Ok(())
    }

    /// Advance the committed count to the last complete outer unit
    fn commit(&mut self) -> Result<()> {
        let unit = self.layout.unit_count();
        if self.rank() == 0 || unit == 0 {
            return Ok(());
        }
        let units = self.current_count / unit;
        self.layout.set_length(0, units)?;
        self.total_count = units * unit;
        Ok(())
    }

    /// Drop elements of an incomplete last row
    fn discard_partial(&mut self) -> Result<()> {
        if self.current_count > self.total_count {
            self.allocator
                .set_size(self.layout.bytes_for(self.total_count))?;
            self.current_count = self.total_count;
        }
        Ok(())
    }

    /// Describe how a region access decomposes into codec calls
    pub fn plan_read(
        &self,
        start: &[u64],
        length: &[u64],
        selection: Option<&Selection<'_>>,
    ) -> Result<ReadPlan> {
        for_each_run(&self.layout, start, length, selection, |_, _, _| Ok(()))
    }

    /// Read a region, optionally filtered by per-dimension masks; returns
    /// the number of elements stored in `out`
    pub fn read_into<T: Element>(
        &self,
        start: &[u64],
        length: &[u64],
        selection: Option<&Selection<'_>>,
        out: &mut [T],
    ) -> Result<usize> {
        let expected = region_count(length, selection);
        if (out.len() as u64) < expected {
            return Err(GdsError::invalid_dimension(format!(
                "buffer holds {} elements, the region has {}",
                out.len(),
                expected
            )));
        }
        let mut pos = 0usize;
        for_each_run(&self.layout, start, length, selection, |index, n, mask| {
            match mask {
                None => {
                    let n = n as usize;
                    codec::read_elements(&self.allocator, self.kind, index, &mut out[pos..pos + n])?;
                    pos += n;
                }
                Some(mask) => {
                    pos += codec::read_selected(
                        &self.allocator,
                        self.kind,
                        index,
                        mask,
                        &mut out[pos..],
                    )?;
                }
            }
            Ok(())
        })?;
        Ok(pos)
    }

    /// Read a region into a new vector
    pub fn read<T: Element>(
        &self,
        start: &[u64],
        length: &[u64],
        selection: Option<&Selection<'_>>,
    ) -> Result<Vec<T>> {
        let count = region_count(length, selection) as usize;
        let mut out = Vec::new();
        out.try_reserve_exact(count)?;
        out.resize(count, T::default());
        let n = self.read_into(start, length, selection, &mut out)?;
        out.truncate(n);
        Ok(out)
    }

    /// Every committed element
    pub fn read_all<T: Element>(&self) -> Result<Vec<T>> {
        let dims = self.dims();
        self.read(&vec![0; dims.len()], &dims, None)
    }

    /// Read `out.len()` elements at flat element `index`
    pub fn read_flat<T: Element>(&self, index: u64, out: &mut [T]) -> Result<()> {
        if index + out.len() as u64 > self.total_count {
            return Err(GdsError::out_of_range(format!(
                "elements {}..{} of {}",
                index,
                index + out.len() as u64,
                self.total_count
            )));
        }
        codec::read_elements(&self.allocator, self.kind, index, out)
    }

    /// Overwrite elements at flat element `index`
    pub fn write_flat<T: Element>(&mut self, index: u64, values: &[T]) -> Result<()> {
        self.check_random_access()?;
        if index + values.len() as u64 > self.total_count {
            return Err(GdsError::out_of_range(format!(
                "elements {}..{} of {}",
                index,
                index + values.len() as u64,
                self.total_count
            )));
        }
        codec::write_elements(&mut self.allocator, self.kind, index, values)
    }

    /// Overwrite the selected positions of a region with `values`
    pub fn write_selected<T: Element>(
        &mut self,
        start: &[u64],
        length: &[u64],
        selection: Option<&Selection<'_>>,
        values: &[T],
    ) -> Result<()> {
        self.check_random_access()?;
        let expected = region_count(length, selection);
        if values.len() as u64 != expected {
            return Err(GdsError::invalid_dimension(format!(
                "{} values for a region of {} elements",
                values.len(),
                expected
            )));
        }
        let kind = self.kind;
        let alloc = &mut self.allocator;
        let mut pos = 0usize;
        for_each_run(&self.layout, start, length, selection, |index, n, mask| {
            match mask {
                None => {
                    let n = n as usize;
                    codec::write_elements(alloc, kind, index, &values[pos..pos + n])?;
                    pos += n;
                }
                Some(mask) => {
                    for (offset, len) in true_runs(mask) {
                        codec::write_elements(alloc, kind, index + offset, &values[pos..pos + len])?;
                        pos += len;
                    }
                }
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Overwrite a region inside the current dimensions
    pub fn write_data<T: Element>(
        &mut self,
        start: &[u64],
        length: &[u64],
        values: &[T],
    ) -> Result<()> {
        self.write_selected(start, length, None, values)
    }

    /// Write a region, growing the outermost dimension when the region ends
    /// past it
    pub fn write<T: Element>(&mut self, start: &[u64], length: &[u64], values: &[T]) -> Result<()> {
        if let (Some(&s), Some(&l)) = (start.first(), length.first()) {
            if s + l > self.dim_length(0) {
                self.set_dim_length(0, s + l)?;
            }
        }
        self.write_data(start, length, values)
    }

    /// Append elements after the last written one
    pub fn append<T: Element>(&mut self, values: &[T]) -> Result<()> {
        self.check_appendable()?;
        if self.allocator.is_forward_only() {
            codec::append_elements(&mut self.allocator, self.kind, values, &mut self.remainder)?;
        } else {
            codec::write_elements(&mut self.allocator, self.kind, self.current_count, values)?;
        }
        self.current_count += values.len() as u64;
        self.commit()
    }

    /// Copy `n` elements from `src` to `dst`; the ranges may overlap
    fn copy_elements(&mut self, src: u64, dst: u64, n: u64) -> Result<()> {
        if n == 0 || src == dst {
            return Ok(());
        }
        match self.kind.byte_size() {
            Some(size) => self.allocator.move_bytes(src * size, dst * size, n * size),
            None => {
                let mut buf = vec![0i64; (n as usize).min(STAGING_ELEMENTS)];
                let step = buf.len() as u64;
                let mut done = 0u64;
                while done < n {
                    let m = step.min(n - done);
                    let at = if dst > src { n - done - m } else { done };
                    let chunk = &mut buf[..m as usize];
                    codec::read_elements(&self.allocator, self.kind, src + at, chunk)?;
                    codec::write_elements(&mut self.allocator, self.kind, dst + at, chunk)?;
                    done += m;
                }
                Ok(())
            }
        }
    }

    fn zero_elements(&mut self, index: u64, n: u64) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        match self.kind.byte_size() {
            Some(size) => self.allocator.fill(index * size, n * size, 0),
            None => {
                let zeros = vec![0u8; (n as usize).min(STAGING_ELEMENTS)];
                let mut done = 0u64;
                while done < n {
                    let m = (zeros.len() as u64).min(n - done);
                    codec::write_elements(
                        &mut self.allocator,
                        self.kind,
                        index + done,
                        &zeros[..m as usize],
                    )?;
                    done += m;
                }
                Ok(())
            }
        }
    }

    /// Change the length of one dimension, moving rows so that every index
    /// keeps its element. New positions are zero; removed ones are dropped.
    pub fn set_dim_length(&mut self, dim: usize, length: u64) -> Result<()> {
        self.check_random_access()?;
        if dim >= self.rank() {
            return Err(GdsError::invalid_dimension(format!(
                "dimension {} of a rank-{} array",
                dim,
                self.rank()
            )));
        }
        let old = self.layout.length(dim);
        if old == length {
            return Ok(());
        }
        self.discard_partial()?;

        let rows: u64 = self.layout.dims()[..dim].iter().map(|d| d.length).product();
        let inner = self.layout.dims()[dim].element_count;
        let old_row = old * inner;
        let new_row = length * inner;
        let new_total = rows * new_row;

        if length > old {
            self.allocator.set_size(self.layout.bytes_for(new_total))?;
            for r in (0..rows).rev() {
                self.copy_elements(r * old_row, r * new_row, old_row)?;
                self.zero_elements(r * new_row + old_row, new_row - old_row)?;
            }
        } else {
            for r in 0..rows {
                self.copy_elements(r * old_row, r * new_row, new_row)?;
            }
            self.allocator.set_size(self.layout.bytes_for(new_total))?;
        }

        self.layout.set_length(dim, length)?;
        self.total_count = new_total;
        self.current_count = new_total;
        Ok(())
    }

    /// Reshape every dimension; the rank may only change while empty
    pub fn set_dims(&mut self, lengths: &[u64]) -> Result<()> {
        self.check_random_access()?;
        if lengths.len() == self.rank() {
            for (dim, &length) in lengths.iter().enumerate().rev() {
                self.set_dim_length(dim, length)?;
            }
            return Ok(());
        }
        if self.current_count > 0 && self.rank() > 0 {
            return Err(GdsError::invalid_dimension(format!(
                "cannot change rank {} to {} while the array holds data",
                self.rank(),
                lengths.len()
            )));
        }
        self.layout = DimLayout::new(lengths, self.kind.bit_width());
        let elements = self.layout.element_capacity();
        self.allocator.set_size(0)?;
        self.allocator.set_size(self.layout.bytes_for(elements))?;
        self.current_count = elements;
        self.total_count = elements;
        Ok(())
    }

    /// Insert a new outermost dimension of `length`; existing data becomes
    /// index 0 of it
    pub fn add_dim(&mut self, length: u64) -> Result<()> {
        self.check_random_access()?;
        self.discard_partial()?;
        let outer = if self.total_count > 0 { 1 } else { 0 };
        self.layout.insert_outer(outer);
        self.set_dim_length(0, length)
    }

    /// Remove the outermost dimension, which must have 0 or 1 entries
    pub fn delete_dim(&mut self) -> Result<()> {
        self.check_random_access()?;
        if self.rank() == 0 {
            return Err(GdsError::invalid_dimension("a scalar has no dimension to delete"));
        }
        if self.dim_length(0) > 1 {
            return Err(GdsError::invalid_dimension(format!(
                "outermost dimension has {} entries; only 0 or 1 can be removed",
                self.dim_length(0)
            )));
        }
        self.discard_partial()?;
        self.layout.remove_outer()?;
        let elements = self.layout.element_capacity();
        self.allocator.set_size(self.layout.bytes_for(elements))?;
        self.current_count = elements;
        self.total_count = elements;
        Ok(())
    }

    /// Re-lay fixed-width strings with a wider field
    fn widen_strings(&mut self, width: u32) -> Result<()> {
        let ElementKind::FixedStr { encoding, .. } = self.kind else {
            return Ok(());
        };
        if self.current_count > 0 && self.allocator.is_forward_only() {
            return Err(GdsError::read_only(format!(
                "strings of a compressed array cannot be widened to {} units",
                width
            )));
        }
        let existing = if self.current_count > 0 {
            codec::read_strings(&self.allocator, self.kind, 0, self.current_count as usize)?
        } else {
            Vec::new()
        };
        self.kind = ElementKind::FixedStr { encoding, width };
        self.layout.set_bit_width(self.kind.bit_width());
        if !existing.is_empty() {
            self.allocator.set_size(0)?;
            codec::write_strings(&mut self.allocator, self.kind, 0, &existing)?;
        }
        tracing::debug!(width, elements = existing.len(), "widened string field");
        Ok(())
    }

    fn string_width_needed<S: AsRef<str>>(&self, values: &[S]) -> Result<u32> {
        match self.kind {
            ElementKind::FixedStr { encoding, .. } => Ok(values
                .iter()
                .map(|s| encoding.units_of(s.as_ref()))
                .max()
                .unwrap_or(0)),
            other => Err(GdsError::unsupported_type(format!(
                "{} holds numbers, not strings",
                other
            ))),
        }
    }

    fn string_width(&self) -> u32 {
        match self.kind {
            ElementKind::FixedStr { width, .. } => width,
            _ => 0,
        }
    }

    /// Append strings, widening the field when one is longer than it
    pub fn append_strings<S: AsRef<str>>(&mut self, values: &[S]) -> Result<()> {
        self.check_appendable()?;
        let need = self.string_width_needed(values)?;
        if need > self.string_width() {
            self.widen_strings(need)?;
        }
        if let ElementKind::FixedStr { encoding, width } = self.kind {
            if self.allocator.is_forward_only() {
                let mut raw = Vec::new();
                for s in values {
                    codec::encode_str(encoding, width, s.as_ref(), &mut raw);
                }
                self.allocator.append(&raw)?;
            } else {
                codec::write_strings(&mut self.allocator, self.kind, self.current_count, values)?;
            }
        }
        self.current_count += values.len() as u64;
        self.commit()
    }

    /// Read strings of a region, optionally filtered by masks
    pub fn read_strings(
        &self,
        start: &[u64],
        length: &[u64],
        selection: Option<&Selection<'_>>,
    ) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for_each_run(&self.layout, start, length, selection, |index, n, mask| {
            let strings = codec::read_strings(&self.allocator, self.kind, index, n as usize)?;
            match mask {
                None => out.extend(strings),
                Some(mask) => out.extend(
                    strings
                        .into_iter()
                        .zip(mask)
                        .filter_map(|(s, &keep)| keep.then_some(s)),
                ),
            }
            Ok(())
        })?;
        Ok(out)
    }

    /// Overwrite strings at flat element `index`, widening the field when
    /// one is longer than it
    pub fn write_strings_flat<S: AsRef<str>>(&mut self, index: u64, values: &[S]) -> Result<()> {
        self.check_random_access()?;
        if index + values.len() as u64 > self.total_count {
            return Err(GdsError::out_of_range(format!(
                "elements {}..{} of {}",
                index,
                index + values.len() as u64,
                self.total_count
            )));
        }
        let need = self.string_width_needed(values)?;
        if need > self.string_width() {
            self.widen_strings(need)?;
        }
        codec::write_strings(&mut self.allocator, self.kind, index, values)
    }

    /// Overwrite strings of a region inside the current dimensions
    pub fn write_strings<S: AsRef<str>>(
        &mut self,
        start: &[u64],
        length: &[u64],
        values: &[S],
    ) -> Result<()> {
        self.check_random_access()?;
        let expected = region_count(length, None);
        if values.len() as u64 != expected {
            return Err(GdsError::invalid_dimension(format!(
                "{} strings for a region of {} elements",
                values.len(),
                expected
            )));
        }
        let need = self.string_width_needed(values)?;
        if need > self.string_width() {
            self.widen_strings(need)?;
        }
        let kind = self.kind;
        let alloc = &mut self.allocator;
        let mut pos = 0usize;
        for_each_run(&self.layout, start, length, None, |index, n, _| {
            let n = n as usize;
            codec::write_strings(alloc, kind, index, &values[pos..pos + n])?;
            pos += n;
            Ok(())
        })?;
        Ok(())
    }

    /// Persist pending compressed bytes without finishing the writer. A
    /// cached array of a writable file is written back to its stream.
    pub fn flush(&mut self) -> Result<()> {
        self.allocator.flush()?;
        self.write_back()
    }

    fn write_back(&mut self) -> Result<()> {
        let (Allocator::InMemory(block), Some(stream)) = (&self.allocator, &self.stream) else {
            return Ok(());
        };
        if stream.is_read_only() {
            return Ok(());
        }
        let written = self.encode_stream(stream, self.compression, block.as_slice())?;
        self.pipe_sizes = pipe_sizes_of(&written);
        tracing::debug!(stream = stream.id(), bytes = block.as_slice().len(), "wrote cached array back");
        Ok(())
    }

    /// Replace the content of `stream` with `data` stored through `spec`,
    /// returning an allocator over the new content
    fn encode_stream(
        &self,
        stream: &BlockStream,
        spec: CompressionSpec,
        data: &[u8],
    ) -> Result<Allocator> {
        stream.truncate(0)?;
        if spec.is_none() {
            stream.append(data)?;
            return Allocator::streamed(stream.clone(), self.window_size);
        }
        let mut writer = Allocator::pipe_writer(stream.clone(), Pipe::new(spec, self.chunk_size));
        writer.append(data)?;
        writer.close_writer()?;
        Ok(writer)
    }

    /// Bytes holding the written elements
    fn used_bytes(&self) -> Result<MemoryBlock> {
        let mut block = self.allocator.to_memory(false)?;
        let used = self.layout.bytes_for(self.current_count) as usize;
        if used < block.as_slice().len() {
            block = MemoryBlock::from_vec(block.as_slice()[..used].to_vec(), false);
        }
        Ok(block)
    }

    /// Re-encode the stored data with another compression method. The
    /// array ends in read mode; an open writer is finished first.
    pub fn set_compression(&mut self, spec: &CompressionSpec) -> Result<()> {
        if *spec == self.compression {
            return Ok(());
        }
        let stream = self.stream.clone().ok_or_else(|| {
            GdsError::Configuration("heap-only arrays cannot change compression".to_string())
        })?;
        if stream.is_read_only() {
            return Err(GdsError::read_only("the array belongs to a read-only file"));
        }
        self.close_writer()?;
        let data = self.used_bytes()?;
        let allocator = self.encode_stream(&stream, *spec, data.as_slice())?;
        let from = self.compression;
        self.compression = *spec;
        self.pipe_sizes = pipe_sizes_of(&allocator);
        self.writer_open = false;
        // a cached array keeps its heap copy
        if self.allocator.load_mode() == LoadMode::Streamed {
            self.allocator = allocator;
        }
        tracing::info!(
            stream = stream.id(),
            from = %from,
            to = %spec,
            raw = data.as_slice().len(),
            stored = self.pipe_sizes.1,
            "recompressed array"
        );
        Ok(())
    }

    /// Load the whole array into memory. Arrays of a writable file stay
    /// writable and are written back on flush.
    pub fn cache(&mut self) -> Result<()> {
        self.set_load_mode(LoadMode::InMemory)
    }

    /// Copy of this array, stored in a new stream of `store` or on the heap
    pub(crate) fn duplicate(&self, store: Option<&(BlockStore, OpenOptions)>) -> Result<Self> {
        if self.writer_open {
            return Err(GdsError::read_only(
                "close the compressed writer before copying the array",
            ));
        }
        let data = self.used_bytes()?;
        let mut copy = match store {
            Some((store, _)) => {
                let stream = store.stream(store.new_stream()?)?;
                let allocator = self.encode_stream(&stream, self.compression, data.as_slice())?;
                let mut copy = Self::with_allocator(self.kind, &self.dims(), allocator);
                copy.pipe_sizes = pipe_sizes_of(&copy.allocator);
                copy.compression = self.compression;
                copy.stream = Some(stream);
                copy
            }
            None => Self::with_allocator(self.kind, &self.dims(), Allocator::InMemory(data)),
        };
        copy.current_count = self.current_count;
        copy.total_count = self.total_count;
        copy.chunk_size = self.chunk_size;
        copy.window_size = self.window_size;
        Ok(copy)
    }

    /// Finish a compressed writer: flush the trailing partial byte and the
    /// pending chunk, then switch the array to read mode
    pub fn close_writer(&mut self) -> Result<()> {
        if !self.allocator.is_forward_only() {
            return Ok(());
        }
        if !self.remainder.is_empty() {
            self.allocator.append(&[self.remainder.byte])?;
            self.remainder = Remainder::default();
        }
        self.allocator.close_writer()?;
        self.writer_open = false;
        Ok(())
    }

    fn stream_allocator(&self, stream: BlockStream) -> Result<Allocator> {
        if self.compression.is_none() {
            return Allocator::streamed(stream, self.window_size);
        }
        let pipe = Pipe::new(self.compression, self.chunk_size)
            .with_sizes(self.pipe_sizes.0, self.pipe_sizes.1);
        if self.writer_open && !stream.is_read_only() {
            Ok(Allocator::pipe_writer(stream, pipe))
        } else {
            let tail = if self.writer_open && !self.remainder.is_empty() {
                vec![self.remainder.byte]
            } else {
                Vec::new()
            };
            Allocator::pipe_reader(stream, pipe, tail)
        }
    }

    /// Switch between heap-resident and streamed data. A compressed writer
    /// must be closed before its array can be cached.
    pub fn set_load_mode(&mut self, mode: LoadMode) -> Result<()> {
        if mode == self.allocator.load_mode() {
            return Ok(());
        }
        let stream = self.stream.clone().ok_or_else(|| {
            GdsError::unsupported_type("the array has no backing stream to load from")
        })?;
        self.allocator = match mode {
            LoadMode::InMemory => {
                if self.writer_open && !stream.is_read_only() {
                    return Err(GdsError::read_only(
                        "close the compressed writer before caching the array",
                    ));
                }
                self.pipe_sizes = self.pipe_stats();
                Allocator::InMemory(self.allocator.to_memory(stream.is_read_only())?)
            }
            LoadMode::Streamed => {
                self.write_back()?;
                self.stream_allocator(stream)?
            }
        };
        tracing::debug!(stream = self.stream_id(), ?mode, "switched load mode");
        Ok(())
    }

    /// `(raw, compressed)` byte counts of the pipe
    fn pipe_stats(&self) -> (u64, u64) {
        match self.allocator.pipe() {
            Some(_) => pipe_sizes_of(&self.allocator),
            None => self.pipe_sizes,
        }
    }

    /// Summary of the array under `name`
    pub fn describe(&self, name: &str) -> NodeDescription {
        let raw_size = self.layout.bytes_for(self.current_count);
        let stored_size = if self.compression.is_none() {
            self.allocator.size()
        } else {
            self.pipe_stats().1
        };
        NodeDescription {
            name: name.to_string(),
            class_name: self.class_name(),
            dims: self.dims(),
            total_count: self.total_count,
            current_count: self.current_count,
            bit_width: self.bit_width(),
            coder: self.compression.name(),
            raw_size,
            stored_size,
            writer_open: self.writer_open,
        }
    }

    /// Write the array fields into the node block being built
    pub(crate) fn save_fields(&self, w: &mut StructWriter) -> Result<()> {
        let stream = self.stream.as_ref().ok_or_else(|| {
            GdsError::unsupported_type("heap-only arrays cannot be persisted")
        })?;
        w.write_u64_array("DIMS", &self.dims())?;
        w.write_u64("TOTAL", self.total_count)?;
        w.write_u64("CURRENT", self.current_count)?;
        w.write_u32("MAXLEN", self.string_width())?;
        w.write_u32("STREAM", stream.id())?;
        if !self.compression.is_none() {
            let (raw, size) = self.pipe_stats();
            w.write_str("PIPE", &self.compression.name())?;
            w.write_u64("PIPE.RAW", raw)?;
            w.write_u64("PIPE.SIZE", size)?;
            w.write_u64("PIPE.CHUNK", self.chunk_size as u64)?;
            w.write_bool("PIPE.OPEN", self.writer_open)?;
            w.write_u8("REMAINDER", self.remainder.byte)?;
            w.write_u8("REMAINDER.BITS", self.remainder.bits)?;
        }
        Ok(())
    }

    /// Rebuild an array of `kind` from its node block
    pub(crate) fn load(
        kind: ElementKind,
        block: &StructReader,
        store: &BlockStore,
        options: &OpenOptions,
    ) -> Result<Self> {
        let kind = match kind {
            ElementKind::FixedStr { encoding, .. } => ElementKind::FixedStr {
                encoding,
                width: block.opt_u64("MAXLEN")?.unwrap_or(0) as u32,
            },
            other => other,
        };
        let dims = block.u64_array("DIMS")?.to_vec();
        let stream = store.stream(block.u64("STREAM")? as u32)?;

        let mut array = Self::with_allocator(kind, &dims, Allocator::in_memory());
        array.total_count = block.u64("TOTAL")?;
        array.current_count = block.u64("CURRENT")?;
        array.window_size = options.stream_window;
        if let Some(SerialValue::Str(coder)) = block.get("PIPE") {
            array.compression = CompressionSpec::parse(coder)?;
            array.chunk_size = block.u64("PIPE.CHUNK")? as usize;
            array.pipe_sizes = (block.u64("PIPE.RAW")?, block.u64("PIPE.SIZE")?);
            array.writer_open = block.bool("PIPE.OPEN")?;
            array.remainder = Remainder {
                byte: block.u64("REMAINDER")? as u8,
                bits: block.u64("REMAINDER.BITS")? as u8,
            };
        }
        array.allocator = array.stream_allocator(stream.clone())?;
        array.stream = Some(stream);

        if array.total_count != array.layout.element_capacity()
            || array.current_count < array.total_count
        {
            return Err(GdsError::corrupt(format!(
                "counts {}/{} do not match dimensions {}",
                array.total_count,
                array.current_count,
                array.layout.summary()
            )));
        }
        let mut have = array.allocator.size() * 8;
        if array.allocator.is_forward_only() {
            have += array.remainder.bits as u64;
        }
        if have < array.current_count * array.bit_width() {
            return Err(GdsError::corrupt(format!(
                "stream {} holds {} bits, {} elements need {}",
                array.stream_id().unwrap_or_default(),
                have,
                array.current_count,
                array.current_count * array.bit_width()
            )));
        }
        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryStorage;
    use crate::types::StrEncoding;

    fn matrix_4x3() -> GdsArray {
        let mut array = GdsArray::new(ElementKind::UInt8, &[0, 3]).unwrap();
        array.append(&(0u8..12).collect::<Vec<_>>()).unwrap();
        array
    }

    fn new_store() -> BlockStore {
        BlockStore::create(Box::new(MemoryStorage::new())).unwrap()
    }

    #[test]
    fn test_append_commits_whole_rows() {
        let mut array = GdsArray::new(ElementKind::bits(2, false).unwrap(), &[0, 3]).unwrap();
        for k in 1..=10u64 {
            array.append(&[(k % 4) as u8]).unwrap();
            assert_eq!(array.current_count(), k);
            assert_eq!(array.total_count(), 3 * (k / 3));
            assert_eq!(array.dim_length(0), k / 3);
            assert_eq!(array.total_count() == k, k % 3 == 0);
        }
        let all: Vec<u8> = array.read_all().unwrap();
        assert_eq!(all, vec![1, 2, 3, 0, 1, 2, 3, 0, 1]);
    }

    #[test]
    fn test_read_with_selection() {
        let array = matrix_4x3();
        let rows = [true, false, true, true];
        let cols = [false, true, true];
        let sel = [Some(&rows[..]), Some(&cols[..])];
        let values: Vec<u8> = array.read(&[0, 0], &[4, 3], Some(&sel)).unwrap();
        assert_eq!(values, vec![1, 2, 7, 8, 10, 11]);

        let values: Vec<i32> = array.read(&[1, 1], &[2, 2], None).unwrap();
        assert_eq!(values, vec![4, 5, 7, 8]);

        let short = [true, false];
        let bad = [Some(&short[..]), None];
        assert!(matches!(
            array.read::<u8>(&[0, 0], &[4, 3], Some(&bad)),
            Err(GdsError::SelectionMismatch(_))
        ));
        assert!(matches!(
            array.read::<u8>(&[3, 0], &[2, 3], None),
            Err(GdsError::IndexOutOfRange(_))
        ));
    }

    #[test]
    fn test_read_plan_minimizes_codec_calls() {
        let array = GdsArray::new(ElementKind::UInt16, &[4, 3, 5]).unwrap();

        let plan = array.plan_read(&[0, 0, 0], &[4, 3, 5], None).unwrap();
        assert_eq!((plan.run_dim, plan.run_count, plan.elements_per_run), (0, 1, 60));

        let outer = [true, false, true, true];
        let plan = array
            .plan_read(&[0, 0, 0], &[4, 3, 5], Some(&[Some(&outer[..]), None, None]))
            .unwrap();
        assert_eq!((plan.run_count, plan.elements_per_run, plan.dense), (3, 15, true));

        let plan = array.plan_read(&[1, 1, 0], &[2, 2, 5], None).unwrap();
        assert_eq!((plan.run_dim, plan.run_count, plan.elements_per_run), (1, 2, 10));

        let inner = [true, false, true, false, false];
        let plan = array
            .plan_read(&[0, 0, 0], &[4, 3, 5], Some(&[None, None, Some(&inner[..])]))
            .unwrap();
        assert_eq!((plan.run_count, plan.elements_per_run, plan.dense), (12, 3, false));
        assert_eq!(plan.element_count, 24);
    }

    #[test]
    fn test_set_dim_length_moves_rows() {
        let kind = ElementKind::bits(3, false).unwrap();
        let mut array = GdsArray::new(kind, &[0, 3]).unwrap();
        array.append(&[1u8, 2, 3, 4, 5, 6, 7, 1, 2]).unwrap();

        array.set_dim_length(1, 4).unwrap();
        let grown: Vec<u8> = array.read_all().unwrap();
        assert_eq!(grown, vec![1, 2, 3, 0, 4, 5, 6, 0, 7, 1, 2, 0]);

        array.set_dim_length(1, 2).unwrap();
        let shrunk: Vec<u8> = array.read_all().unwrap();
        assert_eq!(shrunk, vec![1, 2, 4, 5, 7, 1]);
        assert_eq!(array.total_count(), 6);

        array.set_dim_length(0, 2).unwrap();
        assert_eq!(array.read_all::<u8>().unwrap(), vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_resize_is_idempotent() {
        let mut array = matrix_4x3();
        array.set_dim_length(1, 5).unwrap();
        let once: Vec<u8> = array.read_all().unwrap();
        let size = array.allocator().size();

        array.set_dim_length(1, 5).unwrap();
        assert_eq!(array.read_all::<u8>().unwrap(), once);
        assert_eq!(array.allocator().size(), size);
        assert_eq!(&once[..5], &[0, 1, 2, 0, 0]);
    }

    #[test]
    fn test_write_grows_outer_dimension() {
        let mut array = matrix_4x3();
        array.write(&[3, 1], &[2, 2], &[90u8, 91, 92, 93]).unwrap();
        assert_eq!(array.dims(), vec![5, 3]);
        let tail: Vec<u8> = array.read(&[3, 0], &[2, 3], None).unwrap();
        assert_eq!(tail, vec![9, 90, 91, 0, 92, 93]);

        assert!(array.write_data(&[5, 0], &[1, 3], &[1u8, 2, 3]).is_err());
    }

    #[test]
    fn test_write_selected() {
        let mut array = matrix_4x3();
        let cols = [true, false, true];
        array
            .write_selected(&[1, 0], &[1, 3], Some(&[None, Some(&cols[..])]), &[40u8, 50])
            .unwrap();
        assert_eq!(array.read::<u8>(&[1, 0], &[1, 3], None).unwrap(), vec![40, 4, 50]);
        assert!(array.write_data(&[0, 0], &[1, 3], &[1u8]).is_err());
    }

    #[test]
    fn test_add_and_delete_dim() {
        let mut array = GdsArray::new(ElementKind::Int32, &[3]).unwrap();
        array.write_data(&[0], &[3], &[-1i32, 0, 1]).unwrap();
        array.add_dim(2).unwrap();
        assert_eq!(array.dims(), vec![2, 3]);
        assert_eq!(array.read_all::<i32>().unwrap(), vec![-1, 0, 1, 0, 0, 0]);

        assert!(array.delete_dim().is_err());
        array.set_dim_length(0, 1).unwrap();
        array.delete_dim().unwrap();
        assert_eq!(array.dims(), vec![3]);
        assert_eq!(array.read_all::<i32>().unwrap(), vec![-1, 0, 1]);
    }

    #[test]
    fn test_scalar() {
        let mut array = GdsArray::new(ElementKind::Float64, &[]).unwrap();
        assert_eq!(array.total_count(), 1);
        array.write_data(&[], &[], &[2.5f64]).unwrap();
        assert_eq!(array.read::<f64>(&[], &[], None).unwrap(), vec![2.5]);
        assert!(array.append(&[1.0f64]).is_err());
        array.add_dim(2).unwrap();
        assert_eq!(array.read_all::<f64>().unwrap(), vec![2.5, 0.0]);
    }

    #[test]
    fn test_strings_widen() {
        let mut array =
            GdsArray::new(ElementKind::fixed_str(StrEncoding::Utf8, 0), &[0]).unwrap();
        array.append_strings(&["rs1", "rs2"]).unwrap();
        array.append_strings(&["rs12345"]).unwrap();
        assert_eq!(array.kind(), ElementKind::fixed_str(StrEncoding::Utf8, 7));
        assert_eq!(
            array.read_strings(&[0], &[3], None).unwrap(),
            vec!["rs1", "rs2", "rs12345"]
        );
        let mask = [true, false, true];
        assert_eq!(
            array.read_strings(&[0], &[3], Some(&[Some(&mask[..])])).unwrap(),
            vec!["rs1", "rs12345"]
        );
        array.write_strings(&[1], &[1], &["chr22_long"]).unwrap();
        assert_eq!(array.read_strings(&[1], &[1], None).unwrap(), vec!["chr22_long"]);
        assert!(array.append(&[1u8]).is_err());
    }

    #[test]
    fn test_compressed_append_then_read() {
        let store = new_store();
        let stream = store.stream(store.new_stream().unwrap()).unwrap();
        let options = OpenOptions::new().with_chunk_size(16);
        let mut array = GdsArray::new_streamed(
            ElementKind::bits(2, false).unwrap(),
            &[0, 5],
            stream,
            CompressionSpec::parse("ZIP").unwrap(),
            &options,
        )
        .unwrap();

        let values: Vec<u8> = (0..103).map(|i| (i * 7 % 4) as u8).collect();
        for chunk in values.chunks(7) {
            array.append(chunk).unwrap();
        }
        assert_eq!(array.total_count(), 100);
        assert!(array.read_all::<u8>().is_err());
        assert!(array.write_data(&[0, 0], &[1, 5], &[0u8; 5]).is_err());

        array.close_writer().unwrap();
        assert!(!array.is_writer_open());
        assert_eq!(array.read_all::<u8>().unwrap(), values[..100].to_vec());

        let err = array.append(&[1u8]).unwrap_err();
        assert!(err.to_string().contains("read mode"));

        let desc = array.describe("genotype");
        assert_eq!(desc.coder, "ZIP");
        assert_eq!(desc.raw_size, 26);
        assert!(desc.stored_size > 0);
    }

    #[test]
    fn test_save_and_load_fields() {
        let store = new_store();
        let stream = store.stream(store.new_stream().unwrap()).unwrap();
        let options = OpenOptions::default();
        let mut array = GdsArray::new_streamed(
            ElementKind::Int16,
            &[0, 2],
            stream,
            CompressionSpec::none(),
            &options,
        )
        .unwrap();
        array.append(&[1i16, -2, 3, -4, 5]).unwrap();

        let mut w = StructWriter::new();
        w.begin_struct();
        array.save_fields(&mut w).unwrap();
        w.end_struct().unwrap();
        let block = StructReader::parse(&w.into_bytes().unwrap()).unwrap();

        let loaded = GdsArray::load(ElementKind::Int16, &block, &store, &options).unwrap();
        assert_eq!(loaded.dims(), vec![2, 2]);
        assert_eq!(loaded.current_count(), 5);
        assert_eq!(loaded.read_all::<i16>().unwrap(), vec![1, -2, 3, -4]);
    }

    #[test]
    fn test_set_compression_reencodes_stream() {
        let store = new_store();
        let stream = store.stream(store.new_stream().unwrap()).unwrap();
        let mut array = GdsArray::new_streamed(
            ElementKind::UInt16,
            &[0, 4],
            stream,
            CompressionSpec::none(),
            &OpenOptions::default(),
        )
        .unwrap();
        let values: Vec<u16> = (0..2000).map(|i| (i % 7) as u16).collect();
        array.append(&values).unwrap();
        let id = array.stream_id().unwrap();
        assert_eq!(store.stream_len(id).unwrap(), 4000);

        let zip = CompressionSpec::parse("ZIP").unwrap();
        array.set_compression(&zip).unwrap();
        assert_eq!(array.compression(), zip);
        assert!(!array.is_writer_open());
        assert!(store.stream_len(id).unwrap() < 4000);
        assert_eq!(array.read_all::<u16>().unwrap(), values);
        let desc = array.describe("dosage");
        assert_eq!((desc.coder.as_str(), desc.raw_size), ("ZIP", 4000));

        array.set_compression(&CompressionSpec::none()).unwrap();
        assert_eq!(store.stream_len(id).unwrap(), 4000);
        array.write_flat(0, &[9u16]).unwrap();
        let mut first = [0u16; 2];
        array.read_flat(0, &mut first).unwrap();
        assert_eq!(first, [9, 1]);

        let mut heap = matrix_4x3();
        assert!(matches!(heap.set_compression(&zip), Err(GdsError::Configuration(_))));
    }

    #[test]
    fn test_set_compression_finishes_open_writer() {
        let store = new_store();
        let stream = store.stream(store.new_stream().unwrap()).unwrap();
        let mut array = GdsArray::new_streamed(
            ElementKind::bits(2, false).unwrap(),
            &[0, 5],
            stream,
            CompressionSpec::parse("ZIP").unwrap(),
            &OpenOptions::default(),
        )
        .unwrap();
        let values: Vec<u8> = (0..10).map(|i| (i % 4) as u8).collect();
        array.append(&values).unwrap();
        assert!(array.is_writer_open());

        array.set_compression(&CompressionSpec::parse("ZSTD").unwrap()).unwrap();
        assert!(!array.is_writer_open());
        assert!(array.remainder().is_empty());
        assert_eq!(array.read_all::<u8>().unwrap(), values);
    }

    #[test]
    fn test_cache_writes_back_on_flush() {
        let store = new_store();
        let stream = store.stream(store.new_stream().unwrap()).unwrap();
        let mut array = GdsArray::new_streamed(
            ElementKind::Int32,
            &[0, 2],
            stream,
            CompressionSpec::parse("ZIP").unwrap(),
            &OpenOptions::default(),
        )
        .unwrap();
        array.append(&[1i32, 2, 3, 4]).unwrap();
        assert!(array.cache().is_err());

        array.close_writer().unwrap();
        array.cache().unwrap();
        assert_eq!(array.load_mode(), LoadMode::InMemory);
        assert!(array.is_writable());
        array.write_flat(1, &[20i32]).unwrap();
        array.append(&[5i32, 6]).unwrap();
        array.flush().unwrap();
        assert!(array.describe("x").stored_size > 0);

        array.set_load_mode(LoadMode::Streamed).unwrap();
        assert!(!array.is_writable());
        assert_eq!(array.dims(), vec![3, 2]);
        assert_eq!(array.read_all::<i32>().unwrap(), vec![1, 20, 3, 4, 5, 6]);
    }

    #[test]
    fn test_in_memory_array_cannot_switch_mode() {
        let mut array = matrix_4x3();
        assert_eq!(array.load_mode(), LoadMode::InMemory);
        assert!(array.set_load_mode(LoadMode::InMemory).is_ok());
        assert!(array.set_load_mode(LoadMode::Streamed).is_err());
    }
}
