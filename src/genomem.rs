//! Genotype caches over a workspace
//!
//! [`BufferedAxis`] keeps a window of consecutive SNPs or samples in memory
//! and reloads it when an index outside the window is requested.
//! [`PackedGenotypes`] holds the whole selected matrix at 2 bits per
//! genotype, one row per sample.

use crate::error::{GdsError, Result};
use crate::workspace::{GenotypeWorkspace, Orientation, ScanAxis};
use std::ops::Range;

/// Positions a SNP window holds by default
pub const DEFAULT_SNP_BUFFER: usize = 128;

/// Positions a sample window holds by default
pub const DEFAULT_SAMPLE_BUFFER: usize = 32;

/// Expected order of the indices requested from a [`BufferedAxis`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPattern {
    /// A reload starts the window at the requested index
    Increasing,
    /// A reload ends the window at the requested index
    Decreasing,
    /// A reload centers the window on the requested index
    Random,
}

/// Pack genotypes 4 per byte, lowest bits first. Only the low 2 bits of
/// each value are kept.
pub fn pack_genotypes(src: &[u8], dest: &mut Vec<u8>) {
    dest.clear();
    dest.extend(src.chunks(4).map(|quad| {
        quad.iter()
            .enumerate()
            .fold(0u8, |byte, (i, &g)| byte | ((g & 0x03) << (2 * i)))
    }));
}

/// Unpack `n` genotypes written by [`pack_genotypes`]
pub fn unpack_genotypes(src: &[u8], n: usize, dest: &mut Vec<u8>) {
    dest.clear();
    dest.extend((0..n).map(|i| (src[i / 4] >> (2 * (i % 4))) & 0x03));
}

/// Sliding window over one axis of a workspace
#[derive(Debug)]
pub struct BufferedAxis<'w, 'a> {
    workspace: &'w GenotypeWorkspace<'a>,
    axis: ScanAxis,
    pattern: AccessPattern,
    capacity: usize,
    stride: usize,
    window: Range<usize>,
    buffer: Vec<u8>,
    loads: usize,
}

impl<'w, 'a> BufferedAxis<'w, 'a> {
    /// Window of `capacity` positions along `axis`; 0 picks
    /// [`DEFAULT_SNP_BUFFER`] or [`DEFAULT_SAMPLE_BUFFER`]
    pub fn new(
        workspace: &'w GenotypeWorkspace<'a>,
        axis: ScanAxis,
        pattern: AccessPattern,
        capacity: usize,
    ) -> Result<Self> {
        if !workspace.is_bound() {
            return Err(GdsError::Unbound);
        }
        let (default, stride) = match axis {
            ScanAxis::Snp => (DEFAULT_SNP_BUFFER, workspace.sample_count()),
            ScanAxis::Sample => (DEFAULT_SAMPLE_BUFFER, workspace.snp_count()),
        };
        let capacity = if capacity == 0 { default } else { capacity };
        Ok(Self {
            workspace,
            axis,
            pattern,
            capacity,
            stride,
            window: 0..0,
            buffer: Vec::new(),
            loads: 0,
        })
    }

    /// Selected positions along the axis
    pub fn len(&self) -> usize {
        self.workspace.axis_count(self.axis)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Genotypes per position
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Positions currently held
    pub fn window(&self) -> Range<usize> {
        self.window.clone()
    }

    /// Number of window reloads so far
    pub fn loads(&self) -> usize {
        self.loads
    }

    /// Genotypes of the `index`-th selected position
    pub fn read(&mut self, index: usize) -> Result<&[u8]> {
        self.require(index)?;
        let offset = (index - self.window.start) * self.stride;
        Ok(&self.buffer[offset..offset + self.stride])
    }

    /// Genotypes of the `index`-th selected position, packed 4 per byte
    pub fn read_packed(&mut self, index: usize, out: &mut Vec<u8>) -> Result<()> {
        let row = self.read(index)?;
        pack_genotypes(row, out);
        Ok(())
    }

    fn require(&mut self, index: usize) -> Result<()> {
        if self.window.contains(&index) {
            return Ok(());
        }
        let total = self.len();
        if index >= total {
            return Err(GdsError::out_of_range(format!(
                "position {} of {} selected",
                index, total
            )));
        }
        let size = self.capacity.min(total);
        let start = match self.pattern {
            AccessPattern::Increasing => index,
            AccessPattern::Decreasing => (index + 1).saturating_sub(size),
            AccessPattern::Random => index.saturating_sub(size / 2),
        }
        .min(total - size);

        // rows of one position must be contiguous
        let want = match self.axis {
            ScanAxis::Snp => Orientation::SampleMajor,
            ScanAxis::Sample => Orientation::SnpMajor,
        };
        self.buffer.resize(size * self.stride, 0);
        self.workspace
            .read_axis(self.axis, start, size, want, &mut self.buffer)?;
        self.window = start..start + size;
        self.loads += 1;
        tracing::trace!(axis = ?self.axis, start, size, "reloaded genotype window");
        Ok(())
    }
}

/// Selected genotype matrix at 2 bits per genotype, rows by sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedGenotypes {
    samples: usize,
    snps: usize,
    row_bytes: usize,
    data: Vec<u8>,
}

impl PackedGenotypes {
    /// Pack the selected samples and SNPs of `workspace`
    pub fn from_workspace(workspace: &GenotypeWorkspace<'_>) -> Result<Self> {
        if !workspace.is_bound() {
            return Err(GdsError::Unbound);
        }
        let (samples, snps) = (workspace.sample_count(), workspace.snp_count());
        let row_bytes = snps.div_ceil(4);
        let mut data = Vec::new();
        data.try_reserve_exact(samples * row_bytes)?;

        let mut block = Vec::new();
        let mut packed = Vec::with_capacity(row_bytes);
        let mut start = 0;
        while start < samples && snps > 0 {
            let count = DEFAULT_SAMPLE_BUFFER.min(samples - start);
            block.resize(count * snps, 0);
            workspace.read_samples(start, count, Orientation::SnpMajor, &mut block)?;
            for row in block.chunks(snps) {
                pack_genotypes(row, &mut packed);
                data.extend_from_slice(&packed);
            }
            start += count;
        }
        tracing::debug!(samples, snps, bytes = data.len(), "packed genotype matrix");
        Ok(Self {
            samples,
            snps,
            row_bytes,
            data,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.samples
    }

    pub fn snp_count(&self) -> usize {
        self.snps
    }

    /// Bytes per sample row
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    /// Genotype of `sample` at `snp`.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of range.
    pub fn get(&self, sample: usize, snp: usize) -> u8 {
        assert!(
            sample < self.samples && snp < self.snps,
            "genotype ({}, {}) outside a {}x{} matrix",
            sample,
            snp,
            self.samples,
            self.snps
        );
        (self.data[sample * self.row_bytes + snp / 4] >> (2 * (snp % 4))) & 0x03
    }

    /// Packed row of `sample`
    pub fn row(&self, sample: usize) -> &[u8] {
        &self.data[sample * self.row_bytes..(sample + 1) * self.row_bytes]
    }

    /// Genotypes of `sample`, one per byte
    pub fn unpack_row(&self, sample: usize, out: &mut Vec<u8>) {
        unpack_genotypes(self.row(sample), self.snps, out);
    }

    /// Packed bytes, row after row
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::GdsArray;
    use crate::types::ElementKind;

    /// 5 samples x 7 SNPs stored SNP-major; genotype (s, j) = (s + 2j) % 4
    fn geno() -> GdsArray {
        let mut array = GdsArray::new(ElementKind::bits(2, false).unwrap(), &[0, 7]).unwrap();
        let values: Vec<u8> = (0..5)
            .flat_map(|s| (0..7).map(move |j| ((s + 2 * j) % 4) as u8))
            .collect();
        array.append(&values).unwrap();
        array
    }

    fn expected(s: usize, j: usize) -> u8 {
        ((s + 2 * j) % 4) as u8
    }

    #[test]
    fn test_pack_and_unpack() {
        let mut packed = Vec::new();
        pack_genotypes(&[1, 2, 3, 0, 7], &mut packed);
        assert_eq!(packed, vec![0b00_11_10_01, 0b11]);
        let mut back = Vec::new();
        unpack_genotypes(&packed, 5, &mut back);
        assert_eq!(back, vec![1, 2, 3, 0, 3]);
    }

    #[test]
    fn test_window_follows_access_pattern() {
        let array = geno();
        let mut ws = GenotypeWorkspace::new();
        ws.bind_array(&array, Orientation::SnpMajor).unwrap();

        let mut snps = BufferedAxis::new(&ws, ScanAxis::Snp, AccessPattern::Increasing, 3).unwrap();
        for j in 0..7 {
            let row = snps.read(j).unwrap().to_vec();
            assert_eq!(row, (0..5).map(|s| expected(s, j)).collect::<Vec<_>>());
        }
        assert_eq!(snps.loads(), 3);
        assert_eq!(snps.window(), 4..7);

        let mut down = BufferedAxis::new(&ws, ScanAxis::Snp, AccessPattern::Decreasing, 3).unwrap();
        down.read(5).unwrap();
        assert_eq!(down.window(), 3..6);
        down.read(1).unwrap();
        assert_eq!(down.window(), 0..3);

        let mut random = BufferedAxis::new(&ws, ScanAxis::Snp, AccessPattern::Random, 4).unwrap();
        random.read(3).unwrap();
        assert_eq!(random.window(), 1..5);
        random.read(6).unwrap();
        assert_eq!(random.window(), 3..7);
        assert!(random.read(7).is_err());
    }

    #[test]
    fn test_sample_window_default_and_packed_read() {
        let array = geno();
        let mut ws = GenotypeWorkspace::new();
        ws.bind_array(&array, Orientation::SnpMajor).unwrap();
        ws.set_sample_selection(&[true, false, true, true, true]).unwrap();

        let mut samples = BufferedAxis::new(&ws, ScanAxis::Sample, AccessPattern::Random, 0).unwrap();
        assert_eq!(samples.capacity(), DEFAULT_SAMPLE_BUFFER);
        assert_eq!(samples.stride(), 7);
        // second selected sample is sample 2
        let row = samples.read(1).unwrap().to_vec();
        assert_eq!(row, (0..7).map(|j| expected(2, j)).collect::<Vec<_>>());
        assert_eq!(samples.window(), 0..4);

        let mut packed = Vec::new();
        samples.read_packed(1, &mut packed).unwrap();
        let mut direct = Vec::new();
        pack_genotypes(&row, &mut direct);
        assert_eq!(packed, direct);
        assert_eq!(samples.loads(), 1);
    }

    #[test]
    fn test_packed_matrix_matches_workspace() {
        let array = geno();
        let mut ws = GenotypeWorkspace::new();
        ws.bind_array(&array, Orientation::SnpMajor).unwrap();
        ws.set_snp_selection(&[true, true, false, true, true, true, true]).unwrap();

        let packed = ws.pack().unwrap();
        assert_eq!((packed.sample_count(), packed.snp_count()), (5, 6));
        assert_eq!(packed.row_bytes(), 2);
        assert_eq!(packed.as_bytes().len(), 10);
        let kept = ws.snp_index().to_vec();
        for s in 0..5 {
            for (j, &snp) in kept.iter().enumerate() {
                assert_eq!(packed.get(s, j), expected(s, snp));
            }
        }
        let mut row = Vec::new();
        packed.unpack_row(4, &mut row);
        assert_eq!(row, kept.iter().map(|&j| expected(4, j)).collect::<Vec<_>>());

        assert!(matches!(
            PackedGenotypes::from_workspace(&GenotypeWorkspace::new()),
            Err(GdsError::Unbound)
        ));
    }
}
