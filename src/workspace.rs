//! Genotype workspace: a selection- and orientation-aware 2-D view
//!
//! The genotype array is stored either as `[sample][snp]` (SNP-major, the
//! SNP index varies fastest) or as `[snp][sample]` (sample-major). Reads
//! name the orientation they want the output in; a transpose only happens
//! when it differs from storage and more than one row is requested.

use crate::array::GdsArray;
use crate::error::{GdsError, RecordError, Result};
use crate::genomem::PackedGenotypes;
use crate::node::GdsNode;
use crate::selection::{check_mask, selected_indices};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Attribute marking `[sample][snp]` storage
pub const SNP_ORDER_ATTR: &str = "snp.order";

/// Attribute marking `[snp][sample]` storage
pub const SAMPLE_ORDER_ATTR: &str = "sample.order";

/// Memory layout of a genotype matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    /// `[sample][snp]`: the SNP index varies fastest
    SnpMajor,
    /// `[snp][sample]`: the sample index varies fastest
    SampleMajor,
}

/// Axis a read or a scan walks along
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanAxis {
    Snp,
    Sample,
}

/// Selected positions of one axis
#[derive(Debug, Clone, Default)]
struct AxisSelection {
    mask: Vec<bool>,
    index: Vec<usize>,
}

impl AxisSelection {
    fn all(len: usize) -> Self {
        Self {
            mask: vec![true; len],
            index: (0..len).collect(),
        }
    }

    fn rebuild(&mut self) {
        self.index = selected_indices(&self.mask);
    }

    /// Keep only positions `start..start + len` of the current selection
    fn extract(&mut self, start: usize, len: usize, what: &str) -> Result<()> {
        if start + len > self.index.len() {
            return Err(GdsError::out_of_range(format!(
                "{} range {}+{} exceeds the {} selected",
                what,
                start,
                len,
                self.index.len()
            )));
        }
        for (i, &pos) in self.index.iter().enumerate() {
            if i < start || i >= start + len {
                self.mask[pos] = false;
            }
        }
        self.rebuild();
        Ok(())
    }
}

/// Genotype view over one rank-2 array
#[derive(Debug, Default)]
pub struct GenotypeWorkspace<'a> {
    geno: Option<&'a GdsArray>,
    orientation: Option<Orientation>,
    samples: AxisSelection,
    snps: AxisSelection,
}

impl<'a> GenotypeWorkspace<'a> {
    /// Unbound workspace
    pub fn new() -> Self {
        Self::default()
    }

    /// Workspace bound to a genotype node
    pub fn from_node(node: &'a GdsNode) -> Result<Self> {
        let mut ws = Self::new();
        ws.bind(node)?;
        Ok(ws)
    }

    /// Bind to an array node; its orientation comes from the `snp.order` /
    /// `sample.order` attribute (SNP-major when neither is set)
    pub fn bind(&mut self, node: &'a GdsNode) -> Result<()> {
        let result = (|| {
            let attrs = node.attrs();
            let orientation = match (attrs.contains(SNP_ORDER_ATTR), attrs.contains(SAMPLE_ORDER_ATTR)) {
                (true, true) => {
                    return Err(GdsError::invalid_dimension(format!(
                        "'{}' carries both {} and {}",
                        node.name(),
                        SNP_ORDER_ATTR,
                        SAMPLE_ORDER_ATTR
                    )))
                }
                (false, true) => Orientation::SampleMajor,
                _ => Orientation::SnpMajor,
            };
            self.bind_array(node.array()?, orientation)
        })();
        result.record_error()
    }

    /// Bind to `array` stored in `orientation`; both selections reset
    pub fn bind_array(&mut self, array: &'a GdsArray, orientation: Orientation) -> Result<()> {
        if array.rank() != 2 {
            return Err(GdsError::invalid_dimension(format!(
                "genotype array has {} dimensions, expected 2",
                array.rank()
            )));
        }
        let (outer, inner) = (array.dim_length(0) as usize, array.dim_length(1) as usize);
        let (n_samples, n_snps) = match orientation {
            Orientation::SnpMajor => (outer, inner),
            Orientation::SampleMajor => (inner, outer),
        };
        self.geno = Some(array);
        self.orientation = Some(orientation);
        self.samples = AxisSelection::all(n_samples);
        self.snps = AxisSelection::all(n_snps);
        tracing::debug!(samples = n_samples, snps = n_snps, ?orientation, "bound genotype workspace");
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.geno.is_some()
    }

    /// Storage orientation
    pub fn orientation(&self) -> Result<Orientation> {
        self.orientation.ok_or(GdsError::Unbound)
    }

    pub fn total_sample_count(&self) -> usize {
        self.samples.mask.len()
    }

    pub fn total_snp_count(&self) -> usize {
        self.snps.mask.len()
    }

    /// Selected samples
    pub fn sample_count(&self) -> usize {
        self.samples.index.len()
    }

    /// Selected SNPs
    pub fn snp_count(&self) -> usize {
        self.snps.index.len()
    }

    pub fn sample_selection(&self) -> &[bool] {
        &self.samples.mask
    }

    pub fn snp_selection(&self) -> &[bool] {
        &self.snps.mask
    }

    /// Positions of the selected samples
    pub fn sample_index(&self) -> &[usize] {
        &self.samples.index
    }

    pub fn snp_index(&self) -> &[usize] {
        &self.snps.index
    }

    /// Rebuild the index arrays from the masks
    pub fn init_selection(&mut self) {
        self.samples.rebuild();
        self.snps.rebuild();
    }

    /// Select every sample and SNP again
    pub fn reset_selection(&mut self) {
        self.samples = AxisSelection::all(self.total_sample_count());
        self.snps = AxisSelection::all(self.total_snp_count());
    }

    /// Intersect the selections with the given masks; returns how many
    /// positions became excluded
    pub fn apply_selection(
        &mut self,
        sample_mask: Option<&[bool]>,
        snp_mask: Option<&[bool]>,
    ) -> Result<usize> {
        self.check_bound()?;
        if let Some(mask) = sample_mask {
            check_mask(mask, self.total_sample_count(), "sample")?;
        }
        if let Some(mask) = snp_mask {
            check_mask(mask, self.total_snp_count(), "SNP")?;
        }
        let before = self.sample_count() + self.snp_count();
        for (selection, mask) in [(&mut self.samples, sample_mask), (&mut self.snps, snp_mask)] {
            if let Some(mask) = mask {
                for (keep, &m) in selection.mask.iter_mut().zip(mask) {
                    *keep &= m;
                }
            }
        }
        self.init_selection();
        Ok(before - self.sample_count() - self.snp_count())
    }

    /// Replace the sample mask
    pub fn set_sample_selection(&mut self, mask: &[bool]) -> Result<()> {
        self.check_bound()?;
        check_mask(mask, self.total_sample_count(), "sample")?;
        self.samples.mask = mask.to_vec();
        self.samples.rebuild();
        Ok(())
    }

    /// Replace the SNP mask
    pub fn set_snp_selection(&mut self, mask: &[bool]) -> Result<()> {
        self.check_bound()?;
        check_mask(mask, self.total_snp_count(), "SNP")?;
        self.snps.mask = mask.to_vec();
        self.snps.rebuild();
        Ok(())
    }

    /// Narrow the SNP selection to its positions `start..start + len`
    pub fn extract_snps(&mut self, start: usize, len: usize) -> Result<()> {
        self.check_bound()?;
        self.snps.extract(start, len, "SNP")
    }

    pub fn extract_samples(&mut self, start: usize, len: usize) -> Result<()> {
        self.check_bound()?;
        self.samples.extract(start, len, "sample")
    }

    fn check_bound(&self) -> Result<()> {
        if self.is_bound() {
            Ok(())
        } else {
            Err(GdsError::Unbound)
        }
    }

    /// Selected count along `axis`
    pub fn axis_count(&self, axis: ScanAxis) -> usize {
        match axis {
            ScanAxis::Snp => self.snp_count(),
            ScanAxis::Sample => self.sample_count(),
        }
    }

    /// Read `count` selected SNPs from the `start`-th one. `out` receives
    /// `count * sample_count()` genotypes laid out in `want` orientation.
    pub fn read_snps(
        &self,
        start: usize,
        count: usize,
        want: Orientation,
        out: &mut [u8],
    ) -> Result<()> {
        self.read_axis(ScanAxis::Snp, start, count, want, out).record_error()
    }

    /// Read `count` selected samples from the `start`-th one. `out` receives
    /// `count * snp_count()` genotypes laid out in `want` orientation.
    pub fn read_samples(
        &self,
        start: usize,
        count: usize,
        want: Orientation,
        out: &mut [u8],
    ) -> Result<()> {
        self.read_axis(ScanAxis::Sample, start, count, want, out).record_error()
    }

    pub(crate) fn read_axis(
        &self,
        axis: ScanAxis,
        start: usize,
        count: usize,
        want: Orientation,
        out: &mut [u8],
    ) -> Result<()> {
        let geno = self.geno.ok_or(GdsError::Unbound)?;
        let storage = self.orientation()?;
        let (along, other, what) = match axis {
            ScanAxis::Snp => (&self.snps, &self.samples, "SNP"),
            ScanAxis::Sample => (&self.samples, &self.snps, "sample"),
        };
        if start + count > along.index.len() || other.index.is_empty() {
            return Err(GdsError::out_of_range(format!(
                "{} block {}+{} of {} selected, {} on the other axis",
                what,
                start,
                count,
                along.index.len(),
                other.index.len()
            )));
        }
        let expected = count * other.index.len();
        if out.len() < expected {
            return Err(GdsError::invalid_dimension(format!(
                "buffer holds {} genotypes, the block has {}",
                out.len(),
                expected
            )));
        }
        if count == 0 {
            return Ok(());
        }

        // envelopes from the first to the last selected position
        let a0 = along.index[start];
        let a1 = along.index[start + count - 1] + 1;
        let o0 = other.index[0];
        let o1 = other.index[other.index.len() - 1] + 1;
        let along_mask = &along.mask[a0..a1];
        let other_mask = &other.mask[o0..o1];

        let along_is_outer = matches!(
            (storage, axis),
            (Orientation::SnpMajor, ScanAxis::Sample) | (Orientation::SampleMajor, ScanAxis::Snp)
        );
        let (start2, len2, masks, shape) = if along_is_outer {
            (
                [a0 as u64, o0 as u64],
                [(a1 - a0) as u64, (o1 - o0) as u64],
                [Some(along_mask), Some(other_mask)],
                (count, other.index.len()),
            )
        } else {
            (
                [o0 as u64, a0 as u64],
                [(o1 - o0) as u64, (a1 - a0) as u64],
                [Some(other_mask), Some(along_mask)],
                (other.index.len(), count),
            )
        };

        if want == storage || count == 1 {
            geno.read_into(&start2, &len2, Some(&masks), &mut out[..expected])?;
        } else {
            let mut buf = vec![0u8; expected];
            geno.read_into(&start2, &len2, Some(&masks), &mut buf)?;
            let stored = ArrayView2::from_shape(shape, &buf)?;
            for (o, &v) in out.iter_mut().zip(stored.t().iter()) {
                *o = v;
            }
        }
        Ok(())
    }

    /// Selected genotypes packed 2 bits each, one row per sample
    pub fn pack(&self) -> Result<PackedGenotypes> {
        PackedGenotypes::from_workspace(self).record_error()
    }

    /// Block of SNPs as a matrix: `(samples, count)` when `want` is
    /// SNP-major, `(count, samples)` otherwise
    pub fn snp_block(&self, start: usize, count: usize, want: Orientation) -> Result<Array2<u8>> {
        let n = self.sample_count();
        let mut data = vec![0u8; n * count];
        self.read_snps(start, count, want, &mut data)?;
        let shape = match want {
            Orientation::SnpMajor => (n, count),
            Orientation::SampleMajor => (count, n),
        };
        Ok(Array2::from_shape_vec(shape, data)?)
    }

    /// Block of samples as a matrix: `(count, snps)` when `want` is
    /// SNP-major, `(snps, count)` otherwise
    pub fn sample_block(&self, start: usize, count: usize, want: Orientation) -> Result<Array2<u8>> {
        let n = self.snp_count();
        let mut data = vec![0u8; n * count];
        self.read_samples(start, count, want, &mut data)?;
        let shape = match want {
            Orientation::SnpMajor => (count, n),
            Orientation::SampleMajor => (n, count),
        };
        Ok(Array2::from_shape_vec(shape, data)?)
    }
}
