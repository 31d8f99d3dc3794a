//! Dimension layout of an array: lengths, strides and element counts

use crate::error::{GdsError, Result};
use crate::utils::bytes_for_bits;
use serde::{Deserialize, Serialize};

/// One dimension of an array, outermost first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimItem {
    /// Number of indices along this dimension
    pub length: u64,
    /// Elements spanned by one index step (product of inner lengths)
    pub element_count: u64,
    /// Bits spanned by one index step
    pub element_stride: u64,
}

/// Row-major dimension layout; the last dimension is contiguous
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimLayout {
    dims: Vec<DimItem>,
    bit_width: u64,
}

impl DimLayout {
    /// Layout with the given lengths (outermost first) and element width
    pub fn new(lengths: &[u64], bit_width: u64) -> Self {
        let mut layout = Self {
            dims: lengths
                .iter()
                .map(|&length| DimItem {
                    length,
                    element_count: 0,
                    element_stride: 0,
                })
                .collect(),
            bit_width,
        };
        layout.recompute();
        layout
    }

    /// Re-derive strides and counts from the lengths, innermost first
    fn recompute(&mut self) {
        let mut count = 1u64;
        for item in self.dims.iter_mut().rev() {
            item.element_count = count;
            item.element_stride = count * self.bit_width;
            count = count.saturating_mul(item.length);
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[DimItem] {
        &self.dims
    }

    pub fn lengths(&self) -> Vec<u64> {
        self.dims.iter().map(|d| d.length).collect()
    }

    pub fn length(&self, dim: usize) -> u64 {
        self.dims.get(dim).map_or(0, |d| d.length)
    }

    pub fn bit_width(&self) -> u64 {
        self.bit_width
    }

    pub fn set_bit_width(&mut self, bit_width: u64) {
        self.bit_width = bit_width;
        self.recompute();
    }

    /// Elements in one outermost index step (1 for scalars)
    pub fn unit_count(&self) -> u64 {
        self.dims.first().map_or(1, |d| d.element_count)
    }

    /// Elements addressed by every dimension together (1 for scalars)
    pub fn element_capacity(&self) -> u64 {
        self.dims.iter().map(|d| d.length).product()
    }

    /// Bytes occupied by `elements` elements
    pub fn bytes_for(&self, elements: u64) -> u64 {
        bytes_for_bits(elements * self.bit_width)
    }

    pub fn set_length(&mut self, dim: usize, length: u64) -> Result<()> {
        let rank = self.dims.len();
        let item = self.dims.get_mut(dim).ok_or_else(|| {
            GdsError::invalid_dimension(format!("dimension {} of a rank-{} array", dim, rank))
        })?;
        item.length = length;
        self.recompute();
        Ok(())
    }

    /// Insert a new outermost dimension
    pub fn insert_outer(&mut self, length: u64) {
        self.dims.insert(
            0,
            DimItem {
                length,
                element_count: 0,
                element_stride: 0,
            },
        );
        self.recompute();
    }

    /// Remove the outermost dimension
    pub fn remove_outer(&mut self) -> Result<DimItem> {
        if self.dims.is_empty() {
            return Err(GdsError::invalid_dimension("a scalar has no dimension to delete"));
        }
        let item = self.dims.remove(0);
        self.recompute();
        Ok(item)
    }

    /// Flat element index of the multi-index `index`
    pub fn flat_index(&self, index: &[u64]) -> u64 {
        index
            .iter()
            .zip(&self.dims)
            .map(|(&i, d)| i * d.element_count)
            .sum()
    }

    /// Validate a rectangular region against the current lengths
    pub fn check_region(&self, start: &[u64], length: &[u64]) -> Result<()> {
        if start.len() != self.rank() || length.len() != self.rank() {
            return Err(GdsError::invalid_dimension(format!(
                "region has {}/{} entries for a rank-{} array",
                start.len(),
                length.len(),
                self.rank()
            )));
        }
        for (i, ((&s, &l), d)) in start.iter().zip(length).zip(&self.dims).enumerate() {
            if s.checked_add(l).map_or(true, |end| end > d.length) {
                return Err(GdsError::out_of_range(format!(
                    "dimension {}: start {} + length {} exceeds {}",
                    i, s, l, d.length
                )));
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> String {
        self.lengths()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" x ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strides() {
        let layout = DimLayout::new(&[4, 3, 5], 2);
        let dims = layout.dims();
        assert_eq!(dims[2].element_count, 1);
        assert_eq!(dims[2].element_stride, 2);
        assert_eq!(dims[1].element_count, 5);
        assert_eq!(dims[1].element_stride, 10);
        assert_eq!(dims[0].element_count, 15);
        assert_eq!(dims[0].element_stride, dims[1].length * dims[1].element_stride);
        assert_eq!(layout.unit_count(), 15);
        assert_eq!(layout.element_capacity(), 60);
        assert_eq!(layout.bytes_for(60), 15);
        assert_eq!(layout.flat_index(&[1, 2, 3]), 15 + 10 + 3);
    }

    #[test]
    fn test_scalar() {
        let layout = DimLayout::new(&[], 32);
        assert_eq!(layout.rank(), 0);
        assert_eq!(layout.unit_count(), 1);
        assert_eq!(layout.element_capacity(), 1);
    }

    #[test]
    fn test_insert_and_remove_outer() {
        let mut layout = DimLayout::new(&[3], 8);
        layout.insert_outer(2);
        assert_eq!(layout.lengths(), vec![2, 3]);
        assert_eq!(layout.unit_count(), 3);
        layout.set_length(1, 6).unwrap();
        assert_eq!(layout.unit_count(), 6);
        assert_eq!(layout.remove_outer().unwrap().length, 2);
        assert_eq!(layout.lengths(), vec![6]);
        assert!(layout.set_length(3, 1).is_err());
    }

    #[test]
    fn test_check_region() {
        let layout = DimLayout::new(&[4, 3], 8);
        assert!(layout.check_region(&[1, 0], &[3, 3]).is_ok());
        assert!(matches!(
            layout.check_region(&[2, 0], &[3, 3]),
            Err(GdsError::IndexOutOfRange(_))
        ));
        assert!(matches!(
            layout.check_region(&[0], &[1]),
            Err(GdsError::InvalidDimension(_))
        ));
    }
}
