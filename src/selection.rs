//! Selection masks and their reduction to contiguous envelopes

use crate::error::{GdsError, Result};

/// Contiguous envelope of a selection mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionInfo {
    /// Index of the first selected position (0 when nothing is selected)
    pub start: usize,
    /// Span from the first to the last selected position, inclusive
    pub block_len: usize,
    /// Selected positions inside the span
    pub valid_count: usize,
    /// Every position inside the span is selected
    pub dense: bool,
}

impl SelectionInfo {
    /// Envelope of an unmasked dimension of `length`
    pub fn full(length: usize) -> Self {
        Self {
            start: 0,
            block_len: length,
            valid_count: length,
            dense: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.valid_count == 0
    }
}

/// Reduce a mask over a dimension of `length` to its envelope
pub fn fill_selection(mask: Option<&[bool]>, length: usize) -> SelectionInfo {
    let Some(mask) = mask else {
        return SelectionInfo::full(length);
    };
    let Some(first) = mask.iter().position(|&b| b) else {
        return SelectionInfo {
            start: 0,
            block_len: 0,
            valid_count: 0,
            dense: true,
        };
    };
    let last = mask.iter().rposition(|&b| b).unwrap_or(first);
    let block_len = last - first + 1;
    let valid_count = mask[first..=last].iter().filter(|&&b| b).count();
    SelectionInfo {
        start: first,
        block_len,
        valid_count,
        dense: valid_count == block_len,
    }
}

/// Check that `mask` covers exactly `length` positions
pub fn check_mask(mask: &[bool], length: usize, what: &str) -> Result<()> {
    if mask.len() != length {
        return Err(GdsError::SelectionMismatch(format!(
            "{} mask has {} entries for a length of {}",
            what,
            mask.len(),
            length
        )));
    }
    Ok(())
}

/// Positions set in `mask`
pub fn selected_indices(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &b)| b.then_some(i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_mask() {
        let info = fill_selection(Some(&[]), 0);
        assert_eq!((info.start, info.block_len, info.valid_count, info.dense), (0, 0, 0, true));
    }

    #[test]
    fn test_all_false() {
        let info = fill_selection(Some(&[false, false, false]), 3);
        assert_eq!((info.start, info.block_len, info.valid_count, info.dense), (0, 0, 0, true));
        assert!(info.is_empty());
    }

    #[test]
    fn test_sparse() {
        let info = fill_selection(Some(&[false, true, true, false, true]), 5);
        assert_eq!(info.start, 1);
        assert_eq!(info.block_len, 4);
        assert_eq!(info.valid_count, 3);
        assert!(!info.dense);
    }

    #[test]
    fn test_all_true_and_none() {
        let info = fill_selection(Some(&[true, true, true]), 3);
        assert_eq!((info.start, info.block_len, info.valid_count, info.dense), (0, 3, 3, true));
        assert_eq!(fill_selection(None, 7), SelectionInfo::full(7));
    }

    #[test]
    fn test_mask_helpers() {
        assert!(check_mask(&[true, false], 2, "sample").is_ok());
        assert!(matches!(
            check_mask(&[true], 2, "sample"),
            Err(GdsError::SelectionMismatch(_))
        ));
        assert_eq!(selected_indices(&[false, true, false, true]), vec![1, 3]);
    }
}
