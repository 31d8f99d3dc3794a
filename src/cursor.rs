//! Element cursors
//!
//! A cursor is a flat element position inside one array. Navigation is
//! bounds-checked against the committed element count; bulk transfers stop
//! at the end and report how many elements moved.

use crate::array::GdsArray;
use crate::codec::{self, Element};
use crate::error::{GdsError, Result};
use std::cmp::Ordering;

fn offset_index(index: u64, delta: i64, total: u64) -> Result<u64> {
    let target = index as i128 + delta as i128;
    if target < 0 || target > total as i128 {
        return Err(GdsError::out_of_range(format!(
            "cursor at {} moved by {} leaves 0..={}",
            index, delta, total
        )));
    }
    Ok(target as u64)
}

/// Read-only cursor
#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    array: &'a GdsArray,
    index: u64,
}

impl<'a> Cursor<'a> {
    /// Cursor on the first element
    pub fn begin(array: &'a GdsArray) -> Self {
        Self { array, index: 0 }
    }

    /// Cursor one past the last committed element
    pub fn end(array: &'a GdsArray) -> Self {
        Self {
            array,
            index: array.total_count(),
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// Bit offset of the current element in the array data
    pub fn bit_offset(&self) -> u64 {
        self.index * self.array.bit_width()
    }

    pub fn at_end(&self) -> bool {
        self.index >= self.array.total_count()
    }

    /// Step forward one element; stays put at the end
    pub fn advance(&mut self) {
        if !self.at_end() {
            self.index += 1;
        }
    }

    pub fn retreat(&mut self) -> Result<()> {
        self.seek(-1)
    }

    /// Move by `delta` elements
    pub fn seek(&mut self, delta: i64) -> Result<()> {
        self.index = offset_index(self.index, delta, self.array.total_count())?;
        Ok(())
    }

    pub fn get<T: Element>(&self) -> Result<T> {
        let mut out = [T::default()];
        self.array.read_flat(self.index, &mut out)?;
        Ok(out[0])
    }

    pub fn get_string(&self) -> Result<String> {
        if self.at_end() {
            return Err(GdsError::out_of_range("cursor is at the end of the array"));
        }
        let mut strings = codec::read_strings(self.array.allocator(), self.array.kind(), self.index, 1)?;
        Ok(strings.pop().unwrap_or_default())
    }

    /// Read up to `buf.len()` elements and advance past them
    pub fn read_into<T: Element>(&mut self, buf: &mut [T]) -> Result<usize> {
        let remaining = self.array.total_count() - self.index.min(self.array.total_count());
        let n = (buf.len() as u64).min(remaining) as usize;
        self.array.read_flat(self.index, &mut buf[..n])?;
        self.index += n as u64;
        Ok(n)
    }
}

impl PartialEq for Cursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.array, other.array) && self.index == other.index
    }
}

impl PartialOrd for Cursor<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        std::ptr::eq(self.array, other.array).then(|| self.index.cmp(&other.index))
    }
}

/// Cursor with write access
#[derive(Debug)]
pub struct CursorMut<'a> {
    array: &'a mut GdsArray,
    index: u64,
}

impl<'a> CursorMut<'a> {
    pub fn begin(array: &'a mut GdsArray) -> Self {
        Self { array, index: 0 }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn at_end(&self) -> bool {
        self.index >= self.array.total_count()
    }

    pub fn advance(&mut self) {
        if !self.at_end() {
            self.index += 1;
        }
    }

    pub fn retreat(&mut self) -> Result<()> {
        self.seek(-1)
    }

    pub fn seek(&mut self, delta: i64) -> Result<()> {
        self.index = offset_index(self.index, delta, self.array.total_count())?;
        Ok(())
    }

    pub fn get<T: Element>(&self) -> Result<T> {
        let mut out = [T::default()];
        self.array.read_flat(self.index, &mut out)?;
        Ok(out[0])
    }

    /// Overwrite the current element
    pub fn set<T: Element>(&mut self, value: T) -> Result<()> {
        self.array.write_flat(self.index, &[value])
    }

    pub fn get_string(&self) -> Result<String> {
        Cursor {
            array: &*self.array,
            index: self.index,
        }
        .get_string()
    }

    /// Overwrite the current string element
    pub fn write_str(&mut self, value: &str) -> Result<()> {
        if self.at_end() {
            return Err(GdsError::out_of_range("cursor is at the end of the array"));
        }
        self.array.write_strings_flat(self.index, &[value])
    }

    /// Write up to `buf.len()` elements and advance past them
    pub fn write_from<T: Element>(&mut self, buf: &[T]) -> Result<usize> {
        let remaining = self.array.total_count() - self.index.min(self.array.total_count());
        let n = (buf.len() as u64).min(remaining) as usize;
        self.array.write_flat(self.index, &buf[..n])?;
        self.index += n as u64;
        Ok(n)
    }
}
