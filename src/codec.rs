//! Element codecs: bulk conversion between typed buffers and allocator bytes
//!
//! Byte-aligned kinds are stored little-endian. Bit-packed kinds place each
//! N-bit field LSB-first, crossing byte boundaries without padding. Reads
//! are staged through a fixed-size buffer and then converted to the
//! requested numeric type with `as` semantics (narrowing truncates).

use crate::allocator::Allocator;
use crate::error::{GdsError, Result};
use crate::types::{ElementKind, StrEncoding};
use crate::utils::bytes_for_bits;
use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};

/// Elements decoded per staging pass
pub const STAGING_ELEMENTS: usize = 1024;

/// Numeric buffer element accepted by the codecs
pub trait Element: Copy + Default + Send + Sync + std::fmt::Debug + 'static {
    /// Kind matching this Rust type
    const KIND: ElementKind;

    fn from_i64(v: i64) -> Self;
    fn from_u64(v: u64) -> Self;
    fn from_f64(v: f64) -> Self;
    fn to_i64(self) -> i64;
    fn to_u64(self) -> u64;
    fn to_f64(self) -> f64;
}

macro_rules! impl_element {
    ($($t:ty => $kind:ident),* $(,)?) => {
        $(
            impl Element for $t {
                const KIND: ElementKind = ElementKind::$kind;

                #[inline]
                fn from_i64(v: i64) -> Self { v.as_() }
                #[inline]
                fn from_u64(v: u64) -> Self { v.as_() }
                #[inline]
                fn from_f64(v: f64) -> Self { v.as_() }
                #[inline]
                fn to_i64(self) -> i64 { self.as_() }
                #[inline]
                fn to_u64(self) -> u64 { self.as_() }
                #[inline]
                fn to_f64(self) -> f64 { self.as_() }
            }
        )*
    };
}

impl_element!(
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
);

/// Trailing partial byte of a forward-only bit stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remainder {
    /// Pending bits, LSB-aligned
    pub byte: u8,
    /// Number of valid bits in `byte` (0..8)
    pub bits: u8,
}

impl Remainder {
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }
}

#[inline]
fn low_mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Sign-extend the low `width` bits of `v`
#[inline]
pub fn sign_extend(v: u32, width: u8) -> i32 {
    let shift = 32 - width as u32;
    ((v << shift) as i32) >> shift
}

/// LSB-first bit reader over a byte slice
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u64,
    nbits: u32,
}

impl<'a> BitReader<'a> {
    /// Start reading at bit `bit_offset` of `data`
    pub fn new(data: &'a [u8], bit_offset: u64) -> Self {
        let mut reader = Self {
            data,
            pos: (bit_offset >> 3) as usize,
            acc: 0,
            nbits: 0,
        };
        let shift = (bit_offset & 7) as u32;
        if shift > 0 {
            reader.fill(shift);
            reader.acc >>= shift;
            reader.nbits -= shift;
        }
        reader
    }

    #[inline]
    fn fill(&mut self, want: u32) {
        while self.nbits < want {
            let byte = self.data.get(self.pos).copied().unwrap_or(0);
            self.acc |= (byte as u64) << self.nbits;
            self.pos += 1;
            self.nbits += 8;
        }
    }

    /// Next `width`-bit field (1..=32)
    #[inline]
    pub fn read(&mut self, width: u8) -> u32 {
        let width = width as u32;
        self.fill(width);
        let value = self.acc & low_mask(width);
        self.acc >>= width;
        self.nbits -= width;
        value as u32
    }
}

/// LSB-first bit writer producing whole bytes plus a remainder
#[derive(Debug, Default)]
pub struct BitWriter {
    out: Vec<u8>,
    acc: u64,
    nbits: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue after a partial byte
    pub fn with_remainder(rem: Remainder) -> Self {
        Self {
            out: Vec::new(),
            acc: rem.byte as u64 & low_mask(rem.bits as u32),
            nbits: rem.bits as u32,
        }
    }

    #[inline]
    pub fn write(&mut self, value: u32, width: u8) {
        let width = width as u32;
        self.acc |= (value as u64 & low_mask(width)) << self.nbits;
        self.nbits += width;
        while self.nbits >= 8 {
            self.out.push(self.acc as u8);
            self.acc >>= 8;
            self.nbits -= 8;
        }
    }

    /// Complete bytes written so far and the trailing partial byte
    pub fn finish(self) -> (Vec<u8>, Remainder) {
        let rem = Remainder {
            byte: self.acc as u8,
            bits: self.nbits as u8,
        };
        (self.out, rem)
    }
}

/// Pack `values` as `width`-bit fields; a trailing partial byte is kept
pub fn pack_bits(values: &[u32], width: u8) -> Vec<u8> {
    let mut writer = BitWriter::new();
    for &v in values {
        writer.write(v, width);
    }
    let (mut bytes, rem) = writer.finish();
    if !rem.is_empty() {
        bytes.push(rem.byte);
    }
    bytes
}

/// Unpack `count` `width`-bit fields from the start of `data`
pub fn unpack_bits(data: &[u8], width: u8, count: usize) -> Vec<u32> {
    let mut reader = BitReader::new(data, 0);
    (0..count).map(|_| reader.read(width)).collect()
}

fn numeric_only(kind: ElementKind) -> Result<()> {
    if kind.is_string() {
        return Err(GdsError::unsupported_type(format!(
            "{} holds strings, not numbers",
            kind
        )));
    }
    Ok(())
}

fn string_only(kind: ElementKind) -> Result<(StrEncoding, u32)> {
    match kind {
        ElementKind::FixedStr { encoding, width } => Ok((encoding, width)),
        other => Err(GdsError::unsupported_type(format!(
            "{} holds numbers, not strings",
            other
        ))),
    }
}

/// Decode byte-aligned elements from `raw`
fn decode_bytes<T: Element>(kind: ElementKind, raw: &[u8], out: &mut [T]) {
    macro_rules! decode {
        ($n:expr, $conv:expr) => {
            for (o, c) in out.iter_mut().zip(raw.chunks_exact($n)) {
                *o = $conv(c);
            }
        };
    }
    match kind {
        ElementKind::Int8 => decode!(1, |c: &[u8]| T::from_i64(c[0] as i8 as i64)),
        ElementKind::UInt8 => decode!(1, |c: &[u8]| T::from_u64(c[0] as u64)),
        ElementKind::Int16 => {
            decode!(2, |c: &[u8]| T::from_i64(i16::from_le_bytes([c[0], c[1]]) as i64))
        }
        ElementKind::UInt16 => {
            decode!(2, |c: &[u8]| T::from_u64(u16::from_le_bytes([c[0], c[1]]) as u64))
        }
        ElementKind::Int24 => decode!(3, |c: &[u8]| {
            let v = u32::from_le_bytes([c[0], c[1], c[2], 0]);
            T::from_i64((((v << 8) as i32) >> 8) as i64)
        }),
        ElementKind::UInt24 => decode!(3, |c: &[u8]| T::from_u64(
            u32::from_le_bytes([c[0], c[1], c[2], 0]) as u64
        )),
        ElementKind::Int32 => decode!(4, |c: &[u8]| T::from_i64(
            i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as i64
        )),
        ElementKind::UInt32 => decode!(4, |c: &[u8]| T::from_u64(
            u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as u64
        )),
        ElementKind::Float32 => decode!(4, |c: &[u8]| T::from_f64(
            f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64
        )),
        ElementKind::Int64 => decode!(8, |c: &[u8]| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            T::from_i64(i64::from_le_bytes(b))
        }),
        ElementKind::UInt64 => decode!(8, |c: &[u8]| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            T::from_u64(u64::from_le_bytes(b))
        }),
        ElementKind::Float64 => decode!(8, |c: &[u8]| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            T::from_f64(f64::from_le_bytes(b))
        }),
        ElementKind::Bits { .. } | ElementKind::FixedStr { .. } => {}
    }
}

/// Encode byte-aligned elements onto `raw`
fn encode_bytes<T: Element>(kind: ElementKind, values: &[T], raw: &mut Vec<u8>) {
    for &v in values {
        match kind {
            ElementKind::Int8 => raw.push(v.to_i64() as i8 as u8),
            ElementKind::UInt8 => raw.push(v.to_u64() as u8),
            ElementKind::Int16 => raw.extend_from_slice(&(v.to_i64() as i16).to_le_bytes()),
            ElementKind::UInt16 => raw.extend_from_slice(&(v.to_u64() as u16).to_le_bytes()),
            ElementKind::Int24 => {
                raw.extend_from_slice(&(v.to_i64() as i32).to_le_bytes()[..3])
            }
            ElementKind::UInt24 => {
                raw.extend_from_slice(&(v.to_u64() as u32).to_le_bytes()[..3])
            }
            ElementKind::Int32 => raw.extend_from_slice(&(v.to_i64() as i32).to_le_bytes()),
            ElementKind::UInt32 => raw.extend_from_slice(&(v.to_u64() as u32).to_le_bytes()),
            ElementKind::Int64 => raw.extend_from_slice(&v.to_i64().to_le_bytes()),
            ElementKind::UInt64 => raw.extend_from_slice(&v.to_u64().to_le_bytes()),
            ElementKind::Float32 => raw.extend_from_slice(&(v.to_f64() as f32).to_le_bytes()),
            ElementKind::Float64 => raw.extend_from_slice(&v.to_f64().to_le_bytes()),
            ElementKind::Bits { .. } | ElementKind::FixedStr { .. } => {}
        }
    }
}

#[inline]
fn bits_to_element<T: Element>(v: u32, width: u8, signed: bool) -> T {
    if signed {
        T::from_i64(sign_extend(v, width) as i64)
    } else {
        T::from_u64(v as u64)
    }
}

#[inline]
fn element_to_bits<T: Element>(v: T, signed: bool) -> u32 {
    if signed {
        v.to_i64() as u32
    } else {
        v.to_u64() as u32
    }
}

/// Decode `out.len()` elements starting at element `index`
pub fn read_elements<T: Element>(
    alloc: &Allocator,
    kind: ElementKind,
    index: u64,
    out: &mut [T],
) -> Result<()> {
    numeric_only(kind)?;
    if out.is_empty() {
        return Ok(());
    }
    let mut staging = Vec::new();
    match kind {
        ElementKind::Bits { width, signed } => {
            let w = width as u64;
            for (n, block) in out.chunks_mut(STAGING_ELEMENTS).enumerate() {
                let first_bit = (index + (n * STAGING_ELEMENTS) as u64) * w;
                let shift = first_bit & 7;
                let nbytes = bytes_for_bits(shift + block.len() as u64 * w) as usize;
                staging.resize(nbytes, 0);
                alloc.read(first_bit >> 3, &mut staging)?;
                let mut reader = BitReader::new(&staging, shift);
                for o in block.iter_mut() {
                    *o = bits_to_element(reader.read(width), width, signed);
                }
            }
        }
        _ => {
            let size = kind.bit_width() / 8;
            for (n, block) in out.chunks_mut(STAGING_ELEMENTS).enumerate() {
                let first = index + (n * STAGING_ELEMENTS) as u64;
                staging.resize(block.len() * size as usize, 0);
                alloc.read(first * size, &mut staging)?;
                decode_bytes(kind, &staging, block);
            }
        }
    }
    Ok(())
}

/// Decode `mask.len()` elements starting at `index`, keeping those whose
/// mask entry is set. Returns the number of elements stored in `out`.
pub fn read_selected<T: Element>(
    alloc: &Allocator,
    kind: ElementKind,
    index: u64,
    mask: &[bool],
    out: &mut [T],
) -> Result<usize> {
    let mut scratch = vec![T::default(); mask.len().min(STAGING_ELEMENTS)];
    let mut kept = 0;
    for (n, sel) in mask.chunks(STAGING_ELEMENTS).enumerate() {
        let buf = &mut scratch[..sel.len()];
        read_elements(alloc, kind, index + (n * STAGING_ELEMENTS) as u64, buf)?;
        for (&v, &keep) in buf.iter().zip(sel) {
            if keep {
                out[kept] = v;
                kept += 1;
            }
        }
    }
    Ok(kept)
}

/// Encode `values` over the elements starting at `index`; the region may
/// extend past the current end. Partial edge bytes are merged in place.
pub fn write_elements<T: Element>(
    alloc: &mut Allocator,
    kind: ElementKind,
    index: u64,
    values: &[T],
) -> Result<()> {
    numeric_only(kind)?;
    if values.is_empty() {
        return Ok(());
    }
    match kind {
        ElementKind::Bits { width, signed } => {
            let first_bit = index * width as u64;
            let start = first_bit >> 3;
            let shift = (first_bit & 7) as u8;
            let size = alloc.size();

            let mut head = [0u8; 1];
            if shift > 0 {
                alloc.read(start, &mut head)?;
            }
            let mut writer = BitWriter::with_remainder(Remainder {
                byte: head[0],
                bits: shift,
            });
            for &v in values {
                writer.write(element_to_bits(v, signed), width);
            }
            let (mut bytes, rem) = writer.finish();
            if !rem.is_empty() {
                let tail_at = start + bytes.len() as u64;
                let mut old = [0u8; 1];
                if tail_at < size {
                    alloc.read(tail_at, &mut old)?;
                }
                let keep = !(low_mask(rem.bits as u32) as u8);
                bytes.push((rem.byte & !keep) | (old[0] & keep));
            }
            alloc.write(start, &bytes)
        }
        _ => {
            let size = kind.bit_width() / 8;
            let mut raw = Vec::with_capacity(values.len().min(STAGING_ELEMENTS) * size as usize);
            for (n, block) in values.chunks(STAGING_ELEMENTS).enumerate() {
                raw.clear();
                encode_bytes(kind, block, &mut raw);
                let first = index + (n * STAGING_ELEMENTS) as u64;
                alloc.write(first * size, &raw)?;
            }
            Ok(())
        }
    }
}

/// Append `values` to a forward-only stream; the trailing partial byte is
/// carried in `rem` across calls instead of being written
pub fn append_elements<T: Element>(
    alloc: &mut Allocator,
    kind: ElementKind,
    values: &[T],
    rem: &mut Remainder,
) -> Result<()> {
    numeric_only(kind)?;
    match kind {
        ElementKind::Bits { width, signed } => {
            for block in values.chunks(STAGING_ELEMENTS) {
                let mut writer = BitWriter::with_remainder(*rem);
                for &v in block {
                    writer.write(element_to_bits(v, signed), width);
                }
                let (bytes, tail) = writer.finish();
                alloc.append(&bytes)?;
                *rem = tail;
            }
            Ok(())
        }
        _ => {
            let mut raw = Vec::new();
            for block in values.chunks(STAGING_ELEMENTS) {
                raw.clear();
                encode_bytes(kind, block, &mut raw);
                alloc.append(&raw)?;
            }
            Ok(())
        }
    }
}

/// Encode `s` as a zero-padded field of `width` code units
pub fn encode_str(encoding: StrEncoding, width: u32, s: &str, out: &mut Vec<u8>) {
    let start = out.len();
    match encoding {
        StrEncoding::Utf8 => {
            // cut on a character boundary
            let mut end = s.len().min(width as usize);
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            out.extend_from_slice(&s.as_bytes()[..end]);
        }
        StrEncoding::Utf16 => {
            let mut units: Vec<u16> = s.encode_utf16().take(width as usize).collect();
            if units.last().is_some_and(|u| (0xD800..0xDC00).contains(u)) {
                units.pop();
            }
            for unit in units {
                out.extend_from_slice(&unit.to_le_bytes());
            }
        }
        StrEncoding::Utf32 => {
            for c in s.chars().take(width as usize) {
                out.extend_from_slice(&(c as u32).to_le_bytes());
            }
        }
    }
    let field = (width as u64 * encoding.unit_bytes()) as usize;
    out.resize(start + field, 0);
}

/// Decode one zero-padded field
pub fn decode_str(encoding: StrEncoding, raw: &[u8]) -> String {
    match encoding {
        StrEncoding::Utf8 => {
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            String::from_utf8_lossy(&raw[..end]).into_owned()
        }
        StrEncoding::Utf16 => {
            let units: Vec<u16> = raw
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .take_while(|&u| u != 0)
                .collect();
            String::from_utf16_lossy(&units)
        }
        StrEncoding::Utf32 => raw
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .take_while(|&u| u != 0)
            .map(|u| char::from_u32(u).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect(),
    }
}

/// Decode `count` strings starting at element `index`
pub fn read_strings(
    alloc: &Allocator,
    kind: ElementKind,
    index: u64,
    count: usize,
) -> Result<Vec<String>> {
    let (encoding, _) = string_only(kind)?;
    let field = (kind.bit_width() / 8) as usize;
    if field == 0 {
        return Ok(vec![String::new(); count]);
    }
    let mut strings = Vec::with_capacity(count);
    let mut staging = Vec::new();
    let mut done = 0;
    while done < count {
        let n = (count - done).min(STAGING_ELEMENTS);
        staging.resize(n * field, 0);
        alloc.read((index + done as u64) * field as u64, &mut staging)?;
        strings.extend(staging.chunks_exact(field).map(|raw| decode_str(encoding, raw)));
        done += n;
    }
    Ok(strings)
}

/// Encode strings at element `index`; strings longer than the field are cut
pub fn write_strings<S: AsRef<str>>(
    alloc: &mut Allocator,
    kind: ElementKind,
    index: u64,
    values: &[S],
) -> Result<()> {
    let (encoding, width) = string_only(kind)?;
    let field = kind.bit_width() / 8;
    let mut raw = Vec::new();
    for s in values {
        encode_str(encoding, width, s.as_ref(), &mut raw);
    }
    alloc.write(index * field, &raw)
}
