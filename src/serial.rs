//! Named-field, length-prefixed binary serialization
//!
//! A block starts with its total byte length (`u64` LE, counting the prefix
//! itself) followed by fields. Each field is `name_len: u8`, the UTF-8
//! name, a one-byte [`TypeId`] and the payload. Variable-size payloads carry
//! a `u32` length or count; nested blocks carry their own length prefix.
//! Readers look fields up by name, so unknown fields are skipped and field
//! order does not matter.

use crate::error::{GdsError, Result};
use std::collections::HashMap;

/// Size of the block length prefix
pub const BLOCK_PREFIX_LEN: usize = 8;

/// Payload type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeId {
    Null = 0,
    Struct = 1,
    Int8 = 4,
    UInt8 = 5,
    Int16 = 6,
    UInt16 = 7,
    Int32 = 8,
    UInt32 = 9,
    Int64 = 10,
    UInt64 = 11,
    Float32 = 18,
    Float64 = 19,
    StrUtf8 = 21,
    Bytes = 25,
    UInt64Array = 26,
    Bool = 27,
}

impl TypeId {
    pub fn from_u8(value: u8) -> Option<Self> {
        let id = match value {
            0 => TypeId::Null,
            1 => TypeId::Struct,
            4 => TypeId::Int8,
            5 => TypeId::UInt8,
            6 => TypeId::Int16,
            7 => TypeId::UInt16,
            8 => TypeId::Int32,
            9 => TypeId::UInt32,
            10 => TypeId::Int64,
            11 => TypeId::UInt64,
            18 => TypeId::Float32,
            19 => TypeId::Float64,
            21 => TypeId::StrUtf8,
            25 => TypeId::Bytes,
            26 => TypeId::UInt64Array,
            27 => TypeId::Bool,
            _ => return None,
        };
        Some(id)
    }
}

/// Decoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum SerialValue {
    Null,
    Struct(StructReader),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Str(String),
    Bytes(Vec<u8>),
    UInt64Array(Vec<u64>),
    Bool(bool),
}

impl SerialValue {
    pub fn type_id(&self) -> TypeId {
        match self {
            SerialValue::Null => TypeId::Null,
            SerialValue::Struct(_) => TypeId::Struct,
            SerialValue::Int8(_) => TypeId::Int8,
            SerialValue::UInt8(_) => TypeId::UInt8,
            SerialValue::Int16(_) => TypeId::Int16,
            SerialValue::UInt16(_) => TypeId::UInt16,
            SerialValue::Int32(_) => TypeId::Int32,
            SerialValue::UInt32(_) => TypeId::UInt32,
            SerialValue::Int64(_) => TypeId::Int64,
            SerialValue::UInt64(_) => TypeId::UInt64,
            SerialValue::Float32(_) => TypeId::Float32,
            SerialValue::Float64(_) => TypeId::Float64,
            SerialValue::Str(_) => TypeId::StrUtf8,
            SerialValue::Bytes(_) => TypeId::Bytes,
            SerialValue::UInt64Array(_) => TypeId::UInt64Array,
            SerialValue::Bool(_) => TypeId::Bool,
        }
    }

    /// Integer value of any integer variant
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            SerialValue::Int8(v) => Some(v as i64),
            SerialValue::UInt8(v) => Some(v as i64),
            SerialValue::Int16(v) => Some(v as i64),
            SerialValue::UInt16(v) => Some(v as i64),
            SerialValue::Int32(v) => Some(v as i64),
            SerialValue::UInt32(v) => Some(v as i64),
            SerialValue::Int64(v) => Some(v),
            SerialValue::UInt64(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            SerialValue::UInt64(v) => Some(v),
            _ => self.as_i64().map(|v| v as u64),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            SerialValue::Float32(v) => Some(v as f64),
            SerialValue::Float64(v) => Some(v),
            _ => None,
        }
    }
}

/// Writer producing nested named-field blocks
#[derive(Debug, Default)]
pub struct StructWriter {
    buf: Vec<u8>,
    open: Vec<usize>,
}

impl StructWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a block; its length is back-patched by `end_struct`
    pub fn begin_struct(&mut self) {
        self.open.push(self.buf.len());
        self.buf.extend_from_slice(&[0u8; BLOCK_PREFIX_LEN]);
    }

    pub fn end_struct(&mut self) -> Result<()> {
        let start = self
            .open
            .pop()
            .ok_or_else(|| GdsError::Serialization("end_struct without begin_struct".into()))?;
        let len = (self.buf.len() - start) as u64;
        self.buf[start..start + BLOCK_PREFIX_LEN].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }

    fn field_header(&mut self, name: &str, type_id: TypeId) -> Result<()> {
        let len = u8::try_from(name.len())
            .map_err(|_| GdsError::Serialization(format!("field name too long: {}", name)))?;
        self.buf.push(len);
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(type_id as u8);
        Ok(())
    }

    fn write_len(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len)
            .map_err(|_| GdsError::Serialization(format!("payload of {} items", len)))?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        Ok(())
    }

    /// Open a nested block stored as field `name`
    pub fn begin_field_struct(&mut self, name: &str) -> Result<()> {
        self.field_header(name, TypeId::Struct)?;
        self.begin_struct();
        Ok(())
    }

    /// Write a scalar, string or array field
    pub fn write(&mut self, name: &str, value: &SerialValue) -> Result<()> {
        if let SerialValue::Struct(_) = value {
            return Err(GdsError::Serialization(
                "nested blocks are written with begin_field_struct".into(),
            ));
        }
        self.field_header(name, value.type_id())?;
        match value {
            SerialValue::Null | SerialValue::Struct(_) => {}
            SerialValue::Int8(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            SerialValue::UInt8(v) => self.buf.push(*v),
            SerialValue::Int16(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            SerialValue::UInt16(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            SerialValue::Int32(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            SerialValue::UInt32(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            SerialValue::Int64(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            SerialValue::UInt64(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            SerialValue::Float32(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            SerialValue::Float64(v) => self.buf.extend_from_slice(&v.to_le_bytes()),
            SerialValue::Bool(v) => self.buf.push(*v as u8),
            SerialValue::Str(s) => {
                self.write_len(s.len())?;
                self.buf.extend_from_slice(s.as_bytes());
            }
            SerialValue::Bytes(b) => {
                self.write_len(b.len())?;
                self.buf.extend_from_slice(b);
            }
            SerialValue::UInt64Array(values) => {
                self.write_len(values.len())?;
                for v in values {
                    self.buf.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
        Ok(())
    }

    pub fn write_u64(&mut self, name: &str, v: u64) -> Result<()> {
        self.write(name, &SerialValue::UInt64(v))
    }

    pub fn write_u32(&mut self, name: &str, v: u32) -> Result<()> {
        self.write(name, &SerialValue::UInt32(v))
    }

    pub fn write_u8(&mut self, name: &str, v: u8) -> Result<()> {
        self.write(name, &SerialValue::UInt8(v))
    }

    pub fn write_bool(&mut self, name: &str, v: bool) -> Result<()> {
        self.write(name, &SerialValue::Bool(v))
    }

    pub fn write_str(&mut self, name: &str, v: &str) -> Result<()> {
        self.write(name, &SerialValue::Str(v.to_string()))
    }

    pub fn write_u64_array(&mut self, name: &str, v: &[u64]) -> Result<()> {
        self.write(name, &SerialValue::UInt64Array(v.to_vec()))
    }

    /// Finished bytes; every block must be closed
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if !self.open.is_empty() {
            return Err(GdsError::Serialization(format!(
                "{} blocks left open",
                self.open.len()
            )));
        }
        Ok(self.buf)
    }
}

/// Cursor over serialized blocks
#[derive(Debug)]
pub struct SerialReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SerialReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Parse the block at the cursor
    pub fn begin_struct(&mut self) -> Result<StructReader> {
        Ok(parse_block(self.data, self.pos)?.0)
    }

    /// Move the cursor to the declared end of `block`
    pub fn end_struct(&mut self, block: StructReader) {
        self.pos += block.len;
    }
}

fn take<'b>(data: &'b [u8], pos: &mut usize, n: usize, end: usize) -> Result<&'b [u8]> {
    if *pos + n > end {
        return Err(GdsError::corrupt(format!(
            "field runs past the end of its block at {}",
            end
        )));
    }
    let slice = &data[*pos..*pos + n];
    *pos += n;
    Ok(slice)
}

fn take_array<const N: usize>(data: &[u8], pos: &mut usize, end: usize) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(data, pos, N, end)?);
    Ok(out)
}

fn parse_block(data: &[u8], start: usize) -> Result<(StructReader, usize)> {
    if start + BLOCK_PREFIX_LEN > data.len() {
        return Err(GdsError::corrupt("truncated block length"));
    }
    let mut pos = start;
    let len = u64::from_le_bytes(take_array(data, &mut pos, data.len())?) as usize;
    let end = start
        .checked_add(len)
        .filter(|&end| len >= BLOCK_PREFIX_LEN && end <= data.len())
        .ok_or_else(|| {
            GdsError::corrupt(format!(
                "block at {} declares {} bytes, {} available",
                start,
                len,
                data.len() - start
            ))
        })?;

    let mut fields = Vec::new();
    while pos < end {
        let name_len = take(data, &mut pos, 1, end)?[0] as usize;
        let name = String::from_utf8(take(data, &mut pos, name_len, end)?.to_vec())
            .map_err(|_| GdsError::corrupt("field name is not UTF-8"))?;
        let raw_type = take(data, &mut pos, 1, end)?[0];
        let type_id = TypeId::from_u8(raw_type)
            .ok_or_else(|| GdsError::corrupt(format!("unknown type id {} in '{}'", raw_type, name)))?;

        let value = match type_id {
            TypeId::Null => SerialValue::Null,
            TypeId::Struct => {
                let (nested, nested_end) = parse_block(data, pos)?;
                if nested_end > end {
                    return Err(GdsError::corrupt("nested block overruns its parent"));
                }
                pos = nested_end;
                SerialValue::Struct(nested)
            }
            TypeId::Int8 => SerialValue::Int8(take(data, &mut pos, 1, end)?[0] as i8),
            TypeId::UInt8 => SerialValue::UInt8(take(data, &mut pos, 1, end)?[0]),
            TypeId::Bool => SerialValue::Bool(take(data, &mut pos, 1, end)?[0] != 0),
            TypeId::Int16 => SerialValue::Int16(i16::from_le_bytes(take_array(data, &mut pos, end)?)),
            TypeId::UInt16 => {
                SerialValue::UInt16(u16::from_le_bytes(take_array(data, &mut pos, end)?))
            }
            TypeId::Int32 => SerialValue::Int32(i32::from_le_bytes(take_array(data, &mut pos, end)?)),
            TypeId::UInt32 => {
                SerialValue::UInt32(u32::from_le_bytes(take_array(data, &mut pos, end)?))
            }
            TypeId::Int64 => SerialValue::Int64(i64::from_le_bytes(take_array(data, &mut pos, end)?)),
            TypeId::UInt64 => {
                SerialValue::UInt64(u64::from_le_bytes(take_array(data, &mut pos, end)?))
            }
            TypeId::Float32 => {
                SerialValue::Float32(f32::from_le_bytes(take_array(data, &mut pos, end)?))
            }
            TypeId::Float64 => {
                SerialValue::Float64(f64::from_le_bytes(take_array(data, &mut pos, end)?))
            }
            TypeId::StrUtf8 | TypeId::Bytes => {
                let n = u32::from_le_bytes(take_array(data, &mut pos, end)?) as usize;
                let bytes = take(data, &mut pos, n, end)?.to_vec();
                if type_id == TypeId::Bytes {
                    SerialValue::Bytes(bytes)
                } else {
                    SerialValue::Str(
                        String::from_utf8(bytes)
                            .map_err(|_| GdsError::corrupt(format!("'{}' is not UTF-8", name)))?,
                    )
                }
            }
            TypeId::UInt64Array => {
                let n = u32::from_le_bytes(take_array(data, &mut pos, end)?) as usize;
                let mut values = Vec::with_capacity(n.min((end - pos) / 8));
                for _ in 0..n {
                    values.push(u64::from_le_bytes(take_array(data, &mut pos, end)?));
                }
                SerialValue::UInt64Array(values)
            }
        };
        fields.push((name, value));
    }

    let index = fields
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (name.clone(), i))
        .collect();
    Ok((
        StructReader {
            fields,
            index,
            len: end - start,
        },
        end,
    ))
}

/// Parsed block; fields are looked up by name
#[derive(Debug, Clone, PartialEq)]
pub struct StructReader {
    fields: Vec<(String, SerialValue)>,
    index: HashMap<String, usize>,
    len: usize,
}

impl StructReader {
    /// Parse a standalone block
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(parse_block(data, 0)?.0)
    }

    /// Field names in stored order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&SerialValue> {
        self.index.get(name).map(|&i| &self.fields[i].1)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &SerialValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    fn required(&self, name: &str) -> Result<&SerialValue> {
        self.get(name)
            .ok_or_else(|| GdsError::corrupt(format!("missing field '{}'", name)))
    }

    fn mismatch(name: &str, want: &str) -> GdsError {
        GdsError::corrupt(format!("field '{}' is not {}", name, want))
    }

    pub fn u64(&self, name: &str) -> Result<u64> {
        self.required(name)?
            .as_u64()
            .ok_or_else(|| Self::mismatch(name, "an integer"))
    }

    pub fn i64(&self, name: &str) -> Result<i64> {
        self.required(name)?
            .as_i64()
            .ok_or_else(|| Self::mismatch(name, "an integer"))
    }

    pub fn opt_u64(&self, name: &str) -> Result<Option<u64>> {
        match self.get(name) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| Self::mismatch(name, "an integer")),
        }
    }

    pub fn bool(&self, name: &str) -> Result<bool> {
        match self.required(name)? {
            SerialValue::Bool(v) => Ok(*v),
            _ => Err(Self::mismatch(name, "a boolean")),
        }
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        match self.required(name)? {
            SerialValue::Str(v) => Ok(v),
            _ => Err(Self::mismatch(name, "a string")),
        }
    }

    pub fn u64_array(&self, name: &str) -> Result<&[u64]> {
        match self.required(name)? {
            SerialValue::UInt64Array(v) => Ok(v),
            _ => Err(Self::mismatch(name, "an integer array")),
        }
    }

    pub fn struct_field(&self, name: &str) -> Result<&StructReader> {
        match self.required(name)? {
            SerialValue::Struct(v) => Ok(v),
            _ => Err(Self::mismatch(name, "a block")),
        }
    }

    /// Byte length of the block, prefix included
    pub fn block_len(&self) -> usize {
        self.len
    }
}
