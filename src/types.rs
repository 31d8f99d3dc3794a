//! Core data types for GDS containers

use crate::error::{GdsError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest width of a bit-packed integer element
pub const MAX_PACKED_BITS: u8 = 31;

/// Character encoding of fixed-width string elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrEncoding {
    Utf8,
    Utf16,
    Utf32,
}

impl StrEncoding {
    /// Size in bytes of one code unit
    pub fn unit_bytes(&self) -> u64 {
        match self {
            StrEncoding::Utf8 => 1,
            StrEncoding::Utf16 => 2,
            StrEncoding::Utf32 => 4,
        }
    }

    /// Number of code units needed to store `s`
    pub fn units_of(&self, s: &str) -> u32 {
        match self {
            StrEncoding::Utf8 => s.len() as u32,
            StrEncoding::Utf16 => s.encode_utf16().count() as u32,
            StrEncoding::Utf32 => s.chars().count() as u32,
        }
    }
}

/// Element kinds stored by a GDS array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Int8,
    UInt8,
    Int16,
    UInt16,
    /// 3-byte little-endian signed integer
    Int24,
    /// 3-byte little-endian unsigned integer
    UInt24,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    /// Bit-packed integer of 1..=31 bits (8, 16 and 24 use the byte kinds)
    Bits { width: u8, signed: bool },
    /// Zero-padded string of `width` code units
    FixedStr { encoding: StrEncoding, width: u32 },
}

impl ElementKind {
    /// Integer kind of `width` bits, mapping byte-aligned widths to byte kinds
    pub fn bits(width: u8, signed: bool) -> Result<Self> {
        let kind = match (width, signed) {
            (8, true) => ElementKind::Int8,
            (8, false) => ElementKind::UInt8,
            (16, true) => ElementKind::Int16,
            (16, false) => ElementKind::UInt16,
            (24, true) => ElementKind::Int24,
            (24, false) => ElementKind::UInt24,
            (32, true) => ElementKind::Int32,
            (32, false) => ElementKind::UInt32,
            (1..=MAX_PACKED_BITS, _) => ElementKind::Bits { width, signed },
            _ => {
                return Err(GdsError::unsupported_type(format!(
                    "invalid integer width {}",
                    width
                )))
            }
        };
        Ok(kind)
    }

    /// Fixed-width string kind
    pub fn fixed_str(encoding: StrEncoding, width: u32) -> Self {
        ElementKind::FixedStr { encoding, width }
    }

    /// Number of bits occupied by one element
    pub fn bit_width(&self) -> u64 {
        match self {
            ElementKind::Int8 | ElementKind::UInt8 => 8,
            ElementKind::Int16 | ElementKind::UInt16 => 16,
            ElementKind::Int24 | ElementKind::UInt24 => 24,
            ElementKind::Int32 | ElementKind::UInt32 | ElementKind::Float32 => 32,
            ElementKind::Int64 | ElementKind::UInt64 | ElementKind::Float64 => 64,
            ElementKind::Bits { width, .. } => *width as u64,
            ElementKind::FixedStr { encoding, width } => {
                *width as u64 * encoding.unit_bytes() * 8
            }
        }
    }

    /// Size in bytes of one element, `None` for bit-packed kinds
    pub fn byte_size(&self) -> Option<u64> {
        match self {
            ElementKind::Bits { .. } => None,
            _ => Some(self.bit_width() / 8),
        }
    }

    pub fn is_bit_packed(&self) -> bool {
        matches!(self, ElementKind::Bits { .. })
    }

    pub fn is_string(&self) -> bool {
        matches!(self, ElementKind::FixedStr { .. })
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ElementKind::Float32 | ElementKind::Float64)
    }

    pub fn is_signed(&self) -> bool {
        match self {
            ElementKind::Int8
            | ElementKind::Int16
            | ElementKind::Int24
            | ElementKind::Int32
            | ElementKind::Int64 => true,
            ElementKind::Bits { signed, .. } => *signed,
            _ => false,
        }
    }

    /// Class name used in the persisted object tree
    pub fn class_name(&self) -> String {
        match self {
            ElementKind::Int8 => "dInt8".into(),
            ElementKind::UInt8 => "dUInt8".into(),
            ElementKind::Int16 => "dInt16".into(),
            ElementKind::UInt16 => "dUInt16".into(),
            ElementKind::Int24 => "dInt24".into(),
            ElementKind::UInt24 => "dUInt24".into(),
            ElementKind::Int32 => "dInt32".into(),
            ElementKind::UInt32 => "dUInt32".into(),
            ElementKind::Int64 => "dInt64".into(),
            ElementKind::UInt64 => "dUInt64".into(),
            ElementKind::Float32 => "dFloat32".into(),
            ElementKind::Float64 => "dFloat64".into(),
            ElementKind::Bits { width, signed: false } => format!("dBit{}", width),
            ElementKind::Bits { width, signed: true } => format!("dSBit{}", width),
            ElementKind::FixedStr { encoding, .. } => match encoding {
                StrEncoding::Utf8 => "dFStr8".into(),
                StrEncoding::Utf16 => "dFStr16".into(),
                StrEncoding::Utf32 => "dFStr32".into(),
            },
        }
    }

    /// Parse a class name; string kinds start with a width of zero
    pub fn from_class_name(name: &str) -> Option<Self> {
        let kind = match name {
            "dInt8" => ElementKind::Int8,
            "dUInt8" => ElementKind::UInt8,
            "dInt16" => ElementKind::Int16,
            "dUInt16" => ElementKind::UInt16,
            "dInt24" => ElementKind::Int24,
            "dUInt24" => ElementKind::UInt24,
            "dInt32" => ElementKind::Int32,
            "dUInt32" => ElementKind::UInt32,
            "dInt64" => ElementKind::Int64,
            "dUInt64" => ElementKind::UInt64,
            "dFloat32" => ElementKind::Float32,
            "dFloat64" => ElementKind::Float64,
            "dFStr8" => ElementKind::fixed_str(StrEncoding::Utf8, 0),
            "dFStr16" => ElementKind::fixed_str(StrEncoding::Utf16, 0),
            "dFStr32" => ElementKind::fixed_str(StrEncoding::Utf32, 0),
            _ => {
                let (rest, signed) = if let Some(rest) = name.strip_prefix("dSBit") {
                    (rest, true)
                } else {
                    (name.strip_prefix("dBit")?, false)
                };
                let width: u8 = rest.parse().ok()?;
                match width {
                    8 | 16 | 24 => return None,
                    1..=MAX_PACKED_BITS => ElementKind::Bits { width, signed },
                    _ => return None,
                }
            }
        };
        Some(kind)
    }

    /// Class names of every registrable element kind
    pub fn all_class_names() -> Vec<String> {
        let mut names: Vec<String> = [
            "dInt8", "dUInt8", "dInt16", "dUInt16", "dInt24", "dUInt24", "dInt32", "dUInt32",
            "dInt64", "dUInt64", "dFloat32", "dFloat64", "dFStr8", "dFStr16", "dFStr32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        for width in 1..=MAX_PACKED_BITS {
            if matches!(width, 8 | 16 | 24) {
                continue;
            }
            names.push(format!("dBit{}", width));
            names.push(format!("dSBit{}", width));
        }
        names
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.class_name())
    }
}

/// Attribute value attached to a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}
