//! # Wire Primitives
//!
//! Low-level decoding helpers for the self-describing binary value encoding:
//! type descriptors, variable-length integer fields, and the binary version
//! marker (BVM).
//!
//! ## Value Layout
//!
//! Every value starts with a one-byte descriptor: the high nibble is the type
//! tag, the low nibble the body length. A low nibble of 14 means the real
//! length follows as a `VarUInt`; 15 means a null of that type.
//!
//! | Tag | Type       | Tag | Type       |
//! |-----|------------|-----|------------|
//! | 0   | null / pad | 7   | symbol     |
//! | 1   | bool       | 8   | string     |
//! | 2   | uint       | 9   | clob       |
//! | 3   | int (neg)  | 10  | blob       |
//! | 4   | float      | 11  | list       |
//! | 5   | decimal    | 12  | sexp       |
//! | 6   | timestamp  | 13  | struct     |
//! |     |            | 14  | annotation |
//!
//! Tag 15 is reserved and rejected. A struct with a low nibble of 1 is the
//! sorted-field form; its length follows as a `VarUInt` like the 14 case.
//!
//! ## Integer Fields
//!
//! | Field    | Encoding                                                    |
//! |----------|-------------------------------------------------------------|
//! | `VarUInt`| big-endian 7-bit groups, final byte has the high bit set    |
//! | `VarInt` | like `VarUInt`, but bit 6 of the first byte carries the sign|
//! | `UInt`   | big-endian base-256 magnitude, length taken from the header |
//!
//! ## Error Handling
//!
//! All decoders return `eyre::Result` with descriptive messages:
//! - Empty input: "truncated varuint" / "truncated value descriptor"
//! - Oversized values: "varuint overflows 64 bits"
//! - Reserved tags: "unknown type tag 0xfX"

use std::fmt;

use eyre::{bail, ensure, Result};

/// The binary version marker that opens a stream (or resets symbol state
/// mid-stream).
pub const BVM: [u8; 4] = [0xE0, 0x01, 0x00, 0xEA];

/// System symbol ids, fixed by the encoding and present in every symbol table.
pub(crate) mod sys {
    pub const SYMBOL_TABLE: u64 = 3;
    pub const IMPORTS: u64 = 6;
    pub const SYMBOLS: u64 = 7;
}

/// Type tag of a decoded value.
///
/// Positive and negative integers are distinct tags on the wire; the schema
/// layer uses that distinction to track signedness. `Decimal`, `Clob` and
/// `Sexp` are recognized (so containers holding them can be skipped) but have
/// no typed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IonType {
    Null,
    Bool,
    Uint,
    Int,
    Float,
    Decimal,
    Timestamp,
    Symbol,
    String,
    Clob,
    Blob,
    List,
    Sexp,
    Struct,
    Annotation,
}

impl fmt::Display for IonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IonType::Null => "null",
            IonType::Bool => "bool",
            IonType::Uint => "uint",
            IonType::Int => "int",
            IonType::Float => "float",
            IonType::Decimal => "decimal",
            IonType::Timestamp => "timestamp",
            IonType::Symbol => "symbol",
            IonType::String => "string",
            IonType::Clob => "clob",
            IonType::Blob => "blob",
            IonType::List => "list",
            IonType::Sexp => "sexp",
            IonType::Struct => "struct",
            IonType::Annotation => "annotation",
        };
        f.write_str(name)
    }
}

/// A parsed value descriptor.
///
/// `typ` is `Null` for every null encoding, including typed nulls like
/// `null.int`, so downstream code only ever sees one null. Booleans carry
/// their value in the descriptor itself, exposed through `truthy`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Descriptor {
    pub typ: IonType,
    pub header_len: usize,
    pub body_len: usize,
    pub truthy: bool,
    pub pad: bool,
}

/// Parses the descriptor at the start of `buf`.
pub(crate) fn parse_descriptor(buf: &[u8]) -> Result<Descriptor> {
    ensure!(!buf.is_empty(), "truncated value descriptor");
    let tag = buf[0] >> 4;
    let low = (buf[0] & 0x0F) as usize;

    let mut desc = Descriptor {
        typ: IonType::Null,
        header_len: 1,
        body_len: 0,
        truthy: false,
        pad: false,
    };

    if tag == 0 {
        if low == 15 {
            return Ok(desc);
        }
        desc.pad = true;
        desc.body_len = low;
        if low == 14 {
            let (len, n) = read_var_uint(&buf[1..])?;
            desc.header_len = 1 + n;
            desc.body_len = len as usize;
        }
        return Ok(desc);
    }

    if tag == 1 {
        match low {
            0 | 1 => {
                desc.typ = IonType::Bool;
                desc.truthy = low == 1;
            }
            15 => {}
            _ => bail!("invalid bool descriptor 0x{:02x}", buf[0]),
        }
        return Ok(desc);
    }

    let typ = match tag {
        2 => IonType::Uint,
        3 => IonType::Int,
        4 => IonType::Float,
        5 => IonType::Decimal,
        6 => IonType::Timestamp,
        7 => IonType::Symbol,
        8 => IonType::String,
        9 => IonType::Clob,
        10 => IonType::Blob,
        11 => IonType::List,
        12 => IonType::Sexp,
        13 => IonType::Struct,
        14 => IonType::Annotation,
        _ => bail!("unknown type tag 0x{:02x}", buf[0]),
    };

    if low == 15 {
        // Typed null, normalized to the plain null tag.
        return Ok(desc);
    }

    desc.typ = typ;
    if low == 14 || (typ == IonType::Struct && low == 1) {
        let (len, n) = read_var_uint(&buf[1..])?;
        desc.header_len = 1 + n;
        desc.body_len = len as usize;
    } else {
        desc.body_len = low;
    }
    Ok(desc)
}

/// Returns true when `buf` starts with the binary version marker.
pub fn is_bvm(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf[..4] == BVM
}

/// Decodes a `VarUInt` field, returning the value and the bytes consumed.
pub(crate) fn read_var_uint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for (i, &b) in buf.iter().enumerate() {
        ensure!(value.leading_zeros() >= 7, "varuint overflows 64 bits");
        value = (value << 7) | (b & 0x7F) as u64;
        if b & 0x80 != 0 {
            return Ok((value, i + 1));
        }
    }
    bail!("truncated varuint")
}

/// Decodes a `VarInt` field, returning the value and the bytes consumed.
pub(crate) fn read_var_int(buf: &[u8]) -> Result<(i64, usize)> {
    ensure!(!buf.is_empty(), "truncated varint");
    let first = buf[0];
    let negative = first & 0x40 != 0;
    let mut magnitude = (first & 0x3F) as u64;
    let mut read = 1;
    if first & 0x80 == 0 {
        for &b in &buf[1..] {
            ensure!(magnitude.leading_zeros() >= 7, "varint overflows 64 bits");
            magnitude = (magnitude << 7) | (b & 0x7F) as u64;
            read += 1;
            if b & 0x80 != 0 {
                break;
            }
        }
        ensure!(buf[read - 1] & 0x80 != 0, "truncated varint");
    }
    ensure!(
        magnitude <= i64::MAX as u64,
        "varint magnitude {magnitude} overflows signed 64 bits"
    );
    let value = magnitude as i64;
    Ok((if negative { -value } else { value }, read))
}

/// Decodes a fixed-width big-endian `UInt` field spanning all of `buf`.
pub(crate) fn read_uint_field(buf: &[u8]) -> Result<u64> {
    let significant = buf.iter().position(|&b| b != 0).map_or(0, |i| buf.len() - i);
    ensure!(significant <= 8, "integer field of {significant} bytes overflows 64 bits");
    let mut value = 0u64;
    for &b in buf {
        value = (value << 8) | b as u64;
    }
    Ok(value)
}
