//! # StreamBuilder - Stream Construction
//!
//! This module provides `StreamBuilder` for constructing well-formed binary
//! value streams: the version marker, local symbol tables, annotated values
//! and arbitrarily nested containers. It is the mirror image of the reader
//! and what the test suite uses to produce byte-exact payloads.
//!
//! ## Usage
//!
//! ```ignore
//! let mut b = StreamBuilder::new();
//! b.define_symbols(&["x", "final_status", "hits"])?;
//! b.begin_struct()?;
//! b.field("x")?.uint(1)?;
//! b.end_struct()?;
//! let payload = b.finish()?;
//! ```
//!
//! ## Symbol Handling
//!
//! Field names, symbol values and annotations must be declared with
//! `define_symbols` before use; each call emits one symbol-table record at
//! the current stream position. The first call replaces the system table,
//! later calls append (mirroring how result streams arrive in chunks).
//!
//! ## Container Assembly
//!
//! Containers are length-prefixed, so `begin_struct`/`begin_list` redirect
//! output into an owned scratch buffer; the matching `end_*` call prepends
//! the descriptor and emits the finished container into its parent.

use chrono::{DateTime, Datelike, Timelike, Utc};
use eyre::{bail, ensure, Result};

use crate::ion::symtab::SYSTEM_SYMBOLS;
use crate::ion::types::{sys, IonType, BVM};

#[derive(Debug)]
struct OpenContainer {
    typ: IonType,
    buf: Vec<u8>,
    field: Option<u64>,
    annotations: Vec<u64>,
}

/// Builder for one binary value stream.
#[derive(Debug)]
pub struct StreamBuilder {
    out: Vec<u8>,
    stack: Vec<OpenContainer>,
    locals: Vec<String>,
    pending_field: Option<u64>,
    pending_annotations: Vec<u64>,
    emitted_table: bool,
}

impl Default for StreamBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBuilder {
    pub fn new() -> Self {
        Self {
            out: BVM.to_vec(),
            stack: Vec::new(),
            locals: Vec::new(),
            pending_field: None,
            pending_annotations: Vec::new(),
            emitted_table: false,
        }
    }

    /// Emits a symbol-table record declaring `names` and interning them for
    /// later `field`/`symbol`/`annotate` calls. Already-known names are
    /// skipped.
    pub fn define_symbols(&mut self, names: &[&str]) -> Result<&mut Self> {
        ensure!(
            self.stack.is_empty()
                && self.pending_field.is_none()
                && self.pending_annotations.is_empty(),
            "symbol tables must be written between top-level values"
        );
        let fresh: Vec<&str> = names
            .iter()
            .copied()
            .filter(|n| self.sid(n).is_none())
            .collect();

        let mut body = Vec::new();
        if self.emitted_table {
            push_var_uint(&mut body, sys::IMPORTS);
            body.push(0x71);
            body.push(sys::SYMBOL_TABLE as u8);
        }
        push_var_uint(&mut body, sys::SYMBOLS);
        let mut list = Vec::new();
        for name in &fresh {
            push_descriptor(&mut list, 0x8, name.len());
            list.extend_from_slice(name.as_bytes());
        }
        push_descriptor(&mut body, 0xB, list.len());
        body.extend_from_slice(&list);

        let mut record = Vec::new();
        push_descriptor(&mut record, 0xD, body.len());
        record.extend_from_slice(&body);

        let wrapped = wrap_annotations(&[sys::SYMBOL_TABLE], &record);
        self.out.extend_from_slice(&wrapped);

        for name in fresh {
            self.locals.push(name.to_string());
        }
        self.emitted_table = true;
        Ok(self)
    }

    fn sid(&self, name: &str) -> Option<u64> {
        if let Some(i) = SYSTEM_SYMBOLS.iter().position(|&s| s == name) {
            return Some(i as u64 + 1);
        }
        self.locals
            .iter()
            .position(|s| s == name)
            .map(|i| i as u64 + 1 + SYSTEM_SYMBOLS.len() as u64)
    }

    fn require_sid(&self, name: &str) -> Result<u64> {
        self.sid(name)
            .ok_or_else(|| eyre::eyre!("symbol '{name}' not defined; call define_symbols first"))
    }

    /// Names the next value written into the current struct.
    pub fn field(&mut self, name: &str) -> Result<&mut Self> {
        ensure!(
            matches!(self.stack.last(), Some(open) if open.typ == IonType::Struct),
            "invalid operation: not inside a struct"
        );
        ensure!(self.pending_field.is_none(), "field name already pending");
        self.pending_field = Some(self.require_sid(name)?);
        Ok(self)
    }

    /// Attaches annotations to the next value written.
    pub fn annotate(&mut self, names: &[&str]) -> Result<&mut Self> {
        ensure!(!names.is_empty(), "annotation list cannot be empty");
        let mut sids = Vec::with_capacity(names.len());
        for name in names {
            sids.push(self.require_sid(name)?);
        }
        self.pending_annotations = sids;
        Ok(self)
    }

    pub fn null(&mut self) -> Result<&mut Self> {
        self.emit(vec![0x0F])
    }

    pub fn bool(&mut self, value: bool) -> Result<&mut Self> {
        self.emit(vec![0x10 | value as u8])
    }

    pub fn uint(&mut self, value: u64) -> Result<&mut Self> {
        let mut encoded = Vec::new();
        let magnitude = magnitude_bytes(value);
        push_descriptor(&mut encoded, 0x2, magnitude.len());
        encoded.extend_from_slice(&magnitude);
        self.emit(encoded)
    }

    /// Writes an integer: non-negative values use the unsigned encoding,
    /// negative values the signed one, matching upstream writers.
    pub fn int(&mut self, value: i64) -> Result<&mut Self> {
        if value >= 0 {
            return self.uint(value as u64);
        }
        let mut encoded = Vec::new();
        let magnitude = magnitude_bytes(value.unsigned_abs());
        push_descriptor(&mut encoded, 0x3, magnitude.len());
        encoded.extend_from_slice(&magnitude);
        self.emit(encoded)
    }

    pub fn float(&mut self, value: f64) -> Result<&mut Self> {
        let mut encoded = vec![0x48];
        encoded.extend_from_slice(&value.to_be_bytes());
        self.emit(encoded)
    }

    pub fn string(&mut self, value: &str) -> Result<&mut Self> {
        let mut encoded = Vec::new();
        push_descriptor(&mut encoded, 0x8, value.len());
        encoded.extend_from_slice(value.as_bytes());
        self.emit(encoded)
    }

    pub fn symbol(&mut self, name: &str) -> Result<&mut Self> {
        let sid = self.require_sid(name)?;
        let mut encoded = Vec::new();
        let magnitude = magnitude_bytes(sid);
        push_descriptor(&mut encoded, 0x7, magnitude.len());
        encoded.extend_from_slice(&magnitude);
        self.emit(encoded)
    }

    pub fn blob(&mut self, value: &[u8]) -> Result<&mut Self> {
        let mut encoded = Vec::new();
        push_descriptor(&mut encoded, 0xA, value.len());
        encoded.extend_from_slice(value);
        self.emit(encoded)
    }

    /// Writes a UTC timestamp with second precision, plus a millisecond
    /// fraction when the instant has sub-second content.
    pub fn timestamp(&mut self, value: DateTime<Utc>) -> Result<&mut Self> {
        let mut body = Vec::new();
        push_var_int(&mut body, 0); // offset +00:00
        push_var_uint(&mut body, value.year() as u64);
        push_var_uint(&mut body, value.month() as u64);
        push_var_uint(&mut body, value.day() as u64);
        push_var_uint(&mut body, value.hour() as u64);
        push_var_uint(&mut body, value.minute() as u64);
        push_var_uint(&mut body, value.second() as u64);
        let millis = value.timestamp_subsec_millis() as u64;
        if millis != 0 {
            push_var_int(&mut body, -3);
            body.extend_from_slice(&magnitude_bytes(millis));
        }
        let mut encoded = Vec::new();
        push_descriptor(&mut encoded, 0x6, body.len());
        encoded.extend_from_slice(&body);
        self.emit(encoded)
    }

    pub fn begin_struct(&mut self) -> Result<&mut Self> {
        self.begin_container(IonType::Struct)
    }

    pub fn end_struct(&mut self) -> Result<&mut Self> {
        self.end_container(IonType::Struct, 0xD)
    }

    pub fn begin_list(&mut self) -> Result<&mut Self> {
        self.begin_container(IonType::List)
    }

    pub fn end_list(&mut self) -> Result<&mut Self> {
        self.end_container(IonType::List, 0xB)
    }

    fn begin_container(&mut self, typ: IonType) -> Result<&mut Self> {
        self.stack.push(OpenContainer {
            typ,
            buf: Vec::new(),
            field: self.pending_field.take(),
            annotations: std::mem::take(&mut self.pending_annotations),
        });
        Ok(self)
    }

    fn end_container(&mut self, typ: IonType, tag: u8) -> Result<&mut Self> {
        let open = match self.stack.pop() {
            Some(open) if open.typ == typ => open,
            Some(open) => {
                let found = open.typ;
                self.stack.push(open);
                bail!("mismatched container end: open container is '{found}'")
            }
            None => bail!("invalid operation: no open container"),
        };
        ensure!(
            self.pending_field.is_none(),
            "dangling field name at container end"
        );
        let mut encoded = Vec::new();
        push_descriptor(&mut encoded, tag, open.buf.len());
        encoded.extend_from_slice(&open.buf);
        self.pending_field = open.field;
        self.pending_annotations = open.annotations;
        self.emit(encoded)
    }

    /// Returns the finished stream.
    pub fn finish(self) -> Result<Vec<u8>> {
        ensure!(self.stack.is_empty(), "unclosed container at finish");
        ensure!(
            self.pending_field.is_none() && self.pending_annotations.is_empty(),
            "dangling field name or annotation at finish"
        );
        Ok(self.out)
    }

    fn emit(&mut self, encoded: Vec<u8>) -> Result<&mut Self> {
        let value = if self.pending_annotations.is_empty() {
            encoded
        } else {
            let sids = std::mem::take(&mut self.pending_annotations);
            wrap_annotations(&sids, &encoded)
        };
        let field = self.pending_field.take();
        let target = match self.stack.last_mut() {
            Some(open) => &mut open.buf,
            None => &mut self.out,
        };
        if let Some(sid) = field {
            push_var_uint(target, sid);
        }
        target.extend_from_slice(&value);
        Ok(self)
    }
}

fn wrap_annotations(sids: &[u64], value: &[u8]) -> Vec<u8> {
    let mut annots = Vec::new();
    for &sid in sids {
        push_var_uint(&mut annots, sid);
    }
    let mut body = Vec::new();
    push_var_uint(&mut body, annots.len() as u64);
    body.extend_from_slice(&annots);
    body.extend_from_slice(value);

    let mut out = Vec::new();
    push_descriptor(&mut out, 0xE, body.len());
    out.extend_from_slice(&body);
    out
}

fn push_descriptor(out: &mut Vec<u8>, tag: u8, len: usize) {
    // The struct low nibble 1 is the sorted-field form, so a one-byte struct
    // body must take the extended length path.
    if len < 14 && !(tag == 0xD && len == 1) {
        out.push(tag << 4 | len as u8);
    } else {
        out.push(tag << 4 | 0x0E);
        push_var_uint(out, len as u64);
    }
}

fn push_var_uint(out: &mut Vec<u8>, mut value: u64) {
    let mut tmp = [0u8; 10];
    let mut i = tmp.len();
    loop {
        i -= 1;
        tmp[i] = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    tmp[tmp.len() - 1] |= 0x80;
    out.extend_from_slice(&tmp[i..]);
}

fn push_var_int(out: &mut Vec<u8>, value: i64) {
    let negative = value < 0;
    let magnitude = value.unsigned_abs();
    let mut bytes = 1;
    while bytes < 10 && magnitude >> (6 + 7 * (bytes - 1)) != 0 {
        bytes += 1;
    }
    for i in 0..bytes {
        let shift = 7 * (bytes - 1 - i);
        let mut b = if i == 0 {
            let mut first = ((magnitude >> shift) & 0x3F) as u8;
            if negative {
                first |= 0x40;
            }
            first
        } else {
            ((magnitude >> shift) & 0x7F) as u8
        };
        if i == bytes - 1 {
            b |= 0x80;
        }
        out.push(b);
    }
}

fn magnitude_bytes(value: u64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let significant = 8 - value.leading_zeros() as usize / 8;
    value.to_be_bytes()[8 - significant..].to_vec()
}
