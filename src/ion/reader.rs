//! # Reader - Zero-Copy Stream Cursor
//!
//! This module provides `Reader`, a pull-style cursor over a fully buffered
//! binary value stream. All text and blob getters return references into the
//! underlying buffer for zero-copy operation.
//!
//! ## Usage
//!
//! ```ignore
//! let mut reader = Reader::new(&payload);
//! while reader.advance()? {
//!     reader.enter()?;
//!     while reader.advance()? {
//!         let name = reader.field_name()?;
//!         let value = reader.read_number()?;
//!     }
//!     reader.exit()?;
//! }
//! ```
//!
//! ## Container Frames
//!
//! Instead of recursive-descent parsing, the reader keeps an explicit stack of
//! activation frames, one per entered container. A frame is a byte window plus
//! the cursor and current-value state inside it. `enter` pushes a frame over
//! the pending container's body; `exit` pops it, which implicitly discards any
//! values the caller never consumed (the parent's cursor already sits past the
//! container). Only the top frame is ever mutated.
//!
//! ## Transparent Stream Maintenance
//!
//! Two kinds of top-level noise never surface to the caller: binary version
//! markers (which reset the symbol table) and symbol-table records (which
//! extend or replace it). `advance` applies both and moves on to the next real
//! value. NOP padding is skipped at any depth.
//!
//! ## End of Input vs Truncation
//!
//! A clean end between values yields `Ok(false)` from `advance`. A value whose
//! declared size runs past the window is an error: the distinction between
//! "done" and "cut off" is load-bearing for callers that require a terminal
//! record.

use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use eyre::{bail, ensure, Result};
use smallvec::SmallVec;

use crate::ion::symtab::SymbolTable;
use crate::ion::types::{
    is_bvm, parse_descriptor, read_uint_field, read_var_int, read_var_uint, sys, IonType,
};

#[derive(Debug)]
struct Frame {
    /// Cursor within the window; always at or past the current value's end.
    pos: usize,
    /// Window end (exclusive).
    end: usize,
    /// Container type this frame is inside, `None` at the top level.
    container: Option<IonType>,
    /// Type of the pending value, `None` before the first `advance`.
    typ: Option<IonType>,
    /// Body bounds of the pending value (absolute offsets).
    value: (usize, usize),
    /// Bool payload when `typ` is `Bool` (bools encode in the descriptor).
    truthy: bool,
    /// Field-name symbol when inside a struct.
    label: Option<u64>,
    /// Annotation symbols preceding the pending value.
    annotations: SmallVec<[u64; 2]>,
}

impl Frame {
    fn window(start: usize, end: usize, container: Option<IonType>) -> Self {
        Self {
            pos: start,
            end,
            container,
            typ: None,
            value: (start, start),
            truthy: false,
            label: None,
            annotations: SmallVec::new(),
        }
    }
}

/// Stateful cursor over one binary value stream.
///
/// The symbol table is owned by the reader and updated as symbol-table
/// records are encountered; it is never shared across streams.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    symbols: SymbolTable,
    frame: Frame,
    stack: Vec<Frame>,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            symbols: SymbolTable::new(),
            frame: Frame::window(0, data.len(), None),
            stack: Vec::new(),
        }
    }

    /// Moves to the next value at the current nesting level.
    ///
    /// Returns `Ok(false)` on a clean end of the current container or stream.
    /// Version markers, symbol-table records and padding are consumed
    /// transparently.
    pub fn advance(&mut self) -> Result<bool> {
        self.frame.typ = None;
        self.frame.label = None;
        self.frame.annotations.clear();

        // Set once an annotation wrapper has been opened; the next parsed
        // value is the wrapped one, must exist and must end exactly at the
        // wrapper's body end.
        let mut wrapper_end: Option<usize> = None;
        loop {
            if self.frame.pos >= self.frame.end {
                ensure!(
                    wrapper_end.is_none(),
                    "annotation wrapper without a wrapped value"
                );
                return Ok(false);
            }

            if wrapper_end.is_none() {
                if self.frame.container.is_none() && self.data[self.frame.pos] == 0xE0 {
                    ensure!(
                        is_bvm(&self.data[self.frame.pos..self.frame.end]),
                        "unsupported binary version marker"
                    );
                    self.symbols.reset();
                    self.frame.pos += 4;
                    continue;
                }
                if self.frame.container == Some(IonType::Struct) {
                    let (sid, n) =
                        read_var_uint(&self.data[self.frame.pos..self.frame.end])?;
                    self.frame.label = Some(sid);
                    self.frame.pos += n;
                    ensure!(self.frame.pos < self.frame.end, "truncated struct field");
                }
            }

            let end = wrapper_end.unwrap_or(self.frame.end);
            let d = parse_descriptor(&self.data[self.frame.pos..end])?;
            let total = d.header_len + d.body_len;
            ensure!(
                self.frame.pos + total <= end,
                "truncated value: {} declares {} bytes, {} available",
                d.typ,
                total,
                end - self.frame.pos
            );

            if d.pad {
                ensure!(
                    wrapper_end.is_none(),
                    "annotation wrapper cannot wrap padding"
                );
                self.frame.pos += total;
                self.frame.label = None;
                continue;
            }

            if d.typ == IonType::Annotation {
                ensure!(
                    wrapper_end.is_none(),
                    "nested annotation wrappers are not allowed"
                );
                let body_start = self.frame.pos + d.header_len;
                let body = &self.data[body_start..body_start + d.body_len];
                let (annot_bytes, n) = read_var_uint(body)?;
                let annots_end = n + annot_bytes as usize;
                ensure!(
                    annots_end < body.len(),
                    "annotation wrapper without a wrapped value"
                );

                let mut sids: SmallVec<[u64; 2]> = SmallVec::new();
                let mut pos = n;
                while pos < annots_end {
                    let (sid, m) = read_var_uint(&body[pos..annots_end])?;
                    sids.push(sid);
                    pos += m;
                }
                ensure!(!sids.is_empty(), "annotation wrapper without symbols");

                if sids[0] == sys::SYMBOL_TABLE {
                    let inner = parse_descriptor(&body[annots_end..])?;
                    ensure!(
                        inner.typ == IonType::Struct,
                        "symbol table annotation on '{}' value",
                        inner.typ
                    );
                    let start = annots_end + inner.header_len;
                    ensure!(
                        start + inner.body_len <= body.len(),
                        "truncated symbol table record"
                    );
                    self.symbols
                        .apply_local_table(&body[start..start + inner.body_len])?;
                    self.frame.pos += total;
                    continue;
                }

                self.frame.annotations = sids;
                self.frame.pos = body_start + annots_end;
                wrapper_end = Some(body_start + d.body_len);
                continue;
            }

            if let Some(end) = wrapper_end {
                ensure!(
                    self.frame.pos + total == end,
                    "annotation wrapper length does not match its value"
                );
            }

            self.frame.typ = Some(d.typ);
            self.frame.truthy = d.truthy;
            self.frame.value = (self.frame.pos + d.header_len, self.frame.pos + total);
            self.frame.pos += total;
            return Ok(true);
        }
    }

    /// Type tag of the pending value, or `None` before the first `advance`
    /// and after the end of a container.
    pub fn current_type(&self) -> Option<IonType> {
        self.frame.typ
    }

    /// Current nesting depth (0 at the top level).
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Descends into the pending struct or list.
    pub fn enter(&mut self) -> Result<()> {
        match self.frame.typ {
            Some(IonType::Struct) | Some(IonType::List) => {}
            Some(t) => bail!("expected 'struct' or 'list' type, got '{t}'"),
            None => bail!("expected 'struct' or 'list' type, got no pending value"),
        }
        let (start, end) = self.frame.value;
        let container = self.frame.typ;
        let inner = Frame::window(start, end, container);
        self.stack.push(std::mem::replace(&mut self.frame, inner));
        Ok(())
    }

    /// Leaves the current container, discarding any unconsumed values.
    pub fn exit(&mut self) -> Result<()> {
        match self.stack.pop() {
            Some(parent) => {
                self.frame = parent;
                Ok(())
            }
            None => bail!("invalid operation: not inside a struct or list"),
        }
    }

    /// Decoded name of the current field. Fails outside a struct and on ids
    /// missing from the symbol table.
    pub fn field_name(&self) -> Result<&str> {
        let sid = self
            .frame
            .label
            .ok_or_else(|| eyre::eyre!("invalid operation: not inside a struct"))?;
        self.resolve(sid)
    }

    /// Annotation names attached to the pending value; empty if none.
    pub fn annotations(&self) -> Result<SmallVec<[&str; 2]>> {
        let mut names = SmallVec::new();
        for &sid in &self.frame.annotations {
            names.push(self.resolve(sid)?);
        }
        Ok(names)
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    fn resolve(&self, sid: u64) -> Result<&str> {
        self.symbols
            .lookup(sid)
            .ok_or_else(|| eyre::eyre!("symbol {sid} not in symbol table"))
    }

    fn body(&self, want: IonType) -> Result<&'a [u8]> {
        match self.frame.typ {
            Some(t) if t == want => Ok(&self.data[self.frame.value.0..self.frame.value.1]),
            Some(t) => bail!("expected '{want}' type, got '{t}'"),
            None => bail!("expected '{want}' type, got no pending value"),
        }
    }

    fn is_null(&self) -> bool {
        self.frame.typ == Some(IonType::Null)
    }

    pub fn read_null(&self) -> Result<()> {
        self.body(IonType::Null).map(|_| ())
    }

    pub fn read_bool(&self) -> Result<bool> {
        self.body(IonType::Bool)?;
        Ok(self.frame.truthy)
    }

    pub fn read_nullable_bool(&self) -> Result<Option<bool>> {
        if self.is_null() {
            return Ok(None);
        }
        self.read_bool().map(Some)
    }

    pub fn read_uint(&self) -> Result<u64> {
        read_uint_field(self.body(IonType::Uint)?)
    }

    pub fn read_nullable_uint(&self) -> Result<Option<u64>> {
        if self.is_null() {
            return Ok(None);
        }
        self.read_uint().map(Some)
    }

    /// Reads a signed integer from either integer encoding.
    pub fn read_int(&self) -> Result<i64> {
        match self.frame.typ {
            Some(IonType::Uint) => {
                let magnitude = read_uint_field(self.body(IonType::Uint)?)?;
                ensure!(
                    magnitude <= i64::MAX as u64,
                    "integer {magnitude} overflows signed 64 bits"
                );
                Ok(magnitude as i64)
            }
            Some(IonType::Int) => {
                let magnitude = read_uint_field(self.body(IonType::Int)?)?;
                if magnitude == 1 << 63 {
                    return Ok(i64::MIN);
                }
                ensure!(
                    magnitude <= i64::MAX as u64,
                    "integer -{magnitude} overflows signed 64 bits"
                );
                Ok(-(magnitude as i64))
            }
            Some(t) => bail!("expected 'int' type, got '{t}'"),
            None => bail!("expected 'int' type, got no pending value"),
        }
    }

    pub fn read_nullable_int(&self) -> Result<Option<i64>> {
        if self.is_null() {
            return Ok(None);
        }
        self.read_int().map(Some)
    }

    pub fn read_float(&self) -> Result<f64> {
        let body = self.body(IonType::Float)?;
        match body.len() {
            0 => Ok(0.0),
            4 => Ok(f32::from_be_bytes([body[0], body[1], body[2], body[3]]) as f64),
            8 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(body);
                Ok(f64::from_be_bytes(bytes))
            }
            n => bail!("invalid float length {n}"),
        }
    }

    pub fn read_nullable_float(&self) -> Result<Option<f64>> {
        if self.is_null() {
            return Ok(None);
        }
        self.read_float().map(Some)
    }

    /// Reads any numeric value widened to `f64`. Unsigned and signed integers
    /// are promoted losslessly within `f64` mantissa range.
    pub fn read_number(&self) -> Result<f64> {
        match self.frame.typ {
            Some(IonType::Uint) => Ok(self.read_uint()? as f64),
            Some(IonType::Int) => Ok(self.read_int()? as f64),
            Some(IonType::Float) => self.read_float(),
            Some(t) => bail!("expected numeric type, got '{t}'"),
            None => bail!("expected numeric type, got no pending value"),
        }
    }

    pub fn read_nullable_number(&self) -> Result<Option<f64>> {
        if self.is_null() {
            return Ok(None);
        }
        self.read_number().map(Some)
    }

    pub fn read_symbol(&self) -> Result<u64> {
        read_uint_field(self.body(IonType::Symbol)?)
    }

    pub fn read_string(&self) -> Result<&'a str> {
        let body = self.body(IonType::String)?;
        std::str::from_utf8(body).map_err(|e| eyre::eyre!("invalid UTF-8 in string: {e}"))
    }

    /// Reads any text value (symbol or string) as a string slice.
    pub fn read_text(&self) -> Result<&str> {
        match self.frame.typ {
            Some(IonType::Symbol) => {
                let sid = self.read_symbol()?;
                self.resolve(sid)
            }
            Some(IonType::String) => self.read_string(),
            Some(t) => bail!("expected text type, got '{t}'"),
            None => bail!("expected text type, got no pending value"),
        }
    }

    pub fn read_nullable_text(&self) -> Result<Option<&str>> {
        if self.is_null() {
            return Ok(None);
        }
        self.read_text().map(Some)
    }

    pub fn read_bytes(&self) -> Result<&'a [u8]> {
        self.body(IonType::Blob)
    }

    pub fn read_nullable_bytes(&self) -> Result<Option<&'a [u8]>> {
        if self.is_null() {
            return Ok(None);
        }
        self.read_bytes().map(Some)
    }

    pub fn read_timestamp(&self) -> Result<DateTime<Utc>> {
        decode_timestamp(self.body(IonType::Timestamp)?)
    }

    pub fn read_nullable_timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        if self.is_null() {
            return Ok(None);
        }
        self.read_timestamp().map(Some)
    }
}

/// Decodes a timestamp body: offset (`VarInt`, minutes) followed by year,
/// month, day, hour, minute and second `VarUInt` components (later components
/// optional) and an optional fractional-second exponent/coefficient pair.
/// The components are local time; subtracting the offset yields UTC.
fn decode_timestamp(body: &[u8]) -> Result<DateTime<Utc>> {
    ensure!(!body.is_empty(), "truncated timestamp");
    let (offset_minutes, mut pos) = read_var_int(body)?;

    let mut next = |name: &str| -> Result<Option<u32>> {
        if pos >= body.len() {
            return Ok(None);
        }
        let (value, n) = read_var_uint(&body[pos..])
            .map_err(|e| eyre::eyre!("invalid timestamp {name}: {e}"))?;
        pos += n;
        let value = u32::try_from(value)
            .map_err(|_| eyre::eyre!("timestamp {name} {value} out of range"))?;
        Ok(Some(value))
    };

    let year = next("year")?.ok_or_else(|| eyre::eyre!("timestamp without year"))?;
    let month = next("month")?.unwrap_or(1);
    let day = next("day")?.unwrap_or(1);
    let hour = next("hour")?;
    let minute = next("minute")?;
    ensure!(
        hour.is_none() == minute.is_none(),
        "timestamp hour without minute"
    );
    let second = next("second")?.unwrap_or(0);

    let mut nanos: u64 = 0;
    if pos < body.len() {
        let (exponent, n) = read_var_int(&body[pos..])?;
        pos += n;
        let coefficient = read_uint_field(&body[pos..])?;
        ensure!(
            (-9..=0).contains(&exponent),
            "unsupported timestamp fraction exponent {exponent}"
        );
        nanos = coefficient
            .checked_mul(10u64.pow((9 + exponent) as u32))
            .ok_or_else(|| eyre::eyre!("timestamp fraction exceeds one second"))?;
        ensure!(nanos < 1_000_000_000, "timestamp fraction exceeds one second");
    }

    let year = i32::try_from(year)
        .map_err(|_| eyre::eyre!("timestamp year {year} out of range"))?;
    let date = NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| eyre::eyre!("invalid timestamp date {year}-{month}-{day}"))?;
    let time = chrono::NaiveTime::from_hms_nano_opt(
        hour.unwrap_or(0),
        minute.unwrap_or(0),
        second,
        nanos as u32,
    )
    .ok_or_else(|| {
        eyre::eyre!(
            "invalid timestamp time {}:{}:{second}",
            hour.unwrap_or(0),
            minute.unwrap_or(0)
        )
    })?;

    let local = date.and_time(time);
    let utc = local - TimeDelta::minutes(offset_minutes);
    Ok(DateTime::from_naive_utc_and_offset(utc, Utc))
}
