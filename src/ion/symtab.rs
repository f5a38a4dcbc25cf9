//! # Symbol Table
//!
//! Record field names and annotations travel on the wire as small integer
//! symbol ids resolved through a table that is itself transmitted in-band:
//! specially annotated records interleaved with the data. The table grows
//! monotonically as those records are encountered and resets whenever a
//! binary version marker appears.
//!
//! Each reader owns exactly one table; tables are never shared across
//! streams.
//!
//! ## Id Assignment
//!
//! | Id  | Symbol                      |
//! |-----|-----------------------------|
//! | 1-9 | system symbols (fixed)      |
//! | 10+ | local symbols, in stream order |
//!
//! Id 0 is reserved and never resolves.

use eyre::{bail, ensure, Result};

use crate::ion::types::{parse_descriptor, read_uint_field, read_var_uint, sys, IonType};

pub(crate) const SYSTEM_SYMBOLS: [&str; 9] = [
    "$ion",
    "$ion_1_0",
    "$ion_symbol_table",
    "name",
    "version",
    "imports",
    "symbols",
    "max_id",
    "$ion_shared_symbol_table",
];

/// Ordered mapping from symbol id to interned string.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    names: Vec<String>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut table = Self { names: Vec::new() };
        table.reset();
        table
    }

    /// Drops all local symbols, keeping only the system symbols.
    pub fn reset(&mut self) {
        self.names.clear();
        self.names.extend(SYSTEM_SYMBOLS.iter().map(|s| s.to_string()));
    }

    /// Resolves a symbol id to its interned string.
    pub fn lookup(&self, sid: u64) -> Option<&str> {
        if sid == 0 {
            return None;
        }
        self.names.get(sid as usize - 1).map(String::as_str)
    }

    /// The highest assigned symbol id.
    pub fn max_id(&self) -> u64 {
        self.names.len() as u64
    }

    pub(crate) fn push(&mut self, name: String) -> u64 {
        self.names.push(name);
        self.names.len() as u64
    }

    /// Applies a local symbol table record given the raw bytes of its struct
    /// body.
    ///
    /// An `imports` field naming the symbol-table symbol switches to append
    /// mode; otherwise the table is rebuilt from the system symbols before the
    /// `symbols` list is added. Shared-table imports (a list value) are not
    /// part of the consumed subset and are rejected.
    pub(crate) fn apply_local_table(&mut self, body: &[u8]) -> Result<()> {
        let mut append = false;
        for field in StructFields::new(body) {
            let (sid, typ, value) = field?;
            if sid != sys::IMPORTS {
                continue;
            }
            match typ {
                IonType::Symbol => {
                    append = read_uint_field(value)? == sys::SYMBOL_TABLE;
                }
                IonType::Null => {}
                IonType::List => bail!("shared symbol table imports are not supported"),
                other => bail!("invalid symbol table imports field of type '{other}'"),
            }
        }

        if !append {
            self.reset();
        }

        for field in StructFields::new(body) {
            let (sid, typ, value) = field?;
            if sid != sys::SYMBOLS {
                continue;
            }
            if typ == IonType::Null {
                continue;
            }
            ensure!(
                typ == IonType::List,
                "invalid symbol table symbols field of type '{typ}'"
            );
            let mut pos = 0;
            while pos < value.len() {
                let d = parse_descriptor(&value[pos..])?;
                let total = d.header_len + d.body_len;
                ensure!(pos + total <= value.len(), "truncated symbol table entry");
                if d.pad {
                    pos += total;
                    continue;
                }
                ensure!(
                    d.typ == IonType::String,
                    "symbol table entry must be a string, got '{}'",
                    d.typ
                );
                let bytes = &value[pos + d.header_len..pos + total];
                let name = std::str::from_utf8(bytes)
                    .map_err(|e| eyre::eyre!("invalid UTF-8 in symbol table entry: {e}"))?;
                self.push(name.to_string());
                pos += total;
            }
        }

        Ok(())
    }
}

/// Iterator over the `(field id, type, body)` triples of a raw struct body.
struct StructFields<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> StructFields<'a> {
    fn new(body: &'a [u8]) -> Self {
        Self { body, pos: 0 }
    }

    fn next_field(&mut self) -> Result<Option<(u64, IonType, &'a [u8])>> {
        loop {
            if self.pos >= self.body.len() {
                return Ok(None);
            }
            let (sid, n) = read_var_uint(&self.body[self.pos..])?;
            let d = parse_descriptor(&self.body[self.pos + n..])?;
            let start = self.pos + n + d.header_len;
            let end = start + d.body_len;
            ensure!(end <= self.body.len(), "truncated symbol table field");
            self.pos = end;
            if d.pad {
                continue;
            }
            return Ok(Some((sid, d.typ, &self.body[start..end])));
        }
    }
}

impl<'a> Iterator for StructFields<'a> {
    type Item = Result<(u64, IonType, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_field().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_symbols_resolve_out_of_the_box() {
        let table = SymbolTable::new();
        assert_eq!(table.lookup(1), Some("$ion"));
        assert_eq!(table.lookup(3), Some("$ion_symbol_table"));
        assert_eq!(table.lookup(9), Some("$ion_shared_symbol_table"));
        assert_eq!(table.lookup(0), None);
        assert_eq!(table.lookup(10), None);
        assert_eq!(table.max_id(), 9);
    }

    #[test]
    fn local_table_replaces_by_default() {
        let mut table = SymbolTable::new();
        // {symbols: ["x"]}
        table.apply_local_table(&[0x87, 0xB2, 0x81, b'x']).unwrap();
        assert_eq!(table.lookup(10), Some("x"));

        // Another table without imports starts over.
        table.apply_local_table(&[0x87, 0xB2, 0x81, b'y']).unwrap();
        assert_eq!(table.lookup(10), Some("y"));
        assert_eq!(table.lookup(11), None);
    }

    #[test]
    fn local_table_with_symbol_table_import_appends() {
        let mut table = SymbolTable::new();
        table.apply_local_table(&[0x87, 0xB2, 0x81, b'x']).unwrap();
        // {imports: $ion_symbol_table, symbols: ["y"]}
        table
            .apply_local_table(&[0x86, 0x71, 0x03, 0x87, 0xB2, 0x81, b'y'])
            .unwrap();
        assert_eq!(table.lookup(10), Some("x"));
        assert_eq!(table.lookup(11), Some("y"));
    }

    #[test]
    fn shared_imports_are_rejected() {
        let mut table = SymbolTable::new();
        // {imports: []}
        let result = table.apply_local_table(&[0x86, 0xB0]);
        assert!(result.unwrap_err().to_string().contains("not supported"));
    }

    #[test]
    fn reset_drops_local_symbols() {
        let mut table = SymbolTable::new();
        table.apply_local_table(&[0x87, 0xB2, 0x81, b'x']).unwrap();
        table.reset();
        assert_eq!(table.lookup(10), None);
        assert_eq!(table.max_id(), 9);
    }

    #[test]
    fn non_string_symbol_entries_are_rejected() {
        let mut table = SymbolTable::new();
        // {symbols: [5]}
        let result = table.apply_local_table(&[0x87, 0xB2, 0x21, 0x05]);
        assert!(result.unwrap_err().to_string().contains("must be a string"));
    }
}
