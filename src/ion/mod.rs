//! # Binary Value Encoding Layer
//!
//! This module implements the subset of the self-describing binary value
//! encoding that query result streams use: scalars, structs, lists, symbol
//! tables and annotations. Values are type-and-length prefixed, record fields
//! are keyed by interned symbol ids, and a reserved 4-byte version marker
//! opens the stream and resets symbol state.
//!
//! ## Module Structure
//!
//! - `types`: type tags, descriptor parsing, variable-length integer fields
//! - `symtab`: in-band symbol table (system symbols, replace/append records)
//! - `reader`: pull-style cursor with an explicit container-frame stack
//! - `builder`: stream construction, the reader's mirror image
//!
//! ## Consumed Subset
//!
//! | Supported | Rejected on read |
//! |-----------|------------------|
//! | null (incl. typed nulls), bool, uint, int, float, timestamp, symbol, string, blob, list, struct, annotations | decimal, clob, sexp, shared symbol-table imports |

pub mod builder;
pub mod reader;
pub mod symtab;
pub mod types;


pub use builder::StreamBuilder;
pub use reader::Reader;
pub use symtab::SymbolTable;
pub use types::{is_bvm, IonType, BVM};
