//! # ionframe - Columnar Decoder for Binary Result Streams
//!
//! ionframe decodes self-describing, length-prefixed binary value streams
//! (query results arriving as rows of records) into typed columnar frames.
//! This implementation prioritizes:
//!
//! - **Zero-copy scanning**: string and byte values are borrowed slices of
//!   the input buffer until a column claims them
//! - **Single allocation per column**: a schema-inference pass sizes every
//!   vector before any value is stored
//! - **Strict streams**: malformed encodings, truncated buffers and protocol
//!   violations are errors, never best-effort values
//!
//! ## Quick Start
//!
//! ```ignore
//! use ionframe::decode_frame;
//!
//! let frame = decode_frame(&payload, Some("timestamp"))?;
//! for column in &frame.columns {
//!     println!("{}: {} rows", column.name, frame.row_count);
//! }
//! ```
//!
//! ## Architecture
//!
//! Decoding is two passes over the same buffer:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │       Public API (decode_frame)      │
//! ├─────────────────────────────────────┤
//! │ Schema Inference │  Materialization  │
//! ├──────────────────┴──────────────────┤
//! │    Row Iterator + Status Envelopes   │
//! ├─────────────────────────────────────┤
//! │  Value Reader / Symbol Tables        │
//! ├─────────────────────────────────────┤
//! │  Descriptors + Variable-Length Ints  │
//! └─────────────────────────────────────┘
//! ```
//!
//! The first pass unifies each field's observed types into a column type and
//! counts rows; the second pass allocates one typed vector per column and
//! fills it. Columns whose observations conflict fall back to JSON values.
//!
//! ## Module Overview
//!
//! - [`ion`]: the wire encoding (descriptors, symbol tables, reader, builder)
//! - [`rows`]: top-level row iteration and terminal status envelopes
//! - [`schema`]: first pass, column type unification
//! - [`columns`]: second pass, typed column storage
//! - [`frame`]: `decode_frame`, tying both passes together

pub mod columns;
pub mod frame;
pub mod ion;
pub mod rows;
pub mod schema;

pub use columns::{ColumnValues, FieldColumn};
pub use frame::{decode_frame, Frame, FrameColumn, QueryStats};
pub use ion::{IonType, Reader, StreamBuilder, SymbolTable};
pub use rows::{iterate_rows, FinalStatus, Status};
pub use schema::{derive_schema, Column, ColumnType, Schema};
