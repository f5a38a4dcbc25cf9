//! # Frame Assembly
//!
//! `decode_frame` is the crate entry point: it runs the inference pass, turns
//! a failed query into an error, allocates typed storage from the schema and
//! runs the materialization pass. Both passes walk the same buffer with the
//! same row iterator; the first never reads values, the second never guesses
//! types.

use eyre::{bail, Result};
use hashbrown::HashMap;
use tracing::debug;

use crate::columns::{ColumnValues, FieldColumn};
use crate::rows::{iterate_rows, Status};
use crate::schema::derive_schema;

/// Execution statistics from the success envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub hits: i64,
    pub misses: i64,
    pub scanned: i64,
}

/// One fully materialized column.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameColumn {
    pub name: String,
    pub values: ColumnValues,
}

/// A decoded result set: columns in projection order, all of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub row_count: usize,
    pub columns: Vec<FrameColumn>,
    pub stats: QueryStats,
}

/// Decodes a complete result stream into a columnar frame.
///
/// `time_field` names a column to convert to timestamps; integer columns are
/// taken as epoch milliseconds, text columns as RFC 3339. A failed query
/// (either envelope shape) is returned as an error, not a frame.
pub fn decode_frame(buf: &[u8], time_field: Option<&str>) -> Result<Frame> {
    let schema = derive_schema(buf)?;
    let status = match schema.status {
        Status::Success(status) => status,
        Status::Failure(message) => bail!("query execution failed: '{message}'"),
    };
    if !status.error.is_empty() {
        bail!("query execution failed: '{}'", status.error);
    }
    debug!(
        rows = schema.row_count,
        columns = schema.columns.len(),
        "derived result schema"
    );

    let mut fields = Vec::with_capacity(schema.columns.len());
    let mut lookup: HashMap<&str, usize> = HashMap::with_capacity(schema.columns.len());
    for (i, col) in schema.columns.iter().enumerate() {
        let is_time = time_field == Some(col.name.as_str());
        fields.push(FieldColumn::for_column(col, schema.row_count, is_time)?);
        lookup.insert(col.name.as_str(), i);
    }

    iterate_rows(buf, |reader, row| {
        while reader.advance()? {
            let target = {
                let name = reader.field_name()?;
                lookup.get(name).copied()
            };
            if let Some(i) = target {
                fields[i].read_row(reader, row)?;
            }
        }
        Ok(())
    })?;
    debug!(rows = schema.row_count, "materialized frame");

    let columns = fields
        .into_iter()
        .map(|f| FrameColumn {
            name: f.name,
            values: f.values,
        })
        .collect();

    Ok(Frame {
        row_count: schema.row_count,
        columns,
        stats: QueryStats {
            hits: status.hits,
            misses: status.misses,
            scanned: status.scanned,
        },
    })
}
