//! # Schema Inference
//!
//! The first decode pass walks every row once and derives one `Column` per
//! distinct field name. Column types start from the first observation and are
//! widened by an explicit unification table as further rows disagree; the
//! second pass then allocates storage from the finished `Schema` without ever
//! reallocating.
//!
//! ## Unification
//!
//! | current \ observed | same | `Null` | other |
//! |--------------------|------|--------|-------|
//! | `Null`    | keep | keep | adopt observed |
//! | non-null  | keep | keep, mark nullable | `Unknown` |
//!
//! `Unknown` is the dynamic catch-all: columns that reach it are materialized
//! as raw JSON values. Number columns additionally track `floating` and
//! `signed`, which only ever turn on.

use eyre::Result;
use hashbrown::HashMap;

use crate::ion::{IonType, Reader};
use crate::rows::{iterate_rows, Status};

/// Inferred column type, the unification lattice of `IonType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Conflicting or unsupported observations; materialized as JSON.
    Unknown,
    Null,
    Bool,
    Number,
    Timestamp,
    Text,
    Struct,
    List,
}

impl ColumnType {
    /// Maps a wire type to its column type. Types the materializer has no
    /// native representation for collapse to `Unknown`.
    pub fn from_ion(typ: IonType) -> Self {
        match typ {
            IonType::Null => ColumnType::Null,
            IonType::Bool => ColumnType::Bool,
            IonType::Uint | IonType::Int | IonType::Float => ColumnType::Number,
            IonType::Timestamp => ColumnType::Timestamp,
            IonType::Symbol | IonType::String => ColumnType::Text,
            IonType::Struct => ColumnType::Struct,
            IonType::List => ColumnType::List,
            _ => ColumnType::Unknown,
        }
    }

    /// Unifies the current column type with a newly observed one. Returns the
    /// widened type and whether the observation implies nullability.
    pub fn unify(self, observed: ColumnType) -> (ColumnType, bool) {
        if self == observed {
            return (self, false);
        }
        if observed == ColumnType::Null {
            return (self, true);
        }
        if self == ColumnType::Null {
            return (observed, false);
        }
        (ColumnType::Unknown, false)
    }
}

/// One inferred result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Position within the row, or -1 when fields move between rows (the
    /// column is then matched by name during materialization).
    pub index: i32,
    pub name: String,
    pub typ: ColumnType,
    /// Saw an explicit null value.
    pub nullable: bool,
    /// Missing from at least one row.
    pub optional: bool,
    /// Number column saw a float.
    pub floating: bool,
    /// Number column saw a signed or float value.
    pub signed: bool,
    pub(crate) count: usize,
}

/// Result of the inference pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub row_count: usize,
    pub columns: Vec<Column>,
    pub status: Status,
}

/// Runs the first pass: walks every row of `buf` and infers the column set.
pub fn derive_schema(buf: &[u8]) -> Result<Schema> {
    let mut columns: Vec<Column> = Vec::new();
    let mut lookup: HashMap<String, usize> = HashMap::new();
    let mut row_count = 0usize;

    let status = iterate_rows(buf, |reader, _| {
        row_count += 1;
        analyze_row(reader, &mut columns, &mut lookup, row_count)
    })?;

    for column in &mut columns {
        if column.count != row_count {
            column.optional = true;
        }
    }

    if let Status::Success(final_status) = &status {
        if final_status.error.is_empty() {
            if let Some(order) = &final_status.result_set {
                reorder_columns(&mut columns, order);
            }
        }
    }

    Ok(Schema {
        row_count,
        columns,
        status,
    })
}

fn analyze_row(
    reader: &mut Reader<'_>,
    columns: &mut Vec<Column>,
    lookup: &mut HashMap<String, usize>,
    row_count: usize,
) -> Result<()> {
    let mut position = 0i32;
    while reader.advance()? {
        let name = reader.field_name()?.to_string();
        let typ = match reader.current_type() {
            Some(t) => t,
            None => continue,
        };
        let observed = ColumnType::from_ion(typ);

        match lookup.get(&name) {
            Some(&i) => {
                let column = &mut columns[i];
                column.count += 1;
                if column.index != position {
                    column.index = -1;
                }
                let (unified, saw_null) = column.typ.unify(observed);
                column.typ = unified;
                column.nullable |= saw_null;
                if unified == ColumnType::Number {
                    if typ == IonType::Float {
                        column.floating = true;
                    }
                    if matches!(typ, IonType::Int | IonType::Float) {
                        column.signed = true;
                    }
                }
            }
            None => {
                lookup.insert(name.clone(), columns.len());
                columns.push(Column {
                    index: position,
                    name,
                    typ: observed,
                    nullable: observed == ColumnType::Null,
                    // A column first seen after row 1 was missing earlier.
                    optional: row_count != 1,
                    floating: typ == IonType::Float,
                    signed: matches!(typ, IonType::Int | IonType::Float),
                    count: 1,
                });
            }
        }
        position += 1;
    }
    Ok(())
}

/// Applies the authoritative projection order from the success envelope.
/// Columns it does not mention keep index -1 and sort after the matched ones.
fn reorder_columns(columns: &mut [Column], order: &[String]) {
    for column in columns.iter_mut() {
        column.index = -1;
    }
    for (i, name) in order.iter().enumerate() {
        if let Some(column) = columns.iter_mut().find(|c| &c.name == name) {
            column.index = i as i32;
        }
    }
    columns.sort_by_key(|c| (c.index == -1, c.index));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ion::StreamBuilder;

    #[test]
    fn unify_keeps_equal_types() {
        assert_eq!(
            ColumnType::Number.unify(ColumnType::Number),
            (ColumnType::Number, false)
        );
    }

    #[test]
    fn unify_null_observation_marks_nullable() {
        assert_eq!(
            ColumnType::Text.unify(ColumnType::Null),
            (ColumnType::Text, true)
        );
    }

    #[test]
    fn unify_adopts_type_after_leading_nulls() {
        assert_eq!(
            ColumnType::Null.unify(ColumnType::Bool),
            (ColumnType::Bool, false)
        );
    }

    #[test]
    fn unify_conflict_widens_to_unknown() {
        assert_eq!(
            ColumnType::Text.unify(ColumnType::Number),
            (ColumnType::Unknown, false)
        );
        assert_eq!(
            ColumnType::Unknown.unify(ColumnType::Number),
            (ColumnType::Unknown, false)
        );
    }

    fn stream(write_rows: impl FnOnce(&mut StreamBuilder)) -> Vec<u8> {
        let mut b = StreamBuilder::new();
        b.define_symbols(&[
            "final_status",
            "hits",
            "misses",
            "scanned",
            "error",
            "result_set",
            "a",
            "b",
            "c",
        ])
        .unwrap();
        write_rows(&mut b);
        b.annotate(&["final_status"]).unwrap();
        b.begin_struct().unwrap();
        b.field("hits").unwrap().int(0).unwrap();
        b.field("error").unwrap().string("").unwrap();
        b.end_struct().unwrap();
        b.finish().unwrap()
    }

    #[test]
    fn uniform_column_keeps_its_type() {
        let buf = stream(|b| {
            for v in [1u64, 2, 3] {
                b.begin_struct().unwrap();
                b.field("a").unwrap().uint(v).unwrap();
                b.end_struct().unwrap();
            }
        });
        let schema = derive_schema(&buf).unwrap();
        assert_eq!(schema.row_count, 3);
        assert_eq!(schema.columns.len(), 1);
        let col = &schema.columns[0];
        assert_eq!(col.typ, ColumnType::Number);
        assert!(!col.nullable && !col.optional && !col.floating && !col.signed);
        assert_eq!(col.index, 0);
    }

    #[test]
    fn disjoint_fields_become_optional() {
        let buf = stream(|b| {
            b.begin_struct().unwrap();
            b.field("a").unwrap().uint(1).unwrap();
            b.end_struct().unwrap();
            b.begin_struct().unwrap();
            b.field("b").unwrap().uint(2).unwrap();
            b.end_struct().unwrap();
        });
        let schema = derive_schema(&buf).unwrap();
        assert_eq!(schema.columns.len(), 2);
        assert!(schema.columns.iter().all(|c| c.optional));
    }

    #[test]
    fn signed_and_floating_flags_only_turn_on() {
        let buf = stream(|b| {
            b.begin_struct().unwrap();
            b.field("a").unwrap().uint(1).unwrap();
            b.end_struct().unwrap();
            b.begin_struct().unwrap();
            b.field("a").unwrap().float(2.5).unwrap();
            b.end_struct().unwrap();
            b.begin_struct().unwrap();
            b.field("a").unwrap().uint(3).unwrap();
            b.end_struct().unwrap();
        });
        let schema = derive_schema(&buf).unwrap();
        let col = &schema.columns[0];
        assert_eq!(col.typ, ColumnType::Number);
        assert!(col.floating && col.signed);
    }

    #[test]
    fn moving_field_positions_clear_the_index() {
        let buf = stream(|b| {
            b.begin_struct().unwrap();
            b.field("a").unwrap().uint(1).unwrap();
            b.field("b").unwrap().uint(2).unwrap();
            b.end_struct().unwrap();
            b.begin_struct().unwrap();
            b.field("b").unwrap().uint(3).unwrap();
            b.field("a").unwrap().uint(4).unwrap();
            b.end_struct().unwrap();
        });
        let schema = derive_schema(&buf).unwrap();
        assert!(schema.columns.iter().all(|c| c.index == -1));
    }

    #[test]
    fn result_set_order_is_authoritative() {
        let mut b = StreamBuilder::new();
        b.define_symbols(&[
            "final_status",
            "hits",
            "error",
            "result_set",
            "a",
            "b",
            "c",
        ])
        .unwrap();
        b.begin_struct().unwrap();
        b.field("a").unwrap().uint(1).unwrap();
        b.field("b").unwrap().uint(2).unwrap();
        b.field("c").unwrap().uint(3).unwrap();
        b.end_struct().unwrap();
        b.annotate(&["final_status"]).unwrap();
        b.begin_struct().unwrap();
        b.field("hits").unwrap().int(1).unwrap();
        b.field("error").unwrap().string("").unwrap();
        b.field("result_set").unwrap();
        b.begin_struct().unwrap();
        b.field("c").unwrap().null().unwrap();
        b.field("a").unwrap().null().unwrap();
        b.end_struct().unwrap();
        b.end_struct().unwrap();
        let buf = b.finish().unwrap();

        let schema = derive_schema(&buf).unwrap();
        let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["c", "a", "b"]);
        assert_eq!(schema.columns[0].index, 0);
        assert_eq!(schema.columns[1].index, 1);
        // Not part of the projection order; matched by name instead.
        assert_eq!(schema.columns[2].index, -1);
    }
}
