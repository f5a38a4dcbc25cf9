//! # Column Materialization
//!
//! The second decode pass fills one `FieldColumn` per schema column. Each
//! column picks its storage variant once, up front, from the inferred
//! `Column`; `read_row` then writes straight into a pre-sized vector, so the
//! hot loop is a single match with no per-value allocation decisions.
//!
//! ## Storage Selection
//!
//! | column type | storage |
//! |-------------|---------|
//! | `Bool` | `bool` |
//! | `Number` (plain) | `u64` |
//! | `Number` (signed) | `i64` |
//! | `Number` (floating) | `f64` |
//! | `Text` | `String` |
//! | `Timestamp` | `DateTime<Utc>` |
//! | `Unknown`, `Null`, `Struct`, `List` | `serde_json::Value` |
//!
//! Nullable or optional columns use the `Option`-wrapped twin of each variant.
//! A column designated as the time field instead converts to `DateTime<Utc>`,
//! either from epoch milliseconds or from an RFC 3339 string.

use base64::prelude::{Engine, BASE64_STANDARD};
use chrono::{DateTime, Utc};
use eyre::{bail, Result};
use serde_json::{Map, Number, Value};

use crate::ion::{IonType, Reader};
use crate::schema::{Column, ColumnType};

/// Typed storage for one materialized column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Json(Vec<Value>),
    NullableJson(Vec<Option<Value>>),
    Bool(Vec<bool>),
    NullableBool(Vec<Option<bool>>),
    Uint(Vec<u64>),
    NullableUint(Vec<Option<u64>>),
    Int(Vec<i64>),
    NullableInt(Vec<Option<i64>>),
    Float(Vec<f64>),
    NullableFloat(Vec<Option<f64>>),
    Text(Vec<String>),
    NullableText(Vec<Option<String>>),
    Time(Vec<DateTime<Utc>>),
    NullableTime(Vec<Option<DateTime<Utc>>>),
}

/// How a time-field column turns wire values into instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeConv {
    /// Wire value is already a timestamp.
    Native,
    /// Integer epoch milliseconds.
    FromMillis,
    /// RFC 3339 text.
    FromText,
}

/// One column being filled by the materialization pass.
#[derive(Debug)]
pub struct FieldColumn {
    pub name: String,
    pub values: ColumnValues,
    conv: TimeConv,
}

impl FieldColumn {
    /// Allocates storage for `col` sized to `row_count`. When `time_field`
    /// holds, the column converts to timestamps instead of its inferred type.
    pub fn for_column(col: &Column, row_count: usize, time_field: bool) -> Result<Self> {
        let nullable = col.nullable || col.optional;
        let conv = if time_field {
            match col.typ {
                ColumnType::Timestamp => TimeConv::Native,
                ColumnType::Number if !col.floating => TimeConv::FromMillis,
                ColumnType::Text => TimeConv::FromText,
                other => bail!(
                    "unsupported time field type for column '{}': {other:?}",
                    col.name
                ),
            }
        } else {
            TimeConv::Native
        };

        let values = if time_field {
            if nullable {
                ColumnValues::NullableTime(vec![None; row_count])
            } else {
                ColumnValues::Time(vec![DateTime::<Utc>::UNIX_EPOCH; row_count])
            }
        } else {
            match (col.typ, nullable) {
                (ColumnType::Bool, false) => ColumnValues::Bool(vec![false; row_count]),
                (ColumnType::Bool, true) => ColumnValues::NullableBool(vec![None; row_count]),
                (ColumnType::Number, false) if col.floating => {
                    ColumnValues::Float(vec![0.0; row_count])
                }
                (ColumnType::Number, true) if col.floating => {
                    ColumnValues::NullableFloat(vec![None; row_count])
                }
                (ColumnType::Number, false) if col.signed => {
                    ColumnValues::Int(vec![0; row_count])
                }
                (ColumnType::Number, true) if col.signed => {
                    ColumnValues::NullableInt(vec![None; row_count])
                }
                (ColumnType::Number, false) => ColumnValues::Uint(vec![0; row_count]),
                (ColumnType::Number, true) => ColumnValues::NullableUint(vec![None; row_count]),
                (ColumnType::Text, false) => {
                    ColumnValues::Text(vec![String::new(); row_count])
                }
                (ColumnType::Text, true) => ColumnValues::NullableText(vec![None; row_count]),
                (ColumnType::Timestamp, false) => {
                    ColumnValues::Time(vec![DateTime::<Utc>::UNIX_EPOCH; row_count])
                }
                (ColumnType::Timestamp, true) => ColumnValues::NullableTime(vec![None; row_count]),
                (_, false) => ColumnValues::Json(vec![Value::Null; row_count]),
                (_, true) => ColumnValues::NullableJson(vec![None; row_count]),
            }
        };

        Ok(Self {
            name: col.name.clone(),
            values,
            conv,
        })
    }

    /// Reads the pending value into slot `row`.
    pub fn read_row(&mut self, reader: &mut Reader<'_>, row: usize) -> Result<()> {
        match (&mut self.values, self.conv) {
            (ColumnValues::Bool(v), _) => v[row] = reader.read_bool()?,
            (ColumnValues::NullableBool(v), _) => v[row] = reader.read_nullable_bool()?,
            (ColumnValues::Uint(v), _) => v[row] = reader.read_uint()?,
            (ColumnValues::NullableUint(v), _) => v[row] = reader.read_nullable_uint()?,
            (ColumnValues::Int(v), _) => v[row] = reader.read_int()?,
            (ColumnValues::NullableInt(v), _) => v[row] = reader.read_nullable_int()?,
            (ColumnValues::Float(v), _) => v[row] = reader.read_number()?,
            (ColumnValues::NullableFloat(v), _) => v[row] = reader.read_nullable_number()?,
            (ColumnValues::Text(v), _) => v[row] = reader.read_text()?.to_string(),
            (ColumnValues::NullableText(v), _) => {
                v[row] = reader.read_nullable_text()?.map(str::to_owned);
            }
            (ColumnValues::Time(v), TimeConv::Native) => v[row] = reader.read_timestamp()?,
            (ColumnValues::NullableTime(v), TimeConv::Native) => {
                v[row] = reader.read_nullable_timestamp()?;
            }
            (ColumnValues::Time(v), TimeConv::FromMillis) => {
                v[row] = millis_to_time(reader.read_int()?)?;
            }
            (ColumnValues::NullableTime(v), TimeConv::FromMillis) => {
                v[row] = match reader.read_nullable_int()? {
                    Some(millis) => Some(millis_to_time(millis)?),
                    None => None,
                };
            }
            (ColumnValues::Time(v), TimeConv::FromText) => {
                v[row] = text_to_time(reader.read_text()?)?;
            }
            (ColumnValues::NullableTime(v), TimeConv::FromText) => {
                v[row] = match reader.read_nullable_text()? {
                    Some(text) => Some(text_to_time(text)?),
                    None => None,
                };
            }
            (ColumnValues::Json(v), _) => v[row] = read_raw(reader)?,
            // Present-but-null stays distinguishable from absent.
            (ColumnValues::NullableJson(v), _) => v[row] = Some(read_raw(reader)?),
        }
        Ok(())
    }

    /// Number of rows stored, same for every variant.
    pub fn len(&self) -> usize {
        match &self.values {
            ColumnValues::Json(v) => v.len(),
            ColumnValues::NullableJson(v) => v.len(),
            ColumnValues::Bool(v) => v.len(),
            ColumnValues::NullableBool(v) => v.len(),
            ColumnValues::Uint(v) => v.len(),
            ColumnValues::NullableUint(v) => v.len(),
            ColumnValues::Int(v) => v.len(),
            ColumnValues::NullableInt(v) => v.len(),
            ColumnValues::Float(v) => v.len(),
            ColumnValues::NullableFloat(v) => v.len(),
            ColumnValues::Text(v) => v.len(),
            ColumnValues::NullableText(v) => v.len(),
            ColumnValues::Time(v) => v.len(),
            ColumnValues::NullableTime(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn millis_to_time(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| eyre::eyre!("epoch milliseconds out of range: {millis}"))
}

fn text_to_time(text: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(text)
        .map_err(|e| eyre::eyre!("invalid RFC 3339 time value '{text}': {e}"))?;
    Ok(parsed.with_timezone(&Utc))
}

/// Decodes the pending value into a JSON value, recursing into containers.
/// The dynamic fallback for columns without a native representation.
pub fn read_raw(reader: &mut Reader<'_>) -> Result<Value> {
    let typ = match reader.current_type() {
        Some(t) => t,
        None => bail!("no pending value"),
    };
    Ok(match typ {
        IonType::Null => Value::Null,
        IonType::Bool => Value::Bool(reader.read_bool()?),
        IonType::Uint => Value::Number(reader.read_uint()?.into()),
        IonType::Int => Value::Number(reader.read_int()?.into()),
        IonType::Float => match Number::from_f64(reader.read_number()?) {
            Some(n) => Value::Number(n),
            // NaN and infinities have no JSON representation.
            None => Value::Null,
        },
        IonType::Timestamp => Value::String(reader.read_timestamp()?.to_rfc3339()),
        IonType::Symbol | IonType::String => Value::String(reader.read_text()?.to_string()),
        IonType::Blob => Value::String(BASE64_STANDARD.encode(reader.read_bytes()?)),
        IonType::List => {
            let mut items = Vec::new();
            reader.enter()?;
            while reader.advance()? {
                items.push(read_raw(reader)?);
            }
            reader.exit()?;
            Value::Array(items)
        }
        IonType::Struct => {
            let mut map = Map::new();
            reader.enter()?;
            while reader.advance()? {
                let name = reader.field_name()?.to_string();
                map.insert(name, read_raw(reader)?);
            }
            reader.exit()?;
            Value::Object(map)
        }
        other => bail!("cannot convert '{other}' value to JSON"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(typ: ColumnType) -> Column {
        Column {
            index: 0,
            name: "c".to_string(),
            typ,
            nullable: false,
            optional: false,
            floating: false,
            signed: false,
            count: 0,
        }
    }

    #[test]
    fn plain_number_column_stores_uints() {
        let col = column(ColumnType::Number);
        let field = FieldColumn::for_column(&col, 2, false).unwrap();
        assert_eq!(field.values, ColumnValues::Uint(vec![0, 0]));
    }

    #[test]
    fn signed_number_column_stores_ints() {
        let mut col = column(ColumnType::Number);
        col.signed = true;
        let field = FieldColumn::for_column(&col, 1, false).unwrap();
        assert_eq!(field.values, ColumnValues::Int(vec![0]));
    }

    #[test]
    fn floating_wins_over_signed() {
        let mut col = column(ColumnType::Number);
        col.signed = true;
        col.floating = true;
        let field = FieldColumn::for_column(&col, 1, false).unwrap();
        assert_eq!(field.values, ColumnValues::Float(vec![0.0]));
    }

    #[test]
    fn optional_column_gets_nullable_storage() {
        let mut col = column(ColumnType::Text);
        col.optional = true;
        let field = FieldColumn::for_column(&col, 2, false).unwrap();
        assert_eq!(field.values, ColumnValues::NullableText(vec![None, None]));
    }

    #[test]
    fn unknown_column_falls_back_to_json() {
        let col = column(ColumnType::Unknown);
        let field = FieldColumn::for_column(&col, 1, false).unwrap();
        assert_eq!(field.values, ColumnValues::Json(vec![Value::Null]));
    }

    #[test]
    fn time_field_from_integer_millis() {
        let col = column(ColumnType::Number);
        let field = FieldColumn::for_column(&col, 1, true).unwrap();
        assert_eq!(field.conv, TimeConv::FromMillis);
        assert!(matches!(field.values, ColumnValues::Time(_)));
    }

    #[test]
    fn time_field_from_float_is_rejected() {
        let mut col = column(ColumnType::Number);
        col.floating = true;
        let err = FieldColumn::for_column(&col, 1, true)
            .unwrap_err()
            .to_string();
        assert!(err.contains("unsupported time field type"), "{err}");
    }

    #[test]
    fn rfc3339_conversion_preserves_the_instant() {
        let t = text_to_time("2021-01-30T22:00:00+02:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2021-01-30T20:00:00+00:00");
    }

    #[test]
    fn bad_rfc3339_text_names_the_value() {
        let err = text_to_time("not-a-time").unwrap_err().to_string();
        assert!(err.contains("not-a-time"), "{err}");
    }

    #[test]
    fn millis_conversion_matches_epoch() {
        let t = millis_to_time(1_612_051_200_000).unwrap();
        assert_eq!(t.to_rfc3339(), "2021-01-31T00:00:00+00:00");
    }
}
