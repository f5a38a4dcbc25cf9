//! # Row Iteration and Status Envelopes
//!
//! A well-formed result stream is zero or more data records followed by
//! exactly one terminal envelope: a record annotated `final_status` (success
//! statistics, possibly carrying a query error message) or `query_error` (the
//! alternate failure shape). `iterate_rows` drives a reader across the
//! top-level values, hands each data row to a caller-supplied callback and
//! returns the envelope as a tagged `Status`.
//!
//! ## Protocol Violations
//!
//! | Condition | Error |
//! |-----------|-------|
//! | top-level value is not a record | "expected 'struct' type" |
//! | unrecognized annotation | "unexpected annotation" |
//! | values after the terminal envelope | "unexpected data after terminal status" |
//! | stream ends without an envelope | "missing 'final_status' envelope" |
//!
//! Both envelope shapes are decoded by explicit fixed-field routines; unknown
//! envelope fields are skipped so upstream additions stay compatible.

use eyre::{bail, ensure, eyre, Result, WrapErr};

use crate::ion::{IonType, Reader};

/// Annotation marking the success envelope.
pub const FINAL_STATUS: &str = "final_status";
/// Annotation marking the failure envelope.
pub const QUERY_ERROR: &str = "query_error";

/// Success envelope: execution statistics plus an optional authoritative
/// column order. A non-empty `error` still means the query failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalStatus {
    pub hits: i64,
    pub misses: i64,
    pub scanned: i64,
    pub error: String,
    /// Field names of the `result_set` record, in original projection order.
    pub result_set: Option<Vec<String>>,
}

/// Terminal envelope of a result stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Success(FinalStatus),
    Failure(String),
}

impl Status {
    /// The query's failure message, from either envelope shape.
    pub fn error(&self) -> Option<&str> {
        match self {
            Status::Success(status) if !status.error.is_empty() => Some(&status.error),
            Status::Success(_) => None,
            Status::Failure(message) => Some(message),
        }
    }
}

/// Iterates the top-level records of `buf`, invoking `row_fn` with the reader
/// positioned inside each data row, and returns the terminal envelope.
///
/// The envelope is terminal: any further top-level value is an error, as is a
/// stream that ends without one.
pub fn iterate_rows<F>(buf: &[u8], mut row_fn: F) -> Result<Status>
where
    F: FnMut(&mut Reader<'_>, usize) -> Result<()>,
{
    let mut reader = Reader::new(buf);
    let mut status: Option<Status> = None;
    let mut row = 0usize;

    while reader.advance()? {
        ensure!(
            status.is_none(),
            "unexpected data after terminal status envelope"
        );
        match reader.current_type() {
            Some(IonType::Struct) => {}
            Some(t) => bail!("expected 'struct' type, got '{t}'"),
            None => bail!("expected 'struct' type, got no pending value"),
        }

        let annotation = reader.annotations()?.first().map(|s| s.to_string());
        if let Some(name) = annotation {
            match name.as_str() {
                FINAL_STATUS => {
                    status = Some(Status::Success(decode_final_status(&mut reader)?));
                }
                QUERY_ERROR => {
                    status = Some(Status::Failure(decode_query_error(&mut reader)?));
                }
                other => bail!("unexpected annotation: [{other}]"),
            }
            continue;
        }

        reader.enter()?;
        row_fn(&mut reader, row).wrap_err_with(|| format!("row {row}"))?;
        reader.exit()?;
        row += 1;
    }

    status.ok_or_else(|| {
        eyre!("missing '{FINAL_STATUS}' envelope (upstream query did not complete)")
    })
}

fn decode_final_status(reader: &mut Reader<'_>) -> Result<FinalStatus> {
    let mut status = FinalStatus::default();
    reader.enter()?;
    while reader.advance()? {
        let name = reader.field_name()?.to_string();
        match name.as_str() {
            "hits" => status.hits = reader.read_int()?,
            "misses" => status.misses = reader.read_int()?,
            "scanned" => status.scanned = reader.read_int()?,
            "error" => {
                status.error = reader
                    .read_nullable_text()?
                    .map(str::to_owned)
                    .unwrap_or_default();
            }
            "result_set" => {
                if reader.current_type() == Some(IonType::Struct) {
                    status.result_set = Some(decode_result_set(reader)?);
                }
            }
            _ => {}
        }
    }
    reader.exit()?;
    Ok(status)
}

fn decode_result_set(reader: &mut Reader<'_>) -> Result<Vec<String>> {
    let mut names = Vec::new();
    reader.enter()?;
    while reader.advance()? {
        names.push(reader.field_name()?.to_string());
    }
    reader.exit()?;
    Ok(names)
}

fn decode_query_error(reader: &mut Reader<'_>) -> Result<String> {
    let mut message = String::new();
    reader.enter()?;
    while reader.advance()? {
        if reader.field_name()? == "error" {
            message = reader
                .read_nullable_text()?
                .map(str::to_owned)
                .unwrap_or_default();
        }
    }
    reader.exit()?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ion::StreamBuilder;

    fn envelope_symbols() -> Vec<&'static str> {
        vec![
            FINAL_STATUS,
            QUERY_ERROR,
            "hits",
            "misses",
            "scanned",
            "error",
            "result_set",
            "x",
        ]
    }

    fn write_final_status(b: &mut StreamBuilder, hits: i64, error: &str) {
        b.annotate(&[FINAL_STATUS]).unwrap();
        b.begin_struct().unwrap();
        b.field("hits").unwrap().int(hits).unwrap();
        b.field("misses").unwrap().int(0).unwrap();
        b.field("scanned").unwrap().int(0).unwrap();
        b.field("error").unwrap().string(error).unwrap();
        b.end_struct().unwrap();
    }

    #[test]
    fn rows_are_counted_and_envelope_returned() {
        let mut b = StreamBuilder::new();
        b.define_symbols(&envelope_symbols()).unwrap();
        for value in [1u64, 2] {
            b.begin_struct().unwrap();
            b.field("x").unwrap().uint(value).unwrap();
            b.end_struct().unwrap();
        }
        write_final_status(&mut b, 7, "");
        let buf = b.finish().unwrap();

        let mut rows = Vec::new();
        let status = iterate_rows(&buf, |reader, row| {
            reader.advance()?;
            rows.push((row, reader.read_uint()?));
            Ok(())
        })
        .unwrap();

        assert_eq!(rows, vec![(0, 1), (1, 2)]);
        match status {
            Status::Success(s) => {
                assert_eq!(s.hits, 7);
                assert!(s.error.is_empty());
                assert_eq!(s.result_set, None);
            }
            Status::Failure(_) => panic!("expected success envelope"),
        }
    }

    #[test]
    fn missing_envelope_is_an_error() {
        let mut b = StreamBuilder::new();
        b.define_symbols(&envelope_symbols()).unwrap();
        b.begin_struct().unwrap();
        b.field("x").unwrap().uint(1).unwrap();
        b.end_struct().unwrap();
        let buf = b.finish().unwrap();

        let err = iterate_rows(&buf, |_, _| Ok(())).unwrap_err().to_string();
        assert!(err.contains("missing 'final_status'"), "{err}");
    }

    #[test]
    fn data_after_envelope_is_an_error() {
        let mut b = StreamBuilder::new();
        b.define_symbols(&envelope_symbols()).unwrap();
        write_final_status(&mut b, 0, "");
        b.begin_struct().unwrap();
        b.field("x").unwrap().uint(1).unwrap();
        b.end_struct().unwrap();
        let buf = b.finish().unwrap();

        let err = iterate_rows(&buf, |_, _| Ok(())).unwrap_err().to_string();
        assert!(err.contains("after terminal status"), "{err}");
    }

    #[test]
    fn query_error_envelope_is_terminal_failure() {
        let mut b = StreamBuilder::new();
        b.define_symbols(&envelope_symbols()).unwrap();
        b.annotate(&[QUERY_ERROR]).unwrap();
        b.begin_struct().unwrap();
        b.field("error").unwrap().string("table not found").unwrap();
        b.end_struct().unwrap();
        let buf = b.finish().unwrap();

        let status = iterate_rows(&buf, |_, _| Ok(())).unwrap();
        assert_eq!(status, Status::Failure("table not found".to_string()));
        assert_eq!(status.error(), Some("table not found"));
    }

    #[test]
    fn unknown_annotation_is_an_error() {
        let mut b = StreamBuilder::new();
        b.define_symbols(&["mystery"]).unwrap();
        b.annotate(&["mystery"]).unwrap();
        b.begin_struct().unwrap();
        b.end_struct().unwrap();
        let buf = b.finish().unwrap();

        let err = iterate_rows(&buf, |_, _| Ok(())).unwrap_err().to_string();
        assert!(err.contains("unexpected annotation"), "{err}");
    }

    #[test]
    fn non_record_top_level_value_is_an_error() {
        let mut b = StreamBuilder::new();
        b.define_symbols(&envelope_symbols()).unwrap();
        b.uint(5).unwrap();
        let buf = b.finish().unwrap();

        let err = iterate_rows(&buf, |_, _| Ok(())).unwrap_err().to_string();
        assert!(err.contains("expected 'struct' type, got 'uint'"), "{err}");
    }

    #[test]
    fn result_set_field_order_is_captured() {
        let mut b = StreamBuilder::new();
        let mut symbols = envelope_symbols();
        symbols.extend(["b", "a"]);
        b.define_symbols(&symbols).unwrap();
        b.annotate(&[FINAL_STATUS]).unwrap();
        b.begin_struct().unwrap();
        b.field("hits").unwrap().int(1).unwrap();
        b.field("error").unwrap().string("").unwrap();
        b.field("result_set").unwrap();
        b.begin_struct().unwrap();
        b.field("b").unwrap().null().unwrap();
        b.field("a").unwrap().null().unwrap();
        b.end_struct().unwrap();
        b.end_struct().unwrap();
        let buf = b.finish().unwrap();

        let status = iterate_rows(&buf, |_, _| Ok(())).unwrap();
        match status {
            Status::Success(s) => {
                assert_eq!(s.result_set, Some(vec!["b".to_string(), "a".to_string()]));
            }
            Status::Failure(_) => panic!("expected success envelope"),
        }
    }

    #[test]
    fn row_errors_carry_the_row_index() {
        let mut b = StreamBuilder::new();
        b.define_symbols(&envelope_symbols()).unwrap();
        b.begin_struct().unwrap();
        b.field("x").unwrap().string("oops").unwrap();
        b.end_struct().unwrap();
        write_final_status(&mut b, 0, "");
        let buf = b.finish().unwrap();

        let err = iterate_rows(&buf, |reader, _| {
            reader.advance()?;
            reader.read_uint()?;
            Ok(())
        })
        .unwrap_err();
        let chain = format!("{err:#}");
        assert!(chain.contains("row 0"), "{chain}");
        assert!(chain.contains("expected 'uint'"), "{chain}");
    }
}
