//! Cleaning utilities shared by every loader
//!
//! All functions work in place on named columns of a [`Table`] and never fail:
//! values that cannot be interpreted become [`Value::Null`]. Quality checks
//! report what they changed as warnings on the run's [`RunLog`].

use chrono::NaiveDate;

use crate::config::Range;
use crate::run_log::RunLog;
use crate::table::{ColumnKind, Table, Value};

/// Target representation for [`coerce_numeric`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Integer,
    Float,
}

impl NumericKind {
    pub fn column_kind(self) -> ColumnKind {
        match self {
            NumericKind::Integer => ColumnKind::Int,
            NumericKind::Float => ColumnKind::Float,
        }
    }
}

/// True when the value is one of the placeholder codes (whitespace-trimmed)
pub fn is_sentinel(value: &Value, codes: &[String]) -> bool {
    match value {
        Value::Text(s) => {
            let s = s.trim();
            codes.iter().any(|c| c == s)
        }
        _ => false,
    }
}

/// Replace placeholder codes with null.
///
/// An empty column list means every column. Returns the number of cells
/// replaced; running it twice replaces nothing the second time.
pub fn null_sentinels(table: &mut Table, columns: &[&str], codes: &[String]) -> usize {
    let targets: Vec<String> = if columns.is_empty() {
        table.columns().to_vec()
    } else {
        columns.iter().map(|c| c.to_string()).collect()
    };

    let mut replaced = 0;
    for column in &targets {
        table.map_column(column, |v| {
            if is_sentinel(v, codes) {
                replaced += 1;
                Value::Null
            } else {
                v.clone()
            }
        });
    }
    replaced
}

/// Parse a column into numbers, nulling sentinels and unparseable values.
///
/// Integer targets accept integral floats such as `"12.0"`; fractional values
/// become null. The column's kind is declared on the table, so an all-null
/// result still loads as a numeric column. Returns the number of non-null
/// inputs that became null.
pub fn coerce_numeric(table: &mut Table, column: &str, kind: NumericKind, codes: &[String]) -> usize {
    let mut lost = 0;
    table.map_column(column, |v| {
        if v.is_null() {
            return Value::Null;
        }
        let parsed = if is_sentinel(v, codes) {
            Value::Null
        } else {
            match kind {
                NumericKind::Integer => v.as_i64().map(Value::Int).unwrap_or(Value::Null),
                NumericKind::Float => v.as_f64().map(Value::Float).unwrap_or(Value::Null),
            }
        };
        if parsed.is_null() {
            lost += 1;
        }
        parsed
    });
    table.declare_kind(column, kind.column_kind());
    lost
}

fn null_out_of_range(table: &mut Table, column: &str, range: Range) -> usize {
    let mut replaced = 0;
    table.map_column(column, |v| match v.as_f64() {
        Some(x) if !range.contains(x) => {
            replaced += 1;
            Value::Null
        }
        _ => v.clone(),
    });
    replaced
}

/// Null numeric values outside `range`, warning with the count
pub fn clamp_range(table: &mut Table, column: &str, range: Range, log: &mut RunLog) -> usize {
    let replaced = null_out_of_range(table, column, range);
    if replaced > 0 {
        log.warning(format!("Found {replaced} out-of-range values in {column}"));
    }
    replaced
}

/// Null percentages outside `range`, one warning per affected column
pub fn clamp_percentages(
    table: &mut Table,
    columns: &[&str],
    range: Range,
    log: &mut RunLog,
) -> usize {
    let mut total = 0;
    for column in columns {
        let replaced = null_out_of_range(table, column, range);
        if replaced > 0 {
            log.warning(format!("Found {replaced} invalid percentages in {column}"));
        }
        total += replaced;
    }
    total
}

/// Drop rows whose identifier is not a whole number within `range`.
///
/// Survivors hold integer identifiers. A table without the column is left
/// unchanged. Returns the number of rows removed.
pub fn filter_valid_identifiers(
    table: &mut Table,
    column: &str,
    range: Range,
    log: &mut RunLog,
) -> usize {
    if !table.has_column(column) {
        return 0;
    }

    table.map_column(column, |v| match v.as_i64() {
        Some(n) if range.contains(n as f64) => Value::Int(n),
        _ => Value::Null,
    });
    let removed = table.retain_where(column, |v| !v.is_null());

    if removed > 0 {
        log.warning(format!("Removed {removed} records with invalid identifiers"));
    }
    removed
}

/// Parse a `DD/MM/YYYY` date, also accepting ISO `YYYY-MM-DD`
pub fn parse_uk_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}

/// Parse date columns in place; unparseable values become null
pub fn parse_uk_dates(table: &mut Table, columns: &[&str]) -> usize {
    let mut failed = 0;
    for column in columns {
        table.map_column(column, |v| match v {
            Value::Text(s) => match parse_uk_date(s) {
                Some(d) => Value::Date(d),
                None => {
                    failed += 1;
                    Value::Null
                }
            },
            Value::Date(_) | Value::Null => v.clone(),
            _ => {
                failed += 1;
                Value::Null
            }
        });
        table.declare_kind(column, ColumnKind::Date);
    }
    failed
}

/// Cut text values to at most `max_chars` characters
pub fn truncate_text(table: &mut Table, column: &str, max_chars: usize) {
    table.map_column(column, |v| match v {
        Value::Text(s) if s.chars().count() > max_chars => {
            Value::Text(s.chars().take(max_chars).collect())
        }
        _ => v.clone(),
    });
}

/// Drop rows with a null in `column`, warning when any are removed
pub fn drop_null_rows(table: &mut Table, column: &str, log: &mut RunLog, what: &str) -> usize {
    let removed = table.retain_where(column, |v| !v.is_null());
    if removed > 0 {
        log.warning(format!("Removed {removed} records without {what}"));
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_SENTINEL_CODES, QualityThresholds};

    fn codes() -> Vec<String> {
        DEFAULT_SENTINEL_CODES.iter().map(|c| c.to_string()).collect()
    }

    fn one_column(name: &str, values: Vec<Value>) -> Table {
        Table::from_rows([name], values.into_iter().map(|v| vec![v]))
    }

    #[test]
    fn test_null_sentinels_idempotent() {
        let mut t = one_column(
            "score",
            vec!["12".into(), "SUPP".into(), " x ".into(), "c".into(), "LOWCOV".into()],
        );
        assert_eq!(null_sentinels(&mut t, &[], &codes()), 4);
        let after_once = t.clone();
        assert_eq!(null_sentinels(&mut t, &[], &codes()), 0);
        assert_eq!(t, after_once);
        assert_eq!(t.value(0, "score"), Some(&Value::Text("12".into())));
    }

    #[test]
    fn test_coerce_numeric() {
        let mut t = one_column(
            "pupils",
            vec!["12".into(), "12.0".into(), "12.5".into(), "SUPP".into(), "abc".into(), Value::Null],
        );
        let lost = coerce_numeric(&mut t, "pupils", NumericKind::Integer, &codes());
        assert_eq!(lost, 3);
        let values: Vec<_> = t.column("pupils").unwrap().cloned().collect();
        assert_eq!(
            values,
            vec![Value::Int(12), Value::Int(12), Value::Null, Value::Null, Value::Null, Value::Null]
        );

        let mut t = one_column("score", vec!["-0.25".into(), "z".into()]);
        coerce_numeric(&mut t, "score", NumericKind::Float, &codes());
        assert_eq!(t.value(0, "score"), Some(&Value::Float(-0.25)));
        assert_eq!(t.value(1, "score"), Some(&Value::Null));
    }

    #[test]
    fn test_coerced_all_null_column_keeps_numeric_kind() {
        let mut t = one_column("att8", vec!["SUPP".into(), "x".into()]);
        coerce_numeric(&mut t, "att8", NumericKind::Float, &codes());
        assert!(t.column("att8").unwrap().all(Value::is_null));
        assert_eq!(t.column_kinds(), vec![ColumnKind::Float]);

        let mut t = one_column("inspection_date", vec![Value::Null]);
        parse_uk_dates(&mut t, &["inspection_date"]);
        assert_eq!(t.column_kinds(), vec![ColumnKind::Date]);
    }

    #[test]
    fn test_clamp_range_counts_replacements() {
        let range = QualityThresholds::default().progress_8;
        let inputs = [-4.0, -3.0, 0.5, 3.0, 3.01, 10.0];
        let mut t = one_column("p8", inputs.iter().map(|x| Value::Float(*x)).collect());
        let mut log = RunLog::new();

        let replaced = clamp_range(&mut t, "p8", range, &mut log);
        let expected = inputs.iter().filter(|x| !range.contains(**x)).count();
        assert_eq!(replaced, expected);
        assert!(
            t.column("p8")
                .unwrap()
                .filter_map(Value::as_f64)
                .all(|x| range.contains(x))
        );
        assert_eq!(log.warnings, vec!["Found 3 out-of-range values in p8".to_string()]);
    }

    #[test]
    fn test_clamp_percentages_warns_per_column() {
        let mut t = Table::from_rows(
            ["a", "b"],
            vec![
                vec![Value::Float(101.0), Value::Float(50.0)],
                vec![Value::Float(-1.0), Value::Float(0.0)],
            ],
        );
        let mut log = RunLog::new();
        assert_eq!(clamp_percentages(&mut t, &["a", "b"], Range::new(0.0, 100.0), &mut log), 2);
        assert_eq!(log.warnings, vec!["Found 2 invalid percentages in a".to_string()]);
    }

    #[test]
    fn test_filter_valid_identifiers() {
        let mut t = one_column("urn", vec![Value::Int(123456), "abc".into(), Value::Int(99)]);
        let mut log = RunLog::new();
        let removed =
            filter_valid_identifiers(&mut t, "urn", QualityThresholds::default().urn, &mut log);

        assert_eq!(removed, 2);
        assert_eq!(t.len(), 1);
        assert_eq!(t.value(0, "urn"), Some(&Value::Int(123456)));
        assert_eq!(
            log.warnings,
            vec!["Removed 2 records with invalid identifiers".to_string()]
        );
    }

    #[test]
    fn test_filter_valid_identifiers_text_and_missing_column() {
        let range = QualityThresholds::default().urn;
        let mut t = one_column("urn", vec!["100000".into(), "9999999.0".into(), "10000000".into()]);
        let mut log = RunLog::new();
        assert_eq!(filter_valid_identifiers(&mut t, "urn", range, &mut log), 1);
        assert!(t.column("urn").unwrap().all(|v| matches!(v, Value::Int(_))));

        let mut t = one_column("other", vec!["x".into()]);
        assert_eq!(filter_valid_identifiers(&mut t, "urn", range, &mut log), 0);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_parse_uk_dates() {
        assert_eq!(parse_uk_date("05/03/2024"), NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(parse_uk_date("2024-03-05"), NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(parse_uk_date("31/02/2024"), None);

        let mut t = one_column("d", vec!["01/09/2023".into(), "soon".into(), Value::Null]);
        assert_eq!(parse_uk_dates(&mut t, &["d"]), 1);
        assert_eq!(t.value(0, "d"), Some(&Value::Date(NaiveDate::from_ymd_opt(2023, 9, 1).unwrap())));
    }

    #[test]
    fn test_truncate_text() {
        let mut t = one_column("name", vec!["abcdef".into(), "ab".into()]);
        truncate_text(&mut t, "name", 3);
        assert_eq!(t.value(0, "name"), Some(&Value::Text("abc".into())));
        assert_eq!(t.value(1, "name"), Some(&Value::Text("ab".into())));
    }
}
