//! Conversion between nested API records and flat CSV rows.
//!
//! Export flattens a JSON record into `(column, value)` pairs, where a dotted column such as
//! `schedule.nextRun` reaches into a nested object and `groups.name` over an array of objects
//! yields the pipe-joined names. Import goes the other way: CSV headers are zipped with row
//! values into a flat map that the per-type rules then reshape.

use serde_json::{Map, Value};
use std::io::{Read, Write};

use crate::SecurityCenterError;

/// Separator for to-many relations inside a single cell.
pub const MULTI_VALUE_SEPARATOR: &str = "|";

/// A flat record: ordered `(column, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatRow {
    columns: Vec<(String, String)>,
}

impl FlatRow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.columns.push((column.into(), value.into()));
    }

    /// Value of the first column named `column`.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FlatRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            columns: iter
                .into_iter()
                .map(|(column, value)| (column.into(), value.into()))
                .collect(),
        }
    }
}

/// A parsed CSV file: the header row and every data row after it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Render a JSON value as a single cell.
///
/// Null becomes the empty string, strings are taken verbatim, and objects and arrays are
/// written as compact JSON.
#[must_use]
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Split a comma-separated field selector into its column paths.
#[must_use]
pub fn parse_selector(selector: &str) -> Vec<String> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect()
}

/// First path segment of each selector column, de-duplicated, joined for the `fields` query.
#[must_use]
pub fn selector_query_fields(selector: &[String]) -> String {
    let mut fields: Vec<&str> = Vec::with_capacity(selector.len());
    for column in selector {
        let head = column.split('.').next().unwrap_or(column.as_str());
        if !fields.contains(&head) {
            fields.push(head);
        }
    }
    fields.join(",")
}

/// Extract the cell for a dotted `path` from `record`.
///
/// Missing keys render as the empty string. When a path segment lands on an array, the rest of
/// the path is extracted from each element and the results are joined with `|`.
#[must_use]
pub fn extract_path(record: &Value, path: &str) -> String {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    let Some(value) = record.get(head) else {
        return String::new();
    };

    match rest {
        None => value_to_string(value),
        Some(rest) => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| extract_path(item, rest))
                .collect::<Vec<_>>()
                .join(MULTI_VALUE_SEPARATOR),
            Value::Object(_) => extract_path(value, rest),
            _ => String::new(),
        },
    }
}

/// Flatten one record.
///
/// With a selector only the selected columns are emitted, in selector order. Without one every
/// top-level field is emitted in the record's own key order.
#[must_use]
pub fn flatten(record: &Value, selector: Option<&[String]>) -> FlatRow {
    match selector {
        Some(columns) => columns
            .iter()
            .map(|column| (column.clone(), extract_path(record, column)))
            .collect(),
        None => match record {
            Value::Object(fields) => fields
                .iter()
                .map(|(key, value)| (key.clone(), value_to_string(value)))
                .collect(),
            other => std::iter::once(("value".to_string(), value_to_string(other))).collect(),
        },
    }
}

/// Zip headers with a row's values into a flat map of strings.
///
/// Values beyond the last header are ignored; a short row simply lacks the trailing columns.
#[must_use]
pub fn zip_row(headers: &[String], row: &[String]) -> Map<String, Value> {
    headers
        .iter()
        .zip(row)
        .map(|(header, value)| (header.clone(), Value::String(value.clone())))
        .collect()
}

/// Split a multi-value cell into its non-empty segments.
pub fn split_multi(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(MULTI_VALUE_SEPARATOR)
        .filter(|segment| !segment.is_empty())
}

/// Read a whole CSV document. Rows may have differing field counts.
///
/// # Errors
///
/// Returns `Csv` when the input is not readable CSV (e.g. invalid UTF-8).
pub fn read_table<R: Read>(input: R) -> Result<Table, SecurityCenterError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(input);

    let headers = reader
        .headers()?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(Table { headers, rows })
}

/// Write a header row followed by each row's values, aligned to `headers` by column name.
///
/// # Errors
///
/// Returns `Csv` or `Io` when writing fails.
pub fn write_table<W: Write>(
    output: W,
    headers: &[String],
    rows: &[FlatRow],
) -> Result<(), SecurityCenterError> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(output);

    if headers.is_empty() {
        return Ok(());
    }

    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(headers.iter().map(|header| row.get(header).unwrap_or("")))?;
    }
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&Value::Null), "");
        assert_eq!(value_to_string(&json!("abc")), "abc");
        assert_eq!(value_to_string(&json!(42)), "42");
        assert_eq!(value_to_string(&json!(false)), "false");
        assert_eq!(value_to_string(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_extract_nested_object_field() {
        let record = json!({"schedule": {"nextRun": 0, "type": "ical"}});
        assert_eq!(extract_path(&record, "schedule.nextRun"), "0");
        assert_eq!(extract_path(&record, "schedule.type"), "ical");
        assert_eq!(extract_path(&record, "schedule.start"), "");
        assert_eq!(extract_path(&record, "missing.field"), "");
    }

    #[test]
    fn test_extract_array_field_is_pipe_joined() {
        let record = json!({"groups": [{"id": "1", "name": "GroupA"}, {"id": "2", "name": "GroupB"}]});
        assert_eq!(extract_path(&record, "groups.name"), "GroupA|GroupB");
        assert_eq!(extract_path(&record, "groups.id"), "1|2");
    }

    #[test]
    fn test_flatten_with_selector_keeps_selector_order() {
        let record = json!({"id": "7", "name": "Scan", "owner": {"username": "admin"}});
        let selector = parse_selector("owner.username, name,id");
        let row = flatten(&record, Some(selector.as_slice()));

        assert_eq!(
            row.headers().collect::<Vec<_>>(),
            vec!["owner.username", "name", "id"]
        );
        assert_eq!(row.values().collect::<Vec<_>>(), vec!["admin", "Scan", "7"]);
    }

    #[test]
    fn test_flatten_without_selector_uses_record_order() {
        let record = json!({"name": "Server1", "id": "3", "groups": []});
        let row = flatten(&record, None);

        assert_eq!(row.headers().collect::<Vec<_>>(), vec!["name", "id", "groups"]);
        assert_eq!(row.get("groups"), Some("[]"));
    }

    #[test]
    fn test_selector_query_fields() {
        let selector = parse_selector("owner.username,owner.id,name,groups.name");
        assert_eq!(selector_query_fields(&selector), "owner,name,groups");
    }

    #[test]
    fn test_zip_row_tolerates_ragged_rows() {
        let headers = vec!["id".to_string(), "name".to_string(), "type".to_string()];
        let short = zip_row(&headers, &["".to_string(), "Server1".to_string()]);
        assert_eq!(short.len(), 2);
        assert!(short.get("type").is_none());

        let long = zip_row(
            &headers,
            &["1".to_string(), "a".to_string(), "static".to_string(), "extra".to_string()],
        );
        assert_eq!(long.len(), 3);
    }

    #[test]
    fn test_split_multi_skips_empty_segments() {
        assert_eq!(split_multi("A|B").collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(split_multi("").count(), 0);
        assert_eq!(split_multi("A||B|").collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn test_read_table_flexible_rows() {
        let input = "id,name,type\n,Server1,static\n5,Server2\n";
        let table = read_table(input.as_bytes()).expect("csv should parse");

        assert_eq!(table.headers, vec!["id", "name", "type"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["", "Server1", "static"]);
        assert_eq!(table.rows[1], vec!["5", "Server2"]);
    }

    #[test]
    fn test_read_table_tolerates_stray_quotes() {
        let input = "name,description\nweb,say \"hi\" now\n\"open,rest\nlast,row\n";
        let table = read_table(input.as_bytes()).expect("csv should parse");

        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0], vec!["web", "say \"hi\" now"]);
        // An unbalanced opening quote runs to the end of the input
        assert_eq!(table.rows[1].len(), 1);
        assert!(table.rows[1][0].starts_with("open,rest\nlast,row"));
    }

    #[test]
    fn test_write_table_aligns_by_header() {
        let headers = vec!["id".to_string(), "name".to_string()];
        let rows = vec![
            FlatRow::from_iter([("name", "B"), ("id", "2")]),
            FlatRow::from_iter([("id", "3")]),
        ];
        let mut output = Vec::new();
        write_table(&mut output, &headers, &rows).expect("write should succeed");

        let text = String::from_utf8(output).expect("utf8");
        assert_eq!(text, "id,name\n2,B\n3,\n");
    }

    #[test]
    fn test_write_table_quotes_json_cells() {
        let headers = vec!["rules".to_string()];
        let rows = vec![FlatRow::from_iter([("rules", r#"{"operator":"all"}"#)])];
        let mut output = Vec::new();
        write_table(&mut output, &headers, &rows).expect("write should succeed");

        let table = read_table(output.as_slice()).expect("read back");
        assert_eq!(table.rows[0][0], r#"{"operator":"all"}"#);
    }
}
