//! Nested JSON records to rectangular rows.
//!
//! Objects are flattened into dotted keys. Arrays of scalars are joined with
//! [`LIST_SEPARATOR`]. Arrays of objects are summarized as `<field>_count` and
//! `<field>_ids` columns instead of being expanded.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::domain::Record;

/// Separator inside a cell for list values. Never used as a column delimiter.
pub const LIST_SEPARATOR: &str = "|";
const KEY_SEPARATOR: &str = ".";
const SCHEMA_TYPE_PREFIX: &str = "nmdc:";

/// One flattened record. Columns keep the order they were first produced in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatRow {
    cells: Vec<(String, String)>,
}

impl FlatRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `column`, replacing an earlier value in place if present.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let column = column.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = value,
            None => self.cells.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cells
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Flatten one record on its own, without padding to other rows' columns.
pub fn flatten_record(record: &Record) -> FlatRow {
    let mut row = FlatRow::new();
    flatten_object(record, "", &mut row);
    row
}

/// Flatten a batch. Every returned row has the same columns, in first-seen
/// order across the batch; columns a record lacks are empty strings.
pub fn flatten(records: &[Record]) -> Vec<FlatRow> {
    let table = FlatTable::from_records(records);
    table
        .rows
        .into_iter()
        .map(|values| FlatRow {
            cells: table.columns.iter().cloned().zip(values).collect(),
        })
        .collect()
}

/// Column headers plus row values in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl FlatTable {
    pub fn from_records(records: &[Record]) -> Self {
        let flat: Vec<FlatRow> = records.iter().map(flatten_record).collect();

        let mut columns: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for row in &flat {
            for column in row.columns() {
                if !positions.contains_key(column) {
                    positions.insert(column.to_string(), columns.len());
                    columns.push(column.to_string());
                }
            }
        }

        let rows = flat
            .into_iter()
            .map(|row| {
                let mut values = vec![String::new(); columns.len()];
                for (column, value) in row.cells {
                    if let Some(&idx) = positions.get(&column) {
                        values[idx] = value;
                    }
                }
                values
            })
            .collect();

        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn flatten_object(object: &Map<String, Value>, prefix: &str, row: &mut FlatRow) {
    for (key, value) in object {
        let column = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}{KEY_SEPARATOR}{key}")
        };

        match value {
            Value::Object(nested) => flatten_nested(nested, &column, row),
            Value::Array(items) => flatten_array(items, &column, row),
            other => row.insert(column, scalar_text(other)),
        }
    }
}

/// A typed schema value such as `{"has_raw_value": "x", "type": "nmdc:TextValue"}`
/// loses its `type` column; anything richer is flattened as-is.
fn flatten_nested(nested: &Map<String, Value>, column: &str, row: &mut FlatRow) {
    let schema_typed = nested
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|tag| tag.starts_with(SCHEMA_TYPE_PREFIX));

    if schema_typed && nested.len() == 2 {
        let untyped: Map<String, Value> = nested
            .iter()
            .filter(|(key, _)| key.as_str() != "type")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        flatten_object(&untyped, column, row);
    } else {
        flatten_object(nested, column, row);
    }
}

fn flatten_array(items: &[Value], column: &str, row: &mut FlatRow) {
    if items.is_empty() {
        row.insert(column, "");
    } else if items.iter().all(is_scalar) {
        let joined = items
            .iter()
            .filter(|item| !item.is_null())
            .map(scalar_text)
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR);
        row.insert(column, joined);
    } else if items.iter().all(Value::is_object) {
        let ids = items
            .iter()
            .enumerate()
            .map(|(idx, item)| object_label(item, idx))
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR);
        row.insert(format!("{column}_count"), items.len().to_string());
        row.insert(format!("{column}_ids"), ids);
    } else {
        let text = serde_json::to_string(items).unwrap_or_default();
        row.insert(column, text);
    }
}

fn object_label(item: &Value, idx: usize) -> String {
    item.get("id")
        .or_else(|| item.get("name"))
        .filter(|label| is_scalar(label) && !label.is_null())
        .map(scalar_text)
        .unwrap_or_else(|| idx.to_string())
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("fixture must be an object"),
        }
    }

    #[test]
    fn nested_objects_use_dotted_keys() {
        let row = flatten_record(&record(json!({
            "id": "nmdc:bsm-1",
            "lat_lon": {"latitude": 63.875, "longitude": -149.21}
        })));
        assert_eq!(row.get("lat_lon.latitude"), Some("63.875"));
        assert_eq!(row.get("lat_lon.longitude"), Some("-149.21"));
        assert_eq!(
            row.columns().collect::<Vec<_>>(),
            vec!["id", "lat_lon.latitude", "lat_lon.longitude"]
        );
    }

    #[test]
    fn single_valued_schema_object_drops_type() {
        let row = flatten_record(&record(json!({
            "env_medium": {"has_raw_value": "soil", "type": "nmdc:TextValue"},
            "depth": {"has_numeric_value": 1.5, "has_unit": "m", "type": "nmdc:QuantityValue"}
        })));
        assert_eq!(row.get("env_medium.has_raw_value"), Some("soil"));
        assert_eq!(row.get("env_medium.type"), None);
        assert_eq!(row.get("depth.type"), Some("nmdc:QuantityValue"));
    }

    #[test]
    fn type_only_object_keeps_its_type_column() {
        let row = flatten_record(&record(json!({"t": {"type": "nmdc:Foo"}})));
        assert_eq!(row.get("t.type"), Some("nmdc:Foo"));
        assert_eq!(row.get("t"), None);
    }

    #[test]
    fn null_and_mixed_arrays() {
        let row = flatten_record(&record(json!({
            "notes": null,
            "mixed": [1, {"a": 2}],
            "sparse": ["a", null, "b"]
        })));
        assert_eq!(row.get("notes"), Some(""));
        assert_eq!(row.get("mixed"), Some(r#"[1,{"a":2}]"#));
        assert_eq!(row.get("sparse"), Some("a|b"));
    }

    #[test]
    fn object_ids_fall_back_to_name_then_index() {
        let row = flatten_record(&record(json!({
            "parts": [{"id": "p1"}, {"name": "second"}, {"other": true}]
        })));
        assert_eq!(row.get("parts_count"), Some("3"));
        assert_eq!(row.get("parts_ids"), Some("p1|second|2"));
    }

    #[test]
    fn later_duplicate_key_replaces_in_place() {
        let mut row = FlatRow::new();
        row.insert("a", "1");
        row.insert("b", "2");
        row.insert("a", "3");
        assert_eq!(row.iter().collect::<Vec<_>>(), vec![("a", "3"), ("b", "2")]);
    }
}
