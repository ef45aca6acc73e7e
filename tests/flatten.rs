use serde_json::{Value, json};

use nmdc_client::domain::Record;
use nmdc_client::flatten::{FlatTable, flatten, flatten_record};

fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => panic!("fixture must be an object"),
    }
}

fn pairs(row: &nmdc_client::flatten::FlatRow) -> Vec<(String, String)> {
    row.iter()
        .map(|(column, value)| (column.to_string(), value.to_string()))
        .collect()
}

#[test]
fn scalar_lists_join_with_pipe() {
    let rows = flatten(&[
        record(json!({"id": "x", "tags": ["a", "b"]})),
        record(json!({"id": "y", "tags": []})),
    ]);
    assert_eq!(rows[0].get("id"), Some("x"));
    assert_eq!(rows[0].get("tags"), Some("a|b"));
    assert_eq!(rows[1].get("id"), Some("y"));
    assert_eq!(rows[1].get("tags"), Some(""));
}

#[test]
fn object_lists_become_count_and_ids() {
    let row = flatten_record(&record(json!({
        "id": "nmdc:bsm-1",
        "associated_studies": [{"id": "s1"}, {"id": "s2"}]
    })));
    assert_eq!(row.get("associated_studies_count"), Some("2"));
    assert_eq!(row.get("associated_studies_ids"), Some("s1|s2"));
    assert!(row.columns().all(|column| !column.starts_with("associated_studies.")));
    assert_eq!(row.get("associated_studies"), None);
}

#[test]
fn flat_input_is_unchanged() {
    let input = vec![
        record(json!({"id": "a", "name": "first", "depth": 1.5, "public": true})),
        record(json!({"id": "b", "name": "second", "depth": 3, "public": false})),
    ];
    let rows = flatten(&input);
    assert_eq!(
        pairs(&rows[0]),
        vec![
            ("id".to_string(), "a".to_string()),
            ("name".to_string(), "first".to_string()),
            ("depth".to_string(), "1.5".to_string()),
            ("public".to_string(), "true".to_string()),
        ]
    );
    assert_eq!(rows[1].get("depth"), Some("3"));
    assert_eq!(rows[1].get("public"), Some("false"));
}

#[test]
fn rows_share_first_seen_columns() {
    let table = FlatTable::from_records(&[
        record(json!({"id": "a", "ph": 6.1})),
        record(json!({"id": "b", "lat_lon": {"latitude": 1.0, "longitude": 2.0}})),
    ]);
    assert_eq!(
        table.columns,
        vec!["id", "ph", "lat_lon.latitude", "lat_lon.longitude"]
    );
    assert_eq!(table.rows[0], vec!["a", "6.1", "", ""]);
    assert_eq!(table.rows[1], vec!["b", "", "1.0", "2.0"]);
}

#[test]
fn empty_batch_has_no_columns() {
    let table = FlatTable::from_records(&[]);
    assert!(table.is_empty());
    assert!(table.columns.is_empty());
}
