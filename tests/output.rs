use std::fs;

use serde_json::{Value, json};

use nmdc_client::domain::Record;
use nmdc_client::enrichment::EnrichmentResult;
use nmdc_client::output::{ExportFormat, export_enrichment, export_records};

fn records() -> Vec<Record> {
    [
        json!({
            "id": "nmdc:bsm-1",
            "name": "core, top",
            "tags": ["a", "b"],
            "associated_studies": [{"id": "s1"}, {"id": "s2"}]
        }),
        json!({"id": "nmdc:bsm-2", "name": "core\tbottom", "tags": []}),
    ]
    .into_iter()
    .map(|value| match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    })
    .collect()
}

fn result(feature: &str, p: f64) -> EnrichmentResult {
    EnrichmentResult {
        feature_id: feature.to_string(),
        feature_name: format!("{feature} name"),
        group1_name: "low".to_string(),
        group1_count: 1,
        group1_total: 10,
        group2_name: "high".to_string(),
        group2_count: 8,
        group2_total: 10,
        p_value: p,
        fdr: p * 2.0,
        effect_size: 8.0,
        enriched_in: "high".to_string(),
    }
}

#[test]
fn csv_export_flattens_and_quotes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("biosamples.csv");
    let format = export_records(&records(), &path, None).unwrap();
    assert_eq!(format, ExportFormat::Csv);

    let text = fs::read_to_string(&path).unwrap();
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
    assert_eq!(
        headers,
        vec![
            "id",
            "name",
            "tags",
            "associated_studies_count",
            "associated_studies_ids"
        ]
    );
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(&rows[0][1], "core, top");
    assert_eq!(&rows[0][2], "a|b");
    assert_eq!(&rows[0][4], "s1|s2");
    assert_eq!(&rows[1][2], "");
    assert_eq!(&rows[1][3], "");
}

#[test]
fn tsv_export_uses_tabs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("biosamples.tsv");
    export_records(&records(), &path, None).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    let header = text.lines().next().unwrap();
    assert_eq!(
        header,
        "id\tname\ttags\tassociated_studies_count\tassociated_studies_ids"
    );
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_reader(text.as_bytes());
    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(&rows[1][1], "core\tbottom");
}

#[test]
fn json_export_keeps_records_nested() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.data");
    let format = export_records(&records(), &path, Some(ExportFormat::Json)).unwrap();
    assert_eq!(format, ExportFormat::Json);

    let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value[0]["associated_studies"][1]["id"], json!("s2"));
    assert_eq!(value[1]["tags"], json!([]));
}

#[test]
fn export_replaces_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("studies.json");
    export_records(&records(), &path, None).unwrap();
    export_records(&[], &path, None).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "[]\n");
}

#[test]
fn enrichment_tsv_has_fixed_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("enrichment.tsv");
    export_enrichment(
        &[result("EC:1.1.1.1", 0.001), result("EC:2.2.2.2", 0.02)],
        &path,
        ExportFormat::Tsv,
    )
    .unwrap();

    let text = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[0],
        "feature_id\tfeature_name\tgroup1_name\tgroup1_count\tgroup1_total\tgroup2_name\tgroup2_count\tgroup2_total\tp_value\tfdr\teffect_size\tenriched_in"
    );
    assert_eq!(
        lines[1],
        "EC:1.1.1.1\tEC:1.1.1.1 name\tlow\t1\t10\thigh\t8\t10\t1.000000e-3\t2.000000e-3\t8.000\thigh"
    );
}

#[test]
fn enrichment_json_serializes_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("enrichment.json");
    export_enrichment(&[result("EC:1.1.1.1", 0.5)], &path, ExportFormat::Json).unwrap();

    let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value[0]["feature_id"], json!("EC:1.1.1.1"));
    assert_eq!(value[0]["fdr"], json!(1.0));
    assert_eq!(value[0]["group2_count"], json!(8));
}
