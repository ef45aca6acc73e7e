use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;
use serde_json::{Value, json};

use nmdc_client::client::{CollectionClient, RecordQuery};
use nmdc_client::config::ClientConfig;
use nmdc_client::domain::{Collection, record_id};
use nmdc_client::error::NmdcError;
use nmdc_client::transport::{HttpResponse, HttpTransport};

const BASE: &str = "http://nmdc.test";

#[derive(Default)]
struct ScriptedTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<HttpResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            urls: Mutex::new(Vec::new()),
        }
    }

    fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

impl HttpTransport for ScriptedTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, NmdcError> {
        self.urls.lock().unwrap().push(url.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| NmdcError::Network {
                url: url.to_string(),
                message: "no scripted response left".to_string(),
            })
    }
}

/// Every response carries the same continuation token.
#[derive(Default)]
struct LoopingTransport {
    calls: AtomicUsize,
}

impl HttpTransport for LoopingTransport {
    fn get(&self, _url: &str) -> Result<HttpResponse, NmdcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(page(0, 1, Some("again")))
    }
}

/// Hands out a fresh token forever.
#[derive(Default)]
struct EndlessTransport {
    calls: AtomicUsize,
}

impl HttpTransport for EndlessTransport {
    fn get(&self, _url: &str) -> Result<HttpResponse, NmdcError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let token = format!("t{call}");
        Ok(page(call * 2, 2, Some(&token)))
    }
}

fn page(start: usize, count: usize, token: Option<&str>) -> HttpResponse {
    let resources: Vec<Value> = (start..start + count)
        .map(|idx| json!({ "id": format!("nmdc:sty-{idx}") }))
        .collect();
    let mut body = json!({ "resources": resources });
    if let Some(token) = token {
        body["next_page_token"] = Value::String(token.to_string());
    }
    HttpResponse::ok(body.to_string())
}

fn status(code: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status: code,
        body: body.to_string(),
    }
}

fn config() -> ClientConfig {
    ClientConfig::default().with_base_url(BASE)
}

fn three_pages() -> Vec<HttpResponse> {
    vec![
        page(0, 10, Some("t1")),
        page(10, 10, Some("t2")),
        page(20, 10, None),
    ]
}

#[test]
fn all_pages_concatenates_in_order() {
    let client = CollectionClient::new(
        ScriptedTransport::new(three_pages()),
        Collection::Study,
        &config(),
    );
    let records = client.get_records("", 10, None, true).unwrap();

    assert_eq!(records.len(), 30);
    let ids: Vec<&str> = records.iter().filter_map(record_id).collect();
    assert_eq!(ids.first(), Some(&"nmdc:sty-0"));
    assert_eq!(ids.last(), Some(&"nmdc:sty-29"));
    assert!(ids.windows(2).all(|pair| {
        let index = |id: &str| id.trim_start_matches("nmdc:sty-").parse::<usize>().unwrap();
        index(pair[0]) + 1 == index(pair[1])
    }));

    let urls = client.transport().urls();
    assert_eq!(urls.len(), 3);
    assert!(!urls[0].contains("page_token"));
    assert!(urls[1].ends_with("&page_token=t1"));
    assert!(urls[2].ends_with("&page_token=t2"));
}

#[test]
fn single_page_returns_only_first_page() {
    let client = CollectionClient::new(
        ScriptedTransport::new(three_pages()),
        Collection::Study,
        &config(),
    );
    let records = client.get_records("", 10, None, false).unwrap();

    assert_eq!(records.len(), 10);
    assert_eq!(client.transport().urls().len(), 1);
}

#[test]
fn empty_token_ends_pagination() {
    let client = CollectionClient::new(
        ScriptedTransport::new(vec![page(0, 2, Some("t1")), page(2, 1, Some(""))]),
        Collection::Study,
        &config(),
    );
    let records = client.get_records("", 2, None, true).unwrap();
    assert_eq!(records.len(), 3);
}

#[test]
fn repeated_token_fails_instead_of_looping() {
    let client = CollectionClient::new(LoopingTransport::default(), Collection::Study, &config());
    let result = client.get_records("", 1, None, true);

    assert_matches!(result, Err(NmdcError::Pagination { pages: 2, .. }));
    assert_eq!(client.transport().calls.load(Ordering::SeqCst), 2);
}

#[test]
fn page_bound_stops_fresh_tokens() {
    let client = CollectionClient::new(
        EndlessTransport::default(),
        Collection::Biosample,
        &config().with_max_pages(5),
    );
    let result = client.get_records("", 2, None, true);

    assert_matches!(result, Err(NmdcError::Pagination { pages: 5, .. }));
    assert_eq!(client.transport().calls.load(Ordering::SeqCst), 5);
}

#[test]
fn page_iterator_stops_when_dropped() {
    let client = CollectionClient::new(EndlessTransport::default(), Collection::Study, &config());
    let query = RecordQuery::new("", 2);
    let first_two: Vec<_> = client.pages(&query).take(2).collect();

    assert_eq!(first_two.len(), 2);
    assert_eq!(client.transport().calls.load(Ordering::SeqCst), 2);
}

#[test]
fn request_url_encodes_filter_and_keeps_projection_commas() {
    let client = CollectionClient::new(
        ScriptedTransport::new(vec![page(0, 0, None)]),
        Collection::Study,
        &config(),
    );
    client
        .get_records(r#"{"name": {"$regex": "a/b"}}"#, 5, Some("id,name"), false)
        .unwrap();

    assert_eq!(
        client.transport().urls(),
        vec![format!(
            "{BASE}/nmdcschema/study_set?filter=%7B%22name%22%3A%20%7B%22%24regex%22%3A%20%22a/b%22%7D%7D&max_page_size=5&projection=id,name"
        )]
    );
}

#[test]
fn malformed_filter_is_rejected_before_any_request() {
    let client = CollectionClient::new(ScriptedTransport::default(), Collection::Study, &config());
    let result = client.get_records("{not json", 5, None, false);

    assert_matches!(result, Err(NmdcError::MalformedFilter { .. }));
    assert!(client.transport().urls().is_empty());
}

#[test]
fn server_error_carries_url_and_status() {
    let client = CollectionClient::new(
        ScriptedTransport::new(vec![status(500, "boom")]),
        Collection::Study,
        &config(),
    );
    let err = client.get_records("", 5, None, false).unwrap_err();

    assert_matches!(&err, NmdcError::Remote { status: 500, message, url } => {
        assert_eq!(message, "boom");
        assert!(url.starts_with(BASE));
    });
    assert!(err.is_remote());
}

#[test]
fn undecodable_body_is_a_decode_error() {
    let client = CollectionClient::new(
        ScriptedTransport::new(vec![HttpResponse::ok("<html>")]),
        Collection::Study,
        &config(),
    );
    assert_matches!(
        client.get_records("", 5, None, false),
        Err(NmdcError::Decode { .. })
    );
}

#[test]
fn body_without_resources_is_a_decode_error() {
    let client = CollectionClient::new(
        ScriptedTransport::new(vec![HttpResponse::ok(
            json!({ "detail": "Invalid filter" }).to_string(),
        )]),
        Collection::Study,
        &config(),
    );
    assert_matches!(
        client.get_records("", 5, None, true),
        Err(NmdcError::Decode { .. })
    );
}

#[test]
fn attribute_lookup_builds_regex_filter() {
    let client = CollectionClient::new(
        ScriptedTransport::new(vec![page(0, 1, None)]),
        Collection::Study,
        &config(),
    );
    let records = client
        .get_record_by_attribute("name", "GC-MS", 25, None, false, false)
        .unwrap();

    assert_eq!(records.len(), 1);
    let url = &client.transport().urls()[0];
    assert!(url.contains("GC%5C%5C-MS"));
    assert!(url.contains("%22%24options%22%3A%22i%22"));
}

#[test]
fn record_by_id_missing_is_none() {
    let client = CollectionClient::new(
        ScriptedTransport::new(vec![status(404, r#"{"detail": "not found"}"#)]),
        Collection::Biosample,
        &config(),
    );
    let record = client
        .get_record_by_id("nmdc:bsm-11-x5xj6p33", None)
        .unwrap();

    assert!(record.is_none());
    assert_eq!(
        client.transport().urls(),
        vec![format!("{BASE}/nmdcschema/biosample_set/nmdc:bsm-11-x5xj6p33")]
    );
}

#[test]
fn record_by_id_found_with_projection() {
    let body = json!({ "id": "nmdc:bsm-1", "name": "soil core" }).to_string();
    let client = CollectionClient::new(
        ScriptedTransport::new(vec![HttpResponse::ok(body)]),
        Collection::Biosample,
        &config(),
    );
    let record = client
        .get_record_by_id("nmdc:bsm-1", Some("id,name"))
        .unwrap()
        .unwrap();

    assert_eq!(record_id(&record), Some("nmdc:bsm-1"));
    assert!(client.transport().urls()[0].ends_with("nmdc:bsm-1?projection=id,name"));
}

#[test]
fn record_by_id_server_error_propagates() {
    let client = CollectionClient::new(
        ScriptedTransport::new(vec![status(503, "")]),
        Collection::Biosample,
        &config(),
    );
    assert_matches!(
        client.get_record_by_id("nmdc:bsm-1", None),
        Err(NmdcError::Remote { status: 503, .. })
    );
}

#[test]
fn record_by_id_rejects_unusable_ids() {
    let client = CollectionClient::new(ScriptedTransport::default(), Collection::Biosample, &config());
    assert_matches!(
        client.get_record_by_id("a/b", None),
        Err(NmdcError::InvalidId(_))
    );
    assert!(client.transport().urls().is_empty());
}

#[test]
fn missing_ids_are_checked_in_batches() {
    let found = HttpResponse::ok(json!({ "resources": [{ "id": "a" }] }).to_string());
    let client = CollectionClient::new(
        ScriptedTransport::new(vec![found, status(500, "down")]),
        Collection::Study,
        &config().with_id_batch_size(2),
    );
    let missing = client.find_missing_ids(&["a", "b", "c", "a"]);

    assert_eq!(missing, vec!["b".to_string(), "c".to_string()]);
    let urls = client.transport().urls();
    assert_eq!(urls.len(), 2);
    assert!(urls[0].contains("max_page_size=2"));
    assert!(urls[0].contains("projection=id"));
    assert!(urls[1].contains("max_page_size=1"));
}

#[test]
fn failed_batch_falls_back_to_single_id_lookups() {
    let found = HttpResponse::ok(json!({ "resources": [{ "id": "a" }] }).to_string());
    let client = CollectionClient::new(
        ScriptedTransport::new(vec![status(500, "down"), found, status(500, "down")]),
        Collection::Study,
        &config().with_id_batch_size(2),
    );
    let missing = client.find_missing_ids(&["a", "b"]);

    assert_eq!(missing, vec!["b".to_string()]);
    let urls = client.transport().urls();
    assert_eq!(urls.len(), 3);
    assert!(urls[0].contains("max_page_size=2"));
    assert!(urls[1].contains("max_page_size=1"));
    assert!(urls[2].contains("max_page_size=1"));
}

#[test]
fn check_ids_exist_requires_every_id() {
    let both = HttpResponse::ok(json!({ "resources": [{ "id": "a" }, { "id": "b" }] }).to_string());
    let client = CollectionClient::new(
        ScriptedTransport::new(vec![both]),
        Collection::Study,
        &config(),
    );
    assert!(client.check_ids_exist(&["a", "b"]));

    let client = CollectionClient::new(
        ScriptedTransport::new(vec![page(0, 0, None)]),
        Collection::Study,
        &config(),
    );
    assert!(!client.check_ids_exist(&["a"]));
}
