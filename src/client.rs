use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::domain::{Collection, Record, record_id, validate_record_id};
use crate::error::NmdcError;
use crate::filter::{RawFilter, attribute_filter, ids_filter};
use crate::transport::{
    COMPONENT_SET, FILTER_SET, HttpResponse, HttpTransport, PATH_SET, PROJECTION_SET,
    ReqwestTransport, build_query_url, encode_component,
};

const BODY_EXCERPT_CHARS: usize = 500;

/// One decoded response from a collection endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Page {
    pub resources: Vec<Record>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    #[serde(default, alias = "count")]
    pub total: Option<u64>,
}

impl Page {
    /// Continuation token, treating an empty string like an absent one.
    pub fn continuation(&self) -> Option<&str> {
        self.next_page_token
            .as_deref()
            .filter(|token| !token.is_empty())
    }
}

/// Parameters shared by every page of one listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    pub filter: String,
    pub max_page_size: usize,
    pub fields: Option<String>,
}

impl RecordQuery {
    pub fn new(filter: impl Into<String>, max_page_size: usize) -> Self {
        Self {
            filter: filter.into(),
            max_page_size,
            fields: None,
        }
    }

    pub fn with_fields(mut self, fields: Option<&str>) -> Self {
        self.fields = fields
            .map(str::trim)
            .filter(|fields| !fields.is_empty())
            .map(str::to_string);
        self
    }
}

/// Read access to one `nmdcschema` collection.
pub struct CollectionClient<T: HttpTransport> {
    transport: T,
    collection: Collection,
    base_url: String,
    max_pages: usize,
    id_batch_size: usize,
}

impl CollectionClient<ReqwestTransport> {
    pub fn connect(collection: Collection, config: &ClientConfig) -> Result<Self, NmdcError> {
        let transport = ReqwestTransport::new(config)?;
        Ok(Self::new(transport, collection, config))
    }
}

impl<T: HttpTransport> CollectionClient<T> {
    pub fn new(transport: T, collection: Collection, config: &ClientConfig) -> Self {
        Self {
            transport,
            collection,
            base_url: config.base_url(),
            max_pages: config.max_pages.max(1),
            id_batch_size: config.id_batch_size.max(1),
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn collection_url(&self) -> String {
        format!("{}/nmdcschema/{}", self.base_url, self.collection.as_str())
    }

    pub fn page_url(&self, query: &RecordQuery, page_token: Option<&str>) -> String {
        let mut params = vec![
            ("filter", encode_component(&query.filter, FILTER_SET)),
            ("max_page_size", query.max_page_size.to_string()),
            (
                "projection",
                query
                    .fields
                    .as_deref()
                    .map(|fields| encode_component(fields, PROJECTION_SET))
                    .unwrap_or_default(),
            ),
        ];
        if let Some(token) = page_token {
            params.push(("page_token", encode_component(token, COMPONENT_SET)));
        }
        build_query_url(&self.collection_url(), &params)
    }

    /// Issue exactly one request for the page that `page_token` points at.
    pub fn fetch_page(
        &self,
        query: &RecordQuery,
        page_token: Option<&str>,
    ) -> Result<Page, NmdcError> {
        if query.max_page_size == 0 {
            return Err(NmdcError::InvalidArgument(
                "max_page_size must be at least 1".to_string(),
            ));
        }
        let url = self.page_url(query, page_token);
        let response = self.transport.get(&url)?;
        let response = check_status(&url, response)?;
        let page: Page = serde_json::from_str(&response.body).map_err(|err| NmdcError::Decode {
            url: url.clone(),
            message: err.to_string(),
        })?;
        tracing::debug!(
            url = %url,
            records = page.resources.len(),
            has_next = page.continuation().is_some(),
            "page fetched"
        );
        Ok(page)
    }

    /// Lazily walk every page of `query`. Dropping the iterator stops fetching.
    pub fn pages<'a>(&'a self, query: &'a RecordQuery) -> PageIter<'a, T> {
        PageIter {
            client: self,
            query,
            next_token: None,
            used_tokens: HashSet::new(),
            fetched: 0,
            done: false,
        }
    }

    /// Records matching `filter`, first page only unless `all_pages`.
    ///
    /// `filter` is sent verbatim after a JSON syntax check; an empty string
    /// means no filter.
    pub fn get_records(
        &self,
        filter: &str,
        max_page_size: usize,
        fields: Option<&str>,
        all_pages: bool,
    ) -> Result<Vec<Record>, NmdcError> {
        let filter = RawFilter::parse(filter)?;
        let query = RecordQuery::new(filter.into_string(), max_page_size).with_fields(fields);

        if !all_pages {
            return Ok(self.fetch_page(&query, None)?.resources);
        }

        let mut records = Vec::new();
        let mut pages = 0usize;
        for page in self.pages(&query) {
            records.extend(page?.resources);
            pages += 1;
        }
        tracing::info!(
            collection = %self.collection,
            pages,
            records = records.len(),
            "fetched all pages"
        );
        Ok(records)
    }

    pub fn get_record_by_filter(
        &self,
        filter: &str,
        max_page_size: usize,
        fields: Option<&str>,
        all_pages: bool,
    ) -> Result<Vec<Record>, NmdcError> {
        self.get_records(filter, max_page_size, fields, all_pages)
    }

    pub fn get_record_by_attribute(
        &self,
        name: &str,
        value: &str,
        max_page_size: usize,
        fields: Option<&str>,
        all_pages: bool,
        exact_match: bool,
    ) -> Result<Vec<Record>, NmdcError> {
        let filter = attribute_filter(name, value, exact_match);
        self.get_records(&filter, max_page_size, fields, all_pages)
    }

    /// Look one record up by id. A 404 for a well-formed id is `Ok(None)`.
    pub fn get_record_by_id(
        &self,
        collection_id: &str,
        fields: Option<&str>,
    ) -> Result<Option<Record>, NmdcError> {
        let id = validate_record_id(collection_id)?;
        let base = format!(
            "{}/{}",
            self.collection_url(),
            encode_component(id, PATH_SET)
        );
        let params: Vec<(&str, String)> = fields
            .map(str::trim)
            .filter(|fields| !fields.is_empty())
            .map(|fields| vec![("projection", encode_component(fields, PROJECTION_SET))])
            .unwrap_or_default();
        let url = build_query_url(&base, &params);

        let response = self.transport.get(&url)?;
        if response.status == 404 {
            tracing::debug!(url = %url, "record not found");
            return Ok(None);
        }
        let response = check_status(&url, response)?;
        let value: Value = serde_json::from_str(&response.body).map_err(|err| NmdcError::Decode {
            url: url.clone(),
            message: err.to_string(),
        })?;
        match value {
            Value::Object(record) if record.is_empty() => Ok(None),
            Value::Object(record) => Ok(Some(record)),
            Value::Null => Ok(None),
            other => Err(NmdcError::Decode {
                url,
                message: format!("expected a JSON object, got {other}"),
            }),
        }
    }

    /// Ids from `ids` that the collection does not return, in input order.
    ///
    /// Ids are de-duplicated and checked in batches. When a batch request
    /// fails its ids are looked up one at a time, and only an id whose own
    /// lookup fails or comes back empty is reported missing.
    pub fn find_missing_ids<S: AsRef<str>>(&self, ids: &[S]) -> Vec<String> {
        let mut seen = HashSet::new();
        let unique: Vec<&str> = ids
            .iter()
            .map(AsRef::as_ref)
            .filter(|id| seen.insert(*id))
            .collect();

        let mut missing = Vec::new();
        for batch in unique.chunks(self.id_batch_size) {
            match self.lookup_ids(batch) {
                Ok(found) => missing.extend(
                    batch
                        .iter()
                        .filter(|id| !found.contains(**id))
                        .map(|id| id.to_string()),
                ),
                Err(err) if batch.len() > 1 => {
                    tracing::warn!(
                        collection = %self.collection,
                        batch = batch.len(),
                        error = %err,
                        "id batch lookup failed; checking ids one at a time"
                    );
                    for id in batch {
                        if !self.id_exists(id) {
                            missing.push(id.to_string());
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        collection = %self.collection,
                        id = batch[0],
                        error = %err,
                        "id lookup failed; treating id as missing"
                    );
                    missing.push(batch[0].to_string());
                }
            }
        }
        missing
    }

    /// True only when every id resolves in this collection.
    pub fn check_ids_exist<S: AsRef<str>>(&self, ids: &[S]) -> bool {
        self.find_missing_ids(ids).is_empty()
    }

    fn lookup_ids(&self, ids: &[&str]) -> Result<HashSet<String>, NmdcError> {
        let records = self.get_records(&ids_filter(ids), ids.len(), Some("id"), true)?;
        Ok(records
            .iter()
            .filter_map(record_id)
            .map(str::to_string)
            .collect())
    }

    fn id_exists(&self, id: &str) -> bool {
        match self.lookup_ids(&[id]) {
            Ok(found) => found.contains(id),
            Err(err) => {
                tracing::warn!(
                    collection = %self.collection,
                    id,
                    error = %err,
                    "id lookup failed; treating id as missing"
                );
                false
            }
        }
    }
}

/// Iterator over the pages of one query, following continuation tokens.
///
/// Fails with [`NmdcError::Pagination`] instead of requesting a token twice
/// or fetching more than the configured page bound.
pub struct PageIter<'a, T: HttpTransport> {
    client: &'a CollectionClient<T>,
    query: &'a RecordQuery,
    next_token: Option<String>,
    used_tokens: HashSet<String>,
    fetched: usize,
    done: bool,
}

impl<T: HttpTransport> PageIter<'_, T> {
    fn fail(&mut self, reason: String) -> Option<Result<Page, NmdcError>> {
        self.done = true;
        Some(Err(NmdcError::Pagination {
            filter: self.query.filter.clone(),
            pages: self.fetched,
            reason,
        }))
    }
}

impl<T: HttpTransport> Iterator for PageIter<'_, T> {
    type Item = Result<Page, NmdcError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(token) = &self.next_token {
            if !self.used_tokens.insert(token.clone()) {
                let reason = format!("continuation token {token:?} repeated");
                return self.fail(reason);
            }
        }
        if self.fetched >= self.client.max_pages {
            let reason = format!("exceeded the limit of {} pages", self.client.max_pages);
            return self.fail(reason);
        }

        let page = match self.client.fetch_page(self.query, self.next_token.as_deref()) {
            Ok(page) => page,
            Err(err) => {
                self.done = true;
                return Some(Err(err));
            }
        };
        self.fetched += 1;
        self.next_token = page.continuation().map(str::to_string);
        if self.next_token.is_none() {
            self.done = true;
        }
        Some(Ok(page))
    }
}

fn check_status(url: &str, response: HttpResponse) -> Result<HttpResponse, NmdcError> {
    if response.is_success() {
        return Ok(response);
    }
    let message = if response.body.trim().is_empty() {
        "NMDC API request failed".to_string()
    } else {
        response.body.chars().take(BODY_EXCERPT_CHARS).collect()
    };
    Err(NmdcError::Remote {
        url: url.to_string(),
        status: response.status,
        message,
    })
}
