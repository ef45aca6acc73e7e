use serde::Serialize;

use crate::client::CollectionClient;
use crate::config::ClientConfig;
use crate::domain::{Collection, Record};
use crate::error::NmdcError;
use crate::filter::{build_filter, merge_filters, parse_bbox, parse_filter_expression};
use crate::transport::{HttpTransport, ReqwestTransport};

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// What a record-type command asks for, before it becomes a filter string.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// JSON or YAML filter expression.
    pub filter: Option<String>,
    /// Field/value pairs for the filter builder.
    pub matches: Vec<(String, String)>,
    pub exact: bool,
    /// `min_lat,min_lon,max_lat,max_lon`.
    pub bbox: Option<String>,
    pub page_size: usize,
    pub all_pages: bool,
    pub fields: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            filter: None,
            matches: Vec::new(),
            exact: false,
            bbox: None,
            page_size: DEFAULT_PAGE_SIZE,
            all_pages: false,
            fields: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub collection: Collection,
    pub filter: String,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdCheckResult {
    pub collection: Collection,
    pub checked: usize,
    pub missing: Vec<String>,
}

impl IdCheckResult {
    pub fn all_exist(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Runs record commands against one API deployment.
pub struct App<T: HttpTransport> {
    transport: T,
    config: ClientConfig,
}

impl App<ReqwestTransport> {
    pub fn connect(config: ClientConfig) -> Result<Self, NmdcError> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::new(transport, config))
    }
}

impl<T: HttpTransport> App<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client(&self, collection: Collection) -> CollectionClient<&T> {
        CollectionClient::new(&self.transport, collection, &self.config)
    }

    pub fn search(
        &self,
        collection: Collection,
        options: &SearchOptions,
    ) -> Result<SearchResult, NmdcError> {
        let filter = resolve_filter(options)?;
        tracing::info!(%collection, filter = %filter, all_pages = options.all_pages, "searching");
        let records = self.client(collection).get_records(
            &filter,
            options.page_size,
            options.fields.as_deref(),
            options.all_pages,
        )?;
        Ok(SearchResult {
            collection,
            filter,
            records,
        })
    }

    pub fn lookup(
        &self,
        collection: Collection,
        id: &str,
        fields: Option<&str>,
    ) -> Result<Option<Record>, NmdcError> {
        self.client(collection).get_record_by_id(id, fields)
    }

    pub fn check_ids(&self, collection: Collection, ids: &[String]) -> IdCheckResult {
        let missing = self.client(collection).find_missing_ids(ids);
        IdCheckResult {
            collection,
            checked: ids.len(),
            missing,
        }
    }
}

/// Combine the filter expression, `--match` pairs and bounding box into one
/// filter. Later parts override earlier ones on the same key.
pub fn resolve_filter(options: &SearchOptions) -> Result<String, NmdcError> {
    let mut filter = match options.filter.as_deref() {
        Some(text) => parse_filter_expression(text)?,
        None => String::new(),
    };
    if !options.matches.is_empty() {
        let built = build_filter(options.matches.iter().cloned(), options.exact);
        filter = merge_filters(&filter, &built)?;
    }
    if let Some(bbox) = options.bbox.as_deref() {
        filter = merge_filters(&filter, &parse_bbox(bbox)?)?;
    }
    Ok(filter)
}

/// Parse a `key=value` pair.
pub fn parse_match(text: &str) -> Result<(String, String), NmdcError> {
    match text.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(NmdcError::InvalidArgument(format!(
            "expected key=value, got {text:?}"
        ))),
    }
}
