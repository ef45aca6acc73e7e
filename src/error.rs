use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum NmdcError {
    #[error("malformed filter: {message}")]
    #[diagnostic(help("filters are MongoDB query documents, e.g. '{{\"name\": \"x\"}}' or 'name: x'"))]
    MalformedFilter { filter: String, message: String },

    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("NMDC API returned status {status} for {url}: {message}")]
    Remote {
        url: String,
        status: u16,
        message: String,
    },

    #[error("unexpected response body from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("pagination did not terminate for filter {filter:?} after {pages} page(s): {reason}")]
    Pagination {
        filter: String,
        pages: usize,
        reason: String,
    },

    #[error("missing enrichment input: {0}")]
    #[diagnostic(help("run the study dump step first so biosample metadata and annotations exist"))]
    MissingData(PathBuf),

    #[error("grouping by '{property}' left group '{group}' without biosamples")]
    EmptyGroup { property: String, group: String },

    #[error("invalid grouping: {0}")]
    InvalidGrouping(String),

    #[error("unknown API environment: {0} (expected prod, dev or backup)")]
    InvalidEnvironment(String),

    #[error("unknown collection: {0}")]
    InvalidCollection(String),

    #[error("invalid record id: {0:?}")]
    InvalidId(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("export failed: {0}")]
    Export(String),
}

impl NmdcError {
    pub fn malformed_filter(filter: &str, message: impl Into<String>) -> Self {
        NmdcError::MalformedFilter {
            filter: filter.to_string(),
            message: message.into(),
        }
    }

    /// True for failures that originate on the far side of the HTTP call.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            NmdcError::Network { .. }
                | NmdcError::Remote { .. }
                | NmdcError::Decode { .. }
                | NmdcError::Pagination { .. }
        )
    }
}
