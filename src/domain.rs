use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::NmdcError;

/// A schema'd NMDC entity as returned by the API. Key order is preserved.
pub type Record = Map<String, Value>;

/// The `nmdcschema` collections a [`crate::client::CollectionClient`] can be
/// pointed at. One client type serves all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Biosample,
    Study,
    DataObject,
    DataGeneration,
    Configuration,
    ProtocolExecution,
    StorageProcess,
    WorkflowExecution,
    FunctionalAnnotationAgg,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Biosample => "biosample_set",
            Collection::Study => "study_set",
            Collection::DataObject => "data_object_set",
            Collection::DataGeneration => "data_generation_set",
            Collection::Configuration => "configuration_set",
            Collection::ProtocolExecution => "protocol_execution_set",
            Collection::StorageProcess => "storage_process_set",
            Collection::WorkflowExecution => "workflow_execution_set",
            Collection::FunctionalAnnotationAgg => "functional_annotation_agg",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Collection {
    type Err = NmdcError;

    /// Accepts both the collection name (`biosample_set`) and the short form (`biosample`).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        let short = normalized.strip_suffix("_set").unwrap_or(&normalized);
        match short {
            "biosample" => Ok(Collection::Biosample),
            "study" => Ok(Collection::Study),
            "data_object" => Ok(Collection::DataObject),
            "data_generation" => Ok(Collection::DataGeneration),
            "configuration" => Ok(Collection::Configuration),
            "protocol_execution" => Ok(Collection::ProtocolExecution),
            "storage_process" => Ok(Collection::StorageProcess),
            "workflow_execution" => Ok(Collection::WorkflowExecution),
            "functional_annotation_agg" => Ok(Collection::FunctionalAnnotationAgg),
            _ => Err(NmdcError::InvalidCollection(value.to_string())),
        }
    }
}

/// Checks that an id can be placed in a request path. Existence is the
/// server's business; this only rejects ids that could never name a record.
pub fn validate_record_id(id: &str) -> Result<&str, NmdcError> {
    let trimmed = id.trim();
    let is_valid = !trimmed.is_empty()
        && !trimmed.contains('/')
        && !trimmed.chars().any(|ch| ch.is_whitespace() || ch.is_control());
    if !is_valid {
        return Err(NmdcError::InvalidId(id.to_string()));
    }
    Ok(trimmed)
}

/// String id of a record, if it has one.
pub fn record_id(record: &Record) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_collection_short_and_full_names() {
        assert_eq!(
            "biosample".parse::<Collection>().unwrap(),
            Collection::Biosample
        );
        assert_eq!(
            "data_object_set".parse::<Collection>().unwrap(),
            Collection::DataObject
        );
        assert_eq!(
            "data-generation".parse::<Collection>().unwrap(),
            Collection::DataGeneration
        );
    }

    #[test]
    fn parse_collection_invalid() {
        let err = "genome_set".parse::<Collection>().unwrap_err();
        assert_matches!(err, NmdcError::InvalidCollection(_));
    }

    #[test]
    fn record_id_validation() {
        assert_eq!(
            validate_record_id(" nmdc:bsm-11-x5xj6p33 ").unwrap(),
            "nmdc:bsm-11-x5xj6p33"
        );
        assert_matches!(validate_record_id(""), Err(NmdcError::InvalidId(_)));
        assert_matches!(validate_record_id("a/b"), Err(NmdcError::InvalidId(_)));
        assert_matches!(validate_record_id("a b"), Err(NmdcError::InvalidId(_)));
    }
}
