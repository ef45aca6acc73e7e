//! Reading a dumped study directory.
//!
//! Layout, as written by the dump step:
//!
//! ```text
//! <study>/
//!   nmdc_bsm-11-abc/
//!     biosample.json
//!     data_objects/
//!       nmdc_wfmgan-11-xyz_functional_annotation.gff[.gz]
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::MultiGzDecoder;
use regex::Regex;
use serde_json::Value;

use crate::domain::Record;
use crate::enrichment::grouping::PropertyValue;
use crate::error::NmdcError;
use crate::fs_util::walk_files;

pub const BIOSAMPLE_DIR_PREFIX: &str = "nmdc_bsm-";
pub const BIOSAMPLE_FILE: &str = "biosample.json";
pub const DATA_OBJECTS_DIR: &str = "data_objects";
pub const ANNOTATION_SUFFIX: &str = "_functional_annotation.gff";

const PFAM_TYPE_PATTERN: &str = r"^PF\d{5}$";
const GFF_COLUMNS: usize = 9;

/// One biosample with its metadata and annotation counts.
#[derive(Debug, Clone, PartialEq)]
pub struct BiosampleData {
    pub id: String,
    pub dir: Utf8PathBuf,
    pub metadata: Record,
    pub annotations: BTreeMap<String, u64>,
}

impl BiosampleData {
    pub fn property(&self, property: &str) -> Option<PropertyValue> {
        property_value(&self.metadata, property)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudyDump {
    pub biosamples: Vec<BiosampleData>,
    /// Human-readable label per annotation id, from the GFF `product` attribute.
    pub feature_names: BTreeMap<String, String>,
    /// Biosample ids that had metadata but no annotation file.
    pub without_annotations: Vec<String>,
}

/// Load every biosample of `study_dir` that has both metadata and at least
/// one functional annotation GFF.
pub fn load_study(study_dir: &Utf8Path, annotation_type: &str) -> Result<StudyDump, NmdcError> {
    if !study_dir.is_dir() {
        return Err(NmdcError::MissingData(study_dir.as_std_path().to_path_buf()));
    }

    let mut biosample_dirs: Vec<Utf8PathBuf> = study_dir
        .read_dir_utf8()
        .map_err(|err| NmdcError::Filesystem(format!("{study_dir}: {err}")))?
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().starts_with(BIOSAMPLE_DIR_PREFIX))
        .map(|entry| entry.into_path())
        .filter(|path| path.join(BIOSAMPLE_FILE).is_file())
        .collect();
    biosample_dirs.sort();

    if biosample_dirs.is_empty() {
        let pattern = study_dir.join(format!("{BIOSAMPLE_DIR_PREFIX}*")).join(BIOSAMPLE_FILE);
        return Err(NmdcError::MissingData(pattern.into_std_path_buf()));
    }
    tracing::info!(study = %study_dir, biosamples = biosample_dirs.len(), "found biosample metadata");

    let reader = GffAnnotationReader::new(annotation_type)?;
    let mut dump = StudyDump::default();
    for dir in biosample_dirs {
        let metadata = read_biosample(&dir.join(BIOSAMPLE_FILE))?;
        let id = metadata
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| biosample_id_from_dir(dir.file_name().unwrap_or_default()));

        let gff_files = annotation_files(&dir)?;
        if gff_files.is_empty() {
            tracing::warn!(biosample = %id, "no functional annotation file; skipping");
            dump.without_annotations.push(id);
            continue;
        }

        let mut counts = AnnotationCounts::default();
        for path in &gff_files {
            reader.read_path(path, &mut counts)?;
        }
        tracing::debug!(
            biosample = %id,
            files = gff_files.len(),
            annotations = counts.counts.len(),
            "loaded annotations"
        );
        for (feature, name) in counts.names {
            dump.feature_names.entry(feature).or_insert(name);
        }
        dump.biosamples.push(BiosampleData {
            id,
            dir,
            metadata,
            annotations: counts.counts,
        });
    }

    if dump.biosamples.is_empty() {
        let pattern = study_dir
            .join("*")
            .join(DATA_OBJECTS_DIR)
            .join(format!("*{ANNOTATION_SUFFIX}"));
        return Err(NmdcError::MissingData(pattern.into_std_path_buf()));
    }
    tracing::info!(
        loaded = dump.biosamples.len(),
        skipped = dump.without_annotations.len(),
        annotation_type,
        "loaded study dump"
    );
    Ok(dump)
}

/// `nmdc_bsm-11-abc` names the biosample `nmdc:bsm-11-abc`.
pub fn biosample_id_from_dir(name: &str) -> String {
    name.replacen("nmdc_", "nmdc:", 1)
}

fn read_biosample(path: &Utf8Path) -> Result<Record, NmdcError> {
    let content =
        fs::read_to_string(path).map_err(|err| NmdcError::Filesystem(format!("{path}: {err}")))?;
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(record)) => Ok(record),
        Ok(_) => Err(NmdcError::Filesystem(format!(
            "{path}: expected a JSON object"
        ))),
        Err(err) => Err(NmdcError::Filesystem(format!("{path}: {err}"))),
    }
}

fn annotation_files(biosample_dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, NmdcError> {
    let data_dir = biosample_dir.join(DATA_OBJECTS_DIR);
    if !data_dir.is_dir() {
        return Ok(Vec::new());
    }
    let files = walk_files(&data_dir)?
        .into_iter()
        .filter(|path| path.parent().and_then(Utf8Path::file_name) == Some(DATA_OBJECTS_DIR))
        .filter(|path| {
            let name = path.file_name().unwrap_or_default();
            name.ends_with(ANNOTATION_SUFFIX) || name.ends_with(&format!("{ANNOTATION_SUFFIX}.gz"))
        })
        .collect();
    Ok(files)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationCounts {
    pub counts: BTreeMap<String, u64>,
    pub names: BTreeMap<String, String>,
}

/// Counts one attribute of GFF3 feature lines.
pub struct GffAnnotationReader {
    annotation_type: String,
    pfam_type: Regex,
}

impl GffAnnotationReader {
    pub fn new(annotation_type: &str) -> Result<Self, NmdcError> {
        let annotation_type = annotation_type.trim();
        if annotation_type.is_empty() {
            return Err(NmdcError::InvalidArgument(
                "annotation type must not be empty".to_string(),
            ));
        }
        let pfam_type =
            Regex::new(PFAM_TYPE_PATTERN).map_err(|err| NmdcError::InvalidArgument(err.to_string()))?;
        Ok(Self {
            annotation_type: annotation_type.to_string(),
            pfam_type,
        })
    }

    pub fn read_path(&self, path: &Utf8Path, counts: &mut AnnotationCounts) -> Result<(), NmdcError> {
        let file = File::open(path).map_err(|err| NmdcError::Filesystem(format!("{path}: {err}")))?;
        let reader: Box<dyn BufRead> = if path.extension() == Some("gz") {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        self.read(reader, counts)
            .map_err(|err| NmdcError::Filesystem(format!("{path}: {err}")))
    }

    pub fn read<R: BufRead>(&self, reader: R, counts: &mut AnnotationCounts) -> std::io::Result<()> {
        for line in reader.lines() {
            let line = line?;
            self.count_line(&line, counts);
        }
        Ok(())
    }

    fn count_line(&self, line: &str, counts: &mut AnnotationCounts) {
        if line.is_empty() || line.starts_with('#') {
            return;
        }
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < GFF_COLUMNS {
            return;
        }
        let attributes = parse_attributes(columns[8]);
        let lookup = |key: &str| {
            attributes
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| *value)
                .filter(|value| !value.is_empty())
        };

        let feature_type = columns[2];
        let raw = match lookup(self.annotation_type.as_str()) {
            Some(value) => value,
            None if self.annotation_type == "pfam" && self.pfam_type.is_match(feature_type) => {
                feature_type
            }
            None => return,
        };
        let product = lookup("product");

        for value in raw.split(',').map(str::trim).filter(|value| !value.is_empty()) {
            *counts.counts.entry(value.to_string()).or_insert(0) += 1;
            if let Some(product) = product {
                counts
                    .names
                    .entry(value.to_string())
                    .or_insert_with(|| product.to_string());
            }
        }
    }
}

/// Split a GFF3 attribute column (`key=value;key=value`) into pairs.
pub fn parse_attributes(column: &str) -> Vec<(&str, &str)> {
    column
        .split(';')
        .filter_map(|item| item.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect()
}

/// Value of `property` on a biosample record.
///
/// Tries the key itself, a dotted path, then `<key>_has_numeric_value` style
/// keys. Schema value objects are unwrapped to their numeric or raw value.
pub fn property_value(record: &Record, property: &str) -> Option<PropertyValue> {
    let candidates = [
        property.to_string(),
        format!("{property}_has_numeric_value"),
        format!("{property}_has_maximum_numeric_value"),
    ];
    candidates
        .iter()
        .find_map(|key| record.get(key))
        .or_else(|| lookup_path(record, property))
        .and_then(unwrap_value)
}

fn lookup_path<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = record.get(parts.next()?)?;
    parts.try_fold(first, |value, part| value.get(part))
}

fn unwrap_value(value: &Value) -> Option<PropertyValue> {
    match value {
        Value::Number(number) => number.as_f64().map(PropertyValue::Number),
        Value::String(text) if !text.trim().is_empty() => Some(PropertyValue::Text(text.clone())),
        Value::Bool(flag) => Some(PropertyValue::Text(flag.to_string())),
        Value::Object(object) => object
            .get("has_numeric_value")
            .or_else(|| object.get("has_raw_value"))
            .or_else(|| object.get("term").and_then(|term| term.get("id")))
            .and_then(unwrap_value),
        _ => None,
    }
}
