//! Annotation enrichment between two groups of biosamples.
//!
//! The pipeline is linear: load a dumped study, split its biosamples on one
//! property, build a 2x2 table per annotation, test, correct, rank.

pub mod dump;
pub mod grouping;
pub mod stats;

use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8Path;
use serde::Serialize;

use crate::error::NmdcError;

pub use dump::{BiosampleData, StudyDump, load_study};
pub use grouping::{Group, Grouping, GroupingMode, PropertyValue, group_samples};
pub use stats::{ContingencyTable, FdrMethod, TestMethod};

pub const DEFAULT_ANNOTATION_TYPE: &str = "ec_number";
pub const DEFAULT_MIN_COUNT: u64 = 5;
pub const DEFAULT_ALPHA: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentOptions {
    pub group_by: String,
    pub annotation_type: String,
    pub grouping: GroupingMode,
    pub method: TestMethod,
    pub fdr_method: FdrMethod,
    pub min_count: u64,
    pub alpha: f64,
    /// Count every occurrence instead of biosamples with at least one.
    pub raw_counts: bool,
}

impl EnrichmentOptions {
    pub fn new(group_by: impl Into<String>) -> Self {
        Self {
            group_by: group_by.into(),
            annotation_type: DEFAULT_ANNOTATION_TYPE.to_string(),
            grouping: GroupingMode::Auto,
            method: TestMethod::default(),
            fdr_method: FdrMethod::default(),
            min_count: DEFAULT_MIN_COUNT,
            alpha: DEFAULT_ALPHA,
            raw_counts: false,
        }
    }

    fn validate(&self) -> Result<(), NmdcError> {
        if self.group_by.trim().is_empty() {
            return Err(NmdcError::InvalidArgument(
                "a property to group by is required".to_string(),
            ));
        }
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(NmdcError::InvalidArgument(format!(
                "alpha must be in (0, 1], got {}",
                self.alpha
            )));
        }
        Ok(())
    }
}

/// One tested annotation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentResult {
    pub feature_id: String,
    pub feature_name: String,
    pub group1_name: String,
    pub group1_count: u64,
    pub group1_total: u64,
    pub group2_name: String,
    pub group2_count: u64,
    pub group2_total: u64,
    pub p_value: f64,
    pub fdr: f64,
    pub effect_size: f64,
    pub enriched_in: String,
}

/// An annotation seen in the groups but too rare to test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UntestedAnnotation {
    pub feature_id: String,
    pub group1_count: u64,
    pub group2_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub name: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentReport {
    pub group_by: String,
    pub group1: GroupSummary,
    pub group2: GroupSummary,
    /// Biosamples without the property or outside both groups.
    pub excluded: usize,
    pub alpha: f64,
    /// Every tested annotation, ranked by adjusted then raw p-value, then id.
    pub results: Vec<EnrichmentResult>,
    pub untested: Vec<UntestedAnnotation>,
}

impl EnrichmentReport {
    /// Ranked results with adjusted p-value at or below `alpha`.
    pub fn significant(&self) -> &[EnrichmentResult] {
        let end = self.results.partition_point(|result| result.fdr <= self.alpha);
        &self.results[..end]
    }
}

/// Load `study_dir` and run [`analyze`] on it.
pub fn run_enrichment(
    study_dir: &Utf8Path,
    options: &EnrichmentOptions,
) -> Result<EnrichmentReport, NmdcError> {
    options.validate()?;
    let dump = load_study(study_dir, &options.annotation_type)?;
    analyze(&dump.biosamples, &dump.feature_names, options)
}

/// Group `biosamples`, test every annotation, correct and rank.
///
/// `feature_names` supplies display names; ids without one are shown as-is.
pub fn analyze(
    biosamples: &[BiosampleData],
    feature_names: &BTreeMap<String, String>,
    options: &EnrichmentOptions,
) -> Result<EnrichmentReport, NmdcError> {
    options.validate()?;

    let mut values = Vec::with_capacity(biosamples.len());
    let mut missing = 0usize;
    for biosample in biosamples {
        match biosample.property(&options.group_by) {
            Some(value) => values.push((biosample.id.clone(), value)),
            None => {
                tracing::warn!(
                    biosample = %biosample.id,
                    property = %options.group_by,
                    "property missing; excluded from both groups"
                );
                missing += 1;
            }
        }
    }

    let grouping = group_samples(&options.group_by, &values, &options.grouping)?;
    let by_id: BTreeMap<&str, &BiosampleData> = biosamples
        .iter()
        .map(|biosample| (biosample.id.as_str(), biosample))
        .collect();
    let first = group_members(&grouping.first, &by_id);
    let second = group_members(&grouping.second, &by_id);

    let features: BTreeSet<&str> = first
        .iter()
        .chain(second.iter())
        .flat_map(|biosample| biosample.annotations.keys().map(String::as_str))
        .collect();
    let total1 = group_total(&first, options.raw_counts);
    let total2 = group_total(&second, options.raw_counts);

    let mut results = Vec::new();
    let mut untested = Vec::new();
    for feature in features {
        let count1 = feature_count(&first, feature, options.raw_counts);
        let count2 = feature_count(&second, feature, options.raw_counts);
        if count1 + count2 < options.min_count {
            untested.push(UntestedAnnotation {
                feature_id: feature.to_string(),
                group1_count: count1,
                group2_count: count2,
            });
            continue;
        }

        let table = ContingencyTable::new(count1, total1, count2, total2);
        let enriched_in = if stats::rate(count1, total1) > stats::rate(count2, total2) {
            &grouping.first.name
        } else {
            &grouping.second.name
        };
        results.push(EnrichmentResult {
            feature_id: feature.to_string(),
            feature_name: feature_names
                .get(feature)
                .cloned()
                .unwrap_or_else(|| feature.to_string()),
            group1_name: grouping.first.name.clone(),
            group1_count: count1,
            group1_total: total1,
            group2_name: grouping.second.name.clone(),
            group2_count: count2,
            group2_total: total2,
            p_value: stats::p_value(options.method, &table),
            fdr: 1.0,
            effect_size: stats::effect_size(count1, total1, count2, total2),
            enriched_in: enriched_in.clone(),
        });
    }

    let p_values: Vec<f64> = results.iter().map(|result| result.p_value).collect();
    let adjusted = stats::adjust_p_values(options.fdr_method, &p_values);
    for (result, fdr) in results.iter_mut().zip(adjusted) {
        result.fdr = fdr;
    }
    results.sort_by(|a, b| {
        a.fdr
            .total_cmp(&b.fdr)
            .then(a.p_value.total_cmp(&b.p_value))
            .then_with(|| a.feature_id.cmp(&b.feature_id))
    });

    tracing::info!(
        tested = results.len(),
        untested = untested.len(),
        method = %options.method,
        fdr_method = %options.fdr_method,
        "enrichment tests complete"
    );

    Ok(EnrichmentReport {
        group_by: options.group_by.clone(),
        group1: GroupSummary {
            name: grouping.first.name.clone(),
            size: grouping.first.len(),
        },
        group2: GroupSummary {
            name: grouping.second.name.clone(),
            size: grouping.second.len(),
        },
        excluded: grouping.excluded + missing,
        alpha: options.alpha,
        results,
        untested,
    })
}

fn group_members<'a>(
    group: &Group,
    by_id: &BTreeMap<&str, &'a BiosampleData>,
) -> Vec<&'a BiosampleData> {
    group
        .members
        .iter()
        .filter_map(|id| by_id.get(id.as_str()).copied())
        .collect()
}

fn feature_count(group: &[&BiosampleData], feature: &str, raw_counts: bool) -> u64 {
    group
        .iter()
        .filter_map(|biosample| biosample.annotations.get(feature))
        .map(|count| if raw_counts { *count } else { u64::from(*count > 0) })
        .sum()
}

fn group_total(group: &[&BiosampleData], raw_counts: bool) -> u64 {
    if raw_counts {
        group
            .iter()
            .flat_map(|biosample| biosample.annotations.values())
            .sum()
    } else {
        group.len() as u64
    }
}
