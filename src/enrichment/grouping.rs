//! Two-way partitioning of biosamples by one metadata property.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::NmdcError;

/// A biosample property value after unwrapping schema value objects.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Number(f64),
    Text(String),
}

impl PropertyValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Number(value) => Some(*value),
            PropertyValue::Text(_) => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Number(value) => write!(f, "{value}"),
            PropertyValue::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum GroupingMode {
    /// `<= value` against `> value`.
    Threshold(f64),
    /// Equal-width bins over the observed range; lowest bin against highest.
    Bins(usize),
    /// Two labels, or one label against every other value.
    Categories(Vec<String>),
    /// Median split for numbers, value split for two-valued text.
    #[default]
    Auto,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub members: Vec<String>,
}

impl Group {
    fn named(name: String) -> Self {
        Self {
            name,
            members: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Result of a split. Samples in neither group are counted in `excluded`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grouping {
    pub first: Group,
    pub second: Group,
    pub excluded: usize,
}

/// Split `(biosample id, value)` pairs into exactly two non-empty groups.
///
/// Only biosamples that carry the property are passed in; the caller drops
/// the rest. Every input lands in at most one group.
pub fn group_samples(
    property: &str,
    values: &[(String, PropertyValue)],
    mode: &GroupingMode,
) -> Result<Grouping, NmdcError> {
    if values.is_empty() {
        return Err(NmdcError::EmptyGroup {
            property: property.to_string(),
            group: "all biosamples".to_string(),
        });
    }

    let grouping = match mode {
        GroupingMode::Threshold(threshold) => split_threshold(property, values, *threshold)?,
        GroupingMode::Bins(bins) => split_bins(property, values, *bins)?,
        GroupingMode::Categories(labels) => split_categories(property, values, labels)?,
        GroupingMode::Auto => return group_samples(property, values, &auto_mode(property, values)?),
    };

    for group in [&grouping.first, &grouping.second] {
        if group.is_empty() {
            return Err(NmdcError::EmptyGroup {
                property: property.to_string(),
                group: group.name.clone(),
            });
        }
    }
    tracing::info!(
        property,
        first = %grouping.first.name,
        first_size = grouping.first.len(),
        second = %grouping.second.name,
        second_size = grouping.second.len(),
        excluded = grouping.excluded,
        "grouped biosamples"
    );
    Ok(grouping)
}

fn numeric_values<'a>(
    property: &str,
    values: &'a [(String, PropertyValue)],
) -> Result<Vec<(&'a str, f64)>, NmdcError> {
    let numeric: Vec<(&str, f64)> = values
        .iter()
        .filter_map(|(id, value)| value.as_number().map(|number| (id.as_str(), number)))
        .collect();
    if numeric.is_empty() {
        return Err(NmdcError::InvalidGrouping(format!(
            "property '{property}' has no numeric values; use --categories"
        )));
    }
    Ok(numeric)
}

fn split_threshold(
    property: &str,
    values: &[(String, PropertyValue)],
    threshold: f64,
) -> Result<Grouping, NmdcError> {
    if !threshold.is_finite() {
        return Err(NmdcError::InvalidGrouping(format!(
            "threshold must be finite, got {threshold}"
        )));
    }
    let numeric = numeric_values(property, values)?;
    let mut first = Group::named(format!("{property} <= {threshold}"));
    let mut second = Group::named(format!("{property} > {threshold}"));
    for (id, value) in &numeric {
        if *value <= threshold {
            first.members.push(id.to_string());
        } else {
            second.members.push(id.to_string());
        }
    }
    Ok(Grouping {
        first,
        second,
        excluded: values.len() - numeric.len(),
    })
}

fn split_bins(
    property: &str,
    values: &[(String, PropertyValue)],
    bins: usize,
) -> Result<Grouping, NmdcError> {
    if bins < 2 {
        return Err(NmdcError::InvalidGrouping(format!(
            "bins must be at least 2, got {bins}"
        )));
    }
    let numeric = numeric_values(property, values)?;
    let min = numeric.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
    let max = numeric
        .iter()
        .map(|(_, v)| *v)
        .fold(f64::NEG_INFINITY, f64::max);
    let width = (max - min) / bins as f64;
    if width <= 0.0 {
        return Err(NmdcError::InvalidGrouping(format!(
            "every value of '{property}' is {min}; cannot bin"
        )));
    }

    let last = bins - 1;
    let mut first = Group::named(format!(
        "{property} [{:.2}, {:.2})",
        min,
        min + width
    ));
    let mut second = Group::named(format!(
        "{property} [{:.2}, {:.2}]",
        min + width * last as f64,
        max
    ));
    let mut excluded = values.len() - numeric.len();
    for (id, value) in &numeric {
        let bin = (((value - min) / width).floor() as usize).min(last);
        if bin == 0 {
            first.members.push(id.to_string());
        } else if bin == last {
            second.members.push(id.to_string());
        } else {
            excluded += 1;
        }
    }
    Ok(Grouping {
        first,
        second,
        excluded,
    })
}

fn split_categories(
    property: &str,
    values: &[(String, PropertyValue)],
    labels: &[String],
) -> Result<Grouping, NmdcError> {
    let labels: Vec<&str> = labels
        .iter()
        .map(|label| label.trim())
        .filter(|label| !label.is_empty())
        .collect();

    let (mut first, mut second, rest_is_second) = match labels.as_slice() {
        [only] => (
            Group::named(only.to_string()),
            Group::named(format!("not {only}")),
            true,
        ),
        [a, b] if a != b => (
            Group::named(a.to_string()),
            Group::named(b.to_string()),
            false,
        ),
        _ => {
            return Err(NmdcError::InvalidGrouping(format!(
                "categories for '{property}' must be one label or two distinct labels, got {}",
                labels.len()
            )));
        }
    };

    let mut excluded = 0;
    for (id, value) in values {
        let text = value.to_string();
        if text == first.name {
            first.members.push(id.clone());
        } else if text == second.name || rest_is_second {
            second.members.push(id.clone());
        } else {
            excluded += 1;
        }
    }
    Ok(Grouping {
        first,
        second,
        excluded,
    })
}

fn auto_mode(
    property: &str,
    values: &[(String, PropertyValue)],
) -> Result<GroupingMode, NmdcError> {
    let all_numeric = values.iter().all(|(_, value)| value.as_number().is_some());
    if all_numeric {
        let mut sorted: Vec<f64> = values.iter().filter_map(|(_, v)| v.as_number()).collect();
        sorted.sort_by(f64::total_cmp);
        let median = sorted[sorted.len() / 2];
        tracing::info!(property, median, "splitting at median");
        return Ok(GroupingMode::Threshold(median));
    }

    let distinct: BTreeSet<String> = values.iter().map(|(_, value)| value.to_string()).collect();
    if distinct.len() == 2 {
        return Ok(GroupingMode::Categories(distinct.into_iter().collect()));
    }
    Err(NmdcError::InvalidGrouping(format!(
        "property '{property}' has {} distinct values; choose two with --categories",
        distinct.len()
    )))
}
