//! MongoDB-style filter construction.
//!
//! Filters are built as JSON objects and serialized with `serde_json`, so
//! values are always JSON-escaped. Field names are dot-paths and pass through
//! untouched; only values embedded in a `$regex` are regex-escaped.

use std::fmt;

use serde_json::{Map, Value, json};

use crate::error::NmdcError;

/// Characters that carry meaning inside a MongoDB (PCRE) regular expression.
pub const REGEX_METACHARACTERS: &[char] = &[
    '.', '(', ')', '[', ']', '{', '}', '*', '+', '?', '^', '$', '|', '\\', '-',
];

/// Backslash-escape every regex metacharacter so `value` matches literally.
pub fn escape_regex(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    for ch in value.chars() {
        if REGEX_METACHARACTERS.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// A filter document: field path to literal or operator mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(Map<String, Value>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Implicit AND over `fields`: each pair becomes a sibling key.
    pub fn from_fields<I, K, V>(fields: I, exact_match: bool) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filter = Self::new();
        for (name, value) in fields {
            if exact_match {
                filter.insert_exact(name.as_ref(), value.as_ref());
            } else {
                filter.insert_regex(name.as_ref(), value.as_ref());
            }
        }
        filter
    }

    /// Case-insensitive literal substring match on `field`.
    pub fn insert_regex(&mut self, field: &str, value: &str) {
        let escaped = escape_regex(value);
        tracing::debug!(field, escaped = %escaped, "regex filter value");
        self.0.insert(
            field.to_string(),
            json!({ "$regex": escaped, "$options": "i" }),
        );
    }

    pub fn insert_exact(&mut self, field: &str, value: &str) {
        self.0
            .insert(field.to_string(), Value::String(value.to_string()));
    }

    pub fn insert(&mut self, field: &str, condition: Value) {
        self.0.insert(field.to_string(), condition);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Serializing a map of strings and JSON values cannot fail.
        let text = serde_json::to_string(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

/// Build a filter string from field/value pairs.
///
/// With `exact_match == false` each value becomes
/// `{"$regex": <escaped value>, "$options": "i"}`; otherwise the literal value.
pub fn build_filter<I, K, V>(fields: I, exact_match: bool) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let filter = Filter::from_fields(fields, exact_match).to_string();
    tracing::debug!(filter = %filter, "built filter");
    filter
}

/// Single-field form of [`build_filter`].
pub fn attribute_filter(name: &str, value: &str, exact_match: bool) -> String {
    build_filter([(name, value)], exact_match)
}

/// `{"id": {"$in": [...]}}` over the given ids.
pub fn ids_filter<S: AsRef<str>>(ids: &[S]) -> String {
    let ids: Vec<Value> = ids
        .iter()
        .map(|id| Value::String(id.as_ref().to_string()))
        .collect();
    let mut filter = Filter::new();
    filter.insert("id", json!({ "$in": ids }));
    filter.to_string()
}

/// A caller-supplied filter used verbatim. Only JSON syntax is checked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawFilter(String);

impl RawFilter {
    pub fn parse(text: &str) -> Result<Self, NmdcError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str::<Value>(text)
            .map_err(|err| NmdcError::malformed_filter(text, err.to_string()))?;
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Parse command-line filter input into compact JSON.
///
/// Text starting with `{` must be valid JSON. Anything else is read as a YAML
/// mapping, so `ecosystem_category: Plants` works without quoting.
pub fn parse_filter_expression(text: &str) -> Result<String, NmdcError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    let parsed: Value = if trimmed.starts_with('{') {
        serde_json::from_str(trimmed)
            .map_err(|err| NmdcError::malformed_filter(text, err.to_string()))?
    } else {
        serde_yaml::from_str(trimmed)
            .map_err(|err| NmdcError::malformed_filter(text, err.to_string()))?
    };

    if !parsed.is_object() {
        return Err(NmdcError::malformed_filter(
            text,
            "filter must be a key-value mapping",
        ));
    }
    serde_json::to_string(&parsed).map_err(|err| NmdcError::malformed_filter(text, err.to_string()))
}

/// Geographic bounding box over `lat_lon`.
pub fn bbox_filter(
    min_latitude: f64,
    min_longitude: f64,
    max_latitude: f64,
    max_longitude: f64,
) -> Result<String, NmdcError> {
    for (name, value, limit) in [
        ("min_latitude", min_latitude, 90.0),
        ("max_latitude", max_latitude, 90.0),
        ("min_longitude", min_longitude, 180.0),
        ("max_longitude", max_longitude, 180.0),
    ] {
        if !value.is_finite() || value.abs() > limit {
            return Err(NmdcError::InvalidArgument(format!(
                "{name} must be between -{limit} and {limit}, got {value}"
            )));
        }
    }
    if min_latitude > max_latitude || min_longitude > max_longitude {
        return Err(NmdcError::InvalidArgument(
            "bounding box minimum exceeds maximum".to_string(),
        ));
    }

    let mut filter = Filter::new();
    filter.insert(
        "lat_lon.latitude",
        json!({ "$gte": min_latitude, "$lte": max_latitude }),
    );
    filter.insert(
        "lat_lon.longitude",
        json!({ "$gte": min_longitude, "$lte": max_longitude }),
    );
    Ok(filter.to_string())
}

/// Parse `min_lat,min_lon,max_lat,max_lon`.
pub fn parse_bbox(text: &str) -> Result<String, NmdcError> {
    let parts = text
        .split(',')
        .map(|part| {
            part.trim().parse::<f64>().map_err(|_| {
                NmdcError::InvalidArgument(format!("bounding box value is not a number: {part}"))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let [min_lat, min_lon, max_lat, max_lon] = parts.as_slice() else {
        return Err(NmdcError::InvalidArgument(
            "bounding box must have exactly 4 values: min_lat,min_lon,max_lat,max_lon".to_string(),
        ));
    };
    bbox_filter(*min_lat, *min_lon, *max_lat, *max_lon)
}

/// Shallow merge of two JSON object filters; keys in `second` win.
pub fn merge_filters(first: &str, second: &str) -> Result<String, NmdcError> {
    let mut merged = filter_object(first)?;
    for (key, value) in filter_object(second)? {
        merged.insert(key, value);
    }
    if merged.is_empty() {
        return Ok(String::new());
    }
    serde_json::to_string(&merged).map_err(|err| NmdcError::malformed_filter(first, err.to_string()))
}

fn filter_object(text: &str) -> Result<Map<String, Value>, NmdcError> {
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(NmdcError::malformed_filter(text, "filter must be a JSON object")),
        Err(err) => Err(NmdcError::malformed_filter(text, err.to_string())),
    }
}
