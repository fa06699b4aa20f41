//! Response Parser — turns raw completion text into a schema-conformant record.
//!
//! Two payload shapes are understood:
//! - JSON object: the slice from the first `{` to the last `}`, so commentary
//!   around the object is tolerated.
//! - Delimited text: a header row followed by one data row, comma separated.
//!
//! Both paths end in `Schema::record_from_pairs`, which drops undeclared keys.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::extraction::models::ExtractionRecord;
use crate::extraction::schema::Schema;

/// Which payload encoding the parser expects from the collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadShape {
    #[default]
    Json,
    Delimited,
    /// JSON when the brace pre-check passes, delimited otherwise.
    Auto,
}

impl FromStr for PayloadShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(PayloadShape::Json),
            "delimited" | "csv" => Ok(PayloadShape::Delimited),
            "auto" => Ok(PayloadShape::Auto),
            other => Err(format!("unknown payload shape '{other}'")),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("no JSON object found in response")]
    NoJsonObject,

    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),

    #[error("JSON payload is not an object")]
    NotAnObject,

    #[error("no header row naming a declared field")]
    NoHeaderRow,

    #[error("header row has no data row after it")]
    NoDataRow,

    #[error("invalid delimited payload: {0}")]
    InvalidDelimited(String),
}

/// A parsed record plus the keys that were stripped from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord {
    pub record: ExtractionRecord,
    pub dropped_keys: Vec<String>,
}

/// Parses a raw completion for one document under the given schema.
pub fn parse_response(
    raw: &str,
    schema: &Schema,
    shape: PayloadShape,
    document_id: &str,
) -> Result<ParsedRecord, PayloadError> {
    let (record, dropped_keys) = match shape {
        PayloadShape::Json => parse_json_payload(raw, schema, document_id)?,
        PayloadShape::Delimited => parse_delimited_payload(raw, schema, document_id)?,
        PayloadShape::Auto => {
            if extract_json_payload(raw).is_some() {
                parse_json_payload(raw, schema, document_id)?
            } else {
                parse_delimited_payload(raw, schema, document_id)?
            }
        }
    };

    if !dropped_keys.is_empty() {
        debug!(
            "Dropped {} undeclared key(s) from {}: {:?}",
            dropped_keys.len(),
            document_id,
            dropped_keys
        );
    }

    Ok(ParsedRecord {
        record,
        dropped_keys,
    })
}

/// Returns the substring from the first `{` to the last `}` inclusive, or
/// `None` when the text has no such pair. No parsing is attempted here.
pub fn extract_json_payload(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let slice = &raw[start..=end];
    (slice.starts_with('{') && slice.ends_with('}')).then_some(slice)
}

fn parse_json_payload(
    raw: &str,
    schema: &Schema,
    document_id: &str,
) -> Result<(ExtractionRecord, Vec<String>), PayloadError> {
    let payload = extract_json_payload(raw).ok_or(PayloadError::NoJsonObject)?;
    let value: Value =
        serde_json::from_str(payload).map_err(|e| PayloadError::InvalidJson(e.to_string()))?;
    let Value::Object(map) = value else {
        return Err(PayloadError::NotAnObject);
    };

    let pairs = map.into_iter().map(|(k, v)| (k, render_value(&v)));
    Ok(schema.record_from_pairs(document_id, pairs))
}

/// Renders a JSON value as a single table cell.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

fn parse_delimited_payload(
    raw: &str,
    schema: &Schema,
    document_id: &str,
) -> Result<(ExtractionRecord, Vec<String>), PayloadError> {
    let body = strip_code_fences(raw);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut records = reader.records();

    // Lines of commentary before the table are skipped until a row names a declared field.
    let header = loop {
        match records.next() {
            Some(Ok(row)) if row.iter().any(|cell| schema.contains(cell)) => break row,
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(PayloadError::InvalidDelimited(e.to_string())),
            None => return Err(PayloadError::NoHeaderRow),
        }
    };

    let data = match records.next() {
        Some(Ok(row)) => row,
        Some(Err(e)) => return Err(PayloadError::InvalidDelimited(e.to_string())),
        None => return Err(PayloadError::NoDataRow),
    };

    let pairs = header
        .iter()
        .zip(data.iter())
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()));
    Ok(schema.record_from_pairs(document_id, pairs))
}

/// Strips ```lang ... ``` fences the model may wrap its answer in.
fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (`json`, `csv`, ...) on the opening line.
    let rest = match rest.find('\n') {
        Some(idx) if !rest[..idx].contains(',') => &rest[idx + 1..],
        _ => rest,
    };
    rest.trim_end()
        .strip_suffix("```")
        .map(str::trim)
        .unwrap_or_else(|| rest.trim())
}
