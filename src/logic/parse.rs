use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{QueryError, QueryResult};
use crate::model::{QueryDescriptor, SortSpec, WhereClause};

/// Parse a raw URL query map into a normalized descriptor.
///
/// Values are expected already percent-decoded (the extractor does that).
/// Structured fields accept JSON first and fall back to the comma token
/// grammar; unrecognized keys are ignored; empty values stay absent.
pub fn parse_query(raw: &HashMap<String, String>) -> QueryResult<QueryDescriptor> {
    let mut descriptor = QueryDescriptor::default();

    if let Some(limit) = non_empty(raw.get("limit")) {
        descriptor.limit = Some(parse_non_negative(limit, "limit")?);
    }
    if let Some(skip) = non_empty(raw.get("skip")) {
        descriptor.skip = Some(parse_non_negative(skip, "skip")?);
    }
    if let Some(where_raw) = non_empty(raw.get("where")) {
        let value = decode_structured(where_raw);
        let clause: WhereClause = serde_json::from_value(value)
            .map_err(|e| QueryError::validation(format!("malformed where clause: {}", e)))?;
        if !clause.is_empty() {
            descriptor.where_clause = Some(clause);
        }
    }
    if let Some(sort_raw) = non_empty(raw.get("sort")) {
        let value = decode_structured(sort_raw);
        let sort: SortSpec = serde_json::from_value(value)
            .map_err(|e| QueryError::validation(format!("malformed sort: {}", e)))?;
        if !sort.0.is_empty() {
            descriptor.sort = Some(sort);
        }
    }
    if let Some(populate_raw) = non_empty(raw.get("populate")) {
        let names = parse_populate(populate_raw);
        if !names.is_empty() {
            descriptor.populate = Some(names);
        }
    }

    Ok(descriptor)
}

/// Parse a body-borne descriptor (already-structured JSON).
pub fn parse_descriptor(value: Value) -> QueryResult<QueryDescriptor> {
    serde_json::from_value(value)
        .map_err(|e| QueryError::validation(format!("malformed query descriptor: {}", e)))
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn parse_non_negative(raw: &str, field: &str) -> QueryResult<u64> {
    raw.parse::<u64>().map_err(|_| {
        QueryError::validation(format!("{} must be a non-negative integer, got {:?}", field, raw))
    })
}

/// JSON first; on failure, the token grammar: comma-separated `key<sep>value`
/// pairs where the separator is the first of `:`, `=`, or space found in the
/// string.
fn decode_structured(raw: &str) -> Value {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return value;
    }
    let sep = split_token(raw);
    let mut object = Map::new();
    for pair in raw.split(',') {
        let mut parts = pair.splitn(2, sep);
        let key = parts.next().unwrap_or("").trim();
        if key.is_empty() {
            continue;
        }
        let value = parts
            .next()
            .map(|v| Value::String(v.trim().to_string()))
            .unwrap_or(Value::Null);
        object.insert(key.to_string(), value);
    }
    Value::Object(object)
}

fn split_token(raw: &str) -> char {
    if raw.contains(':') {
        ':'
    } else if raw.contains('=') {
        '='
    } else {
        ' '
    }
}

/// Populate accepts a JSON array, a JSON string, or a bare comma list.
fn parse_populate(raw: &str) -> Vec<String> {
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        match value {
            Value::Array(items) => {
                return items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect();
            }
            Value::String(s) => return vec![s],
            _ => {}
        }
    }
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
