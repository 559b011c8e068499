use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// An untyped entity row, keyed by field name.
pub type Record = serde_json::Map<String, Value>;

/// Entity identity: integer or UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Int(i64),
    Uuid(Uuid),
}

impl IdValue {
    /// Parse an id from a path segment: digits first, UUID second.
    pub fn parse(raw: &str) -> Option<IdValue> {
        if let Ok(n) = raw.parse::<i64>() {
            return Some(IdValue::Int(n));
        }
        Uuid::parse_str(raw).ok().map(IdValue::Uuid)
    }

    pub fn to_value(&self) -> Value {
        match self {
            IdValue::Int(n) => Value::from(*n),
            IdValue::Uuid(u) => Value::String(u.to_string()),
        }
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdValue::Int(n) => write!(f, "{}", n),
            IdValue::Uuid(u) => write!(f, "{}", u),
        }
    }
}

/// Collapse a value to its identity: a bare id, a stringified id, or a full
/// record carrying an `id` field all resolve to the same `IdValue`.
pub fn get_id(value: &Value) -> Option<IdValue> {
    match value {
        Value::Number(n) => n.as_i64().map(IdValue::Int),
        Value::String(s) => IdValue::parse(s),
        Value::Object(map) => map.get("id").and_then(get_id),
        _ => None,
    }
}

/// Scalar column types understood by the stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
    Boolean,
    Timestamp,
    Uuid,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(raw: &str) -> Option<SortOrder> {
        if raw.eq_ignore_ascii_case("ASC") {
            Some(SortOrder::Asc)
        } else if raw.eq_ignore_ascii_case("DESC") {
            Some(SortOrder::Desc)
        } else {
            None
        }
    }
}

/// camelCase field name -> snake_case column name.
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for ch in name.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// snake_case column name -> camelCase field name.
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_parses_integers_before_uuids() {
        assert_eq!(IdValue::parse("42"), Some(IdValue::Int(42)));
        let uuid = "a1a2a3a4-b1b2-c1c2-d1d2-d3d4d5d6d7d8";
        assert_eq!(
            IdValue::parse(uuid),
            Some(IdValue::Uuid(Uuid::parse_str(uuid).unwrap()))
        );
        assert_eq!(IdValue::parse("not-an-id"), None);
    }

    #[test]
    fn get_id_collapses_records_to_their_identity() {
        assert_eq!(get_id(&json!(7)), Some(IdValue::Int(7)));
        assert_eq!(get_id(&json!("7")), Some(IdValue::Int(7)));
        assert_eq!(get_id(&json!({"id": 7, "name": "x"})), Some(IdValue::Int(7)));
        assert_eq!(get_id(&json!({"name": "x"})), None);
        assert_eq!(get_id(&json!(true)), None);
    }

    #[test]
    fn case_conversion_round_trips_field_names() {
        assert_eq!(to_snake_case("firstName"), "first_name");
        assert_eq!(to_camel_case("first_name"), "firstName");
        assert_eq!(to_snake_case("id"), "id");
        assert_eq!(to_camel_case("id"), "id");
    }
}
