use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::model::common::{IdValue, SortOrder};

/// Populate wildcard: select every declared relation.
pub const POPULATE_ALL: &str = "*";

/// Normalized request shape. Immutable once parsed: engine steps that need a
/// different view (e.g. re-fetching with full population after a write)
/// build a new descriptor instead of mutating this one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<WhereClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub populate: Option<Vec<String>>,
}

impl QueryDescriptor {
    /// Descriptor matching a single id.
    pub fn by_id(id: &IdValue) -> Self {
        Self {
            where_clause: Some(WhereClause::field("id", FieldCondition::Eq(id.to_value()))),
            ..Default::default()
        }
    }

    /// Descriptor matching a set of ids.
    pub fn by_ids(ids: &[IdValue]) -> Self {
        Self {
            where_clause: Some(WhereClause::field(
                "id",
                FieldCondition::In(ids.iter().map(|id| id.to_value()).collect()),
            )),
            ..Default::default()
        }
    }

    pub fn with_populate_all(mut self) -> Self {
        self.populate = Some(vec![POPULATE_ALL.to_string()]);
        self
    }

    pub fn with_populate(mut self, relations: Vec<String>) -> Self {
        self.populate = Some(relations);
        self
    }

    pub fn with_where(mut self, where_clause: WhereClause) -> Self {
        self.where_clause = Some(where_clause);
        self
    }
}

/// A filter tree: plain fields form one conjunctive clause, `or` branches
/// expand into sibling clauses during translation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhereClause {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub or: Vec<WhereClause>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, FieldCondition>,
}

impl WhereClause {
    pub fn field(name: &str, condition: FieldCondition) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(name.to_string(), condition);
        Self {
            or: Vec::new(),
            fields,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.or.is_empty() && self.fields.is_empty()
    }

    /// The id this clause pins, when it is a plain `id` equality/membership.
    pub fn pinned_id(&self) -> Option<IdValue> {
        match self.fields.get("id")? {
            FieldCondition::Eq(value) => crate::model::common::get_id(value),
            _ => None,
        }
    }
}

/// One field's condition, decided at parse time.
///
/// Untagged order matters: operator objects first, sequences as membership,
/// anything else as literal equality. An object mixing unrecognized keys
/// with operators falls through to `Eq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldCondition {
    Op(OperatorCond),
    In(Vec<Value>),
    Eq(Value),
}

/// The recognized operator keys of a filter object.
///
/// `between` keeps its raw payload; arity is checked during translation so a
/// malformed range surfaces as a translation error rather than silently
/// degrading to equality.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorCond {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(
        default,
        rename = "startsWith",
        skip_serializing_if = "Option::is_none"
    )]
    pub starts_with: Option<String>,
    #[serde(default, rename = "endsWith", skip_serializing_if = "Option::is_none")]
    pub ends_with: Option<String>,
    #[serde(default, rename = ">", skip_serializing_if = "Option::is_none")]
    pub gt: Option<Value>,
    #[serde(default, rename = ">=", skip_serializing_if = "Option::is_none")]
    pub gte: Option<Value>,
    #[serde(default, rename = "<", skip_serializing_if = "Option::is_none")]
    pub lt: Option<Value>,
    #[serde(default, rename = "<=", skip_serializing_if = "Option::is_none")]
    pub lte: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub between: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<FieldCondition>>,
}

/// Ordered sort directives. Deserialized from a JSON map while preserving
/// document order; a missing or unrecognized direction defaults to ASC.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec(pub Vec<(String, SortOrder)>);

impl Serialize for SortSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (field, order) in &self.0 {
            map.serialize_entry(field, order)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SortSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SortVisitor;

        impl<'de> Visitor<'de> for SortVisitor {
            type Value = SortSpec;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of field names to sort directions")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<SortSpec, A::Error> {
                let mut entries = Vec::new();
                while let Some((field, direction)) =
                    access.next_entry::<String, Option<String>>()?
                {
                    let order = direction
                        .as_deref()
                        .and_then(SortOrder::parse)
                        .unwrap_or(SortOrder::Asc);
                    entries.push((field, order));
                }
                Ok(SortSpec(entries))
            }
        }

        deserializer.deserialize_map(SortVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operator_objects_parse_as_conditions() {
        let clause: WhereClause =
            serde_json::from_value(json!({"firstName": {"contains": "Code"}})).unwrap();
        match &clause.fields["firstName"] {
            FieldCondition::Op(op) => assert_eq!(op.contains.as_deref(), Some("Code")),
            other => panic!("expected operator condition, got {:?}", other),
        }
    }

    #[test]
    fn non_operator_objects_fall_back_to_equality() {
        let clause: WhereClause =
            serde_json::from_value(json!({"requestor": {"id": 5}})).unwrap();
        match &clause.fields["requestor"] {
            FieldCondition::Eq(value) => assert_eq!(value, &json!({"id": 5})),
            other => panic!("expected equality, got {:?}", other),
        }
    }

    #[test]
    fn sequences_parse_as_membership() {
        let clause: WhereClause = serde_json::from_value(json!({"role": [1, 2, 3]})).unwrap();
        assert_eq!(
            clause.fields["role"],
            FieldCondition::In(vec![json!(1), json!(2), json!(3)])
        );
    }

    #[test]
    fn or_branches_are_split_from_plain_fields() {
        let clause: WhereClause = serde_json::from_value(json!({
            "active": true,
            "or": [
                {"firstName": {"contains": "Code"}},
                {"firstName": {"contains": "Ibnu"}}
            ]
        }))
        .unwrap();
        assert_eq!(clause.or.len(), 2);
        assert_eq!(clause.fields.len(), 1);
        assert_eq!(clause.fields["active"], FieldCondition::Eq(json!(true)));
    }

    #[test]
    fn sort_spec_keeps_document_order_and_defaults_to_asc() {
        let sort: SortSpec =
            serde_json::from_value(json!({"lastName": "DESC", "firstName": null})).unwrap();
        assert_eq!(
            sort.0,
            vec![
                ("lastName".to_string(), SortOrder::Desc),
                ("firstName".to_string(), SortOrder::Asc),
            ]
        );
    }

    #[test]
    fn descriptor_round_trips_through_json() {
        let descriptor: QueryDescriptor = serde_json::from_value(json!({
            "limit": 10,
            "skip": 2,
            "where": {"role": {">": 1}},
            "sort": {"id": "ASC"},
            "populate": ["passports"]
        }))
        .unwrap();
        assert_eq!(descriptor.limit, Some(10));
        assert_eq!(descriptor.skip, Some(2));
        let back = serde_json::to_value(&descriptor).unwrap();
        let again: QueryDescriptor = serde_json::from_value(back).unwrap();
        assert_eq!(descriptor, again);
    }

    #[test]
    fn pinned_id_reads_plain_id_equality() {
        let clause: WhereClause = serde_json::from_value(json!({"id": 7})).unwrap();
        assert_eq!(clause.pinned_id(), Some(IdValue::Int(7)));
        let ranged: WhereClause = serde_json::from_value(json!({"id": {">": 7}})).unwrap();
        assert_eq!(ranged.pinned_id(), None);
    }
}
