use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::model::{
    get_id, EntityDef, FieldCondition, OperatorCond, Predicate, PredicateGroup, QueryDescriptor,
    QueryPlan, WhereClause, POPULATE_ALL,
};

/// Turns a descriptor into store-facing directives for one entity: the
/// where tree becomes a disjunction of conjunctive predicate groups, sort
/// and populate are resolved against the entity's metadata.
pub struct Translator<'a> {
    entity: &'a EntityDef,
}

impl<'a> Translator<'a> {
    pub fn new(entity: &'a EntityDef) -> Self {
        Self { entity }
    }

    /// Full plan with pagination. `default_limit` caps unbounded finds.
    pub fn plan(&self, descriptor: &QueryDescriptor, default_limit: u64) -> QueryResult<QueryPlan> {
        let groups = match &descriptor.where_clause {
            Some(clause) => self.flatten_where(clause)?,
            None => Vec::new(),
        };
        Ok(QueryPlan {
            skip: descriptor.skip.unwrap_or(0),
            limit: Some(descriptor.limit.unwrap_or(default_limit)),
            sort: self.resolve_sort(descriptor),
            groups,
            populate: self.resolve_populate(descriptor.populate.as_deref()),
        })
    }

    /// Walk the where tree. Plain fields join the current AND-group; every
    /// `or` branch at any level expands into its own sibling group, so the
    /// result reads as OR of ANDs.
    pub fn flatten_where(&self, clause: &WhereClause) -> QueryResult<Vec<PredicateGroup>> {
        let mut groups = Vec::new();
        self.flatten_into(clause, &mut groups)?;
        Ok(groups)
    }

    fn flatten_into(
        &self,
        clause: &WhereClause,
        groups: &mut Vec<PredicateGroup>,
    ) -> QueryResult<()> {
        for branch in &clause.or {
            self.flatten_into(branch, groups)?;
        }
        let mut group = PredicateGroup::new();
        for (field, condition) in &clause.fields {
            if self.entity.column(field).is_none() {
                return Err(QueryError::translation(format!(
                    "unknown column {:?} on entity {:?}",
                    field, self.entity.name
                )));
            }
            for predicate in self.resolve_condition(condition)? {
                group.push((field.clone(), predicate));
            }
        }
        if !group.is_empty() {
            groups.push(group);
        }
        Ok(())
    }

    /// Resolve one field condition into predicates. An operator object may
    /// carry several operators; each becomes its own conjunct.
    pub fn resolve_condition(&self, condition: &FieldCondition) -> QueryResult<Vec<Predicate>> {
        match condition {
            FieldCondition::Eq(value) => Ok(vec![Predicate::Eq(collapse_to_id(value))]),
            FieldCondition::In(values) => {
                Ok(vec![Predicate::In(values.iter().map(collapse_to_id).collect())])
            }
            FieldCondition::Op(op) => self.resolve_operators(op),
        }
    }

    fn resolve_operators(&self, op: &OperatorCond) -> QueryResult<Vec<Predicate>> {
        let mut predicates = Vec::new();
        if let Some(value) = &op.contains {
            predicates.push(Predicate::ILike(format!("%{}%", value)));
        }
        if let Some(value) = &op.starts_with {
            predicates.push(Predicate::ILike(format!("{}%", value)));
        }
        if let Some(value) = &op.ends_with {
            predicates.push(Predicate::ILike(format!("%{}", value)));
        }
        if let Some(value) = &op.gt {
            predicates.push(Predicate::Gt(value.clone()));
        }
        if let Some(value) = &op.gte {
            predicates.push(Predicate::Gte(value.clone()));
        }
        if let Some(value) = &op.lt {
            predicates.push(Predicate::Lt(value.clone()));
        }
        if let Some(value) = &op.lte {
            predicates.push(Predicate::Lte(value.clone()));
        }
        if let Some(value) = &op.between {
            let (from, to) = resolve_between(value)?;
            predicates.push(Predicate::Between(from, to));
        }
        if let Some(branches) = &op.or {
            let mut alternatives = Vec::new();
            for branch in branches {
                alternatives.extend(self.resolve_condition(branch)?);
            }
            predicates.push(Predicate::Or(alternatives));
        }
        Ok(predicates)
    }

    /// Sort fields not matching a declared column are silently dropped,
    /// mirroring the forgiving populate contract.
    fn resolve_sort(&self, descriptor: &QueryDescriptor) -> Vec<(String, crate::model::SortOrder)> {
        descriptor
            .sort
            .as_ref()
            .map(|sort| {
                sort.0
                    .iter()
                    .filter(|(field, _)| self.entity.column(field).is_some())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The wildcard selects every declared relation; unknown names are
    /// dropped rather than rejected.
    pub fn resolve_populate(&self, populate: Option<&[String]>) -> Vec<String> {
        let Some(names) = populate else {
            return Vec::new();
        };
        if names.iter().any(|n| n == POPULATE_ALL) {
            return self.entity.relation_names();
        }
        names
            .iter()
            .filter(|n| self.entity.has_relation(n))
            .cloned()
            .collect()
    }
}

/// Relation-shaped equality values collapse to their id.
fn collapse_to_id(value: &Value) -> Value {
    if value.is_object() {
        if let Some(id) = get_id(value) {
            return id.to_value();
        }
    }
    value.clone()
}

/// `between` accepts a two-element sequence or a `{from, to}` object.
fn resolve_between(value: &Value) -> QueryResult<(Value, Value)> {
    match value {
        Value::Array(items) if items.len() == 2 => Ok((items[0].clone(), items[1].clone())),
        Value::Array(items) => Err(QueryError::translation(format!(
            "between expects exactly two values, got {}",
            items.len()
        ))),
        Value::Object(map) => {
            let from = map.get("from").cloned();
            let to = map.get("to").cloned();
            match (from, to) {
                (Some(from), Some(to)) => Ok((from, to)),
                _ => Err(QueryError::translation(
                    "between object requires both from and to",
                )),
            }
        }
        other => Err(QueryError::translation(format!(
            "between expects a range, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDef, ColumnType, RelationDef, SortOrder, SortSpec};
    use serde_json::json;

    fn users() -> EntityDef {
        EntityDef::new(
            "users",
            "users",
            vec![
                ColumnDef::new("id", ColumnType::Integer),
                ColumnDef::new("firstName", ColumnType::Text),
                ColumnDef::new("role", ColumnType::Integer),
                ColumnDef::array("badges", ColumnType::Integer),
            ],
            vec![
                RelationDef::one_to_many("passports", "passports", "user"),
                RelationDef::many_to_many("badges", "badges"),
            ],
        )
    }

    fn where_clause(value: serde_json::Value) -> WhereClause {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn plain_fields_form_one_conjunctive_group() {
        let entity = users();
        let translator = Translator::new(&entity);
        let groups = translator
            .flatten_where(&where_clause(json!({"firstName": "Code", "role": 3})))
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn or_branches_expand_into_sibling_groups() {
        let entity = users();
        let translator = Translator::new(&entity);
        let groups = translator
            .flatten_where(&where_clause(json!({
                "role": 3,
                "or": [
                    {"firstName": {"contains": "Code"}},
                    {"firstName": {"contains": "Ibnu"}}
                ]
            })))
            .unwrap();
        // Two branch groups plus the enclosing field group.
        assert_eq!(groups.len(), 3);
        assert_eq!(
            groups[0],
            vec![("firstName".to_string(), Predicate::ILike("%Code%".to_string()))]
        );
        assert_eq!(
            groups[2],
            vec![("role".to_string(), Predicate::Eq(json!(3)))]
        );
    }

    #[test]
    fn empty_where_means_no_filter() {
        let entity = users();
        let translator = Translator::new(&entity);
        let groups = translator.flatten_where(&WhereClause::default()).unwrap();
        assert!(groups.is_empty());
    }

    #[test]
    fn unknown_columns_are_a_translation_error() {
        let entity = users();
        let translator = Translator::new(&entity);
        let err = translator
            .flatten_where(&where_clause(json!({"nickName": "x"})))
            .unwrap_err();
        assert!(matches!(err, QueryError::Translation(_)));
    }

    #[test]
    fn pattern_operators_place_their_wildcards() {
        let entity = users();
        let translator = Translator::new(&entity);
        let preds = translator
            .resolve_condition(&serde_json::from_value(json!({"contains": "ode"})).unwrap())
            .unwrap();
        assert_eq!(preds, vec![Predicate::ILike("%ode%".to_string())]);
        let preds = translator
            .resolve_condition(&serde_json::from_value(json!({"startsWith": "Co"})).unwrap())
            .unwrap();
        assert_eq!(preds, vec![Predicate::ILike("Co%".to_string())]);
        let preds = translator
            .resolve_condition(&serde_json::from_value(json!({"endsWith": "de"})).unwrap())
            .unwrap();
        assert_eq!(preds, vec![Predicate::ILike("%de".to_string())]);
    }

    #[test]
    fn between_accepts_both_documented_shapes() {
        let entity = users();
        let translator = Translator::new(&entity);
        let pair = translator
            .resolve_condition(&serde_json::from_value(json!({"between": [1, 5]})).unwrap())
            .unwrap();
        let object = translator
            .resolve_condition(
                &serde_json::from_value(json!({"between": {"from": 1, "to": 5}})).unwrap(),
            )
            .unwrap();
        assert_eq!(pair, object);
        assert_eq!(pair, vec![Predicate::Between(json!(1), json!(5))]);
    }

    #[test]
    fn malformed_between_is_a_translation_error() {
        let entity = users();
        let translator = Translator::new(&entity);
        let err = translator
            .resolve_condition(&serde_json::from_value(json!({"between": [1, 2, 3]})).unwrap())
            .unwrap_err();
        assert!(matches!(err, QueryError::Translation(_)));
    }

    #[test]
    fn column_level_or_unions_resolved_operators() {
        let entity = users();
        let translator = Translator::new(&entity);
        let preds = translator
            .resolve_condition(
                &serde_json::from_value(json!({"or": [{"contains": "Code"}, {">": 10}]})).unwrap(),
            )
            .unwrap();
        assert_eq!(
            preds,
            vec![Predicate::Or(vec![
                Predicate::ILike("%Code%".to_string()),
                Predicate::Gt(json!(10)),
            ])]
        );
    }

    #[test]
    fn relation_shaped_equality_collapses_to_id() {
        let entity = users();
        let translator = Translator::new(&entity);
        let preds = translator
            .resolve_condition(&FieldCondition::Eq(json!({"id": 5, "name": "x"})))
            .unwrap();
        assert_eq!(preds, vec![Predicate::Eq(json!(5))]);
    }

    #[test]
    fn populate_wildcard_selects_all_relations() {
        let entity = users();
        let translator = Translator::new(&entity);
        assert_eq!(
            translator.resolve_populate(Some(&["*".to_string()])),
            vec!["passports", "badges"]
        );
    }

    #[test]
    fn unknown_populate_names_are_dropped() {
        let entity = users();
        let translator = Translator::new(&entity);
        assert_eq!(
            translator.resolve_populate(Some(&[
                "passports".to_string(),
                "ghosts".to_string()
            ])),
            vec!["passports"]
        );
        assert!(translator.resolve_populate(None).is_empty());
    }

    #[test]
    fn plan_applies_default_limit_and_drops_unknown_sort() {
        let entity = users();
        let translator = Translator::new(&entity);
        let descriptor = QueryDescriptor {
            sort: Some(SortSpec(vec![
                ("id".to_string(), SortOrder::Desc),
                ("ghost".to_string(), SortOrder::Asc),
            ])),
            ..Default::default()
        };
        let plan = translator.plan(&descriptor, 1000).unwrap();
        assert_eq!(plan.limit, Some(1000));
        assert_eq!(plan.skip, 0);
        assert_eq!(plan.sort, vec![("id".to_string(), SortOrder::Desc)]);
        assert!(plan.is_unfiltered());
    }
}
