use anyhow::Result;
use futures_util::StreamExt;
use itertools::Itertools;
use parking_lot::RwLock;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::model::{
    get_id, ColumnType, EntityDef, IdValue, Predicate, QueryPlan, Record, RelationKind, SortOrder,
};
use crate::store::traits::{EntityStore, RecordStream};

/// In-memory store used by tests, demos, and the `memory` backend. Tables
/// are keyed by entity name; predicates are evaluated directly against the
/// stored records with the same loose numeric/string comparison the SQL
/// backend gets from the database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
}

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<IdValue, Record>,
    /// Last assigned integer id.
    next_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EntityStore for MemoryStore {
    async fn select(&self, entity: &EntityDef, plan: &QueryPlan) -> Result<Vec<Record>> {
        let tables = self.tables.read();
        let rows = collect_rows(&tables, entity, plan);
        let rows = rows
            .into_iter()
            .skip(plan.skip as usize)
            .take(plan.limit.map(|l| l as usize).unwrap_or(usize::MAX))
            .map(|row| hydrate(&tables, entity, row, &plan.populate))
            .collect();
        Ok(rows)
    }

    async fn count(&self, entity: &EntityDef, plan: &QueryPlan) -> Result<u64> {
        let tables = self.tables.read();
        Ok(tables
            .get(&entity.name)
            .map(|table| {
                table
                    .rows
                    .values()
                    .filter(|row| matches_groups(row, plan))
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn sum(
        &self,
        entity: &EntityDef,
        plan: &QueryPlan,
        column: &str,
    ) -> Result<Option<f64>> {
        let values = self.numeric_values(entity, plan, column);
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values.iter().sum()))
    }

    async fn avg(
        &self,
        entity: &EntityDef,
        plan: &QueryPlan,
        column: &str,
    ) -> Result<Option<f64>> {
        let values = self.numeric_values(entity, plan, column);
        if values.is_empty() {
            return Ok(None);
        }
        Ok(Some(values.iter().sum::<f64>() / values.len() as f64))
    }

    async fn insert(&self, entity: &EntityDef, rows: Vec<Record>) -> Result<Vec<Record>> {
        let mut tables = self.tables.write();
        let table = tables.entry(entity.name.clone()).or_default();
        let id_type = entity.id_type();
        let mut created = Vec::with_capacity(rows.len());
        for mut row in rows {
            let id = match row.get("id").and_then(get_id) {
                Some(id) => {
                    if let IdValue::Int(n) = &id {
                        table.next_id = table.next_id.max(*n);
                    }
                    id
                }
                None => match id_type {
                    ColumnType::Uuid => IdValue::Uuid(uuid::Uuid::new_v4()),
                    _ => {
                        table.next_id += 1;
                        IdValue::Int(table.next_id)
                    }
                },
            };
            row.insert("id".to_string(), id.to_value());
            table.rows.insert(id, row.clone());
            created.push(row);
        }
        Ok(created)
    }

    async fn update(&self, entity: &EntityDef, ids: &[IdValue], changes: &Record) -> Result<u64> {
        let mut tables = self.tables.write();
        let Some(table) = tables.get_mut(&entity.name) else {
            return Ok(0);
        };
        let mut affected = 0;
        for id in ids {
            if let Some(row) = table.rows.get_mut(id) {
                for (key, value) in changes {
                    row.insert(key.clone(), value.clone());
                }
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete(&self, entity: &EntityDef, id: &IdValue) -> Result<bool> {
        let mut tables = self.tables.write();
        Ok(tables
            .get_mut(&entity.name)
            .map(|table| table.rows.remove(id).is_some())
            .unwrap_or(false))
    }

    /// Cursor over a snapshot of the matching rows. Rows are raw: populate
    /// is not applied on the row-stream path.
    async fn stream(&self, entity: &EntityDef, plan: &QueryPlan) -> Result<RecordStream> {
        let rows = {
            let tables = self.tables.read();
            collect_rows(&tables, entity, plan)
        };
        let rows: Vec<Record> = rows
            .into_iter()
            .skip(plan.skip as usize)
            .take(plan.limit.map(|l| l as usize).unwrap_or(usize::MAX))
            .collect();
        Ok(futures_util::stream::iter(rows.into_iter().map(Ok)).boxed())
    }
}

impl MemoryStore {
    fn numeric_values(&self, entity: &EntityDef, plan: &QueryPlan, column: &str) -> Vec<f64> {
        let tables = self.tables.read();
        tables
            .get(&entity.name)
            .map(|table| {
                table
                    .rows
                    .values()
                    .filter(|row| matches_groups(row, plan))
                    .filter_map(|row| row.get(column))
                    .filter_map(numeric)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn collect_rows(
    tables: &HashMap<String, Table>,
    entity: &EntityDef,
    plan: &QueryPlan,
) -> Vec<Record> {
    tables
        .get(&entity.name)
        .map(|table| {
            table
                .rows
                .values()
                .filter(|row| matches_groups(row, plan))
                .cloned()
                .sorted_by(|a, b| compare_rows(a, b, &plan.sort))
                .collect()
        })
        .unwrap_or_default()
}

/// Empty groups means no filter; otherwise any group may match, and within
/// a group every predicate must hold.
fn matches_groups(row: &Record, plan: &QueryPlan) -> bool {
    plan.is_unfiltered()
        || plan.groups.iter().any(|group| {
            group
                .iter()
                .all(|(column, predicate)| matches_predicate(row.get(column), predicate))
        })
}

fn matches_predicate(value: Option<&Value>, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Eq(target) => match value {
            Some(v) => loose_eq(v, target),
            None => target.is_null(),
        },
        Predicate::In(list) => {
            value.map_or(false, |v| list.iter().any(|target| loose_eq(v, target)))
        }
        Predicate::ILike(pattern) => value
            .and_then(Value::as_str)
            .map_or(false, |s| ilike_match(pattern, s)),
        Predicate::Gt(target) => compare_to(value, target) == Some(Ordering::Greater),
        Predicate::Gte(target) => matches!(
            compare_to(value, target),
            Some(Ordering::Greater) | Some(Ordering::Equal)
        ),
        Predicate::Lt(target) => compare_to(value, target) == Some(Ordering::Less),
        Predicate::Lte(target) => matches!(
            compare_to(value, target),
            Some(Ordering::Less) | Some(Ordering::Equal)
        ),
        Predicate::Between(lo, hi) => {
            matches!(
                compare_to(value, lo),
                Some(Ordering::Greater) | Some(Ordering::Equal)
            ) && matches!(
                compare_to(value, hi),
                Some(Ordering::Less) | Some(Ordering::Equal)
            )
        }
        Predicate::Or(alternatives) => alternatives
            .iter()
            .any(|alternative| matches_predicate(value, alternative)),
    }
}

fn compare_to(value: Option<&Value>, target: &Value) -> Option<Ordering> {
    value.and_then(|v| compare_values(v, target))
}

/// Loose comparison: numbers compare numerically, numeric strings are
/// coerced, everything else falls back to its natural ordering.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (x.parse::<f64>(), y.parse::<f64>()) {
            (Ok(xf), Ok(yf)) => xf.partial_cmp(&yf),
            _ => Some(x.cmp(y)),
        },
        (Value::Number(x), Value::String(y)) => x.as_f64()?.partial_cmp(&y.parse::<f64>().ok()?),
        (Value::String(x), Value::Number(y)) => x.parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    a == b || compare_values(a, b) == Some(Ordering::Equal)
}

/// Case-insensitive match against a pattern whose only wildcards are a
/// single optional leading and trailing `%`.
fn ilike_match(pattern: &str, candidate: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let candidate = candidate.to_lowercase();
    let (leading, rest) = match pattern.strip_prefix('%') {
        Some(rest) => (true, rest),
        None => (false, pattern.as_str()),
    };
    let (trailing, core) = match rest.strip_suffix('%') {
        Some(core) => (true, core),
        None => (false, rest),
    };
    match (leading, trailing) {
        (true, true) => candidate.contains(core),
        (true, false) => candidate.ends_with(core),
        (false, true) => candidate.starts_with(core),
        (false, false) => candidate == core,
    }
}

fn compare_rows(a: &Record, b: &Record, sort: &[(String, SortOrder)]) -> Ordering {
    for (field, order) in sort {
        let ordering = cmp_for_sort(a.get(field), b.get(field));
        let ordering = match order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Total order for sorting: absent/null values first, incomparable pairs
/// keep their original relative order.
fn cmp_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Null), Some(Value::Null)) => Ordering::Equal,
        (Some(Value::Null), Some(_)) => Ordering::Less,
        (Some(_), Some(Value::Null)) => Ordering::Greater,
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Replace populated relation fields with the full member records: for
/// OneToMany, every target row whose inverse key points at the owner; for
/// ManyToMany, the rows named by the owner's id-array column.
fn hydrate(
    tables: &HashMap<String, Table>,
    entity: &EntityDef,
    mut row: Record,
    populate: &[String],
) -> Record {
    for name in populate {
        let Some(relation) = entity.relation(name) else {
            continue;
        };
        match relation.kind {
            RelationKind::OneToMany => {
                let Some(inverse) = relation.inverse.as_deref() else {
                    continue;
                };
                let Some(owner_id) = row.get("id").and_then(get_id) else {
                    continue;
                };
                let members: Vec<Value> = tables
                    .get(&relation.target)
                    .map(|table| {
                        table
                            .rows
                            .values()
                            .filter(|member| {
                                member.get(inverse).and_then(get_id).as_ref() == Some(&owner_id)
                            })
                            .map(|member| Value::Object(member.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                row.insert(name.clone(), Value::Array(members));
            }
            RelationKind::ManyToMany => {
                let ids: Vec<IdValue> = row
                    .get(name)
                    .and_then(Value::as_array)
                    .map(|items| items.iter().filter_map(get_id).unique().collect())
                    .unwrap_or_default();
                let members: Vec<Value> = ids
                    .iter()
                    .filter_map(|id| {
                        tables
                            .get(&relation.target)
                            .and_then(|table| table.rows.get(id))
                            .map(|member| Value::Object(member.clone()))
                    })
                    .collect();
                row.insert(name.clone(), Value::Array(members));
            }
        }
    }
    row
}
