use anyhow::anyhow;
use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{QueryError, QueryResult};
use crate::logic::translate::Translator;
use crate::model::{
    get_id, AttributeDescription, EntityDef, EntityRegistry, IdValue, QueryDescriptor, QueryPlan,
    Record, WhereClause,
};
use crate::store::traits::EntityStore;

/// Lines ready for a streaming response body.
pub type LineStream = BoxStream<'static, QueryResult<String>>;

/// Executes descriptors against the store through the translator. One engine
/// is built at startup per store and shared across requests; descriptors are
/// taken by reference and never mutated — follow-up fetches (e.g. the fully
/// populated re-read after a write) run on freshly built descriptors.
pub struct QueryEngine<S> {
    store: Arc<S>,
    registry: Arc<EntityRegistry>,
    default_limit: u64,
}

impl<S> Clone for QueryEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            default_limit: self.default_limit,
        }
    }
}

impl<S: EntityStore + 'static> QueryEngine<S> {
    pub fn new(store: Arc<S>, registry: Arc<EntityRegistry>, default_limit: u64) -> Self {
        Self {
            store,
            registry,
            default_limit,
        }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn entity(&self, name: &str) -> QueryResult<Arc<EntityDef>> {
        self.registry
            .get(name)
            .ok_or_else(|| QueryError::not_found(format!("entity {:?}", name)))
    }

    fn plan_for(&self, entity: &EntityDef, descriptor: &QueryDescriptor) -> QueryResult<QueryPlan> {
        Translator::new(entity).plan(descriptor, self.default_limit)
    }

    /// Fetch matching rows; the default limit applies when the descriptor
    /// leaves `limit` unset.
    pub async fn find(
        &self,
        entity_name: &str,
        descriptor: &QueryDescriptor,
    ) -> QueryResult<Vec<Record>> {
        let entity = self.entity(entity_name)?;
        let plan = self.plan_for(&entity, descriptor)?;
        let rows = self.store.select(&entity, &plan).await?;
        Ok(rows
            .into_iter()
            .map(|row| normalize_record(row, &entity))
            .collect())
    }

    pub async fn find_one(
        &self,
        entity_name: &str,
        id: &IdValue,
        populate: Option<Vec<String>>,
    ) -> QueryResult<Option<Record>> {
        let mut descriptor = QueryDescriptor::by_id(id);
        descriptor.limit = Some(1);
        if let Some(populate) = populate {
            descriptor.populate = Some(populate);
        }
        let rows = self.find(entity_name, &descriptor).await?;
        Ok(rows.into_iter().next())
    }

    async fn find_one_populated(
        &self,
        entity_name: &str,
        id: &IdValue,
    ) -> QueryResult<Option<Record>> {
        self.find_one(
            entity_name,
            id,
            Some(vec![crate::model::POPULATE_ALL.to_string()]),
        )
        .await
    }

    /// Persist one entity or a batch, then re-fetch with every relation
    /// populated so the response comes back hydrated.
    pub async fn create(&self, entity_name: &str, payload: Value) -> QueryResult<Value> {
        let entity = self.entity(entity_name)?;
        match payload {
            Value::Array(items) => {
                let rows = items
                    .iter()
                    .map(|item| prepare_insert(item, &entity))
                    .collect::<QueryResult<Vec<Record>>>()?;
                let created = self.store.insert(&entity, rows).await?;
                let ids: Vec<IdValue> = created.iter().filter_map(record_id).collect();
                let mut refetch = QueryDescriptor::by_ids(&ids).with_populate_all();
                refetch.limit = Some(ids.len() as u64);
                let rows = self.find(entity_name, &refetch).await?;
                Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
            }
            Value::Object(_) => {
                let row = prepare_insert(&payload, &entity)?;
                let created = self.store.insert(&entity, vec![row]).await?;
                let first = created
                    .into_iter()
                    .next()
                    .ok_or_else(|| QueryError::from(anyhow!("save returned no record")))?;
                let id = record_id(&first)
                    .ok_or_else(|| QueryError::from(anyhow!("created record has no id")))?;
                let record = self
                    .find_one_populated(entity_name, &id)
                    .await?
                    .ok_or_else(|| QueryError::from(anyhow!("created record vanished")))?;
                Ok(Value::Object(record))
            }
            _ => Err(QueryError::validation(
                "create payload must be an object or an array of objects",
            )),
        }
    }

    /// Diffed partial update: only top-level keys that differ from the
    /// current record reach the store; an empty diff is an error so callers
    /// can tell a no-op apart from a real write.
    pub async fn update_by_id(
        &self,
        entity_name: &str,
        id: &IdValue,
        partial: &Record,
    ) -> QueryResult<Option<Record>> {
        let entity = self.entity(entity_name)?;
        let current = self
            .find_one(entity_name, id, None)
            .await?
            .ok_or_else(|| QueryError::not_found(format!("{} {}", entity.name, id)))?;
        let mut changes = diff_changes(partial, &current, &entity);
        if changes.is_empty() {
            return Err(QueryError::NoChanges);
        }
        stamp_updated(&mut changes, &entity);
        self.store.update(&entity, &[id.clone()], &changes).await?;
        self.find_one_populated(entity_name, id).await
    }

    /// Resolve the matching id set first, then update exactly that set —
    /// records that start matching mid-operation are not picked up.
    pub async fn update_by_query(
        &self,
        entity_name: &str,
        descriptor: &QueryDescriptor,
        partial: &Record,
    ) -> QueryResult<Vec<Record>> {
        let entity = self.entity(entity_name)?;
        let matched = self.find(entity_name, descriptor).await?;
        let ids: Vec<IdValue> = matched.iter().filter_map(record_id).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut changes = retain_columns(&strip_associations(partial, &entity), &entity);
        if changes.is_empty() {
            return Err(QueryError::NoChanges);
        }
        stamp_updated(&mut changes, &entity);
        self.store.update(&entity, &ids, &changes).await?;
        let mut refetch = QueryDescriptor::by_ids(&ids).with_populate_all();
        refetch.limit = Some(ids.len() as u64);
        self.find(entity_name, &refetch).await
    }

    /// Read-then-delete; returns the fully populated pre-delete snapshot.
    pub async fn destroy_by_id(
        &self,
        entity_name: &str,
        id: &IdValue,
    ) -> QueryResult<Option<Record>> {
        let entity = self.entity(entity_name)?;
        let Some(snapshot) = self.find_one_populated(entity_name, id).await? else {
            return Ok(None);
        };
        self.store.delete(&entity, id).await?;
        Ok(Some(snapshot))
    }

    /// Deletes each matching row individually — there is no transaction, so
    /// a mid-loop failure leaves earlier deletions committed.
    pub async fn destroy_all(
        &self,
        entity_name: &str,
        descriptor: &QueryDescriptor,
    ) -> QueryResult<Vec<Record>> {
        let entity = self.entity(entity_name)?;
        let matched = self.find(entity_name, descriptor).await?;
        for id in matched.iter().filter_map(record_id) {
            self.store.delete(&entity, &id).await?;
        }
        Ok(matched)
    }

    pub async fn count(&self, entity_name: &str, descriptor: &QueryDescriptor) -> QueryResult<u64> {
        let entity = self.entity(entity_name)?;
        let plan = self.plan_for(&entity, descriptor)?.filter_only();
        Ok(self.store.count(&entity, &plan).await?)
    }

    pub async fn sum(
        &self,
        entity_name: &str,
        descriptor: &QueryDescriptor,
        attr: &str,
    ) -> QueryResult<Option<f64>> {
        let entity = self.entity(entity_name)?;
        if entity.column(attr).is_none() {
            return Err(QueryError::validation(format!("unknown attribute {:?}", attr)));
        }
        let plan = self.plan_for(&entity, descriptor)?.filter_only();
        Ok(self.store.sum(&entity, &plan, attr).await?)
    }

    pub async fn avg(
        &self,
        entity_name: &str,
        descriptor: &QueryDescriptor,
        attr: &str,
    ) -> QueryResult<Option<f64>> {
        let entity = self.entity(entity_name)?;
        if entity.column(attr).is_none() {
            return Err(QueryError::validation(format!("unknown attribute {:?}", attr)));
        }
        let plan = self.plan_for(&entity, descriptor)?.filter_only();
        Ok(self.store.avg(&entity, &plan, attr).await?)
    }

    /// Find-matching-or-create.
    pub async fn seek(
        &self,
        entity_name: &str,
        criteria: WhereClause,
        initial_values: Value,
    ) -> QueryResult<Value> {
        let mut descriptor = QueryDescriptor::default();
        descriptor.limit = Some(1);
        if !criteria.is_empty() {
            descriptor.where_clause = Some(criteria);
        }
        let found = self.find(entity_name, &descriptor).await?;
        if let Some(existing) = found.into_iter().next() {
            return Ok(Value::Object(existing));
        }
        self.create(entity_name, initial_values).await
    }

    /// Attribute metadata for the schema endpoint.
    pub fn describe(&self, entity_name: &str) -> QueryResult<HashMap<String, AttributeDescription>> {
        Ok(self.entity(entity_name)?.describe())
    }

    /// Row-level cursor over the current filter and sort, ignoring
    /// pagination: a lazy, finite sequence of newline-terminated JSON
    /// entities. The cursor is private to this call and not restartable.
    pub async fn stream(
        &self,
        entity_name: &str,
        descriptor: &QueryDescriptor,
    ) -> QueryResult<LineStream> {
        let entity = self.entity(entity_name)?;
        let plan = self.plan_for(&entity, descriptor)?.without_pagination();
        let rows = self.store.stream(&entity, &plan).await?;
        let stream = rows
            .map(move |row| -> QueryResult<String> {
                let record = normalize_record(row?, &entity);
                let mut line = serde_json::to_string(&record)
                    .map_err(|e| anyhow!("failed to serialize row: {}", e))?;
                line.push('\n');
                Ok(line)
            })
            .boxed();
        Ok(stream)
    }

    /// Fixed-size-batch streaming: the total count is computed once, then
    /// pages of `batch_size` are fetched with skip/limit until the total is
    /// reached (or a page comes back empty), each page emitted as one JSON
    /// array line.
    pub async fn stream_batch(
        &self,
        entity_name: &str,
        descriptor: &QueryDescriptor,
        batch_size: u64,
    ) -> QueryResult<LineStream> {
        if batch_size == 0 {
            return Err(QueryError::validation("batch size must be positive"));
        }
        let total = self.count(entity_name, descriptor).await?;
        let engine = self.clone();
        let entity_name = entity_name.to_string();
        let base = descriptor.clone();
        let stream = futures_util::stream::try_unfold(0u64, move |collected| {
            let engine = engine.clone();
            let entity_name = entity_name.clone();
            let base = base.clone();
            async move {
                if collected >= total {
                    return Ok(None);
                }
                let mut page = base;
                page.skip = Some(collected);
                page.limit = Some(batch_size);
                let rows = engine.find(&entity_name, &page).await?;
                if rows.is_empty() {
                    return Ok(None);
                }
                let fetched = rows.len() as u64;
                let mut line = serde_json::to_string(&rows)
                    .map_err(|e| QueryError::from(anyhow!("failed to serialize batch: {}", e)))?;
                line.push('\n');
                Ok(Some((line, collected + fetched)))
            }
        })
        .boxed();
        Ok(stream)
    }
}

/// The id carried by a record, when present.
pub fn record_id(record: &Record) -> Option<IdValue> {
    record.get("id").and_then(get_id)
}

/// Columns declared as arrays but physically stored as delimited strings
/// come back as JSON text; re-hydrate them best-effort — a bad column is
/// left untouched rather than failing the whole response.
pub fn normalize_record(mut record: Record, entity: &EntityDef) -> Record {
    for column in &entity.columns {
        if !column.array {
            continue;
        }
        let Some(Value::String(raw)) = record.get(&column.name) else {
            continue;
        };
        if let Ok(parsed @ Value::Array(_)) = serde_json::from_str::<Value>(raw) {
            record.insert(column.name.clone(), parsed);
        }
    }
    record
}

/// Relation-valued fields collapse to bare ids; empty collections and
/// missing fields are left alone.
pub fn strip_associations(record: &Record, entity: &EntityDef) -> Record {
    let mut out = record.clone();
    for relation in &entity.relations {
        let Some(value) = out.get_mut(&relation.name) else {
            continue;
        };
        match value {
            Value::Array(items) if !items.is_empty() => {
                let ids: Vec<Value> = items
                    .iter()
                    .filter_map(|item| get_id(item).map(|id| id.to_value()))
                    .collect();
                *value = Value::Array(ids);
            }
            Value::Object(_) => {
                if let Some(id) = get_id(value) {
                    *value = id.to_value();
                }
            }
            _ => {}
        }
    }
    out
}

/// Keep only declared columns (array-backed relation columns included).
fn retain_columns(record: &Record, entity: &EntityDef) -> Record {
    let mut out = record.clone();
    out.retain(|key, _| entity.column(key).is_some());
    out
}

fn prepare_insert(value: &Value, entity: &EntityDef) -> QueryResult<Record> {
    let Value::Object(record) = value else {
        return Err(QueryError::validation("entity payload must be an object"));
    };
    let mut row = retain_columns(&strip_associations(record, entity), entity);
    if entity.has_timestamps() {
        let now = Value::String(Utc::now().to_rfc3339());
        row.insert("createdAt".to_string(), now.clone());
        row.insert("updatedAt".to_string(), now);
    }
    Ok(row)
}

fn stamp_updated(changes: &mut Record, entity: &EntityDef) {
    if entity.has_timestamps() {
        changes.insert(
            "updatedAt".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
    }
}

/// Difference between the stripped incoming partial and the stripped current
/// record: only keys present on both sides and carrying a different value
/// survive, so unknown keys never reach the store.
fn diff_changes(partial: &Record, current: &Record, entity: &EntityDef) -> Record {
    let stripped = retain_columns(&strip_associations(partial, entity), entity);
    let comparator = strip_associations(current, entity);
    let mut result = Record::new();
    for (key, value) in &stripped {
        let Some(existing) = comparator.get(key) else {
            continue;
        };
        if !values_equal(existing, value) {
            result.insert(key.clone(), value.clone());
        }
    }
    result
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
