use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use itertools::Itertools;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::query_builder::Separated;
use sqlx::{Column, Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{
    get_id, to_camel_case, to_snake_case, ColumnDef, ColumnType, EntityDef, EntityRegistry,
    IdValue, Predicate, PredicateGroup, QueryPlan, Record, RelationKind, SortOrder,
};
use crate::store::traits::{EntityStore, RecordStream};

/// PostgreSQL-backed store. Plans are rendered into parameterized SQL with
/// a runtime query builder: identifiers come exclusively from entity
/// metadata and every request-supplied value travels as a bind.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    registry: Arc<EntityRegistry>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL.
    pub async fn new(database_url: &str, registry: Arc<EntityRegistry>) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool, registry })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_rows(&self, entity: &EntityDef, plan: &QueryPlan) -> Result<Vec<Record>> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {} FROM \"{}\"",
            select_list(entity),
            entity.table
        ));
        push_where(&mut qb, entity, &plan.groups)?;
        push_order(&mut qb, &plan.sort);
        if plan.skip > 0 {
            qb.push(" OFFSET ");
            qb.push_bind(plan.skip as i64);
        }
        if let Some(limit) = plan.limit {
            qb.push(" LIMIT ");
            qb.push_bind(limit as i64);
        }
        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch rows")?;
        rows.iter().map(|row| row_to_record(entity, row)).collect()
    }

    /// Hydrate populated relations with one follow-up query per relation.
    async fn hydrate(
        &self,
        entity: &EntityDef,
        records: &mut [Record],
        populate: &[String],
    ) -> Result<()> {
        for name in populate {
            let Some(relation) = entity.relation(name) else {
                continue;
            };
            let Some(target) = self.registry.get(&relation.target) else {
                continue;
            };
            match relation.kind {
                RelationKind::OneToMany => {
                    let Some(inverse) = relation.inverse.as_deref() else {
                        continue;
                    };
                    let owner_ids: Vec<Value> = records
                        .iter()
                        .filter_map(|record| record.get("id"))
                        .cloned()
                        .collect();
                    if owner_ids.is_empty() {
                        continue;
                    }
                    let plan = QueryPlan {
                        groups: vec![vec![(inverse.to_string(), Predicate::In(owner_ids))]],
                        ..Default::default()
                    };
                    let members = self.fetch_rows(&target, &plan).await?;
                    for record in records.iter_mut() {
                        let owner_id = record.get("id").and_then(get_id);
                        let mine: Vec<Value> = members
                            .iter()
                            .filter(|member| {
                                owner_id.is_some()
                                    && member.get(inverse).and_then(get_id) == owner_id
                            })
                            .map(|member| Value::Object(member.clone()))
                            .collect();
                        record.insert(name.clone(), Value::Array(mine));
                    }
                }
                RelationKind::ManyToMany => {
                    let wanted: Vec<IdValue> = records
                        .iter()
                        .filter_map(|record| record.get(name))
                        .filter_map(Value::as_array)
                        .flatten()
                        .filter_map(get_id)
                        .unique()
                        .collect();
                    let members = if wanted.is_empty() {
                        Vec::new()
                    } else {
                        let plan = QueryPlan {
                            groups: vec![vec![(
                                "id".to_string(),
                                Predicate::In(wanted.iter().map(IdValue::to_value).collect()),
                            )]],
                            ..Default::default()
                        };
                        self.fetch_rows(&target, &plan).await?
                    };
                    let by_id: HashMap<IdValue, &Record> = members
                        .iter()
                        .filter_map(|member| {
                            member.get("id").and_then(get_id).map(|id| (id, member))
                        })
                        .collect();
                    for record in records.iter_mut() {
                        let ids: Vec<IdValue> = record
                            .get(name)
                            .and_then(Value::as_array)
                            .map(|items| items.iter().filter_map(get_id).collect())
                            .unwrap_or_default();
                        let mine: Vec<Value> = ids
                            .iter()
                            .filter_map(|id| by_id.get(id))
                            .map(|member| Value::Object((*member).clone()))
                            .collect();
                        record.insert(name.clone(), Value::Array(mine));
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl EntityStore for PostgresStore {
    async fn select(&self, entity: &EntityDef, plan: &QueryPlan) -> Result<Vec<Record>> {
        let mut records = self.fetch_rows(entity, plan).await?;
        if !plan.populate.is_empty() {
            self.hydrate(entity, &mut records, &plan.populate).await?;
        }
        Ok(records)
    }

    async fn count(&self, entity: &EntityDef, plan: &QueryPlan) -> Result<u64> {
        let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM \"{}\"", entity.table));
        push_where(&mut qb, entity, &plan.groups)?;
        let row = qb
            .build()
            .fetch_one(&self.pool)
            .await
            .context("Failed to count rows")?;
        let count: i64 = row.try_get(0)?;
        Ok(count as u64)
    }

    async fn sum(
        &self,
        entity: &EntityDef,
        plan: &QueryPlan,
        column: &str,
    ) -> Result<Option<f64>> {
        self.aggregate(entity, plan, column, "SUM").await
    }

    async fn avg(
        &self,
        entity: &EntityDef,
        plan: &QueryPlan,
        column: &str,
    ) -> Result<Option<f64>> {
        self.aggregate(entity, plan, column, "AVG").await
    }

    async fn insert(&self, entity: &EntityDef, rows: Vec<Record>) -> Result<Vec<Record>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let cols: Vec<&ColumnDef> = entity
            .columns
            .iter()
            .filter(|col| rows.iter().any(|row| row.contains_key(&col.name)))
            .collect();
        if cols.is_empty() {
            bail!("no insertable columns for entity {:?}", entity.name);
        }
        // Convert values up front so a bad payload fails before SQL is sent.
        let mut bind_rows: Vec<Vec<BindValue>> = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut binds = Vec::with_capacity(cols.len());
            for col in &cols {
                binds.push(match row.get(&col.name) {
                    Some(value) => to_bind(col, value)?,
                    None => BindValue::Default,
                });
            }
            bind_rows.push(binds);
        }
        let mut qb = QueryBuilder::new(format!("INSERT INTO \"{}\" (", entity.table));
        qb.push(
            cols.iter()
                .map(|col| format!("\"{}\"", to_snake_case(&col.name)))
                .join(", "),
        );
        qb.push(") ");
        qb.push_values(bind_rows, |mut b, binds| {
            for bind in binds {
                push_bind_separated(&mut b, bind);
            }
        });
        qb.push(format!(" RETURNING {}", select_list(entity)));
        let returned = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .context("Failed to insert rows")?;
        returned
            .iter()
            .map(|row| row_to_record(entity, row))
            .collect()
    }

    async fn update(&self, entity: &EntityDef, ids: &[IdValue], changes: &Record) -> Result<u64> {
        if ids.is_empty() || changes.is_empty() {
            return Ok(0);
        }
        let mut qb = QueryBuilder::new(format!("UPDATE \"{}\" SET ", entity.table));
        let mut first = true;
        for (field, value) in changes {
            let col = entity
                .column(field)
                .with_context(|| format!("unknown column {:?} on {:?}", field, entity.name))?;
            if !first {
                qb.push(", ");
            }
            first = false;
            qb.push(format!("\"{}\" = ", to_snake_case(field)));
            push_bind_value(&mut qb, to_bind(col, value)?);
        }
        qb.push(" WHERE \"id\" = ANY(");
        push_bind_value(&mut qb, ids_bind(ids)?);
        qb.push(")");
        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .context("Failed to update rows")?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, entity: &EntityDef, id: &IdValue) -> Result<bool> {
        let mut qb = QueryBuilder::new(format!(
            "DELETE FROM \"{}\" WHERE \"id\" = ",
            entity.table
        ));
        match id {
            IdValue::Int(n) => qb.push_bind(*n),
            IdValue::Uuid(u) => qb.push_bind(*u),
        };
        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .context("Failed to delete row")?;
        Ok(result.rows_affected() > 0)
    }

    /// Forward-only row cursor. The select uses table-prefixed aliases (the
    /// raw shape the driver emits for qualified selects) which are mapped
    /// back to entity field names as each row arrives.
    async fn stream(&self, entity: &EntityDef, plan: &QueryPlan) -> Result<RecordStream> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {} FROM \"{}\"",
            stream_select_list(entity),
            entity.table
        ));
        push_where(&mut qb, entity, &plan.groups)?;
        push_order(&mut qb, &plan.sort);
        let entity = entity.clone();
        let pool = self.pool.clone();
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Record>>(16);
        tokio::spawn(async move {
            let mut qb = qb;
            let mut rows = qb.build().fetch(&pool);
            while let Some(next) = rows.next().await {
                let item = next
                    .context("Failed to read stream row")
                    .and_then(|row| raw_row_to_record(&entity, &row));
                let stop = item.is_err();
                if tx.send(item).await.is_err() {
                    break;
                }
                if stop {
                    break;
                }
            }
        });
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        Ok(stream)
    }
}

impl PostgresStore {
    async fn aggregate(
        &self,
        entity: &EntityDef,
        plan: &QueryPlan,
        column: &str,
        function: &str,
    ) -> Result<Option<f64>> {
        let col = entity
            .column(column)
            .with_context(|| format!("unknown column {:?} on {:?}", column, entity.name))?;
        let mut qb = QueryBuilder::new(format!(
            "SELECT {}(\"{}\")::float8 FROM \"{}\"",
            function,
            to_snake_case(&col.name),
            entity.table
        ));
        push_where(&mut qb, entity, &plan.groups)?;
        let row = qb
            .build()
            .fetch_one(&self.pool)
            .await
            .context("Failed to aggregate rows")?;
        let value: Option<f64> = row.try_get(0)?;
        Ok(value)
    }
}

fn select_list(entity: &EntityDef) -> String {
    entity
        .columns
        .iter()
        .map(|col| {
            let column = to_snake_case(&col.name);
            if column == col.name {
                format!("\"{}\"", column)
            } else {
                format!("\"{}\" AS \"{}\"", column, col.name)
            }
        })
        .join(", ")
}

fn stream_select_list(entity: &EntityDef) -> String {
    entity
        .columns
        .iter()
        .map(|col| {
            let column = to_snake_case(&col.name);
            format!("\"{}\" AS \"{}_{}\"", column, entity.table, column)
        })
        .join(", ")
}

fn push_where(
    qb: &mut QueryBuilder<Postgres>,
    entity: &EntityDef,
    groups: &[PredicateGroup],
) -> Result<()> {
    if groups.is_empty() {
        return Ok(());
    }
    qb.push(" WHERE ");
    for (group_index, group) in groups.iter().enumerate() {
        if group_index > 0 {
            qb.push(" OR ");
        }
        qb.push("(");
        for (index, (field, predicate)) in group.iter().enumerate() {
            if index > 0 {
                qb.push(" AND ");
            }
            let col = entity
                .column(field)
                .with_context(|| format!("unknown column {:?} on {:?}", field, entity.name))?;
            push_predicate(qb, col, predicate)?;
        }
        qb.push(")");
    }
    Ok(())
}

fn push_predicate(
    qb: &mut QueryBuilder<Postgres>,
    col: &ColumnDef,
    predicate: &Predicate,
) -> Result<()> {
    let column_sql = format!("\"{}\"", to_snake_case(&col.name));
    match predicate {
        Predicate::Eq(Value::Null) => {
            qb.push(format!("{} IS NULL", column_sql));
        }
        Predicate::Eq(value) => {
            qb.push(format!("{} = ", column_sql));
            push_bind_value(qb, to_bind(col, value)?);
        }
        Predicate::In(values) => {
            if values.is_empty() {
                qb.push("FALSE");
            } else {
                qb.push(format!("{} = ANY(", column_sql));
                push_bind_value(qb, to_array_bind(col.column_type, values)?);
                qb.push(")");
            }
        }
        Predicate::ILike(pattern) => {
            qb.push(format!("{} ILIKE ", column_sql));
            qb.push_bind(pattern.clone());
        }
        Predicate::Gt(value) => {
            qb.push(format!("{} > ", column_sql));
            push_bind_value(qb, to_bind(col, value)?);
        }
        Predicate::Gte(value) => {
            qb.push(format!("{} >= ", column_sql));
            push_bind_value(qb, to_bind(col, value)?);
        }
        Predicate::Lt(value) => {
            qb.push(format!("{} < ", column_sql));
            push_bind_value(qb, to_bind(col, value)?);
        }
        Predicate::Lte(value) => {
            qb.push(format!("{} <= ", column_sql));
            push_bind_value(qb, to_bind(col, value)?);
        }
        Predicate::Between(lo, hi) => {
            qb.push(format!("{} BETWEEN ", column_sql));
            push_bind_value(qb, to_bind(col, lo)?);
            qb.push(" AND ");
            push_bind_value(qb, to_bind(col, hi)?);
        }
        Predicate::Or(alternatives) => {
            if alternatives.is_empty() {
                qb.push("FALSE");
                return Ok(());
            }
            qb.push("(");
            for (index, alternative) in alternatives.iter().enumerate() {
                if index > 0 {
                    qb.push(" OR ");
                }
                push_predicate(qb, col, alternative)?;
            }
            qb.push(")");
        }
    }
    Ok(())
}

fn push_order(qb: &mut QueryBuilder<Postgres>, sort: &[(String, SortOrder)]) {
    if sort.is_empty() {
        return;
    }
    qb.push(" ORDER BY ");
    let clause = sort
        .iter()
        .map(|(field, order)| {
            let direction = match order {
                SortOrder::Asc => "ASC",
                SortOrder::Desc => "DESC",
            };
            format!("\"{}\" {}", to_snake_case(field), direction)
        })
        .join(", ");
    qb.push(clause);
}

/// Owned, typed bind values. Conversion happens before any SQL is built so
/// payload type errors surface as persistence errors with context.
enum BindValue {
    Default,
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Uuid(uuid::Uuid),
    Timestamp(DateTime<Utc>),
    Json(Value),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    TextArray(Vec<String>),
    BoolArray(Vec<bool>),
    UuidArray(Vec<uuid::Uuid>),
    TimestampArray(Vec<DateTime<Utc>>),
}

fn to_bind(col: &ColumnDef, value: &Value) -> Result<BindValue> {
    if value.is_null() {
        return Ok(BindValue::Null);
    }
    if col.array {
        let Value::Array(items) = value else {
            bail!("column {:?} expects an array value", col.name);
        };
        return to_array_bind(col.column_type, items);
    }
    scalar_bind(col.column_type, value)
        .with_context(|| format!("bad value for column {:?}", col.name))
}

fn scalar_bind(column_type: ColumnType, value: &Value) -> Result<BindValue> {
    let bind = match column_type {
        ColumnType::Integer => BindValue::Int(as_i64(value)?),
        ColumnType::Float => BindValue::Float(as_f64(value)?),
        ColumnType::Text => BindValue::Text(as_text(value)),
        ColumnType::Boolean => match value.as_bool() {
            Some(b) => BindValue::Bool(b),
            None => bail!("expected a boolean, got {}", value),
        },
        ColumnType::Uuid => match value.as_str().and_then(|s| uuid::Uuid::parse_str(s).ok()) {
            Some(u) => BindValue::Uuid(u),
            None => bail!("expected a UUID, got {}", value),
        },
        ColumnType::Timestamp => match value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        {
            Some(t) => BindValue::Timestamp(t.with_timezone(&Utc)),
            None => bail!("expected an RFC 3339 timestamp, got {}", value),
        },
        ColumnType::Json => BindValue::Json(value.clone()),
    };
    Ok(bind)
}

fn to_array_bind(column_type: ColumnType, values: &[Value]) -> Result<BindValue> {
    let bind = match column_type {
        ColumnType::Integer => {
            BindValue::IntArray(values.iter().map(as_i64).collect::<Result<_>>()?)
        }
        ColumnType::Float => {
            BindValue::FloatArray(values.iter().map(as_f64).collect::<Result<_>>()?)
        }
        ColumnType::Text => BindValue::TextArray(values.iter().map(as_text).collect()),
        ColumnType::Boolean => BindValue::BoolArray(
            values
                .iter()
                .map(|v| v.as_bool().with_context(|| format!("expected a boolean, got {}", v)))
                .collect::<Result<_>>()?,
        ),
        ColumnType::Uuid => BindValue::UuidArray(
            values
                .iter()
                .map(|v| {
                    v.as_str()
                        .and_then(|s| uuid::Uuid::parse_str(s).ok())
                        .with_context(|| format!("expected a UUID, got {}", v))
                })
                .collect::<Result<_>>()?,
        ),
        ColumnType::Timestamp => BindValue::TimestampArray(
            values
                .iter()
                .map(|v| {
                    v.as_str()
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|t| t.with_timezone(&Utc))
                        .with_context(|| format!("expected an RFC 3339 timestamp, got {}", v))
                })
                .collect::<Result<_>>()?,
        ),
        ColumnType::Json => BindValue::Json(Value::Array(values.to_vec())),
    };
    Ok(bind)
}

fn as_i64(value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .with_context(|| format!("expected an integer, got {}", value)),
        Value::String(s) => s
            .parse::<i64>()
            .with_context(|| format!("expected an integer, got {:?}", s)),
        _ => bail!("expected an integer, got {}", value),
    }
}

fn as_f64(value: &Value) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("expected a number, got {}", value)),
        Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("expected a number, got {:?}", s)),
        _ => bail!("expected a number, got {}", value),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn ids_bind(ids: &[IdValue]) -> Result<BindValue> {
    if ids.iter().all(|id| matches!(id, IdValue::Int(_))) {
        return Ok(BindValue::IntArray(
            ids.iter()
                .map(|id| match id {
                    IdValue::Int(n) => *n,
                    IdValue::Uuid(_) => unreachable!(),
                })
                .collect(),
        ));
    }
    if ids.iter().all(|id| matches!(id, IdValue::Uuid(_))) {
        return Ok(BindValue::UuidArray(
            ids.iter()
                .map(|id| match id {
                    IdValue::Uuid(u) => *u,
                    IdValue::Int(_) => unreachable!(),
                })
                .collect(),
        ));
    }
    bail!("mixed id types in one update");
}

fn push_bind_value(qb: &mut QueryBuilder<Postgres>, value: BindValue) {
    match value {
        BindValue::Default => {
            qb.push("DEFAULT");
        }
        BindValue::Null => {
            qb.push("NULL");
        }
        BindValue::Int(v) => {
            qb.push_bind(v);
        }
        BindValue::Float(v) => {
            qb.push_bind(v);
        }
        BindValue::Text(v) => {
            qb.push_bind(v);
        }
        BindValue::Bool(v) => {
            qb.push_bind(v);
        }
        BindValue::Uuid(v) => {
            qb.push_bind(v);
        }
        BindValue::Timestamp(v) => {
            qb.push_bind(v);
        }
        BindValue::Json(v) => {
            qb.push_bind(v);
        }
        BindValue::IntArray(v) => {
            qb.push_bind(v);
        }
        BindValue::FloatArray(v) => {
            qb.push_bind(v);
        }
        BindValue::TextArray(v) => {
            qb.push_bind(v);
        }
        BindValue::BoolArray(v) => {
            qb.push_bind(v);
        }
        BindValue::UuidArray(v) => {
            qb.push_bind(v);
        }
        BindValue::TimestampArray(v) => {
            qb.push_bind(v);
        }
    }
}

fn push_bind_separated(sep: &mut Separated<'_, '_, Postgres, &'static str>, value: BindValue) {
    match value {
        BindValue::Default => {
            sep.push("DEFAULT");
        }
        BindValue::Null => {
            sep.push("NULL");
        }
        BindValue::Int(v) => {
            sep.push_bind(v);
        }
        BindValue::Float(v) => {
            sep.push_bind(v);
        }
        BindValue::Text(v) => {
            sep.push_bind(v);
        }
        BindValue::Bool(v) => {
            sep.push_bind(v);
        }
        BindValue::Uuid(v) => {
            sep.push_bind(v);
        }
        BindValue::Timestamp(v) => {
            sep.push_bind(v);
        }
        BindValue::Json(v) => {
            sep.push_bind(v);
        }
        BindValue::IntArray(v) => {
            sep.push_bind(v);
        }
        BindValue::FloatArray(v) => {
            sep.push_bind(v);
        }
        BindValue::TextArray(v) => {
            sep.push_bind(v);
        }
        BindValue::BoolArray(v) => {
            sep.push_bind(v);
        }
        BindValue::UuidArray(v) => {
            sep.push_bind(v);
        }
        BindValue::TimestampArray(v) => {
            sep.push_bind(v);
        }
    }
}

fn row_to_record(entity: &EntityDef, row: &PgRow) -> Result<Record> {
    let mut record = Record::new();
    for (index, col) in entity.columns.iter().enumerate() {
        record.insert(col.name.clone(), decode_column(row, index, col)?);
    }
    Ok(record)
}

/// Raw stream rows carry table-prefixed keys; convert them back to entity
/// field names as each row arrives.
fn raw_row_to_record(entity: &EntityDef, row: &PgRow) -> Result<Record> {
    let prefix = format!("{}_", entity.table);
    let mut record = Record::new();
    for (index, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let field = to_camel_case(name.strip_prefix(&prefix).unwrap_or(name));
        let Some(def) = entity.column(&field) else {
            continue;
        };
        record.insert(field, decode_column(row, index, def)?);
    }
    Ok(record)
}

fn decode_column(row: &PgRow, index: usize, col: &ColumnDef) -> Result<Value> {
    let value = if col.array {
        match col.column_type {
            // Integer width depends on the physical column; try wide first.
            ColumnType::Integer => match row.try_get::<Option<Vec<i64>>, _>(index) {
                Ok(v) => v.map(Value::from),
                Err(_) => row
                    .try_get::<Option<Vec<i32>>, _>(index)?
                    .map(|v| Value::from(v.into_iter().map(i64::from).collect::<Vec<_>>())),
            },
            ColumnType::Float => row.try_get::<Option<Vec<f64>>, _>(index)?.map(Value::from),
            ColumnType::Text => row
                .try_get::<Option<Vec<String>>, _>(index)?
                .map(Value::from),
            ColumnType::Boolean => row
                .try_get::<Option<Vec<bool>>, _>(index)?
                .map(Value::from),
            ColumnType::Uuid => row.try_get::<Option<Vec<uuid::Uuid>>, _>(index)?.map(|v| {
                Value::Array(v.into_iter().map(|u| Value::String(u.to_string())).collect())
            }),
            ColumnType::Timestamp => row
                .try_get::<Option<Vec<DateTime<Utc>>>, _>(index)?
                .map(|v| {
                    Value::Array(v.into_iter().map(|t| Value::String(t.to_rfc3339())).collect())
                }),
            ColumnType::Json => row.try_get::<Option<Value>, _>(index)?,
        }
    } else {
        match col.column_type {
            ColumnType::Integer => match row.try_get::<Option<i64>, _>(index) {
                Ok(v) => v.map(Value::from),
                Err(_) => row
                    .try_get::<Option<i32>, _>(index)?
                    .map(|n| Value::from(i64::from(n))),
            },
            ColumnType::Float => match row.try_get::<Option<f64>, _>(index) {
                Ok(v) => v.map(Value::from),
                Err(_) => row
                    .try_get::<Option<f32>, _>(index)?
                    .map(|n| Value::from(f64::from(n))),
            },
            ColumnType::Text => row.try_get::<Option<String>, _>(index)?.map(Value::from),
            ColumnType::Boolean => row.try_get::<Option<bool>, _>(index)?.map(Value::from),
            ColumnType::Uuid => row
                .try_get::<Option<uuid::Uuid>, _>(index)?
                .map(|u| Value::String(u.to_string())),
            ColumnType::Timestamp => row
                .try_get::<Option<DateTime<Utc>>, _>(index)?
                .map(|t| Value::String(t.to_rfc3339())),
            ColumnType::Json => row.try_get::<Option<Value>, _>(index)?,
        }
    };
    Ok(value.unwrap_or(Value::Null))
}
