use anyhow::Result;
use futures_util::stream::BoxStream;

use crate::model::{EntityDef, IdValue, QueryPlan, Record};

/// A forward-only, non-restartable cursor over matching rows.
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Datastore boundary. Implementations receive fully translated plans —
/// predicates are already resolved and every identifier in a plan comes
/// from entity metadata, never raw request input.
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch rows per plan (filter, sort, pagination, populate).
    async fn select(&self, entity: &EntityDef, plan: &QueryPlan) -> Result<Vec<Record>>;

    /// Count rows matching the plan's filter; pagination is ignored.
    async fn count(&self, entity: &EntityDef, plan: &QueryPlan) -> Result<u64>;

    async fn sum(&self, entity: &EntityDef, plan: &QueryPlan, column: &str)
        -> Result<Option<f64>>;

    async fn avg(&self, entity: &EntityDef, plan: &QueryPlan, column: &str)
        -> Result<Option<f64>>;

    /// Persist rows, returning them with their assigned ids.
    async fn insert(&self, entity: &EntityDef, rows: Vec<Record>) -> Result<Vec<Record>>;

    /// Apply `changes` to the given id set, returning the affected count.
    async fn update(&self, entity: &EntityDef, ids: &[IdValue], changes: &Record) -> Result<u64>;

    /// Delete one row by id; false when it did not exist.
    async fn delete(&self, entity: &EntityDef, id: &IdValue) -> Result<bool>;

    /// Open a row cursor over the plan's filter and sort.
    async fn stream(&self, entity: &EntityDef, plan: &QueryPlan) -> Result<RecordStream>;
}
