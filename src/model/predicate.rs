use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::common::SortOrder;

/// A resolved operator applied to one column. Closed union: the stores match
/// exhaustively over this instead of inspecting raw filter keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Literal equality (relation values already collapsed to ids).
    Eq(Value),
    /// Membership in a value set.
    In(Vec<Value>),
    /// Case-insensitive pattern match; `%` wildcards already placed.
    ILike(String),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Between(Value, Value),
    /// Disjunction of predicates on the same column.
    Or(Vec<Predicate>),
}

/// One conjunctive clause: every `(column, predicate)` entry must hold.
pub type PredicateGroup = Vec<(String, Predicate)>;

/// Store-facing directives for one query.
///
/// `groups` is a disjunction of conjunctive clauses (OR of ANDs). An empty
/// `groups` means "no filter" — it matches everything, which is distinct
/// from a filter that matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub skip: u64,
    /// `None` only for streaming plans, which ignore pagination.
    pub limit: Option<u64>,
    pub sort: Vec<(String, SortOrder)>,
    pub groups: Vec<PredicateGroup>,
    /// Resolved relation names to hydrate on returned rows.
    pub populate: Vec<String>,
}

impl QueryPlan {
    pub fn is_unfiltered(&self) -> bool {
        self.groups.is_empty()
    }

    /// Same filter and sort, no pagination. Used by row streaming.
    pub fn without_pagination(mut self) -> Self {
        self.skip = 0;
        self.limit = None;
        self
    }

    /// Same filter, no pagination/sort/populate. Used by count and the
    /// aggregate operations.
    pub fn filter_only(&self) -> Self {
        Self {
            skip: 0,
            limit: None,
            sort: Vec::new(),
            groups: self.groups.clone(),
            populate: Vec::new(),
        }
    }
}
