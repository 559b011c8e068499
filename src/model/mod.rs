pub mod common;
pub mod entity;
pub mod predicate;
pub mod query;

pub use common::{
    get_id, to_camel_case, to_snake_case, ColumnType, IdValue, Record, SortOrder,
};
pub use entity::{
    AttributeDescription, ColumnDef, EntityDef, EntityRegistry, RelationDef, RelationKind,
};
pub use predicate::{Predicate, PredicateGroup, QueryPlan};
pub use query::{
    FieldCondition, OperatorCond, QueryDescriptor, SortSpec, WhereClause, POPULATE_ALL,
};
