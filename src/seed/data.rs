use serde_json::json;

use crate::error::QueryResult;
use crate::logic::QueryEngine;
use crate::model::{
    ColumnDef, ColumnType, EntityDef, EntityRegistry, QueryDescriptor, RelationDef,
};
use crate::store::traits::EntityStore;

/// Demo schema covering every metadata shape the engine understands: scalar
/// columns, a plain text-array column, a one-to-many relation with an
/// inverse foreign key, and an array-backed many-to-many relation.
pub fn demo_registry() -> EntityRegistry {
    let mut registry = EntityRegistry::new();
    registry.register(EntityDef::new(
        "users",
        "users",
        vec![
            ColumnDef::new("id", ColumnType::Integer),
            ColumnDef::new("firstName", ColumnType::Text),
            ColumnDef::new("lastName", ColumnType::Text),
            ColumnDef::new("email", ColumnType::Text),
            ColumnDef::new("role", ColumnType::Integer),
            ColumnDef::new("active", ColumnType::Boolean),
            ColumnDef::array("tags", ColumnType::Text),
            ColumnDef::array("badges", ColumnType::Integer),
            ColumnDef::new("createdAt", ColumnType::Timestamp),
            ColumnDef::new("updatedAt", ColumnType::Timestamp),
        ],
        vec![
            RelationDef::one_to_many("passports", "passports", "user"),
            RelationDef::many_to_many("badges", "badges"),
        ],
    ));
    registry.register(EntityDef::new(
        "passports",
        "passports",
        vec![
            ColumnDef::new("id", ColumnType::Integer),
            ColumnDef::new("user", ColumnType::Integer),
            ColumnDef::new("token", ColumnType::Text),
            ColumnDef::new("active", ColumnType::Boolean),
            ColumnDef::new("createdAt", ColumnType::Timestamp),
            ColumnDef::new("updatedAt", ColumnType::Timestamp),
        ],
        vec![],
    ));
    registry.register(EntityDef::new(
        "badges",
        "badges",
        vec![
            ColumnDef::new("id", ColumnType::Integer),
            ColumnDef::new("name", ColumnType::Text),
            ColumnDef::new("level", ColumnType::Integer),
        ],
        vec![],
    ));
    registry
}

/// Load a small demo data set, skipped when users already exist.
pub async fn load_demo_data<S: EntityStore + 'static>(engine: &QueryEngine<S>) -> QueryResult<()> {
    if engine.count("users", &QueryDescriptor::default()).await? > 0 {
        return Ok(());
    }
    engine
        .create(
            "badges",
            json!([
                {"name": "gold", "level": 3},
                {"name": "silver", "level": 2}
            ]),
        )
        .await?;
    engine
        .create(
            "users",
            json!([
                {
                    "firstName": "Code",
                    "lastName": "Weaver",
                    "email": "code@example.com",
                    "role": 3,
                    "active": true,
                    "tags": ["admin"],
                    "badges": [1]
                },
                {
                    "firstName": "Ibnu",
                    "lastName": "Hajar",
                    "email": "ibnu@example.com",
                    "role": 2,
                    "active": true,
                    "tags": [],
                    "badges": []
                }
            ]),
        )
        .await?;
    engine
        .create(
            "passports",
            json!([
                {"user": 1, "token": "seed-token-1", "active": true}
            ]),
        )
        .await?;
    Ok(())
}
