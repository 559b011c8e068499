use serde_json::Value;

use crate::error::{QueryError, QueryResult};
use crate::logic::execute::{record_id, QueryEngine};
use crate::model::{get_id, IdValue, Record, RelationDef, RelationKind};
use crate::store::traits::EntityStore;

/// Relation collection mutation: add/remove one member id to/from a named
/// relation on an owning entity.
///
/// Both operations are idempotent from the caller's perspective: adding a
/// member that is already present and removing one that is absent are no-ops
/// signalled by `None`, never errors. Membership is read before mutation;
/// concurrent writers race last-write-wins.
impl<S: EntityStore + 'static> QueryEngine<S> {
    pub async fn add_to_collection(
        &self,
        entity_name: &str,
        owner_id: &IdValue,
        relation_name: &str,
        member_id: &IdValue,
    ) -> QueryResult<Option<Record>> {
        let entity = self.entity(entity_name)?;
        let relation = entity
            .relation(relation_name)
            .ok_or_else(|| QueryError::not_found(format!("relation {:?}", relation_name)))?
            .clone();
        let member_ids = self
            .collection_member_ids(entity_name, owner_id, &relation)
            .await?;
        if member_ids.contains(member_id) {
            return Ok(None);
        }
        match relation.kind {
            RelationKind::OneToMany => {
                self.point_inverse_at(&relation, member_id, Some(owner_id))
                    .await
            }
            RelationKind::ManyToMany => {
                let mut ids = member_ids;
                ids.push(member_id.clone());
                self.write_member_array(&entity.name, owner_id, &relation, ids)
                    .await?;
                self.find_one(&relation.target, member_id, None).await
            }
        }
    }

    pub async fn remove_from_collection(
        &self,
        entity_name: &str,
        owner_id: &IdValue,
        relation_name: &str,
        member_id: &IdValue,
    ) -> QueryResult<Option<Record>> {
        let entity = self.entity(entity_name)?;
        let relation = entity
            .relation(relation_name)
            .ok_or_else(|| QueryError::not_found(format!("relation {:?}", relation_name)))?
            .clone();
        let member_ids = self
            .collection_member_ids(entity_name, owner_id, &relation)
            .await?;
        if !member_ids.contains(member_id) {
            return Ok(None);
        }
        match relation.kind {
            RelationKind::OneToMany => {
                // Detach: clear the inverse foreign key.
                self.point_inverse_at(&relation, member_id, None).await
            }
            RelationKind::ManyToMany => {
                let ids: Vec<IdValue> = member_ids
                    .into_iter()
                    .filter(|id| id != member_id)
                    .collect();
                self.write_member_array(&entity.name, owner_id, &relation, ids)
                    .await?;
                self.find_one(&relation.target, member_id, None).await
            }
        }
    }

    /// Current member ids, read by re-fetching the owner with the relation
    /// populated.
    async fn collection_member_ids(
        &self,
        entity_name: &str,
        owner_id: &IdValue,
        relation: &RelationDef,
    ) -> QueryResult<Vec<IdValue>> {
        let owner = self
            .find_one(entity_name, owner_id, Some(vec![relation.name.clone()]))
            .await?
            .ok_or_else(|| QueryError::not_found(format!("{} {}", entity_name, owner_id)))?;
        let ids = owner
            .get(&relation.name)
            .and_then(Value::as_array)
            .map(|members| members.iter().filter_map(get_id).collect())
            .unwrap_or_default();
        Ok(ids)
    }

    /// OneToMany membership is a foreign key on the member record: point it
    /// at the owner (or at nothing) and return the member.
    async fn point_inverse_at(
        &self,
        relation: &RelationDef,
        member_id: &IdValue,
        owner_id: Option<&IdValue>,
    ) -> QueryResult<Option<Record>> {
        let inverse = relation
            .inverse
            .as_ref()
            .ok_or_else(|| QueryError::not_found(format!("inverse of relation {:?}", relation.name)))?;
        let target = self.entity(&relation.target)?;
        let mut changes = Record::new();
        changes.insert(
            inverse.clone(),
            owner_id.map(|id| id.to_value()).unwrap_or(Value::Null),
        );
        let affected = self
            .store()
            .update(&target, &[member_id.clone()], &changes)
            .await?;
        if affected == 0 {
            return Err(QueryError::not_found(format!(
                "{} {}",
                relation.target, member_id
            )));
        }
        self.find_one(&relation.target, member_id, None).await
    }

    /// ManyToMany membership lives in an array column on the owner.
    async fn write_member_array(
        &self,
        entity_name: &str,
        owner_id: &IdValue,
        relation: &RelationDef,
        ids: Vec<IdValue>,
    ) -> QueryResult<()> {
        let entity = self.entity(entity_name)?;
        let mut changes = Record::new();
        changes.insert(
            relation.name.clone(),
            Value::Array(ids.iter().map(IdValue::to_value).collect()),
        );
        self.store()
            .update(&entity, &[owner_id.clone()], &changes)
            .await?;
        Ok(())
    }
}

// Integration-style tests for the mutation paths live with the memory store
// and in tests/rest_api_integration.rs, which exercise both relation kinds
// end to end.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnDef, ColumnType, EntityDef, EntityRegistry};
    use crate::store::memory::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn engine() -> QueryEngine<MemoryStore> {
        let mut registry = EntityRegistry::new();
        registry.register(EntityDef::new(
            "users",
            "users",
            vec![
                ColumnDef::new("id", ColumnType::Integer),
                ColumnDef::new("firstName", ColumnType::Text),
                ColumnDef::array("badges", ColumnType::Integer),
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
            ],
            vec![],
        ));
        registry.register(EntityDef::new(
            "badges",
            "badges",
            vec![
                ColumnDef::new("id", ColumnType::Integer),
                ColumnDef::new("name", ColumnType::Text),
            ],
            vec![],
        ));
        QueryEngine::new(Arc::new(MemoryStore::new()), Arc::new(registry), 1000)
    }

    #[tokio::test]
    async fn one_to_many_add_points_the_inverse_key_at_the_owner() {
        let engine = engine();
        engine
            .create("users", json!({"firstName": "Code"}))
            .await
            .unwrap();
        engine
            .create("passports", json!({"token": "abc"}))
            .await
            .unwrap();

        let member = engine
            .add_to_collection("users", &IdValue::Int(1), "passports", &IdValue::Int(1))
            .await
            .unwrap()
            .expect("member should be attached");
        assert_eq!(member["user"], json!(1));

        let owner = engine
            .find_one("users", &IdValue::Int(1), Some(vec!["passports".to_string()]))
            .await
            .unwrap()
            .unwrap();
        let members = owner["passports"].as_array().unwrap();
        assert_eq!(members.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_add_and_absent_remove_are_noops() {
        let engine = engine();
        engine
            .create("users", json!({"firstName": "Code"}))
            .await
            .unwrap();
        engine
            .create("passports", json!({"token": "abc"}))
            .await
            .unwrap();

        let first = engine
            .add_to_collection("users", &IdValue::Int(1), "passports", &IdValue::Int(1))
            .await
            .unwrap();
        assert!(first.is_some());
        let second = engine
            .add_to_collection("users", &IdValue::Int(1), "passports", &IdValue::Int(1))
            .await
            .unwrap();
        assert!(second.is_none());

        let removed = engine
            .remove_from_collection("users", &IdValue::Int(1), "passports", &IdValue::Int(1))
            .await
            .unwrap();
        assert!(removed.is_some());
        let again = engine
            .remove_from_collection("users", &IdValue::Int(1), "passports", &IdValue::Int(1))
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn array_backed_collections_rewrite_the_owner_column() {
        let engine = engine();
        engine
            .create("users", json!({"firstName": "Code", "badges": []}))
            .await
            .unwrap();
        engine.create("badges", json!({"name": "gold"})).await.unwrap();
        engine.create("badges", json!({"name": "silver"})).await.unwrap();

        engine
            .add_to_collection("users", &IdValue::Int(1), "badges", &IdValue::Int(1))
            .await
            .unwrap();
        engine
            .add_to_collection("users", &IdValue::Int(1), "badges", &IdValue::Int(2))
            .await
            .unwrap();

        let owner = engine
            .find_one("users", &IdValue::Int(1), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner["badges"], json!([1, 2]));

        engine
            .remove_from_collection("users", &IdValue::Int(1), "badges", &IdValue::Int(1))
            .await
            .unwrap();
        let owner = engine
            .find_one("users", &IdValue::Int(1), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner["badges"], json!([2]));
    }

    #[tokio::test]
    async fn unknown_relation_is_not_found() {
        let engine = engine();
        engine
            .create("users", json!({"firstName": "Code"}))
            .await
            .unwrap();
        let err = engine
            .add_to_collection("users", &IdValue::Int(1), "ghosts", &IdValue::Int(1))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::NotFound(_)));
    }
}
