use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::common::ColumnType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub array: bool,
}

impl ColumnDef {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            array: false,
        }
    }

    pub fn array(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            array: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationKind {
    OneToMany,
    ManyToMany,
}

/// A named edge to another entity type.
///
/// For `OneToMany`, `inverse` names the foreign-key column on the target
/// entity that points back at the owner. For `ManyToMany` the relation name
/// doubles as an array column on the owner holding the member ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    pub kind: RelationKind,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
}

impl RelationDef {
    pub fn one_to_many(name: &str, target: &str, inverse: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: RelationKind::OneToMany,
            target: target.to_string(),
            inverse: Some(inverse.to_string()),
        }
    }

    pub fn many_to_many(name: &str, target: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: RelationKind::ManyToMany,
            target: target.to_string(),
            inverse: None,
        }
    }
}

/// Attribute metadata served by the schema endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescription {
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub array: bool,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub relations: Vec<RelationDef>,
}

impl EntityDef {
    pub fn new(name: &str, table: &str, columns: Vec<ColumnDef>, relations: Vec<RelationDef>) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            columns,
            relations,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn has_relation(&self, name: &str) -> bool {
        self.relation(name).is_some()
    }

    pub fn relation_names(&self) -> Vec<String> {
        self.relations.iter().map(|r| r.name.clone()).collect()
    }

    /// The declared type of the `id` column. Every entity must declare one.
    pub fn id_type(&self) -> ColumnType {
        self.column("id")
            .map(|c| c.column_type)
            .unwrap_or(ColumnType::Integer)
    }

    pub fn has_timestamps(&self) -> bool {
        self.column("createdAt").is_some() && self.column("updatedAt").is_some()
    }

    /// Attribute map for the schema endpoint: every column plus every
    /// relation, with relations marked as `model` (single) or `collection`.
    pub fn describe(&self) -> HashMap<String, AttributeDescription> {
        let mut attrs = HashMap::new();
        for col in &self.columns {
            let mut desc = AttributeDescription {
                column_type: col.column_type,
                array: col.array,
                name: col.name.clone(),
                model: None,
                collection: None,
            };
            if let Some(rel) = self.relation(&col.name) {
                desc.collection = Some(rel.target.clone());
            }
            attrs.insert(col.name.clone(), desc);
        }
        for rel in &self.relations {
            attrs
                .entry(rel.name.clone())
                .or_insert_with(|| AttributeDescription {
                    column_type: ColumnType::Integer,
                    array: true,
                    name: rel.name.clone(),
                    model: None,
                    collection: None,
                })
                .collection = Some(rel.target.clone());
        }
        attrs
    }
}

/// Explicit lookup of entity metadata by name.
///
/// Built once at startup and shared by reference; never re-created
/// mid-process.
#[derive(Debug, Default, Clone)]
pub struct EntityRegistry {
    entities: HashMap<String, Arc<EntityDef>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity: EntityDef) {
        self.entities.insert(entity.name.clone(), Arc::new(entity));
    }

    pub fn get(&self, name: &str) -> Option<Arc<EntityDef>> {
        self.entities.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entity() -> EntityDef {
        EntityDef::new(
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
        )
    }

    #[test]
    fn lookup_helpers_cover_columns_and_relations() {
        let users = sample_entity();
        assert!(users.column("firstName").is_some());
        assert!(users.column("passports").is_none());
        assert!(users.has_relation("passports"));
        assert!(!users.has_relation("firstName"));
        assert_eq!(users.id_type(), ColumnType::Integer);
    }

    #[test]
    fn describe_includes_relations_as_collections() {
        let attrs = sample_entity().describe();
        assert_eq!(attrs["firstName"].collection, None);
        assert_eq!(attrs["passports"].collection.as_deref(), Some("passports"));
        // Array-backed relation keeps its column type but is marked as a collection.
        assert_eq!(attrs["badges"].collection.as_deref(), Some("badges"));
        assert!(attrs["badges"].array);
    }

    #[test]
    fn registry_resolves_registered_entities() {
        let mut registry = EntityRegistry::new();
        registry.register(sample_entity());
        assert!(registry.get("users").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["users".to_string()]);
    }
}
