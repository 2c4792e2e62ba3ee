//! Schema registry: entity lookup, relation validation and write ordering

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use super::dependency::DependencyGraph;
use super::models::{AttrType, EntityDef, RelationDef, RelationJoin};
use crate::error::{GraphError, GraphResult};
use crate::relation::{RelationNode, RelationTree};

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

/// A join table shared by one or more many-to-many relations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTableDef {
    pub table: String,
    /// (column, referenced entity)
    pub columns: [(String, String); 2],
}

/// Immutable description of every entity the engine can touch
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    entities: BTreeMap<String, EntityDef>,
    insert_rank: HashMap<String, usize>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Load a registry from a TOML schema document
    pub fn from_toml_str(source: &str) -> GraphResult<Self> {
        let file: SchemaFile = toml::from_str(source)
            .map_err(|e| GraphError::validation(format!("invalid schema document: {}", e)))?;

        let mut builder = Self::builder();
        for spec in file.entities {
            let mut entity = EntityDef::new(spec.name, spec.table);
            if let Some(primary_key) = spec.primary_key {
                entity = entity.primary_key(primary_key);
            }
            for (name, attr_type) in spec.attributes {
                entity = entity.attribute(name, attr_type);
            }
            for relation in spec.relations {
                entity = entity.relation(relation.name, relation.target, relation.join);
            }
            builder = builder.entity(entity);
        }

        builder.build()
    }

    /// Load a registry from a TOML schema file
    pub fn from_file(path: &Path) -> GraphResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            GraphError::validation(format!("cannot read schema {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn entity(&self, name: &str) -> GraphResult<&EntityDef> {
        self.entities
            .get(name)
            .ok_or_else(|| GraphError::validation(format!("unknown entity '{}'", name)))
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityDef> {
        self.entities.values()
    }

    pub fn relations_of(&self, entity: &str) -> GraphResult<&BTreeMap<String, RelationDef>> {
        Ok(&self.entity(entity)?.relations)
    }

    pub fn relation(&self, entity: &str, name: &str) -> GraphResult<&RelationDef> {
        self.relations_of(entity)?.get(name).ok_or_else(|| {
            GraphError::validation(format!("unknown relation '{}' on entity '{}'", name, entity))
        })
    }

    /// Check every relation in `tree` against the entity reached by its path
    pub fn validate(&self, tree: &RelationTree, root: &str) -> GraphResult<RelationTree> {
        self.entity(root)?;
        for node in &tree.children {
            self.validate_node(node, root, root)?;
        }
        Ok(tree.clone())
    }

    fn validate_node(&self, node: &RelationNode, entity: &str, path: &str) -> GraphResult<()> {
        let relation = self.relations_of(entity)?.get(&node.name).ok_or_else(|| {
            GraphError::validation(format!(
                "unknown relation '{}' on entity '{}' (at {})",
                node.name, entity, path
            ))
        })?;

        let path = format!("{}.{}", path, node.name);
        for child in &node.children {
            self.validate_node(child, &relation.target, &path)?;
        }
        Ok(())
    }

    /// Position of an entity in insert order (dependencies first)
    pub fn insert_rank(&self, entity: &str) -> usize {
        self.insert_rank.get(entity).copied().unwrap_or(usize::MAX)
    }

    /// Distinct join tables, keyed by table name
    pub fn join_tables(&self) -> Vec<JoinTableDef> {
        let mut tables: BTreeMap<&str, JoinTableDef> = BTreeMap::new();
        for relation in self.entities.values().flat_map(|e| e.relations.values()) {
            if let RelationJoin::ManyToMany {
                join_table,
                owner_column,
                related_column,
            } = &relation.join
            {
                tables.entry(join_table.as_str()).or_insert_with(|| JoinTableDef {
                    table: join_table.clone(),
                    columns: [
                        (owner_column.clone(), relation.source.clone()),
                        (related_column.clone(), relation.target.clone()),
                    ],
                });
            }
        }
        tables.into_values().collect()
    }
}

/// Collects entity definitions and checks them as a whole
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityDef>,
}

impl SchemaBuilder {
    pub fn entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn build(self) -> GraphResult<SchemaRegistry> {
        let mut entities = BTreeMap::new();
        for entity in self.entities {
            if entities.contains_key(&entity.name) {
                return Err(GraphError::validation(format!(
                    "entity '{}' declared twice",
                    entity.name
                )));
            }
            entities.insert(entity.name.clone(), entity);
        }

        for entity in entities.values() {
            check_entity(entity, &entities)?;
        }

        let order = DependencyGraph::build(entities.values()).insert_order();
        let insert_rank = order
            .into_iter()
            .enumerate()
            .map(|(rank, name)| (name, rank))
            .collect();

        Ok(SchemaRegistry {
            entities,
            insert_rank,
        })
    }
}

fn check_identifier(kind: &str, name: &str) -> GraphResult<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(GraphError::validation(format!("invalid {} name '{}'", kind, name)))
    }
}

fn check_foreign_key(entity: &EntityDef, column: &str, relation: &str) -> GraphResult<()> {
    match entity.attributes.get(column) {
        Some(AttrType::Integer) => Ok(()),
        Some(other) => Err(GraphError::validation(format!(
            "foreign key '{}.{}' of relation '{}' must be integer, found {:?}",
            entity.name, column, relation, other
        ))),
        None => Err(GraphError::validation(format!(
            "foreign key '{}' of relation '{}' is not an attribute of '{}'",
            column, relation, entity.name
        ))),
    }
}

fn check_entity(entity: &EntityDef, all: &BTreeMap<String, EntityDef>) -> GraphResult<()> {
    check_identifier("entity", &entity.name)?;
    check_identifier("table", &entity.table)?;
    check_identifier("column", &entity.primary_key)?;

    if entity.attributes.contains_key(&entity.primary_key) {
        return Err(GraphError::validation(format!(
            "primary key '{}' of '{}' must not be declared as an attribute",
            entity.primary_key, entity.name
        )));
    }

    for name in entity.attributes.keys() {
        check_identifier("column", name)?;
    }

    for relation in entity.relations.values() {
        check_identifier("relation", &relation.name)?;

        if entity.column_type(&relation.name).is_some() {
            return Err(GraphError::validation(format!(
                "relation '{}' on '{}' clashes with an attribute",
                relation.name, entity.name
            )));
        }

        let target = all.get(&relation.target).ok_or_else(|| {
            GraphError::validation(format!(
                "relation '{}.{}' targets unknown entity '{}'",
                entity.name, relation.name, relation.target
            ))
        })?;

        match &relation.join {
            RelationJoin::BelongsToOne { foreign_key } => {
                check_foreign_key(entity, foreign_key, &relation.name)?
            }
            RelationJoin::HasOne { foreign_key } | RelationJoin::HasMany { foreign_key } => {
                check_foreign_key(target, foreign_key, &relation.name)?
            }
            RelationJoin::ManyToMany {
                join_table,
                owner_column,
                related_column,
            } => {
                check_identifier("table", join_table)?;
                check_identifier("column", owner_column)?;
                check_identifier("column", related_column)?;
                if owner_column == related_column {
                    return Err(GraphError::validation(format!(
                        "join table '{}' uses '{}' for both sides",
                        join_table, owner_column
                    )));
                }
                if all.values().any(|e| &e.table == join_table) {
                    return Err(GraphError::validation(format!(
                        "join table '{}' is also an entity table",
                        join_table
                    )));
                }
            }
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default, rename = "entity")]
    entities: Vec<EntitySpec>,
}

#[derive(Debug, Deserialize)]
struct EntitySpec {
    name: String,
    table: String,
    #[serde(default)]
    primary_key: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, AttrType>,
    #[serde(default, rename = "relation")]
    relations: Vec<RelationSpec>,
}

#[derive(Debug, Deserialize)]
struct RelationSpec {
    name: String,
    target: String,
    #[serde(flatten)]
    join: RelationJoin,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::parse;
    use crate::testing::demo_registry;

    #[test]
    fn test_demo_schema_loads() {
        let registry = demo_registry();
        let person = registry.entity("person").unwrap();
        assert_eq!(person.table, "persons");
        assert_eq!(person.column_type("age"), Some(AttrType::Integer));
        assert_eq!(registry.relations_of("person").unwrap().len(), 4);
        assert!(matches!(
            registry.relation("movie", "actors").unwrap().join,
            RelationJoin::ManyToMany { .. }
        ));
    }

    #[test]
    fn test_validate_walks_target_entities() {
        let registry = demo_registry();
        let tree = parse("movies.actors.pets").unwrap();
        assert_eq!(registry.validate(&tree, "person").unwrap(), tree);
    }

    #[test]
    fn test_validate_rejects_relation_on_wrong_entity() {
        let registry = demo_registry();
        // `pets` exists on person but not on movie
        let tree = parse("movies.pets").unwrap();
        let err = registry.validate(&tree, "person").unwrap_err();
        assert_eq!(
            err,
            GraphError::validation("unknown relation 'pets' on entity 'movie' (at person.movies)")
        );
    }

    #[test]
    fn test_insert_rank_follows_foreign_keys() {
        let registry = demo_registry();
        assert!(registry.insert_rank("person") < registry.insert_rank("animal"));
    }

    #[test]
    fn test_join_tables_deduplicated() {
        let registry = demo_registry();
        let tables = registry.join_tables();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].table, "persons_movies");
    }

    #[test]
    fn test_rejects_unknown_target() {
        let err = SchemaRegistry::builder()
            .entity(EntityDef::new("person", "persons").has_many("pets", "animal", "ownerId"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unknown entity 'animal'"));
    }

    #[test]
    fn test_rejects_missing_foreign_key_column() {
        let err = SchemaRegistry::builder()
            .entity(EntityDef::new("person", "persons").has_many("pets", "animal", "ownerId"))
            .entity(EntityDef::new("animal", "animals").attribute("name", AttrType::Text))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("'ownerId'"));
    }

    #[test]
    fn test_rejects_bad_identifier() {
        let err = SchemaRegistry::builder()
            .entity(EntityDef::new("person", "persons; drop table x"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("invalid table name"));
    }
}
