//! Entity, attribute and relation definitions

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Primary keys are storage-assigned integers
pub type RowId = i64;

/// Attribute data types understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrType {
    Integer,
    Real,
    Text,
    Boolean,
    /// Arbitrary JSON stored as text
    Json,
}

impl AttrType {
    /// Column type used when creating tables
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Real => "REAL",
            Self::Text | Self::Json => "TEXT",
        }
    }

    /// Normalize a JSON value to this type, `None` if it does not fit
    ///
    /// Normalizing before comparison keeps `43` and `43.0` equal for real
    /// attributes and rejects `"43"` for integer ones.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        if value.is_null() {
            return Some(Value::Null);
        }

        match self {
            Self::Integer => match value {
                Value::Number(n) => n.as_i64().map(Value::from).or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| Value::from(f as i64))
                }),
                _ => None,
            },
            Self::Real => value.as_f64().map(Value::from),
            Self::Text => value.as_str().map(|s| Value::String(s.to_string())),
            Self::Boolean => value.as_bool().map(Value::Bool),
            Self::Json => Some(value.clone()),
        }
    }
}

/// Cardinality of a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationKind {
    OneToOne,
    OneToMany,
    ManyToMany,
}

/// How two entities are joined
///
/// This is a closed set: every place that generates or applies operations
/// matches on it exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationJoin {
    /// One-to-one, the source row holds `foreign_key` → target primary key
    BelongsToOne { foreign_key: String },
    /// One-to-one, the target row holds `foreign_key` → source primary key
    HasOne { foreign_key: String },
    /// One-to-many, each target row holds `foreign_key` → source primary key
    HasMany { foreign_key: String },
    /// Many-to-many through a join table
    ManyToMany {
        join_table: String,
        /// Join column referencing the source entity
        owner_column: String,
        /// Join column referencing the target entity
        related_column: String,
    },
}

/// A named relation from one entity to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    pub name: String,
    /// Entity the relation is declared on
    pub source: String,
    /// Entity the relation points to
    pub target: String,
    pub join: RelationJoin,
}

impl RelationDef {
    pub fn kind(&self) -> RelationKind {
        match self.join {
            RelationJoin::BelongsToOne { .. } | RelationJoin::HasOne { .. } => {
                RelationKind::OneToOne
            }
            RelationJoin::HasMany { .. } => RelationKind::OneToMany,
            RelationJoin::ManyToMany { .. } => RelationKind::ManyToMany,
        }
    }

    /// Whether the relation holds a list of rows (as opposed to zero or one)
    pub fn is_to_many(&self) -> bool {
        !matches!(self.kind(), RelationKind::OneToOne)
    }

    /// Whether rows missing from an upsert are deleted rather than unrelated
    ///
    /// Only rows whose foreign key points back at the source are owned by the
    /// edge. `belongs_to_one` targets and many-to-many rows may be shared.
    pub fn owns_related(&self) -> bool {
        match self.join {
            RelationJoin::HasOne { .. } | RelationJoin::HasMany { .. } => true,
            RelationJoin::BelongsToOne { .. } | RelationJoin::ManyToMany { .. } => false,
        }
    }
}

/// A persisted entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    /// Non-key attributes
    pub attributes: BTreeMap<String, AttrType>,
    pub relations: BTreeMap<String, RelationDef>,
}

impl EntityDef {
    /// Start a definition with an `id` primary key
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            attributes: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, attr_type: AttrType) -> Self {
        self.attributes.insert(name.into(), attr_type);
        self
    }

    pub fn relation(mut self, name: impl Into<String>, target: impl Into<String>, join: RelationJoin) -> Self {
        let name = name.into();
        self.relations.insert(
            name.clone(),
            RelationDef {
                name,
                source: self.name.clone(),
                target: target.into(),
                join,
            },
        );
        self
    }

    pub fn belongs_to_one(self, name: &str, target: &str, foreign_key: &str) -> Self {
        self.relation(
            name,
            target,
            RelationJoin::BelongsToOne {
                foreign_key: foreign_key.to_string(),
            },
        )
    }

    pub fn has_one(self, name: &str, target: &str, foreign_key: &str) -> Self {
        self.relation(
            name,
            target,
            RelationJoin::HasOne {
                foreign_key: foreign_key.to_string(),
            },
        )
    }

    pub fn has_many(self, name: &str, target: &str, foreign_key: &str) -> Self {
        self.relation(
            name,
            target,
            RelationJoin::HasMany {
                foreign_key: foreign_key.to_string(),
            },
        )
    }

    pub fn many_to_many(
        self,
        name: &str,
        target: &str,
        join_table: &str,
        owner_column: &str,
        related_column: &str,
    ) -> Self {
        self.relation(
            name,
            target,
            RelationJoin::ManyToMany {
                join_table: join_table.to_string(),
                owner_column: owner_column.to_string(),
                related_column: related_column.to_string(),
            },
        )
    }

    /// Type of a column, including the primary key
    pub fn column_type(&self, column: &str) -> Option<AttrType> {
        if column == self.primary_key {
            Some(AttrType::Integer)
        } else {
            self.attributes.get(column).copied()
        }
    }

    /// All columns, primary key first
    pub fn columns(&self) -> impl Iterator<Item = (&str, AttrType)> {
        std::iter::once((self.primary_key.as_str(), AttrType::Integer)).chain(
            self.attributes
                .iter()
                .map(|(name, attr_type)| (name.as_str(), *attr_type)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_integer() {
        assert_eq!(AttrType::Integer.coerce(&json!(43)), Some(json!(43)));
        assert_eq!(AttrType::Integer.coerce(&json!(43.0)), Some(json!(43)));
        assert_eq!(AttrType::Integer.coerce(&json!(43.5)), None);
        assert_eq!(AttrType::Integer.coerce(&json!("43")), None);
        assert_eq!(AttrType::Integer.coerce(&json!(null)), Some(json!(null)));
    }

    #[test]
    fn test_coerce_real_normalizes_integers() {
        assert_eq!(AttrType::Real.coerce(&json!(2)), Some(json!(2.0)));
        assert_eq!(AttrType::Real.coerce(&json!(true)), None);
    }

    #[test]
    fn test_coerce_json_accepts_anything() {
        let value = json!({"street": "Main", "zip": 1});
        assert_eq!(AttrType::Json.coerce(&value), Some(value));
    }

    #[test]
    fn test_relation_ownership() {
        let person = EntityDef::new("person", "persons")
            .belongs_to_one("parent", "person", "parentId")
            .has_many("pets", "animal", "ownerId")
            .many_to_many("movies", "movie", "persons_movies", "personId", "movieId");

        assert!(!person.relations["parent"].owns_related());
        assert!(person.relations["pets"].owns_related());
        assert!(!person.relations["movies"].owns_related());
        assert_eq!(person.relations["parent"].kind(), RelationKind::OneToOne);
        assert!(person.relations["movies"].is_to_many());
    }
}
