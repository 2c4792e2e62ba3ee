//! Storage collaborator boundary
//!
//! The engine never talks SQL directly. It reads baselines and applies
//! operations through [`Storage`], always inside a [`Session`] opened from a
//! [`Backend`]. A session is one transaction: dropping it without committing
//! rolls everything back.

pub mod sqlite;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::GraphResult;
use crate::query::Filter;
use crate::schema::{EntityDef, RelationDef, RelationJoin, RowId, SchemaRegistry};

pub use sqlite::{SqliteBackend, SqliteSession};

/// A persisted row: primary key plus non-key attributes
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub id: RowId,
    pub attributes: Map<String, Value>,
}

/// A related row together with the parent it was reached from
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedRow {
    /// Primary key of the parent row on the source side of the relation
    pub owner: RowId,
    pub row: Row,
}

/// A relation resolved against the registry: both entity definitions at hand
#[derive(Debug, Clone, Copy)]
pub struct Edge<'a> {
    pub source: &'a EntityDef,
    pub relation: &'a RelationDef,
    pub target: &'a EntityDef,
}

impl<'a> Edge<'a> {
    pub fn resolve(registry: &'a SchemaRegistry, entity: &str, relation: &str) -> GraphResult<Self> {
        let source = registry.entity(entity)?;
        let relation = registry.relation(entity, relation)?;
        let target = registry.entity(&relation.target)?;
        Ok(Self {
            source,
            relation,
            target,
        })
    }

    /// Join-table coordinates for many-to-many edges
    pub fn join_row(&self) -> Option<JoinRow<'a>> {
        match &self.relation.join {
            RelationJoin::ManyToMany {
                join_table,
                owner_column,
                related_column,
            } => Some(JoinRow {
                table: join_table,
                owner_column,
                related_column,
            }),
            RelationJoin::BelongsToOne { .. }
            | RelationJoin::HasOne { .. }
            | RelationJoin::HasMany { .. } => None,
        }
    }
}

/// Where a many-to-many link lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinRow<'a> {
    pub table: &'a str,
    pub owner_column: &'a str,
    pub related_column: &'a str,
}

/// Row-level operations available inside a session
#[async_trait]
pub trait Storage: Send {
    /// Rows of `entity` matching `filter`, ordered by primary key
    async fn fetch_rows(&mut self, entity: &EntityDef, filter: &Filter) -> GraphResult<Vec<Row>>;

    /// Rows related to any of `parent_ids` through `edge`, ordered by owner then primary key
    async fn fetch_related(
        &mut self,
        edge: Edge<'_>,
        parent_ids: &[RowId],
        filter: &Filter,
    ) -> GraphResult<Vec<RelatedRow>>;

    /// Insert a row and return its new primary key
    async fn insert(&mut self, entity: &EntityDef, attributes: &Map<String, Value>) -> GraphResult<RowId>;

    /// Update the given attributes of an existing row
    async fn update(
        &mut self,
        entity: &EntityDef,
        id: RowId,
        attributes: &Map<String, Value>,
    ) -> GraphResult<()>;

    async fn delete(&mut self, entity: &EntityDef, id: RowId) -> GraphResult<()>;

    async fn relate(&mut self, join: JoinRow<'_>, owner: RowId, related: RowId) -> GraphResult<()>;

    async fn unrelate(&mut self, join: JoinRow<'_>, owner: RowId, related: RowId) -> GraphResult<()>;
}

/// A storage transaction
#[async_trait]
pub trait Session: Storage + Sized {
    async fn commit(self) -> GraphResult<()>;
    async fn rollback(self) -> GraphResult<()>;
}

/// Opens sessions
#[async_trait]
pub trait Backend: Send + Sync {
    type Session: Session;

    async fn begin(&self) -> GraphResult<Self::Session>;
}
