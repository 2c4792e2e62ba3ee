//! Caller-facing engine
//!
//! Every call parses and validates its relation expression, then opens one
//! session on the backend. Writes commit only when the whole graph was
//! applied; any error rolls the session back before it is returned.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{GraphError, GraphResult};
use crate::fetch::EagerFetcher;
use crate::graph::EntityGraph;
use crate::query::{Filter, Modifiers};
use crate::relation::{parse, RelationNode, RelationTree};
use crate::schema::{RowId, SchemaRegistry};
use crate::storage::{Backend, Session};
use crate::upsert::{Differ, ExecutionReport, Executor};

/// Result of a graph write
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Upserted {
    /// The incoming graph with every primary key filled in
    pub graph: Value,
    pub report: ExecutionReport,
}

/// Graph upsert and eager-fetch engine over a storage backend
pub struct GraphEngine<B: Backend> {
    backend: B,
    registry: Arc<SchemaRegistry>,
    modifiers: Modifiers,
}

impl<B: Backend> GraphEngine<B> {
    pub fn new(backend: B, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            backend,
            registry,
            modifiers: Modifiers::new(),
        }
    }

    /// Named filters usable as `relation(name)` in expressions
    pub fn with_modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Make the relations named by `expression` match `graph`
    ///
    /// With `root_id` the graph describes that stored row; otherwise the
    /// root's own primary key is used, and a root without one is inserted.
    /// Relations outside the expression are left untouched.
    pub async fn upsert_graph(
        &self,
        entity: &str,
        root_id: Option<RowId>,
        graph: &Value,
        expression: &str,
    ) -> GraphResult<Upserted> {
        let tree = parse(expression)?;
        self.write(entity, root_id, graph, &tree, true).await
    }

    /// Fetch rows of `entity` matching `filter`, with the relations in `expression`
    pub async fn fetch_graph(
        &self,
        entity: &str,
        filter: &Filter,
        expression: &str,
    ) -> GraphResult<Vec<Value>> {
        let tree = parse(expression)?;
        let mut session = self.backend.begin().await?;
        let fetched = EagerFetcher::new(&self.registry, &self.modifiers)
            .fetch(&mut session, entity, filter, &tree)
            .await;
        finish(session, fetched).await
    }

    /// Fetch a single row by primary key
    pub async fn fetch_by_id(&self, entity: &str, id: RowId, expression: &str) -> GraphResult<Value> {
        let primary_key = self.registry.entity(entity)?.primary_key.clone();
        self.fetch_graph(entity, &Filter::new().eq(primary_key, id), expression)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::not_found(entity, id))
    }

    /// Insert a new graph, writing every relation present in the payload
    ///
    /// Nested rows that carry a primary key are related, not inserted.
    pub async fn insert_graph(&self, entity: &str, graph: &Value) -> GraphResult<Upserted> {
        let entity_def = self.registry.entity(entity)?;
        if graph.get(&entity_def.primary_key).is_some_and(|id| !id.is_null()) {
            return Err(GraphError::validation(format!(
                "cannot insert {} with an explicit '{}'",
                entity, entity_def.primary_key
            )));
        }

        let tree = EntityGraph::scope_of(&self.registry, entity, graph)?;
        self.write(entity, None, graph, &tree, true).await
    }

    /// Update attributes of one row, leaving every relation alone
    pub async fn patch(&self, entity: &str, id: RowId, attributes: &Value) -> GraphResult<Upserted> {
        self.write(entity, Some(id), attributes, &RelationTree::new(), true)
            .await
    }

    /// Attach `child` under `relation` of an existing row
    ///
    /// A child with a primary key is related, one without is inserted.
    /// Rows already related stay where they are.
    pub async fn add_related(
        &self,
        entity: &str,
        parent_id: RowId,
        relation: &str,
        child: &Value,
    ) -> GraphResult<Upserted> {
        let relation_def = self.registry.relation(entity, relation)?;

        let mut node = RelationNode::new(relation);
        node.children = EntityGraph::scope_of(&self.registry, &relation_def.target, child)?.children;
        let tree = RelationTree::new().with(node);

        let value = if relation_def.is_to_many() {
            Value::Array(vec![child.clone()])
        } else {
            child.clone()
        };
        let mut payload = Map::new();
        payload.insert(relation.to_string(), value);

        self.write(entity, Some(parent_id), &Value::Object(payload), &tree, false)
            .await
    }

    async fn write(
        &self,
        entity: &str,
        root_id: Option<RowId>,
        payload: &Value,
        tree: &RelationTree,
        prune: bool,
    ) -> GraphResult<Upserted> {
        let registry = &*self.registry;
        let tree = registry.validate(tree, entity)?;
        let mut graph = EntityGraph::from_json(registry, entity, payload, &tree)?;

        let mut session = self.backend.begin().await?;
        let applied = async {
            let differ = Differ::new(registry, &self.modifiers);
            let differ = if prune { differ } else { differ.additive() };
            let operations = differ.diff(&mut session, &mut graph, root_id).await?;
            Executor::new(registry, &mut session)
                .execute(&mut graph, operations)
                .await
        }
        .await;

        let report = finish(session, applied).await?;
        log::info!("Upserted {} graph ({})", entity, report);
        Ok(Upserted {
            graph: graph.to_json(registry),
            report,
        })
    }
}

/// Commit on success, roll back on failure
async fn finish<S: Session, T>(session: S, result: GraphResult<T>) -> GraphResult<T> {
    match result {
        Ok(value) => {
            session.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = session.rollback().await {
                log::warn!("Rollback failed after '{}': {}", err, rollback);
            }
            Err(err)
        }
    }
}
