//! Upsert executor
//!
//! Orders the differ's operations into phases and applies them through one
//! storage session. The caller owns the session and decides whether to
//! commit; an error returned from here leaves it to be rolled back.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Value};

use super::operation::{EdgeRef, ExecutionReport, NodeRef, Operation};
use crate::error::{GraphError, GraphResult};
use crate::graph::{EntityGraph, NodeId};
use crate::schema::{RelationJoin, RowId, SchemaRegistry};
use crate::storage::{Edge, JoinRow, Storage};

/// Phase priorities (lower runs first)
pub mod phase {
    pub const UNRELATE: u8 = 16;
    pub const DELETE: u8 = 32;
    /// Inserts, updates and relates, ordered among themselves by dependency
    pub const WRITE: u8 = 64;
}

fn phase_of(operation: &Operation) -> u8 {
    match operation {
        Operation::Unrelate { .. } => phase::UNRELATE,
        Operation::Delete { .. } => phase::DELETE,
        Operation::Insert { .. } | Operation::Update { .. } | Operation::Relate { .. } => phase::WRITE,
    }
}

/// Put operations in execution order
///
/// Unrelates keep their emitted order. Deletes run dependents before the
/// entities they reference, deeper rows first. Writes are sorted
/// topologically so every pending reference is inserted before it is used;
/// among independent writes the emitted order wins.
pub fn plan(registry: &SchemaRegistry, operations: Vec<Operation>) -> GraphResult<Vec<Operation>> {
    let mut unrelates = Vec::new();
    let mut deletes = Vec::new();
    let mut writes = Vec::new();

    for operation in operations {
        match phase_of(&operation) {
            phase::UNRELATE => unrelates.push(operation),
            phase::DELETE => deletes.push(operation),
            _ => writes.push(operation),
        }
    }

    deletes.sort_by_key(|operation| match operation {
        Operation::Delete { entity, depth, .. } => {
            (Reverse(registry.insert_rank(entity)), Reverse(*depth))
        }
        _ => (Reverse(usize::MAX), Reverse(0)),
    });

    let mut ordered = unrelates;
    ordered.extend(deletes);
    ordered.extend(sort_writes(writes)?);
    Ok(ordered)
}

/// Kahn's algorithm over pending-node references
fn sort_writes(writes: Vec<Operation>) -> GraphResult<Vec<Operation>> {
    let producers: HashMap<NodeId, usize> = writes
        .iter()
        .enumerate()
        .filter_map(|(index, operation)| match operation {
            Operation::Insert { node, .. } => Some((*node, index)),
            _ => None,
        })
        .collect();

    let mut in_degree = vec![0usize; writes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); writes.len()];
    for (index, operation) in writes.iter().enumerate() {
        for node in operation.dependencies() {
            let producer = *producers.get(&node).ok_or_else(|| {
                GraphError::validation(format!("'{}' refers to {} which is never inserted", operation, node))
            })?;
            in_degree[index] += 1;
            dependents[producer].push(index);
        }
    }

    let mut ready: BTreeSet<usize> = (0..writes.len()).filter(|i| in_degree[*i] == 0).collect();
    let mut order = Vec::with_capacity(writes.len());
    while let Some(index) = ready.pop_first() {
        order.push(index);
        for dependent in &dependents[index] {
            in_degree[*dependent] -= 1;
            if in_degree[*dependent] == 0 {
                ready.insert(*dependent);
            }
        }
    }

    if order.len() < writes.len() {
        let stuck: Vec<String> = (0..writes.len())
            .filter(|i| in_degree[*i] > 0)
            .map(|i| writes[i].to_string())
            .collect();
        return Err(GraphError::validation(format!(
            "circular dependency among new rows: {}",
            stuck.join("; ")
        )));
    }

    let mut slots: Vec<Option<Operation>> = writes.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// Applies planned operations through one storage session
pub struct Executor<'a, S: Storage + ?Sized> {
    registry: &'a SchemaRegistry,
    storage: &'a mut S,
    assigned: HashMap<NodeId, RowId>,
    report: ExecutionReport,
}

impl<'a, S: Storage + ?Sized> Executor<'a, S> {
    pub fn new(registry: &'a SchemaRegistry, storage: &'a mut S) -> Self {
        Self {
            registry,
            storage,
            assigned: HashMap::new(),
            report: ExecutionReport::default(),
        }
    }

    /// Plan and apply `operations`, writing fresh primary keys back into `graph`
    pub async fn execute(
        mut self,
        graph: &mut EntityGraph,
        operations: Vec<Operation>,
    ) -> GraphResult<ExecutionReport> {
        for operation in plan(self.registry, operations)? {
            log::debug!("Applying {}", operation);
            self.apply(graph, &operation).await?;
            self.report.record(&operation);
        }
        Ok(self.report)
    }

    async fn apply(&mut self, graph: &mut EntityGraph, operation: &Operation) -> GraphResult<()> {
        let registry = self.registry;

        match operation {
            Operation::Insert {
                entity,
                node,
                attributes,
                bindings,
            } => {
                let mut row = attributes.clone();
                for binding in bindings {
                    let id = self.resolve(binding.target)?;
                    row.insert(binding.column.clone(), Value::from(id));
                }

                let id = self.storage.insert(registry.entity(entity)?, &row).await?;
                self.assigned.insert(*node, id);

                let target = graph.node_mut(*node);
                target.id = Some(id);
                for binding in bindings {
                    if let Some(value) = row.get(&binding.column) {
                        target.attributes.insert(binding.column.clone(), value.clone());
                    }
                }
                Ok(())
            }
            Operation::Update {
                entity,
                id,
                attributes,
            } => self.storage.update(registry.entity(entity)?, *id, attributes).await,
            Operation::Delete { entity, id, .. } => self.storage.delete(registry.entity(entity)?, *id).await,
            Operation::Relate {
                edge,
                parent,
                child,
            } => {
                let parent = self.resolve(*parent)?;
                let child = self.resolve(*child)?;
                self.link(edge, parent, child, true).await
            }
            Operation::Unrelate {
                edge,
                parent,
                child,
            } => self.link(edge, *parent, *child, false).await,
        }
    }

    /// Create or remove the connection between two stored rows
    async fn link(&mut self, edge: &EdgeRef, parent: RowId, child: RowId, connect: bool) -> GraphResult<()> {
        let resolved = Edge::resolve(self.registry, &edge.entity, &edge.relation)?;

        match &resolved.relation.join {
            RelationJoin::ManyToMany {
                join_table,
                owner_column,
                related_column,
            } => {
                let join = JoinRow {
                    table: join_table,
                    owner_column,
                    related_column,
                };
                if connect {
                    self.storage.relate(join, parent, child).await
                } else {
                    self.storage.unrelate(join, parent, child).await
                }
            }
            RelationJoin::HasOne { foreign_key } | RelationJoin::HasMany { foreign_key } => {
                let value = if connect { Value::from(parent) } else { Value::Null };
                self.storage
                    .update(resolved.target, child, &single(foreign_key, value))
                    .await
            }
            RelationJoin::BelongsToOne { foreign_key } => {
                let value = if connect { Value::from(child) } else { Value::Null };
                self.storage
                    .update(resolved.source, parent, &single(foreign_key, value))
                    .await
            }
        }
    }

    fn resolve(&self, reference: NodeRef) -> GraphResult<RowId> {
        match reference {
            NodeRef::Existing(id) => Ok(id),
            NodeRef::Pending(node) => self.assigned.get(&node).copied().ok_or_else(|| {
                GraphError::validation(format!("{} is used before it is inserted", node))
            }),
        }
    }
}

fn single(column: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(column.to_string(), value);
    map
}
