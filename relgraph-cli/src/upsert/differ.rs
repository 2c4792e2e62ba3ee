//! Graph differ
//!
//! Walks an incoming graph breadth-first and compares every in-scope edge
//! with what storage currently holds for it. The result is a flat list of
//! [`Operation`]s. Storage is only read here, to load baselines.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::{Map, Value};

use super::operation::{Binding, EdgeRef, NodeRef, Operation};
use crate::error::{GraphError, GraphResult};
use crate::graph::{EntityGraph, GraphEdge, NodeId};
use crate::query::{Filter, Modifiers};
use crate::schema::{EntityDef, RelationJoin, RowId, SchemaRegistry};
use crate::storage::{Edge, Row, Storage};

/// Computes the operations that make storage match an incoming graph
pub struct Differ<'a> {
    registry: &'a SchemaRegistry,
    modifiers: &'a Modifiers,
    prune: bool,
    operations: Vec<Operation>,
    /// Node → index of its `Insert` in `operations`
    inserts: HashMap<NodeId, usize>,
}

impl<'a> Differ<'a> {
    pub fn new(registry: &'a SchemaRegistry, modifiers: &'a Modifiers) -> Self {
        Self {
            registry,
            modifiers,
            prune: true,
            operations: Vec::new(),
            inserts: HashMap::new(),
        }
    }

    /// Keep stored rows that are missing from the payload
    pub fn additive(mut self) -> Self {
        self.prune = false;
        self
    }

    /// Diff `graph` against storage
    ///
    /// `root_id` names the stored row the graph describes; without it the
    /// root's own primary key is used, and without either the root is new.
    /// The root's id is written into the graph once it is known to exist.
    pub async fn diff<S: Storage + ?Sized>(
        mut self,
        storage: &mut S,
        graph: &mut EntityGraph,
        root_id: Option<RowId>,
    ) -> GraphResult<Vec<Operation>> {
        let registry = self.registry;
        let root = graph.root();
        let root_entity = registry.entity(&graph.node(root).entity)?;

        let id = match (root_id, graph.node(root).id) {
            (Some(given), Some(payload)) if given != payload => {
                return Err(GraphError::validation(format!(
                    "payload id {} does not match root id {}",
                    payload, given
                )));
            }
            (Some(id), _) | (None, Some(id)) => Some(id),
            (None, None) => None,
        };

        match id {
            Some(id) => {
                let row = load_row(storage, root_entity, id).await?;
                graph.node_mut(root).id = Some(id);
                self.update_changed(root_entity, &row, &graph.node(root).attributes);
            }
            None => {
                let attributes = graph.node(root).attributes.clone();
                self.emit(Operation::insert(&root_entity.name, root, attributes));
            }
        }

        let graph: &EntityGraph = graph;
        let mut queue = VecDeque::from([(root, 0usize)]);
        while let Some((node, depth)) = queue.pop_front() {
            for edge in &graph.node(node).edges {
                self.diff_edge(storage, graph, node, edge, depth).await?;
                queue.extend(edge.children.iter().map(|child| (*child, depth + 1)));
            }
        }

        log::debug!("Computed {} operations", self.operations.len());
        Ok(self.operations)
    }

    async fn diff_edge<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        graph: &EntityGraph,
        parent: NodeId,
        edge: &GraphEdge,
        depth: usize,
    ) -> GraphResult<()> {
        let registry = self.registry;
        let parent_node = graph.node(parent);
        let resolved = Edge::resolve(registry, &parent_node.entity, &edge.relation)?;
        let edge_ref = EdgeRef::new(&parent_node.entity, &edge.relation);
        let target = resolved.target;
        let parent_ref = node_ref(graph, parent);

        // Unknown modifiers fail for new parents too
        let filter = self.modifiers.combine(&edge.modifiers)?.resolve(target)?;

        // A new parent has nothing stored under it yet
        let (baseline, linked) = match parent_node.id {
            Some(parent_id) => {
                let baseline: Vec<Row> = storage
                    .fetch_related(resolved, &[parent_id], &filter)
                    .await?
                    .into_iter()
                    .map(|related| related.row)
                    .collect();

                // Rows hidden by a modifier are still related; they must not be re-related
                let linked: HashSet<RowId> = if filter.is_empty() {
                    baseline.iter().map(|row| row.id).collect()
                } else {
                    storage
                        .fetch_related(resolved, &[parent_id], &Filter::new())
                        .await?
                        .into_iter()
                        .map(|related| related.row.id)
                        .collect()
                };
                (baseline, linked)
            }
            None => (Vec::new(), HashSet::new()),
        };
        log::debug!(
            "{}: {} baseline rows, {} incoming",
            edge_ref,
            baseline.len(),
            edge.children.len()
        );

        let mut kept = HashSet::new();
        for child in &edge.children {
            let child_node = graph.node(*child);
            match child_node.id {
                Some(child_id) => {
                    kept.insert(child_id);
                    if let Some(row) = baseline.iter().find(|row| row.id == child_id) {
                        self.update_changed(target, row, &child_node.attributes);
                    } else {
                        let row = load_row(storage, target, child_id).await?;
                        self.update_changed(target, &row, &child_node.attributes);
                        if !linked.contains(&child_id) {
                            self.relate(
                                &resolved.relation.join,
                                edge_ref.clone(),
                                parent,
                                parent_ref,
                                NodeRef::Existing(child_id),
                            )?;
                        }
                    }
                }
                None => {
                    self.emit(Operation::insert(
                        &target.name,
                        *child,
                        child_node.attributes.clone(),
                    ));
                    self.relate(
                        &resolved.relation.join,
                        edge_ref.clone(),
                        parent,
                        parent_ref,
                        NodeRef::Pending(*child),
                    )?;
                }
            }
        }

        if !self.prune {
            return Ok(());
        }

        if let Some(parent_id) = parent_node.id {
            for row in baseline.iter().filter(|row| !kept.contains(&row.id)) {
                if resolved.relation.owns_related() {
                    self.emit(Operation::delete(&target.name, row.id, depth + 1));
                } else {
                    self.emit(Operation::unrelate(edge_ref.clone(), parent_id, row.id));
                }
            }
        }

        Ok(())
    }

    /// Connect `child` to `parent`, folding foreign keys into pending inserts where possible
    fn relate(
        &mut self,
        join: &RelationJoin,
        edge: EdgeRef,
        parent: NodeId,
        parent_ref: NodeRef,
        child: NodeRef,
    ) -> GraphResult<()> {
        match (join, parent_ref, child) {
            (
                RelationJoin::HasOne { foreign_key } | RelationJoin::HasMany { foreign_key },
                _,
                NodeRef::Pending(node),
            ) => self.bind(node, foreign_key, parent_ref),
            (RelationJoin::BelongsToOne { foreign_key }, NodeRef::Pending(_), _) => {
                self.bind(parent, foreign_key, child)
            }
            (RelationJoin::HasOne { .. } | RelationJoin::HasMany { .. }, _, NodeRef::Existing(_))
            | (RelationJoin::BelongsToOne { .. }, NodeRef::Existing(_), _)
            | (RelationJoin::ManyToMany { .. }, _, _) => {
                self.emit(Operation::relate(edge, parent_ref, child));
                Ok(())
            }
        }
    }

    fn bind(&mut self, node: NodeId, column: &str, target: NodeRef) -> GraphResult<()> {
        let index = *self.inserts.get(&node).ok_or_else(|| {
            GraphError::validation(format!("node {} has no pending insert to bind '{}' to", node, column))
        })?;
        if let Operation::Insert { bindings, .. } = &mut self.operations[index] {
            log::debug!("bind {} {}={}", node, column, target);
            bindings.push(Binding {
                column: column.to_string(),
                target,
            });
        }
        Ok(())
    }

    /// Emit an `Update` with the supplied attributes that differ from `row`
    fn update_changed(&mut self, entity: &EntityDef, row: &Row, incoming: &Map<String, Value>) {
        let changed: Map<String, Value> = incoming
            .iter()
            .filter(|(name, value)| row.attributes.get(*name) != Some(*value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        if !changed.is_empty() {
            self.emit(Operation::update(&entity.name, row.id, changed));
        }
    }

    fn emit(&mut self, operation: Operation) {
        log::debug!("{}", operation);
        if let Operation::Insert { node, .. } = &operation {
            self.inserts.insert(*node, self.operations.len());
        }
        self.operations.push(operation);
    }
}

fn node_ref(graph: &EntityGraph, node: NodeId) -> NodeRef {
    match graph.node(node).id {
        Some(id) => NodeRef::Existing(id),
        None => NodeRef::Pending(node),
    }
}

/// Load one row by primary key, `NotFound` if it does not exist
pub(crate) async fn load_row<S: Storage + ?Sized>(
    storage: &mut S,
    entity: &EntityDef,
    id: RowId,
) -> GraphResult<Row> {
    storage
        .fetch_rows(entity, &Filter::new().eq(entity.primary_key.clone(), id))
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| GraphError::not_found(&entity.name, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::parse;
    use crate::storage::{Backend, Session};
    use crate::testing::{demo_backend, seed_matt, Seeded};
    use serde_json::json;

    /// Diff a payload against the seeded Matt graph, rooted at Matt unless `new_root`
    async fn diff_payload(
        expression: &str,
        payload: impl FnOnce(&Seeded) -> Value,
        new_root: bool,
    ) -> GraphResult<Vec<Operation>> {
        let (registry, backend) = demo_backend().await;
        let ids = seed_matt(&backend, &registry).await;
        let modifiers = Modifiers::new().register("dogs", Filter::new().eq("species", "dog"));
        let scope = registry.validate(&parse(expression).unwrap(), "person")?;
        let mut graph = EntityGraph::from_json(&registry, "person", &payload(&ids), &scope)?;
        let root_id = if new_root { None } else { Some(ids.matt) };

        let mut session = backend.begin().await?;
        let result = Differ::new(&registry, &modifiers)
            .diff(&mut session, &mut graph, root_id)
            .await;
        session.rollback().await?;
        result
    }

    #[tokio::test]
    async fn test_unchanged_graph_yields_nothing() {
        let ops = diff_payload(
            "pets",
            |ids| json!({"firstName": "Matt", "pets": [{"id": ids.doggo}, {"id": ids.kat}]}),
            false,
        )
        .await
        .unwrap();
        assert!(ops.is_empty(), "unexpected operations: {:?}", ops);
    }

    #[tokio::test]
    async fn test_missing_owned_child_is_deleted() {
        let ops = diff_payload("pets", |ids| json!({"pets": [{"id": ids.doggo, "name": "The dog"}]}), false)
            .await
            .unwrap();
        let kinds: Vec<_> = ops.iter().map(|op| op.operation_type()).collect();
        assert_eq!(kinds, vec!["update", "delete"]);
        assert!(matches!(&ops[1], Operation::Delete { entity, depth: 1, .. } if entity == "animal"));
    }

    #[tokio::test]
    async fn test_missing_shared_row_is_unrelated() {
        let ops = diff_payload("movies", |_| json!({"movies": []}), false).await.unwrap();
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| op.operation_type() == "unrelate"));
    }

    #[tokio::test]
    async fn test_new_children_bind_to_parent() {
        let ops = diff_payload(
            "pets",
            |ids| json!({"pets": [{"id": ids.doggo}, {"id": ids.kat}, {"name": "Kitty", "species": "cat"}]}),
            false,
        )
        .await
        .unwrap();
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            Operation::Insert { entity, bindings, .. } => {
                assert_eq!(entity, "animal");
                assert_eq!(bindings[0].column, "ownerId");
                assert!(matches!(bindings[0].target, NodeRef::Existing(_)));
            }
            other => panic!("expected insert, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_new_parent_is_bound_on_new_owner() {
        let ops = diff_payload(
            "parent",
            |_| json!({"firstName": "Lisa", "parent": {"firstName": "Hugo"}}),
            true,
        )
        .await
        .unwrap();
        assert_eq!(ops.len(), 2);
        match &ops[0] {
            Operation::Insert { bindings, .. } => {
                assert_eq!(bindings[0].column, "parentId");
                assert_eq!(bindings[0].target, NodeRef::Pending(NodeId(1)));
            }
            other => panic!("expected insert, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_existing_parent_is_related() {
        let ops = diff_payload("parent", |ids| json!({"parent": {"id": ids.sylvester}}), false)
            .await
            .unwrap();
        let kinds: Vec<_> = ops.iter().map(|op| op.operation_type()).collect();
        assert_eq!(kinds, vec!["relate", "unrelate"]);
    }

    #[tokio::test]
    async fn test_relate_unknown_row_is_not_found() {
        let err = diff_payload("movies", |_| json!({"movies": [{"id": 999}]}), false)
            .await
            .unwrap_err();
        assert_eq!(err, GraphError::not_found("movie", 999));
    }

    #[tokio::test]
    async fn test_payload_id_mismatch() {
        let (registry, backend) = demo_backend().await;
        let modifiers = Modifiers::new();
        let mut graph =
            EntityGraph::from_json(&registry, "person", &json!({"id": 5}), &Default::default()).unwrap();
        let mut session = backend.begin().await.unwrap();

        let err = Differ::new(&registry, &modifiers)
            .diff(&mut session, &mut graph, Some(6))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_modifier_narrows_baseline() {
        // Only dogs are compared, so the cat survives and the dog is not re-related
        let ops = diff_payload("pets(dogs)", |ids| json!({"pets": [{"id": ids.doggo}]}), false)
            .await
            .unwrap();
        assert!(ops.is_empty(), "unexpected operations: {:?}", ops);

        let ops = diff_payload("pets(dogs)", |_| json!({"pets": []}), false).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], Operation::Delete { entity, .. } if entity == "animal"));
    }

    #[tokio::test]
    async fn test_unknown_modifier_under_new_parent() {
        let err = diff_payload(
            "pets(nope)",
            |_| json!({"firstName": "Lisa", "pets": [{"name": "Rex"}]}),
            true,
        )
        .await
        .unwrap_err();
        assert_eq!(err, GraphError::validation("unknown modifier 'nope'"));

        // a modifier column the target lacks is caught the same way
        let err = diff_payload(
            "children(dogs)",
            |_| json!({"firstName": "Lisa", "children": []}),
            true,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_additive_mode_keeps_baseline() {
        let (registry, backend) = demo_backend().await;
        let ids = seed_matt(&backend, &registry).await;
        let modifiers = Modifiers::new();
        let scope = parse("pets").unwrap();
        let mut graph = EntityGraph::from_json(
            &registry,
            "person",
            &json!({"pets": [{"name": "Hound"}]}),
            &scope,
        )
        .unwrap();

        let mut session = backend.begin().await.unwrap();
        let ops = Differ::new(&registry, &modifiers)
            .additive()
            .diff(&mut session, &mut graph, Some(ids.matt))
            .await
            .unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].operation_type(), "insert");
    }
}
