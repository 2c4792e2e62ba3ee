//! In-memory object graphs
//!
//! An incoming JSON payload is read into an arena of [`GraphNode`]s guided by
//! the relation scope of the call. Edges are index lists into the arena, so
//! a graph never holds reference cycles and can be walked and mutated by
//! index while operations are applied.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::{GraphError, GraphResult};
use crate::relation::{MAX_DEPTH, RelationNode, RelationTree};
use crate::schema::{EntityDef, RowId, SchemaRegistry};

/// Index of a node inside its [`EntityGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An in-scope relation of one node and the children supplied for it
#[derive(Debug, Clone, PartialEq)]
pub struct GraphEdge {
    /// Payload key (alias if the scope gave one)
    pub key: String,
    /// Relation name on the node's entity
    pub relation: String,
    /// Named filters attached to this relation in the scope
    pub modifiers: Vec<String>,
    pub to_many: bool,
    pub children: Vec<NodeId>,
}

/// One entity instance of an incoming graph
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub entity: String,
    /// `None` until the row exists in storage
    pub id: Option<RowId>,
    /// Attributes present in the payload, coerced to their declared types
    pub attributes: Map<String, Value>,
    pub edges: Vec<GraphEdge>,
    /// Out-of-scope relation payload, echoed back untouched
    pub inert: Map<String, Value>,
}

impl GraphNode {
    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }
}

/// Arena-backed object graph rooted at a single node
#[derive(Debug, Clone, PartialEq)]
pub struct EntityGraph {
    nodes: Vec<GraphNode>,
    root: NodeId,
}

impl EntityGraph {
    /// Read `payload` as an instance of `entity`
    ///
    /// Keys naming a relation in `scope` (by alias or name) become edges,
    /// keys naming an attribute are coerced, and keys naming any other
    /// relation of the entity are kept as inert payload. Anything else is
    /// rejected, as are duplicate primary keys inside one array.
    pub fn from_json(
        registry: &SchemaRegistry,
        entity: &str,
        payload: &Value,
        scope: &RelationTree,
    ) -> GraphResult<Self> {
        let mut graph = Self {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        graph.root = graph.read_node(registry, entity, payload, &scope.children, entity)?;
        Ok(graph)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut GraphNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &GraphNode)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    fn read_node(
        &mut self,
        registry: &SchemaRegistry,
        entity_name: &str,
        payload: &Value,
        scope: &[RelationNode],
        path: &str,
    ) -> GraphResult<NodeId> {
        let entity = registry.entity(entity_name)?;
        let object = payload.as_object().ok_or_else(|| {
            GraphError::validation(format!("expected an object at {}, found {}", path, payload))
        })?;

        let slot = NodeId(self.nodes.len());
        self.nodes.push(GraphNode {
            entity: entity.name.clone(),
            id: None,
            attributes: Map::new(),
            edges: Vec::new(),
            inert: Map::new(),
        });

        let mut id = None;
        let mut attributes = Map::new();
        let mut edges = Vec::new();
        let mut inert = Map::new();

        for (key, value) in object {
            if key == &entity.primary_key {
                id = read_id(value, path)?;
            } else if let Some(scope_node) = scope.iter().find(|n| n.key() == key) {
                edges.push(self.read_edge(registry, entity, scope_node, value, path)?);
            } else if let Some(attr_type) = entity.attributes.get(key) {
                let coerced = attr_type.coerce(value).ok_or_else(|| {
                    GraphError::validation(format!(
                        "value {} does not fit attribute '{}.{}' ({:?})",
                        value, entity.name, key, attr_type
                    ))
                })?;
                attributes.insert(key.clone(), coerced);
            } else if entity.relations.contains_key(key) {
                inert.insert(key.clone(), value.clone());
            } else {
                return Err(GraphError::validation(format!(
                    "'{}' is neither an attribute nor a relation of '{}' (at {})",
                    key, entity.name, path
                )));
            }
        }

        let node = &mut self.nodes[slot.0];
        node.id = id;
        node.attributes = attributes;
        node.edges = edges;
        node.inert = inert;
        Ok(slot)
    }

    fn read_edge(
        &mut self,
        registry: &SchemaRegistry,
        entity: &EntityDef,
        scope_node: &RelationNode,
        value: &Value,
        path: &str,
    ) -> GraphResult<GraphEdge> {
        let relation = registry.relation(&entity.name, &scope_node.name)?;
        let path = format!("{}.{}", path, scope_node.key());

        let items: Vec<&Value> = match (relation.is_to_many(), value) {
            (true, Value::Array(items)) => items.iter().collect(),
            (false, Value::Null) => Vec::new(),
            (false, Value::Object(_)) => vec![value],
            (true, other) => {
                return Err(GraphError::validation(format!(
                    "expected an array at {}, found {}",
                    path, other
                )));
            }
            (false, other) => {
                return Err(GraphError::validation(format!(
                    "expected an object or null at {}, found {}",
                    path, other
                )));
            }
        };

        let mut children = Vec::with_capacity(items.len());
        let mut seen = HashSet::new();
        for (index, item) in items.into_iter().enumerate() {
            let item_path = if relation.is_to_many() {
                format!("{}[{}]", path, index)
            } else {
                path.clone()
            };
            let child = self.read_node(registry, &relation.target, item, &scope_node.children, &item_path)?;
            if let Some(id) = self.nodes[child.0].id {
                if !seen.insert(id) {
                    return Err(GraphError::validation(format!(
                        "duplicate {} id {} in {}",
                        relation.target, id, path
                    )));
                }
            }
            children.push(child);
        }

        Ok(GraphEdge {
            key: scope_node.key().to_string(),
            relation: relation.name.clone(),
            modifiers: scope_node.modifiers.clone(),
            to_many: relation.is_to_many(),
            children,
        })
    }

    /// Render the graph back to JSON, primary keys included once assigned
    pub fn to_json(&self, registry: &SchemaRegistry) -> Value {
        self.node_to_json(registry, self.root)
    }

    fn node_to_json(&self, registry: &SchemaRegistry, id: NodeId) -> Value {
        let node = self.node(id);
        let mut object = Map::new();

        if let (Some(row_id), Ok(entity)) = (node.id, registry.entity(&node.entity)) {
            object.insert(entity.primary_key.clone(), Value::from(row_id));
        }
        for (key, value) in &node.attributes {
            object.insert(key.clone(), value.clone());
        }
        for edge in &node.edges {
            let value = if edge.to_many {
                Value::Array(
                    edge.children
                        .iter()
                        .map(|child| self.node_to_json(registry, *child))
                        .collect(),
                )
            } else {
                edge.children
                    .first()
                    .map(|child| self.node_to_json(registry, *child))
                    .unwrap_or(Value::Null)
            };
            object.insert(edge.key.clone(), value);
        }
        for (key, value) in &node.inert {
            object.insert(key.clone(), value.clone());
        }

        Value::Object(object)
    }

    /// Scope covering every relation present in the payload, recursively
    ///
    /// Used by inserts, where nothing is persisted yet and every nested
    /// relation is meant to be written.
    pub fn scope_of(registry: &SchemaRegistry, entity: &str, payload: &Value) -> GraphResult<RelationTree> {
        Ok(RelationTree::from(scope_nodes(registry, entity, payload, 1)?))
    }
}

fn scope_nodes(
    registry: &SchemaRegistry,
    entity: &str,
    payload: &Value,
    depth: usize,
) -> GraphResult<Vec<RelationNode>> {
    let relations = registry.relations_of(entity)?;
    let mut nodes: Vec<RelationNode> = Vec::new();

    let Some(object) = payload.as_object() else {
        return Ok(nodes);
    };

    for (key, value) in object {
        let Some(relation) = relations.get(key) else {
            continue;
        };
        if depth > MAX_DEPTH {
            return Err(GraphError::validation(format!(
                "{} graph nests relations deeper than {} levels",
                entity, MAX_DEPTH
            )));
        }
        let items: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            Value::Object(_) => vec![value],
            _ => Vec::new(),
        };

        // Siblings may mention different nested relations; merge them all
        let mut nested = RelationTree::new();
        for item in items {
            for child in scope_nodes(registry, &relation.target, item, depth + 1)? {
                nested.insert(child).map_err(GraphError::validation)?;
            }
        }
        let mut node = RelationNode::new(key.clone());
        node.children = nested.children;
        nodes.push(node);
    }

    Ok(nodes)
}

fn read_id(value: &Value, path: &str) -> GraphResult<Option<RowId>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_i64().map(Some).ok_or_else(|| {
            GraphError::validation(format!("primary key at {} must be an integer, found {}", path, n))
        }),
        other => Err(GraphError::validation(format!(
            "primary key at {} must be an integer, found {}",
            path, other
        ))),
    }
}
