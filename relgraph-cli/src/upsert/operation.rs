//! Operations emitted by the graph differ

use serde_json::{Map, Value};

use crate::graph::NodeId;
use crate::schema::RowId;

/// A row an operation refers to: already stored, or inserted earlier in the same call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Existing(RowId),
    /// Graph node whose `Insert` has to run first
    Pending(NodeId),
}

impl NodeRef {
    pub fn pending(&self) -> Option<NodeId> {
        match self {
            Self::Existing(_) => None,
            Self::Pending(node) => Some(*node),
        }
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Existing(id) => write!(f, "{}", id),
            Self::Pending(node) => write!(f, "new {}", node),
        }
    }
}

/// Foreign key column filled in from another row's primary key at insert time
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub column: String,
    pub target: NodeRef,
}

/// Relation an operation is scoped to, named from its declaring entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRef {
    pub entity: String,
    pub relation: String,
}

impl EdgeRef {
    pub fn new(entity: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            relation: relation.into(),
        }
    }
}

impl std::fmt::Display for EdgeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.entity, self.relation)
    }
}

/// A single storage mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Insert a new row for a graph node
    Insert {
        entity: String,
        node: NodeId,
        attributes: Map<String, Value>,
        bindings: Vec<Binding>,
    },
    /// Write changed attributes of an existing row
    Update {
        entity: String,
        id: RowId,
        attributes: Map<String, Value>,
    },
    /// Delete a row no longer present under an owning relation
    Delete {
        entity: String,
        id: RowId,
        /// Nesting level of the edge the row was found under
        depth: usize,
    },
    /// Connect two rows through a relation
    Relate {
        edge: EdgeRef,
        parent: NodeRef,
        child: NodeRef,
    },
    /// Disconnect two rows without deleting either
    Unrelate {
        edge: EdgeRef,
        parent: RowId,
        child: RowId,
    },
}

impl Operation {
    pub fn insert(entity: impl Into<String>, node: NodeId, attributes: Map<String, Value>) -> Self {
        Self::Insert {
            entity: entity.into(),
            node,
            attributes,
            bindings: Vec::new(),
        }
    }

    pub fn update(entity: impl Into<String>, id: RowId, attributes: Map<String, Value>) -> Self {
        Self::Update {
            entity: entity.into(),
            id,
            attributes,
        }
    }

    pub fn delete(entity: impl Into<String>, id: RowId, depth: usize) -> Self {
        Self::Delete {
            entity: entity.into(),
            id,
            depth,
        }
    }

    pub fn relate(edge: EdgeRef, parent: NodeRef, child: NodeRef) -> Self {
        Self::Relate {
            edge,
            parent,
            child,
        }
    }

    pub fn unrelate(edge: EdgeRef, parent: RowId, child: RowId) -> Self {
        Self::Unrelate {
            edge,
            parent,
            child,
        }
    }

    /// Get the operation type as a string
    pub fn operation_type(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Relate { .. } => "relate",
            Self::Unrelate { .. } => "unrelate",
        }
    }

    /// Pending nodes whose inserts must run before this operation
    pub fn dependencies(&self) -> Vec<NodeId> {
        match self {
            Self::Insert { bindings, .. } => bindings.iter().filter_map(|b| b.target.pending()).collect(),
            Self::Relate { parent, child, .. } => {
                parent.pending().into_iter().chain(child.pending()).collect()
            }
            Self::Update { .. } | Self::Delete { .. } | Self::Unrelate { .. } => Vec::new(),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert {
                entity,
                node,
                attributes,
                bindings,
            } => {
                write!(f, "insert {} {} {}", entity, node, Value::Object(attributes.clone()))?;
                for binding in bindings {
                    write!(f, " {}={}", binding.column, binding.target)?;
                }
                Ok(())
            }
            Self::Update {
                entity,
                id,
                attributes,
            } => write!(f, "update {} {} {}", entity, id, Value::Object(attributes.clone())),
            Self::Delete { entity, id, .. } => write!(f, "delete {} {}", entity, id),
            Self::Relate {
                edge,
                parent,
                child,
            } => write!(f, "relate {} {} -> {}", edge, parent, child),
            Self::Unrelate {
                edge,
                parent,
                child,
            } => write!(f, "unrelate {} {} -> {}", edge, parent, child),
        }
    }
}

/// Counts of applied operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutionReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub related: usize,
    pub unrelated: usize,
}

impl ExecutionReport {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted + self.related + self.unrelated
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub(crate) fn record(&mut self, operation: &Operation) {
        match operation {
            Operation::Insert { .. } => self.inserted += 1,
            Operation::Update { .. } => self.updated += 1,
            Operation::Delete { .. } => self.deleted += 1,
            Operation::Relate { .. } => self.related += 1,
            Operation::Unrelate { .. } => self.unrelated += 1,
        }
    }
}

impl std::fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} inserted, {} updated, {} deleted, {} related, {} unrelated",
            self.inserted, self.updated, self.deleted, self.related, self.unrelated
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dependencies_only_pending_refs() {
        let edge = EdgeRef::new("person", "movies");
        let op = Operation::relate(edge, NodeRef::Existing(1), NodeRef::Pending(NodeId(3)));
        assert_eq!(op.dependencies(), vec![NodeId(3)]);

        let mut insert = Operation::insert("animal", NodeId(2), Map::new());
        if let Operation::Insert { bindings, .. } = &mut insert {
            bindings.push(Binding {
                column: "ownerId".to_string(),
                target: NodeRef::Pending(NodeId(0)),
            });
        }
        assert_eq!(insert.dependencies(), vec![NodeId(0)]);
        assert!(Operation::delete("animal", 4, 1).dependencies().is_empty());
    }

    #[test]
    fn test_display() {
        let attributes = json!({"age": 71}).as_object().cloned().unwrap();
        assert_eq!(
            Operation::update("person", 3, attributes).to_string(),
            "update person 3 {\"age\":71}"
        );
        assert_eq!(
            Operation::unrelate(EdgeRef::new("person", "movies"), 1, 2).to_string(),
            "unrelate person.movies 1 -> 2"
        );
    }

    #[test]
    fn test_report_counts() {
        let mut report = ExecutionReport::default();
        assert!(report.is_empty());
        report.record(&Operation::delete("animal", 4, 1));
        report.record(&Operation::update("person", 1, Map::new()));
        assert_eq!(report.total(), 2);
        assert_eq!(report.to_string(), "0 inserted, 1 updated, 1 deleted, 0 related, 0 unrelated");
    }
}
