//! Relation tree produced by the expression parser

use serde::{Deserialize, Serialize};

/// A parsed relation expression
///
/// The tree is immutable once built and holds only owned strings, so a single
/// instance can be shared between concurrent fetches behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationTree {
    /// Top-level relations, in first-mention order
    pub children: Vec<RelationNode>,
}

/// One relation traversal inside a relation tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationNode {
    /// Relation name as declared in the schema
    pub name: String,
    /// Key the relation is exposed under (`name as alias`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Named filters applied to this relation only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<String>,
    /// Nested relations of the related entity
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RelationNode>,
}

impl RelationNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            modifiers: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_modifier(mut self, modifier: impl Into<String>) -> Self {
        self.modifiers.push(modifier.into());
        self
    }

    pub fn with_child(mut self, child: RelationNode) -> Self {
        self.children.push(child);
        self
    }

    /// Key used in graphs for this relation (alias if present)
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Find a nested relation by key
    pub fn child(&self, key: &str) -> Option<&RelationNode> {
        self.children.iter().find(|c| c.key() == key)
    }

    fn depth(&self) -> usize {
        1 + self.children.iter().map(|c| c.depth()).max().unwrap_or(0)
    }

    fn count(&self) -> usize {
        1 + self.children.iter().map(|c| c.count()).sum::<usize>()
    }

    /// Merge another mention of the same relation key into this node
    fn merge(&mut self, other: RelationNode) -> Result<(), String> {
        if self.name != other.name {
            return Err(format!(
                "relation key '{}' refers to both '{}' and '{}'",
                self.key(),
                self.name,
                other.name
            ));
        }

        for modifier in other.modifiers {
            if !self.modifiers.contains(&modifier) {
                self.modifiers.push(modifier);
            }
        }

        for child in other.children {
            merge_into(&mut self.children, child)?;
        }

        Ok(())
    }
}

/// Insert `node` into a sibling list, merging with an existing node of the same key
fn merge_into(siblings: &mut Vec<RelationNode>, node: RelationNode) -> Result<(), String> {
    match siblings.iter_mut().find(|s| s.key() == node.key()) {
        Some(existing) => existing.merge(node),
        None => {
            siblings.push(node);
            Ok(())
        }
    }
}

impl RelationTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Add a top-level relation, merging repeated mentions
    pub fn insert(&mut self, node: RelationNode) -> Result<(), String> {
        merge_into(&mut self.children, node)
    }

    /// Builder-style variant of [`RelationTree::insert`] for code-built trees
    pub fn with(mut self, node: RelationNode) -> Self {
        // Code-built trees never alias two names to one key
        let _ = self.insert(node);
        self
    }

    /// Find a top-level relation by key
    pub fn get(&self, key: &str) -> Option<&RelationNode> {
        self.children.iter().find(|c| c.key() == key)
    }

    /// Longest relation chain in the tree
    pub fn depth(&self) -> usize {
        self.children.iter().map(|c| c.depth()).max().unwrap_or(0)
    }

    /// Total number of relation nodes
    pub fn node_count(&self) -> usize {
        self.children.iter().map(|c| c.count()).sum()
    }
}

impl From<Vec<RelationNode>> for RelationTree {
    fn from(children: Vec<RelationNode>) -> Self {
        Self { children }
    }
}

fn write_list(f: &mut std::fmt::Formatter<'_>, nodes: &[RelationNode]) -> std::fmt::Result {
    write!(f, "[")?;
    for (i, node) in nodes.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", node)?;
    }
    write!(f, "]")
}

impl std::fmt::Display for RelationNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.modifiers.is_empty() {
            write!(f, "({})", self.modifiers.join(", "))?;
        }
        if let Some(alias) = &self.alias {
            write!(f, " as {}", alias)?;
        }
        if !self.children.is_empty() {
            write!(f, ".")?;
            write_list(f, &self.children)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for RelationTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write_list(f, &self.children)
    }
}
