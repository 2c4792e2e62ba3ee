//! Dependency graph logic for ordering entity writes
//!
//! An entity depends on another when its rows hold a foreign key to it.
//! Inserts run dependencies first; deletes run dependents first.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::models::{EntityDef, RelationJoin};

/// Dependency graph between entity types
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Adjacency list: entity -> entities it depends on (has foreign keys to)
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
    /// Reverse adjacency: entity -> entities that depend on it
    pub dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build the graph from entity relation definitions
    pub fn build<'a>(entities: impl IntoIterator<Item = &'a EntityDef>) -> Self {
        let mut graph = DependencyGraph::default();

        for entity in entities {
            graph.dependencies.entry(entity.name.clone()).or_default();
            graph.dependents.entry(entity.name.clone()).or_default();

            for relation in entity.relations.values() {
                // (holder of the foreign key, referenced entity)
                let (holder, referenced) = match &relation.join {
                    RelationJoin::BelongsToOne { .. } => (&relation.source, &relation.target),
                    RelationJoin::HasOne { .. } | RelationJoin::HasMany { .. } => {
                        (&relation.target, &relation.source)
                    }
                    // Join rows depend on both ends, entity rows on neither
                    RelationJoin::ManyToMany { .. } => continue,
                };

                // Self-references don't create an ordering constraint between types
                if holder == referenced {
                    continue;
                }

                graph
                    .dependencies
                    .entry(holder.clone())
                    .or_default()
                    .insert(referenced.clone());
                graph
                    .dependents
                    .entry(referenced.clone())
                    .or_default()
                    .insert(holder.clone());
            }
        }

        graph
    }

    /// Perform topological sort using Kahn's algorithm
    /// Returns entities in insert order (dependencies first)
    pub fn topological_sort(&self) -> Result<Vec<String>, CycleError> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .dependencies
            .iter()
            .map(|(name, deps)| (name.as_str(), deps.len()))
            .collect();

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut result = Vec::new();

        while let Some(entity) = queue.pop_front() {
            result.push(entity.to_string());

            if let Some(dependents) = self.dependents.get(entity) {
                for dependent in dependents {
                    if let Some(count) = in_degree.get_mut(dependent.as_str()) {
                        *count -= 1;
                        if *count == 0 {
                            queue.push_back(dependent.as_str());
                        }
                    }
                }
            }
        }

        if result.len() != self.dependencies.len() {
            let remaining = self
                .dependencies
                .keys()
                .filter(|e| !result.contains(e))
                .cloned()
                .collect();
            return Err(CycleError { entities: remaining });
        }

        Ok(result)
    }

    /// Insert order, tolerating cycles
    ///
    /// Entities caught in a cycle are appended by name; their relative order is
    /// then left to the per-row dependencies the executor tracks.
    pub fn insert_order(&self) -> Vec<String> {
        match self.topological_sort() {
            Ok(order) => order,
            Err(err) => {
                log::warn!("{}; falling back to name order for those entities", err);
                let mut order: Vec<String> = Vec::new();
                let cyclic: BTreeSet<&String> = err.entities.iter().collect();
                let mut graph = self.clone();
                for name in &cyclic {
                    graph.dependencies.remove(*name);
                }
                for deps in graph.dependencies.values_mut() {
                    deps.retain(|d| !cyclic.contains(d));
                }
                if let Ok(acyclic) = graph.topological_sort() {
                    order.extend(acyclic);
                }
                order.extend(err.entities);
                order
            }
        }
    }
}

/// Error when a cycle is detected in the dependency graph
#[derive(Debug, Clone)]
pub struct CycleError {
    pub entities: Vec<String>,
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Circular dependency detected involving: {}", self.entities.join(", "))
    }
}

impl std::error::Error for CycleError {}
