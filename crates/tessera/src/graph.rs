//! Dependency ordering across registered mappings.
//!
//! Relations make one mapping depend on another (the foreign side must
//! exist before join rows can point at it). [`DependencyGraph`] derives a
//! topological order over the registry so schema setup and bulk loads can
//! run foreign-side-first.

use crate::error::{OrmError, OrmResult};
use crate::mapping::Mapping;
use crate::registry::MappingRegistry;
use std::any::TypeId;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

pub struct DependencyGraph {
    nodes: Vec<Arc<Mapping>>,
    /// edges[i] lists indices that depend on node i.
    edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build the graph over every mapping in `registry`.
    ///
    /// Self-references are fine (a node cannot usefully precede itself)
    /// and are dropped rather than reported as cycles.
    pub fn from_registry(registry: &MappingRegistry) -> Self {
        let nodes = registry.all();
        let index: HashMap<TypeId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, m)| (m.type_id(), i))
            .collect();

        let mut edges = vec![Vec::new(); nodes.len()];
        for (i, mapping) in nodes.iter().enumerate() {
            for relation in &mapping.relations {
                match index.get(&relation.foreign) {
                    Some(&j) if j != i => edges[j].push(i),
                    _ => {}
                }
            }
        }
        Self { nodes, edges }
    }

    /// Mappings in dependency order: every mapping appears after the
    /// mappings its relations point at. Errors if the relations form a
    /// cycle between distinct types.
    pub fn topo_order(&self) -> OrmResult<Vec<Arc<Mapping>>> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        for targets in &self.edges {
            for &t in targets {
                in_degree[t] += 1;
            }
        }

        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(i) = queue.pop_front() {
            order.push(Arc::clone(&self.nodes[i]));
            for &t in &self.edges[i] {
                in_degree[t] -= 1;
                if in_degree[t] == 0 {
                    queue.push_back(t);
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck: Vec<&str> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, &d)| d > 0)
                .map(|(i, _)| self.nodes[i].type_name())
                .collect();
            return Err(OrmError::mapping(format!(
                "relation cycle between: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[derive(Default)]
    struct Author {
        id: i64,
        posts: Vec<Post>,
    }

    #[derive(Default)]
    struct Post {
        id: i64,
        tags: Vec<Tag>,
    }

    #[derive(Default)]
    struct Tag {
        id: i64,
    }

    fn registry() -> MappingRegistry {
        let registry = MappingRegistry::new();
        registry
            .register_with::<Tag, _>("tags", |b| {
                b.auto_id("id", "id", |t| t.id, |t, v| t.id = v)
            })
            .unwrap();
        registry
            .register_with::<Post, _>("posts", |b| {
                b.auto_id("id", "id", |p| p.id, |p, v| p.id = v)
                    .many_to_many::<Tag>(
                        "tags",
                        "posts_tags",
                        false,
                        |p| p.tags.iter().collect(),
                        |p| p.tags.iter_mut().collect(),
                        |t| Value::Int(t.id),
                    )
            })
            .unwrap();
        registry
            .register_with::<Author, _>("authors", |b| {
                b.auto_id("id", "id", |a| a.id, |a, v| a.id = v)
                    .many_to_one::<Post>(
                        "posts",
                        "authors_posts",
                        false,
                        |a| a.posts.iter().collect(),
                        |a| a.posts.iter_mut().collect(),
                        |p| Value::Int(p.id),
                    )
            })
            .unwrap();
        registry
    }

    #[test]
    fn foreign_side_orders_first() {
        let graph = DependencyGraph::from_registry(&registry());
        let order = graph.topo_order().unwrap();
        let names: Vec<&str> = order.iter().map(|m| m.table_name.as_str()).collect();

        let pos = |t: &str| names.iter().position(|n| *n == t).unwrap();
        assert!(pos("tags") < pos("posts"));
        assert!(pos("posts") < pos("authors"));
    }

    #[test]
    fn self_reference_is_not_a_cycle() {
        let registry = MappingRegistry::new();
        registry
            .register_with::<Post, _>("posts", |b| {
                b.auto_id("id", "id", |p| p.id, |p, v| p.id = v)
                    .many_to_many::<Post>(
                        "related",
                        "posts_posts",
                        false,
                        |_| Vec::new(),
                        |_| Vec::new(),
                        |p| Value::Int(p.id),
                    )
            })
            .unwrap();
        let order = DependencyGraph::from_registry(&registry).topo_order().unwrap();
        assert_eq!(order.len(), 1);
    }
}
