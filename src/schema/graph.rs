//! Relationship graph and join path search.
//!
//! Tables are nodes, relationships are undirected edges. Path search is a
//! layered BFS so that among all shortest paths the tie-break can be applied
//! deterministically, regardless of hash or insertion order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use super::{Cardinality, Relationship, Table};

/// How to choose among several shortest join paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Prefer the path that reuses more already-joined tables, then the
    /// lexicographically smallest sequence of table names.
    #[default]
    PreferJoined,
    /// Only the lexicographic order of table names.
    Lexicographic,
}

/// One join, oriented in traversal direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinStep {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub cardinality: Cardinality,
}

/// A sequence of joins from one table to another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JoinPath {
    pub steps: Vec<JoinStep>,
}

impl JoinPath {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Tables visited after the start, in order.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.to_table.as_str())
    }
}

/// Undirected graph over tables.
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    graph: UnGraph<String, Relationship>,
    node_indices: HashMap<String, NodeIndex>,
}

/// Best known way to reach a node.
struct ParentInfo {
    parent: NodeIndex,
    edge_idx: EdgeIndex,
}

struct Label {
    /// Intermediate or target nodes on the path that are already joined.
    joined: usize,
    /// Table names along the path, excluding the start.
    names: Vec<String>,
    parent: Option<ParentInfo>,
}

impl RelationshipGraph {
    pub(crate) fn build(tables: &[Table], relationships: &[Relationship]) -> Self {
        let mut graph = UnGraph::new_undirected();
        let mut node_indices = HashMap::new();

        for table in tables {
            let idx = graph.add_node(table.name.clone());
            node_indices.insert(table.name.to_lowercase(), idx);
        }

        for rel in relationships {
            let from = node_indices.get(&rel.from_table.to_lowercase());
            let to = node_indices.get(&rel.to_table.to_lowercase());
            if let (Some(&from), Some(&to)) = (from, to) {
                graph.add_edge(from, to, rel.clone());
            }
        }

        Self {
            graph,
            node_indices,
        }
    }

    pub fn table_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn relationship_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Tables directly related to `table`, sorted by name.
    pub fn neighbors(&self, table: &str) -> Vec<String> {
        let Some(&idx) = self.node_indices.get(&table.to_lowercase()) else {
            return Vec::new();
        };
        let names: BTreeSet<String> = self
            .graph
            .neighbors(idx)
            .filter(|&n| n != idx)
            .map(|n| self.graph[n].clone())
            .collect();
        names.into_iter().collect()
    }

    /// Shortest path from `from` to `to` of at most `max_depth` joins.
    ///
    /// `joined` holds the names of tables already in the query; it feeds the
    /// [`TieBreak::PreferJoined`] rule. Returns `None` when no path exists
    /// within the depth limit.
    pub fn shortest_path(
        &self,
        from: &str,
        to: &str,
        joined: &BTreeSet<String>,
        tie_break: TieBreak,
        max_depth: usize,
    ) -> Option<JoinPath> {
        let from_idx = *self.node_indices.get(&from.to_lowercase())?;
        let to_idx = *self.node_indices.get(&to.to_lowercase())?;

        if from_idx == to_idx {
            return Some(JoinPath::default());
        }

        let is_joined = |idx: NodeIndex| {
            let name = &self.graph[idx];
            joined.iter().any(|j| j.eq_ignore_ascii_case(name))
        };

        let mut labels: HashMap<NodeIndex, Label> = HashMap::new();
        labels.insert(
            from_idx,
            Label {
                joined: 0,
                names: Vec::new(),
                parent: None,
            },
        );
        let mut frontier = vec![from_idx];

        for _ in 0..max_depth {
            // BTreeMap keeps the next frontier in node order
            let mut next: BTreeMap<NodeIndex, Label> = BTreeMap::new();

            for &current in &frontier {
                let base = &labels[&current];
                for edge_ref in self.graph.edges(current) {
                    let neighbor = if edge_ref.source() == current {
                        edge_ref.target()
                    } else {
                        edge_ref.source()
                    };
                    if neighbor == current || labels.contains_key(&neighbor) {
                        continue;
                    }

                    let mut names = base.names.clone();
                    names.push(self.graph[neighbor].clone());
                    let candidate = Label {
                        joined: base.joined + usize::from(is_joined(neighbor)),
                        names,
                        parent: Some(ParentInfo {
                            parent: current,
                            edge_idx: edge_ref.id(),
                        }),
                    };

                    let replace = match next.get(&neighbor) {
                        None => true,
                        Some(existing) => {
                            compare_labels(&candidate, existing, tie_break) == Ordering::Less
                        }
                    };
                    if replace {
                        next.insert(neighbor, candidate);
                    }
                }
            }

            if next.is_empty() {
                return None;
            }

            let found = next.contains_key(&to_idx);
            frontier = next.keys().copied().collect();
            labels.extend(next);

            if found {
                return Some(self.reconstruct_path(from_idx, to_idx, &labels));
            }
        }

        None
    }

    fn reconstruct_path(
        &self,
        from_idx: NodeIndex,
        to_idx: NodeIndex,
        labels: &HashMap<NodeIndex, Label>,
    ) -> JoinPath {
        let mut steps = Vec::new();
        let mut current = to_idx;

        while current != from_idx {
            let Some(info) = labels.get(&current).and_then(|l| l.parent.as_ref()) else {
                break;
            };
            let rel = &self.graph[info.edge_idx];
            let parent_name = &self.graph[info.parent];

            let step = if rel.from_table.eq_ignore_ascii_case(parent_name) {
                JoinStep {
                    from_table: rel.from_table.clone(),
                    from_column: rel.from_column.clone(),
                    to_table: rel.to_table.clone(),
                    to_column: rel.to_column.clone(),
                    cardinality: rel.cardinality,
                }
            } else {
                JoinStep {
                    from_table: rel.to_table.clone(),
                    from_column: rel.to_column.clone(),
                    to_table: rel.from_table.clone(),
                    to_column: rel.from_column.clone(),
                    cardinality: rel.cardinality.reverse(),
                }
            };
            steps.push(step);
            current = info.parent;
        }

        steps.reverse();
        JoinPath { steps }
    }
}

/// `Less` means `a` is preferred.
fn compare_labels(a: &Label, b: &Label, tie_break: TieBreak) -> Ordering {
    let joined = match tie_break {
        TieBreak::PreferJoined => b.joined.cmp(&a.joined),
        TieBreak::Lexicographic => Ordering::Equal,
    };
    joined
        .then_with(|| a.names.cmp(&b.names))
        .then_with(|| {
            let edge = |l: &Label| l.parent.as_ref().map(|p| p.edge_idx.index());
            edge(a).cmp(&edge(b))
        })
}
