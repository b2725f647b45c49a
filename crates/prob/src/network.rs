//! Directed networks of discrete random variables.
//!
//! A [`Network`] owns its nodes and a square adjacency matrix where
//! `adjacency[child][parent] == 1` iff the edge `parent → child` exists.
//! Row and column names of the adjacency are the stringified node ids,
//! and matrix index order equals node insertion order.
//!
//! Networks are read from three textual formats, selected by file
//! extension through [`NetworkFormat`]:
//!
//! ```text
//! .tgf   <id> <name> lines, a "#" line, then <targetId> <sourceId> edges
//! .na    a header line, then <id> <ignored> <name> lines (nodes only)
//! .sif   <targetId> <relation> <sourceId> edges onto already-loaded nodes
//! ```
//!
//! The edge mutators double as the intervention primitives used by
//! [`crate::InterventionManager`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use causal_core::{CausalError, LabeledMatrix};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use crate::node::Node;

/// Textual network formats understood by [`Network::read_network`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkFormat {
    /// Trivial graph format: nodes, a `#` separator, then edges.
    TrivialGraph,
    /// Node attribute file: nodes only.
    NodeAttribute,
    /// Simple interaction format: edges onto existing nodes.
    SimpleInteraction,
}

impl NetworkFormat {
    /// Select a format from an extension, with or without the leading dot.
    pub fn from_extension(extension: &str) -> Result<Self, CausalError> {
        match extension.trim_start_matches('.') {
            "tgf" => Ok(Self::TrivialGraph),
            "na" => Ok(Self::NodeAttribute),
            "sif" => Ok(Self::SimpleInteraction),
            other => Err(CausalError::UnsupportedFormat {
                extension: other.to_string(),
            }),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, CausalError> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        Self::from_extension(extension)
    }
}

/// A directed acyclic graph of [`Node`]s with an adjacency matrix.
#[derive(Debug, Clone, Default)]
pub struct Network {
    nodes: Vec<Node>,
    id_to_index: HashMap<u32, usize>,
    name_to_index: HashMap<String, usize>,
    adjacency: LabeledMatrix<u32>,
}

impl Network {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a network file, dispatching on its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CausalError> {
        let mut net = Self::new();
        net.read_network(path)?;
        Ok(net)
    }

    /// Read a network file into this network, dispatching on its extension.
    ///
    /// `.tgf` and `.na` replace all nodes and edges; `.sif` adds edges to
    /// the nodes already present.
    pub fn read_network(&mut self, path: impl AsRef<Path>) -> Result<(), CausalError> {
        let path = path.as_ref();
        let format = NetworkFormat::from_path(path)?;
        let text = fs::read_to_string(path).map_err(|e| CausalError::unreadable(path, &e))?;
        match format {
            NetworkFormat::TrivialGraph => self.load_tgf(&text)?,
            NetworkFormat::NodeAttribute => self.load_na(&text)?,
            NetworkFormat::SimpleInteraction => self.load_sif(&text)?,
        }
        tracing::info!(
            "Read {:?} from {:?}: {} nodes, {} edges",
            format,
            path,
            self.len(),
            self.edge_count()
        );
        Ok(())
    }

    /// Replace the network with the trivial-graph document `text`.
    pub fn load_tgf(&mut self, text: &str) -> Result<(), CausalError> {
        self.clear();
        let mut lines = numbered_lines(text);
        for (line_no, tokens) in lines.by_ref() {
            if tokens == ["#"] {
                break;
            }
            let (id, name) = node_fields(line_no, &tokens, 0, 1)?;
            self.add_node(id, name)?;
        }
        for (line_no, tokens) in lines {
            let (target, source) = edge_fields(line_no, &tokens, 0, 1)?;
            self.add_edge(target, source)?;
        }
        Ok(())
    }

    /// Replace the network with the nodes of the node-attribute document `text`.
    pub fn load_na(&mut self, text: &str) -> Result<(), CausalError> {
        self.clear();
        let body = text.lines().skip(1).collect::<Vec<_>>().join("\n");
        for (line_no, tokens) in numbered_lines(&body) {
            let (id, name) = node_fields(line_no + 1, &tokens, 0, 2)?;
            self.add_node(id, name)?;
        }
        Ok(())
    }

    /// Add the edges of the simple-interaction document `text`.
    ///
    /// # Errors
    ///
    /// [`CausalError::MissingPrerequisite`] if no nodes are loaded.
    pub fn load_sif(&mut self, text: &str) -> Result<(), CausalError> {
        if self.nodes.is_empty() {
            return Err(CausalError::MissingPrerequisite {
                reason: "a node attribute (.na) file must be read before a .sif file".into(),
            });
        }
        for (line_no, tokens) in numbered_lines(text) {
            let (target, source) = edge_fields(line_no, &tokens, 0, 2)?;
            self.add_edge(target, source)?;
        }
        Ok(())
    }

    /// Remove all nodes and edges.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.id_to_index.clear();
        self.name_to_index.clear();
        self.adjacency.clear();
    }

    /// Append a node without tables, growing the adjacency matrix.
    pub fn add_node(&mut self, id: u32, name: impl Into<String>) -> Result<usize, CausalError> {
        self.push_node(Node::new(id, name))
    }

    pub(crate) fn push_node(&mut self, node: Node) -> Result<usize, CausalError> {
        if self.id_to_index.contains_key(&node.id()) || self.name_to_index.contains_key(node.name()) {
            return Err(CausalError::DuplicateNode {
                id: node.id(),
                name: node.name().to_string(),
            });
        }
        let index = self.nodes.len();
        let n = index + 1;
        self.adjacency.resize(n, n, 0)?;
        let mut names = self.adjacency.row_names().to_vec();
        names.push(node.id().to_string());
        self.adjacency.set_row_names(names.clone())?;
        self.adjacency.set_col_names(names)?;
        self.id_to_index.insert(node.id(), index);
        self.name_to_index.insert(node.name().to_string(), index);
        self.nodes.push(node);
        Ok(index)
    }

    /// Drop every node from position `len` on and reinstate `adjacency`.
    pub(crate) fn truncate(&mut self, len: usize, adjacency: LabeledMatrix<u32>) {
        for node in self.nodes.drain(len..) {
            self.id_to_index.remove(&node.id());
            self.name_to_index.remove(node.name());
        }
        self.adjacency = adjacency;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Matrix index of the node with identifier `id`.
    pub fn index_of(&self, id: u32) -> Result<usize, CausalError> {
        self.id_to_index
            .get(&id)
            .copied()
            .ok_or(CausalError::IdNotFound { id })
    }

    /// Matrix index of the node called `name`.
    pub fn index_of_name(&self, name: &str) -> Result<usize, CausalError> {
        self.name_to_index
            .get(name)
            .copied()
            .ok_or_else(|| CausalError::NameNotFound {
                name: name.to_string(),
            })
    }

    pub fn node(&self, id: u32) -> Result<&Node, CausalError> {
        Ok(&self.nodes[self.index_of(id)?])
    }

    pub fn node_by_name(&self, name: &str) -> Result<&Node, CausalError> {
        Ok(&self.nodes[self.index_of_name(name)?])
    }

    pub fn node_mut(&mut self, id: u32) -> Result<&mut Node, CausalError> {
        let index = self.index_of(id)?;
        Ok(&mut self.nodes[index])
    }

    /// Nodes in matrix index order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn adjacency(&self) -> &LabeledMatrix<u32> {
        &self.adjacency
    }

    /// Largest node identifier, if any node exists.
    pub fn max_id(&self) -> Option<u32> {
        self.nodes.iter().map(Node::id).max()
    }

    /// Identifiers of the current parents of `id`, in index order.
    pub fn parents(&self, id: u32) -> Result<Vec<u32>, CausalError> {
        let index = self.index_of(id)?;
        Ok(self
            .adjacency
            .row(index)?
            .iter()
            .enumerate()
            .filter(|(_, &cell)| cell == 1)
            .map(|(col, _)| self.nodes[col].id())
            .collect())
    }

    pub fn parents_by_name(&self, name: &str) -> Result<Vec<u32>, CausalError> {
        self.parents(self.node_by_name(name)?.id())
    }

    /// Identifiers of the current children of `id`, in index order.
    pub fn children(&self, id: u32) -> Result<Vec<u32>, CausalError> {
        let index = self.index_of(id)?;
        let mut children = Vec::new();
        for (row, node) in self.nodes.iter().enumerate() {
            if *self.adjacency.get(row, index)? == 1 {
                children.push(node.id());
            }
        }
        Ok(children)
    }

    /// True if the edge `source → target` exists.
    pub fn has_edge(&self, target: u32, source: u32) -> Result<bool, CausalError> {
        Ok(*self
            .adjacency
            .get(self.index_of(target)?, self.index_of(source)?)?
            == 1)
    }

    pub fn edge_count(&self) -> usize {
        (0..self.adjacency.rows())
            .filter_map(|row| self.adjacency.count_in_row(row, &1).ok())
            .sum()
    }

    /// Remove every incoming edge of `id`, returning the parents that were cut.
    pub fn cut_parents(&mut self, id: u32) -> Result<Vec<u32>, CausalError> {
        let parents = self.parents(id)?;
        for &parent in &parents {
            self.remove_edge(id, parent)?;
        }
        Ok(parents)
    }

    pub fn cut_parents_by_name(&mut self, name: &str) -> Result<Vec<u32>, CausalError> {
        self.cut_parents(self.node_by_name(name)?.id())
    }

    /// Draw the edge `source → target`.
    pub fn add_edge(&mut self, target: u32, source: u32) -> Result<(), CausalError> {
        let (row, col) = (self.index_of(target)?, self.index_of(source)?);
        self.adjacency.set(row, col, 1)
    }

    pub fn add_edge_by_name(&mut self, target: &str, source: &str) -> Result<(), CausalError> {
        let (target, source) = (self.node_by_name(target)?.id(), self.node_by_name(source)?.id());
        self.add_edge(target, source)
    }

    /// Clear the edge `source → target`.
    pub fn remove_edge(&mut self, target: u32, source: u32) -> Result<(), CausalError> {
        let (row, col) = (self.index_of(target)?, self.index_of(source)?);
        self.adjacency.set(row, col, 0)
    }

    pub fn remove_edge_by_name(&mut self, target: &str, source: &str) -> Result<(), CausalError> {
        let (target, source) = (self.node_by_name(target)?.id(), self.node_by_name(source)?.id());
        self.remove_edge(target, source)
    }

    fn graph(&self) -> DiGraph<u32, ()> {
        let mut graph = DiGraph::with_capacity(self.nodes.len(), self.edge_count());
        for node in &self.nodes {
            graph.add_node(node.id());
        }
        for child in 0..self.nodes.len() {
            for parent in 0..self.nodes.len() {
                if self.adjacency.get(child, parent).map_or(false, |&c| c == 1) {
                    graph.add_edge(NodeIndex::new(parent), NodeIndex::new(child), ());
                }
            }
        }
        graph
    }

    /// Verify the current structure has no directed cycle.
    pub fn check_acyclic(&self) -> Result<(), CausalError> {
        let graph = self.graph();
        petgraph::algo::toposort(&graph, None)
            .map(|_| ())
            .map_err(|cycle| CausalError::CycleDetected {
                id: graph[cycle.node_id()],
            })
    }

    /// `ids` and every node reachable from them, in index order.
    pub fn descendants(&self, ids: &[u32]) -> Result<Vec<u32>, CausalError> {
        let graph = self.graph();
        let mut reached = HashSet::new();
        for &id in ids {
            let mut dfs = Dfs::new(&graph, NodeIndex::new(self.index_of(id)?));
            while let Some(ix) = dfs.next(&graph) {
                reached.insert(ix.index());
            }
        }
        let mut indices: Vec<usize> = reached.into_iter().collect();
        indices.sort_unstable();
        Ok(indices.into_iter().map(|i| self.nodes[i].id()).collect())
    }

    /// Give every node its value domain and empty CPT/observation tables,
    /// laid out over its current parents.
    ///
    /// `domains` maps each node id to its value labels and whether the node
    /// has missing observations.
    pub fn configure_tables(
        &mut self,
        domains: &HashMap<u32, (Vec<String>, bool)>,
    ) -> Result<(), CausalError> {
        let missing = |id: u32| CausalError::MissingPrerequisite {
            reason: format!("no value domain for node {}", id),
        };
        for index in 0..self.nodes.len() {
            let id = self.nodes[index].id();
            let parents = self.parents(id)?;
            let mut layout: Vec<(u32, &[String])> = Vec::with_capacity(parents.len());
            for parent in parents {
                let (labels, _) = domains.get(&parent).ok_or_else(|| missing(parent))?;
                layout.push((parent, labels.as_slice()));
            }
            let (values, with_missing) = domains.get(&id).ok_or_else(|| missing(id))?;
            self.nodes[index].shape_tables(values.clone(), &layout, *with_missing)?;
        }
        Ok(())
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.adjacency)
    }
}

fn numbered_lines(text: &str) -> impl Iterator<Item = (usize, Vec<&str>)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.split_whitespace().collect::<Vec<_>>()))
        .filter(|(_, tokens)| !tokens.is_empty())
}

fn malformed(line: usize, tokens: &[&str]) -> CausalError {
    CausalError::MalformedLine {
        line,
        content: tokens.join(" "),
    }
}

fn parse_id(line: usize, tokens: &[&str], at: usize) -> Result<u32, CausalError> {
    tokens
        .get(at)
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| malformed(line, tokens))
}

fn node_fields<'t>(
    line: usize,
    tokens: &[&'t str],
    id_at: usize,
    name_at: usize,
) -> Result<(u32, &'t str), CausalError> {
    let id = parse_id(line, tokens, id_at)?;
    let name = tokens.get(name_at).ok_or_else(|| malformed(line, tokens))?;
    Ok((id, *name))
}

fn edge_fields(
    line: usize,
    tokens: &[&str],
    target_at: usize,
    source_at: usize,
) -> Result<(u32, u32), CausalError> {
    Ok((parse_id(line, tokens, target_at)?, parse_id(line, tokens, source_at)?))
}

/// Create a classic "sprinkler" network with hand-set CPTs.
///
/// Structure (ids in brackets, all variables binary `0`/`1`):
/// ```text
///      Cloudy [1]
///      ↙      ↘
/// Sprinkler [2] Rain [3]
///        ↘     ↙
///      WetGrass [4]
/// ```
pub fn sprinkler_network() -> Result<Network, CausalError> {
    let mut net = Network::new();
    net.load_tgf("1 Cloudy\n2 Sprinkler\n3 Rain\n4 WetGrass\n#\n2 1\n3 1\n4 2\n4 3\n")?;
    let binary = || (vec!["0".to_string(), "1".to_string()], false);
    let domains = (1..=4).map(|id| (id, binary())).collect();
    net.configure_tables(&domains)?;

    net.node_mut(1)?.set_distribution(0, &[0.5, 0.5])?;

    let sprinkler = net.node_mut(2)?;
    sprinkler.set_distribution(0, &[0.5, 0.5])?; // Not cloudy: 50% sprinkler
    sprinkler.set_distribution(1, &[0.9, 0.1])?; // Cloudy: 10% sprinkler

    let rain = net.node_mut(3)?;
    rain.set_distribution(0, &[0.8, 0.2])?;
    rain.set_distribution(1, &[0.2, 0.8])?;

    // Rows: S*2 + R
    let wet = net.node_mut(4)?;
    wet.set_distribution(0, &[1.0, 0.0])?;
    wet.set_distribution(1, &[0.2, 0.8])?;
    wet.set_distribution(2, &[0.1, 0.9])?;
    wet.set_distribution(3, &[0.01, 0.99])?;

    Ok(net)
}

/// Create a three-node chain `A [1] → B [2] → C [3]` with binary values.
pub fn chain_network() -> Result<Network, CausalError> {
    let mut net = Network::new();
    net.load_tgf("1 A\n2 B\n3 C\n#\n2 1\n3 2\n")?;
    let binary = || (vec!["0".to_string(), "1".to_string()], false);
    let domains = (1..=3).map(|id| (id, binary())).collect();
    net.configure_tables(&domains)?;

    net.node_mut(1)?.set_distribution(0, &[0.6, 0.4])?;
    let b = net.node_mut(2)?;
    b.set_distribution(0, &[0.7, 0.3])?;
    b.set_distribution(1, &[0.2, 0.8])?;
    let c = net.node_mut(3)?;
    c.set_distribution(0, &[0.9, 0.1])?;
    c.set_distribution(1, &[0.4, 0.6])?;

    Ok(net)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_selection() {
        assert_eq!(NetworkFormat::from_extension(".tgf").unwrap(), NetworkFormat::TrivialGraph);
        assert_eq!(NetworkFormat::from_extension("na").unwrap(), NetworkFormat::NodeAttribute);
        assert_eq!(
            NetworkFormat::from_path(Path::new("net/graph.sif")).unwrap(),
            NetworkFormat::SimpleInteraction
        );
        assert!(matches!(
            NetworkFormat::from_extension(".csv"),
            Err(CausalError::UnsupportedFormat { .. })
        ));
        assert!(NetworkFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn test_tgf_edges_are_target_then_source() {
        let mut net = Network::new();
        net.load_tgf("10 A\n20 B\n30 C\n#\n20 10\n30 20\n30 10\n").unwrap();

        assert_eq!(net.len(), 3);
        assert_eq!(net.edge_count(), 3);
        assert!(net.has_edge(20, 10).unwrap());
        assert!(!net.has_edge(10, 20).unwrap());
        assert_eq!(*net.adjacency().get(2, 0).unwrap(), 1);
        assert_eq!(net.parents(30).unwrap(), vec![10, 20]);
        assert_eq!(net.children(10).unwrap(), vec![20, 30]);
        assert_eq!(net.adjacency().row_names()[1], "20");
    }

    #[test]
    fn test_tgf_replaces_previous_content() {
        let mut net = Network::new();
        net.load_tgf("1 A\n2 B\n#\n2 1\n").unwrap();
        net.load_tgf("5 E\n#\n").unwrap();
        assert_eq!(net.len(), 1);
        assert!(matches!(net.index_of(1), Err(CausalError::IdNotFound { id: 1 })));
        assert_eq!(net.index_of_name("E").unwrap(), 0);
        assert_eq!(net.edge_count(), 0);
    }

    #[test]
    fn test_na_then_sif() {
        let mut net = Network::new();
        net.load_na("id\tshared\tname\n1 = Smoking\n2 = Tar\n3 = Cancer\n").unwrap();
        assert_eq!(net.len(), 3);
        assert_eq!(net.edge_count(), 0);
        assert_eq!(net.node(3).unwrap().name(), "Cancer");

        net.load_sif("2 pp 1\n3 pp 2\n").unwrap();
        assert_eq!(net.edge_count(), 2);
        assert_eq!(net.parents_by_name("Cancer").unwrap(), vec![2]);
        assert_eq!(net.len(), 3);
    }

    #[test]
    fn test_sif_requires_nodes() {
        let mut net = Network::new();
        assert!(matches!(
            net.load_sif("2 pp 1\n"),
            Err(CausalError::MissingPrerequisite { .. })
        ));
    }

    #[test]
    fn test_malformed_lines() {
        let mut net = Network::new();
        assert_eq!(
            net.load_tgf("1 A\nB\n#\n").unwrap_err(),
            CausalError::MalformedLine {
                line: 2,
                content: "B".into()
            }
        );
        assert!(matches!(
            net.load_tgf("1 A\n2 B\n#\n2\n"),
            Err(CausalError::MalformedLine { line: 4, .. })
        ));
        assert!(matches!(
            net.load_tgf("1 A\n#\n1 9\n"),
            Err(CausalError::IdNotFound { id: 9 })
        ));
    }

    #[test]
    fn test_duplicate_nodes_rejected() {
        let mut net = Network::new();
        net.add_node(1, "A").unwrap();
        assert!(matches!(net.add_node(1, "B"), Err(CausalError::DuplicateNode { .. })));
        assert!(matches!(net.add_node(2, "A"), Err(CausalError::DuplicateNode { .. })));
    }

    #[test]
    fn test_cut_parents_only_touches_incoming_edges() {
        let mut net = sprinkler_network().unwrap();
        let before = net.adjacency().clone();

        let cut = net.cut_parents(4).unwrap();
        assert_eq!(cut, vec![2, 3]);
        assert!(net.parents(4).unwrap().is_empty());

        for row in 0..4 {
            for col in 0..4 {
                let expected = if row == 3 { 0 } else { *before.get(row, col).unwrap() };
                assert_eq!(*net.adjacency().get(row, col).unwrap(), expected);
            }
        }
    }

    #[test]
    fn test_add_and_remove_edge() {
        let mut net = chain_network().unwrap();
        net.add_edge(3, 1).unwrap();
        assert!(net.parents(3).unwrap().contains(&1));
        net.remove_edge_by_name("C", "A").unwrap();
        assert_eq!(net.parents(3).unwrap(), vec![2]);
        net.add_edge_by_name("A", "C").unwrap();
        assert!(matches!(net.check_acyclic(), Err(CausalError::CycleDetected { .. })));
    }

    #[test]
    fn test_descendants() {
        let net = sprinkler_network().unwrap();
        assert_eq!(net.descendants(&[2]).unwrap(), vec![2, 4]);
        assert_eq!(net.descendants(&[1]).unwrap(), vec![1, 2, 3, 4]);
        assert!(net.check_acyclic().is_ok());
    }

    #[test]
    fn test_configure_tables_uses_current_parents() {
        let net = sprinkler_network().unwrap();
        let wet = net.node(4).unwrap();
        assert_eq!(wet.parent_ids(), &[2, 3]);
        assert_eq!(wet.number_of_parent_values(), 4);
        assert_eq!(net.node(1).unwrap().number_of_parent_values(), 1);
    }

    #[test]
    fn test_dump() {
        let net = chain_network().unwrap();
        let dump = net.to_string();
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines[0], "\t1\t2\t3\t");
        assert_eq!(lines[2], "2\t1\t0\t0\t");
    }
}
