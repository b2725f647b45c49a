//! Reversible graph surgery.
//!
//! [`InterventionManager`] applies do-interventions, edge additions and
//! removals, node replacements and twin-network construction to a
//! caller-owned [`Network`],
//! keeping a journal of what it changed. The manager never holds on to
//! the network between calls; every apply and reverse borrows it anew.
//! [`InterventionManager::reverse_all`] undoes the journal last-in
//! first-out, so non-commuting mutations on the same node unwind exactly.

use std::collections::HashMap;

use causal_core::{CausalError, LabeledMatrix};

use crate::network::Network;
use crate::node::Node;

/// One mutation of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intervention {
    /// Force `id` to the value at index `value` and cut its incoming edges.
    Do { id: u32, value: usize },
    /// Draw `source → target`.
    AddEdge { source: u32, target: u32 },
    /// Clear `source → target`.
    RemoveEdge { source: u32, target: u32 },
}

/// Factual node id → id of its hypothetical twin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TwinMap {
    twins: HashMap<u32, u32>,
}

impl TwinMap {
    /// The twin of `factual`, if it was duplicated.
    pub fn get(&self, factual: u32) -> Option<u32> {
        self.twins.get(&factual).copied()
    }

    /// The factual node that `twin` was copied from.
    pub fn factual_of(&self, twin: u32) -> Option<u32> {
        self.twins
            .iter()
            .find(|(_, &t)| t == twin)
            .map(|(&f, _)| f)
    }

    /// The twin of `id`, or `id` itself when it is shared background.
    pub fn resolve(&self, id: u32) -> u32 {
        self.get(id).unwrap_or(id)
    }

    pub fn len(&self) -> usize {
        self.twins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.twins.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.twins.iter().map(|(&f, &t)| (f, t))
    }
}

/// Journal entry holding exactly what is needed to undo one mutation.
#[derive(Debug, Clone)]
enum Applied {
    Do {
        id: u32,
        cut: Vec<u32>,
        previous: Option<usize>,
    },
    Edge {
        source: u32,
        target: u32,
        existed: bool,
    },
    Twin {
        len: usize,
        adjacency: LabeledMatrix<u32>,
    },
    Replace {
        previous: Box<Node>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct InterventionManager {
    journal: Vec<Applied>,
}

impl InterventionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutations awaiting reversal.
    pub fn pending(&self) -> usize {
        self.journal.len()
    }

    pub fn apply(&mut self, net: &mut Network, intervention: Intervention) -> Result<(), CausalError> {
        tracing::debug!("Applying {:?}", intervention);
        match intervention {
            Intervention::Do { id, value } => {
                let node = net.node(id)?;
                if value >= node.value_count() {
                    return Err(CausalError::IndexOutOfRange {
                        row: 0,
                        col: value,
                        rows: node.number_of_parent_values(),
                        cols: node.value_count(),
                    });
                }
                let previous = node.forced();
                let cut = net.cut_parents(id)?;
                net.node_mut(id)?.set_forced(Some(value));
                self.journal.push(Applied::Do { id, cut, previous });
            }
            Intervention::AddEdge { source, target } => {
                let existed = net.has_edge(target, source)?;
                net.add_edge(target, source)?;
                self.journal.push(Applied::Edge {
                    source,
                    target,
                    existed,
                });
            }
            Intervention::RemoveEdge { source, target } => {
                let existed = net.has_edge(target, source)?;
                net.remove_edge(target, source)?;
                self.journal.push(Applied::Edge {
                    source,
                    target,
                    existed,
                });
            }
        }
        Ok(())
    }

    /// Duplicate every node reachable from `intervened` as a hypothetical
    /// twin.
    ///
    /// Twins get fresh ids above the current maximum and the factual name
    /// with a trailing `'`. A twin's parents are the twins of its factual
    /// parents where those were duplicated, and the shared factual parents
    /// otherwise, so both worlds read the same background nodes. Factual
    /// nodes are left untouched.
    pub fn build_twin(&mut self, net: &mut Network, intervened: &[u32]) -> Result<TwinMap, CausalError> {
        let len = net.len();
        let adjacency = net.adjacency().clone();
        match Self::duplicate(net, intervened) {
            Ok(map) => {
                tracing::debug!("Built twin network with {} hypothetical nodes", map.len());
                self.journal.push(Applied::Twin { len, adjacency });
                Ok(map)
            }
            Err(err) => {
                net.truncate(len, adjacency);
                Err(err)
            }
        }
    }

    fn duplicate(net: &mut Network, intervened: &[u32]) -> Result<TwinMap, CausalError> {
        let reached = net.descendants(intervened)?;
        let mut next = net.max_id().map_or(0, |id| id + 1);
        let mut map = TwinMap::default();
        for &id in &reached {
            map.twins.insert(id, next);
            next += 1;
        }

        let mut edges = Vec::new();
        for &id in &reached {
            let twin_id = map.resolve(id);
            let node = net.node(id)?;
            let cpt_parents = node.parent_ids().iter().map(|&p| map.resolve(p)).collect();
            let twin = node.twin(twin_id, format!("{}'", node.name()), cpt_parents);
            for parent in net.parents(id)? {
                edges.push((twin_id, map.resolve(parent)));
            }
            net.push_node(twin)?;
        }
        for (target, source) in edges {
            net.add_edge(target, source)?;
        }
        Ok(map)
    }

    /// Swap `node` in for the node with the same id and name, such as a
    /// copy whose CPT was re-fitted over a new parent.
    pub(crate) fn replace_node(&mut self, net: &mut Network, node: Node) -> Result<(), CausalError> {
        let slot = net.node_mut(node.id())?;
        if slot.name() != node.name() {
            return Err(CausalError::NameNotFound {
                name: node.name().to_string(),
            });
        }
        tracing::debug!("Replacing tables of {}", node.name());
        let previous = std::mem::replace(slot, node);
        self.journal.push(Applied::Replace {
            previous: Box::new(previous),
        });
        Ok(())
    }

    /// Undo the most recent mutation. Returns `false` if nothing was pending.
    pub fn reverse_last(&mut self, net: &mut Network) -> Result<bool, CausalError> {
        let Some(applied) = self.journal.pop() else {
            return Ok(false);
        };
        tracing::debug!("Reversing {:?}", applied);
        match applied {
            Applied::Do { id, cut, previous } => {
                for parent in cut {
                    net.add_edge(id, parent)?;
                }
                net.node_mut(id)?.set_forced(previous);
            }
            Applied::Edge {
                source,
                target,
                existed,
            } => {
                if existed {
                    net.add_edge(target, source)?;
                } else {
                    net.remove_edge(target, source)?;
                }
            }
            Applied::Twin { len, adjacency } => net.truncate(len, adjacency),
            Applied::Replace { previous } => {
                let slot = net.node_mut(previous.id())?;
                *slot = *previous;
            }
        }
        Ok(true)
    }

    /// Undo every pending mutation, newest first.
    ///
    /// A failing step is logged and skipped so the rest still unwind; the
    /// first failure is returned.
    pub fn reverse_all(&mut self, net: &mut Network) -> Result<(), CausalError> {
        let mut first_err = None;
        while !self.journal.is_empty() {
            if let Err(err) = self.reverse_last(net) {
                tracing::warn!("Failed to reverse intervention: {}", err);
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}
