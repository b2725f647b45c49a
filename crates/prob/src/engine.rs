//! Exact probability evaluation over the network's current structure.
//!
//! The engine reads a [`Network`] as it currently stands, including any
//! interventions applied to it, and answers three kinds of question:
//! - total probability P(X=x)
//! - joint and conditional probabilities over sets of assignments
//! - MAP (argmax) assignments over a target set
//!
//! A joint probability is computed by enumeration over the ancestral
//! closure of the assigned nodes: every value combination of the
//! unassigned ancestors is weighted by the product of each node's CPT
//! entry given its parents, and the weights are summed. Ancestors shared
//! by several assigned nodes are summed over once, together.
//!
//! Each node's factor follows the live structure:
//! - a forced node is a point mass with no parents
//! - a CPT parent still joined by an edge is summed over jointly
//! - a CPT parent whose edge was removed or cut is replaced by its prior
//!   marginal, so no evidence reaches the node through that parent
//! - an edge to a parent outside the CPT layout carries no weight until
//!   the CPT is re-fitted over it
//!
//! Key insight: a do-intervention cuts the node's incoming edges, so the
//! node ignores its CPT and evaluates to its forced value, while its
//! descendants still read it as an ordinary parent.

use std::collections::HashMap;

use causal_core::{CausalError, InferenceConfig};

use crate::network::Network;

/// A MAP assignment and its joint probability.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEstimate {
    /// `(node id, value index)` pairs, in target order.
    pub values: Vec<(u32, usize)>,
    pub probability: f32,
}

/// Read-only evaluator over a network.
#[derive(Debug, Clone, Copy)]
pub struct ProbabilityEngine<'a> {
    net: &'a Network,
    max_depth: usize,
}

impl<'a> ProbabilityEngine<'a> {
    pub fn new(net: &'a Network) -> Self {
        Self::with_max_depth(net, InferenceConfig::default().max_depth)
    }

    /// Bound ancestor chains at `max_depth` nodes.
    pub fn with_max_depth(net: &'a Network, max_depth: usize) -> Self {
        Self { net, max_depth }
    }

    pub fn network(&self) -> &'a Network {
        self.net
    }

    /// P(`id` = `value`), marginalizing over every ancestor.
    pub fn total_probability(&self, id: u32, value: usize) -> Result<f32, CausalError> {
        self.joint(&[(id, value)])
    }

    /// Joint probability of every `(id, value)` pair holding together.
    ///
    /// Contradictory assignments to the same node yield 0; the empty
    /// assignment yields 1.
    pub fn joint(&self, assignment: &[(u32, usize)]) -> Result<f32, CausalError> {
        let mut context = HashMap::with_capacity(assignment.len());
        for &(id, value) in assignment {
            let index = self.net.index_of(id)?;
            let node = &self.net.nodes()[index];
            if value >= node.value_count() {
                return Err(CausalError::IndexOutOfRange {
                    row: 0,
                    col: value,
                    rows: node.number_of_parent_values(),
                    cols: node.value_count(),
                });
            }
            match context.insert(index, value) {
                Some(previous) if previous != value => return Ok(0.0),
                _ => {}
            }
        }
        Evaluation::new(self).joint(&context)
    }

    /// P(`targets` | `evidence`) = P(targets, evidence) / P(evidence).
    ///
    /// # Errors
    ///
    /// [`CausalError::DivisionUndefined`] if the evidence has probability 0.
    pub fn conditional(
        &self,
        targets: &[(u32, usize)],
        evidence: &[(u32, usize)],
    ) -> Result<f32, CausalError> {
        let p_evidence = self.joint(evidence)?;
        if p_evidence == 0.0 {
            return Err(CausalError::DivisionUndefined);
        }
        let combined: Vec<(u32, usize)> = evidence.iter().chain(targets).copied().collect();
        Ok(self.joint(&combined)? / p_evidence)
    }

    /// The value combination of `targets` with the highest joint
    /// probability together with `evidence`.
    ///
    /// Combinations are enumerated in mixed radix with the first target
    /// most significant; on ties the first combination enumerated wins.
    pub fn argmax(
        &self,
        targets: &[u32],
        evidence: &[(u32, usize)],
    ) -> Result<MapEstimate, CausalError> {
        let mut radix = Vec::with_capacity(targets.len());
        for &id in targets {
            let node = self.net.node(id)?;
            if node.value_count() == 0 {
                return Err(CausalError::MissingPrerequisite {
                    reason: format!("node {} has no values", node.name()),
                });
            }
            radix.push(node.value_count());
        }
        let combinations: usize = radix.iter().product();

        let mut best: Option<MapEstimate> = None;
        let mut assignment: Vec<(u32, usize)> = evidence.to_vec();
        for k in 0..combinations {
            let values: Vec<(u32, usize)> = targets.iter().copied().zip(decode(k, &radix)).collect();
            assignment.truncate(evidence.len());
            assignment.extend_from_slice(&values);
            let probability = self.joint(&assignment)?;
            if best.as_ref().map_or(true, |b| probability > b.probability) {
                best = Some(MapEstimate { values, probability });
            }
        }
        best.ok_or_else(|| CausalError::MissingPrerequisite {
            reason: "no value combination to maximize over".into(),
        })
    }
}

/// Mixed-radix digits of `k`, most significant first.
fn decode(mut k: usize, radix: &[usize]) -> Vec<usize> {
    let mut digits = vec![0; radix.len()];
    for i in (0..radix.len()).rev() {
        digits[i] = k % radix[i];
        k /= radix[i];
    }
    digits
}

/// A node's conditional table over its live parents, with removed
/// parents already summed out against their priors.
struct Factor {
    /// Node indices of the parents still joined by an edge, in CPT order.
    parents: Vec<usize>,
    /// Value count of each of those parents.
    states: Vec<usize>,
    /// `table[row][value]`, rows row-major over `parents`.
    table: Vec<Vec<f32>>,
}

impl Factor {
    /// Entry for `value` given the parent values in `values`, which is
    /// indexed by node index.
    fn get(&self, values: &[usize], value: usize) -> f32 {
        let row = self
            .parents
            .iter()
            .zip(&self.states)
            .fold(0, |row, (&p, &s)| row * s + values[p]);
        self.table
            .get(row)
            .and_then(|r| r.get(value))
            .copied()
            .unwrap_or(0.0)
    }
}

/// One evaluation, caching the priors of removed parents.
struct Evaluation<'e, 'a> {
    engine: &'e ProbabilityEngine<'a>,
    /// Node index → marginal over its values with no evidence.
    priors: HashMap<usize, Vec<f32>>,
    /// Nodes whose prior is being computed, innermost last.
    pending: Vec<usize>,
}

impl<'e, 'a> Evaluation<'e, 'a> {
    fn new(engine: &'e ProbabilityEngine<'a>) -> Self {
        Self {
            engine,
            priors: HashMap::new(),
            pending: Vec::new(),
        }
    }

    /// P(context), summed over the unassigned ancestors of the context.
    fn joint(&mut self, context: &HashMap<usize, usize>) -> Result<f32, CausalError> {
        let net = self.engine.net;
        let mut roots: Vec<usize> = context.keys().copied().collect();
        roots.sort_unstable();
        let closure = self.ancestors(&roots)?;
        let factors = closure
            .iter()
            .map(|&index| self.factor(index).map(|factor| (index, factor)))
            .collect::<Result<Vec<(usize, Factor)>, CausalError>>()?;

        let free: Vec<usize> = closure
            .iter()
            .copied()
            .filter(|index| !context.contains_key(index))
            .collect();
        let radix: Vec<usize> = free.iter().map(|&i| net.nodes()[i].value_count()).collect();
        let combinations: usize = radix.iter().product();

        let mut values = vec![0; net.len()];
        for (&index, &value) in context {
            values[index] = value;
        }
        let mut total = 0.0;
        for k in 0..combinations {
            for (&index, value) in free.iter().zip(decode(k, &radix)) {
                values[index] = value;
            }
            let mut p = 1.0;
            for (index, factor) in &factors {
                p *= factor.get(&values, values[*index]);
                if p == 0.0 {
                    break;
                }
            }
            total += p;
        }
        Ok(total)
    }

    /// `roots` and every node reachable from them through live parent
    /// edges, parents before children.
    fn ancestors(&self, roots: &[usize]) -> Result<Vec<usize>, CausalError> {
        let mut done = vec![false; self.engine.net.len()];
        let mut path = Vec::new();
        let mut order = Vec::new();
        for &root in roots {
            self.visit(root, &mut done, &mut path, &mut order)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        index: usize,
        done: &mut [bool],
        path: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), CausalError> {
        if done[index] {
            return Ok(());
        }
        if path.contains(&index) || path.len() >= self.engine.max_depth {
            return Err(CausalError::CycleDetected {
                id: self.engine.net.nodes()[index].id(),
            });
        }
        let parents = self.live_parents(index)?;
        path.push(index);
        for parent in parents {
            self.visit(parent, done, path, order)?;
        }
        path.pop();

        done[index] = true;
        order.push(index);
        Ok(())
    }

    /// Indices of the CPT parents still joined to the node by an edge.
    fn live_parents(&self, index: usize) -> Result<Vec<usize>, CausalError> {
        let net = self.engine.net;
        let node = &net.nodes()[index];
        if node.forced().is_some() {
            return Ok(Vec::new());
        }
        let live = net.parents(node.id())?;
        node.parent_ids()
            .iter()
            .filter(|parent| live.contains(parent))
            .map(|&parent| net.index_of(parent))
            .collect()
    }

    fn factor(&mut self, index: usize) -> Result<Factor, CausalError> {
        let net = self.engine.net;
        let node = &net.nodes()[index];
        if let Some(forced) = node.forced() {
            let point = (0..node.value_count())
                .map(|v| if v == forced { 1.0 } else { 0.0 })
                .collect();
            return Ok(Factor {
                parents: Vec::new(),
                states: Vec::new(),
                table: vec![point],
            });
        }

        let live = net.parents(node.id())?;
        let mut parents = Vec::new();
        let mut states = Vec::new();
        // Prior per CPT parent; None for parents summed over jointly
        let mut priors = Vec::with_capacity(node.number_of_parents());
        for (&parent, &count) in node.parent_ids().iter().zip(node.parent_states()) {
            let parent_index = net.index_of(parent)?;
            if live.contains(&parent) {
                parents.push(parent_index);
                states.push(count);
                priors.push(None);
            } else {
                priors.push(Some(self.prior(parent_index)?));
            }
        }

        let rows: usize = states.iter().product();
        let mut table = vec![vec![0.0; node.value_count()]; rows];
        for row in 0..node.number_of_parent_values() {
            let mut weight = 1.0;
            let mut live_row = 0;
            let digits = node.decode_parents(row);
            for ((&digit, prior), &count) in digits.iter().zip(&priors).zip(node.parent_states()) {
                match prior {
                    Some(dist) => weight *= dist.get(digit).copied().unwrap_or(0.0),
                    None => live_row = live_row * count + digit,
                }
            }
            if weight == 0.0 {
                continue;
            }
            let Some(cells) = table.get_mut(live_row) else {
                continue;
            };
            for (value, cell) in cells.iter_mut().enumerate() {
                *cell += node.probability(row, value)? * weight;
            }
        }
        Ok(Factor {
            parents,
            states,
            table,
        })
    }

    /// Marginal of the node at `index` with no evidence.
    fn prior(&mut self, index: usize) -> Result<Vec<f32>, CausalError> {
        if let Some(dist) = self.priors.get(&index) {
            return Ok(dist.clone());
        }
        let net = self.engine.net;
        let node = &net.nodes()[index];
        if self.pending.contains(&index) || self.pending.len() >= self.engine.max_depth {
            return Err(CausalError::CycleDetected { id: node.id() });
        }
        self.pending.push(index);
        let dist = (0..node.value_count())
            .map(|value| self.joint(&HashMap::from([(index, value)])))
            .collect::<Result<Vec<f32>, CausalError>>();
        self.pending.pop();

        let dist = dist?;
        self.priors.insert(index, dist.clone());
        Ok(dist)
    }
}
