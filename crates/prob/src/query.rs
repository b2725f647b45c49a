//! Query orchestration.
//!
//! A [`QueryExecuter`] collects one query through its setters, then
//! [`QueryExecuter::execute`] runs it against a network:
//!
//! 1. build a twin network if the query mixes factual and hypothetical
//!    references
//! 2. apply edge additions, edge removals and do-interventions; an added
//!    edge outside the target's CPT layout re-fits that CPT from the
//!    samples given to [`QueryExecuter::with_samples`]
//! 3. evaluate exactly one of MAP, conditional or joint probability
//! 4. reverse every mutation, newest first
//!
//! Values are given as they appear in the sample data (`0`, `1`, `7`...)
//! and are matched against each node's value labels.

use std::fmt;
use std::mem;

use causal_core::{CausalError, EngineConfig, InferenceConfig, LabeledMatrix};

use crate::engine::ProbabilityEngine;
use crate::intervention::{Intervention, InterventionManager, TwinMap};
use crate::learner::refit_node;
use crate::network::Network;

/// A node of the factual world or its hypothetical twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Factual(u32),
    Hypothetical(u32),
}

impl NodeRef {
    /// Identifier of the factual node referred to.
    pub fn id(&self) -> u32 {
        match *self {
            NodeRef::Factual(id) | NodeRef::Hypothetical(id) => id,
        }
    }

    pub fn is_hypothetical(&self) -> bool {
        matches!(self, NodeRef::Hypothetical(_))
    }
}

impl From<u32> for NodeRef {
    fn from(id: u32) -> Self {
        NodeRef::Factual(id)
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Factual(id) => write!(f, "{}", id),
            NodeRef::Hypothetical(id) => write!(f, "{}'", id),
        }
    }
}

/// The sets making up one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Assignments whose probability is asked for.
    pub non_interventions: Vec<(NodeRef, i32)>,
    /// Evidence conditioned on.
    pub conditions: Vec<(NodeRef, i32)>,
    /// Values forced by do-interventions.
    pub do_interventions: Vec<(NodeRef, i32)>,
    /// `(source, target)` edges drawn for the query.
    pub edge_additions: Vec<(NodeRef, NodeRef)>,
    /// `(source, target)` edges cut for the query.
    pub edge_removals: Vec<(NodeRef, NodeRef)>,
    /// Nodes whose most likely joint assignment is asked for.
    pub argmax: Vec<NodeRef>,
}

impl Query {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn refs(&self) -> impl Iterator<Item = NodeRef> + '_ {
        let assigned = self
            .non_interventions
            .iter()
            .chain(&self.conditions)
            .chain(&self.do_interventions)
            .map(|&(r, _)| r);
        let edges = self
            .edge_additions
            .iter()
            .chain(&self.edge_removals)
            .flat_map(|&(s, t)| [s, t]);
        assigned.chain(edges).chain(self.argmax.iter().copied())
    }

    /// True if factual and hypothetical references are mixed.
    pub fn is_counterfactual(&self) -> bool {
        let mut hypothetical = false;
        let mut factual = false;
        for r in self.refs() {
            if r.is_hypothetical() {
                hypothetical = true;
            } else {
                factual = true;
            }
        }
        hypothetical && factual
    }
}

impl fmt::Display for Query {
    /// Renders like `P(3=1 | 1=0, do(2=1))` or `argmax(1, 2 | 3=1)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let assign = |&(r, v): &(NodeRef, i32)| format!("{}={}", r, v);
        let mut given: Vec<String> = Vec::new();
        let head: Vec<String> = if self.argmax.is_empty() {
            self.non_interventions.iter().map(assign).collect()
        } else {
            given.extend(self.non_interventions.iter().map(assign));
            self.argmax.iter().map(|r| r.to_string()).collect()
        };
        given.extend(self.conditions.iter().map(assign));
        given.extend(self.do_interventions.iter().map(|a| format!("do({})", assign(a))));
        given.extend(self.edge_additions.iter().map(|(s, t)| format!("add({}->{})", s, t)));
        given.extend(self.edge_removals.iter().map(|(s, t)| format!("remove({}->{})", s, t)));

        let name = if self.argmax.is_empty() { "P" } else { "argmax" };
        write!(f, "{}({}", name, head.join(", "))?;
        if !given.is_empty() {
            write!(f, " | {}", given.join(", "))?;
        }
        write!(f, ")")
    }
}

/// Probability of a query, plus `name=value` strings for MAP queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub probability: f32,
    pub assignments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecState {
    Idle,
    Loaded,
    Executing,
    Done(QueryResult),
}

/// Builds and runs one query at a time against a caller-owned network.
#[derive(Debug, Clone)]
pub struct QueryExecuter {
    query: Query,
    state: ExecState,
    config: InferenceConfig,
    /// Raw samples for re-fitting CPTs over added edges.
    samples: Option<LabeledMatrix<i32>>,
}

impl Default for QueryExecuter {
    fn default() -> Self {
        Self {
            query: Query::default(),
            state: ExecState::Idle,
            config: InferenceConfig::default(),
            samples: None,
        }
    }
}

impl QueryExecuter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        Self {
            config: config.inference,
            ..Self::default()
        }
    }

    /// Keep the raw samples the network was learned from, so queries that
    /// add edges can re-fit the affected CPTs.
    pub fn with_samples(mut self, samples: LabeledMatrix<i32>) -> Self {
        self.samples = Some(samples);
        self
    }

    pub fn state(&self) -> &ExecState {
        &self.state
    }

    /// The query loaded so far.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Replace the loaded query wholesale.
    pub fn load(&mut self, query: Query) -> &mut Self {
        self.query = query;
        self.state = ExecState::Loaded;
        self
    }

    fn loaded(&mut self) -> &mut Query {
        self.state = ExecState::Loaded;
        &mut self.query
    }

    pub fn set_non_intervention(&mut self, node: impl Into<NodeRef>, value: i32) -> &mut Self {
        self.loaded().non_interventions.push((node.into(), value));
        self
    }

    pub fn set_condition(&mut self, node: impl Into<NodeRef>, value: i32) -> &mut Self {
        self.loaded().conditions.push((node.into(), value));
        self
    }

    pub fn set_do_intervention(&mut self, node: impl Into<NodeRef>, value: i32) -> &mut Self {
        self.loaded().do_interventions.push((node.into(), value));
        self
    }

    pub fn set_add_edge(&mut self, source: impl Into<NodeRef>, target: impl Into<NodeRef>) -> &mut Self {
        self.loaded().edge_additions.push((source.into(), target.into()));
        self
    }

    pub fn set_remove_edge(&mut self, source: impl Into<NodeRef>, target: impl Into<NodeRef>) -> &mut Self {
        self.loaded().edge_removals.push((source.into(), target.into()));
        self
    }

    pub fn set_argmax(&mut self, node: impl Into<NodeRef>) -> &mut Self {
        self.loaded().argmax.push(node.into());
        self
    }

    /// Run the loaded query and consume it.
    ///
    /// The network is restored to its previous structure before returning,
    /// whether or not evaluation succeeded.
    pub fn execute(&mut self, net: &mut Network) -> Result<QueryResult, CausalError> {
        if self.state != ExecState::Loaded {
            return Err(CausalError::MissingPrerequisite {
                reason: "no query has been loaded".into(),
            });
        }
        let query = mem::take(&mut self.query);
        self.state = ExecState::Executing;

        let mut manager = InterventionManager::new();
        let outcome = self.evaluate(net, &query, &mut manager);
        let reversed = manager.reverse_all(net);

        match outcome.and_then(|result| reversed.map(|_| result)) {
            Ok(result) => {
                self.state = ExecState::Done(result.clone());
                Ok(result)
            }
            Err(err) => {
                self.state = ExecState::Idle;
                Err(err)
            }
        }
    }

    fn evaluate(
        &self,
        net: &mut Network,
        query: &Query,
        manager: &mut InterventionManager,
    ) -> Result<QueryResult, CausalError> {
        let counterfactual = query.is_counterfactual();
        let twins = if counterfactual {
            let intervened: Vec<u32> = query.do_interventions.iter().map(|(r, _)| r.id()).collect();
            manager.build_twin(net, &intervened)?
        } else {
            TwinMap::default()
        };
        let resolve = |r: NodeRef| match r {
            NodeRef::Factual(id) => id,
            NodeRef::Hypothetical(id) => twins.resolve(id),
        };

        for &(source, target) in &query.edge_additions {
            let (source, target) = (resolve(source), resolve(target));
            manager.apply(net, Intervention::AddEdge { source, target })?;
            if net.node(target)?.parent_ids().contains(&source) {
                continue;
            }
            let samples = self.samples.as_ref().ok_or_else(|| CausalError::MissingPrerequisite {
                reason: format!(
                    "edge {} -> {} is not in the CPT of {}; samples are needed to re-fit it",
                    source, target, target
                ),
            })?;
            let data_name = |id: u32| -> Result<String, CausalError> {
                let factual = twins.factual_of(id).unwrap_or(id);
                Ok(net.node(factual)?.name().to_string())
            };
            let refit = refit_node(net, target, samples, data_name)?;
            manager.replace_node(net, refit)?;
        }
        for &(source, target) in &query.edge_removals {
            let (source, target) = (resolve(source), resolve(target));
            manager.apply(net, Intervention::RemoveEdge { source, target })?;
        }
        for &(node, value) in &query.do_interventions {
            let id = if counterfactual {
                twins.resolve(node.id())
            } else {
                resolve(node)
            };
            let value = value_index(net, id, value)?;
            manager.apply(net, Intervention::Do { id, value })?;
        }

        let net: &Network = net;
        let assignments = |list: &[(NodeRef, i32)]| -> Result<Vec<(u32, usize)>, CausalError> {
            list.iter()
                .map(|&(r, v)| {
                    let id = resolve(r);
                    Ok((id, value_index(net, id, v)?))
                })
                .collect()
        };
        let engine = ProbabilityEngine::with_max_depth(net, self.config.max_depth);
        let targets = assignments(&query.non_interventions)?;
        let conditions = assignments(&query.conditions)?;

        if !query.argmax.is_empty() {
            tracing::info!("Running MAP query {}", query);
            let evidence: Vec<(u32, usize)> = conditions.into_iter().chain(targets).collect();
            let ids: Vec<u32> = query.argmax.iter().map(|&r| resolve(r)).collect();
            let map = engine.argmax(&ids, &evidence)?;
            let mut labels = Vec::with_capacity(map.values.len());
            for (id, value) in map.values {
                let node = net.node(id)?;
                labels.push(format!("{}={}", node.name(), node.values()[value]));
            }
            Ok(QueryResult {
                probability: map.probability,
                assignments: labels,
            })
        } else if !conditions.is_empty() {
            tracing::info!("Running conditional query {}", query);
            Ok(QueryResult {
                probability: engine.conditional(&targets, &conditions)?,
                assignments: Vec::new(),
            })
        } else {
            tracing::info!("Running joint query {}", query);
            Ok(QueryResult {
                probability: engine.joint(&targets)?,
                assignments: Vec::new(),
            })
        }
    }
}

/// Column of the label `value` in node `id`.
fn value_index(net: &Network, id: u32, value: i32) -> Result<usize, CausalError> {
    let node = net.node(id)?;
    node.value_index(&value.to_string())
        .ok_or_else(|| CausalError::NameNotFound {
            name: format!("{}={}", node.name(), value),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{chain_network, sprinkler_network};
    use crate::PROB_TOLERANCE;

    const A: u32 = 1;
    const B: u32 = 2;
    const C: u32 = 3;

    #[test]
    fn test_display() {
        let mut q = Query::default();
        q.non_interventions.push((NodeRef::Factual(3), 1));
        q.conditions.push((NodeRef::Factual(1), 0));
        q.do_interventions.push((NodeRef::Hypothetical(2), 1));
        assert_eq!(q.to_string(), "P(3=1 | 1=0, do(2'=1))");

        let mut m = Query::default();
        m.argmax = vec![NodeRef::Factual(1), NodeRef::Factual(2)];
        m.conditions.push((NodeRef::Factual(3), 1));
        assert_eq!(m.to_string(), "argmax(1, 2 | 3=1)");
    }

    #[test]
    fn test_counterfactual_detection() {
        let mut q = Query::default();
        q.non_interventions.push((NodeRef::Hypothetical(3), 1));
        assert!(!q.is_counterfactual());
        q.conditions.push((NodeRef::Factual(3), 1));
        assert!(q.is_counterfactual());
    }

    #[test]
    fn test_state_machine() {
        let mut net = chain_network().unwrap();
        let mut exec = QueryExecuter::new();
        assert_eq!(exec.state(), &ExecState::Idle);
        assert!(matches!(
            exec.execute(&mut net),
            Err(CausalError::MissingPrerequisite { .. })
        ));

        exec.set_non_intervention(A, 1);
        assert_eq!(exec.state(), &ExecState::Loaded);
        let result = exec.execute(&mut net).unwrap();
        assert!((result.probability - 0.4).abs() < PROB_TOLERANCE);
        assert_eq!(exec.state(), &ExecState::Done(result));
        assert!(exec.query().is_empty());

        // Consumed: a second run needs a new query
        assert!(exec.execute(&mut net).is_err());
    }

    #[test]
    fn test_failed_query_restores_network() {
        let mut net = chain_network().unwrap();
        let mut exec = QueryExecuter::new();
        exec.set_do_intervention(B, 1).set_non_intervention(C, 9);

        assert_eq!(
            exec.execute(&mut net),
            Err(CausalError::NameNotFound { name: "C=9".into() })
        );
        assert_eq!(net.parents(2).unwrap(), vec![1]);
        assert_eq!(net.node(2).unwrap().forced(), None);
        assert_eq!(exec.state(), &ExecState::Idle);
    }

    #[test]
    fn test_edge_removal_query() {
        let mut net = chain_network().unwrap();
        let mut exec = QueryExecuter::new();
        exec.set_remove_edge(A, B).set_non_intervention(B, 1).set_condition(A, 0);
        let p = exec.execute(&mut net).unwrap().probability;
        assert!((p - 0.5).abs() < PROB_TOLERANCE);
        assert_eq!(net.parents(2).unwrap(), vec![1]);
    }

    #[test]
    fn test_counterfactual_shares_background() {
        const RAIN: u32 = 3;
        let mut net = sprinkler_network().unwrap();
        let mut exec = QueryExecuter::new();
        // Had the sprinkler been off, would the grass be wet, given it rained?
        exec.set_do_intervention(NodeRef::Hypothetical(2), 0)
            .set_non_intervention(NodeRef::Hypothetical(4), 1)
            .set_condition(RAIN, 1);
        let p = exec.execute(&mut net).unwrap().probability;
        assert!((p - 0.8).abs() < PROB_TOLERANCE);
        assert_eq!(net.len(), 4);
        assert!(net.node_by_name("WetGrass'").is_err());
    }

    #[test]
    fn test_edge_removal_blocks_upstream_evidence() {
        let mut net = chain_network().unwrap();
        let mut exec = QueryExecuter::new();

        exec.set_non_intervention(C, 1).set_condition(A, 0);
        let baseline = exec.execute(&mut net).unwrap().probability;
        assert!((baseline - 0.25).abs() < PROB_TOLERANCE);

        // C falls back on B's prior: 0.5*0.1 + 0.5*0.6
        exec.set_remove_edge(B, C).set_non_intervention(C, 1).set_condition(A, 0);
        let cut = exec.execute(&mut net).unwrap().probability;
        assert!((cut - 0.35).abs() < PROB_TOLERANCE);
        assert_eq!(net.parents(3).unwrap(), vec![2]);
    }

    #[test]
    fn test_edge_addition_needs_samples() {
        let mut net = chain_network().unwrap();
        let before = net.clone();
        let mut exec = QueryExecuter::new();

        exec.set_add_edge(A, C).set_non_intervention(C, 1).set_condition(A, 0);
        assert!(matches!(
            exec.execute(&mut net),
            Err(CausalError::MissingPrerequisite { .. })
        ));
        assert_eq!(net.adjacency(), before.adjacency());
        assert_eq!(net.node(3).unwrap(), before.node(3).unwrap());

        // An edge already in the CPT layout needs nothing re-fitted
        exec.set_add_edge(A, B).set_non_intervention(B, 1).set_condition(A, 0);
        let p = exec.execute(&mut net).unwrap().probability;
        assert!((p - 0.3).abs() < PROB_TOLERANCE);
    }

    #[test]
    fn test_counterfactual_reads_factual_evidence() {
        const SPRINKLER: u32 = 2;
        const WET: u32 = 4;
        let mut net = sprinkler_network().unwrap();
        let mut exec = QueryExecuter::new();
        let mut given_wet = |wet: i32| {
            exec.set_do_intervention(NodeRef::Hypothetical(SPRINKLER), 0)
                .set_non_intervention(NodeRef::Hypothetical(WET), 1)
                .set_condition(WET, wet);
            exec.execute(&mut net).unwrap().probability
        };

        // 0.8 * P(Rain=1, Wet=0) / P(Wet=0) = 0.8 * 0.0829 / 0.3939
        let dry = given_wet(0);
        assert!((dry - 0.168368).abs() < 1e-4);
        // 0.8 * P(Rain=1, Wet=1) / P(Wet=1) = 0.8 * 0.4171 / 0.6061
        let wet = given_wet(1);
        assert!((wet - 0.550536).abs() < 1e-4);

        // Without factual evidence the query is a plain do-query
        exec.set_do_intervention(SPRINKLER, 0).set_non_intervention(WET, 1);
        let forced = exec.execute(&mut net).unwrap().probability;
        assert!((forced - 0.4).abs() < PROB_TOLERANCE);
        assert_eq!(net.len(), 4);
    }

    #[test]
    fn test_map_assignment_labels() {
        let mut net = chain_network().unwrap();
        let mut exec = QueryExecuter::new();
        exec.set_argmax(A).set_argmax(B);
        let result = exec.execute(&mut net).unwrap();
        assert_eq!(result.assignments, vec!["A=0".to_string(), "B=0".to_string()]);
        assert!((result.probability - 0.42).abs() < PROB_TOLERANCE);
    }
}
