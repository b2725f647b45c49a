//! CPT learning by Expectation-Maximization.
//!
//! The raw sample table has one row per node (row names are node names)
//! and one column per sample; `-1` marks a missing value. Counting follows
//! two rules:
//! - a sample only counts for a node when every parent of that node is
//!   observed in it
//! - a missing own value counts in the node's `NA` observation column
//!
//! With complete data a single M-phase yields the maximum-likelihood CPTs.
//! Otherwise EM runs once from a uniform start and once from the observed
//! proportions, and the run with the higher data log-likelihood is kept.
//!
//! [`refit_node`] re-fits a single CPT over the node's current parents,
//! for when a query draws an edge the learned tables do not cover.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use causal_core::{CausalError, EngineConfig, LabeledMatrix, LearningConfig};
use serde::{Deserialize, Serialize};

use crate::engine::ProbabilityEngine;
use crate::network::Network;
use crate::node::Node;

/// Marker for a missing value in the raw sample table.
pub const MISSING: i32 = -1;

/// How CPTs are seeded before EM iterates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitMethod {
    /// Every value equally likely.
    Uniform,
    /// Proportions among the observed (non-missing) counts.
    ObservedProportions,
}

/// Outcome of one learning pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningReport {
    pub elapsed: Duration,
    /// E/M iterations of the chosen run; 1 for complete data.
    pub runs: u32,
    /// Mean absolute CPT change of the final M-phase.
    pub difference: f32,
    /// Initialization that won; `None` when no value was missing.
    pub method: Option<InitMethod>,
}

impl LearningReport {
    pub fn time_in_microseconds(&self) -> u128 {
        self.elapsed.as_micros()
    }

    pub fn number_of_runs(&self) -> u32 {
        self.runs
    }

    pub fn difference(&self) -> f32 {
        self.difference
    }
}

/// EM parameter learner.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterLearner {
    config: LearningConfig,
}

/// Where a node's own and parent values live in the sample table.
struct Layout {
    data_row: usize,
    parent_rows: Vec<usize>,
}

impl ParameterLearner {
    pub fn new(config: LearningConfig) -> Self {
        Self { config }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.learning)
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Shape every node's tables from `data`, count the samples and learn
    /// the CPTs in place.
    pub fn learn(
        &self,
        net: &mut Network,
        data: &LabeledMatrix<i32>,
    ) -> Result<LearningReport, CausalError> {
        let started = Instant::now();
        if net.is_empty() {
            return Err(CausalError::MissingPrerequisite {
                reason: "a network must be read before learning".into(),
            });
        }

        let domains = value_domains(net, data)?;
        net.configure_tables(&domains)?;
        let layouts = layouts(net, data)?;
        count_observations(net, data, &layouts)?;

        let incomplete = net.nodes().iter().any(|n| n.has_missing());
        let report = if !incomplete {
            let difference = m_phase(net)?;
            LearningReport {
                elapsed: started.elapsed(),
                runs: 1,
                difference,
                method: None,
            }
        } else {
            let mut best: Option<(f64, Vec<LabeledMatrix<f32>>, u32, f32, InitMethod)> = None;
            for method in [InitMethod::Uniform, InitMethod::ObservedProportions] {
                initialize(net, method)?;
                let (runs, difference) = self.run_em(net)?;
                let likelihood = log_likelihood(net, data, &layouts)?;
                tracing::debug!(
                    "{:?} initialization: {} runs, difference {}, log-likelihood {}",
                    method,
                    runs,
                    difference,
                    likelihood
                );
                if best.as_ref().map_or(true, |(ll, ..)| likelihood > *ll) {
                    let cpts = net.nodes().iter().map(|n| n.cpt().clone()).collect();
                    best = Some((likelihood, cpts, runs, difference, method));
                }
            }
            let (_, cpts, runs, difference, method) = best.ok_or_else(|| {
                CausalError::MissingPrerequisite {
                    reason: "no initialization was attempted".into(),
                }
            })?;
            for (node, cpt) in net.nodes_mut().iter_mut().zip(cpts) {
                node.replace_cpt(cpt);
            }
            LearningReport {
                elapsed: started.elapsed(),
                runs,
                difference,
                method: Some(method),
            }
        };

        tracing::info!(
            "Learned CPTs in {} us: {} runs, difference {}, method {:?}",
            report.time_in_microseconds(),
            report.runs,
            report.difference,
            report.method
        );
        Ok(report)
    }

    /// Alternate E- and M-phases until the mean change falls to the
    /// threshold or the run cap is hit.
    fn run_em(&self, net: &mut Network) -> Result<(u32, f32), CausalError> {
        let mut difference = f32::INFINITY;
        let mut runs = 0;
        while difference > self.config.threshold && runs < self.config.max_runs {
            e_phase(net)?;
            difference = m_phase(net)?;
            runs += 1;
            tracing::debug!("EM iteration {}: difference {}", runs, difference);
        }
        if difference > self.config.threshold {
            tracing::warn!(
                "EM stopped after {} runs with difference {} above threshold {}",
                runs,
                difference,
                self.config.threshold
            );
        }
        Ok((runs, difference))
    }
}

/// Sorted observed values per node, and whether any sample is missing.
fn value_domains(
    net: &Network,
    data: &LabeledMatrix<i32>,
) -> Result<HashMap<u32, (Vec<String>, bool)>, CausalError> {
    let mut domains = HashMap::with_capacity(net.len());
    for node in net.nodes() {
        let row = data_row(data, node.name())?;
        let labels = data
            .unique_row_values(row, Some(&MISSING))?
            .into_iter()
            .map(|v| v.to_string())
            .collect();
        let missing = data.contains_in_row(row, &MISSING)?;
        domains.insert(node.id(), (labels, missing));
    }
    Ok(domains)
}

fn data_row(data: &LabeledMatrix<i32>, name: &str) -> Result<usize, CausalError> {
    data.find_row(name).ok_or_else(|| CausalError::NameNotFound {
        name: name.to_string(),
    })
}

fn layouts(net: &Network, data: &LabeledMatrix<i32>) -> Result<Vec<Layout>, CausalError> {
    net.nodes()
        .iter()
        .map(|node| {
            let parent_rows = node
                .parent_ids()
                .iter()
                .map(|&p| data_row(data, net.node(p)?.name()))
                .collect::<Result<_, _>>()?;
            Ok(Layout {
                data_row: data_row(data, node.name())?,
                parent_rows,
            })
        })
        .collect()
}

/// CPT row of `sample` for the node at `index`, or `None` if a parent is
/// missing.
fn sample_row(
    net: &Network,
    index: usize,
    layout: &Layout,
    data: &LabeledMatrix<i32>,
    sample: usize,
) -> Result<Option<usize>, CausalError> {
    let node = &net.nodes()[index];
    let mut parent_values = Vec::with_capacity(layout.parent_rows.len());
    for (&parent, &row) in node.parent_ids().iter().zip(&layout.parent_rows) {
        let raw = *data.get(row, sample)?;
        if raw == MISSING {
            return Ok(None);
        }
        let value = net
            .node(parent)?
            .value_index(&raw.to_string())
            .ok_or_else(|| CausalError::NameNotFound {
                name: raw.to_string(),
            })?;
        parent_values.push(value);
    }
    Ok(Some(node.encode_parents(&parent_values)))
}

fn count_observations(
    net: &mut Network,
    data: &LabeledMatrix<i32>,
    layouts: &[Layout],
) -> Result<(), CausalError> {
    let mut increments = Vec::new();
    for (index, layout) in layouts.iter().enumerate() {
        let node = &net.nodes()[index];
        let offset = usize::from(node.has_missing());
        for sample in 0..data.cols() {
            let Some(row) = sample_row(net, index, layout, data, sample)? else {
                continue;
            };
            let raw = *data.get(layout.data_row, sample)?;
            let col = if raw == MISSING {
                0
            } else {
                offset
                    + node
                        .value_index(&raw.to_string())
                        .ok_or_else(|| CausalError::NameNotFound {
                            name: raw.to_string(),
                        })?
            };
            increments.push((index, row, col));
        }
    }

    let nodes = net.nodes_mut();
    for (index, row, col) in increments {
        let obs = nodes[index].observations_mut();
        let count = *obs.get(row, col)?;
        obs.set(row, col, count + 1.0)?;
    }
    for node in nodes.iter_mut() {
        node.save_backup();
    }
    Ok(())
}

/// Re-fit the CPT of `id` over its current parents.
///
/// Counts come from the samples in which the node and every parent are
/// observed; rows without such a sample stay uniform. `data_name` gives
/// the sample row holding a node's values, so a twin can read the row of
/// its factual node. The network is left untouched and the re-fitted copy
/// of the node is returned.
pub fn refit_node(
    net: &Network,
    id: u32,
    data: &LabeledMatrix<i32>,
    data_name: impl Fn(u32) -> Result<String, CausalError>,
) -> Result<Node, CausalError> {
    let node = net.node(id)?;
    let parents = net.parents(id)?;
    let mut labels: Vec<&[String]> = Vec::with_capacity(parents.len());
    let mut parent_rows = Vec::with_capacity(parents.len());
    for &parent in &parents {
        labels.push(net.node(parent)?.values());
        parent_rows.push(data_row(data, &data_name(parent)?)?);
    }
    let own_row = data_row(data, &data_name(id)?)?;

    let layout: Vec<(u32, &[String])> = parents.iter().copied().zip(labels.iter().copied()).collect();
    let mut refit = node.clone();
    refit.shape_tables(node.values().to_vec(), &layout, false)?;

    'samples: for sample in 0..data.cols() {
        let Some(col) = refit.value_index(&data.get(own_row, sample)?.to_string()) else {
            continue;
        };
        let mut parent_values = Vec::with_capacity(parents.len());
        for (&row, parent_labels) in parent_rows.iter().zip(&labels) {
            let raw = data.get(row, sample)?.to_string();
            match parent_labels.iter().position(|label| *label == raw) {
                Some(value) => parent_values.push(value),
                None => continue 'samples,
            }
        }
        let row = refit.encode_parents(&parent_values);
        let obs = refit.observations_mut();
        let count = *obs.get(row, col)?;
        obs.set(row, col, count + 1.0)?;
    }
    refit.save_backup();
    initialize_node(&mut refit, InitMethod::ObservedProportions)?;

    tracing::debug!("Re-fitted {} over parents {:?}", refit.name(), parents);
    Ok(refit)
}

fn initialize(net: &mut Network, method: InitMethod) -> Result<(), CausalError> {
    for node in net.nodes_mut() {
        initialize_node(node, method)?;
    }
    Ok(())
}

fn initialize_node(node: &mut Node, method: InitMethod) -> Result<(), CausalError> {
    let values = node.value_count();
    if values == 0 {
        return Ok(());
    }
    let uniform = 1.0 / values as f32;
    let offset = usize::from(node.has_missing());
    for row in 0..node.number_of_parent_values() {
        let observed = node.observations().row_sum(row)?
            - if offset == 1 { *node.observations().get(row, 0)? } else { 0.0 };
        for col in 0..values {
            let p = match method {
                InitMethod::ObservedProportions if observed > 0.0 => {
                    *node.observations().get(row, col + offset)? / observed
                }
                _ => uniform,
            };
            node.set_probability(row, col, p)?;
        }
    }
    Ok(())
}

/// Spread each row's missing count over the observed columns in
/// proportion to the current model.
fn e_phase(net: &mut Network) -> Result<(), CausalError> {
    let mut updates = Vec::new();
    {
        let engine = ProbabilityEngine::new(net);
        for (index, node) in net.nodes().iter().enumerate() {
            if !node.has_missing() {
                continue;
            }
            for row in 0..node.number_of_parent_values() {
                let missing = *node.observations().get(row, 0)?;
                let mut weight = 1.0;
                for (&parent, &value) in node.parent_ids().iter().zip(&node.decode_parents(row)) {
                    weight *= engine.total_probability(parent, value)?;
                }
                let mut norm = 0.0;
                for col in 0..node.value_count() {
                    norm += node.probability(row, col)? * weight;
                }
                for col in 0..node.value_count() {
                    let share = if norm > 0.0 {
                        node.probability(row, col)? * weight / norm
                    } else {
                        0.0
                    };
                    updates.push((index, row, col + 1, share * missing));
                }
            }
        }
    }

    let nodes = net.nodes_mut();
    for (index, row, col, delta) in updates {
        let obs = nodes[index].observations_mut();
        let count = *obs.get(row, col)?;
        obs.set(row, col, count + delta)?;
    }
    Ok(())
}

/// Recompute every CPT from the current counts and return the mean
/// absolute change. Each node's raw counts are restored afterwards.
fn m_phase(net: &mut Network) -> Result<f32, CausalError> {
    let mut difference = 0.0;
    let mut cells = 0usize;
    for node in net.nodes_mut() {
        let offset = usize::from(node.has_missing());
        for row in 0..node.number_of_parent_values() {
            let observed = node.observations().row_sum(row)?
                - if offset == 1 { *node.observations().get(row, 0)? } else { 0.0 };
            for col in 0..node.value_count() {
                let p = if observed > 0.0 {
                    let p = *node.observations().get(row, col + offset)? / observed;
                    difference += (node.probability(row, col)? - p).abs();
                    p
                } else {
                    0.0
                };
                node.set_probability(row, col, p)?;
                cells += 1;
            }
        }
        node.load_backup();
    }
    Ok(if cells == 0 { 0.0 } else { difference / cells as f32 })
}

/// Σ ln P(value | parents) over every fully observed (node, sample) pair.
fn log_likelihood(
    net: &Network,
    data: &LabeledMatrix<i32>,
    layouts: &[Layout],
) -> Result<f64, CausalError> {
    let mut total = 0.0f64;
    for (index, layout) in layouts.iter().enumerate() {
        let node = &net.nodes()[index];
        for sample in 0..data.cols() {
            let raw = *data.get(layout.data_row, sample)?;
            if raw == MISSING {
                continue;
            }
            let Some(row) = sample_row(net, index, layout, data, sample)? else {
                continue;
            };
            if let Some(col) = node.value_index(&raw.to_string()) {
                total += f64::from(node.probability(row, col)?).ln();
            }
        }
    }
    Ok(total)
}
