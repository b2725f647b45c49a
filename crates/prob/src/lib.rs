//! # Prob - Causal Queries over Discrete Bayesian Networks
//!
//! This crate learns conditional probability tables from possibly
//! incomplete samples and answers observational, interventional and
//! counterfactual queries about them.
//!
//! ## Core Concepts
//!
//! - **Networks own their structure**: a [`Network`] holds its [`Node`]s and
//!   an adjacency matrix; every other component borrows it for one call
//! - **Learning is EM**: [`ParameterLearner`] fills CPTs from sample counts,
//!   spreading missing values over the observed ones
//! - **Inference is exact**: [`ProbabilityEngine`] sums the product of CPT
//!   entries over every value combination of the queried nodes' unobserved
//!   ancestors
//! - **Interventions are graph surgery**: do(X=x) cuts X's incoming edges
//!   and fixes its value; [`InterventionManager`] journals every change so
//!   it can be undone
//! - **Counterfactuals use a twin network**: hypothetical copies of the
//!   intervened nodes and their descendants share the factual background
//!
//! ## Example: Observing vs Intervening
//!
//! ```rust
//! use causal_prob::{chain_network, QueryExecuter};
//!
//! // A → B → C
//! let mut net = chain_network().unwrap();
//! let mut exec = QueryExecuter::new();
//!
//! // P(A=1 | B=1): observing B tells us about A
//! exec.set_non_intervention(1u32, 1).set_condition(2u32, 1);
//! let observed = exec.execute(&mut net).unwrap().probability;
//! assert!((observed - 0.64).abs() < 1e-5);
//!
//! // P(A=1 | do(B=1)): forcing B does not
//! exec.set_non_intervention(1u32, 1).set_do_intervention(2u32, 1);
//! let forced = exec.execute(&mut net).unwrap().probability;
//! assert!((forced - 0.4).abs() < 1e-5);
//! ```

mod engine;
mod intervention;
mod learner;
mod network;
mod node;
mod query;

pub use causal_core::{CausalError, EngineConfig, InferenceConfig, LabeledMatrix, LearningConfig};
pub use engine::{MapEstimate, ProbabilityEngine};
pub use intervention::{Intervention, InterventionManager, TwinMap};
pub use learner::{refit_node, InitMethod, LearningReport, ParameterLearner, MISSING};
pub use network::{chain_network, sprinkler_network, Network, NetworkFormat};
pub use node::Node;
pub use query::{ExecState, NodeRef, Query, QueryExecuter, QueryResult};

/// Tolerance for probability comparisons.
pub const PROB_TOLERANCE: f32 = 1e-5;
