//! # End-to-End Query Tests
//!
//! Read a network and samples from disk, learn the CPTs, then run
//! observational, interventional, counterfactual and MAP queries.

use std::fs;
use std::path::Path;

use causal_prob::{
    CausalError, EngineConfig, LabeledMatrix, Network, NodeRef, ParameterLearner,
    ProbabilityEngine, QueryExecuter, PROB_TOLERANCE,
};
use test_log::test;

const A: u32 = 1;
const B: u32 = 2;
const C: u32 = 3;

// ============================================================================
// Fixtures
// ============================================================================

/// A → B → C, ten complete samples.
///
/// P(A=1) = 0.6, P(B=1|A) = [1/4, 5/6], P(C=1|B) = [1/4, 5/6].
const CHAIN_TGF: &str = "1 A\n2 B\n3 C\n#\n2 1\n3 2\n";
const CHAIN_SAMPLES: &str = "\
node\ts1\ts2\ts3\ts4\ts5\ts6\ts7\ts8\ts9\ts10
A\t0\t0\t0\t0\t1\t1\t1\t1\t1\t1
B\t0\t0\t0\t1\t1\t1\t1\t1\t0\t1
C\t0\t1\t0\t1\t1\t1\t0\t1\t0\t1
";

fn write(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

fn learned_chain() -> Network {
    let dir = tempfile::tempdir().unwrap();
    let mut net = Network::from_file(write(dir.path(), "chain.tgf", CHAIN_TGF)).unwrap();
    let data: LabeledMatrix<i32> =
        LabeledMatrix::from_file(write(dir.path(), "chain.txt", CHAIN_SAMPLES), true, true).unwrap();
    let report = ParameterLearner::default().learn(&mut net, &data).unwrap();
    assert_eq!(report.number_of_runs(), 1);
    net
}

// ============================================================================
// Learning
// ============================================================================

#[test]
fn test_learned_cpts_match_counts() {
    let net = learned_chain();
    let a = net.node(A).unwrap();
    assert!((a.probability(0, 1).unwrap() - 0.6).abs() < PROB_TOLERANCE);
    let b = net.node(B).unwrap();
    assert!((b.probability(0, 1).unwrap() - 0.25).abs() < PROB_TOLERANCE);
    assert!((b.probability(1, 1).unwrap() - 5.0 / 6.0).abs() < PROB_TOLERANCE);
    assert_eq!(b.cpt().row_names(), &["0".to_string(), "1".to_string()]);
}

#[test]
fn test_learning_with_missing_values_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::load(write(
        dir.path(),
        "engine.toml",
        "[learning]\nthreshold = 0.0\nmax_runs = 4\n",
    ))
    .unwrap();

    let mut net = Network::new();
    net.load_tgf(CHAIN_TGF).unwrap();
    let data = LabeledMatrix::parse_str(
        "A 0 1 -1 1 0 1 1\nB 1 -1 1 0 0 1 -1\nC 0 1 1 -1 0 1 0\n",
        false,
        true,
    )
    .unwrap();

    let report = ParameterLearner::from_config(&config).learn(&mut net, &data).unwrap();
    assert!(report.method.is_some());
    assert!(report.number_of_runs() <= 4);
    for node in net.nodes() {
        assert!(node.has_missing());
        for row in 0..node.number_of_parent_values() {
            let sum = node.cpt().row_sum(row).unwrap();
            assert!(sum == 0.0 || (sum - 1.0).abs() < 1e-4);
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_observational_leaf_marginal() {
    let mut net = learned_chain();
    let mut exec = QueryExecuter::new();
    exec.set_non_intervention(C, 1);
    let result = exec.execute(&mut net).unwrap();
    // 0.4 * 1/4 + 0.6 * 5/6
    assert!((result.probability - 0.6).abs() < PROB_TOLERANCE);
    assert!(result.assignments.is_empty());
}

#[test]
fn test_do_on_root_changes_leaf() {
    let mut net = learned_chain();
    let before = net.adjacency().clone();
    let mut exec = QueryExecuter::new();
    exec.set_non_intervention(C, 1).set_do_intervention(A, 0);
    let p = exec.execute(&mut net).unwrap().probability;

    let expected = 0.75 * 0.25 + 0.25 * 5.0 / 6.0;
    assert!((p - expected).abs() < PROB_TOLERANCE);
    assert!((p - 0.6).abs() > 0.1);
    assert_eq!(net.adjacency(), &before);
    assert_eq!(net.node(A).unwrap().forced(), None);
}

#[test]
fn test_do_differs_from_conditioning() {
    let mut net = learned_chain();
    let mut exec = QueryExecuter::new();

    exec.set_non_intervention(A, 1).set_condition(B, 1);
    let observed = exec.execute(&mut net).unwrap().probability;
    exec.set_non_intervention(A, 1).set_do_intervention(B, 1);
    let forced = exec.execute(&mut net).unwrap().probability;

    // 0.6 * 5/6 / 0.6
    assert!((observed - 5.0 / 6.0).abs() < PROB_TOLERANCE);
    assert!((forced - 0.6).abs() < PROB_TOLERANCE);
}

#[test]
fn test_map_is_global_maximum() {
    let mut net = learned_chain();

    let mut best = (0.0f32, (0, 0));
    {
        let engine = ProbabilityEngine::new(&net);
        for a in 0..2 {
            for c in 0..2 {
                let p = engine.joint(&[(A, a), (C, c)]).unwrap();
                if p > best.0 {
                    best = (p, (a, c));
                }
            }
        }
    }

    let mut exec = QueryExecuter::new();
    exec.set_argmax(A).set_argmax(C);
    let result = exec.execute(&mut net).unwrap();
    assert!((result.probability - best.0).abs() < PROB_TOLERANCE);
    assert_eq!(
        result.assignments,
        vec![format!("A={}", best.1 .0), format!("C={}", best.1 .1)]
    );
}

#[test]
fn test_map_with_evidence() {
    let mut net = learned_chain();
    let mut exec = QueryExecuter::new();
    exec.set_argmax(A).set_condition(C, 0);
    let result = exec.execute(&mut net).unwrap();
    // P(A=0, C=0) = 0.4 * (0.75*0.75 + 0.25*1/6) > P(A=1, C=0) = 0.6 * (1/6*0.75 + 5/6*1/6)
    assert_eq!(result.assignments, vec!["A=0".to_string()]);
}

#[test]
fn test_counterfactual_leaves_factual_world_intact() {
    let mut net = learned_chain();
    let before = net.clone();
    let mut exec = QueryExecuter::new();
    // Had B been 0, would C have been 1, given C was in fact 1?
    exec.set_do_intervention(NodeRef::Hypothetical(B), 0)
        .set_non_intervention(NodeRef::Hypothetical(C), 1)
        .set_condition(C, 1);
    let p = exec.execute(&mut net).unwrap().probability;

    assert!((p - 0.25).abs() < PROB_TOLERANCE);
    assert_eq!(net.len(), before.len());
    assert_eq!(net.adjacency(), before.adjacency());
}

#[test]
fn test_edge_addition_refits_cpt() {
    let mut net = learned_chain();
    let samples = LabeledMatrix::parse_str(CHAIN_SAMPLES, true, true).unwrap();
    let before = net.clone();
    let mut exec = QueryExecuter::new().with_samples(samples);

    exec.set_non_intervention(C, 1).set_condition(A, 0);
    let baseline = exec.execute(&mut net).unwrap().probability;
    // 0.25 * 5/6 + 0.75 * 1/4
    assert!((baseline - 0.395833).abs() < 1e-4);

    // C re-fitted over (A, B): P(C=1 | A=0, B=0) = 1/3, P(C=1 | A=0, B=1) = 1
    exec.set_add_edge(A, C).set_non_intervention(C, 1).set_condition(A, 0);
    let added = exec.execute(&mut net).unwrap().probability;
    // 0.75 * 1/3 + 0.25 * 1
    assert!((added - 0.5).abs() < 1e-4);

    // With B -> C cut, B enters through its prior P(B=1) = 0.6
    exec.set_add_edge(A, C)
        .set_remove_edge(B, C)
        .set_non_intervention(C, 1)
        .set_condition(A, 0);
    let rewired = exec.execute(&mut net).unwrap().probability;
    assert!((rewired - (0.4 / 3.0 + 0.6)).abs() < 1e-4);

    assert_eq!(net.adjacency(), before.adjacency());
    assert_eq!(net.node(C).unwrap(), before.node(C).unwrap());
}

#[test]
fn test_zero_probability_evidence() {
    let mut net = Network::new();
    net.load_tgf(CHAIN_TGF).unwrap();
    let data = LabeledMatrix::parse_str("A 0 0 1\nB 0 0 1\nC 0 0 1\n", false, true).unwrap();
    ParameterLearner::default().learn(&mut net, &data).unwrap();

    let mut exec = QueryExecuter::new();
    exec.set_non_intervention(C, 1).set_condition(A, 1).set_condition(B, 0);
    assert_eq!(exec.execute(&mut net), Err(CausalError::DivisionUndefined));
    assert_eq!(net.len(), 3);
}

// ============================================================================
// Network files
// ============================================================================

#[test]
fn test_node_attribute_then_interaction_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut net = Network::new();
    net.read_network(write(dir.path(), "net.na", "ID\tx\tname\n1 = A\n2 = B\n3 = C\n"))
        .unwrap();
    net.read_network(write(dir.path(), "net.sif", "2 pp 1\n3 pp 2\n"))
        .unwrap();

    let mut reference = Network::new();
    reference.load_tgf(CHAIN_TGF).unwrap();
    assert_eq!(net.adjacency(), reference.adjacency());
}

#[test]
fn test_unsupported_and_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Network::from_file(write(dir.path(), "net.xml", "")),
        Err(CausalError::UnsupportedFormat { .. })
    ));
    assert!(matches!(
        Network::from_file(dir.path().join("absent.tgf")),
        Err(CausalError::FileUnreadable { .. })
    ));
    let mut net = Network::new();
    assert!(matches!(
        net.read_network(write(dir.path(), "only.sif", "2 pp 1\n")),
        Err(CausalError::MissingPrerequisite { .. })
    ));
}
