//! Chain Queries: learning and querying A → B → C
//!
//! Run with: RUST_LOG=debug cargo run -p causal-prob --example chain_queries
//!
//! This example demonstrates:
//! - Learning CPTs from samples with missing values
//! - Observational vs interventional queries
//! - A counterfactual query on a twin network
//! - A MAP query
//!
//! Key insight: conditioning on B tells us about A, forcing B does not.

use causal_prob::{
    CausalError, EngineConfig, LabeledMatrix, Network, NodeRef, ParameterLearner, QueryExecuter,
};
use tracing_subscriber::EnvFilter;

const SAMPLES: &str = "\
A 0 0 0 0 1 1 1 1 1 1 -1 1
B 0 0 0 1 1 1 1 1 0 1 1 -1
C 0 1 0 1 1 1 0 1 0 1 1 0
";

fn main() -> Result<(), CausalError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Chain Queries ===\n");

    // -------------------------------------------------------------------------
    // 1. Structure and learning
    // -------------------------------------------------------------------------
    let mut net = Network::new();
    net.load_tgf("1 A\n2 B\n3 C\n#\n2 1\n3 2\n")?;
    println!("Adjacency (row = child, column = parent):\n{}\n", net);

    let config = EngineConfig::default();
    let data: LabeledMatrix<i32> = LabeledMatrix::parse_str(SAMPLES, false, true)?;
    let report = ParameterLearner::from_config(&config).learn(&mut net, &data)?;
    println!(
        "Learned in {} us: {} runs, difference {:.6}, initialization {:?}\n",
        report.time_in_microseconds(),
        report.number_of_runs(),
        report.difference(),
        report.method
    );
    for node in net.nodes() {
        println!("CPT of {}:\n{}\n", node.name(), node.cpt());
    }

    // -------------------------------------------------------------------------
    // 2. Observing vs intervening
    // -------------------------------------------------------------------------
    let mut exec = QueryExecuter::with_config(&config);

    exec.set_non_intervention(1u32, 1).set_condition(2u32, 1);
    let observed = exec.execute(&mut net)?;
    exec.set_non_intervention(1u32, 1).set_do_intervention(2u32, 1);
    let forced = exec.execute(&mut net)?;

    println!("P(A=1 | B=1)     = {:.4}", observed.probability);
    println!("P(A=1 | do(B=1)) = {:.4}", forced.probability);
    println!();

    // -------------------------------------------------------------------------
    // 3. Counterfactual: had B been 0, would C be 1, given C was 1?
    // -------------------------------------------------------------------------
    exec.set_do_intervention(NodeRef::Hypothetical(2), 0)
        .set_non_intervention(NodeRef::Hypothetical(3), 1)
        .set_condition(3u32, 1);
    let counterfactual = exec.execute(&mut net)?;
    println!("P(C'=1 | do(B'=0), C=1) = {:.4}", counterfactual.probability);
    println!("Nodes after the query: {}", net.len());
    println!();

    // -------------------------------------------------------------------------
    // 4. MAP
    // -------------------------------------------------------------------------
    exec.set_argmax(1u32).set_argmax(2u32).set_condition(3u32, 1);
    let map = exec.execute(&mut net)?;
    println!(
        "argmax(A, B | C=1) = {} with p = {:.4}",
        map.assignments.join(", "),
        map.probability
    );

    Ok(())
}
