//! Default cascade example.
//!
//! Clears a small interbank network in which one failure spreads to its
//! creditors, then shows how liquid assets stop the cascade.

use network_clearing::clearing::engine::ClearingEngine;
use network_clearing::clearing::summary::ClearingSummary;
use network_clearing::core::job::ClearingJob;
use network_clearing::core::liability::LiabilityGraph;

fn network() -> LiabilityGraph {
    // 0 → 1 → 2 → 3, with 3 owing a little back to 0.
    let mut graph = LiabilityGraph::with_nodes(4);
    graph.add(0, 1, 500.0);
    graph.add(1, 2, 450.0);
    graph.add(1, 3, 50.0);
    graph.add(2, 3, 400.0);
    graph.add(3, 0, 100.0);
    graph
}

fn report(job: ClearingJob) {
    let totals = job.total_liabilities();
    let (result, stats) = match ClearingEngine::default().clear(job) {
        Ok(cleared) => cleared,
        Err(e) => {
            eprintln!("clearing failed: {}", e);
            return;
        }
    };

    println!("{}", ClearingSummary::new(&totals, &result));
    println!("Rounds: {}  Sweeps: {}\n", stats.rounds, stats.sweeps);
    println!("{:>6} {:>10} {:>10} {:>10} {:>8}", "node", "owed", "paid", "equity", "default");
    for node in 0..result.node_count() {
        println!(
            "{:>6} {:>10.2} {:>10.2} {:>10.2} {:>8}",
            node,
            totals[node],
            result.clearing_payment_vector[node],
            result.equity_of_node[node],
            result.default_order_of_node[node]
        );
    }
    println!();
}

fn main() {
    println!("╔════════════════════════════════════════════╗");
    println!("║  network-clearing: Default Cascade Example ║");
    println!("╚════════════════════════════════════════════╝\n");

    // --- Scenario 1: Node 0 is short and the shortfall propagates ---
    println!("━━━ Scenario 1: Cascade ━━━\n");
    let job = ClearingJob::new(network(), vec![100.0, 20.0, 10.0, 0.0], 1);
    report(job);

    // --- Scenario 2: Liquid assets absorb the shock ---
    println!("━━━ Scenario 2: With Liquid Assets ━━━\n");
    let job = ClearingJob::new(network(), vec![100.0, 20.0, 10.0, 0.0], 2)
        .with_liquid_assets(vec![400.0, 0.0, 0.0, 0.0]);
    report(job);
}
