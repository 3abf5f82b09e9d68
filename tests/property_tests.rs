use network_clearing::clearing::engine::ClearingEngine;
use network_clearing::core::job::ClearingJob;
use network_clearing::core::liability::{Liability, LiabilityGraph};
use network_clearing::simulation::stress_test::{generate_random_network, NetworkConfig};
use network_clearing::wire::codec::{decode_job, decode_result, encode_job, encode_result, CodecOptions};
use network_clearing::wire::frame::{Compression, DEFAULT_MAX_FRAME_LEN};
use proptest::prelude::*;

/// Generate a random amount, occasionally negative or zero.
fn arb_amount() -> impl Strategy<Value = f64> {
    prop_oneof![
        8 => 1.0..10_000.0f64,
        1 => -10_000.0..-1.0f64,
        1 => Just(0.0),
    ]
}

/// Generate a random job on a small node pool, self-loops included.
fn arb_job() -> impl Strategy<Value = ClearingJob> {
    (1usize..12).prop_flat_map(|nodes| {
        let row = prop::collection::vec((0..nodes as u32, arb_amount()), 0..6);
        (
            prop::collection::vec(row, nodes),
            prop::collection::vec(-5_000.0..5_000.0f64, nodes),
            prop::option::of(prop::collection::vec(0.0..2_000.0f64, nodes)),
            any::<u32>(),
        )
            .prop_map(|(rows, cash_flow, liquid_assets, iteration)| {
                let graph = rows
                    .into_iter()
                    .map(|row| {
                        row.into_iter()
                            .map(|(creditor, amount)| Liability::new(creditor, amount))
                            .collect::<Vec<_>>()
                    })
                    .collect::<LiabilityGraph>();
                ClearingJob {
                    liability_graph: graph,
                    cash_flow,
                    liquid_assets,
                    iteration,
                }
            })
    })
}

fn arb_compression() -> impl Strategy<Value = Compression> {
    prop::sample::select(vec![Compression::None, Compression::Gzip, Compression::Deflate])
}

fn relative_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

proptest! {
    // ===================================================================
    // INVARIANT 1: Every payment lies in [0, total liabilities].
    // ===================================================================
    #[test]
    fn payments_are_bounded(job in arb_job()) {
        let totals = job.total_liabilities();
        let (result, _) = ClearingEngine::default().clear(job).unwrap();

        for (paid, total) in result.clearing_payment_vector.iter().zip(&totals) {
            prop_assert!(*paid >= 0.0, "negative payment {}", paid);
            prop_assert!(*paid <= *total, "payment {} exceeds total {}", paid, total);
        }
    }

    // ===================================================================
    // INVARIANT 2: Payments are rationed in proportion to what each
    // creditor is owed.
    // ===================================================================
    #[test]
    fn payments_are_proportional(job in arb_job()) {
        let totals = job.total_liabilities();
        let graph = job.liability_graph.clone();
        let (result, _) = ClearingEngine::default().clear(job).unwrap();

        for (node, (row, paid_row)) in graph
            .rows()
            .zip(result.clearing_payment_matrix.rows())
            .enumerate()
        {
            prop_assert_eq!(row.len(), paid_row.len());
            if totals[node] == 0.0 {
                prop_assert!(paid_row.iter().all(|l| l.amount == 0.0));
                continue;
            }
            let ratio = result.clearing_payment_vector[node] / totals[node];
            for (owed, paid) in row.iter().zip(paid_row) {
                prop_assert_eq!(owed.counterparty, paid.counterparty);
                let expected = if owed.counterparty.index() == node {
                    0.0
                } else {
                    owed.amount.abs() * ratio
                };
                prop_assert!(
                    relative_eq(paid.amount, expected),
                    "node {} paid {} where {} was expected",
                    node, paid.amount, expected
                );
            }
        }
    }

    // ===================================================================
    // INVARIANT 3: Default rounds fall within the run, and nodes that
    // never defaulted paid in full.
    // ===================================================================
    #[test]
    fn default_order_is_consistent(job in arb_job()) {
        let totals = job.total_liabilities();
        let (result, stats) = ClearingEngine::default().clear(job).unwrap();

        prop_assert!(stats.rounds as usize <= result.node_count().max(1));
        prop_assert_eq!(
            stats.defaulted,
            result.default_order_of_node.iter().filter(|&&r| r > 0).count()
        );
        for (node, &round) in result.default_order_of_node.iter().enumerate() {
            prop_assert!(round <= stats.rounds);
            if round == 0 {
                prop_assert_eq!(result.clearing_payment_vector[node], totals[node]);
            } else {
                prop_assert!(totals[node] > 0.0, "node {} owes nothing but defaulted", node);
            }
        }
    }

    // ===================================================================
    // INVARIANT 3b: Replaying the cascade round by round, every node that
    // defaults in round r was insolvent given the payments settled before
    // round r, while it and every later defaulter had been paying in full.
    // ===================================================================
    #[test]
    fn default_rounds_replay(job in arb_job()) {
        let engine = ClearingEngine::default();
        let totals = job.total_liabilities();
        let nodes = job.node_count();
        let liquid: Vec<f64> = job.liquid_assets.clone().unwrap_or_else(|| vec![0.0; nodes]);
        let (result, stats) = engine.clear(job.clone()).unwrap();
        let order = &result.default_order_of_node;
        let last_round = order.iter().copied().max().unwrap_or(0);

        for round in 1..=last_round {
            // Nodes defaulting from this round on are kept solvent, so the
            // run stops with the payments that were in force before `round`.
            let boosted: Vec<f64> = (0..nodes)
                .map(|node| {
                    if order[node] >= round {
                        liquid[node] + totals[node] + job.cash_flow[node].abs() + 1.0
                    } else {
                        liquid[node]
                    }
                })
                .collect();
            let before = ClearingJob::new(
                job.liability_graph.clone(),
                job.cash_flow.clone(),
                job.iteration,
            )
            .with_liquid_assets(boosted);
            let (before, _) = engine.clear(before).unwrap();

            prop_assert!(
                (1..round).all(|r| order.contains(&r)),
                "round {} reached with an empty earlier round",
                round
            );
            for node in 0..nodes {
                let earlier = order[node] > 0 && order[node] < round;
                if earlier {
                    prop_assert_eq!(before.default_order_of_node[node], order[node]);
                } else {
                    prop_assert_eq!(before.default_order_of_node[node], 0);
                    prop_assert_eq!(before.clearing_payment_vector[node], totals[node]);
                }
                if totals[node] == 0.0 {
                    continue;
                }
                let cover = job.cash_flow[node] + liquid[node] + before.received_by((node as u32).into());
                if order[node] == round {
                    prop_assert!(
                        cover < totals[node],
                        "node {} defaulted in round {} while covering {} of {}",
                        node, round, cover, totals[node]
                    );
                } else if order[node] == 0 || order[node] > round {
                    prop_assert!(
                        cover >= totals[node] * (1.0 - 1e-9) - 1e-9,
                        "node {} stayed solvent in round {} covering only {} of {}",
                        node, round, cover, totals[node]
                    );
                }
            }
        }
        prop_assert!(last_round <= stats.rounds);
    }

    // ===================================================================
    // INVARIANT 4: Equity is what a node received plus its cash flow,
    // less what it paid.
    // ===================================================================
    #[test]
    fn equity_balances(job in arb_job()) {
        let cash_flow = job.cash_flow.clone();
        let (result, _) = ClearingEngine::default().clear(job).unwrap();

        for node in 0..result.node_count() {
            let received = result.received_by((node as u32).into());
            let expected = received + cash_flow[node] - result.clearing_payment_vector[node];
            prop_assert!(relative_eq(result.equity_of_node[node], expected));
        }
    }

    // ===================================================================
    // INVARIANT 5: When everyone can cover their liabilities, the run
    // ends in one round with every liability paid.
    // ===================================================================
    #[test]
    fn solvent_network_pays_in_full(job in arb_job()) {
        let totals = job.total_liabilities();
        let cash_flow: Vec<f64> = totals.iter().map(|t| t * 0.5).collect();
        let liquid: Vec<f64> = totals.iter().map(|t| t * 0.5 + 1.0).collect();
        let job = ClearingJob::new(job.liability_graph, cash_flow, job.iteration)
            .with_liquid_assets(liquid);

        let (result, stats) = ClearingEngine::default().clear(job).unwrap();
        prop_assert_eq!(stats.rounds, 1);
        prop_assert_eq!(stats.defaulted, 0);
        prop_assert_eq!(&result.clearing_payment_vector, &totals);
        prop_assert!(result.default_order_of_node.iter().all(|&r| r == 0));
    }

    // ===================================================================
    // INVARIANT 6: Encoding then decoding gives back the exact job and
    // result, whatever the batching and compression.
    // ===================================================================
    #[test]
    fn codec_round_trip_is_exact(
        job in arb_job(),
        compression in arb_compression(),
        nodes_per_frame in 1usize..5,
        values_per_frame in 1usize..7,
    ) {
        let options = CodecOptions {
            compression,
            nodes_per_frame,
            values_per_frame,
            ..Default::default()
        };

        let bytes = encode_job(&job, options).unwrap();
        prop_assert_eq!(&decode_job(&bytes, DEFAULT_MAX_FRAME_LEN).unwrap(), &job);

        let (result, _) = ClearingEngine::default().clear(job).unwrap();
        let bytes = encode_result(&result, options).unwrap();
        prop_assert_eq!(decode_result(&bytes, DEFAULT_MAX_FRAME_LEN).unwrap(), result);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    // ===================================================================
    // INVARIANT 7: Clearing terminates within N rounds on large sparse
    // networks.
    // ===================================================================
    #[test]
    fn large_networks_terminate(
        seed in any::<u64>(),
        node_count in 500usize..3_000,
        avg_liabilities_per_node in 1usize..8,
        min_cash_flow in -2_000_000.0..0.0f64,
    ) {
        let job = generate_random_network(&NetworkConfig {
            node_count,
            avg_liabilities_per_node,
            min_cash_flow,
            max_cash_flow: 1_000_000.0,
            seed: Some(seed),
            ..Default::default()
        });
        let totals = job.total_liabilities();

        let (result, stats) = ClearingEngine::default().clear(job).unwrap();
        prop_assert!(stats.rounds as usize <= node_count);
        prop_assert_eq!(result.node_count(), node_count);
        for (paid, total) in result.clearing_payment_vector.iter().zip(&totals) {
            prop_assert!(*paid >= 0.0 && *paid <= *total);
        }
    }
}
