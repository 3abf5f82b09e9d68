use crate::core::job::{validate_inputs, ClearingJob};
use crate::core::liability::LiabilityGraph;
use crate::core::result::ClearingResult;
use crate::error::{Error, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Tuning for the settlement solve run inside each round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Convergence threshold for defaulted payments, relative to the
    /// largest total liability in the network.
    pub tolerance: f64,
    /// Settlement sweeps per round before switching to the exact solve.
    pub max_sweeps: usize,
    /// Largest default set the exact solve accepts. A round that exhausts
    /// its sweeps with more defaulted nodes than this fails.
    pub exact_solve_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_sweeps: 10_000,
            exact_solve_limit: 512,
        }
    }
}

/// Counters describing how a clearing run went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearingStats {
    /// Rounds executed, including the final round that found no new default.
    pub rounds: u32,
    /// Settlement sweeps summed over all rounds.
    pub sweeps: usize,
    /// Nodes that defaulted.
    pub defaulted: usize,
}

/// Generalized Eisenberg–Noe clearing.
///
/// Every node starts out paying its liabilities in full. Each round finds
/// the nodes whose cash, liquid assets and incoming payments fall short of
/// what they owe, marks them defaulted, and settles the network again with
/// defaulted nodes paying everything they have. A defaulted node rations
/// its payment across creditors in proportion to what each is owed.
///
/// The default set only grows, so the run ends after at most one round per
/// node: it stops when a round marks nobody new, or when every node that
/// owes anything has already defaulted.
///
/// # Examples
///
/// ```
/// use network_clearing::clearing::engine::compute;
/// use network_clearing::core::liability::LiabilityGraph;
///
/// // Node 0 owes node 1 100 but only holds 40.
/// let mut graph = LiabilityGraph::with_nodes(2);
/// graph.add(0, 1, 100.0);
///
/// let result = compute(graph, vec![40.0, 0.0], None).unwrap();
/// assert_eq!(result.clearing_payment_vector, vec![40.0, 0.0]);
/// assert_eq!(result.default_order_of_node, vec![1, 0]);
/// assert_eq!(result.equity_of_node, vec![0.0, 40.0]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ClearingEngine {
    config: EngineConfig,
}

impl ClearingEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Clear a job, carrying its iteration id onto the result.
    pub fn clear(&self, job: ClearingJob) -> Result<(ClearingResult, ClearingStats)> {
        let (graph, cash_flow, liquid_assets, iteration) = job.into_parts();
        let (mut result, stats) = self.compute_with_stats(graph, cash_flow, liquid_assets)?;
        result.iteration = iteration;
        Ok((result, stats))
    }

    pub fn compute(
        &self,
        graph: LiabilityGraph,
        cash_flow: Vec<f64>,
        liquid_assets: Option<Vec<f64>>,
    ) -> Result<ClearingResult> {
        self.compute_with_stats(graph, cash_flow, liquid_assets)
            .map(|(result, _)| result)
    }

    /// Run the clearing algorithm and report round and sweep counts.
    ///
    /// The graph is consumed: its rows are rewritten in place, first into
    /// relative liabilities and finally into the clearing payment matrix.
    pub fn compute_with_stats(
        &self,
        graph: LiabilityGraph,
        cash_flow: Vec<f64>,
        liquid_assets: Option<Vec<f64>>,
    ) -> Result<(ClearingResult, ClearingStats)> {
        validate_inputs(&graph, &cash_flow, liquid_assets.as_deref())?;

        let nodes = graph.len();
        let mut shares = graph;
        let totals = into_relative_liabilities(&mut shares)?;

        let available: Vec<f64> = match liquid_assets {
            Some(liquid) => cash_flow.iter().zip(&liquid).map(|(c, l)| c + l).collect(),
            None => cash_flow.clone(),
        };

        let liable = totals.iter().filter(|&&t| t > 0.0).count();
        let scale = totals.iter().copied().fold(1.0_f64, f64::max);
        let max_rounds = nodes.max(1) as u32;

        let mut payments = totals.clone();
        let mut inflow = vec![0.0; nodes];
        let mut default_order = vec![0u32; nodes];
        let mut stats = ClearingStats::default();

        loop {
            stats.rounds += 1;
            if stats.rounds > max_rounds {
                return Err(Error::EngineInvariantViolation(format!(
                    "round {} exceeds the {}-round bound for {} nodes",
                    stats.rounds, max_rounds, nodes
                )));
            }

            accumulate_inflow(&shares, &payments, &mut inflow);

            let mut newly_defaulted = 0;
            for node in 0..nodes {
                if default_order[node] == 0
                    && totals[node] > 0.0
                    && available[node] + inflow[node] < totals[node]
                {
                    default_order[node] = stats.rounds;
                    newly_defaulted += 1;
                }
            }
            debug!(
                "round {}: {} new defaults ({} total)",
                stats.rounds,
                newly_defaulted,
                stats.defaulted + newly_defaulted
            );

            if newly_defaulted == 0 {
                break;
            }
            stats.defaulted += newly_defaulted;
            stats.sweeps += self.settle(
                &shares,
                &totals,
                &available,
                &default_order,
                scale,
                &mut payments,
                &mut inflow,
            )?;

            if stats.defaulted == liable {
                break;
            }
        }

        // Relative liabilities become the clearing payment matrix.
        let mut matrix = shares;
        for (row, &paid) in matrix.rows_mut().zip(&payments) {
            for entry in row.iter_mut() {
                entry.amount *= paid;
            }
        }

        let mut received = vec![0.0; nodes];
        for row in matrix.rows() {
            for entry in row {
                received[entry.counterparty.index()] += entry.amount;
            }
        }
        let equity = received
            .iter()
            .zip(&cash_flow)
            .zip(&payments)
            .map(|((r, c), p)| r + c - p)
            .collect();

        Ok((
            ClearingResult {
                equity_of_node: equity,
                default_order_of_node: default_order,
                clearing_payment_vector: payments,
                clearing_payment_matrix: matrix,
                iteration: 0,
            },
            stats,
        ))
    }

    /// Re-solve payments for the current default set.
    ///
    /// Defaulted nodes pay what they have, clipped to `[0, total]`; solvent
    /// nodes keep paying in full. Starting from the previous payments the
    /// sweep sequence is non-increasing. When a defaulted cycle drains
    /// slowly towards zero the sweeps stall, and the default set is solved
    /// exactly instead. Returns the sweeps used.
    #[allow(clippy::too_many_arguments)]
    fn settle(
        &self,
        shares: &LiabilityGraph,
        totals: &[f64],
        available: &[f64],
        default_order: &[u32],
        scale: f64,
        payments: &mut [f64],
        inflow: &mut [f64],
    ) -> Result<usize> {
        let threshold = self.config.tolerance * scale;
        for sweep in 1..=self.config.max_sweeps {
            let mut delta = 0.0_f64;
            for node in 0..payments.len() {
                if default_order[node] == 0 {
                    continue;
                }
                let next = (available[node] + inflow[node]).clamp(0.0, totals[node]);
                delta = delta.max((payments[node] - next).abs());
                payments[node] = next;
            }
            accumulate_inflow(shares, payments, inflow);
            if delta <= threshold {
                return Ok(sweep);
            }
        }

        let defaulted: Vec<usize> = (0..payments.len())
            .filter(|&node| default_order[node] > 0)
            .collect();
        if defaulted.len() > self.config.exact_solve_limit {
            return Err(Error::EngineInvariantViolation(format!(
                "settlement of {} defaulted nodes did not converge in {} sweeps \
                 and exceeds the exact solve limit of {}",
                defaulted.len(),
                self.config.max_sweeps,
                self.config.exact_solve_limit
            )));
        }
        warn!(
            "settlement did not converge in {} sweeps, solving {} defaulted nodes exactly",
            self.config.max_sweeps,
            defaulted.len()
        );
        solve_default_set(shares, totals, available, &defaulted, threshold, payments)?;
        accumulate_inflow(shares, payments, inflow);
        Ok(self.config.max_sweeps)
    }
}

/// Exact payments of the defaulted nodes, with every other node paying in
/// full.
///
/// Defaulted payments satisfy `p = max(0, b + Π'p)`, where `b` is each
/// node's own funds plus what solvent debtors pay it and `Π` holds the
/// shares between defaulted nodes. That is a complementarity problem over a
/// Z-matrix; its least solution is found by growing the set of nodes that
/// pay anything and solving the linear system on that set, which only ever
/// adds nodes.
fn solve_default_set(
    shares: &LiabilityGraph,
    totals: &[f64],
    available: &[f64],
    defaulted: &[usize],
    threshold: f64,
    payments: &mut [f64],
) -> Result<()> {
    let size = defaulted.len();
    let mut position = vec![usize::MAX; payments.len()];
    for (slot, &node) in defaulted.iter().enumerate() {
        position[node] = slot;
    }

    let mut own: Vec<f64> = defaulted.iter().map(|&node| available[node]).collect();
    let mut links: Vec<Vec<(usize, f64)>> = vec![Vec::new(); size];
    for (debtor, row) in shares.rows().enumerate() {
        for entry in row {
            let to = position[entry.counterparty.index()];
            if to == usize::MAX || entry.amount == 0.0 {
                continue;
            }
            match position[debtor] {
                usize::MAX => own[to] += payments[debtor] * entry.amount,
                from => links[from].push((to, entry.amount)),
            }
        }
    }

    let mut paying = vec![false; size];
    let mut solution = vec![0.0; size];
    loop {
        let mut received = vec![0.0; size];
        for (from, targets) in links.iter().enumerate() {
            if solution[from] == 0.0 {
                continue;
            }
            for &(to, share) in targets {
                received[to] += share * solution[from];
            }
        }
        let mut grew = false;
        for slot in 0..size {
            if !paying[slot] && own[slot] + received[slot] > solution[slot] + threshold {
                paying[slot] = true;
                grew = true;
            }
        }
        if !grew {
            break;
        }

        let basis: Vec<usize> = (0..size).filter(|&slot| paying[slot]).collect();
        let mut column = vec![usize::MAX; size];
        for (index, &slot) in basis.iter().enumerate() {
            column[slot] = index;
        }
        let n = basis.len();
        let mut matrix = vec![0.0; n * n];
        let mut rhs = Vec::with_capacity(n);
        for (row, &slot) in basis.iter().enumerate() {
            matrix[row * n + row] = 1.0;
            rhs.push(own[slot]);
        }
        for (col, &from) in basis.iter().enumerate() {
            for &(to, share) in &links[from] {
                let row = column[to];
                if row != usize::MAX {
                    matrix[row * n + col] -= share;
                }
            }
        }
        if !solve_dense(&mut matrix, &mut rhs, n) {
            return Err(Error::EngineInvariantViolation(format!(
                "default set of {} paying nodes has a singular settlement system",
                n
            )));
        }

        solution.iter_mut().for_each(|v| *v = 0.0);
        for (&slot, value) in basis.iter().zip(rhs) {
            solution[slot] = value.max(0.0);
        }
    }

    for (&node, value) in defaulted.iter().zip(solution) {
        payments[node] = value.clamp(0.0, totals[node]);
    }
    Ok(())
}

/// Gaussian elimination with partial pivoting on a row-major `n × n`
/// matrix. The solution replaces `rhs`; returns false if the matrix is
/// singular.
fn solve_dense(matrix: &mut [f64], rhs: &mut [f64], n: usize) -> bool {
    for col in 0..n {
        let mut pivot = col;
        for row in col + 1..n {
            if matrix[row * n + col].abs() > matrix[pivot * n + col].abs() {
                pivot = row;
            }
        }
        if matrix[pivot * n + col].abs() < 1e-12 {
            return false;
        }
        if pivot != col {
            for k in 0..n {
                matrix.swap(col * n + k, pivot * n + k);
            }
            rhs.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = matrix[row * n + col] / matrix[col * n + col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                matrix[row * n + k] -= factor * matrix[col * n + k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }
    for col in (0..n).rev() {
        let mut sum = rhs[col];
        for k in col + 1..n {
            sum -= matrix[col * n + k] * rhs[k];
        }
        rhs[col] = sum / matrix[col * n + col];
    }
    true
}

/// Clear a network with the default engine configuration.
pub fn compute(
    graph: LiabilityGraph,
    cash_flow: Vec<f64>,
    liquid_assets: Option<Vec<f64>>,
) -> Result<ClearingResult> {
    ClearingEngine::default().compute(graph, cash_flow, liquid_assets)
}

/// Normalize amounts to absolute values, zero self-loops, and replace each
/// amount by its share of the row total. Returns the row totals.
fn into_relative_liabilities(graph: &mut LiabilityGraph) -> Result<Vec<f64>> {
    let mut totals = Vec::with_capacity(graph.len());
    for (node, row) in graph.rows_mut().enumerate() {
        for entry in row.iter_mut() {
            entry.amount = if entry.counterparty.index() == node {
                0.0
            } else {
                entry.amount.abs()
            };
        }
        let total: f64 = row.iter().map(|e| e.amount).sum();
        if !total.is_finite() || total < 0.0 {
            return Err(Error::invalid(format!(
                "total liabilities of node {} is {}",
                node, total
            )));
        }
        for entry in row.iter_mut() {
            entry.amount = if total > 0.0 { entry.amount / total } else { 0.0 };
        }
        totals.push(total);
    }
    Ok(totals)
}

fn accumulate_inflow(shares: &LiabilityGraph, payments: &[f64], inflow: &mut [f64]) {
    inflow.iter_mut().for_each(|v| *v = 0.0);
    for (row, &paid) in shares.rows().zip(payments) {
        if paid == 0.0 {
            continue;
        }
        for entry in row {
            inflow[entry.counterparty.index()] += paid * entry.amount;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::Node;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_chain_cascade() {
        // 0 -> 1 -> 2, only node 0 has cash and not enough of it.
        let mut graph = LiabilityGraph::with_nodes(3);
        graph.add(0, 1, 100.0);
        graph.add(1, 2, 100.0);

        let (result, stats) = ClearingEngine::default()
            .compute_with_stats(graph, vec![50.0, 0.0, 0.0], None)
            .unwrap();

        assert_eq!(result.default_order_of_node, vec![1, 2, 0]);
        assert_abs_diff_eq!(result.clearing_payment_vector[0], 50.0);
        assert_abs_diff_eq!(result.clearing_payment_vector[1], 50.0);
        assert_abs_diff_eq!(result.equity_of_node[2], 50.0);
        // Round 2 defaults the last liable node, so no confirming round runs.
        assert_eq!(stats.rounds, 2);
        assert_eq!(stats.defaulted, 2);
    }

    #[test]
    fn test_no_default_clears_in_one_round() {
        let mut graph = LiabilityGraph::with_nodes(3);
        graph.add(0, 1, 10.0);
        graph.add(1, 2, 20.0);
        graph.add(2, 0, 30.0);

        let (result, stats) = ClearingEngine::default()
            .compute_with_stats(graph, vec![10.0, 20.0, 30.0], None)
            .unwrap();

        assert_eq!(stats.rounds, 1);
        assert_eq!(result.clearing_payment_vector, vec![10.0, 20.0, 30.0]);
        assert!(result.default_order_of_node.iter().all(|&r| r == 0));
    }

    #[test]
    fn test_mutual_default_unwinds_to_zero() {
        let mut graph = LiabilityGraph::with_nodes(2);
        graph.add(0, 1, 100.0);
        graph.add(1, 0, 100.0);

        let result = compute(graph, vec![-20.0, -20.0], None).unwrap();

        assert_eq!(result.default_order_of_node, vec![1, 1]);
        assert_abs_diff_eq!(result.clearing_payment_vector[0], 0.0);
        assert_abs_diff_eq!(result.clearing_payment_vector[1], 0.0);
        assert_abs_diff_eq!(result.equity_of_node[0], -20.0);
    }

    #[test]
    fn test_self_loop_is_zeroed_but_keeps_shape() {
        let mut graph = LiabilityGraph::with_nodes(2);
        graph.add(0, 0, 1_000.0);
        graph.add(0, 1, 10.0);

        let result = compute(graph, vec![10.0, 0.0], None).unwrap();

        assert_eq!(result.default_order_of_node, vec![0, 0]);
        assert_eq!(result.clearing_payment_vector[0], 10.0);
        let row = result.clearing_payment_matrix.row(0);
        assert_eq!(row.len(), 2);
        assert_eq!(row[0].amount, 0.0);
        assert_eq!(row[1].amount, 10.0);
    }

    #[test]
    fn test_negative_amounts_use_absolute_value() {
        let mut graph = LiabilityGraph::with_nodes(2);
        graph.add(0, 1, -30.0);

        let result = compute(graph, vec![10.0, 0.0], None).unwrap();
        assert_eq!(result.clearing_payment_vector[0], 10.0);
        assert_eq!(result.default_order_of_node[0], 1);
        assert_eq!(result.received_by(Node::new(1)), 10.0);
    }

    #[test]
    fn test_liquid_assets_absorb_shortfall() {
        let mut graph = LiabilityGraph::with_nodes(2);
        graph.add(0, 1, 100.0);

        let result = compute(graph, vec![60.0, 0.0], Some(vec![40.0, 0.0])).unwrap();
        assert_eq!(result.default_order_of_node, vec![0, 0]);
        assert_eq!(result.clearing_payment_vector[0], 100.0);
        // Equity counts cash flow only, so drawing on liquid assets shows as -40.
        assert_eq!(result.equity_of_node[0], -40.0);
    }

    #[test]
    fn test_mismatched_lengths_fail_fast() {
        let graph = LiabilityGraph::with_nodes(3);
        let err = compute(graph.clone(), vec![1.0, 2.0], None).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let err = compute(graph, vec![1.0; 3], Some(vec![0.0; 2])).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_empty_network() {
        let (result, stats) = ClearingEngine::default()
            .compute_with_stats(LiabilityGraph::new(), Vec::new(), None)
            .unwrap();
        assert_eq!(result.node_count(), 0);
        assert_eq!(stats.rounds, 1);
    }

    #[test]
    fn test_zero_liability_node_with_negative_cash_never_defaults() {
        let mut graph = LiabilityGraph::with_nodes(2);
        graph.add(1, 0, 5.0);

        let result = compute(graph, vec![-10.0, 5.0], None).unwrap();
        assert_eq!(result.default_order_of_node, vec![0, 0]);
        assert_eq!(result.equity_of_node[0], -5.0);
    }

    #[test]
    fn test_clear_carries_iteration() {
        let mut graph = LiabilityGraph::with_nodes(2);
        graph.add(0, 1, 1.0);
        let job = ClearingJob::new(graph, vec![1.0, 0.0], 42);
        let (result, _) = ClearingEngine::default().clear(job).unwrap();
        assert_eq!(result.iteration, 42);
    }

    fn mutual_graph(amount: f64) -> LiabilityGraph {
        let mut graph = LiabilityGraph::with_nodes(2);
        graph.add(0, 1, amount);
        graph.add(1, 0, amount);
        graph
    }

    #[test]
    fn test_slow_drain_is_solved_exactly() {
        // Each sweep only drains the cycle by 1, far too slow to converge.
        let (result, stats) = ClearingEngine::default()
            .compute_with_stats(mutual_graph(1e6), vec![-1.0, 0.0], None)
            .unwrap();

        assert_eq!(result.clearing_payment_vector, vec![0.0, 0.0]);
        assert_eq!(result.default_order_of_node, vec![1, 2]);
        assert_eq!(result.equity_of_node, vec![-1.0, 0.0]);
        assert_eq!(stats.rounds, 2);
        assert_eq!(stats.sweeps, 2 + EngineConfig::default().max_sweeps);
    }

    #[test]
    fn test_exact_solve_matches_sweeps() {
        let swept = compute(mutual_graph(100.0), vec![5.0, -10.0], None).unwrap();
        let engine = ClearingEngine::new(EngineConfig {
            max_sweeps: 1,
            ..Default::default()
        });
        let exact = engine
            .compute(mutual_graph(100.0), vec![5.0, -10.0], None)
            .unwrap();

        assert_eq!(swept.default_order_of_node, vec![2, 1]);
        assert_eq!(exact.default_order_of_node, vec![2, 1]);
        for node in 0..2 {
            assert_abs_diff_eq!(
                exact.clearing_payment_vector[node],
                swept.clearing_payment_vector[node],
                epsilon = 1e-9
            );
        }
        assert_abs_diff_eq!(exact.clearing_payment_vector[0], 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(exact.clearing_payment_vector[1], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sweep_cap_without_exact_solve_fails() {
        let engine = ClearingEngine::new(EngineConfig {
            max_sweeps: 10,
            exact_solve_limit: 0,
            ..Default::default()
        });
        let err = engine
            .compute(mutual_graph(1e6), vec![-1.0, 0.0], None)
            .unwrap_err();
        assert!(matches!(err, Error::EngineInvariantViolation(_)));
    }
}
