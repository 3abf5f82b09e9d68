use crate::core::liability::LiabilityGraph;
use crate::core::node::Node;
use serde::{Deserialize, Serialize};

/// Outcome of clearing one job.
///
/// `default_order_of_node[i]` is zero when node `i` paid in full and
/// otherwise the 1-based round in which it first defaulted. A round is one
/// default-detection pass followed by a full settlement of the enlarged
/// default set, not a single payment update, so a cascade that takes many
/// payment updates to unfold around a cycle can still land in one round.
/// `clearing_payment_matrix` has exactly the shape of the input graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearingResult {
    pub equity_of_node: Vec<f64>,
    pub default_order_of_node: Vec<u32>,
    pub clearing_payment_vector: Vec<f64>,
    pub clearing_payment_matrix: LiabilityGraph,
    pub iteration: u32,
}

impl ClearingResult {
    pub fn node_count(&self) -> usize {
        self.clearing_payment_vector.len()
    }

    pub fn is_defaulted(&self, node: usize) -> bool {
        self.default_order_of_node[node] > 0
    }

    /// Defaulted nodes, in the order they defaulted.
    pub fn defaulted_nodes(&self) -> Vec<Node> {
        let mut defaulted: Vec<(u32, Node)> = self
            .default_order_of_node
            .iter()
            .enumerate()
            .filter(|(_, &round)| round > 0)
            .map(|(i, &round)| (round, Node::new(i as u32)))
            .collect();
        defaulted.sort();
        defaulted.into_iter().map(|(_, node)| node).collect()
    }

    /// Total paid to `node` by every debtor.
    pub fn received_by(&self, node: Node) -> f64 {
        self.clearing_payment_matrix.incoming_total(node)
    }
}
