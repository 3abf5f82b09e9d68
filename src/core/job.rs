use crate::core::liability::LiabilityGraph;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Exogenous cash available to each node before network settlement.
pub type CashFlowVector = Vec<f64>;

/// Everything the engine needs to clear one simulated period.
///
/// A job is built fresh each period, consumed exactly once and then
/// dropped. The engine takes it by value so the graph's storage is reused
/// for the payment matrix and released with the result.
///
/// `liquid_assets` is optional. When present it must have one entry per
/// node; a short or empty vector is rejected rather than read as zeros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearingJob {
    pub liability_graph: LiabilityGraph,
    pub cash_flow: CashFlowVector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liquid_assets: Option<Vec<f64>>,
    pub iteration: u32,
}

impl ClearingJob {
    pub fn new(liability_graph: LiabilityGraph, cash_flow: CashFlowVector, iteration: u32) -> Self {
        Self {
            liability_graph,
            cash_flow,
            liquid_assets: None,
            iteration,
        }
    }

    pub fn with_liquid_assets(mut self, liquid_assets: Vec<f64>) -> Self {
        self.liquid_assets = Some(liquid_assets);
        self
    }

    /// Number of nodes in the job.
    pub fn node_count(&self) -> usize {
        self.liability_graph.len()
    }

    /// What each node owes, as the engine counts it: absolute amounts,
    /// self-loops excluded.
    pub fn total_liabilities(&self) -> Vec<f64> {
        self.liability_graph
            .rows()
            .enumerate()
            .map(|(node, row)| {
                row.iter()
                    .filter(|l| l.counterparty.index() != node)
                    .map(|l| l.amount.abs())
                    .sum()
            })
            .collect()
    }

    /// Check array shapes, finiteness and counterparty bounds.
    pub fn validate(&self) -> Result<()> {
        validate_inputs(
            &self.liability_graph,
            &self.cash_flow,
            self.liquid_assets.as_deref(),
        )
    }

    pub fn into_parts(self) -> (LiabilityGraph, CashFlowVector, Option<Vec<f64>>, u32) {
        (
            self.liability_graph,
            self.cash_flow,
            self.liquid_assets,
            self.iteration,
        )
    }
}

/// Shared precondition check for a graph and its per-node vectors.
pub(crate) fn validate_inputs(
    graph: &LiabilityGraph,
    cash_flow: &[f64],
    liquid_assets: Option<&[f64]>,
) -> Result<()> {
    let nodes = graph.len();
    if cash_flow.len() != nodes {
        return Err(Error::invalid(format!(
            "cash flow has {} entries, expected {} (one per node)",
            cash_flow.len(),
            nodes
        )));
    }
    if let Some(liquid) = liquid_assets {
        if liquid.len() != nodes {
            return Err(Error::invalid(format!(
                "liquid assets has {} entries, expected {} (one per node)",
                liquid.len(),
                nodes
            )));
        }
        if let Some(node) = liquid.iter().position(|v| !v.is_finite()) {
            return Err(Error::invalid(format!(
                "liquid assets of node {} is not finite",
                node
            )));
        }
    }
    if let Some(node) = cash_flow.iter().position(|v| !v.is_finite()) {
        return Err(Error::invalid(format!("cash flow of node {} is not finite", node)));
    }
    for (node, row) in graph.rows().enumerate() {
        for liability in row {
            if !liability.amount.is_finite() {
                return Err(Error::invalid(format!(
                    "liability of node {} to {} is not finite",
                    node, liability.counterparty
                )));
            }
            if liability.counterparty.index() >= nodes {
                return Err(Error::invalid(format!(
                    "node {} owes {} which is outside the {}-node graph",
                    node, liability.counterparty, nodes
                )));
            }
        }
    }
    Ok(())
}
