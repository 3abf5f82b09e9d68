use crate::core::result::ClearingResult;
use serde::{Deserialize, Serialize};

/// Network-wide view of a clearing result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearingSummary {
    pub iteration: u32,
    pub nodes: usize,
    pub defaulted: usize,
    /// Latest round in which any node defaulted.
    pub last_default_round: u32,
    /// What the network owed before clearing.
    pub total_liabilities: f64,
    /// What was actually paid.
    pub total_paid: f64,
    /// Sum of equity over nodes left with negative equity.
    pub negative_equity: f64,
}

impl ClearingSummary {
    /// Summarize a result against the liabilities of the job that produced it.
    ///
    /// `total_liabilities` is per node, as returned by
    /// [`ClearingJob::total_liabilities`](crate::core::job::ClearingJob::total_liabilities).
    pub fn new(total_liabilities: &[f64], result: &ClearingResult) -> Self {
        Self {
            iteration: result.iteration,
            nodes: result.node_count(),
            defaulted: result.default_order_of_node.iter().filter(|&&r| r > 0).count(),
            last_default_round: result.default_order_of_node.iter().copied().max().unwrap_or(0),
            total_liabilities: total_liabilities.iter().sum(),
            total_paid: result.clearing_payment_vector.iter().sum(),
            negative_equity: result
                .equity_of_node
                .iter()
                .filter(|&&e| e < 0.0)
                .sum(),
        }
    }

    /// Liabilities left unpaid after clearing.
    pub fn shortfall(&self) -> f64 {
        (self.total_liabilities - self.total_paid).max(0.0)
    }

    /// Fraction of liabilities that were paid.
    pub fn payment_ratio(&self) -> f64 {
        if self.total_liabilities == 0.0 {
            return 1.0;
        }
        self.total_paid / self.total_liabilities
    }
}

impl std::fmt::Display for ClearingSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Clearing Summary (iteration {}) ===", self.iteration)?;
        writeln!(f, "Nodes:              {}", self.nodes)?;
        writeln!(f, "Defaulted:          {}", self.defaulted)?;
        writeln!(f, "Last default round: {}", self.last_default_round)?;
        writeln!(f, "Total Liabilities:  {:.2}", self.total_liabilities)?;
        writeln!(f, "Total Paid:         {:.2}", self.total_paid)?;
        writeln!(f, "Shortfall:          {:.2}", self.shortfall())?;
        writeln!(f, "Payment Ratio:      {:.1}%", self.payment_ratio() * 100.0)?;
        writeln!(f, "Negative Equity:    {:.2}", self.negative_equity)?;
        Ok(())
    }
}
