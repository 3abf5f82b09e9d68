use crate::core::node::Node;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// One entry of a debtor's liability row: what it owes a single counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Liability {
    pub counterparty: Node,
    pub amount: f64,
}

impl Liability {
    pub fn new(counterparty: impl Into<Node>, amount: f64) -> Self {
        Self {
            counterparty: counterparty.into(),
            amount,
        }
    }
}

/// Sparse per-node liability lists.
///
/// Row `i` lists what node `i` owes each of its counterparties in the
/// current period. Counterparties absent from a row are owed nothing. Rows
/// keep their input order; the clearing payment matrix produced by the
/// engine uses the same shape, so entry `k` of row `i` in the result is the
/// payment made against entry `k` of row `i` here.
///
/// The graph itself does not normalize amounts. Negative amounts and
/// self-loops are handled by the engine.
///
/// # Examples
///
/// ```
/// use network_clearing::core::liability::LiabilityGraph;
///
/// let mut graph = LiabilityGraph::with_nodes(3);
/// graph.add(0, 1, 25.0);
/// graph.add(0, 2, 25.0);
/// graph.add(1, 0, 50.0);
///
/// assert_eq!(graph.len(), 3);
/// assert_eq!(graph.edge_count(), 3);
/// assert_eq!(graph.total_liabilities(0), 50.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LiabilityGraph {
    rows: Vec<Vec<Liability>>,
}

impl LiabilityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// A graph of `nodes` nodes with no liabilities.
    pub fn with_nodes(nodes: usize) -> Self {
        Self {
            rows: vec![Vec::new(); nodes],
        }
    }

    pub fn from_rows(rows: Vec<Vec<Liability>>) -> Self {
        Self { rows }
    }

    /// Build a graph from parallel amount and counterparty arrays.
    ///
    /// Both arrays must have one row per node and matching row lengths.
    pub fn from_parts(amounts: Vec<Vec<f64>>, counterparties: Vec<Vec<u32>>) -> Result<Self> {
        if amounts.len() != counterparties.len() {
            return Err(Error::invalid(format!(
                "{} amount rows but {} counterparty rows",
                amounts.len(),
                counterparties.len()
            )));
        }
        let mut rows = Vec::with_capacity(amounts.len());
        for (node, (amounts, counterparties)) in amounts.into_iter().zip(counterparties).enumerate() {
            if amounts.len() != counterparties.len() {
                return Err(Error::invalid(format!(
                    "node {} has {} amounts but {} counterparties",
                    node,
                    amounts.len(),
                    counterparties.len()
                )));
            }
            rows.push(
                counterparties
                    .into_iter()
                    .zip(amounts)
                    .map(|(counterparty, amount)| Liability::new(counterparty, amount))
                    .collect(),
            );
        }
        Ok(Self { rows })
    }

    /// Record that `debtor` owes `creditor` the given amount, growing the
    /// graph to cover both nodes if needed.
    pub fn add(&mut self, debtor: u32, creditor: u32, amount: f64) {
        let needed = debtor.max(creditor) as usize + 1;
        if self.rows.len() < needed {
            self.rows.resize_with(needed, Vec::new);
        }
        self.rows[debtor as usize].push(Liability::new(creditor, amount));
    }

    /// Append a row for a new node.
    pub fn push_row(&mut self, row: Vec<Liability>) {
        self.rows.push(row);
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Total number of liability entries across all rows.
    pub fn edge_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    pub fn row(&self, node: usize) -> &[Liability] {
        &self.rows[node]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Liability]> {
        self.rows.iter().map(Vec::as_slice)
    }

    pub(crate) fn rows_mut(&mut self) -> impl Iterator<Item = &mut Vec<Liability>> {
        self.rows.iter_mut()
    }

    pub fn into_rows(self) -> Vec<Vec<Liability>> {
        self.rows
    }

    /// Raw sum of the amounts in a row, without normalization.
    pub fn total_liabilities(&self, node: usize) -> f64 {
        self.rows[node].iter().map(|l| l.amount).sum()
    }

    /// Amount owed from `debtor` to `creditor`, summing repeated entries.
    pub fn amount_owed(&self, debtor: usize, creditor: Node) -> f64 {
        self.rows[debtor]
            .iter()
            .filter(|l| l.counterparty == creditor)
            .map(|l| l.amount)
            .sum()
    }

    /// Sum over every row of the amounts owed to `creditor`.
    pub fn incoming_total(&self, creditor: Node) -> f64 {
        self.rows
            .iter()
            .flat_map(|row| row.iter())
            .filter(|l| l.counterparty == creditor)
            .map(|l| l.amount)
            .sum()
    }
}

impl FromIterator<Vec<Liability>> for LiabilityGraph {
    fn from_iter<T: IntoIterator<Item = Vec<Liability>>>(iter: T) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}
