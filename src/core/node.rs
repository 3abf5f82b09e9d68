use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of one economic agent in the clearing network.
///
/// A node carries no identity beyond its position `0..N`. Mapping nodes
/// back to banks, firms or households is the caller's business.
///
/// # Examples
///
/// ```
/// use network_clearing::core::node::Node;
///
/// let bank = Node::new(3);
/// assert_eq!(bank.index(), 3);
/// assert_eq!(bank.to_string(), "#3");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Node(u32);

impl Node {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Position of this node in per-node arrays.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for Node {
    fn from(index: u32) -> Self {
        Self::new(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ordering() {
        assert!(Node::new(1) < Node::new(2));
        assert_eq!(Node::from(7), Node::new(7));
    }

    #[test]
    fn test_node_serializes_as_plain_integer() {
        let json = serde_json::to_string(&Node::new(42)).unwrap();
        assert_eq!(json, "42");
    }
}
