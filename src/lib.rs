//! # network-clearing
//!
//! Clearing payment vectors for networks of financial agents under
//! cascading default.
//!
//! Given who owes whom (a sparse liability graph) and the exogenous cash
//! each agent holds, the engine computes what every agent actually pays
//! once shortfalls have propagated through the network, in the tradition of
//! Eisenberg and Noe (2001). Large networks can be cleared on a separate
//! compute server over a streaming, length-prefixed wire protocol.
//!
//! ## Architecture
//!
//! - **core**: Nodes, liability graphs, clearing jobs and results
//! - **clearing**: The clearing engine and result summaries
//! - **wire**: Frames, compression and the job/result codec
//! - **net**: Compute server, compute client and their configuration
//! - **simulation**: Random network generation for stress testing

pub mod clearing;
pub mod core;
pub mod error;
pub mod net;
pub mod wire;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::clearing::engine::{compute, ClearingEngine, ClearingStats, EngineConfig};
    pub use crate::clearing::summary::ClearingSummary;
    pub use crate::core::job::{CashFlowVector, ClearingJob};
    pub use crate::core::liability::{Liability, LiabilityGraph};
    pub use crate::core::node::Node;
    pub use crate::core::result::ClearingResult;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::net::client::ComputeClient;
    pub use crate::net::config::{ClientConfig, ServerConfig};
    pub use crate::net::server::ComputeServer;
    pub use crate::wire::codec::CodecOptions;
    pub use crate::wire::frame::Compression;
}
