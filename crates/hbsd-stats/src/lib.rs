//! HBSD statistics
//!
//! History-based estimates of how bundles spread through the network:
//! - Elapsed-time bin axis
//! - Per-node copy and seen bitmaps, versioned per reporting node
//! - Lazily computed copies, seen, delay and delivery-ratio forecasts
//! - Network size and meeting-time estimators
//! - Text digests for exchanging records with peers

pub mod axis;
pub mod digest;
pub mod engine;
pub mod error;
pub mod message;
pub mod network;
pub mod node;

pub use axis::BinAxis;
pub use digest::{DigestMessage, VersionEntry};
pub use engine::{
    now_secs, BinAverages, EngineStats, MergeSummary, StatisticsConfig, StatisticsEngine,
};
pub use error::{Result, StatsError};
pub use message::StatMessage;
pub use network::{NetworkEstimate, NetworkNode, NetworkTable};
pub use node::{RemoteNodeRecord, StatNode};
