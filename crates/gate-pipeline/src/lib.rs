//! Signal quality gate: runs a candidate trading signal through the circuit
//! breaker, market-structure tracker, regime classifier, confluence scorer and
//! execution guard, and returns one structured decision.

pub mod config;
pub mod feed;
pub mod metrics;
pub mod pipeline;

pub use config::{GateConfig, PipelineConfig};
pub use feed::{JsonlSnapshotFeed, SnapshotFeed};
pub use metrics::PipelineMetrics;
pub use pipeline::GatePipeline;
