//! Resource orchestration: the global named-resource pool (§4.9) and the
//! multi-instance batch worker pool built on top of it (§4.11).

pub mod batch;
pub mod global;
pub mod metrics;

pub use batch::BatchOrchestrator;
pub use global::{GlobalOrchestrator, ResourceKind};
