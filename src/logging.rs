//! Logging utilities for company-profiler.
//!
//! Re-exports tracing macros with log_* naming convention for consistency
//! across the crate (scraper, LLM layer, and orchestrator all log through
//! these).

// Re-export tracing macros with log_* naming
#[allow(unused_imports)]
pub use tracing::{
    debug as log_debug, error as log_error, info as log_info, trace as log_trace, warn as log_warn,
};
