//! # company-profiler
//!
//! Batch B2B company-profiling pipeline: given a CNPJ and a candidate
//! website, discover the right domain if one isn't already known, scrape
//! the main page and a handful of high-value subpages, chunk the text,
//! extract grounded facts with an LLM, and assemble a structured company
//! profile.
//!
//! ## Pipeline
//!
//! `discover (optional) -> probe -> scrape -> chunk -> extract facts ->
//! merge -> build profile`, orchestrated across many companies at once by
//! [`orchestrator::BatchOrchestrator`] under a shared set of resource
//! pools ([`orchestrator::GlobalOrchestrator`]).
//!
//! ## Example
//!
//! ```rust,no_run
//! use company_profiler::config::AppConfig;
//! use company_profiler::core_types::Company;
//! use company_profiler::orchestrator::{BatchOrchestrator, GlobalOrchestrator};
//! use company_profiler::proxy_pool::ProxyPool;
//! use company_profiler::store::{InMemoryStore, Store};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = AppConfig::from_env()?;
//! let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(vec![]));
//! let proxy_pool = Arc::new(ProxyPool::new(config.proxy_source.clone()));
//! let global = Arc::new(GlobalOrchestrator::with_default_capacities());
//! // call_manager is built from config.providers; see main.rs for the full wiring.
//! # Ok(())
//! # }
//! ```

#![allow(clippy::missing_errors_doc)]

pub mod chunker;
pub mod config;
pub mod core_types;
pub mod error;
pub mod http_client;
pub mod llm;
pub mod orchestrator;
pub mod profile;
pub mod proxy_pool;
pub mod rate_limiter;
pub mod scraper;
pub mod search;
pub mod store;
pub mod url_prober;

pub(crate) mod internals;
pub(crate) mod logging;

pub use error::{PipelineError, PipelineResult};
