//! Batch input/output entities: the company record a caller enqueues, and
//! the per-company result the orchestrator produces.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use super::facts::CompanyProfile;

/// One company queued for profiling, as read from the pending-queue source
/// (spec.md §6 `Store`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    /// CNPJ root (first 8 digits), used as the stable key across retries.
    pub cnpj_basico: String,
    pub razao_social: String,
    pub nome_fantasia: Option<String>,
    pub website: Option<String>,
    pub municipio: Option<String>,
    pub uf: Option<String>,
    pub cnae_principal: Option<String>,
}

/// Outcome of profiling one company, written back through `Store`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyResult {
    pub cnpj_basico: String,
    pub status: CompanyStatus,
    pub profile: Option<CompanyProfile>,
    pub main_page_fail_reason: Option<String>,
    pub pages_total: usize,
    pub pages_ok: usize,
    pub pages_failed: usize,
    pub error_json: Option<serde_json::Value>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyStatus {
    Success,
    PartialSuccess,
    Failed,
}

/// Per-request context threaded through the scraper and LLM layers for
/// cancellation (spec.md §5) and tracing correlation.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub cnpj_basico: Arc<str>,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl RequestContext {
    pub fn new(cnpj_basico: impl Into<Arc<str>>) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            request_id: Uuid::new_v4(),
            cnpj_basico: cnpj_basico.into(),
            cancel_tx: Arc::new(tx),
            cancel_rx: rx,
        }
    }

    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolve once cancellation is requested, for use in `tokio::select!`.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellation_propagates_to_clones() {
        let ctx = RequestContext::new("12345678");
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
    }
}
