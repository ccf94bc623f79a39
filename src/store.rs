//! The persisted external collaborator (§6): wherever companies are
//! queued from and results are written back to. This crate only ships a
//! `tracing`-backed in-memory stub sufficient for tests; a production
//! deployment wires a real database-backed implementation behind the same
//! trait.

use crate::core_types::{Company, CompanyResult};
use crate::error::PipelineError;
use async_trait::async_trait;
use std::sync::Mutex;

#[async_trait]
pub trait Store: Send + Sync {
    /// Pull up to `limit` companies not yet processed in this batch run.
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Company>, PipelineError>;

    /// Persist one company's result. Called once per company, even on
    /// failure, so `fetch_pending` never returns it again.
    async fn save_result(&self, result: CompanyResult) -> Result<(), PipelineError>;
}

/// In-memory `Store` used by tests and local runs without a database.
pub struct InMemoryStore {
    pending: Mutex<Vec<Company>>,
    results: Mutex<Vec<CompanyResult>>,
}

impl InMemoryStore {
    pub fn new(companies: Vec<Company>) -> Self {
        Self { pending: Mutex::new(companies), results: Mutex::new(Vec::new()) }
    }

    pub fn results(&self) -> Vec<CompanyResult> {
        self.results.lock().expect("store mutex poisoned").clone()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Company>, PipelineError> {
        let mut pending = self.pending.lock().expect("store mutex poisoned");
        let take = limit.min(pending.len());
        Ok(pending.drain(..take).collect())
    }

    async fn save_result(&self, result: CompanyResult) -> Result<(), PipelineError> {
        self.results.lock().expect("store mutex poisoned").push(result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company(cnpj: &str) -> Company {
        Company {
            cnpj_basico: cnpj.to_string(),
            razao_social: "Acme Ltda".to_string(),
            nome_fantasia: None,
            website: None,
            municipio: None,
            uf: None,
            cnae_principal: None,
        }
    }

    #[tokio::test]
    async fn fetch_pending_drains_up_to_limit() {
        let store = InMemoryStore::new(vec![company("1"), company("2"), company("3")]);
        let batch = store.fetch_pending(2).await.unwrap();
        assert_eq!(batch.len(), 2);
        let remaining = store.fetch_pending(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }
}
