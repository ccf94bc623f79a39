//! Global resource orchestrator (§4.9): five named semaphore-backed
//! resource pools shared across every worker in the batch. The LLM pool's
//! tiny default capacity is deliberate — it's the VRAM-bottlenecked
//! resource, unlike the others which are effectively unbounded network
//! concurrency.

use crate::error::PipelineError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Scraper,
    Discovery,
    Llm,
    Proxy,
    HttpConnection,
}

impl ResourceKind {
    pub fn all() -> [ResourceKind; 5] {
        [Self::Scraper, Self::Discovery, Self::Llm, Self::Proxy, Self::HttpConnection]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scraper => "SCRAPER",
            Self::Discovery => "DISCOVERY",
            Self::Llm => "LLM",
            Self::Proxy => "PROXY",
            Self::HttpConnection => "HTTP_CONNECTION",
        }
    }
}

struct ResourcePool {
    semaphore: Arc<Semaphore>,
    max_capacity: usize,
    reserved: AtomicUsize,
    acquire_timeout: Duration,
}

/// A held slot in one resource pool. Dropping it releases the slot back
/// to the semaphore.
pub struct ResourcePermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

/// A provisional reservation made ahead of actually acquiring a slot, used
/// by callers that need to know capacity is available before doing setup
/// work (e.g. spinning up a worker).
pub struct Reservation {
    kind: ResourceKind,
    count: usize,
}

pub struct GlobalOrchestrator {
    pools: HashMap<ResourceKind, ResourcePool>,
}

impl GlobalOrchestrator {
    pub fn new(capacities: HashMap<ResourceKind, usize>) -> Self {
        let mut pools = HashMap::new();
        for kind in ResourceKind::all() {
            let max_capacity = capacities.get(&kind).copied().unwrap_or(1000);
            let acquire_timeout = if kind == ResourceKind::Llm {
                Duration::from_secs(45)
            } else {
                Duration::from_secs(30)
            };
            pools.insert(
                kind,
                ResourcePool {
                    semaphore: Arc::new(Semaphore::new(max_capacity)),
                    max_capacity,
                    reserved: AtomicUsize::new(0),
                    acquire_timeout,
                },
            );
        }
        Self { pools }
    }

    /// Spec-default capacities, grounded directly in the original
    /// implementation's global orchestrator: every pool defaults to 1000
    /// except LLM, deliberately capped at 6.
    pub fn with_default_capacities() -> Self {
        let mut capacities = HashMap::new();
        capacities.insert(ResourceKind::Scraper, 1000);
        capacities.insert(ResourceKind::Discovery, 1000);
        capacities.insert(ResourceKind::Llm, 6);
        capacities.insert(ResourceKind::Proxy, 1000);
        capacities.insert(ResourceKind::HttpConnection, 1000);
        Self::new(capacities)
    }

    pub async fn acquire(&self, kind: ResourceKind) -> Result<ResourcePermit, PipelineError> {
        let pool = self.pools.get(&kind).expect("all ResourceKind variants are pre-populated");
        let permit = tokio::time::timeout(pool.acquire_timeout, pool.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| PipelineError::internal(format!("{} resource pool acquire timed out", kind.as_str())))?
            .map_err(|_| PipelineError::internal(format!("{} resource pool closed", kind.as_str())))?;
        Ok(ResourcePermit { _permit: permit })
    }

    /// Reserve `count` slots ahead of use without blocking; returns `None`
    /// if the reservation would exceed capacity.
    pub fn reserve(&self, kind: ResourceKind, count: usize) -> Option<Reservation> {
        let pool = self.pools.get(&kind)?;
        let previous = pool.reserved.fetch_add(count, Ordering::SeqCst);
        if previous + count > pool.max_capacity {
            pool.reserved.fetch_sub(count, Ordering::SeqCst);
            return None;
        }
        Some(Reservation { kind, count })
    }

    pub fn unreserve(&self, reservation: Reservation) {
        if let Some(pool) = self.pools.get(&reservation.kind) {
            pool.reserved.fetch_sub(reservation.count, Ordering::SeqCst);
        }
    }

    pub fn usage_snapshot(&self) -> HashMap<&'static str, ResourceUsage> {
        self.pools
            .iter()
            .map(|(kind, pool)| {
                let available = pool.semaphore.available_permits();
                (
                    kind.as_str(),
                    ResourceUsage {
                        max_capacity: pool.max_capacity,
                        current_usage: pool.max_capacity - available,
                        reserved: pool.reserved.load(Ordering::SeqCst),
                        available,
                    },
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ResourceUsage {
    pub max_capacity: usize,
    pub current_usage: usize,
    pub reserved: usize,
    pub available: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn llm_pool_defaults_to_capacity_six() {
        let orchestrator = GlobalOrchestrator::with_default_capacities();
        let snapshot = orchestrator.usage_snapshot();
        assert_eq!(snapshot["LLM"].max_capacity, 6);
        assert_eq!(snapshot["SCRAPER"].max_capacity, 1000);
    }

    #[tokio::test]
    async fn acquire_blocks_until_permit_released() {
        let mut capacities = HashMap::new();
        capacities.insert(ResourceKind::Llm, 1);
        let orchestrator = GlobalOrchestrator::new(capacities);

        let permit = orchestrator.acquire(ResourceKind::Llm).await.unwrap();
        assert_eq!(orchestrator.usage_snapshot()["LLM"].available, 0);
        drop(permit);

        tokio::task::yield_now().await;
        assert_eq!(orchestrator.usage_snapshot()["LLM"].available, 1);
    }

    #[test]
    fn reservation_respects_capacity() {
        let mut capacities = HashMap::new();
        capacities.insert(ResourceKind::Proxy, 10);
        let orchestrator = GlobalOrchestrator::new(capacities);

        let first = orchestrator.reserve(ResourceKind::Proxy, 8);
        assert!(first.is_some());
        let second = orchestrator.reserve(ResourceKind::Proxy, 5);
        assert!(second.is_none());
    }
}
