//! Access-point address pool.
//!
//! The pool is owned by the session and filled from an [`AccessPointSource`]
//! the first time an address is needed. Addresses are handed out in order and
//! the pool refills from the source once drained.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::SessionError;

#[async_trait]
pub trait AccessPointSource: Send + Sync {
    /// Current `host:port` endpoints, best first.
    async fn fetch(&self) -> Result<Vec<String>, SessionError>;
}

/// Fixed list, for tests and private deployments.
pub struct StaticAccessPoints(pub Vec<String>);

#[async_trait]
impl AccessPointSource for StaticAccessPoints {
    async fn fetch(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.0.clone())
    }
}

pub struct ApResolver {
    source: Arc<dyn AccessPointSource>,
    fallback: String,
    pool: OnceCell<Mutex<VecDeque<String>>>,
}

impl ApResolver {
    pub fn new(source: Arc<dyn AccessPointSource>, fallback: impl Into<String>) -> Self {
        Self {
            source,
            fallback: fallback.into(),
            pool: OnceCell::new(),
        }
    }

    /// Next address to try. Never fails: falls back to the static address.
    pub async fn resolve(&self) -> String {
        let pool = self
            .pool
            .get_or_init(|| async { Mutex::new(self.fetch_or_empty().await) })
            .await;

        let next = pool.lock().pop_front();
        if let Some(addr) = next {
            return addr;
        }

        let fresh = self.fetch_or_empty().await;
        let mut guard = pool.lock();
        guard.extend(fresh);
        match guard.pop_front() {
            Some(addr) => addr,
            None => {
                debug!(fallback = %self.fallback, "resolver empty, using fallback access point");
                self.fallback.clone()
            }
        }
    }

    async fn fetch_or_empty(&self) -> VecDeque<String> {
        match self.source.fetch().await {
            Ok(addrs) => addrs.into(),
            Err(err) => {
                warn!(error = %err, "access point lookup failed");
                VecDeque::new()
            }
        }
    }
}
