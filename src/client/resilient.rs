//! Policy composition for one mediator.
//!
//! | Command kind | Path |
//! |--------------|------|
//! | Read (has a cache key) | cache → dedup → retry → pool → backend |
//! | Mutation | retry → pool → backend, then cache cleared and in-flight reads detached |
//! | Other | retry → pool → backend |
//!
//! Commands that create tabs are only retried when the connection itself
//! failed; once a request may have been delivered, repeating it could open
//! duplicates. Every error leaving this layer names the operation and
//! endpoint.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::discovery::MediatorEndpoint;
use crate::error::{Error, Result};
use crate::protocol::Command;

use super::{
    CacheConfig, ClientConfig, ConnectionPool, Deduplicator, ResponseCache, Retrier, TabClient,
};

// ============================================================================
// ResilientClient
// ============================================================================

/// A [`TabClient`] for one endpoint with pooling, retry, dedup and caching.
pub struct ResilientClient {
    endpoint: MediatorEndpoint,
    pool: Arc<ConnectionPool>,
    retrier: Retrier,
    dedup: Deduplicator<Value>,
    cache: ResponseCache,
    cache_config: CacheConfig,
    cancel: CancellationToken,
}

impl ResilientClient {
    /// Creates a client for `endpoint` drawing connections from `pool`.
    #[must_use]
    pub fn new(endpoint: MediatorEndpoint, pool: Arc<ConnectionPool>, config: &ClientConfig) -> Self {
        Self {
            endpoint,
            pool,
            retrier: Retrier::new(config.retry.clone()),
            dedup: Deduplicator::new(),
            cache: ResponseCache::new(),
            cache_config: config.cache,
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the response cache.
    #[must_use]
    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    /// Cancels retry waits when `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Target endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &MediatorEndpoint {
        &self.endpoint
    }

    /// Response cache.
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    async fn read(&self, key: String, command: Command) -> Result<Value> {
        let ttl = self.cache_config.ttl_for(&command);
        let generation = self.cache.generation();
        if ttl.is_some()
            && let Some(value) = self.cache.get(&key)
        {
            trace!(key, endpoint = %self.endpoint, "Cache hit");
            return Ok(value);
        }

        let pool = Arc::clone(&self.pool);
        let endpoint = self.endpoint.clone();
        let retrier = self.retrier.clone();
        let cancel = self.cancel.clone();

        let value = self
            .dedup
            .run(&key, move || async move {
                retrier
                    .execute(&cancel, || attempt(&pool, &endpoint, command.clone()))
                    .await
            })
            .await?;

        if let Some(ttl) = ttl {
            self.cache.insert_if_current(key, value.clone(), ttl, generation);
        }
        Ok(value)
    }

    async fn write(&self, command: Command) -> Result<Value> {
        let mutating = command.is_mutating();
        let run = || attempt(&self.pool, &self.endpoint, command.clone());
        let outcome = if command.is_idempotent() {
            self.retrier.execute(&self.cancel, run).await
        } else {
            self.retrier.execute_if(&self.cancel, Error::is_unsent, run).await
        };

        // A failed mutation may still have reached the browser.
        if mutating && !outcome.as_ref().is_err_and(Error::is_unsent) {
            self.invalidate();
        }
        outcome
    }

    fn invalidate(&self) {
        self.cache.clear();
        self.dedup.forget_all();
    }
}

async fn attempt(pool: &ConnectionPool, endpoint: &MediatorEndpoint, command: Command) -> Result<Value> {
    let admission = pool.get_client(endpoint)?;
    let outcome = admission.client().execute(command).await;
    admission.record(&outcome);
    outcome
}

#[async_trait]
impl TabClient for ResilientClient {
    fn describe(&self) -> String {
        self.endpoint.describe()
    }

    async fn execute(&self, command: Command) -> Result<Value> {
        let name = command.name();
        let result = match command.cache_key() {
            Some(key) => self.read(key, command).await,
            None => self.write(command).await,
        };
        result.map_err(|e| e.during(name, self.endpoint.describe()))
    }
}

// ============================================================================
// Tests
// ============================================================================
