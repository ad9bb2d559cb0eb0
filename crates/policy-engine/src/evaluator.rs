//! The policy evaluator handle and its narrow query interface.
//!
//! [`PolicyEngine`] is the seam the rest of the system codes against
//! (`query_value` / `close`). [`RegoEvaluator`] is the shipped
//! implementation over a compiled [`PolicySet`].

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::compile::PolicySet;
use crate::error::PolicyError;
use crate::source::PolicySource;
use crate::Result;

/// Narrow query interface over an opened policy evaluation unit.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Evaluate `package.binding` against `input`.
    ///
    /// `Ok(None)` means the policy produced no answer for this input.
    async fn query_value(&self, query: &str, input: &Value) -> Result<Option<Value>>;

    /// Release evaluation resources. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Query and decode the answer into `T`.
pub async fn query_config<T: DeserializeOwned>(
    engine: &dyn PolicyEngine,
    query: &str,
    input: &Value,
) -> Result<Option<T>> {
    match engine.query_value(query, input).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| PolicyError::Decode {
                query: query.to_string(),
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Query that gives up waiting as soon as `cancel` fires.
pub async fn query_cancellable(
    engine: &dyn PolicyEngine,
    query: &str,
    input: &Value,
    cancel: &CancellationToken,
) -> Result<Option<Value>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(query = %query, "policy query cancelled");
            Err(PolicyError::Cancelled(query.to_string()))
        }
        result = engine.query_value(query, input) => result,
    }
}

/// Evaluator over policy sources compiled into one [`PolicySet`].
///
/// The compiled set is shared behind an `Arc`; each query takes a snapshot
/// and evaluates without holding the lock, so concurrent queries never
/// block each other. Dropping the handle releases everything; [`close`]
/// releases it early.
///
/// [`close`]: PolicyEngine::close
pub struct RegoEvaluator {
    sources: Vec<PolicySource>,
    compiled: RwLock<Option<Arc<PolicySet>>>,
}

impl std::fmt::Debug for RegoEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegoEvaluator")
            .field("sources", &self.sources.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RegoEvaluator {
    /// Read and compile `sources`. Either every source compiles or no
    /// handle is returned.
    pub fn load(sources: &[PolicySource]) -> Result<Self> {
        let started = Instant::now();
        let set = PolicySet::from_sources(sources)?;
        info!(
            event = "policy.loaded",
            sources = sources.len(),
            packages = set.packages().count(),
            shadowed = set.shadowed().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
        );
        Ok(Self::from_set(sources.to_vec(), set))
    }

    /// [`load`](Self::load) on the blocking thread pool.
    pub async fn load_async(sources: Vec<PolicySource>) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::load(&sources))
            .await
            .map_err(|e| PolicyError::Task(e.to_string()))?
    }

    /// Compile in-memory policy text (each paired with its source identity).
    pub fn from_texts(texts: Vec<(PolicySource, String)>) -> Result<Self> {
        let sources = texts.iter().map(|(s, _)| s.clone()).collect();
        let set = PolicySet::compile(texts)?;
        Ok(Self::from_set(sources, set))
    }

    fn from_set(sources: Vec<PolicySource>, set: PolicySet) -> Self {
        Self {
            sources,
            compiled: RwLock::new(Some(Arc::new(set))),
        }
    }

    pub fn sources(&self) -> &[PolicySource] {
        &self.sources
    }

    /// Shared handle to the compiled set, or `EvaluatorClosed`.
    pub fn snapshot(&self) -> Result<Arc<PolicySet>> {
        self.compiled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
            .ok_or(PolicyError::EvaluatorClosed)
    }

    /// Package names currently loaded (empty once closed).
    pub fn package_names(&self) -> Vec<String> {
        self.snapshot()
            .map(|set| set.packages().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Synchronous evaluation on the calling thread.
    pub fn evaluate(&self, query: &str, input: &Value) -> Result<Option<Value>> {
        let set = self.snapshot()?;
        let result = set.evaluate(query, input);
        log_query(query, &result);
        result
    }
}

fn log_query(query: &str, result: &Result<Option<Value>>) {
    match result {
        Ok(answer) => debug!(event = "policy.query", query = %query, defined = answer.is_some()),
        Err(err) => warn!(event = "policy.query_failed", query = %query, error = %err),
    }
}

#[async_trait]
impl PolicyEngine for RegoEvaluator {
    async fn query_value(&self, query: &str, input: &Value) -> Result<Option<Value>> {
        let set = self.snapshot()?;
        let owned_query = query.to_string();
        let input = input.clone();
        let result = tokio::task::spawn_blocking(move || set.evaluate(&owned_query, &input))
            .await
            .map_err(|e| PolicyError::Task(e.to_string()))?;
        log_query(query, &result);
        result
    }

    fn close(&self) {
        let released = self
            .compiled
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if released.is_some() {
            debug!(sources = self.sources.len(), "policy evaluator closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.compiled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
