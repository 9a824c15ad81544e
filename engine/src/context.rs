//! Shared engine context
//!
//! [`EngineContext`] bundles the process-wide content cache with the size
//! limits every run is held to. Each orchestrator run or evaluation calls
//! [`EngineContext::begin_run`] to get a [`RunContext`]: the same cache, plus
//! a size budget of its own. Concurrent runs never see or clear each other's
//! usage.

use sdk::errors::EngineError;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::budget::{Admission, SizeBudgetGuard};
use crate::cache::{CacheHandle, ContentCache, ContentLoader, WorkspaceLoader};
use crate::config::{BudgetConfig, Config};
use crate::fs_guard::FileSystemGuard;
use crate::retry::RetryPolicy;

/// One piece of content loaded through the cache and admitted by the budget
#[derive(Debug, Clone, Serialize)]
pub struct LoadedContent {
    pub reference: String,
    pub key: String,
    /// Admitted text; `None` when the budget skipped the item
    pub text: Option<String>,
    pub degraded: bool,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl LoadedContent {
    /// Text to show the model, with degraded or skipped items flagged inline
    pub fn render(&self) -> String {
        match &self.text {
            Some(text) if self.degraded => format!(
                "[content for {} unavailable; placeholder shown]\n{}",
                self.reference, text
            ),
            Some(text) => text.clone(),
            None => format!(
                "[content for {} omitted: {}]",
                self.reference,
                self.skip_reason.as_deref().unwrap_or("budget exhausted")
            ),
        }
    }
}

#[derive(Clone)]
pub struct EngineContext {
    pub cache: Arc<ContentCache>,
    /// Limits applied to every run's budget
    pub limits: BudgetConfig,
}

impl EngineContext {
    pub fn new(cache: Arc<ContentCache>, limits: BudgetConfig) -> Self {
        Self { cache, limits }
    }

    /// Build the context from configuration with a loader that reads from
    /// the workspace and fetches URLs.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let guard = FileSystemGuard::new(config.core.workspace.clone())?;
        Ok(Self::with_loader(config, Arc::new(WorkspaceLoader::new(guard))))
    }

    /// Build the context from configuration with a custom loader
    pub fn with_loader(config: &Config, loader: Arc<dyn ContentLoader>) -> Self {
        let cache = ContentCache::new(loader, &config.cache, RetryPolicy::from_config(&config.retry));
        Self::new(Arc::new(cache), config.budget.clone())
    }

    /// Open a run scope with zero usage against the shared limits
    pub fn begin_run(&self) -> RunContext {
        RunContext {
            cache: Arc::clone(&self.cache),
            budget: Arc::new(SizeBudgetGuard::new(self.limits.clone())),
        }
    }
}

/// One run's view of the engine: the shared cache and the run's own budget
#[derive(Clone)]
pub struct RunContext {
    pub cache: Arc<ContentCache>,
    pub budget: Arc<SizeBudgetGuard>,
}

impl RunContext {
    /// Fetch `reference` through the cache and admit it through the budget.
    ///
    /// The returned handle keeps a reference on the cache entry until it is
    /// released with [`RunContext::release`].
    pub async fn load(&self, reference: &str) -> (LoadedContent, CacheHandle) {
        let handle = self.cache.get(reference).await;
        let loaded = self.admit(&handle);
        (loaded, handle)
    }

    /// Admit an already-fetched handle through the budget
    pub fn admit(&self, handle: &CacheHandle) -> LoadedContent {
        let (text, truncated, skip_reason) = match self.budget.reserve_text(&handle.text()) {
            Admission::Admitted { text, truncated } => (Some(text), truncated, None),
            Admission::Skipped { reason, .. } => (None, false, Some(reason)),
        };
        debug!(
            "Loaded {} as {} (degraded={}, truncated={})",
            handle.reference,
            &handle.key[..12.min(handle.key.len())],
            handle.degraded,
            truncated
        );
        LoadedContent {
            reference: handle.reference.clone(),
            key: handle.key.clone(),
            text,
            degraded: handle.degraded,
            truncated,
            skip_reason,
        }
    }

    /// Load several references in order
    pub async fn load_all(&self, references: &[String]) -> (Vec<LoadedContent>, Vec<CacheHandle>) {
        let mut loaded = Vec::with_capacity(references.len());
        let mut handles = Vec::with_capacity(references.len());
        for reference in references {
            let (content, handle) = self.load(reference).await;
            loaded.push(content);
            handles.push(handle);
        }
        (loaded, handles)
    }

    /// Release cache references taken by `load`
    pub fn release(&self, handles: &[CacheHandle]) {
        self.cache.release_all(handles);
    }
}
