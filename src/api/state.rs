// Shared state behind the HTTP handlers

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::RwLock;

use crate::catalog::Catalog;
use crate::error::CatalogError;
use crate::pipeline::{Pipeline, PipelineOutput};

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh is not configured for this server")]
    Disabled,
    #[error("a refresh is already running")]
    InProgress,
    #[error(transparent)]
    Pipeline(#[from] CatalogError),
}

pub struct AppState {
    catalog: RwLock<Catalog>,
    pipeline: Option<Pipeline>,
    refreshing: AtomicBool,
}

struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl AppState {
    pub fn new(catalog: Catalog, pipeline: Option<Pipeline>) -> Self {
        Self {
            catalog: RwLock::new(catalog),
            pipeline,
            refreshing: AtomicBool::new(false),
        }
    }

    /// Run the pipeline once and build state from the outcome. A fatal
    /// pipeline error yields an empty (or sample) catalog with a notice.
    pub async fn load(pipeline: Pipeline, fallback_samples: bool) -> Self {
        let catalog = match pipeline.run().await {
            Ok(out) => Catalog::new(out.records),
            Err(err) => fallback_catalog(&err, fallback_samples),
        };
        Self::new(catalog, Some(pipeline))
    }

    pub fn catalog(&self) -> &RwLock<Catalog> {
        &self.catalog
    }

    /// Re-run the pipeline and swap the batch. On failure the current batch
    /// stays in place.
    pub async fn refresh(&self) -> Result<PipelineOutput, RefreshError> {
        let pipeline = self.pipeline.as_ref().ok_or(RefreshError::Disabled)?;
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RefreshError::InProgress);
        }
        let _guard = RefreshGuard(&self.refreshing);

        let out = pipeline.run().await?;
        *self.catalog.write().await = Catalog::new(out.records.clone());
        tracing::info!(records = out.records.len(), "catalog refreshed");
        Ok(out)
    }
}

pub fn fallback_catalog(err: &CatalogError, samples: bool) -> Catalog {
    tracing::error!(error = %err, samples, "video pipeline failed; serving fallback catalog");
    let notice = format!("Could not fetch videos from Wikimedia Commons: {err}");
    if samples {
        Catalog::samples(format!("{notice}. Showing sample films."))
    } else {
        Catalog::empty(notice)
    }
}
