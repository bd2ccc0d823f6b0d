//! Crawl, enrich and aggregate in one invocation.
//!
//! Each run owns a fresh [`OutboundLimiter`] shared by the crawler and the
//! enrichment fan-out, so `max_outbound` bounds every HTTP attempt the run
//! makes.

pub mod aggregate;
pub mod config;
pub mod crawler;
pub mod enrich;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

pub use aggregate::{aggregate, aggregate_report, AggregateReport, MediaRecord};
pub use config::PipelineConfig;
pub use crawler::{CrawlPolicy, CrawlReport, CrawlStats, Crawler, DiscoveredFile, MemberKind};
pub use enrich::{enrich, enrich_stream, receiver_stream, EnrichOutcome};

use crate::commons::{CommonsClient, CommonsTransport, HttpTransport, OutboundLimiter};
use crate::error::CatalogError;

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    /// Sorted by `pageid`.
    pub records: Vec<MediaRecord>,
    pub crawl: CrawlStats,
    pub failed: usize,
    pub dropped: usize,
    #[serde(skip)]
    pub elapsed: Duration,
}

#[derive(Clone)]
pub struct Pipeline {
    cfg: PipelineConfig,
    transport: Arc<dyn CommonsTransport>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("cfg", &self.cfg).finish()
    }
}

impl Pipeline {
    /// HTTP-backed pipeline for `cfg`.
    pub fn from_config(cfg: PipelineConfig) -> Result<Self, CatalogError> {
        cfg.validate()?;
        let transport = HttpTransport::new(cfg.api_url.clone(), &cfg.user_agent, cfg.request_timeout)?;
        Ok(Self::with_transport(cfg, Arc::new(transport)))
    }

    pub fn with_transport(cfg: PipelineConfig, transport: Arc<dyn CommonsTransport>) -> Self {
        Self { cfg, transport }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.cfg
    }

    fn client(&self) -> CommonsClient {
        CommonsClient::new(
            self.transport.clone(),
            OutboundLimiter::new(self.cfg.max_outbound),
            self.cfg.retry.clone(),
        )
        .with_thumb_width(self.cfg.thumb_width)
        .with_max_pages(self.cfg.max_pages_per_category)
    }

    /// Streaming run: files are enriched while the crawl is still going.
    pub async fn run(&self) -> Result<PipelineOutput, CatalogError> {
        self.bounded(self.run_streaming()).await
    }

    /// Crawl to completion first, then enrich the collected files.
    pub async fn run_batch(&self) -> Result<PipelineOutput, CatalogError> {
        self.bounded(self.run_staged()).await
    }

    /// Crawl only.
    pub async fn discover(&self) -> Result<CrawlReport, CatalogError> {
        let crawler = Crawler::new(self.client(), self.cfg.crawl.clone());
        self.bounded(crawler.crawl(&self.cfg.root_category)).await
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, CatalogError>
    where
        F: std::future::Future<Output = Result<T, CatalogError>>,
    {
        match self.cfg.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| CatalogError::Timeout(limit))?,
            None => fut.await,
        }
    }

    async fn run_streaming(&self) -> Result<PipelineOutput, CatalogError> {
        let started = Instant::now();
        let client = self.client();
        let crawler = Crawler::new(client.clone(), self.cfg.crawl.clone());
        let (tx, rx) = mpsc::channel(self.cfg.channel_capacity.max(1));

        let crawl = crawler.crawl_streaming(&self.cfg.root_category, tx);
        let enrichment = enrich_stream(client, receiver_stream(rx), self.cfg.enrich_concurrency).fold(
            AggregateReport::default(),
            |mut report, outcome| async move {
                report.push(&outcome);
                report
            },
        );
        let (crawl, report) = tokio::join!(crawl, enrichment);
        Ok(self.finish(crawl?, report, started))
    }

    async fn run_staged(&self) -> Result<PipelineOutput, CatalogError> {
        let started = Instant::now();
        let client = self.client();
        let crawler = Crawler::new(client.clone(), self.cfg.crawl.clone());
        let crawled = crawler.crawl(&self.cfg.root_category).await?;
        let outcomes = enrich(&client, crawled.files, self.cfg.enrich_concurrency).await;
        Ok(self.finish(crawled.stats, aggregate_report(&outcomes), started))
    }

    fn finish(&self, crawl: CrawlStats, report: AggregateReport, started: Instant) -> PipelineOutput {
        let AggregateReport {
            mut records,
            failed,
            dropped,
        } = report;
        records.sort_by_key(|r| r.pageid);
        let elapsed = started.elapsed();
        info!(
            root = %self.cfg.root_category,
            records = records.len(),
            files = crawl.files_found,
            failed,
            dropped,
            elapsed_ms = elapsed.as_millis() as u64,
            "pipeline finished"
        );
        PipelineOutput {
            records,
            crawl,
            failed,
            dropped,
            elapsed,
        }
    }
}
