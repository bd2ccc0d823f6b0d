use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::crawler::DiscoveredFile;
use crate::commons::CommonsClient;
use crate::error::ApiError;

/// Metadata fetch result for one discovered file.
#[derive(Debug)]
pub struct EnrichOutcome {
    pub file: DiscoveredFile,
    pub result: Result<Value, ApiError>,
}

impl EnrichOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

async fn enrich_one(client: CommonsClient, file: DiscoveredFile) -> EnrichOutcome {
    let result = client.get_media_metadata(&file.title).await;
    match &result {
        Ok(_) => debug!(file = %file.title, "metadata fetched"),
        Err(err) => warn!(file = %file.title, error = %err, "metadata fetch failed"),
    }
    EnrichOutcome { file, result }
}

/// Fetch metadata for each file of `files` as it arrives, with at most
/// `concurrency` fetches in flight. Outcomes come back in completion order.
pub fn enrich_stream<S>(
    client: CommonsClient,
    files: S,
    concurrency: usize,
) -> impl Stream<Item = EnrichOutcome>
where
    S: Stream<Item = DiscoveredFile>,
{
    files
        .map(move |file| enrich_one(client.clone(), file))
        .buffer_unordered(concurrency.max(1))
}

/// Batch form of [`enrich_stream`].
pub async fn enrich(
    client: &CommonsClient,
    files: Vec<DiscoveredFile>,
    concurrency: usize,
) -> Vec<EnrichOutcome> {
    enrich_stream(client.clone(), stream::iter(files), concurrency)
        .collect()
        .await
}

/// Adapt the crawler's file channel into a stream that ends when every
/// sender is dropped.
pub fn receiver_stream(rx: mpsc::Receiver<DiscoveredFile>) -> impl Stream<Item = DiscoveredFile> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|file| (file, rx)) })
}
