use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::config::{normalize_title, DEFAULT_ACCEPTED_EXTENSIONS, DEFAULT_EXCLUDED_CATEGORIES};
use crate::commons::{CategoryMember, CommonsClient, CATEGORY_PREFIX, FILE_PREFIX};
use crate::error::{ApiError, CatalogError};

/// What to follow, what to keep, and how many workers to run.
#[derive(Debug, Clone)]
pub struct CrawlPolicy {
    /// Lowercase, without the leading dot.
    pub accepted_extensions: Vec<String>,
    pub excluded_categories: HashSet<String>,
    pub workers: usize,
    pub page_size: u32,
    /// Skip categories already queued once. Turning this off lets a cyclic
    /// category graph run forever.
    pub track_visited: bool,
}

impl Default for CrawlPolicy {
    fn default() -> Self {
        Self {
            accepted_extensions: DEFAULT_ACCEPTED_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            excluded_categories: DEFAULT_EXCLUDED_CATEGORIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            workers: 10,
            page_size: 500,
            track_visited: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    MediaFile,
    UnsupportedFile,
    Subcategory,
    ExcludedCategory,
    Other,
}

impl CrawlPolicy {
    pub fn classify(&self, title: &str) -> MemberKind {
        if let Some(name) = title.strip_prefix(FILE_PREFIX) {
            if self.accepts_file(name) {
                MemberKind::MediaFile
            } else {
                MemberKind::UnsupportedFile
            }
        } else if title.starts_with(CATEGORY_PREFIX) {
            if self.excluded_categories.contains(title) {
                MemberKind::ExcludedCategory
            } else {
                MemberKind::Subcategory
            }
        } else {
            MemberKind::Other
        }
    }

    fn accepts_file(&self, name: &str) -> bool {
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => {
                let ext = ext.to_ascii_lowercase();
                self.accepted_extensions.iter().any(|a| *a == ext)
            }
            _ => false,
        }
    }
}

/// A media file found in some category listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredFile {
    pub title: String,
    pub pageid: Option<i64>,
    /// Category whose listing produced this entry.
    pub category: String,
    #[serde(default)]
    pub raw: Map<String, Value>,
}

impl DiscoveredFile {
    fn from_member(member: CategoryMember, category: &str) -> Self {
        let mut raw = member.extra;
        if let Some(ns) = member.ns {
            raw.insert("ns".into(), Value::from(ns));
        }
        Self {
            title: member.title,
            pageid: member.pageid,
            category: category.to_string(),
            raw,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    pub categories_listed: usize,
    pub categories_failed: usize,
    pub categories_truncated: usize,
    pub subcategories_queued: usize,
    pub revisits_skipped: usize,
    pub excluded_skipped: usize,
    pub files_found: usize,
    pub duplicate_files: usize,
    pub ignored_entries: usize,
    pub workers_lost: usize,
}

impl CrawlStats {
    fn merge(&mut self, other: &CrawlStats) {
        self.categories_listed += other.categories_listed;
        self.categories_failed += other.categories_failed;
        self.categories_truncated += other.categories_truncated;
        self.subcategories_queued += other.subcategories_queued;
        self.revisits_skipped += other.revisits_skipped;
        self.excluded_skipped += other.excluded_skipped;
        self.files_found += other.files_found;
        self.duplicate_files += other.duplicate_files;
        self.ignored_entries += other.ignored_entries;
        self.workers_lost += other.workers_lost;
    }
}

#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    /// Discovery order is not deterministic.
    pub files: Vec<DiscoveredFile>,
    pub stats: CrawlStats,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// FIFO of pending category titles with join semantics.
///
/// `pending` counts titles enqueued but not yet marked done. Children are
/// enqueued before their parent is marked done, so it only reaches zero once
/// the reachable graph is exhausted.
struct TraversalState {
    queue: Mutex<VecDeque<String>>,
    pending: AtomicUsize,
    ready: Notify,
    drained: Notify,
    shutdown: AtomicBool,
    visited: Option<Mutex<HashSet<String>>>,
    seen_files: Mutex<HashSet<String>>,
}

impl TraversalState {
    fn new(track_visited: bool) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
            ready: Notify::new(),
            drained: Notify::new(),
            shutdown: AtomicBool::new(false),
            visited: track_visited.then(|| Mutex::new(HashSet::new())),
            seen_files: Mutex::new(HashSet::new()),
        }
    }

    /// Returns false when the title was already visited.
    fn enqueue(&self, title: String) -> bool {
        if let Some(visited) = &self.visited {
            if !lock(visited).insert(title.clone()) {
                return false;
            }
        }
        self.pending.fetch_add(1, Ordering::SeqCst);
        lock(&self.queue).push_back(title);
        self.ready.notify_one();
        true
    }

    /// Next title, or None once shutdown is signalled.
    async fn next(&self) -> Option<String> {
        loop {
            let ready = self.ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();
            if self.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            let title = lock(&self.queue).pop_front();
            if title.is_some() {
                return title;
            }
            ready.await;
        }
    }

    fn task_done(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    async fn join(&self) {
        loop {
            let drained = self.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            drained.await;
        }
    }

    fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.ready.notify_waiters();
    }

    fn first_sighting(&self, file_title: &str) -> bool {
        lock(&self.seen_files).insert(file_title.to_string())
    }
}

/// Marks the dequeued title done even if the worker unwinds.
struct DoneGuard<'a>(&'a TraversalState);

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.0.task_done();
    }
}

struct Shared {
    state: TraversalState,
    client: CommonsClient,
    policy: CrawlPolicy,
    root: String,
    sink: Option<mpsc::Sender<DiscoveredFile>>,
    root_failure: Mutex<Option<ApiError>>,
}

#[derive(Default)]
struct WorkerOutput {
    files: Vec<DiscoveredFile>,
    stats: CrawlStats,
}

impl Shared {
    async fn handle_member(&self, member: CategoryMember, category: &str, out: &mut WorkerOutput) {
        match self.policy.classify(&member.title) {
            MemberKind::MediaFile => {
                if !self.state.first_sighting(&member.title) {
                    out.stats.duplicate_files += 1;
                    return;
                }
                let file = DiscoveredFile::from_member(member, category);
                debug!(file = %file.title, category, "media file discovered");
                out.stats.files_found += 1;
                match &self.sink {
                    Some(sink) => {
                        if let Err(mpsc::error::SendError(file)) = sink.send(file).await {
                            warn!(file = %file.title, "file sink closed; file not forwarded");
                        }
                    }
                    None => out.files.push(file),
                }
            }
            MemberKind::Subcategory => {
                let title = member.title;
                if self.state.enqueue(title.clone()) {
                    debug!(subcategory = %title, parent = category, "subcategory queued");
                    out.stats.subcategories_queued += 1;
                } else {
                    out.stats.revisits_skipped += 1;
                }
            }
            MemberKind::ExcludedCategory => {
                debug!(subcategory = %member.title, parent = category, "excluded category skipped");
                out.stats.excluded_skipped += 1;
            }
            MemberKind::UnsupportedFile | MemberKind::Other => out.stats.ignored_entries += 1,
        }
    }
}

async fn run_worker(worker: usize, shared: Arc<Shared>) -> WorkerOutput {
    let mut out = WorkerOutput::default();
    while let Some(category) = shared.state.next().await {
        let _done = DoneGuard(&shared.state);
        match shared
            .client
            .list_category_members(&category, shared.policy.page_size)
            .await
        {
            Ok(listing) => {
                out.stats.categories_listed += 1;
                if listing.truncated {
                    out.stats.categories_truncated += 1;
                }
                for member in listing.members {
                    shared.handle_member(member, &category, &mut out).await;
                }
            }
            Err(err) => {
                out.stats.categories_failed += 1;
                warn!(worker, category = %category, error = %err, "category listing failed; skipping");
                if category == shared.root {
                    *lock(&shared.root_failure) = Some(err);
                }
            }
        }
    }
    debug!(worker, files = out.files.len(), "crawler worker stopped");
    out
}

/// Breadth-first discovery of media files below a root category.
#[derive(Debug, Clone)]
pub struct Crawler {
    client: CommonsClient,
    policy: CrawlPolicy,
}

impl Crawler {
    pub fn new(client: CommonsClient, policy: CrawlPolicy) -> Self {
        Self { client, policy }
    }

    /// Collect every accepted file reachable from `root`.
    pub async fn crawl(&self, root: &str) -> Result<CrawlReport, CatalogError> {
        self.run(root, None).await
    }

    /// Like [`Crawler::crawl`] but sends each file to `sink` as it is found
    /// instead of collecting it. The sender is dropped when the crawl returns.
    pub async fn crawl_streaming(
        &self,
        root: &str,
        sink: mpsc::Sender<DiscoveredFile>,
    ) -> Result<CrawlStats, CatalogError> {
        self.run(root, Some(sink)).await.map(|report| report.stats)
    }

    async fn run(
        &self,
        root: &str,
        sink: Option<mpsc::Sender<DiscoveredFile>>,
    ) -> Result<CrawlReport, CatalogError> {
        let root = normalize_title(root);
        if !root.starts_with(CATEGORY_PREFIX) {
            return Err(CatalogError::Config(format!(
                "crawl root {root:?} is not a category"
            )));
        }
        let worker_count = self.policy.workers.max(1);
        info!(root = %root, workers = worker_count, "crawl starting");

        let shared = Arc::new(Shared {
            state: TraversalState::new(self.policy.track_visited),
            client: self.client.clone(),
            policy: self.policy.clone(),
            root: root.clone(),
            sink,
            root_failure: Mutex::new(None),
        });
        shared.state.enqueue(root.clone());

        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            workers.spawn(run_worker(worker, shared.clone()));
        }

        let mut report = CrawlReport::default();
        // Workers only return after close(); an early exit means a panic.
        loop {
            tokio::select! {
                _ = shared.state.join() => break,
                joined = workers.join_next() => match joined {
                    Some(joined) => collect_worker(joined, &mut report),
                    None => break,
                },
            }
        }
        let all_lost = workers.is_empty();
        shared.state.close();
        while let Some(joined) = workers.join_next().await {
            collect_worker(joined, &mut report);
        }

        if let Some(err) = lock(&shared.root_failure).take() {
            error!(root = %root, error = %err, "root category unavailable");
            return Err(CatalogError::RootUnavailable {
                category: root,
                source: err,
            });
        }
        if all_lost && shared.state.pending.load(Ordering::SeqCst) > 0 {
            return Err(CatalogError::Worker(format!(
                "all {worker_count} crawler workers exited with categories still queued"
            )));
        }

        info!(
            root = %root,
            files = report.stats.files_found,
            categories = report.stats.categories_listed,
            failed = report.stats.categories_failed,
            excluded = report.stats.excluded_skipped,
            revisits = report.stats.revisits_skipped,
            "crawl complete"
        );
        Ok(report)
    }
}

fn collect_worker(
    joined: Result<WorkerOutput, tokio::task::JoinError>,
    report: &mut CrawlReport,
) {
    match joined {
        Ok(out) => {
            report.stats.merge(&out.stats);
            report.files.extend(out.files);
        }
        Err(err) => {
            report.stats.workers_lost += 1;
            error!(error = %err, "crawler worker terminated abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::fake::FakeCommons;
    use std::time::Duration;

    fn crawler(fake: &Arc<FakeCommons>, workers: usize, max_outbound: usize) -> Crawler {
        let policy = CrawlPolicy {
            workers,
            ..Default::default()
        };
        Crawler::new(fake.client(max_outbound), policy)
    }

    fn titles(report: &CrawlReport) -> Vec<String> {
        let mut t: Vec<_> = report.files.iter().map(|f| f.title.clone()).collect();
        t.sort();
        t
    }

    #[test]
    fn classification_by_namespace_and_extension() {
        let policy = CrawlPolicy::default();
        assert_eq!(policy.classify("File:Nosferatu (1922).webm"), MemberKind::MediaFile);
        assert_eq!(policy.classify("File:Caligari.OGV"), MemberKind::MediaFile);
        assert_eq!(policy.classify("File:Poster.png"), MemberKind::UnsupportedFile);
        assert_eq!(policy.classify("File:.webm"), MemberKind::UnsupportedFile);
        assert_eq!(policy.classify("Category:Silent films"), MemberKind::Subcategory);
        assert_eq!(
            policy.classify("Category:Erstwhile Susan"),
            MemberKind::ExcludedCategory
        );
        assert_eq!(policy.classify("Nosferatu"), MemberKind::Other);
    }

    #[tokio::test]
    async fn keeps_only_accepted_video_files() {
        let fake = Arc::new(
            FakeCommons::new()
                .category(
                    "Category:Root",
                    &[
                        "Category:Sub A",
                        "Category:Sub B",
                        "File:One.webm",
                        "File:Two.webm",
                        "File:Poster.png",
                        "Talk page",
                    ],
                )
                .category("Category:Sub A", &[])
                .category("Category:Sub B", &[]),
        );
        let report = crawler(&fake, 10, 20).crawl("Category:Root").await.unwrap();
        assert_eq!(titles(&report), vec!["File:One.webm", "File:Two.webm"]);
        assert_eq!(report.stats.categories_listed, 3);
        assert_eq!(report.stats.ignored_entries, 2);
        assert!(report.files.iter().all(|f| f.category == "Category:Root"));
    }

    #[tokio::test]
    async fn excluded_category_is_never_listed() {
        let fake = Arc::new(
            FakeCommons::new()
                .category("Category:Root", &["Category:Keep", "Category:Skip"])
                .category("Category:Keep", &["File:Kept.webm"])
                .category("Category:Skip", &["File:Hidden.ogv"]),
        );
        let policy = CrawlPolicy {
            excluded_categories: ["Category:Skip".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let report = Crawler::new(fake.client(20), policy)
            .crawl("Category:Root")
            .await
            .unwrap();
        assert_eq!(titles(&report), vec!["File:Kept.webm"]);
        assert_eq!(fake.calls("Category:Skip"), 0);
        assert_eq!(report.stats.excluded_skipped, 1);
    }

    #[tokio::test]
    async fn cyclic_graph_terminates_and_lists_each_category_once() {
        let fake = Arc::new(
            FakeCommons::new()
                .category("Category:Root", &["Category:A"])
                .category("Category:A", &["Category:B", "File:A.webm"])
                .category("Category:B", &["Category:A", "Category:Root", "File:B.ogv"]),
        );
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            crawler(&fake, 4, 20).crawl("Category:Root"),
        )
        .await
        .expect("crawl should terminate")
        .unwrap();
        assert_eq!(titles(&report), vec!["File:A.webm", "File:B.ogv"]);
        assert_eq!(fake.calls("Category:A"), 1);
        assert_eq!(fake.calls("Category:Root"), 1);
        assert_eq!(report.stats.revisits_skipped, 2);
    }

    #[tokio::test]
    async fn file_under_two_parents_is_reported_once() {
        let fake = Arc::new(
            FakeCommons::new()
                .category("Category:Root", &["Category:Left", "Category:Right"])
                .category("Category:Left", &["File:Shared.webm"])
                .category("Category:Right", &["File:Shared.webm"]),
        );
        let policy = CrawlPolicy {
            track_visited: false,
            ..Default::default()
        };
        let report = Crawler::new(fake.client(20), policy)
            .crawl("Category:Root")
            .await
            .unwrap();
        assert_eq!(titles(&report), vec!["File:Shared.webm"]);
        assert_eq!(report.stats.duplicate_files, 1);
    }

    #[tokio::test]
    async fn failing_subcategory_does_not_stop_siblings() {
        let fake = Arc::new(
            FakeCommons::new()
                .category("Category:Root", &["Category:Broken", "Category:Fine", "File:Top.webm"])
                .category("Category:Fine", &["File:Deep.ogv"])
                .fail_always("Category:Broken"),
        );
        let report = crawler(&fake, 3, 20).crawl("Category:Root").await.unwrap();
        assert_eq!(titles(&report), vec!["File:Deep.ogv", "File:Top.webm"]);
        assert_eq!(report.stats.categories_failed, 1);
        assert_eq!(fake.calls("Category:Broken"), 5);
    }

    #[tokio::test]
    async fn unreachable_root_is_fatal() {
        let fake = Arc::new(FakeCommons::new().fail_always("Category:Root"));
        let err = crawler(&fake, 2, 20).crawl("Category:Root").await.unwrap_err();
        assert!(matches!(err, CatalogError::RootUnavailable { ref category, .. } if category == "Category:Root"));
    }

    #[tokio::test]
    async fn empty_root_yields_empty_report() {
        let fake = Arc::new(FakeCommons::new().category("Category:Root", &[]));
        let report = crawler(&fake, 10, 20).crawl("Category:Root").await.unwrap();
        assert!(report.files.is_empty());
        assert_eq!(report.stats.categories_listed, 1);
    }

    #[tokio::test]
    async fn non_category_root_is_rejected() {
        let fake = Arc::new(FakeCommons::new());
        let err = crawler(&fake, 1, 1).crawl("File:Nope.webm").await.unwrap_err();
        assert!(matches!(err, CatalogError::Config(_)));
    }

    #[tokio::test]
    async fn listing_calls_respect_outbound_limit() {
        let subs: Vec<String> = (0..30).map(|i| format!("Category:Sub {i}")).collect();
        let sub_refs: Vec<&str> = subs.iter().map(String::as_str).collect();
        let mut fake = FakeCommons::new()
            .category("Category:Root", &sub_refs)
            .latency(Duration::from_millis(10));
        for (i, sub) in subs.iter().enumerate() {
            let file = format!("File:Film {i}.webm");
            fake = fake.category(sub, &[file.as_str()]);
        }
        let fake = Arc::new(fake);
        let report = crawler(&fake, 10, 3).crawl("Category:Root").await.unwrap();
        assert_eq!(report.files.len(), 30);
        assert!(fake.peak_in_flight() <= 3, "peak {}", fake.peak_in_flight());
        assert!(fake.peak_in_flight() >= 2);
    }

    #[tokio::test]
    async fn streaming_sink_sees_every_file() {
        let fake = Arc::new(
            FakeCommons::new()
                .category("Category:Root", &["Category:Sub", "File:A.webm"])
                .category("Category:Sub", &["File:B.webm", "File:C.ogv"]),
        );
        let (tx, mut rx) = mpsc::channel::<DiscoveredFile>(1);
        let crawler = crawler(&fake, 2, 20);
        let collect = async {
            let mut seen = Vec::new();
            while let Some(file) = rx.recv().await {
                seen.push(file.title);
            }
            seen.sort();
            seen
        };
        let (stats, streamed) = tokio::join!(crawler.crawl_streaming("Category:Root", tx), collect);
        let stats = stats.unwrap();
        assert_eq!(streamed, vec!["File:A.webm", "File:B.webm", "File:C.ogv"]);
        assert_eq!(stats.files_found, 3);
    }
}
