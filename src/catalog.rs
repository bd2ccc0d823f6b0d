//! One fetched batch of media records and the read-only lookups run on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::MediaRecord;

pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSource {
    Live,
    Samples,
    Empty,
}

#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    records: Vec<MediaRecord>,
    /// Shown to users when the batch is not a live fetch.
    notice: Option<String>,
    source: CatalogSource,
    fetched_at: DateTime<Utc>,
}

impl Catalog {
    pub fn new(records: Vec<MediaRecord>) -> Self {
        Self {
            records,
            notice: None,
            source: CatalogSource::Live,
            fetched_at: Utc::now(),
        }
    }

    pub fn empty(notice: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            notice: Some(notice.into()),
            source: CatalogSource::Empty,
            fetched_at: Utc::now(),
        }
    }

    /// Built-in sample films, flagged with `notice`.
    pub fn samples(notice: impl Into<String>) -> Self {
        Self {
            records: fallback_samples(),
            notice: Some(notice.into()),
            source: CatalogSource::Samples,
            fetched_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn source(&self) -> CatalogSource {
        self.source
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Case-insensitive substring match on `canonicaltitle`. A missing or
    /// blank term matches everything.
    pub fn search(&self, term: Option<&str>) -> Vec<&MediaRecord> {
        let needle = term.map(str::trim).filter(|t| !t.is_empty()).map(str::to_lowercase);
        match needle {
            None => self.records.iter().collect(),
            Some(needle) => self
                .records
                .iter()
                .filter(|r| r.canonicaltitle.to_lowercase().contains(&needle))
                .collect(),
        }
    }

    pub fn get(&self, pageid: i64) -> Option<&MediaRecord> {
        self.records.iter().find(|r| r.pageid == pageid)
    }

    /// Total runtime of the batch in hours.
    pub fn total_hours(&self) -> f64 {
        self.records.iter().map(|r| r.duration).sum::<f64>() / 3600.0
    }
}

/// "Load more" pagination over an already filtered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pager {
    page_size: usize,
    shown: usize,
}

impl Default for Pager {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl Pager {
    pub fn new(page_size: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            page_size,
            shown: page_size,
        }
    }

    pub fn visible<'a, T>(&self, items: &'a [T]) -> &'a [T] {
        &items[..self.shown.min(items.len())]
    }

    pub fn has_more(&self, total: usize) -> bool {
        self.shown < total
    }

    pub fn load_more(&mut self) {
        self.shown = self.shown.saturating_add(self.page_size);
    }

    /// Back to the first page, e.g. after the search term changes.
    pub fn reset(&mut self) {
        self.shown = self.page_size;
    }

    /// Items of zero-based page `index`, regardless of how many are shown.
    pub fn page<'a, T>(&self, items: &'a [T], index: usize) -> &'a [T] {
        let start = index.saturating_mul(self.page_size).min(items.len());
        let end = start.saturating_add(self.page_size).min(items.len());
        &items[start..end]
    }
}

fn sample(
    pageid: i64,
    name: &str,
    hash: &str,
    duration: f64,
    size: u64,
) -> MediaRecord {
    let title = format!("File:{name}");
    let file = name.replace(' ', "_");
    let encoded = file.replace('(', "%28").replace(')', "%29");
    MediaRecord {
        pageid,
        canonicaltitle: title.clone(),
        title,
        url: format!("https://upload.wikimedia.org/wikipedia/commons/{hash}/{encoded}"),
        descriptionurl: format!("https://commons.wikimedia.org/wiki/File:{file}"),
        width: 1280,
        height: 720,
        duration,
        size,
        thumburl: Some(format!(
            "https://upload.wikimedia.org/wikipedia/commons/thumb/{hash}/{encoded}/320px--{encoded}.jpg"
        )),
    }
}

/// Three well-known public-domain films.
pub fn fallback_samples() -> Vec<MediaRecord> {
    vec![
        sample(12345, "Charlie Chaplin The Gold Rush.webm", "e/e3", 5100.5, 25_600_000),
        sample(67890, "Nosferatu (1922).webm", "5/51", 5400.0, 30_720_000),
        sample(13579, "The Cabinet of Dr. Caligari (1920).ogv", "c/c3", 4500.0, 28_000_000),
    ]
}
