use std::collections::HashSet;
use std::time::Duration;

use url::Url;

use super::crawler::CrawlPolicy;
use crate::commons::client::{DEFAULT_API_URL, DEFAULT_USER_AGENT};
use crate::commons::RetryPolicy;
use crate::error::CatalogError;
use crate::util::env::{env_flag, env_list, env_opt, env_parse, env_parse_opt};

pub const DEFAULT_ROOT_CATEGORY: &str = "Category:Films in the public domain";
/// Sub-trees skipped unless configured otherwise.
pub const DEFAULT_EXCLUDED_CATEGORIES: &[&str] =
    &["Category:Erstwhile Susan (play)", "Category:Erstwhile Susan"];
pub const DEFAULT_ACCEPTED_EXTENSIONS: &[&str] = &["webm", "ogv"];

/// Everything one pipeline run needs.
///
/// Env overrides (all optional):
/// - `COMMONS_API_URL`, `COMMONS_USER_AGENT`, `COMMONS_REQUEST_TIMEOUT_SECS`
/// - `COMMONS_THUMB_WIDTH` (0 disables thumbnails)
/// - `COMMONS_ROOT_CATEGORY`, `COMMONS_EXCLUDED_CATEGORIES` (`|` separated),
///   `COMMONS_ACCEPTED_EXTENSIONS` (`,` separated)
/// - `CRAWL_WORKERS`, `CRAWL_PAGE_SIZE`, `CRAWL_MAX_PAGES`, `CRAWL_TRACK_VISITED`
/// - `COMMONS_MAX_OUTBOUND`, `ENRICH_CONCURRENCY`, `PIPELINE_CHANNEL_CAPACITY`
/// - `COMMONS_MAX_ATTEMPTS`, `COMMONS_BACKOFF_MS`, `COMMONS_MAX_BACKOFF_MS`,
///   `COMMONS_BACKOFF_JITTER`
/// - `PIPELINE_TIMEOUT_SECS`
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub api_url: Url,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub thumb_width: Option<u32>,
    pub root_category: String,
    pub crawl: CrawlPolicy,
    pub max_pages_per_category: usize,
    pub max_outbound: usize,
    pub enrich_concurrency: usize,
    pub channel_capacity: usize,
    pub retry: RetryPolicy,
    pub timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            // Constant is a valid absolute URL.
            api_url: Url::parse(DEFAULT_API_URL).expect("default API url parses"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(30),
            thumb_width: Some(320),
            root_category: DEFAULT_ROOT_CATEGORY.to_string(),
            crawl: CrawlPolicy::default(),
            max_pages_per_category: 50,
            max_outbound: 20,
            enrich_concurrency: 20,
            channel_capacity: 256,
            retry: RetryPolicy::default(),
            timeout: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, CatalogError> {
        let mut cfg = Self::default();

        if let Some(raw) = env_opt("COMMONS_API_URL") {
            cfg.api_url = Url::parse(raw.trim())
                .map_err(|e| CatalogError::Config(format!("COMMONS_API_URL {raw:?}: {e}")))?;
        }
        if let Some(ua) = env_opt("COMMONS_USER_AGENT") {
            cfg.user_agent = ua;
        }
        cfg.request_timeout = Duration::from_secs(env_parse("COMMONS_REQUEST_TIMEOUT_SECS", 30u64));
        if let Some(width) = env_parse_opt::<u32>("COMMONS_THUMB_WIDTH") {
            cfg.thumb_width = Some(width).filter(|w| *w > 0);
        }
        if let Some(root) = env_opt("COMMONS_ROOT_CATEGORY") {
            cfg.root_category = normalize_title(&root);
        }
        if let Some(list) = env_list("COMMONS_EXCLUDED_CATEGORIES", '|') {
            cfg.crawl.excluded_categories = list.iter().map(|t| normalize_title(t)).collect();
        }
        if let Some(list) = env_list("COMMONS_ACCEPTED_EXTENSIONS", ',') {
            cfg.crawl.accepted_extensions = list.iter().map(|e| normalize_extension(e)).collect();
        }
        cfg.crawl.workers = env_parse("CRAWL_WORKERS", cfg.crawl.workers).max(1);
        cfg.crawl.page_size = env_parse("CRAWL_PAGE_SIZE", cfg.crawl.page_size);
        cfg.crawl.track_visited = env_flag("CRAWL_TRACK_VISITED", cfg.crawl.track_visited);
        cfg.max_pages_per_category = env_parse("CRAWL_MAX_PAGES", cfg.max_pages_per_category).max(1);
        cfg.max_outbound = env_parse("COMMONS_MAX_OUTBOUND", cfg.max_outbound).max(1);
        cfg.enrich_concurrency = env_parse("ENRICH_CONCURRENCY", cfg.enrich_concurrency).max(1);
        cfg.channel_capacity = env_parse("PIPELINE_CHANNEL_CAPACITY", cfg.channel_capacity).max(1);

        cfg.retry.max_attempts = env_parse("COMMONS_MAX_ATTEMPTS", cfg.retry.max_attempts).max(1);
        if let Some(ms) = env_parse_opt::<u64>("COMMONS_BACKOFF_MS") {
            cfg.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse_opt::<u64>("COMMONS_MAX_BACKOFF_MS") {
            cfg.retry.max_delay = Duration::from_millis(ms);
        }
        cfg.retry.jitter = env_flag("COMMONS_BACKOFF_JITTER", cfg.retry.jitter);
        cfg.timeout = env_parse_opt::<u64>("PIPELINE_TIMEOUT_SECS")
            .filter(|s| *s > 0)
            .map(Duration::from_secs);

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        if !self.root_category.starts_with(crate::commons::CATEGORY_PREFIX) {
            return Err(CatalogError::Config(format!(
                "root category {:?} must start with {:?}",
                self.root_category,
                crate::commons::CATEGORY_PREFIX
            )));
        }
        if self.crawl.accepted_extensions.is_empty() {
            return Err(CatalogError::Config("no accepted file extensions".into()));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(CatalogError::Config(format!(
                "max backoff {:?} is below base backoff {:?}",
                self.retry.max_delay, self.retry.base_delay
            )));
        }
        Ok(())
    }

    /// Replace the exclusion set.
    pub fn with_excluded<I, S>(mut self, titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.crawl.excluded_categories = titles
            .into_iter()
            .map(|t| normalize_title(t.as_ref()))
            .collect::<HashSet<_>>();
        self
    }
}

/// MediaWiki treats `_` and ` ` alike in titles; listings use spaces.
pub fn normalize_title(raw: &str) -> String {
    raw.trim().replace('_', " ")
}

pub fn normalize_extension(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_public_domain_film_crawl() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.root_category, "Category:Films in the public domain");
        assert_eq!(cfg.crawl.workers, 10);
        assert_eq!(cfg.max_outbound, 20);
        assert_eq!(cfg.retry.max_attempts, 5);
        assert!(cfg.crawl.excluded_categories.contains("Category:Erstwhile Susan"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn titles_and_extensions_are_normalized() {
        assert_eq!(normalize_title(" Category:Silent_films "), "Category:Silent films");
        assert_eq!(normalize_extension(".WebM"), "webm");
    }

    #[test]
    fn validation_rejects_non_category_root() {
        let cfg = PipelineConfig {
            root_category: "File:Oops.webm".into(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(CatalogError::Config(_))));
    }

    #[test]
    fn with_excluded_replaces_defaults() {
        let cfg = PipelineConfig::default().with_excluded(["Category:Newsreels"]);
        assert_eq!(cfg.crawl.excluded_categories.len(), 1);
        assert!(cfg.crawl.excluded_categories.contains("Category:Newsreels"));
    }
}
