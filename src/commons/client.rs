use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::limiter::OutboundLimiter;
use super::models::{CategoryListing, CategoryMembersPage, RemoteErrorBody};
use super::retry::RetryPolicy;
use crate::error::ApiError;

pub const DEFAULT_API_URL: &str = "https://commons.wikimedia.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str =
    "commons-reel/0.1 (public-domain film catalog; https://commons.wikimedia.org)";
/// Properties requested from `prop=videoinfo`.
pub const VIDEO_INFO_PROPS: &str = "canonicaltitle|url|size|dimensions|duration";
/// Hard limit the API applies to `cmlimit` for anonymous clients.
pub const MAX_CATEGORY_PAGE_SIZE: u32 = 500;
const CATEGORY_MEMBER_TYPES: &str = "page|subcat|file";
const ERROR_BODY_PREVIEW: usize = 300;

pub type QueryParams = Vec<(String, String)>;

/// One GET against the API endpoint, returning the decoded JSON body.
#[async_trait]
pub trait CommonsTransport: Send + Sync {
    async fn get_json(&self, params: &[(String, String)]) -> Result<Value, ApiError>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: Url, user_agent: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to construct HTTP client: {e}")))?;
        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl CommonsTransport for HttpTransport {
    async fn get_json(&self, params: &[(String, String)]) -> Result<Value, ApiError> {
        let resp = self
            .http
            .get(self.base_url.clone())
            .header("Accept", "application/json")
            .query(params)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: preview(body),
            });
        }
        let text = resp.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Malformed(e.to_string()))
    }
}

/// Client for the two queries the pipeline needs.
///
/// Every attempt takes a permit from the shared [`OutboundLimiter`] for the
/// duration of the HTTP call only; backoff sleeps hold no permit.
#[derive(Clone)]
pub struct CommonsClient {
    transport: Arc<dyn CommonsTransport>,
    limiter: OutboundLimiter,
    retry: RetryPolicy,
    thumb_width: Option<u32>,
    max_pages: usize,
}

impl std::fmt::Debug for CommonsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommonsClient")
            .field("limiter", &self.limiter)
            .field("retry", &self.retry)
            .field("thumb_width", &self.thumb_width)
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

impl CommonsClient {
    pub fn new(
        transport: Arc<dyn CommonsTransport>,
        limiter: OutboundLimiter,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            limiter,
            retry,
            thumb_width: None,
            max_pages: 50,
        }
    }

    /// Ask for a `thumburl` of this width alongside the video info.
    pub fn with_thumb_width(mut self, width: Option<u32>) -> Self {
        self.thumb_width = width.filter(|w| *w > 0);
        self
    }

    /// Cap on continuation pages followed per category.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    async fn send(&self, params: &[(String, String)]) -> Result<Value, ApiError> {
        let _permit = self.limiter.acquire().await?;
        let value = self.transport.get_json(params).await?;
        check_remote_error(&value)?;
        Ok(value)
    }

    /// List every member of `category`, following continuation tokens.
    pub async fn list_category_members(
        &self,
        category: &str,
        page_size: u32,
    ) -> Result<CategoryListing, ApiError> {
        let category = category.trim();
        if category.is_empty() {
            return Err(ApiError::InvalidInput("category title is empty".into()));
        }
        let limit = page_size.clamp(1, MAX_CATEGORY_PAGE_SIZE);
        let mut listing = CategoryListing {
            category: category.to_string(),
            ..Default::default()
        };
        let mut continuation: Option<QueryParams> = None;

        loop {
            let params = category_params(category, limit, continuation.as_deref());
            let this = self;
            let params_ref = &params;
            let page = self
                .retry
                .run("categorymembers", category, move || async move {
                    let value = this.send(params_ref).await?;
                    serde_json::from_value::<CategoryMembersPage>(value)
                        .map_err(|e| ApiError::Malformed(e.to_string()))
                })
                .await?;
            listing.pages_fetched += 1;
            let (members, next) = page.into_parts();
            debug!(
                category,
                page = listing.pages_fetched,
                members = members.len(),
                "category page fetched"
            );
            listing.members.extend(members);

            match next {
                Some(next) if listing.pages_fetched >= self.max_pages => {
                    warn!(
                        category,
                        pages = listing.pages_fetched,
                        pending_continue = ?next,
                        "category page cap reached; listing truncated"
                    );
                    listing.truncated = true;
                    break;
                }
                Some(next) => continuation = Some(next),
                None => break,
            }
        }
        Ok(listing)
    }

    /// Fetch the raw `videoinfo` query response for one file title.
    pub async fn get_media_metadata(&self, file_title: &str) -> Result<Value, ApiError> {
        let file_title = file_title.trim();
        if file_title.is_empty() {
            return Err(ApiError::InvalidInput("file title is empty".into()));
        }
        let params = video_info_params(file_title, self.thumb_width);
        let this = self;
        let params_ref = &params;
        self.retry
            .run("videoinfo", file_title, move || async move {
                this.send(params_ref).await
            })
            .await
    }
}

fn category_params(category: &str, limit: u32, continuation: Option<&[(String, String)]>) -> QueryParams {
    let mut params: QueryParams = vec![
        ("action".into(), "query".into()),
        ("list".into(), "categorymembers".into()),
        ("cmtitle".into(), category.to_string()),
        ("cmtype".into(), CATEGORY_MEMBER_TYPES.into()),
        ("cmlimit".into(), limit.to_string()),
        ("format".into(), "json".into()),
    ];
    if let Some(extra) = continuation {
        params.extend(extra.iter().cloned());
    }
    params
}

fn video_info_params(file_title: &str, thumb_width: Option<u32>) -> QueryParams {
    let mut params: QueryParams = vec![
        ("action".into(), "query".into()),
        ("titles".into(), file_title.to_string()),
        ("prop".into(), "videoinfo".into()),
        ("viprop".into(), VIDEO_INFO_PROPS.into()),
        ("format".into(), "json".into()),
    ];
    if let Some(width) = thumb_width {
        params.push(("viurlwidth".into(), width.to_string()));
    }
    params
}

/// At most `ERROR_BODY_PREVIEW` bytes, cut on a char boundary.
fn preview(mut body: String) -> String {
    if body.len() > ERROR_BODY_PREVIEW {
        let cut = (0..=ERROR_BODY_PREVIEW)
            .rev()
            .find(|&i| body.is_char_boundary(i))
            .unwrap_or(0);
        body.truncate(cut);
    }
    body
}

fn check_remote_error(value: &Value) -> Result<(), ApiError> {
    match value.get("error") {
        Some(err) => {
            let body: RemoteErrorBody = serde_json::from_value(err.clone()).unwrap_or(RemoteErrorBody {
                code: "unknown".into(),
                info: err.to_string(),
            });
            Err(ApiError::Remote {
                code: body.code,
                info: body.info,
            })
        }
        None => Ok(()),
    }
}
