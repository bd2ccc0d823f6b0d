//! Scripted in-memory transport for tests.
//!
//! Keys are the `cmtitle` of listing requests and the `titles` of metadata
//! requests. Tracks per-key call counts and the peak number of concurrent
//! in-flight requests.
//!
//! [`serve_http`] is a minimal local HTTP/1.1 server for exercising the
//! reqwest transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use super::client::{CommonsClient, CommonsTransport};
use super::limiter::OutboundLimiter;
use super::retry::RetryPolicy;
use crate::error::ApiError;

#[derive(Default)]
pub(crate) struct FakeCommons {
    categories: HashMap<String, Vec<Vec<String>>>,
    metadata: HashMap<String, Value>,
    failures: Mutex<HashMap<String, u32>>,
    latency: Duration,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeCommons {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Single-page category listing.
    pub(crate) fn category(self, title: &str, members: &[&str]) -> Self {
        self.category_pages(title, vec![members.to_vec()])
    }

    /// Category listing split across continuation pages.
    pub(crate) fn category_pages(mut self, title: &str, pages: Vec<Vec<&str>>) -> Self {
        let pages = pages
            .into_iter()
            .map(|p| p.into_iter().map(str::to_string).collect())
            .collect();
        self.categories.insert(title.to_string(), pages);
        self
    }

    /// Well-formed nested `videoinfo` response for `title`.
    pub(crate) fn video(self, title: &str, pageid: i64) -> Self {
        let file = title.trim_start_matches("File:").replace(' ', "_");
        let body = json!({
            "batchcomplete": "",
            "query": {
                "pages": {
                    pageid.to_string(): {
                        "pageid": pageid,
                        "ns": 6,
                        "title": title,
                        "imagerepository": "local",
                        "videoinfo": [{
                            "canonicaltitle": title,
                            "url": format!("https://upload.wikimedia.org/wikipedia/commons/a/ab/{file}"),
                            "descriptionurl": format!("https://commons.wikimedia.org/wiki/File:{file}"),
                            "descriptionshorturl": format!("https://commons.wikimedia.org/w/index.php?curid={pageid}"),
                            "width": 1280,
                            "height": 720,
                            "duration": 5400.0,
                            "size": 30720000
                        }]
                    }
                }
            }
        });
        self.raw_metadata(title, body)
    }

    pub(crate) fn raw_metadata(mut self, title: &str, body: Value) -> Self {
        self.metadata.insert(title.to_string(), body);
        self
    }

    /// Fail the next `times` requests for `key`.
    pub(crate) fn fail(self, key: &str, times: u32) -> Self {
        self.lock_failures().insert(key.to_string(), times);
        self
    }

    pub(crate) fn fail_always(self, key: &str) -> Self {
        self.fail(key, u32::MAX)
    }

    pub(crate) fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn calls(&self, key: &str) -> usize {
        self.lock_calls().get(key).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.lock_calls().values().sum()
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Client over this fake with millisecond backoff.
    pub(crate) fn client(self: &Arc<Self>, max_outbound: usize) -> CommonsClient {
        CommonsClient::new(
            self.clone(),
            OutboundLimiter::new(max_outbound),
            fast_retry(),
        )
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn should_fail(&self, key: &str) -> bool {
        let mut failures = self.lock_failures();
        let Some(left) = failures.get_mut(key) else {
            return false;
        };
        match *left {
            0 => false,
            u32::MAX => true,
            _ => {
                *left -= 1;
                true
            }
        }
    }

    fn listing_page(&self, title: &str, params: &HashMap<&str, &str>) -> Value {
        let pages = self.categories.get(title);
        let index: usize = params
            .get("cmcontinue")
            .and_then(|c| c.strip_prefix("page|"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let members: Vec<Value> = pages
            .and_then(|p| p.get(index))
            .map(|m| m.iter().map(|t| member_json(t)).collect())
            .unwrap_or_default();
        let mut body = json!({
            "batchcomplete": "",
            "query": {"categorymembers": members}
        });
        if pages.map(|p| index + 1 < p.len()).unwrap_or(false) {
            body["continue"] = json!({
                "cmcontinue": format!("page|{}", index + 1),
                "continue": "-||"
            });
        }
        body
    }

    fn metadata_for(&self, title: &str) -> Value {
        self.metadata.get(title).cloned().unwrap_or_else(|| {
            json!({
                "batchcomplete": "",
                "query": {"pages": {"-1": {"ns": 6, "title": title, "missing": ""}}}
            })
        })
    }
}

fn member_json(title: &str) -> Value {
    let ns = if title.starts_with("File:") {
        6
    } else if title.starts_with("Category:") {
        14
    } else {
        0
    };
    json!({"ns": ns, "title": title})
}

pub(crate) fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        jitter: false,
    }
}

#[async_trait]
impl CommonsTransport for FakeCommons {
    async fn get_json(&self, params: &[(String, String)]) -> Result<Value, ApiError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak.fetch_max(now, Ordering::SeqCst);

        let params: HashMap<&str, &str> = params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let key = params
            .get("cmtitle")
            .or_else(|| params.get("titles"))
            .copied()
            .unwrap_or_default()
            .to_string();
        *self.lock_calls().entry(key.clone()).or_default() += 1;

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.should_fail(&key) {
            return Err(ApiError::Status {
                status: 503,
                body: format!("scripted failure for {key}"),
            });
        }
        if params.get("list") == Some(&"categorymembers") {
            Ok(self.listing_page(&key, &params))
        } else {
            Ok(self.metadata_for(&key))
        }
    }
}

/// Serve `respond(request_line) -> (status, body)` on a local port and return
/// the API URL pointing at it. One response per connection.
pub(crate) async fn serve_http<F>(respond: F) -> Url
where
    F: Fn(&str) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let respond = Arc::new(respond);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let respond = respond.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 16 * 1024];
                let mut read = 0;
                while read < buf.len() {
                    match socket.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => read += n,
                    }
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let head = String::from_utf8_lossy(&buf[..read]);
                let request_line = head.lines().next().unwrap_or_default().to_string();
                let (status, body) = respond(&request_line);
                let response = format!(
                    "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    Url::parse(&format!("http://{addr}/w/api.php")).unwrap()
}
