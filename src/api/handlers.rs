// HTTP request handlers for API endpoints

use crate::api::models::*;
use crate::api::state::{AppState, RefreshError};
use crate::catalog::Pager;
use crate::pipeline::MediaRecord;
use actix_web::{web, HttpResponse};

/// Service description and endpoint list
pub async fn service_info() -> HttpResponse {
    let info = ServiceInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: "Public-domain films from Wikimedia Commons".to_string(),
        endpoints: vec![
            EndpointInfo::new("GET", "/health", "Service and catalog status"),
            EndpointInfo::new("GET", "/videos", "All videos, optionally ?search=<title substring>&limit=<n>&page=<index>"),
            EndpointInfo::new("GET", "/videos/{pageid}", "One video by page id"),
            EndpointInfo::new("POST", "/videos/refresh", "Re-crawl Commons and replace the catalog"),
        ],
    };
    HttpResponse::Ok().json(ApiResponse::success(info))
}

/// Health check endpoint
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let catalog = state.catalog().read().await;
    let status = match catalog.notice() {
        None => "healthy",
        Some(_) => "degraded",
    };
    let response = ApiResponse::success(HealthResponse {
        status: status.to_string(),
        records: catalog.len(),
        source: catalog.source(),
        fetched_at: catalog.fetched_at(),
        notice: catalog.notice().map(str::to_string),
    });
    HttpResponse::Ok().json(response)
}

/// All videos, or those whose canonical title contains `search`
pub async fn list_videos(
    state: web::Data<AppState>,
    query: web::Query<VideoQuery>,
) -> HttpResponse {
    let catalog = state.catalog().read().await;
    let hits = catalog.search(query.search.as_deref());
    let shown = match (query.limit, query.page) {
        (None, None) => &hits[..],
        (limit, page) => limit
            .map(Pager::new)
            .unwrap_or_default()
            .page(&hits, page.unwrap_or(0)),
    };
    let videos: Vec<MediaRecord> = shown.iter().map(|r| (*r).clone()).collect();
    tracing::debug!(search = ?query.search, total = hits.len(), results = videos.len(), "videos listed");
    HttpResponse::Ok().json(ApiResponse::success(videos))
}

/// One video by page id
pub async fn get_video(state: web::Data<AppState>, path: web::Path<i64>) -> HttpResponse {
    let pageid = path.into_inner();
    let catalog = state.catalog().read().await;
    match catalog.get(pageid) {
        Some(video) => HttpResponse::Ok().json(ApiResponse::success(video.clone())),
        None => HttpResponse::NotFound().json(ApiResponse::<MediaRecord>::error("Video not found")),
    }
}

/// Re-run the pipeline and swap the served batch
pub async fn refresh_videos(state: web::Data<AppState>) -> HttpResponse {
    tracing::info!("Catalog refresh requested");
    match state.refresh().await {
        Ok(out) => HttpResponse::Ok().json(ApiResponse::success(RefreshResponse {
            records: out.records.len(),
            files_found: out.crawl.files_found,
            failed: out.failed,
            dropped: out.dropped,
            categories_failed: out.crawl.categories_failed,
            elapsed_ms: out.elapsed.as_millis() as u64,
        })),
        Err(err) => {
            tracing::warn!(error = %err, "Catalog refresh failed");
            let body = ApiResponse::<RefreshResponse>::error(err.to_string());
            match err {
                RefreshError::Disabled => HttpResponse::ServiceUnavailable().json(body),
                RefreshError::InProgress => HttpResponse::Conflict().json(body),
                RefreshError::Pipeline(_) => HttpResponse::BadGateway().json(body),
            }
        }
    }
}
