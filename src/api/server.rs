// API server implementation using actix-web

use crate::api::{middleware, routes, AppState};
use crate::util::env as env_util;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};

pub struct ApiServer {
    pub host: String,
    pub port: u16,
    pub allowed_origins: String,
    /// Serve the built-in sample films when the startup crawl fails.
    pub fallback_samples: bool,
}

impl ApiServer {
    /// Create server from environment variables
    pub fn from_env() -> Result<Self> {
        env_util::init_env();

        let host = env_util::env_opt("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = env_util::env_opt("API_PORT")
            .unwrap_or_else(|| "8000".to_string())
            .trim()
            .parse()
            .context("Invalid API_PORT")?;
        let allowed_origins = env_util::env_opt("ALLOWED_ORIGINS").unwrap_or_else(|| "*".to_string());
        let fallback_samples = env_util::env_flag("CATALOG_FALLBACK_SAMPLES", false);

        Ok(Self {
            host,
            port,
            allowed_origins,
            fallback_samples,
        })
    }

    /// Start the HTTP server
    pub async fn run(self, state: AppState) -> Result<()> {
        let bind_addr = format!("{}:{}", self.host, self.port);

        {
            let catalog = state.catalog().read().await;
            tracing::info!(
                host = %self.host,
                port = %self.port,
                records = catalog.len(),
                source = ?catalog.source(),
                "Starting commons-reel API server"
            );
        }

        let state = web::Data::new(state);
        let allowed_origins = self.allowed_origins.clone();

        HttpServer::new(move || {
            let (logger, compress) = middleware::setup_middleware();
            let cors = middleware::setup_cors(&allowed_origins);

            App::new()
                .app_data(state.clone())
                .wrap(logger)
                .wrap(compress)
                .wrap(cors)
                .configure(routes::configure_routes)
        })
        .bind(&bind_addr)
        .with_context(|| format!("Failed to bind to {}", bind_addr))?
        .run()
        .await
        .context("HTTP server error")?;

        Ok(())
    }
}
