// HTTP API server binary for commons-reel
// Crawls Commons once at startup, then serves the catalog over REST

use anyhow::{Context, Result};
use commons_reel::api::{ApiServer, AppState};
use commons_reel::pipeline::{Pipeline, PipelineConfig};
use commons_reel::util::env as env_util;

#[actix_web::main]
async fn main() -> Result<()> {
    // Load dotenv/env once (safe to call multiple times)
    env_util::init_env();
    commons_reel::tracing::init_tracing("info,actix_web=info")?;

    tracing::info!("Initializing commons-reel API server");

    let server = ApiServer::from_env()?;
    let cfg = PipelineConfig::from_env().context("loading pipeline configuration")?;
    let pipeline = Pipeline::from_config(cfg).context("building pipeline")?;

    // Fatal crawl failures fall back to an empty or sample catalog
    let state = AppState::load(pipeline, server.fallback_samples).await;

    server.run(state).await?;

    Ok(())
}
