use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use stock_meta::config::Config;
use stock_meta::http::{AppState, router};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Optional config path as the first argument
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = router(AppState {
        config: Arc::new(config),
    });

    log::info!("Server starting on http://{addr}");
    log::info!("Endpoints:");
    log::info!("  GET  /health              - Health check");
    log::info!("  POST /api/process-images  - Batch metadata stream (multipart)");
    log::info!("  POST /api/analyze-image   - Single-image metadata (multipart)");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
