use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pano_media_server::{AppState, Config, router};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pano_media_server=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    let state = Arc::new(AppState::new(config));
    state.storage.ensure_dir().await?;
    info!(
        output_dir = %state.config.output_dir.display(),
        files_base_url = %state.config.files_base_url,
        origins = ?state.config.allowed_origins,
        stitcher = state.engine.name(),
        "configuration loaded"
    );

    let bind_address = state.config.bind_address.clone();
    let app = router(state);
    let tcp_listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!("pano-media-server listening on http://{}", bind_address);

    axum::serve(tcp_listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
