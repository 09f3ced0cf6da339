use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::auth::AppStateInner;
use parley_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "parley=debug,parley_server=debug,parley_db=debug,parley_gateway=debug,parley_api=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;
    info!(
        "Stream settings: poll every {:?}, buffer {} per subscription",
        config.session.poll_interval, config.session.buffer
    );

    // Init database
    let db = parley_db::Database::open(&config.db_path)?;

    let state = AppStateInner::new(db, &config.tokens, config.session);
    let registry = state.registry.clone();

    let app = parley_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(
        "Parley server stopped ({} thread(s) still had live streams)",
        registry.thread_count()
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
