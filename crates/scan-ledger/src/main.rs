use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use scan_ledger::{
    api::{router, AppState},
    cache::{CacheProbe, RedisProbe},
    clock::SystemClock,
    config::AppConfig,
    db,
    service::ScanService,
    store::SqliteScanStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Arc::new(AppConfig::load()?);

    let pool = db::create_pool(&config.database_url, config.max_connections).await?;
    db::run_migrations(&pool).await?;

    let cache: Option<Arc<dyn CacheProbe>> = match &config.cache_url {
        Some(url) => match RedisProbe::new(url, config.store_timeout()) {
            Ok(probe) => Some(Arc::new(probe)),
            Err(e) => {
                warn!(error = %e, "cache disabled: invalid cache url");
                None
            }
        },
        None => None,
    };

    let service = ScanService::new(
        Arc::new(SqliteScanStore::new(pool)),
        Arc::new(SystemClock),
    );

    let state = AppState {
        service,
        cache,
        config: config.clone(),
    };

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "scan-ledger listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();
}
