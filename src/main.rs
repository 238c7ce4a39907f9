use axum::serve;
use forge_registry::api::{create_router, AppState};
use forge_registry::config::AppConfig;
use forge_registry::engine;
use forge_registry::pool::ContextPool;
use forge_registry::store::PostgresStore;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with explicit filter to suppress sqlx debug logs
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .init();

    println!("Forge Registry: Resource Catalog and Location Server");

    // Load configuration
    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: server={}:{}",
        config.server.host, config.server.port
    );

    // The configuration store starts untagged; bootstrap retags it once
    // the instance identity is known and fills the remaining slots with
    // tenant hosts.
    let pool = Arc::new(ContextPool::new(config.database.pool_contexts)?);
    pool.allocate(&config.database_url()?, None);

    let store = Arc::new(PostgresStore::new());

    println!("Discovering server instance...");
    let instance = engine::bootstrap(store.as_ref(), &pool).await?;
    println!("Serving instance {}", instance.instance_id);

    let state = Arc::new(AppState::new(
        store,
        pool,
        instance,
        forge_registry::hostname(),
        config.auth.helper_path.clone(),
    ));

    run_server(create_router().with_state(state), &config).await?;

    Ok(())
}

async fn run_server(app: axum::Router, config: &AppConfig) -> anyhow::Result<()> {
    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    println!("Forge Registry server running on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
