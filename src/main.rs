use restling::api::{create_router, ApiContext};
use restling::config::AppConfig;
use restling::logic::QueryEngine;
use restling::seed;
use restling::store::{MemoryStore, PostgresStore};
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

    println!("restling: generic entity REST server");

    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: server={}:{}",
        config.server.host, config.server.port
    );

    let registry = Arc::new(seed::demo_registry());
    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    println!("restling server running on http://{}", bind_address);

    match config.store_backend() {
        "memory" => {
            println!("Using in-memory store");
            let store = Arc::new(MemoryStore::new());
            let engine = QueryEngine::new(store, Arc::clone(&registry), config.query.default_limit);
            if std::env::var("LOAD_SEED_DATA").unwrap_or_default() == "true" {
                println!("Loading seed data...");
                seed::load_demo_data(&engine).await?;
                println!("Seed data loaded successfully");
            }
            let app = create_router().with_state(ApiContext::new(engine));
            axum::serve(listener, app).await?;
        }
        _ => {
            println!("Connecting to PostgreSQL...");
            let database_url = config.database_url()?;
            let store = Arc::new(PostgresStore::new(&database_url, Arc::clone(&registry)).await?);
            let engine = QueryEngine::new(store, Arc::clone(&registry), config.query.default_limit);
            if std::env::var("LOAD_SEED_DATA").unwrap_or_default() == "true" {
                println!("Loading seed data...");
                seed::load_demo_data(&engine).await?;
                println!("Seed data loaded successfully");
            }
            let app = create_router().with_state(ApiContext::new(engine));
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
