pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::{create_router, ApiContext, AppState};

// Export engine types
pub use error::{QueryError, QueryResult};
pub use logic::{parse_descriptor, parse_query, QueryEngine, Translator};

// Export all model types
pub use model::*;

// Export seed module
pub use seed::*;

// Export store types
pub use store::{EntityStore, MemoryStore, PostgresStore};

use std::sync::Arc;

// Function for integration testing
pub async fn run_server() -> anyhow::Result<()> {
    use tokio::net::TcpListener;

    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with INFO level only (suppress DEBUG logs)
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    // Load configuration
    let config = crate::config::AppConfig::load()?;
    let registry = Arc::new(seed::demo_registry());

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;

    match config.store_backend() {
        "memory" => {
            let store = Arc::new(MemoryStore::new());
            let engine = QueryEngine::new(store, registry, config.query.default_limit);
            seed::load_demo_data(&engine).await?;
            let app = create_router().with_state(ApiContext::new(engine));
            axum::serve(listener, app).await?;
        }
        _ => {
            let database_url = config.database_url()?;
            let store =
                Arc::new(PostgresStore::new(&database_url, Arc::clone(&registry)).await?);
            let engine = QueryEngine::new(store, registry, config.query.default_limit);
            let app = create_router().with_state(ApiContext::new(engine));
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
