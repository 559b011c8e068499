use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::api::handlers::{self, AppState};
use crate::store::traits::EntityStore;

/// The explicit operation table: every registered entity gets the same set
/// of generic handlers, bound once at startup.
pub fn create_router<S: EntityStore + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Collection operations
        .route("/:entity", get(handlers::find::<S>))
        .route("/:entity", post(handlers::create::<S>))
        .route("/:entity", put(handlers::update::<S>))
        .route("/:entity", delete(handlers::destroy::<S>))
        // Attribute metadata
        .route("/:entity/schema", get(handlers::schema::<S>))
        // Aggregates
        .route("/:entity/count", get(handlers::count::<S>))
        .route("/:entity/sum/:attr", get(handlers::sum::<S>))
        .route("/:entity/avg/:attr", get(handlers::avg::<S>))
        // Streaming
        .route("/:entity/stream", get(handlers::stream::<S>))
        .route(
            "/:entity/stream-batch",
            get(handlers::stream_batch_default::<S>),
        )
        .route("/:entity/stream-batch/:size", get(handlers::stream_batch::<S>))
        // Find-or-create
        .route("/:entity/seek", post(handlers::seek::<S>))
        // Single-record operations
        .route("/:entity/:id", get(handlers::find_one::<S>))
        .route("/:entity/:id", put(handlers::update_one::<S>))
        .route("/:entity/:id", delete(handlers::destroy_one::<S>))
        // Relation collection mutation
        .route("/:entity/:id/:attr/:value", put(handlers::populate::<S>))
        .route(
            "/:entity/:id/:attr/:value",
            delete(handlers::depopulate::<S>),
        )
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
}
