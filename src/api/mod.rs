pub mod handlers;
pub mod routes;

pub use handlers::{ApiContext, AppState};
pub use routes::create_router;
