pub mod auth;
pub mod handlers;
pub mod metrics_handler;
pub mod router;

pub use auth::AdminAuth;
pub use handlers::AppState;
pub use router::create_router;
