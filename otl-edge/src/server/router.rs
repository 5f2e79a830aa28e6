use super::auth::AdminAuth;
use super::handlers::{self, AppState};
use super::metrics_handler::metrics_handler;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Create the Axum router: admin endpoints under `/__edge`, everything else
/// goes through the cache router
pub fn create_router(state: AppState) -> Router {
    // Management routes need the admin key
    let admin: Router<AppState> = Router::new()
        .route("/__edge/caches", get(handlers::list_caches))
        .route("/__edge/update", post(handlers::update_worker))
        .route_layer(middleware::from_fn_with_state(
            state.admin.clone(),
            AdminAuth::layer,
        ));

    Router::new()
        .route("/__edge/health", get(handlers::health_check))
        .route("/__edge/metrics", get(metrics_handler))
        .merge(admin)
        // Consent
        .route("/__edge/consent", get(handlers::consent_status))
        .route("/__edge/consent/accept", post(handlers::consent_accept))
        .route("/__edge/consent/decline", post(handlers::consent_decline))
        // Site traffic
        .fallback(handlers::proxy)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
