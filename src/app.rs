use crate::state;

use axum::Router;
use axum::routing::{delete, get, post};

mod push;

pub fn app(state: state::AppState) -> Router {
    Router::new()
        .route("/api/push/public-key", get(push::push_public_key))
        .route("/api/push/subscriptions", post(push::register_subscription))
        .route(
            "/api/push/subscriptions/{id}",
            delete(push::delete_subscription),
        )
        .route(
            "/api/sessions/{user}",
            post(push::start_session).delete(push::stop_session),
        )
        .route("/api/debug/sessions", get(push::sessions_debug))
        .route("/health", get(health))
        .with_state(state)
}

pub(crate) async fn health() -> &'static str {
    "ok"
}
