use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};

use crate::{
    handlers::indexes::*,
    middleware::auth::auth_middleware,
    state::AppState,
};

// The index catalogue is readable without a token; everything that mutates
// or audits carries its own admin gate.
pub fn routes(state: AppState) -> Router<AppState> {
    let admin = Router::new()
        .route("/", post(create_index))
        .route("/:id", put(update_index))
        .route("/:id/stats", get(get_index_stats))
        .route("/:id/recompute-stats", post(update_stats))
        .route_layer(from_fn_with_state(state, auth_middleware));

    Router::new()
        .route("/", get(list_indexes))
        .route("/:id", get(get_index))
        .merge(admin)
}
