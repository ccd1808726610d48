use axum::{
    routing::{get, post},
    Router,
};

use crate::{handlers::withdrawals::*, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_withdrawals).post(create_withdrawal))
        .route("/:id", get(get_withdrawal))
        .route("/:id/process", post(start_processing))
        .route("/:id/approve", post(approve_withdrawal))
        .route("/:id/reject", post(reject_withdrawal))
        .route("/:id/complete", post(complete_withdrawal))
        .route("/:id/fail", post(fail_withdrawal))
}
