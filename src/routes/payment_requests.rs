use axum::{
    routing::{get, post},
    Router,
};

use crate::{handlers::payment_requests::*, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_payment_requests).post(create_payment_request))
        .route("/:id", get(get_payment_request))
        .route("/:id/proof", post(upload_proof))
        .route("/:id/verify", post(verify_payment_request))
        .route("/:id/approve", post(approve_payment_request))
        .route("/:id/reject", post(reject_payment_request))
}
