use axum::{
    routing::{get, post},
    Router,
};

use crate::{handlers::investments::*, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_investments))
        .route("/portfolio", get(get_portfolio))
        .route("/:id", get(get_investment))
        .route("/:id/returns", post(add_return))
        .route("/:id/pause", post(pause_investment))
        .route("/:id/resume", post(resume_investment))
}
