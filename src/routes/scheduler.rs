use axum::{routing::post, Router};

use crate::{handlers::scheduler::*, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/expire-sweep", post(expire_sweep))
        .route("/accrual", post(run_accrual))
}
