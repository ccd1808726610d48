use axum::{extract::State, response::Json, Extension};
use chrono::{DateTime, Duration, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::doc;
use serde::Deserialize;

use crate::{
    errors::Result,
    handlers::investments::credit_return,
    handlers::payment_requests::run_expire_sweep,
    middleware::auth::Claims,
    models::index_fund::IndexFund,
    models::investment::Investment,
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccrualRunRequest {
    pub week_start: Option<DateTime<Utc>>,
    pub week_end: Option<DateTime<Utc>>,
}

// Scheduler tick: expire stale pending payment requests.
pub async fn expire_sweep(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>> {
    claims.require_admin()?;
    let expired = run_expire_sweep(&state.db, Utc::now()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "expired": expired,
    })))
}

// Scheduler tick: one weekly return for every active investment, at its
// index's current rate. The scheduler calls this once per settlement period;
// the engine does not deduplicate periods itself. Per-investment failures
// are logged and skipped so one bad record cannot stall the whole run.
pub async fn run_accrual(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    payload: Option<Json<AccrualRunRequest>>,
) -> Result<Json<serde_json::Value>> {
    claims.require_admin()?;
    let now = Utc::now();
    let body = payload.map(|Json(b)| b).unwrap_or_default();
    let week_end = body.week_end.unwrap_or(now);
    let week_start = body.week_start.unwrap_or(week_end - Duration::days(7));

    let index_cursor = state
        .db
        .collection::<IndexFund>("indexes")
        .find(doc! { "isActive": true })
        .await?;
    let active_indexes: Vec<IndexFund> = index_cursor.try_collect().await?;

    let mut credited = 0u64;
    let mut skipped = 0u64;
    let mut total_credited = 0.0f64;

    for index in active_indexes {
        let index_id = index.id.map(|id| id.to_hex()).unwrap_or_default();
        let inv_cursor = state
            .db
            .collection::<Investment>("investments")
            .find(doc! { "indexId": &index_id, "isActive": true })
            .await?;
        let investments: Vec<Investment> = inv_cursor.try_collect().await?;

        for investment in investments {
            let Some(inv_id) = investment.id else { continue };
            match credit_return(
                &state,
                inv_id,
                week_start,
                week_end,
                index.current_return_rate,
                now,
            )
            .await
            {
                Ok(updated) => {
                    credited += 1;
                    if let Some(last) = updated.weekly_returns.last() {
                        total_credited += last.return_amount;
                    }
                }
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(
                        "Accrual skipped investment {}: {}",
                        inv_id.to_hex(),
                        e
                    );
                }
            }
        }
    }

    tracing::info!(
        "📅 Accrual run complete: {} credited, {} skipped, total {}",
        credited,
        skipped,
        total_credited
    );
    Ok(Json(serde_json::json!({
        "success": true,
        "credited": credited,
        "skipped": skipped,
        "totalCredited": total_credited,
        "weekStart": week_start.to_rfc3339(),
        "weekEnd": week_end.to_rfc3339(),
    })))
}
