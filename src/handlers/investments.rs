use axum::{
    extract::{Path, Query, State},
    response::Json,
    Extension,
};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, to_bson},
    options::ReturnDocument,
    Collection,
};
use serde::Deserialize;

use crate::{
    errors::{AppError, Result},
    middleware::auth::Claims,
    models::index_fund::IndexFund,
    models::investment::{AddReturnRequest, Investment, InvestmentResponse, WeeklyReturn},
    models::withdrawal::Withdrawal,
    services::portfolio,
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentQuery {
    pub index_id: Option<String>,
    pub user_id: Option<String>,
    pub status: Option<String>,
}

fn investments(state: &AppState) -> Collection<Investment> {
    state.db.collection("investments")
}

/// One accrual tick for one investment, serialized per investment through the
/// lock registry. The mutation itself is a single document update filtered on
/// the expected weeklyReturns length, so a week number can never be assigned
/// twice and totalReturns moves in lockstep with the appended entry.
pub async fn credit_return(
    state: &AppState,
    investment_id: ObjectId,
    week_start: DateTime<Utc>,
    week_end: DateTime<Utc>,
    return_rate: f64,
    now: DateTime<Utc>,
) -> Result<Investment> {
    if !state.policy.rate_in_band(return_rate) {
        return Err(AppError::validation(format!(
            "returnRate must be between {} and {}",
            state.policy.min_return_rate, state.policy.max_return_rate
        )));
    }

    let lock = state.investment_locks.entry(&investment_id.to_hex());
    let _guard = lock.lock().await;

    let collection = investments(state);
    let mut current = collection
        .find_one(doc! { "_id": investment_id })
        .await?
        .ok_or_else(|| AppError::not_found("investment not found"))?;

    let expected_len = current.weekly_returns.len() as i64;
    // run the transition in memory first; inactive investments bail here
    let credited: WeeklyReturn =
        current.apply_return(week_start, week_end, return_rate, now)?;

    let updated = collection
        .find_one_and_update(
            doc! {
                "_id": investment_id,
                "status": "active",
                "isActive": true,
                "weeklyReturns": { "$size": expected_len },
            },
            doc! {
                "$push": { "weeklyReturns": to_bson(&credited)
                    .map_err(|e| AppError::validation(e.to_string()))? },
                "$inc": { "totalReturns": credited.return_amount },
                "$set": { "lastReturnDate": now, "updatedAt": now },
            },
        )
        .return_document(ReturnDocument::After)
        .await?;

    let Some(updated) = updated else {
        return Err(AppError::conflict(
            "investment changed during accrual, retry the tick",
        ));
    };

    state
        .db
        .collection::<IndexFund>("indexes")
        .update_one(
            doc! { "_id": ObjectId::parse_str(&updated.index_id)? },
            doc! {
                "$inc": { "totalReturnsDistributed": credited.return_amount },
                "$set": { "updatedAt": now },
            },
        )
        .await?;

    tracing::info!(
        "📈 Credited week {} return of {} to investment {}",
        credited.week,
        credited.return_amount,
        investment_id.to_hex()
    );
    Ok(updated)
}

// Scheduler/admin: credit one weekly return to a single investment.
pub async fn add_return(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(payload): Json<AddReturnRequest>,
) -> Result<Json<InvestmentResponse>> {
    claims.require_admin()?;
    let oid = ObjectId::parse_str(&id)?;

    let updated = credit_return(
        &state,
        oid,
        payload.week_start,
        payload.week_end,
        payload.return_rate,
        Utc::now(),
    )
    .await?;
    Ok(Json(InvestmentResponse::from(updated)))
}

async fn toggle_active(
    state: &AppState,
    id: &str,
    pausing: bool,
) -> Result<Investment> {
    let oid = ObjectId::parse_str(id)?;
    let now = Utc::now();

    let lock = state.investment_locks.entry(id);
    let _guard = lock.lock().await;

    let (from, to, investor_delta) = if pausing {
        ("active", "paused", -1)
    } else {
        ("paused", "active", 1)
    };

    let updated = investments(state)
        .find_one_and_update(
            doc! { "_id": oid, "status": from },
            doc! { "$set": { "status": to, "isActive": !pausing, "updatedAt": now } },
        )
        .return_document(ReturnDocument::After)
        .await?;

    let Some(updated) = updated else {
        let mut current = investments(state)
            .find_one(doc! { "_id": oid })
            .await?
            .ok_or_else(|| AppError::not_found("investment not found"))?;
        let outcome = if pausing {
            current.pause(now)
        } else {
            current.resume(now)
        };
        return Err(outcome
            .err()
            .unwrap_or_else(|| AppError::conflict("investment changed during status toggle")));
    };

    // activeInvestors tracks isActive, adjust alongside the toggle
    state
        .db
        .collection::<IndexFund>("indexes")
        .update_one(
            doc! { "_id": ObjectId::parse_str(&updated.index_id)? },
            doc! {
                "$inc": {
                    "activeInvestors": investor_delta,
                    "totalInvested": if pausing { -updated.amount } else { updated.amount },
                },
                "$set": { "updatedAt": now },
            },
        )
        .await?;

    Ok(updated)
}

pub async fn pause_investment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<InvestmentResponse>> {
    claims.require_admin()?;
    let updated = toggle_active(&state, &id, true).await?;
    tracing::info!("⏸️ Investment {} paused", id);
    Ok(Json(InvestmentResponse::from(updated)))
}

pub async fn resume_investment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<InvestmentResponse>> {
    claims.require_admin()?;
    let updated = toggle_active(&state, &id, false).await?;
    tracing::info!("▶️ Investment {} resumed", id);
    Ok(Json(InvestmentResponse::from(updated)))
}

pub async fn get_investment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<InvestmentResponse>> {
    let oid = ObjectId::parse_str(&id)?;
    let investment = investments(&state)
        .find_one(doc! { "_id": oid })
        .await?
        .ok_or_else(|| AppError::not_found("investment not found"))?;

    if !claims.is_admin() && investment.user_id != claims.sub {
        return Err(AppError::Unauthorized);
    }
    Ok(Json(InvestmentResponse::from(investment)))
}

pub async fn list_investments(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<InvestmentQuery>,
) -> Result<Json<Vec<InvestmentResponse>>> {
    let mut filter = doc! {};
    if claims.is_admin() {
        if let Some(user_id) = &query.user_id {
            filter.insert("userId", user_id);
        }
    } else {
        filter.insert("userId", &claims.sub);
    }
    if let Some(index_id) = &query.index_id {
        filter.insert("indexId", index_id);
    }
    if let Some(status) = &query.status {
        filter.insert("status", status);
    }

    let cursor = investments(&state).find(filter).await?;
    let mut items: Vec<Investment> = cursor.try_collect().await?;
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(
        items.into_iter().map(InvestmentResponse::from).collect(),
    ))
}

// The caller's own book: invested, accrued, and what is still withdrawable.
pub async fn get_portfolio(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<portfolio::PortfolioSummary>> {
    let inv_cursor = investments(&state)
        .find(doc! { "userId": &claims.sub })
        .await?;
    let user_investments: Vec<Investment> = inv_cursor.try_collect().await?;

    let wd_cursor = state
        .db
        .collection::<Withdrawal>("withdrawals")
        .find(doc! { "userId": &claims.sub })
        .await?;
    let user_withdrawals: Vec<Withdrawal> = wd_cursor.try_collect().await?;

    Ok(Json(portfolio::summarize(
        &user_investments,
        &user_withdrawals,
    )))
}
