use axum::{
    extract::{Path, Query, State},
    response::Json,
    Extension,
};
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    options::ReturnDocument,
    Collection,
};
use serde::Deserialize;
use validator::Validate;

use crate::{
    errors::{AppError, Result},
    middleware::auth::Claims,
    models::investment::Investment,
    models::withdrawal::{
        ApproveWithdrawalRequest, CreateWithdrawalRequest, FailWithdrawalRequest,
        RejectWithdrawalRequest, Withdrawal, WithdrawalResponse,
    },
    services::portfolio,
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalQuery {
    pub status: Option<String>,
    pub user_id: Option<String>,
}

fn withdrawals(state: &AppState) -> Collection<Withdrawal> {
    state.db.collection("withdrawals")
}

// Create a payout request. The requested amount must be covered by the
// user's withdrawable balance: accumulated investment value minus every
// withdrawal that still reserves funds. Pending requests reserve their
// amount immediately, so two back-to-back requests cannot both claim the
// same money.
pub async fn create_withdrawal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateWithdrawalRequest>,
) -> Result<Json<WithdrawalResponse>> {
    payload.validate()?;

    if payload.amount < state.policy.min_withdrawal {
        return Err(AppError::validation(format!(
            "minimum withdrawal is {}",
            state.policy.min_withdrawal
        )));
    }

    let inv_cursor = state
        .db
        .collection::<Investment>("investments")
        .find(doc! { "userId": &claims.sub })
        .await?;
    let user_investments: Vec<Investment> = inv_cursor.try_collect().await?;

    let wd_cursor = withdrawals(&state)
        .find(doc! { "userId": &claims.sub })
        .await?;
    let user_withdrawals: Vec<Withdrawal> = wd_cursor.try_collect().await?;

    let balance = portfolio::withdrawable_balance(&user_investments, &user_withdrawals);
    if payload.amount > balance {
        return Err(AppError::validation(format!(
            "amount exceeds withdrawable balance of {}",
            balance
        )));
    }

    let withdrawal = Withdrawal::new(
        claims.sub.clone(),
        payload.amount,
        payload.bank_details,
        state.policy.processing_fee,
        Utc::now(),
    );
    withdrawals(&state).insert_one(&withdrawal).await?;

    tracing::info!(
        "🏦 Withdrawal {} created for user {} (net {})",
        withdrawal.request_id,
        withdrawal.user_id,
        withdrawal.net_amount
    );
    Ok(Json(WithdrawalResponse::from(withdrawal)))
}

/// CAS a withdrawal from one of `from` into the update, or reconstruct the
/// precise error by replaying the transition on the current document.
async fn transition_withdrawal<F>(
    state: &AppState,
    id: &str,
    from: &[&str],
    update: Document,
    replay: F,
) -> Result<Withdrawal>
where
    F: FnOnce(&mut Withdrawal) -> Result<()>,
{
    let oid = ObjectId::parse_str(id)?;

    let updated = withdrawals(state)
        .find_one_and_update(
            doc! { "_id": oid, "status": { "$in": from.to_vec() } },
            update,
        )
        .return_document(ReturnDocument::After)
        .await?;

    match updated {
        Some(withdrawal) => Ok(withdrawal),
        None => {
            let mut current = withdrawals(state)
                .find_one(doc! { "_id": oid })
                .await?
                .ok_or_else(|| AppError::not_found("withdrawal not found"))?;
            match replay(&mut current) {
                Err(e) => Err(e),
                Ok(_) => Err(AppError::conflict("withdrawal changed during transition")),
            }
        }
    }
}

pub async fn start_processing(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<WithdrawalResponse>> {
    let admin_id = claims.require_admin()?.to_string();
    let now = Utc::now();

    let updated = transition_withdrawal(
        &state,
        &id,
        &["pending"],
        doc! { "$set": {
            "status": "processing",
            "processedBy": &admin_id,
            "updatedAt": now,
        }},
        |wd| wd.start_processing(&admin_id, now),
    )
    .await?;
    Ok(Json(WithdrawalResponse::from(updated)))
}

// Approval records the bank/UPI reference of the payout; without one the
// request is invalid, with one it succeeds exactly once.
pub async fn approve_withdrawal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(payload): Json<ApproveWithdrawalRequest>,
) -> Result<Json<WithdrawalResponse>> {
    let admin_id = claims.require_admin()?.to_string();
    let now = Utc::now();

    if payload.transaction_reference.trim().is_empty() {
        return Err(AppError::validation(
            "transactionReference is required to approve a withdrawal",
        ));
    }

    let updated = transition_withdrawal(
        &state,
        &id,
        &["pending", "processing"],
        doc! { "$set": {
            "status": "approved",
            "processedBy": &admin_id,
            "processedAt": now,
            "transactionReference": &payload.transaction_reference,
            "updatedAt": now,
        }},
        |wd| wd.approve(&admin_id, &payload.transaction_reference, now),
    )
    .await?;

    tracing::info!(
        "✅ Withdrawal {} approved by {} (ref {})",
        id,
        admin_id,
        payload.transaction_reference
    );
    Ok(Json(WithdrawalResponse::from(updated)))
}

pub async fn reject_withdrawal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(payload): Json<RejectWithdrawalRequest>,
) -> Result<Json<WithdrawalResponse>> {
    let admin_id = claims.require_admin()?.to_string();
    let now = Utc::now();

    let updated = transition_withdrawal(
        &state,
        &id,
        &["pending", "processing"],
        doc! { "$set": {
            "status": "rejected",
            "processedBy": &admin_id,
            "processedAt": now,
            "rejectionReason": &payload.reason,
            "updatedAt": now,
        }},
        |wd| wd.reject(&admin_id, &payload.reason, now),
    )
    .await?;

    tracing::info!("🚫 Withdrawal {} rejected by {}", id, admin_id);
    Ok(Json(WithdrawalResponse::from(updated)))
}

// Out-of-band settlement confirmation: the transfer landed.
pub async fn complete_withdrawal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<WithdrawalResponse>> {
    claims.require_admin()?;
    let now = Utc::now();

    let updated = transition_withdrawal(
        &state,
        &id,
        &["approved"],
        doc! { "$set": { "status": "completed", "updatedAt": now } },
        |wd| wd.complete(now),
    )
    .await?;
    Ok(Json(WithdrawalResponse::from(updated)))
}

// Out-of-band settlement confirmation: the transfer bounced.
pub async fn fail_withdrawal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(payload): Json<FailWithdrawalRequest>,
) -> Result<Json<WithdrawalResponse>> {
    claims.require_admin()?;
    let now = Utc::now();

    let updated = transition_withdrawal(
        &state,
        &id,
        &["approved"],
        doc! { "$set": {
            "status": "failed",
            "rejectionReason": &payload.reason,
            "updatedAt": now,
        }},
        |wd| wd.fail(&payload.reason, now),
    )
    .await?;

    tracing::warn!("⚠️ Withdrawal {} marked failed: {}", id, payload.reason);
    Ok(Json(WithdrawalResponse::from(updated)))
}

pub async fn get_withdrawal(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<WithdrawalResponse>> {
    let oid = ObjectId::parse_str(&id)?;
    let withdrawal = withdrawals(&state)
        .find_one(doc! { "_id": oid })
        .await?
        .ok_or_else(|| AppError::not_found("withdrawal not found"))?;

    if !claims.is_admin() && withdrawal.user_id != claims.sub {
        return Err(AppError::Unauthorized);
    }
    Ok(Json(WithdrawalResponse::from(withdrawal)))
}

pub async fn list_withdrawals(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<WithdrawalQuery>,
) -> Result<Json<Vec<WithdrawalResponse>>> {
    let mut filter = doc! {};
    if claims.is_admin() {
        if let Some(user_id) = &query.user_id {
            filter.insert("userId", user_id);
        }
    } else {
        filter.insert("userId", &claims.sub);
    }
    if let Some(status) = &query.status {
        filter.insert("status", status);
    }

    let cursor = withdrawals(&state).find(filter).await?;
    let mut items: Vec<Withdrawal> = cursor.try_collect().await?;
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(
        items.into_iter().map(WithdrawalResponse::from).collect(),
    ))
}
