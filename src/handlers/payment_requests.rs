use axum::{
    extract::{Path, Query, State},
    response::Json,
    Extension,
};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId},
    options::ReturnDocument,
    Collection, Database,
};
use serde::Deserialize;
use validator::Validate;

use crate::{
    errors::{is_duplicate_key_error, AppError, Result},
    middleware::auth::Claims,
    models::index_fund::IndexFund,
    models::investment::Investment,
    models::payment_request::{
        CreatePaymentRequest, PaymentRequest, PaymentRequestResponse, RejectRequest,
        UploadProofRequest,
    },
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequestQuery {
    pub status: Option<String>,
    pub index_id: Option<String>,
    pub user_id: Option<String>,
}

fn requests(db: &Database) -> Collection<PaymentRequest> {
    db.collection("payment_requests")
}

// Create a funding request against an index. KYC is assumed verified by the
// caller; the ledger only checks the index's investment bounds.
pub async fn create_payment_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreatePaymentRequest>,
) -> Result<Json<PaymentRequestResponse>> {
    payload.validate()?;

    let index_oid = ObjectId::parse_str(&payload.index_id)?;
    let index: IndexFund = state
        .db
        .collection("indexes")
        .find_one(doc! { "_id": index_oid })
        .await?
        .ok_or_else(|| AppError::not_found("index not found"))?;

    if !index.is_active {
        return Err(AppError::validation("index is not open for investment"));
    }
    if !index.amount_in_bounds(payload.amount) {
        return Err(AppError::validation(format!(
            "amount must be between {} and {}",
            index.min_investment, index.max_investment
        )));
    }

    let request = PaymentRequest::new(
        claims.sub.clone(),
        payload.index_id,
        payload.amount,
        payload.payment_method,
        state.policy.request_expiry_hours,
        Utc::now(),
    );
    requests(&state.db).insert_one(&request).await?;

    tracing::info!(
        "💰 Payment request {} created for user {} (amount {})",
        request.id.map(|id| id.to_hex()).unwrap_or_default(),
        request.user_id,
        request.amount
    );
    Ok(Json(PaymentRequestResponse::from(request)))
}

// User attaches proof of the offline payment. Compare-and-swap on
// status=pending so a racing admin decision cannot be overwritten.
pub async fn upload_proof(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(payload): Json<UploadProofRequest>,
) -> Result<Json<PaymentRequestResponse>> {
    payload.validate()?;
    let oid = ObjectId::parse_str(&id)?;
    let now = Utc::now();

    let updated = requests(&state.db)
        .find_one_and_update(
            doc! { "_id": oid, "userId": &claims.sub, "status": "pending" },
            doc! { "$set": {
                "paymentProof": &payload.payment_proof,
                "transactionReference": &payload.transaction_reference,
                "status": "proof_uploaded",
                "updatedAt": now,
            }},
        )
        .return_document(ReturnDocument::After)
        .await?;

    match updated {
        Some(request) => Ok(Json(PaymentRequestResponse::from(request))),
        None => Err(proof_upload_failure(&state.db, oid, &claims.sub).await?),
    }
}

async fn proof_upload_failure(
    db: &Database,
    oid: ObjectId,
    user_id: &str,
) -> Result<AppError> {
    let Some(mut request) = requests(db).find_one(doc! { "_id": oid }).await? else {
        return Ok(AppError::not_found("payment request not found"));
    };
    if request.user_id != user_id {
        return Ok(AppError::Unauthorized);
    }
    // replay the transition in memory to get the precise state error
    match request.upload_proof(String::new(), String::new(), Utc::now()) {
        Err(e) => Ok(e),
        Ok(_) => Ok(AppError::conflict("payment request changed during proof upload")),
    }
}

// Admin marks the uploaded proof as checked.
pub async fn verify_payment_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<PaymentRequestResponse>> {
    let admin_id = claims.require_admin()?.to_string();
    let oid = ObjectId::parse_str(&id)?;
    let now = Utc::now();

    let updated = requests(&state.db)
        .find_one_and_update(
            doc! { "_id": oid, "status": "proof_uploaded" },
            doc! { "$set": {
                "status": "verified",
                "verifiedBy": &admin_id,
                "verifiedAt": now,
                "updatedAt": now,
            }},
        )
        .return_document(ReturnDocument::After)
        .await?;

    match updated {
        Some(request) => Ok(Json(PaymentRequestResponse::from(request))),
        None => {
            let Some(mut request) = requests(&state.db).find_one(doc! { "_id": oid }).await?
            else {
                return Err(AppError::not_found("payment request not found"));
            };
            match request.verify(&admin_id, now) {
                Err(e) => Err(e),
                Ok(_) => Err(AppError::conflict("payment request changed during verification")),
            }
        }
    }
}

// Admin approval: the one composite operation in the ledger. As a saga:
//   1. insert the Investment (unique paymentRequestId index is the durable
//      guard against a duplicate from a concurrent approve),
//   2. compare-and-swap the request into approved,
//   3. on a lost CAS, delete the just-inserted Investment (compensation),
//   4. bump the index counters atomically.
pub async fn approve_payment_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<PaymentRequestResponse>> {
    let admin_id = claims.require_admin()?.to_string();
    let oid = ObjectId::parse_str(&id)?;
    let now = Utc::now();

    let request = requests(&state.db)
        .find_one(doc! { "_id": oid })
        .await?
        .ok_or_else(|| AppError::not_found("payment request not found"))?;
    request.decision_guard()?;

    let investments: Collection<Investment> = state.db.collection("investments");
    let investment_oid = ObjectId::new();
    let investment = Investment::from_approved_request(&request, investment_oid, now);

    if let Err(e) = investments.insert_one(&investment).await {
        if is_duplicate_key_error(&e) {
            return Err(AppError::already_processed(
                "an investment already exists for this payment request",
            ));
        }
        return Err(e.into());
    }
    let investment_id = investment_oid.to_hex();

    let updated = requests(&state.db)
        .find_one_and_update(
            doc! {
                "_id": oid,
                "status": { "$in": ["pending", "proof_uploaded", "verified"] },
            },
            doc! { "$set": {
                "status": "approved",
                "verifiedBy": &admin_id,
                "verifiedAt": now,
                "investmentId": &investment_id,
                "updatedAt": now,
            }},
        )
        .return_document(ReturnDocument::After)
        .await?;

    let Some(approved) = updated else {
        // lost the race: roll back our Investment and report what happened
        investments
            .delete_one(doc! { "_id": investment_oid })
            .await?;
        let current = requests(&state.db)
            .find_one(doc! { "_id": oid })
            .await?
            .ok_or_else(|| AppError::not_found("payment request not found"))?;
        return Err(current
            .decision_guard()
            .err()
            .unwrap_or_else(|| AppError::conflict("payment request changed during approval")));
    };

    state
        .db
        .collection::<IndexFund>("indexes")
        .update_one(
            doc! { "_id": ObjectId::parse_str(&approved.index_id)? },
            doc! {
                "$inc": { "totalInvested": approved.amount, "activeInvestors": 1 },
                "$set": { "updatedAt": now },
            },
        )
        .await?;

    tracing::info!(
        "✅ Payment request {} approved by {} -> investment {}",
        id,
        admin_id,
        investment_id
    );
    Ok(Json(PaymentRequestResponse::from(approved)))
}

pub async fn reject_payment_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<PaymentRequestResponse>> {
    let admin_id = claims.require_admin()?.to_string();
    let oid = ObjectId::parse_str(&id)?;
    let now = Utc::now();

    let updated = requests(&state.db)
        .find_one_and_update(
            doc! {
                "_id": oid,
                "status": { "$in": ["pending", "proof_uploaded", "verified"] },
            },
            doc! { "$set": {
                "status": "rejected",
                "verifiedBy": &admin_id,
                "verifiedAt": now,
                "rejectionReason": &payload.reason,
                "updatedAt": now,
            }},
        )
        .return_document(ReturnDocument::After)
        .await?;

    match updated {
        Some(request) => {
            tracing::info!("🚫 Payment request {} rejected by {}", id, admin_id);
            Ok(Json(PaymentRequestResponse::from(request)))
        }
        None => {
            let current = requests(&state.db)
                .find_one(doc! { "_id": oid })
                .await?
                .ok_or_else(|| AppError::not_found("payment request not found"))?;
            Err(current
                .decision_guard()
                .err()
                .unwrap_or_else(|| AppError::conflict("payment request changed during rejection")))
        }
    }
}

/// Batch expiry of stale pending requests. Touches nothing past pending:
/// a request with uploaded proof stays put however old it is.
pub async fn run_expire_sweep(db: &Database, now: DateTime<Utc>) -> Result<u64> {
    let result = requests(db)
        .update_many(
            doc! { "status": "pending", "expiresAt": { "$lt": now } },
            doc! { "$set": { "status": "expired", "updatedAt": now } },
        )
        .await?;

    if result.modified_count > 0 {
        tracing::info!("⏰ Expired {} stale payment requests", result.modified_count);
    }
    Ok(result.modified_count)
}

pub async fn get_payment_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<PaymentRequestResponse>> {
    let oid = ObjectId::parse_str(&id)?;
    let request = requests(&state.db)
        .find_one(doc! { "_id": oid })
        .await?
        .ok_or_else(|| AppError::not_found("payment request not found"))?;

    if !claims.is_admin() && request.user_id != claims.sub {
        return Err(AppError::Unauthorized);
    }
    Ok(Json(PaymentRequestResponse::from(request)))
}

pub async fn list_payment_requests(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PaymentRequestQuery>,
) -> Result<Json<Vec<PaymentRequestResponse>>> {
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
    if let Some(index_id) = &query.index_id {
        filter.insert("indexId", index_id);
    }

    let cursor = requests(&state.db).find(filter).await?;
    let mut items: Vec<PaymentRequest> = cursor.try_collect().await?;
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(Json(
        items.into_iter().map(PaymentRequestResponse::from).collect(),
    ))
}
