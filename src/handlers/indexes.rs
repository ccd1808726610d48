use axum::{
    extract::{Path, State},
    response::Json,
    Extension,
};
use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId},
    options::ReturnDocument,
    Collection,
};
use validator::Validate;

use crate::{
    errors::{is_duplicate_key_error, AppError, Result},
    middleware::auth::Claims,
    models::index_fund::{
        CreateIndexRequest, IndexFund, IndexResponse, IndexStats, UpdateIndexRequest,
    },
    models::investment::Investment,
    state::AppState,
};

fn indexes(state: &AppState) -> Collection<IndexFund> {
    state.db.collection("indexes")
}

pub async fn create_index(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateIndexRequest>,
) -> Result<Json<IndexResponse>> {
    claims.require_admin()?;
    payload.validate()?;

    if payload.min_investment > payload.max_investment {
        return Err(AppError::validation(
            "minInvestment cannot exceed maxInvestment",
        ));
    }
    if !state.policy.rate_in_band(payload.current_return_rate) {
        return Err(AppError::validation(format!(
            "currentReturnRate must be between {} and {}",
            state.policy.min_return_rate, state.policy.max_return_rate
        )));
    }

    let index = IndexFund::new(payload, Utc::now());
    if let Err(e) = indexes(&state).insert_one(&index).await {
        if is_duplicate_key_error(&e) {
            return Err(AppError::validation("an index with this name already exists"));
        }
        return Err(e.into());
    }

    tracing::info!("🆕 Index '{}' created", index.name);
    Ok(Json(IndexResponse::from(index)))
}

pub async fn update_index(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateIndexRequest>,
) -> Result<Json<IndexResponse>> {
    claims.require_admin()?;
    let oid = ObjectId::parse_str(&id)?;

    let mut set = doc! { "updatedAt": Utc::now() };
    if let Some(rate) = payload.current_return_rate {
        if !state.policy.rate_in_band(rate) {
            return Err(AppError::validation(format!(
                "currentReturnRate must be between {} and {}",
                state.policy.min_return_rate, state.policy.max_return_rate
            )));
        }
        set.insert("currentReturnRate", rate);
    }
    if let Some(active) = payload.is_active {
        set.insert("isActive", active);
    }
    if let Some(min) = payload.min_investment {
        set.insert("minInvestment", min);
    }
    if let Some(max) = payload.max_investment {
        set.insert("maxInvestment", max);
    }

    let updated = indexes(&state)
        .find_one_and_update(doc! { "_id": oid }, doc! { "$set": set })
        .return_document(ReturnDocument::After)
        .await?
        .ok_or_else(|| AppError::not_found("index not found"))?;

    Ok(Json(IndexResponse::from(updated)))
}

pub async fn get_index(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IndexResponse>> {
    let oid = ObjectId::parse_str(&id)?;
    let index = indexes(&state)
        .find_one(doc! { "_id": oid })
        .await?
        .ok_or_else(|| AppError::not_found("index not found"))?;
    Ok(Json(IndexResponse::from(index)))
}

pub async fn list_indexes(
    State(state): State<AppState>,
) -> Result<Json<Vec<IndexResponse>>> {
    let cursor = indexes(&state).find(doc! {}).await?;
    let mut items: Vec<IndexFund> = cursor.try_collect().await?;
    items.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(items.into_iter().map(IndexResponse::from).collect()))
}

// Full reconciliation of the materialized aggregates from the Investment
// records (the source of truth). Serialized per index through the lock
// registry, and guarded by a statsVersion compare-and-swap so a racing
// writer surfaces as ConcurrencyConflict instead of a lost update. Safe to
// retry from scratch.
pub async fn update_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<IndexResponse>> {
    claims.require_admin()?;
    let oid = ObjectId::parse_str(&id)?;

    let lock = state.index_locks.entry(&id);
    let _guard = lock.lock().await;

    let index = indexes(&state)
        .find_one(doc! { "_id": oid })
        .await?
        .ok_or_else(|| AppError::not_found("index not found"))?;

    let cursor = state
        .db
        .collection::<Investment>("investments")
        .find(doc! { "indexId": &id })
        .await?;
    let book: Vec<Investment> = cursor.try_collect().await?;
    let stats = IndexStats::aggregate(&book);

    let updated = indexes(&state)
        .find_one_and_update(
            doc! { "_id": oid, "statsVersion": index.stats_version },
            doc! {
                "$set": {
                    "totalInvested": stats.total_invested,
                    "activeInvestors": stats.active_investors,
                    "totalReturnsDistributed": stats.total_returns_distributed,
                    "updatedAt": Utc::now(),
                },
                "$inc": { "statsVersion": 1 },
            },
        )
        .return_document(ReturnDocument::After)
        .await?
        .ok_or_else(|| {
            AppError::conflict("index stats changed during recompute, retry the operation")
        })?;

    tracing::info!(
        "🔄 Index {} stats recomputed: invested {}, investors {}, returns {}",
        id,
        stats.total_invested,
        stats.active_investors,
        stats.total_returns_distributed
    );
    Ok(Json(IndexResponse::from(updated)))
}

/// Admin view of the raw aggregation without writing it back, for auditing
/// drift between the counters and the source of truth.
pub async fn get_index_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    claims.require_admin()?;
    let oid = ObjectId::parse_str(&id)?;

    let index = indexes(&state)
        .find_one(doc! { "_id": oid })
        .await?
        .ok_or_else(|| AppError::not_found("index not found"))?;

    let cursor = state
        .db
        .collection::<Investment>("investments")
        .find(doc! { "indexId": &id })
        .await?;
    let book: Vec<Investment> = cursor.try_collect().await?;
    let computed = IndexStats::aggregate(&book);

    let materialized = IndexStats {
        total_invested: index.total_invested,
        active_investors: index.active_investors,
        total_returns_distributed: index.total_returns_distributed,
    };

    Ok(Json(serde_json::json!({
        "indexId": id,
        "materialized": materialized,
        "computed": computed,
        "inSync": materialized == computed,
    })))
}
