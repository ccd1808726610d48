use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::investment::Investment;

/// An investable index product. The aggregate fields (totalInvested,
/// activeInvestors, totalReturnsDistributed) are a materialized rollup over
/// active Investments — Investment records stay the source of truth, the
/// rollup is kept in sync by atomic counter updates plus the update_stats
/// reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFund {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub name: String,
    pub min_investment: f64,
    pub max_investment: f64,
    pub current_return_rate: f64,
    pub is_active: bool,

    // Materialized aggregates
    pub total_invested: f64,
    pub active_investors: i64,
    pub total_returns_distributed: f64,
    /// Bumped on every full recompute; the compare-and-swap on this field is
    /// what turns a lost stats race into ConcurrencyConflict instead of a
    /// silent lost update.
    pub stats_version: i64,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl IndexFund {
    pub fn new(req: CreateIndexRequest, now: DateTime<Utc>) -> Self {
        IndexFund {
            id: Some(ObjectId::new()),
            name: req.name,
            min_investment: req.min_investment,
            max_investment: req.max_investment,
            current_return_rate: req.current_return_rate,
            is_active: req.is_active.unwrap_or(true),
            total_invested: 0.0,
            active_investors: 0,
            total_returns_distributed: 0.0,
            stats_version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn amount_in_bounds(&self, amount: f64) -> bool {
        amount >= self.min_investment && amount <= self.max_investment
    }
}

/// Full aggregation over a set of investments, the single-threaded reference
/// the materialized fields must agree with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub total_invested: f64,
    pub active_investors: i64,
    pub total_returns_distributed: f64,
}

impl IndexStats {
    /// `totalInvested` and `activeInvestors` cover active investments only;
    /// `totalReturnsDistributed` covers the whole book, since returns already
    /// credited stay distributed while an investment is paused.
    pub fn aggregate(investments: &[Investment]) -> Self {
        let active: Vec<&Investment> =
            investments.iter().filter(|inv| inv.is_active).collect();

        IndexStats {
            total_invested: active.iter().map(|inv| inv.amount).sum(),
            active_investors: active.len() as i64,
            total_returns_distributed: investments.iter().map(|inv| inv.total_returns).sum(),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateIndexRequest {
    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,
    #[validate(range(min = 0.0))]
    pub min_investment: f64,
    #[validate(range(min = 0.0))]
    pub max_investment: f64,
    pub current_return_rate: f64,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIndexRequest {
    pub current_return_rate: Option<f64>,
    pub is_active: Option<bool>,
    pub min_investment: Option<f64>,
    pub max_investment: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexResponse {
    pub id: String,
    pub name: String,
    pub min_investment: f64,
    pub max_investment: f64,
    pub current_return_rate: f64,
    pub is_active: bool,
    pub total_invested: f64,
    pub active_investors: i64,
    pub total_returns_distributed: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<IndexFund> for IndexResponse {
    fn from(index: IndexFund) -> Self {
        IndexResponse {
            id: index.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: index.name,
            min_investment: index.min_investment,
            max_investment: index.max_investment,
            current_return_rate: index.current_return_rate,
            is_active: index.is_active,
            total_invested: index.total_invested,
            active_investors: index.active_investors,
            total_returns_distributed: index.total_returns_distributed,
            created_at: index.created_at,
            updated_at: index.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::investment::{Investment, InvestmentStatus};
    use chrono::Utc;

    fn investment(amount: f64, active: bool) -> Investment {
        let now = Utc::now();
        let mut inv = Investment::new(
            ObjectId::new(),
            "user-1".to_string(),
            "index-1".to_string(),
            amount,
            "req-1".to_string(),
            now,
        );
        if !active {
            inv.is_active = false;
            inv.status = InvestmentStatus::Paused;
        }
        inv
    }

    #[test]
    fn aggregate_counts_only_active_investments() {
        let investments = vec![
            investment(10_000.0, true),
            investment(5_000.0, true),
            investment(7_500.0, false),
        ];

        let stats = IndexStats::aggregate(&investments);
        assert_eq!(stats.total_invested, 15_000.0);
        assert_eq!(stats.active_investors, 2);
        assert_eq!(stats.total_returns_distributed, 0.0);
    }

    #[test]
    fn aggregate_includes_credited_returns() {
        let now = Utc::now();
        let mut inv = investment(10_000.0, true);
        inv.apply_return(now, now, 4.0, now).unwrap();

        let stats = IndexStats::aggregate(&[inv]);
        assert_eq!(stats.total_returns_distributed, 400.0);
    }

    // Counter updates applied per activation must land on the same numbers a
    // single-threaded replay (full aggregation) produces.
    #[test]
    fn counter_updates_match_single_threaded_replay() {
        let amounts = [10_000.0, 2_500.0, 40_000.0, 1_000.0, 9_999.0];

        let mut total_invested = 0.0;
        let mut active_investors = 0i64;
        let mut investments = Vec::new();
        for amount in amounts {
            // what approve() does with $inc
            total_invested += amount;
            active_investors += 1;
            investments.push(investment(amount, true));
        }

        let replay = IndexStats::aggregate(&investments);
        assert_eq!(replay.total_invested, total_invested);
        assert_eq!(replay.active_investors, active_investors);
    }

    // A pause removes principal and headcount from the rollup but not the
    // returns already credited; the $inc discipline in the handlers must land
    // on the same numbers as a full recompute.
    #[test]
    fn counter_updates_match_replay_across_pause() {
        let now = Utc::now();

        // approve
        let mut inv = investment(10_000.0, true);
        let mut total_invested = 10_000.0;
        let mut active_investors = 1i64;
        let mut returns_distributed = 0.0;

        // accrual tick
        let credited = inv.apply_return(now, now, 4.0, now).unwrap();
        returns_distributed += credited.return_amount;

        // pause
        inv.pause(now).unwrap();
        total_invested -= inv.amount;
        active_investors -= 1;

        let replay = IndexStats::aggregate(&[inv]);
        assert_eq!(replay.total_invested, total_invested);
        assert_eq!(replay.active_investors, active_investors);
        assert_eq!(replay.total_returns_distributed, returns_distributed);
    }

    #[test]
    fn amount_bounds_are_inclusive() {
        let index = IndexFund::new(
            CreateIndexRequest {
                name: "Alpha Growth".to_string(),
                min_investment: 1_000.0,
                max_investment: 50_000.0,
                current_return_rate: 4.0,
                is_active: None,
            },
            Utc::now(),
        );

        assert!(index.amount_in_bounds(1_000.0));
        assert!(index.amount_in_bounds(50_000.0));
        assert!(!index.amount_in_bounds(999.99));
        assert!(!index.amount_in_bounds(50_000.01));
        assert!(index.is_active);
    }
}
