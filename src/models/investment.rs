use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};
use crate::models::optional_bson_datetime;
use crate::models::payment_request::PaymentRequest;

/// An activated, returns-accruing allocation of principal into an index.
/// Created only as a side effect of PaymentRequest approval; never deleted,
/// only moved through soft states.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Investment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub user_id: String,
    pub index_id: String,
    /// Principal, immutable after creation.
    pub amount: f64,
    pub payment_request_id: String,

    /// Always equals the sum of weeklyReturns[].returnAmount.
    pub total_returns: f64,
    pub weekly_returns: Vec<WeeklyReturn>,

    pub is_active: bool,
    pub status: InvestmentStatus,

    #[serde(default, with = "optional_bson_datetime")]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "optional_bson_datetime")]
    pub last_return_date: Option<DateTime<Utc>>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// One periodic accrual record crediting an investment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyReturn {
    /// Monotonically increasing, never reused, even across pause/resume.
    pub week: u32,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub week_start: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub week_end: DateTime<Utc>,
    pub return_rate: f64,
    pub return_amount: f64,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub credited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestmentStatus {
    Pending,
    Active,
    Paused,
    Completed,
    Withdrawn,
}

impl InvestmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestmentStatus::Pending => "pending",
            InvestmentStatus::Active => "active",
            InvestmentStatus::Paused => "paused",
            InvestmentStatus::Completed => "completed",
            InvestmentStatus::Withdrawn => "withdrawn",
        }
    }
}

impl Investment {
    pub fn new(
        id: ObjectId,
        user_id: String,
        index_id: String,
        amount: f64,
        payment_request_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Investment {
            id: Some(id),
            user_id,
            index_id,
            amount,
            payment_request_id,
            total_returns: 0.0,
            weekly_returns: Vec::new(),
            is_active: true,
            status: InvestmentStatus::Active,
            activated_at: Some(now),
            last_return_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The investment spawned by an approved payment request: active from the
    /// start, principal taken verbatim from the request.
    pub fn from_approved_request(
        request: &PaymentRequest,
        id: ObjectId,
        now: DateTime<Utc>,
    ) -> Self {
        Investment::new(
            id,
            request.user_id.clone(),
            request.index_id.clone(),
            request.amount,
            request.id.map(|rid| rid.to_hex()).unwrap_or_default(),
            now,
        )
    }

    pub fn compute_return_amount(amount: f64, return_rate: f64) -> f64 {
        (amount * return_rate / 100.0).round()
    }

    /// One accrual tick. Appends the next WeeklyReturn (week numbers are
    /// assigned exactly once per call) and moves totalReturns in lockstep.
    /// Period deduplication is the scheduler's responsibility.
    pub fn apply_return(
        &mut self,
        week_start: DateTime<Utc>,
        week_end: DateTime<Utc>,
        return_rate: f64,
        now: DateTime<Utc>,
    ) -> Result<WeeklyReturn> {
        if !self.is_active || self.status != InvestmentStatus::Active {
            return Err(AppError::invalid_state(format!(
                "investment is not active (status '{}')",
                self.status.as_str()
            )));
        }

        let return_amount = Self::compute_return_amount(self.amount, return_rate);
        let entry = WeeklyReturn {
            week: self.weekly_returns.len() as u32 + 1,
            week_start,
            week_end,
            return_rate,
            return_amount,
            credited_at: now,
        };

        self.weekly_returns.push(entry.clone());
        self.total_returns += return_amount;
        self.last_return_date = Some(now);
        self.updated_at = now;

        Ok(entry)
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != InvestmentStatus::Active {
            return Err(AppError::invalid_state(format!(
                "cannot pause from status '{}'",
                self.status.as_str()
            )));
        }
        self.status = InvestmentStatus::Paused;
        self.is_active = false;
        self.updated_at = now;
        Ok(())
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != InvestmentStatus::Paused {
            return Err(AppError::invalid_state(format!(
                "cannot resume from status '{}'",
                self.status.as_str()
            )));
        }
        self.status = InvestmentStatus::Active;
        self.is_active = true;
        self.updated_at = now;
        Ok(())
    }

    // Virtual fields: computed on demand, never stored.

    pub fn total_value(&self) -> f64 {
        self.amount + self.total_returns
    }

    pub fn roi_percent(&self) -> f64 {
        if self.amount == 0.0 {
            0.0
        } else {
            self.total_returns / self.amount * 100.0
        }
    }

    pub fn returns_consistent(&self) -> bool {
        let sum: f64 = self.weekly_returns.iter().map(|wr| wr.return_amount).sum();
        self.total_returns == sum
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddReturnRequest {
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub return_rate: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentResponse {
    pub id: String,
    pub user_id: String,
    pub index_id: String,
    pub amount: f64,
    pub payment_request_id: String,
    pub total_returns: f64,
    pub total_value: f64,
    pub roi_percent: f64,
    pub weekly_returns: Vec<WeeklyReturn>,
    pub is_active: bool,
    pub status: InvestmentStatus,
    pub activated_at: Option<DateTime<Utc>>,
    pub last_return_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Investment> for InvestmentResponse {
    fn from(inv: Investment) -> Self {
        InvestmentResponse {
            id: inv.id.map(|id| id.to_hex()).unwrap_or_default(),
            total_value: inv.total_value(),
            roi_percent: inv.roi_percent(),
            user_id: inv.user_id,
            index_id: inv.index_id,
            amount: inv.amount,
            payment_request_id: inv.payment_request_id,
            total_returns: inv.total_returns,
            weekly_returns: inv.weekly_returns,
            is_active: inv.is_active,
            status: inv.status,
            activated_at: inv.activated_at,
            last_return_date: inv.last_return_date,
            created_at: inv.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_investment(amount: f64) -> Investment {
        Investment::new(
            ObjectId::new(),
            "user-1".to_string(),
            "index-1".to_string(),
            amount,
            "req-1".to_string(),
            Utc::now(),
        )
    }

    #[test]
    fn four_percent_on_ten_thousand_credits_four_hundred() {
        let now = Utc::now();
        let mut inv = active_investment(10_000.0);

        let credited = inv.apply_return(now, now, 4.0, now).unwrap();
        assert_eq!(credited.return_amount, 400.0);
        assert_eq!(credited.week, 1);

        assert_eq!(inv.total_returns, 400.0);
        assert_eq!(inv.weekly_returns.len(), 1);
        assert_eq!(inv.last_return_date, Some(now));
        assert!(inv.returns_consistent());
    }

    #[test]
    fn return_amount_is_rounded() {
        // 3.33% of 1000 = 33.3 -> 33
        assert_eq!(Investment::compute_return_amount(1_000.0, 3.33), 33.0);
        // 4.5% of 9999 = 449.955 -> 450
        assert_eq!(Investment::compute_return_amount(9_999.0, 4.5), 450.0);
    }

    #[test]
    fn weeks_increment_by_one_per_tick() {
        let now = Utc::now();
        let mut inv = active_investment(10_000.0);

        for expected_week in 1..=5u32 {
            let credited = inv.apply_return(now, now, 3.0, now).unwrap();
            assert_eq!(credited.week, expected_week);
        }
        assert_eq!(inv.total_returns, 5.0 * 300.0);
        assert!(inv.returns_consistent());
    }

    #[test]
    fn week_numbers_survive_pause_resume() {
        let now = Utc::now();
        let mut inv = active_investment(10_000.0);

        inv.apply_return(now, now, 4.0, now).unwrap();
        inv.apply_return(now, now, 4.0, now).unwrap();

        inv.pause(now).unwrap();
        let before = inv.total_returns;
        assert!(matches!(
            inv.apply_return(now, now, 4.0, now),
            Err(AppError::InvalidState(_))
        ));
        // pause leaves accrued totals untouched
        assert_eq!(inv.total_returns, before);

        inv.resume(now).unwrap();
        let credited = inv.apply_return(now, now, 4.0, now).unwrap();
        assert_eq!(credited.week, 3);
        assert!(inv.returns_consistent());
    }

    #[test]
    fn accrual_rejected_when_inactive() {
        let now = Utc::now();
        let mut inv = active_investment(10_000.0);
        inv.pause(now).unwrap();

        assert!(matches!(
            inv.apply_return(now, now, 4.0, now),
            Err(AppError::InvalidState(_))
        ));
        assert!(inv.weekly_returns.is_empty());
    }

    #[test]
    fn pause_and_resume_guard_their_source_states() {
        let now = Utc::now();
        let mut inv = active_investment(5_000.0);

        assert!(matches!(inv.resume(now), Err(AppError::InvalidState(_))));
        inv.pause(now).unwrap();
        assert!(matches!(inv.pause(now), Err(AppError::InvalidState(_))));
        inv.resume(now).unwrap();
        assert_eq!(inv.status, InvestmentStatus::Active);
        assert!(inv.is_active);
    }

    #[test]
    fn virtual_fields_are_derived() {
        let now = Utc::now();
        let mut inv = active_investment(10_000.0);
        inv.apply_return(now, now, 5.0, now).unwrap();

        assert_eq!(inv.total_value(), 10_500.0);
        assert_eq!(inv.roi_percent(), 5.0);
    }

    #[test]
    fn from_approved_request_copies_principal_and_link() {
        let now = Utc::now();
        let request = PaymentRequest::new(
            "user-1".into(),
            "index-1".into(),
            10_000.0,
            "bank_transfer".into(),
            24,
            now,
        );
        let inv_id = ObjectId::new();
        let inv = Investment::from_approved_request(&request, inv_id, now);

        assert_eq!(inv.amount, 10_000.0);
        assert_eq!(inv.status, InvestmentStatus::Active);
        assert!(inv.is_active);
        assert_eq!(inv.activated_at, Some(now));
        assert_eq!(
            inv.payment_request_id,
            request.id.unwrap().to_hex()
        );
    }
}
