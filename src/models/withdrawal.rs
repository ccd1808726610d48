use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{AppError, Result};
use crate::models::optional_bson_datetime;

/// A user's request to extract funds to an external bank account. Settlement
/// of the actual payout happens out of band; an admin records it here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub user_id: String,
    pub amount: f64,
    /// Human-facing reference printed on statements and tickets.
    pub request_id: String,
    pub status: WithdrawalStatus,

    /// Captured at request time, immutable afterwards.
    pub bank_details: BankDetails,

    pub processing_fee: f64,
    /// amount - processingFee, fixed at creation.
    pub net_amount: f64,

    pub processed_by: Option<String>,
    #[serde(default, with = "optional_bson_datetime")]
    pub processed_at: Option<DateTime<Utc>>,
    pub transaction_reference: Option<String>,
    pub rejection_reason: Option<String>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BankDetails {
    #[validate(length(min = 1, message = "accountHolder is required"))]
    pub account_holder: String,
    #[validate(length(min = 4, message = "accountNumber is required"))]
    pub account_number: String,
    #[validate(length(min = 1, message = "ifscCode is required"))]
    pub ifsc_code: String,
    #[validate(length(min = 1, message = "bankName is required"))]
    pub bank_name: String,
}

impl BankDetails {
    /// Display form: everything but the last four characters masked.
    pub fn masked_account_number(&self) -> String {
        let len = self.account_number.chars().count();
        if len <= 4 {
            return self.account_number.clone();
        }
        let visible: String = self
            .account_number
            .chars()
            .skip(len - 4)
            .collect();
        format!("{}{}", "X".repeat(len - 4), visible)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Approved,
    Rejected,
    Completed,
    Failed,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Rejected => "rejected",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Rejected | WithdrawalStatus::Completed | WithdrawalStatus::Failed
        )
    }

    /// Counts against the user's withdrawable balance: everything that is not
    /// dead. A pending request reserves the funds it asks for.
    pub fn reserves_funds(&self) -> bool {
        !matches!(self, WithdrawalStatus::Rejected | WithdrawalStatus::Failed)
    }
}

impl Withdrawal {
    pub fn new(
        user_id: String,
        amount: f64,
        bank_details: BankDetails,
        processing_fee: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let id = ObjectId::new();
        Withdrawal {
            request_id: format!("WD-{}", id.to_hex().to_uppercase()),
            id: Some(id),
            user_id,
            amount,
            status: WithdrawalStatus::Pending,
            bank_details,
            processing_fee,
            net_amount: amount - processing_fee,
            processed_by: None,
            processed_at: None,
            transaction_reference: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn start_processing(&mut self, admin_id: &str, now: DateTime<Utc>) -> Result<()> {
        if self.status != WithdrawalStatus::Pending {
            return Err(AppError::invalid_state(format!(
                "cannot start processing from status '{}'",
                self.status.as_str()
            )));
        }
        self.status = WithdrawalStatus::Processing;
        self.processed_by = Some(admin_id.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// A payout cannot be marked approved without a bank/UPI reference.
    pub fn approve(
        &mut self,
        admin_id: &str,
        transaction_reference: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if transaction_reference.trim().is_empty() {
            return Err(AppError::validation(
                "transactionReference is required to approve a withdrawal",
            ));
        }
        if !matches!(
            self.status,
            WithdrawalStatus::Pending | WithdrawalStatus::Processing
        ) {
            return Err(AppError::invalid_state(format!(
                "cannot approve from status '{}'",
                self.status.as_str()
            )));
        }
        self.status = WithdrawalStatus::Approved;
        self.processed_by = Some(admin_id.to_string());
        self.processed_at = Some(now);
        self.transaction_reference = Some(transaction_reference.to_string());
        self.updated_at = now;
        Ok(())
    }

    pub fn reject(&mut self, admin_id: &str, reason: &str, now: DateTime<Utc>) -> Result<()> {
        if !matches!(
            self.status,
            WithdrawalStatus::Pending | WithdrawalStatus::Processing
        ) {
            return Err(AppError::invalid_state(format!(
                "cannot reject from status '{}'",
                self.status.as_str()
            )));
        }
        self.status = WithdrawalStatus::Rejected;
        self.processed_by = Some(admin_id.to_string());
        self.processed_at = Some(now);
        self.rejection_reason = Some(reason.to_string());
        self.updated_at = now;
        Ok(())
    }

    /// Out-of-band settlement confirmation: the payout landed.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != WithdrawalStatus::Approved {
            return Err(AppError::invalid_state(format!(
                "cannot complete from status '{}'",
                self.status.as_str()
            )));
        }
        self.status = WithdrawalStatus::Completed;
        self.updated_at = now;
        Ok(())
    }

    /// Out-of-band settlement confirmation: the payout bounced.
    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        if self.status != WithdrawalStatus::Approved {
            return Err(AppError::invalid_state(format!(
                "cannot fail from status '{}'",
                self.status.as_str()
            )));
        }
        self.status = WithdrawalStatus::Failed;
        self.rejection_reason = Some(reason.to_string());
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateWithdrawalRequest {
    #[validate(range(min = 0.01, message = "amount must be positive"))]
    pub amount: f64,
    #[validate(nested)]
    pub bank_details: BankDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveWithdrawalRequest {
    pub transaction_reference: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectWithdrawalRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailWithdrawalRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalResponse {
    pub id: String,
    pub user_id: String,
    pub amount: f64,
    pub request_id: String,
    pub status: WithdrawalStatus,
    pub account_holder: String,
    pub masked_account_number: String,
    pub bank_name: String,
    pub processing_fee: f64,
    pub net_amount: f64,
    pub processed_by: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub transaction_reference: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Withdrawal> for WithdrawalResponse {
    fn from(wd: Withdrawal) -> Self {
        WithdrawalResponse {
            id: wd.id.map(|id| id.to_hex()).unwrap_or_default(),
            masked_account_number: wd.bank_details.masked_account_number(),
            account_holder: wd.bank_details.account_holder,
            bank_name: wd.bank_details.bank_name,
            user_id: wd.user_id,
            amount: wd.amount,
            request_id: wd.request_id,
            status: wd.status,
            processing_fee: wd.processing_fee,
            net_amount: wd.net_amount,
            processed_by: wd.processed_by,
            processed_at: wd.processed_at,
            transaction_reference: wd.transaction_reference,
            rejection_reason: wd.rejection_reason,
            created_at: wd.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> BankDetails {
        BankDetails {
            account_holder: "A Kumar".to_string(),
            account_number: "123456789012".to_string(),
            ifsc_code: "HDFC0001234".to_string(),
            bank_name: "HDFC".to_string(),
        }
    }

    fn withdrawal(amount: f64, fee: f64) -> Withdrawal {
        Withdrawal::new("user-1".to_string(), amount, bank(), fee, Utc::now())
    }

    #[test]
    fn net_amount_fixed_at_creation() {
        let wd = withdrawal(400.0, 0.0);
        assert_eq!(wd.net_amount, 400.0);
        assert_eq!(wd.status, WithdrawalStatus::Pending);

        let wd = withdrawal(1_000.0, 25.0);
        assert_eq!(wd.net_amount, 975.0);
    }

    #[test]
    fn approve_requires_transaction_reference() {
        let now = Utc::now();
        let mut wd = withdrawal(400.0, 0.0);

        let err = wd.approve("admin-1", "  ", now).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(wd.status, WithdrawalStatus::Pending);

        wd.approve("admin-1", "TXN123", now).unwrap();
        assert_eq!(wd.status, WithdrawalStatus::Approved);
        assert_eq!(wd.processed_by.as_deref(), Some("admin-1"));
        assert_eq!(wd.processed_at, Some(now));
        assert_eq!(wd.transaction_reference.as_deref(), Some("TXN123"));
    }

    #[test]
    fn second_approve_is_invalid_state() {
        let now = Utc::now();
        let mut wd = withdrawal(400.0, 0.0);
        wd.approve("admin-1", "TXN123", now).unwrap();

        let err = wd.approve("admin-2", "TXN456", now).unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        // original reference survives the retry
        assert_eq!(wd.transaction_reference.as_deref(), Some("TXN123"));
    }

    #[test]
    fn processing_is_approvable_and_rejectable() {
        let now = Utc::now();
        let mut wd = withdrawal(400.0, 0.0);
        wd.start_processing("admin-1", now).unwrap();
        assert_eq!(wd.status, WithdrawalStatus::Processing);

        assert!(matches!(
            wd.start_processing("admin-1", now),
            Err(AppError::InvalidState(_))
        ));

        wd.approve("admin-1", "TXN123", now).unwrap();
        assert_eq!(wd.status, WithdrawalStatus::Approved);

        let mut wd2 = withdrawal(400.0, 0.0);
        wd2.start_processing("admin-1", now).unwrap();
        wd2.reject("admin-1", "mismatched name", now).unwrap();
        assert_eq!(wd2.status, WithdrawalStatus::Rejected);
        assert_eq!(wd2.rejection_reason.as_deref(), Some("mismatched name"));
    }

    #[test]
    fn complete_and_fail_only_from_approved() {
        let now = Utc::now();
        let mut wd = withdrawal(400.0, 0.0);
        assert!(matches!(wd.complete(now), Err(AppError::InvalidState(_))));
        assert!(matches!(
            wd.fail("bounced", now),
            Err(AppError::InvalidState(_))
        ));

        wd.approve("admin-1", "TXN123", now).unwrap();
        wd.complete(now).unwrap();
        assert_eq!(wd.status, WithdrawalStatus::Completed);
        assert!(wd.status.is_terminal());

        // terminal states are dead ends
        assert!(matches!(wd.fail("late", now), Err(AppError::InvalidState(_))));
    }

    #[test]
    fn masked_account_shows_last_four() {
        let details = bank();
        assert_eq!(details.masked_account_number(), "XXXXXXXX9012");

        let short = BankDetails {
            account_number: "1234".to_string(),
            ..bank()
        };
        assert_eq!(short.masked_account_number(), "1234");
    }

    #[test]
    fn fund_reservation_covers_live_statuses() {
        assert!(WithdrawalStatus::Pending.reserves_funds());
        assert!(WithdrawalStatus::Processing.reserves_funds());
        assert!(WithdrawalStatus::Approved.reserves_funds());
        assert!(WithdrawalStatus::Completed.reserves_funds());
        assert!(!WithdrawalStatus::Rejected.reserves_funds());
        assert!(!WithdrawalStatus::Failed.reserves_funds());
    }
}
