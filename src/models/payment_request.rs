use chrono::{DateTime, Duration, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::errors::{AppError, Result};
use crate::models::optional_bson_datetime;

/// A user's declared intent to fund an investment, pending admin verification
/// of a manual payment. Created by the user; mutated only by the user (proof
/// upload) while pending and only by an admin thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    pub user_id: String,
    pub index_id: String,
    pub amount: f64,
    pub payment_method: String,
    pub status: PaymentRequestStatus,

    // Proof of the offline payment, uploaded by the user
    pub payment_proof: Option<String>,
    pub transaction_reference: Option<String>,

    // Admin verification trail
    pub verified_by: Option<String>,
    #[serde(default, with = "optional_bson_datetime")]
    pub verified_at: Option<DateTime<Utc>>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,

    /// Set only on approval. Non-null iff status == approved.
    pub investment_id: Option<String>,
    pub rejection_reason: Option<String>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRequestStatus {
    Pending,
    ProofUploaded,
    Verified,
    Approved,
    Rejected,
    Expired,
}

impl PaymentRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRequestStatus::Pending => "pending",
            PaymentRequestStatus::ProofUploaded => "proof_uploaded",
            PaymentRequestStatus::Verified => "verified",
            PaymentRequestStatus::Approved => "approved",
            PaymentRequestStatus::Rejected => "rejected",
            PaymentRequestStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentRequestStatus::Approved
                | PaymentRequestStatus::Rejected
                | PaymentRequestStatus::Expired
        )
    }

    /// States an admin decision (approve/reject) may start from.
    pub fn is_decidable(&self) -> bool {
        matches!(
            self,
            PaymentRequestStatus::Pending
                | PaymentRequestStatus::ProofUploaded
                | PaymentRequestStatus::Verified
        )
    }
}

impl PaymentRequest {
    pub fn new(
        user_id: String,
        index_id: String,
        amount: f64,
        payment_method: String,
        expiry_hours: i64,
        now: DateTime<Utc>,
    ) -> Self {
        PaymentRequest {
            id: Some(ObjectId::new()),
            user_id,
            index_id,
            amount,
            payment_method,
            status: PaymentRequestStatus::Pending,
            payment_proof: None,
            transaction_reference: None,
            verified_by: None,
            verified_at: None,
            expires_at: now + Duration::hours(expiry_hours),
            investment_id: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Proof can only be attached while the request is still pending.
    pub fn upload_proof(
        &mut self,
        proof_ref: String,
        transaction_ref: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.status != PaymentRequestStatus::Pending {
            return Err(AppError::invalid_state(format!(
                "cannot upload proof from status '{}'",
                self.status.as_str()
            )));
        }
        self.payment_proof = Some(proof_ref);
        self.transaction_reference = Some(transaction_ref);
        self.status = PaymentRequestStatus::ProofUploaded;
        self.updated_at = now;
        Ok(())
    }

    /// Admin acknowledgement that the uploaded proof checks out.
    pub fn verify(&mut self, admin_id: &str, now: DateTime<Utc>) -> Result<()> {
        if self.status != PaymentRequestStatus::ProofUploaded {
            return Err(AppError::invalid_state(format!(
                "cannot verify from status '{}'",
                self.status.as_str()
            )));
        }
        self.status = PaymentRequestStatus::Verified;
        self.verified_by = Some(admin_id.to_string());
        self.verified_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Distinguishes a duplicate decision (AlreadyProcessed, non-retryable)
    /// from an operation attempted out of order (InvalidState).
    pub fn decision_guard(&self) -> Result<()> {
        if self.status.is_decidable() {
            return Ok(());
        }
        if self.status.is_terminal() {
            Err(AppError::already_processed(format!(
                "payment request already {}",
                self.status.as_str()
            )))
        } else {
            Err(AppError::invalid_state(format!(
                "cannot decide from status '{}'",
                self.status.as_str()
            )))
        }
    }

    pub fn is_expirable(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentRequestStatus::Pending && self.expires_at < now
    }

    /// Invariant from the data model: investmentId non-null iff approved.
    pub fn investment_link_consistent(&self) -> bool {
        self.investment_id.is_some() == (self.status == PaymentRequestStatus::Approved)
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    #[validate(length(min = 1, message = "indexId is required"))]
    pub index_id: String,
    #[validate(range(min = 0.01, message = "amount must be positive"))]
    pub amount: f64,
    #[validate(length(min = 1, message = "paymentMethod is required"))]
    pub payment_method: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UploadProofRequest {
    #[validate(length(min = 1, message = "paymentProof is required"))]
    pub payment_proof: String,
    #[validate(length(min = 1, message = "transactionReference is required"))]
    pub transaction_reference: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequestResponse {
    pub id: String,
    pub user_id: String,
    pub index_id: String,
    pub amount: f64,
    pub payment_method: String,
    pub status: PaymentRequestStatus,
    pub payment_proof: Option<String>,
    pub transaction_reference: Option<String>,
    pub verified_by: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub investment_id: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<PaymentRequest> for PaymentRequestResponse {
    fn from(req: PaymentRequest) -> Self {
        PaymentRequestResponse {
            id: req.id.map(|id| id.to_hex()).unwrap_or_default(),
            user_id: req.user_id,
            index_id: req.index_id,
            amount: req.amount,
            payment_method: req.payment_method,
            status: req.status,
            payment_proof: req.payment_proof,
            transaction_reference: req.transaction_reference,
            verified_by: req.verified_by,
            verified_at: req.verified_at,
            expires_at: req.expires_at,
            investment_id: req.investment_id,
            rejection_reason: req.rejection_reason,
            created_at: req.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PaymentRequest {
        PaymentRequest::new(
            "user-1".to_string(),
            "index-1".to_string(),
            10_000.0,
            "bank_transfer".to_string(),
            24,
            Utc::now(),
        )
    }

    #[test]
    fn new_request_is_pending_and_expires_in_24h() {
        let now = Utc::now();
        let req = PaymentRequest::new(
            "user-1".into(),
            "index-1".into(),
            10_000.0,
            "upi".into(),
            24,
            now,
        );
        assert_eq!(req.status, PaymentRequestStatus::Pending);
        assert_eq!(req.expires_at, now + Duration::hours(24));
        assert!(req.investment_link_consistent());
    }

    #[test]
    fn proof_upload_only_from_pending() {
        let mut req = request();
        req.upload_proof("proof-1".into(), "TXN-1".into(), Utc::now())
            .unwrap();
        assert_eq!(req.status, PaymentRequestStatus::ProofUploaded);

        let err = req
            .upload_proof("proof-2".into(), "TXN-2".into(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        // first proof untouched
        assert_eq!(req.payment_proof.as_deref(), Some("proof-1"));
    }

    #[test]
    fn verify_requires_uploaded_proof() {
        let mut req = request();
        assert!(matches!(
            req.verify("admin-1", Utc::now()),
            Err(AppError::InvalidState(_))
        ));

        req.upload_proof("proof-1".into(), "TXN-1".into(), Utc::now())
            .unwrap();
        req.verify("admin-1", Utc::now()).unwrap();
        assert_eq!(req.status, PaymentRequestStatus::Verified);
        assert_eq!(req.verified_by.as_deref(), Some("admin-1"));
        assert!(req.verified_at.is_some());
    }

    #[test]
    fn decision_guard_accepts_pending_proof_uploaded_and_verified() {
        let mut req = request();
        assert!(req.decision_guard().is_ok());

        req.upload_proof("proof-1".into(), "TXN-1".into(), Utc::now())
            .unwrap();
        assert!(req.decision_guard().is_ok());

        req.verify("admin-1", Utc::now()).unwrap();
        assert!(req.decision_guard().is_ok());
    }

    #[test]
    fn decision_guard_flags_terminal_states_as_already_processed() {
        let mut req = request();
        req.status = PaymentRequestStatus::Approved;
        assert!(matches!(
            req.decision_guard(),
            Err(AppError::AlreadyProcessed(_))
        ));

        req.status = PaymentRequestStatus::Rejected;
        assert!(matches!(
            req.decision_guard(),
            Err(AppError::AlreadyProcessed(_))
        ));

        req.status = PaymentRequestStatus::Expired;
        assert!(matches!(
            req.decision_guard(),
            Err(AppError::AlreadyProcessed(_))
        ));
    }

    #[test]
    fn expiry_only_touches_pending_requests() {
        let now = Utc::now();
        let mut req = PaymentRequest::new(
            "user-1".into(),
            "index-1".into(),
            10_000.0,
            "upi".into(),
            24,
            now - Duration::hours(48),
        );
        assert!(req.is_expirable(now));

        req.upload_proof("proof-1".into(), "TXN-1".into(), now).unwrap();
        assert!(!req.is_expirable(now));
    }

    #[test]
    fn status_strings_match_stored_shape() {
        assert_eq!(PaymentRequestStatus::ProofUploaded.as_str(), "proof_uploaded");
        let json = serde_json::to_string(&PaymentRequestStatus::ProofUploaded).unwrap();
        assert_eq!(json, "\"proof_uploaded\"");
    }
}
