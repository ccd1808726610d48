pub(crate) mod index_fund;
pub(crate) mod investment;
pub(crate) mod payment_request;
pub(crate) mod withdrawal;

/// Serde helper for Option<chrono::DateTime<Utc>> fields so they round-trip
/// as real BSON datetimes instead of strings (comparisons in filters depend
/// on this). The non-optional helper ships with bson; the optional one does
/// not.
pub mod optional_bson_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => bson::DateTime::from_chrono(*dt).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<bson::DateTime>::deserialize(deserializer)?;
        Ok(value.map(|dt| dt.to_chrono()))
    }
}

// End-to-end walks through the lifecycle state machine, exercising the same
// transitions the handlers drive against the store.
#[cfg(test)]
mod lifecycle_tests {
    use chrono::Utc;
    use mongodb::bson::oid::ObjectId;

    use super::index_fund::IndexStats;
    use super::investment::{Investment, InvestmentStatus};
    use super::payment_request::{PaymentRequest, PaymentRequestStatus};
    use super::withdrawal::{BankDetails, Withdrawal, WithdrawalStatus};

    #[test]
    fn funding_lifecycle_from_request_to_active_investment() {
        let now = Utc::now();
        let mut request = PaymentRequest::new(
            "user-7".into(),
            "index-1".into(),
            10_000.0,
            "bank_transfer".into(),
            24,
            now,
        );

        request
            .upload_proof("receipt-001".into(), "TXN-889".into(), now)
            .unwrap();
        request.decision_guard().unwrap();

        // what approve() persists
        let investment = Investment::from_approved_request(&request, ObjectId::new(), now);
        request.status = PaymentRequestStatus::Approved;
        request.investment_id = investment.id.map(|id| id.to_hex());
        request.verified_by = Some("admin-1".into());
        request.verified_at = Some(now);

        assert!(request.investment_link_consistent());
        assert_eq!(investment.amount, 10_000.0);
        assert_eq!(investment.status, InvestmentStatus::Active);
        assert!(investment.is_active);

        // index rollup after this one activation
        let stats = IndexStats::aggregate(&[investment]);
        assert_eq!(stats.total_invested, 10_000.0);
        assert_eq!(stats.active_investors, 1);

        // a second approval attempt is a duplicate decision
        assert!(request.decision_guard().is_err());
    }

    #[test]
    fn accrued_returns_fund_a_withdrawal() {
        let now = Utc::now();
        let mut investment = Investment::new(
            ObjectId::new(),
            "user-7".into(),
            "index-1".into(),
            10_000.0,
            ObjectId::new().to_hex(),
            now,
        );
        investment.apply_return(now, now, 4.0, now).unwrap();
        assert_eq!(investment.total_returns, 400.0);

        let mut withdrawal = Withdrawal::new(
            "user-7".into(),
            400.0,
            BankDetails {
                account_holder: "A Kumar".into(),
                account_number: "123456789012".into(),
                ifsc_code: "HDFC0001234".into(),
                bank_name: "HDFC".into(),
            },
            0.0,
            now,
        );
        assert_eq!(withdrawal.net_amount, 400.0);

        let balance =
            crate::services::portfolio::withdrawable_balance(&[investment], &[withdrawal.clone()]);
        // 10_400 accumulated minus the 400 the pending request reserves
        assert_eq!(balance, 10_000.0);

        withdrawal.approve("admin-1", "TXN123", now).unwrap();
        assert_eq!(withdrawal.status, WithdrawalStatus::Approved);
        assert!(withdrawal.processed_at.is_some());

        withdrawal.complete(now).unwrap();
        assert!(withdrawal.status.is_terminal());
    }
}
