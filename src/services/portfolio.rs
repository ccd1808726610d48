use serde::Serialize;

use crate::models::investment::{Investment, InvestmentStatus};
use crate::models::withdrawal::Withdrawal;

/// Funds the user can still take out: accumulated investment value minus
/// everything already reserved by live or settled withdrawals. Withdrawals
/// are not structurally linked to investments, so this is computed over the
/// user's whole book.
pub fn withdrawable_balance(investments: &[Investment], withdrawals: &[Withdrawal]) -> f64 {
    let accumulated: f64 = investments
        .iter()
        .filter(|inv| inv.status != InvestmentStatus::Withdrawn)
        .map(|inv| inv.total_value())
        .sum();

    let reserved: f64 = withdrawals
        .iter()
        .filter(|wd| wd.status.reserves_funds())
        .map(|wd| wd.amount)
        .sum();

    accumulated - reserved
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSummary {
    pub total_invested: f64,
    pub total_returns: f64,
    pub active_investments: usize,
    pub withdrawable_balance: f64,
}

pub fn summarize(investments: &[Investment], withdrawals: &[Withdrawal]) -> PortfolioSummary {
    PortfolioSummary {
        total_invested: investments.iter().map(|inv| inv.amount).sum(),
        total_returns: investments.iter().map(|inv| inv.total_returns).sum(),
        active_investments: investments.iter().filter(|inv| inv.is_active).count(),
        withdrawable_balance: withdrawable_balance(investments, withdrawals),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::withdrawal::BankDetails;
    use chrono::Utc;
    use mongodb::bson::oid::ObjectId;

    fn investment(amount: f64) -> Investment {
        Investment::new(
            ObjectId::new(),
            "user-1".to_string(),
            "index-1".to_string(),
            amount,
            ObjectId::new().to_hex(),
            Utc::now(),
        )
    }

    fn withdrawal(amount: f64) -> Withdrawal {
        Withdrawal::new(
            "user-1".to_string(),
            amount,
            BankDetails {
                account_holder: "A Kumar".to_string(),
                account_number: "123456789012".to_string(),
                ifsc_code: "HDFC0001234".to_string(),
                bank_name: "HDFC".to_string(),
            },
            0.0,
            Utc::now(),
        )
    }

    #[test]
    fn balance_is_value_minus_reserved_withdrawals() {
        let now = Utc::now();
        let mut inv = investment(10_000.0);
        inv.apply_return(now, now, 4.0, now).unwrap();

        let pending = withdrawal(300.0);
        let mut rejected = withdrawal(5_000.0);
        rejected.reject("admin-1", "bad details", now).unwrap();

        // 10_000 + 400 accrued - 300 pending; rejected does not reserve
        let balance = withdrawable_balance(&[inv], &[pending, rejected]);
        assert_eq!(balance, 10_100.0);
    }

    #[test]
    fn withdrawn_investments_no_longer_count() {
        let mut inv = investment(10_000.0);
        inv.status = InvestmentStatus::Withdrawn;
        inv.is_active = false;

        assert_eq!(withdrawable_balance(&[inv], &[]), 0.0);
    }

    #[test]
    fn paused_investment_value_stays_withdrawable() {
        let now = Utc::now();
        let mut inv = investment(10_000.0);
        inv.apply_return(now, now, 3.0, now).unwrap();
        inv.pause(now).unwrap();

        assert_eq!(withdrawable_balance(&[inv], &[]), 10_300.0);
    }

    #[test]
    fn summary_aggregates_the_book() {
        let now = Utc::now();
        let mut a = investment(10_000.0);
        a.apply_return(now, now, 4.0, now).unwrap();
        let mut b = investment(5_000.0);
        b.pause(now).unwrap();

        let summary = summarize(&[a, b], &[withdrawal(100.0)]);
        assert_eq!(summary.total_invested, 15_000.0);
        assert_eq!(summary.total_returns, 400.0);
        assert_eq!(summary.active_investments, 1);
        assert_eq!(summary.withdrawable_balance, 15_300.0);
    }
}
