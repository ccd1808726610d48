pub mod indexes;
pub mod investments;
pub mod payment_requests;
pub mod scheduler;
pub mod withdrawals;
