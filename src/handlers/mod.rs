pub(crate) mod indexes;
pub(crate) mod investments;
pub(crate) mod payment_requests;
pub(crate) mod scheduler;
pub(crate) mod withdrawals;
