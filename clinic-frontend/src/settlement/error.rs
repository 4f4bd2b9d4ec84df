use thiserror::Error;

use crate::services::billing_client::BillingError;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("cannot load payment information")]
    Aggregation(#[source] BillingError),

    #[error("no billable references to load charges for")]
    NoReferences,

    #[error("a settlement is already in progress")]
    AlreadyInFlight,

    #[error("settlement dialog is closed")]
    Closed,
}
