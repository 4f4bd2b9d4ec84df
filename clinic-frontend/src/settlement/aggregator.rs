use std::sync::Arc;

use crate::models::{BillableReference, OutstandingSummary};
use crate::services::billing_client::BillingBackend;

use super::error::SettlementError;

/// Loads every charge line for a set of billable references.
///
/// Pure read; safe to call again after a settlement to refresh the view.
/// Deduplication of lines shared between references is the backend's job.
#[derive(Clone)]
pub struct OutstandingChargeAggregator {
    backend: Arc<dyn BillingBackend>,
}

impl OutstandingChargeAggregator {
    pub fn new(backend: Arc<dyn BillingBackend>) -> Self {
        Self { backend }
    }

    pub async fn fetch_outstanding(
        &self,
        references: &[BillableReference],
    ) -> Result<OutstandingSummary, SettlementError> {
        if references.is_empty() {
            return Err(SettlementError::NoReferences);
        }

        let summary = self
            .backend
            .get_outstanding_payments(references)
            .await
            .map_err(|e| {
                tracing::error!(
                    references = references.len(),
                    error = %e,
                    "Failed to load outstanding charges"
                );
                SettlementError::Aggregation(e)
            })?;

        tracing::debug!(
            lines = summary.lines().len(),
            total_unpaid = %summary.total_unpaid(),
            total_paid = %summary.total_paid(),
            "Outstanding charges loaded"
        );

        Ok(summary)
    }
}
