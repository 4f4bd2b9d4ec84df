use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::models::{
    BillableReference, CompositeSettlement, OutstandingSummary, SettlementMethod,
    SettlementOutcome,
};
use crate::services::billing_client::{
    BillingBackend, BulkSettlementRequest, CompositePaymentRequest,
};

use super::error::SettlementError;
use super::hooks::PaymentPageOpener;
use super::poller::{PollHandle, SettlementPoller};

/// What `settle` hands back to the dialog.
pub enum SettlementHandle {
    /// The attempt ended without a gateway round trip.
    Settled(SettlementOutcome),
    /// Checkout page opened; the outcome arrives through the poll.
    Polling {
        settlement: CompositeSettlement,
        poll: PollHandle,
    },
}

/// Picks the settlement path for a method and drives the backend call.
///
/// One instance per dialog. At most one backend settlement call is in flight
/// at a time; starting a new attempt supersedes a gateway poll still running.
pub struct SettlementOrchestrator {
    backend: Arc<dyn BillingBackend>,
    poller: Arc<SettlementPoller>,
    page_opener: Arc<dyn PaymentPageOpener>,
    in_flight: AtomicBool,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SettlementOrchestrator {
    pub fn new(
        backend: Arc<dyn BillingBackend>,
        poller: Arc<SettlementPoller>,
        page_opener: Arc<dyn PaymentPageOpener>,
    ) -> Self {
        Self {
            backend,
            poller,
            page_opener,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn settle(
        &self,
        summary: &OutstandingSummary,
        method: SettlementMethod,
        encounter_id: &str,
        references: &[BillableReference],
    ) -> Result<SettlementHandle, SettlementError> {
        let _guard = InFlightGuard::acquire(&self.in_flight).ok_or_else(|| {
            tracing::warn!(encounter_id, method = %method, "Settlement already in flight, ignoring");
            SettlementError::AlreadyInFlight
        })?;

        if self.poller.cancel() {
            tracing::info!(encounter_id, "Previous gateway attempt superseded");
        }

        if summary.is_settled() {
            tracing::info!(encounter_id, "Nothing left to pay");
            return Ok(SettlementHandle::Settled(SettlementOutcome::Completed {
                amount: None,
            }));
        }

        if method.is_gateway() {
            self.settle_via_gateway(method, encounter_id, references).await
        } else {
            Ok(SettlementHandle::Settled(
                self.settle_immediately(summary, method, encounter_id).await,
            ))
        }
    }

    async fn settle_immediately(
        &self,
        summary: &OutstandingSummary,
        method: SettlementMethod,
        encounter_id: &str,
    ) -> SettlementOutcome {
        let request = BulkSettlementRequest {
            charge_codes: summary.unpaid_codes(),
            method,
            total_amount: summary.total_unpaid(),
        };

        tracing::info!(
            encounter_id,
            method = %method,
            charges = request.charge_codes.len(),
            total_amount = %request.total_amount,
            "Processing bulk settlement"
        );

        match self.backend.process_bulk_settlement(&request).await {
            Ok(receipt) => {
                let amount = receipt.total_amount.unwrap_or(request.total_amount);
                tracing::info!(encounter_id, amount = %amount, "Bulk settlement confirmed");
                SettlementOutcome::Completed {
                    amount: Some(amount),
                }
            }
            Err(e) => {
                tracing::error!(encounter_id, error = %e, "Bulk settlement failed");
                SettlementOutcome::Failed {
                    reason: e.user_message(),
                }
            }
        }
    }

    async fn settle_via_gateway(
        &self,
        method: SettlementMethod,
        encounter_id: &str,
        references: &[BillableReference],
    ) -> Result<SettlementHandle, SettlementError> {
        let request = CompositePaymentRequest {
            encounter_id: encounter_id.to_string(),
            reference_ids: references.to_vec(),
            method,
            description: format!("Payment for encounter {}", encounter_id),
        };

        let settlement = match self.backend.create_composite_payment(&request).await {
            Ok(settlement) => settlement,
            Err(e) => {
                tracing::error!(encounter_id, method = %method, error = %e, "Composite payment creation failed");
                return Ok(SettlementHandle::Settled(SettlementOutcome::Failed {
                    reason: e.user_message(),
                }));
            }
        };

        tracing::info!(
            encounter_id,
            payment_id = %settlement.payment_id,
            total_amount = %settlement.total_amount,
            items = settlement.breakdown.len(),
            "Composite payment created"
        );

        let Some(poll) = self.poller.start(&settlement.payment_id) else {
            tracing::warn!(
                encounter_id,
                payment_id = %settlement.payment_id,
                "Dialog closed while the composite payment was being created"
            );
            return Err(SettlementError::Closed);
        };
        self.page_opener.open(&settlement.payment_url);

        Ok(SettlementHandle::Polling { settlement, poll })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChargeLine, ChargeStatus, ChargeType, PaymentStatus};
    use crate::settlement::poller::PollPolicy;
    use crate::settlement::test_support::{RecordingHooks, ScriptedBackend};
    use rust_decimal_macros::dec;

    fn unpaid_lines() -> Vec<ChargeLine> {
        vec![
            ChargeLine {
                code: "ENC-1".to_string(),
                charge_type: ChargeType::EncounterFee,
                amount: Some(dec!(200000)),
                status: ChargeStatus::Unpaid,
                description: None,
            },
            ChargeLine {
                code: "LAB-1".to_string(),
                charge_type: ChargeType::LabTest,
                amount: Some(dec!(150000)),
                status: ChargeStatus::Unpaid,
                description: None,
            },
        ]
    }

    fn refs() -> Vec<BillableReference> {
        vec![BillableReference::new("enc-1"), BillableReference::new("lab-1")]
    }

    fn orchestrator(backend: &Arc<ScriptedBackend>, hooks: &Arc<RecordingHooks>) -> SettlementOrchestrator {
        let poller = Arc::new(SettlementPoller::new(backend.clone(), PollPolicy::default()));
        SettlementOrchestrator::new(backend.clone(), poller, hooks.clone())
    }

    #[tokio::test]
    async fn test_nothing_unpaid_skips_backend() {
        let backend = Arc::new(ScriptedBackend::new());
        let hooks = Arc::new(RecordingHooks::default());
        let orchestrator = orchestrator(&backend, &hooks);
        let summary = OutstandingSummary::from_lines(vec![ChargeLine {
            status: ChargeStatus::Paid,
            ..unpaid_lines().remove(0)
        }]);

        for method in [SettlementMethod::Cash, SettlementMethod::GatewayA] {
            let handle = orchestrator
                .settle(&summary, method, "enc-1", &refs())
                .await
                .unwrap();
            assert!(matches!(
                handle,
                SettlementHandle::Settled(SettlementOutcome::Completed { amount: None })
            ));
        }
        assert!(backend.bulk_requests().is_empty());
        assert!(backend.composite_requests().is_empty());
    }

    #[tokio::test]
    async fn test_cash_sends_unpaid_codes_and_declared_total() {
        let backend = Arc::new(ScriptedBackend::new());
        let hooks = Arc::new(RecordingHooks::default());
        let orchestrator = orchestrator(&backend, &hooks);
        let summary = OutstandingSummary::from_lines(unpaid_lines());

        let handle = orchestrator
            .settle(&summary, SettlementMethod::Cash, "enc-1", &refs())
            .await
            .unwrap();

        match handle {
            SettlementHandle::Settled(SettlementOutcome::Completed { amount }) => {
                assert_eq!(amount, Some(dec!(350000)));
            }
            _ => panic!("expected cash settlement to complete"),
        }

        let requests = backend.bulk_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].charge_codes, vec!["ENC-1", "LAB-1"]);
        assert_eq!(requests[0].total_amount, dec!(350000));
        assert_eq!(backend.status_queries(), 0);
        assert!(hooks.opened_urls().is_empty());
    }

    #[tokio::test]
    async fn test_cash_failure_carries_backend_reason() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.fail_bulk("Declared total does not match ledger");
        let hooks = Arc::new(RecordingHooks::default());
        let orchestrator = orchestrator(&backend, &hooks);
        let summary = OutstandingSummary::from_lines(unpaid_lines());

        let handle = orchestrator
            .settle(&summary, SettlementMethod::Cash, "enc-1", &refs())
            .await
            .unwrap();

        match handle {
            SettlementHandle::Settled(SettlementOutcome::Failed { reason }) => {
                assert_eq!(reason, "Declared total does not match ledger");
            }
            _ => panic!("expected failure"),
        }
        assert!(!orchestrator.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_sends_all_references_and_starts_one_poll() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.set_lines(unpaid_lines());
        backend.set_default_status(PaymentStatus::Processing);
        let hooks = Arc::new(RecordingHooks::default());
        let orchestrator = orchestrator(&backend, &hooks);
        let summary = OutstandingSummary::from_lines(unpaid_lines());

        let handle = orchestrator
            .settle(&summary, SettlementMethod::GatewayA, "enc-1", &refs())
            .await
            .unwrap();

        let poll = match handle {
            SettlementHandle::Polling { settlement, poll } => {
                assert_eq!(settlement.total_amount, dec!(350000));
                assert_eq!(poll.payment_id(), settlement.payment_id);
                poll
            }
            SettlementHandle::Settled(_) => panic!("expected gateway path to poll"),
        };

        let requests = backend.composite_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].reference_ids, refs());
        assert_eq!(requests[0].method, SettlementMethod::GatewayA);
        assert_eq!(hooks.opened_urls(), vec!["https://gateway.test/checkout/pay-1"]);
        assert!(backend.bulk_requests().is_empty());

        // Retrying supersedes the running poll.
        let retry = orchestrator
            .settle(&summary, SettlementMethod::GatewayB, "enc-1", &refs())
            .await
            .unwrap();
        assert_eq!(poll.outcome(), Some(SettlementOutcome::Cancelled));
        assert!(matches!(retry, SettlementHandle::Polling { .. }));
        assert_eq!(backend.composite_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_composite_failure_is_reported_not_polled() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.fail_composite("Gateway unavailable");
        let hooks = Arc::new(RecordingHooks::default());
        let orchestrator = orchestrator(&backend, &hooks);
        let summary = OutstandingSummary::from_lines(unpaid_lines());

        let handle = orchestrator
            .settle(&summary, SettlementMethod::GatewayB, "enc-1", &refs())
            .await
            .unwrap();

        assert!(matches!(
            handle,
            SettlementHandle::Settled(SettlementOutcome::Failed { .. })
        ));
        assert!(hooks.opened_urls().is_empty());
        assert_eq!(backend.status_queries(), 0);
    }

    #[tokio::test]
    async fn test_second_settle_while_in_flight_is_rejected() {
        let backend = Arc::new(ScriptedBackend::new());
        let hooks = Arc::new(RecordingHooks::default());
        let orchestrator = orchestrator(&backend, &hooks);
        let summary = OutstandingSummary::from_lines(unpaid_lines());

        let _held = InFlightGuard::acquire(&orchestrator.in_flight).unwrap();
        let result = orchestrator
            .settle(&summary, SettlementMethod::Cash, "enc-1", &refs())
            .await;

        assert!(matches!(result, Err(SettlementError::AlreadyInFlight)));
        assert!(backend.bulk_requests().is_empty());
    }
}
