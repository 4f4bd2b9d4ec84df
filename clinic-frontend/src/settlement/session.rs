//! The settlement dialog: open, pick a method, settle, close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{
    BillableReference, Encounter, OutstandingSummary, SettlementMethod, SettlementOutcome,
};
use crate::services::billing_client::BillingBackend;
use crate::services::metrics;

use super::aggregator::OutstandingChargeAggregator;
use super::dispatcher::{DispatchResult, PostSettlementDispatcher};
use super::error::SettlementError;
use super::hooks::{CompletionSignal, SettlementHooks, SettlementNotice};
use super::orchestrator::{SettlementHandle, SettlementOrchestrator};
use super::poller::{PollPolicy, SettlementPoller};
use super::references::build_references;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "phase", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    AwaitingMethod,
    Polling {
        #[serde(rename = "paymentId")]
        payment_id: String,
    },
    AwaitingPrint {
        #[serde(rename = "prescriptionId")]
        prescription_id: String,
    },
    Completed,
    Failed {
        reason: String,
    },
    TimedOut,
    Closed,
}

/// Immediate answer to a settle request.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementProgress {
    Settled {
        outcome: SettlementOutcome,
    },
    Polling {
        #[serde(rename = "paymentId")]
        payment_id: String,
        #[serde(rename = "paymentUrl")]
        payment_url: String,
        #[serde(rename = "totalAmount")]
        total_amount: Decimal,
    },
}

/// Factory for settlement dialogs sharing one billing backend.
#[derive(Clone)]
pub struct SettlementService {
    backend: Arc<dyn BillingBackend>,
    policy: PollPolicy,
}

impl SettlementService {
    pub fn new(backend: Arc<dyn BillingBackend>, policy: PollPolicy) -> Self {
        Self { backend, policy }
    }

    /// Opens a settlement dialog for `encounter`.
    ///
    /// Loads every outstanding charge first. When that fails the user is told
    /// payment information cannot be loaded and no dialog is returned.
    pub async fn open_settlement(
        &self,
        encounter: Encounter,
        hooks: SettlementHooks,
    ) -> Result<Arc<SettlementSession>, SettlementError> {
        let references = build_references(&encounter);
        let aggregator = OutstandingChargeAggregator::new(self.backend.clone());

        let summary = match aggregator.fetch_outstanding(&references).await {
            Ok(summary) => summary,
            Err(e) => {
                hooks.notifier.notify(SettlementNotice::LoadFailed);
                return Err(e);
            }
        };

        tracing::info!(
            encounter_id = %encounter.id,
            references = references.len(),
            total_unpaid = %summary.total_unpaid(),
            "Settlement dialog opened"
        );

        let poller = Arc::new(SettlementPoller::new(self.backend.clone(), self.policy));
        let orchestrator = SettlementOrchestrator::new(
            self.backend.clone(),
            poller.clone(),
            hooks.page_opener.clone(),
        );
        let dispatcher = PostSettlementDispatcher::new(hooks.notifier.clone(), hooks.printer.clone());

        Ok(Arc::new(SettlementSession {
            encounter,
            references,
            summary: Mutex::new(summary),
            phase: Mutex::new(SessionPhase::AwaitingMethod),
            aggregator,
            orchestrator,
            dispatcher,
            poller,
            on_success: hooks.on_success,
            closed: AtomicBool::new(false),
        }))
    }
}

/// One open settlement dialog.
pub struct SettlementSession {
    encounter: Encounter,
    references: Vec<BillableReference>,
    summary: Mutex<OutstandingSummary>,
    phase: Mutex<SessionPhase>,
    aggregator: OutstandingChargeAggregator,
    orchestrator: SettlementOrchestrator,
    dispatcher: PostSettlementDispatcher,
    poller: Arc<SettlementPoller>,
    on_success: CompletionSignal,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SettlementSession {
    pub fn encounter(&self) -> &Encounter {
        &self.encounter
    }

    pub fn references(&self) -> &[BillableReference] {
        &self.references
    }

    pub fn summary(&self) -> OutstandingSummary {
        lock(&self.summary).clone()
    }

    pub fn phase(&self) -> SessionPhase {
        match lock(&self.phase).clone() {
            SessionPhase::AwaitingPrint { .. } if self.on_success.has_fired() => {
                SessionPhase::Completed
            }
            phase => phase,
        }
    }

    pub fn is_settling(&self) -> bool {
        self.orchestrator.is_in_flight()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Re-reads the outstanding charges.
    pub async fn refresh(&self) -> Result<OutstandingSummary, SettlementError> {
        let summary = self.aggregator.fetch_outstanding(&self.references).await?;
        *lock(&self.summary) = summary.clone();
        Ok(summary)
    }

    /// Starts a settlement attempt with `method`.
    ///
    /// Cash settles before this returns. Gateway methods return once the
    /// checkout page is open; the outcome is dispatched when polling ends.
    pub async fn settle(
        self: &Arc<Self>,
        method: SettlementMethod,
    ) -> Result<SettlementProgress, SettlementError> {
        if self.is_closed() {
            return Err(SettlementError::Closed);
        }

        let summary = self.summary();
        let handle = self
            .orchestrator
            .settle(&summary, method, &self.encounter.id, &self.references)
            .await?;

        match handle {
            SettlementHandle::Settled(outcome) => {
                self.conclude(method, &outcome).await;
                Ok(SettlementProgress::Settled { outcome })
            }
            SettlementHandle::Polling { poll, .. } if self.is_closed() => {
                poll.cancel();
                Err(SettlementError::Closed)
            }
            SettlementHandle::Polling { settlement, poll } => {
                self.set_phase(SessionPhase::Polling {
                    payment_id: settlement.payment_id.clone(),
                });

                let session = Arc::clone(self);
                tokio::spawn(async move {
                    let outcome = poll.wait().await;
                    session.conclude(method, &outcome).await;
                });

                Ok(SettlementProgress::Polling {
                    payment_id: settlement.payment_id,
                    payment_url: settlement.payment_url,
                    total_amount: settlement.total_amount,
                })
            }
        }
    }

    /// Closes the dialog. Any running poll stops without reporting an
    /// outcome. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.poller.shutdown();
        *lock(&self.phase) = SessionPhase::Closed;
        tracing::info!(encounter_id = %self.encounter.id, "Settlement dialog closed");
    }

    async fn conclude(&self, method: SettlementMethod, outcome: &SettlementOutcome) {
        metrics::record_settlement_outcome(method.as_str(), outcome.label());

        if self.is_closed() {
            tracing::info!(
                encounter_id = %self.encounter.id,
                outcome = outcome.label(),
                "Dialog already closed, outcome not reported"
            );
            return;
        }

        let phase = match self
            .dispatcher
            .after_settlement(outcome, &self.encounter, &self.on_success)
        {
            DispatchResult::Finished => SessionPhase::Completed,
            DispatchResult::AwaitingPrint { prescription_id } => {
                SessionPhase::AwaitingPrint { prescription_id }
            }
            DispatchResult::KeptOpen => match outcome {
                SettlementOutcome::TimedOut => SessionPhase::TimedOut,
                SettlementOutcome::Failed { reason } => SessionPhase::Failed {
                    reason: reason.clone(),
                },
                _ => SessionPhase::AwaitingMethod,
            },
            DispatchResult::Dismissed => return,
        };

        tracing::info!(
            encounter_id = %self.encounter.id,
            method = %method,
            outcome = outcome.label(),
            "Settlement attempt concluded"
        );
        self.set_phase(phase);

        // The ledger is the source of truth; never patch the summary locally.
        if let Err(e) = self.refresh().await {
            tracing::warn!(
                encounter_id = %self.encounter.id,
                error = %e,
                "Could not refresh charges after settlement"
            );
        }
    }

    fn set_phase(&self, phase: SessionPhase) {
        if self.is_closed() {
            return;
        }
        *lock(&self.phase) = phase;
    }
}
