//! Gateway settlement status polling.
//!
//! A poll runs as its own task keyed by payment id. It ticks on a fixed
//! interval, stops on the first terminal gateway status, and gives up with
//! `TimedOut` once the poll budget is spent. Every poll emits exactly one
//! terminal outcome; cancellation takes the state lock first, so a tick that
//! lands concurrently with a cancel is discarded.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::models::{PaymentStatus, SettlementOutcome};
use crate::services::billing_client::BillingBackend;
use crate::services::metrics;

const DEFAULT_FAILURE_REASON: &str = "Payment was declined by the gateway";

/// Fixed-interval poll budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            max_polls: 100,
        }
    }
}

impl PollPolicy {
    /// Longest time a poll can stay open before it times out.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_polls
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Polling,
    Finished(SettlementOutcome),
}

struct PollShared {
    payment_id: String,
    state: watch::Sender<PollState>,
    token: CancellationToken,
    polls: AtomicU32,
    task: Mutex<Option<AbortHandle>>,
}

/// Handle on one running (or finished) status poll.
#[derive(Clone)]
pub struct PollHandle {
    shared: Arc<PollShared>,
}

impl PollHandle {
    fn new(payment_id: &str) -> Self {
        let (state, _) = watch::channel(PollState::Polling);
        Self {
            shared: Arc::new(PollShared {
                payment_id: payment_id.to_string(),
                state,
                token: CancellationToken::new(),
                polls: AtomicU32::new(0),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn payment_id(&self) -> &str {
        &self.shared.payment_id
    }

    /// Status queries the backend answered so far. Failed queries are not
    /// counted.
    pub fn polls(&self) -> u32 {
        self.shared.polls.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.shared.state.borrow(), PollState::Polling)
    }

    pub fn outcome(&self) -> Option<SettlementOutcome> {
        match &*self.shared.state.borrow() {
            PollState::Finished(outcome) => Some(outcome.clone()),
            PollState::Polling => None,
        }
    }

    /// Waits for the terminal outcome.
    pub async fn wait(&self) -> SettlementOutcome {
        let mut rx = self.shared.state.subscribe();
        let outcome = match rx
            .wait_for(|state| matches!(state, PollState::Finished(_)))
            .await
        {
            Ok(state) => match &*state {
                PollState::Finished(outcome) => outcome.clone(),
                PollState::Polling => SettlementOutcome::Cancelled,
            },
            Err(_) => SettlementOutcome::Cancelled,
        };
        outcome
    }

    /// Stops the poll. Idempotent; returns whether this call cancelled it.
    pub fn cancel(&self) -> bool {
        let cancelled = self.finish(SettlementOutcome::Cancelled);
        self.shared.token.cancel();

        let task = self
            .shared
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }

        if cancelled {
            tracing::info!(
                payment_id = %self.payment_id(),
                polls = self.polls(),
                "Settlement poll cancelled"
            );
        }
        cancelled
    }

    /// Moves `Polling` to `Finished`. Terminal states never change again.
    fn finish(&self, outcome: SettlementOutcome) -> bool {
        self.shared.state.send_if_modified(|state| {
            if matches!(state, PollState::Polling) {
                *state = PollState::Finished(outcome);
                true
            } else {
                false
            }
        })
    }

    fn attach(&self, task: AbortHandle) {
        let mut slot = self
            .shared
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.shared.token.is_cancelled() {
            task.abort();
        } else {
            *slot = Some(task);
        }
    }
}

#[derive(Default)]
struct PollSlot {
    active: Option<PollHandle>,
    shut_down: bool,
}

/// Owns the single active poll of a settlement dialog.
pub struct SettlementPoller {
    backend: Arc<dyn BillingBackend>,
    policy: PollPolicy,
    slot: Mutex<PollSlot>,
}

impl SettlementPoller {
    pub fn new(backend: Arc<dyn BillingBackend>, policy: PollPolicy) -> Self {
        Self {
            backend,
            policy,
            slot: Mutex::new(PollSlot::default()),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, PollSlot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts polling `payment_id`. Returns `None` once the poller has been
    /// shut down.
    ///
    /// A poll already running for the same payment is returned as is; one
    /// running for a different payment is cancelled first.
    pub fn start(&self, payment_id: &str) -> Option<PollHandle> {
        let mut slot = self.slot();
        if slot.shut_down {
            tracing::info!(payment_id = %payment_id, "Poller shut down, not starting poll");
            return None;
        }

        if let Some(current) = slot.active.as_ref() {
            if current.payment_id() == payment_id && current.is_active() {
                return Some(current.clone());
            }
            current.cancel();
        }

        let handle = PollHandle::new(payment_id);
        let task = tokio::spawn(poll_until_terminal(
            self.backend.clone(),
            self.policy,
            handle.clone(),
        ));
        handle.attach(task.abort_handle());

        tracing::info!(
            payment_id = %payment_id,
            interval_ms = self.policy.interval.as_millis() as u64,
            max_polls = self.policy.max_polls,
            max_wait_secs = self.policy.max_wait().as_secs(),
            "Settlement poll started"
        );

        slot.active = Some(handle.clone());
        Some(handle)
    }

    /// Cancels the active poll, if any. Returns whether a running poll was
    /// stopped.
    pub fn cancel(&self) -> bool {
        let current = self.slot().active.take();
        current.map(|handle| handle.cancel()).unwrap_or(false)
    }

    /// Cancels the active poll and refuses every later `start`.
    pub fn shutdown(&self) {
        let current = {
            let mut slot = self.slot();
            slot.shut_down = true;
            slot.active.take()
        };
        if let Some(handle) = current {
            handle.cancel();
        }
    }
}

impl Drop for SettlementPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn poll_until_terminal(
    backend: Arc<dyn BillingBackend>,
    policy: PollPolicy,
    handle: PollHandle,
) {
    let token = handle.shared.token.clone();
    let payment_id = handle.payment_id().to_string();
    // Failed queries leave the budget alone but get a cap of their own.
    let mut failed_queries = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(policy.interval) => {}
        }

        metrics::record_status_poll();

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            result = backend.get_payment_status(&payment_id) => result,
        };

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                failed_queries += 1;
                if e.is_transient() {
                    tracing::warn!(
                        payment_id = %payment_id,
                        failed_queries,
                        error = %e,
                        "Payment status query failed, polling continues"
                    );
                } else {
                    tracing::error!(
                        payment_id = %payment_id,
                        failed_queries,
                        error = %e,
                        "Payment status query rejected, polling continues"
                    );
                }
                if failed_queries >= policy.max_polls {
                    if handle.finish(SettlementOutcome::TimedOut) {
                        tracing::warn!(
                            payment_id = %payment_id,
                            failed_queries,
                            "Gateway status unreachable, manual check required"
                        );
                    }
                    return;
                }
                continue;
            }
        };

        let polls = handle.shared.polls.fetch_add(1, Ordering::SeqCst) + 1;

        if report.status.is_terminal() {
            let outcome = if report.status == PaymentStatus::Completed {
                SettlementOutcome::Completed {
                    amount: report.amount,
                }
            } else {
                SettlementOutcome::Failed {
                    reason: report
                        .message
                        .unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string()),
                }
            };
            if handle.finish(outcome.clone()) {
                tracing::info!(
                    payment_id = %payment_id,
                    polls,
                    outcome = outcome.label(),
                    "Gateway payment settled"
                );
            }
            return;
        }

        if report.status == PaymentStatus::Unknown {
            tracing::warn!(payment_id = %payment_id, polls, "Gateway reported an unknown payment status");
        } else {
            tracing::debug!(payment_id = %payment_id, polls, status = ?report.status, "Gateway payment not settled yet");
        }

        if polls >= policy.max_polls {
            if handle.finish(SettlementOutcome::TimedOut) {
                tracing::warn!(
                    payment_id = %payment_id,
                    polls,
                    "Gateway payment unconfirmed after poll budget, manual check required"
                );
            }
            return;
        }
    }
}
