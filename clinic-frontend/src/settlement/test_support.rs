//! In-memory billing backend and hook recorders for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{
    BillableReference, ChargeLine, CompositeSettlement, OutstandingSummary, PaymentStatus,
    SettlementBreakdownItem,
};
use crate::services::billing_client::{
    BillingBackend, BillingError, BulkSettlementReceipt, BulkSettlementRequest,
    CompositePaymentRequest, PaymentStatusReport,
};

use super::hooks::{
    CompletionSignal, PaymentPageOpener, PrescriptionPrinter, SettlementHooks, SettlementNotice,
    SettlementNotifier,
};

#[derive(Default)]
struct State {
    lines: Vec<ChargeLine>,
    fail_outstanding: bool,
    outstanding_fetches: usize,
    status_script: VecDeque<Option<PaymentStatus>>,
    default_status: Option<PaymentStatus>,
    status_queries: Vec<String>,
    bulk_requests: Vec<BulkSettlementRequest>,
    bulk_failure: Option<String>,
    composite_requests: Vec<CompositePaymentRequest>,
    composite_failure: Option<String>,
    composite_delay: Option<Duration>,
}

pub(crate) struct ScriptedBackend {
    state: Mutex<State>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_lines(&self, lines: Vec<ChargeLine>) {
        self.state().lines = lines;
    }

    pub fn fail_outstanding(&self, fail: bool) {
        self.state().fail_outstanding = fail;
    }

    pub fn fail_bulk(&self, message: &str) {
        self.state().bulk_failure = Some(message.to_string());
    }

    /// Makes `create_composite_payment` take `delay` before answering.
    pub fn delay_composite(&self, delay: Duration) {
        self.state().composite_delay = Some(delay);
    }

    pub fn fail_composite(&self, message: &str) {
        self.state().composite_failure = Some(message.to_string());
    }

    pub fn script_statuses(&self, statuses: &[PaymentStatus]) {
        self.state()
            .status_script
            .extend(statuses.iter().copied().map(Some));
    }

    pub fn script_status_errors(&self, count: usize) {
        self.state()
            .status_script
            .extend(std::iter::repeat(None).take(count));
    }

    pub fn set_default_status(&self, status: PaymentStatus) {
        self.state().default_status = Some(status);
    }

    pub fn status_queries(&self) -> usize {
        self.state().status_queries.len()
    }

    pub fn status_queries_for(&self, payment_id: &str) -> usize {
        self.state()
            .status_queries
            .iter()
            .filter(|id| id.as_str() == payment_id)
            .count()
    }

    pub fn outstanding_fetches(&self) -> usize {
        self.state().outstanding_fetches
    }

    pub fn bulk_requests(&self) -> Vec<BulkSettlementRequest> {
        self.state().bulk_requests.clone()
    }

    pub fn composite_requests(&self) -> Vec<CompositePaymentRequest> {
        self.state().composite_requests.clone()
    }
}

#[async_trait]
impl BillingBackend for ScriptedBackend {
    async fn get_outstanding_payments(
        &self,
        _reference_ids: &[BillableReference],
    ) -> Result<OutstandingSummary, BillingError> {
        let mut state = self.state();
        state.outstanding_fetches += 1;
        if state.fail_outstanding {
            return Err(BillingError::Timeout);
        }
        Ok(OutstandingSummary::from_lines(state.lines.clone()))
    }

    async fn create_composite_payment(
        &self,
        request: &CompositePaymentRequest,
    ) -> Result<CompositeSettlement, BillingError> {
        let delay = self.state().composite_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        state.composite_requests.push(request.clone());
        if let Some(message) = state.composite_failure.clone() {
            return Err(BillingError::Rejected {
                status: 422,
                message,
            });
        }

        let payment_id = format!("pay-{}", state.composite_requests.len());
        let unpaid: Vec<&ChargeLine> = state.lines.iter().filter(|l| l.is_unpaid()).collect();
        Ok(CompositeSettlement {
            payment_url: format!("https://gateway.test/checkout/{}", payment_id),
            payment_id,
            total_amount: unpaid.iter().map(|l| l.amount()).sum(),
            breakdown: unpaid
                .iter()
                .map(|l| SettlementBreakdownItem {
                    code: l.code.clone(),
                    charge_type: l.charge_type,
                    amount: l.amount(),
                })
                .collect(),
        })
    }

    async fn get_payment_status(
        &self,
        payment_id: &str,
    ) -> Result<PaymentStatusReport, BillingError> {
        let mut state = self.state();
        state.status_queries.push(payment_id.to_string());
        let next = match state.status_script.pop_front() {
            Some(next) => next,
            None => state.default_status,
        };
        match next {
            Some(status) => Ok(PaymentStatusReport {
                payment_id: Some(payment_id.to_string()),
                status,
                amount: Some(Decimal::from(350000)),
                message: None,
            }),
            None => Err(BillingError::Timeout),
        }
    }

    async fn process_bulk_settlement(
        &self,
        request: &BulkSettlementRequest,
    ) -> Result<BulkSettlementReceipt, BillingError> {
        let mut state = self.state();
        state.bulk_requests.push(request.clone());
        if let Some(message) = state.bulk_failure.clone() {
            return Err(BillingError::Rejected {
                status: 409,
                message,
            });
        }
        Ok(BulkSettlementReceipt {
            total_amount: Some(request.total_amount),
            settled_codes: request.charge_codes.clone(),
        })
    }
}

/// Records everything the engine reports to the outside world.
#[derive(Default)]
pub(crate) struct RecordingHooks {
    pub notices: Mutex<Vec<SettlementNotice>>,
    pub opened_urls: Mutex<Vec<String>>,
    pub print_requests: Mutex<Vec<(String, CompletionSignal)>>,
}

impl RecordingHooks {
    pub fn notices(&self) -> Vec<SettlementNotice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.opened_urls.lock().unwrap().clone()
    }

    pub fn print_requests(&self) -> Vec<String> {
        self.print_requests
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Simulates the user closing the print dialog.
    pub fn finish_printing(&self) {
        for (_, done) in self.print_requests.lock().unwrap().iter() {
            done.fire();
        }
    }

    pub fn into_hooks(self: &Arc<Self>, on_success: CompletionSignal) -> SettlementHooks {
        SettlementHooks {
            notifier: self.clone(),
            page_opener: self.clone(),
            printer: self.clone(),
            on_success,
        }
    }
}

impl SettlementNotifier for RecordingHooks {
    fn notify(&self, notice: SettlementNotice) {
        self.notices.lock().unwrap().push(notice);
    }
}

impl PaymentPageOpener for RecordingHooks {
    fn open(&self, payment_url: &str) {
        self.opened_urls.lock().unwrap().push(payment_url.to_string());
    }
}

impl PrescriptionPrinter for RecordingHooks {
    fn open(&self, prescription_id: &str, done: CompletionSignal) {
        self.print_requests
            .lock()
            .unwrap()
            .push((prescription_id.to_string(), done));
    }
}
