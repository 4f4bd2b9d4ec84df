#![allow(dead_code)]

use clinic_frontend::config::BillingServiceSettings;
use clinic_frontend::models::Encounter;
use clinic_frontend::services::billing_client::HttpBillingClient;
use clinic_frontend::settlement::{
    CompletionSignal, PaymentPageOpener, PollPolicy, PrescriptionPrinter, SessionPhase,
    SettlementHooks, SettlementNotice, SettlementNotifier, SettlementSession,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const ENCOUNTER_ID: &str = "enc-1001";
pub const PAYMENT_ID: &str = "pay-7001";

pub fn billing_settings(url: &str) -> BillingServiceSettings {
    BillingServiceSettings {
        url: url.to_string(),
        api_token: None,
        request_timeout_secs: 5,
    }
}

pub fn billing_client(server: &MockServer) -> Arc<HttpBillingClient> {
    Arc::new(
        HttpBillingClient::new(billing_settings(&server.uri()))
            .expect("Failed to build billing client"),
    )
}

/// Same shape as production polling, just fast enough for tests.
pub fn fast_policy() -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(10),
        max_polls: 100,
    }
}

pub fn encounter(with_prescription: bool) -> Encounter {
    let medical_record = if with_prescription {
        json!({"id": "mr-1", "finalized": true, "prescription": {"id": "rx-1"}})
    } else {
        json!({"id": "mr-1", "finalized": true})
    };

    serde_json::from_value(json!({
        "id": ENCOUNTER_ID,
        "patientId": "pat-1",
        "auxiliaryOrders": [{"id": "lab-3001", "kind": "LAB_TEST"}],
        "medicalRecord": medical_record,
    }))
    .expect("valid encounter fixture")
}

/// One unpaid encounter fee of 200,000 and one unpaid lab test of 150,000.
pub fn unpaid_charges() -> Value {
    json!({
        "payments": [
            {"code": "ENC-1001", "type": "ENCOUNTER_FEE", "amount": 200000, "status": "UNPAID"},
            {"code": "LAB-3001", "type": "LAB_TEST", "amount": 150000, "status": "UNPAID"}
        ],
        "totalUnpaid": 350000,
        "totalPaid": 0
    })
}

pub async fn mount_outstanding(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/billing/outstanding-payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn mount_composite(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/billing/composite-payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "paymentId": PAYMENT_ID,
            "paymentUrl": format!("https://gateway.test/checkout/{}", PAYMENT_ID),
            "totalAmount": 350000,
            "breakdown": [
                {"code": "ENC-1001", "type": "ENCOUNTER_FEE", "amount": 200000},
                {"code": "LAB-3001", "type": "LAB_TEST", "amount": 150000}
            ]
        })))
        .mount(server)
        .await;
}

pub async fn mount_statuses(server: &MockServer, statuses: &[&'static str]) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/billing/payments/[^/]+/status$"))
        .respond_with(StatusSequence::new(statuses))
        .mount(server)
        .await;
}

/// Answers status queries from a script, repeating the last entry forever.
pub struct StatusSequence {
    statuses: Vec<&'static str>,
    served: AtomicUsize,
}

impl StatusSequence {
    pub fn new(statuses: &[&'static str]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            served: AtomicUsize::new(0),
        }
    }
}

impl Respond for StatusSequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.served.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .get(n)
            .or(self.statuses.last())
            .copied()
            .unwrap_or("PROCESSING");

        ResponseTemplate::new(200).set_body_json(json!({
            "paymentId": PAYMENT_ID,
            "status": status,
            "amount": 350000
        }))
    }
}

pub async fn requests_to(server: &MockServer, suffix: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path().ends_with(suffix))
        .collect()
}

/// Captures everything the engine reports so tests can assert on it.
#[derive(Default)]
pub struct RecordingHooks {
    notices: Mutex<Vec<SettlementNotice>>,
    opened_urls: Mutex<Vec<String>>,
    prints: Mutex<Vec<(String, CompletionSignal)>>,
    completions: Arc<AtomicUsize>,
}

impl RecordingHooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hooks(self: &Arc<Self>) -> SettlementHooks {
        let completions = self.completions.clone();
        SettlementHooks {
            notifier: self.clone(),
            page_opener: self.clone(),
            printer: self.clone(),
            on_success: CompletionSignal::new(move || {
                completions.fetch_add(1, Ordering::SeqCst);
            }),
        }
    }

    pub fn notices(&self) -> Vec<SettlementNotice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.opened_urls.lock().unwrap().clone()
    }

    pub fn printed_prescriptions(&self) -> Vec<String> {
        self.prints
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn close_print_dialog(&self) {
        for (_, done) in self.prints.lock().unwrap().iter() {
            done.fire();
        }
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
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
        self.prints
            .lock()
            .unwrap()
            .push((prescription_id.to_string(), done));
    }
}

/// Waits until the dialog leaves the polling phase.
pub async fn wait_for_outcome(session: &SettlementSession) -> SessionPhase {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let phase = session.phase();
        if !matches!(phase, SessionPhase::Polling { .. }) {
            return phase;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "settlement never left the polling phase"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
