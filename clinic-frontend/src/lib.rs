pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod settlement;
pub mod startup;

use services::billing_client::BillingBackend;
use services::session_store::SessionStore;
use settlement::{PollPolicy, SettlementService};
use std::sync::Arc;

/// Shared application state: the settlement engine and the open dialogs.
#[derive(Clone)]
pub struct AppState {
    pub settlements: SettlementService,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(backend: Arc<dyn BillingBackend>, policy: PollPolicy) -> Self {
        Self {
            settlements: SettlementService::new(backend, policy),
            sessions: SessionStore::new(),
        }
    }
}
