//! Billing settlement engine.
//!
//! Builds the billable references of an encounter, loads what is still owed,
//! settles it in cash or through a payment gateway, polls the gateway until
//! the payment is confirmed, and finally hands over to prescription printing.

pub mod aggregator;
pub mod dispatcher;
pub mod error;
pub mod hooks;
pub mod orchestrator;
pub mod poller;
pub mod references;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use aggregator::OutstandingChargeAggregator;
pub use dispatcher::{DispatchResult, PostSettlementDispatcher};
pub use error::SettlementError;
pub use hooks::{
    CompletionSignal, PaymentPageOpener, PrescriptionPrinter, SettlementHooks, SettlementNotice,
    SettlementNotifier,
};
pub use orchestrator::{SettlementHandle, SettlementOrchestrator};
pub use poller::{PollHandle, PollPolicy, PollState, SettlementPoller};
pub use references::build_references;
pub use session::{SessionPhase, SettlementProgress, SettlementService, SettlementSession};
