use std::sync::Arc;

use crate::models::{Encounter, SettlementOutcome};

use super::hooks::{CompletionSignal, PrescriptionPrinter, SettlementNotice, SettlementNotifier};

/// Where the dialog stands after an outcome has been dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult {
    /// Completion was signalled to the caller.
    Finished,
    /// The print dialog holds the completion signal.
    AwaitingPrint { prescription_id: String },
    /// Failure or timeout; the dialog stays actionable.
    KeptOpen,
    /// Cancelled by the user; nothing reported.
    Dismissed,
}

/// Reports an outcome and, on success, runs the prescription print step
/// before signalling completion.
#[derive(Clone)]
pub struct PostSettlementDispatcher {
    notifier: Arc<dyn SettlementNotifier>,
    printer: Arc<dyn PrescriptionPrinter>,
}

impl PostSettlementDispatcher {
    pub fn new(notifier: Arc<dyn SettlementNotifier>, printer: Arc<dyn PrescriptionPrinter>) -> Self {
        Self { notifier, printer }
    }

    pub fn after_settlement(
        &self,
        outcome: &SettlementOutcome,
        encounter: &Encounter,
        on_success: &CompletionSignal,
    ) -> DispatchResult {
        match outcome {
            SettlementOutcome::Completed { amount } => {
                self.notifier
                    .notify(SettlementNotice::Completed { amount: *amount });

                match encounter.printable_prescription() {
                    Some(prescription) => {
                        tracing::info!(
                            encounter_id = %encounter.id,
                            prescription_id = %prescription.id,
                            "Opening prescription print after settlement"
                        );
                        self.printer.open(&prescription.id, on_success.clone());
                        DispatchResult::AwaitingPrint {
                            prescription_id: prescription.id.clone(),
                        }
                    }
                    None => {
                        on_success.fire();
                        DispatchResult::Finished
                    }
                }
            }
            SettlementOutcome::Failed { reason } => {
                self.notifier.notify(SettlementNotice::Failed {
                    reason: reason.clone(),
                });
                DispatchResult::KeptOpen
            }
            SettlementOutcome::TimedOut => {
                self.notifier.notify(SettlementNotice::TimedOut);
                DispatchResult::KeptOpen
            }
            SettlementOutcome::Cancelled => DispatchResult::Dismissed,
        }
    }
}
