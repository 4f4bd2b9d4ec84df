//! Collaborators the settlement engine calls out to.
//!
//! The engine never renders anything itself: user-facing notices, the gateway
//! redirect and the prescription print dialog are all behind these traits.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};

/// One user-facing message produced by a settlement attempt.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementNotice {
    Completed {
        #[serde(skip_serializing_if = "Option::is_none")]
        amount: Option<Decimal>,
    },
    Failed {
        reason: String,
    },
    /// Distinct from `Failed`: the gateway never answered, money may have
    /// moved.
    TimedOut,
    LoadFailed,
}

impl fmt::Display for SettlementNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementNotice::Completed { amount: Some(amount) } => {
                write!(f, "Payment of {} completed", amount)
            }
            SettlementNotice::Completed { amount: None } => f.write_str("Payment completed"),
            SettlementNotice::Failed { reason } => write!(f, "Payment failed: {}", reason),
            SettlementNotice::TimedOut => f.write_str(
                "Payment confirmation timed out. Please verify the payment status manually before retrying",
            ),
            SettlementNotice::LoadFailed => f.write_str("Cannot load payment information"),
        }
    }
}

pub trait SettlementNotifier: Send + Sync {
    fn notify(&self, notice: SettlementNotice);
}

/// Opens the gateway checkout page in a new browsing context. Fire and forget.
pub trait PaymentPageOpener: Send + Sync {
    fn open(&self, payment_url: &str);
}

/// Prescription print sub-workflow.
///
/// Implementations must call `done.fire()` when the user finishes, whether
/// the prescription was printed or skipped.
pub trait PrescriptionPrinter: Send + Sync {
    fn open(&self, prescription_id: &str, done: CompletionSignal);
}

type Callback = Box<dyn FnOnce() + Send>;

/// The caller's `onSuccess` callback. Clones share one slot, so the callback
/// runs at most once no matter how many holders fire it.
#[derive(Clone)]
pub struct CompletionSignal {
    slot: Arc<Mutex<Option<Callback>>>,
}

impl CompletionSignal {
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(callback)))),
        }
    }

    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Runs the callback if nobody has yet. Returns whether this call ran it.
    pub fn fire(&self) -> bool {
        let callback = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    pub fn has_fired(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal")
            .field("fired", &self.has_fired())
            .finish()
    }
}

/// Everything one settlement dialog reports to.
#[derive(Clone)]
pub struct SettlementHooks {
    pub notifier: Arc<dyn SettlementNotifier>,
    pub page_opener: Arc<dyn PaymentPageOpener>,
    pub printer: Arc<dyn PrescriptionPrinter>,
    pub on_success: CompletionSignal,
}
