//! In-memory registry of open settlement dialogs.
//!
//! The browser cannot receive callbacks directly, so each dialog gets a
//! `SessionBoard` that collects what the engine reports until the page polls
//! for it.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::OutstandingSummary;
use crate::settlement::{
    CompletionSignal, PaymentPageOpener, PrescriptionPrinter, SessionPhase, SettlementHooks,
    SettlementNotice, SettlementNotifier, SettlementSession,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct PendingPrint {
    prescription_id: String,
    done: CompletionSignal,
}

/// Collects notices, redirects and print requests for one dialog.
#[derive(Default)]
pub struct SessionBoard {
    notices: Mutex<Vec<SettlementNotice>>,
    payment_url: Mutex<Option<String>>,
    pending_print: Mutex<Option<PendingPrint>>,
    completed: AtomicBool,
}

impl SessionBoard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hooks wired back into this board. The completion signal marks the
    /// dialog as completed.
    pub fn hooks(self: &Arc<Self>) -> SettlementHooks {
        let board: Weak<Self> = Arc::downgrade(self);
        let on_success = CompletionSignal::new(move || {
            if let Some(board) = board.upgrade() {
                board.completed.store(true, Ordering::Release);
            }
        });

        SettlementHooks {
            notifier: self.clone(),
            page_opener: self.clone(),
            printer: self.clone(),
            on_success,
        }
    }

    pub fn notices(&self) -> Vec<SettlementNotice> {
        lock(&self.notices).clone()
    }

    pub fn payment_url(&self) -> Option<String> {
        lock(&self.payment_url).clone()
    }

    pub fn pending_print(&self) -> Option<String> {
        lock(&self.pending_print)
            .as_ref()
            .map(|p| p.prescription_id.clone())
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Closes the print dialog. Returns false when no print was pending.
    pub fn finish_print(&self, printed: bool) -> bool {
        let Some(pending) = lock(&self.pending_print).take() else {
            return false;
        };

        tracing::info!(
            prescription_id = %pending.prescription_id,
            printed,
            "Prescription print dialog closed"
        );
        pending.done.fire();
        true
    }
}

impl SettlementNotifier for SessionBoard {
    fn notify(&self, notice: SettlementNotice) {
        tracing::debug!(notice = %notice, "Settlement notice raised");
        lock(&self.notices).push(notice);
    }
}

impl PaymentPageOpener for SessionBoard {
    fn open(&self, payment_url: &str) {
        *lock(&self.payment_url) = Some(payment_url.to_string());
    }
}

impl PrescriptionPrinter for SessionBoard {
    fn open(&self, prescription_id: &str, done: CompletionSignal) {
        *lock(&self.pending_print) = Some(PendingPrint {
            prescription_id: prescription_id.to_string(),
            done,
        });
    }
}

/// What the browser sees when it polls a dialog.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: Uuid,
    pub encounter_id: String,
    #[serde(flatten)]
    pub phase: SessionPhase,
    pub summary: OutstandingSummary,
    pub notices: Vec<SettlementNotice>,
    pub payment_url: Option<String>,
    pub pending_print: Option<String>,
    pub settling: bool,
    pub completed: bool,
}

#[derive(Clone)]
pub struct SessionEntry {
    pub session: Arc<SettlementSession>,
    pub board: Arc<SessionBoard>,
    last_seen: Arc<Mutex<Instant>>,
}

impl SessionEntry {
    pub fn new(session: Arc<SettlementSession>, board: Arc<SessionBoard>) -> Self {
        Self {
            session,
            board,
            last_seen: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn view(&self, session_id: Uuid) -> SessionView {
        SessionView {
            session_id,
            encounter_id: self.session.encounter().id.clone(),
            phase: self.session.phase(),
            summary: self.session.summary(),
            notices: self.board.notices(),
            payment_url: self.board.payment_url(),
            pending_print: self.board.pending_print(),
            settling: self.session.is_settling(),
            completed: self.board.is_completed(),
        }
    }

    fn touch(&self) {
        *lock(&self.last_seen) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*lock(&self.last_seen))
    }

    /// Nothing more will happen in this dialog.
    fn is_finished(&self) -> bool {
        self.board.is_completed()
            || matches!(
                self.session.phase(),
                SessionPhase::Completed | SessionPhase::Closed
            )
    }
}

/// When open dialogs are dropped from the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionEviction {
    pub idle_timeout: Duration,
    pub finished_ttl: Duration,
    pub sweep_interval: Duration,
}

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<DashMap<Uuid, SessionEntry>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: SessionEntry) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.insert(id, entry);
        id
    }

    /// Looks a dialog up and marks it as seen.
    pub fn get(&self, id: &Uuid) -> Option<SessionEntry> {
        let entry = self.sessions.get(id)?.value().clone();
        entry.touch();
        Some(entry)
    }

    /// Closes and forgets a dialog.
    pub fn remove(&self, id: &Uuid) -> Option<SessionEntry> {
        let (_, entry) = self.sessions.remove(id)?;
        entry.session.close();
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Drops finished dialogs once the page has had `finished_ttl` to read
    /// them, and closes dialogs left idle for `idle_timeout`. Returns how
    /// many were dropped.
    pub fn sweep(&self, eviction: &SessionEviction) -> usize {
        let now = Instant::now();
        let mut evicted = 0;

        self.sessions.retain(|id, entry| {
            let idle = entry.idle_for(now);
            let finished = entry.is_finished();
            if idle < eviction.idle_timeout && !(finished && idle >= eviction.finished_ttl) {
                return true;
            }

            tracing::info!(
                session_id = %id,
                encounter_id = %entry.session.encounter().id,
                idle_secs = idle.as_secs(),
                finished,
                "Evicting settlement dialog"
            );
            entry.session.close();
            evicted += 1;
            false
        });

        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.len(), "Settlement dialog sweep done");
        }
        evicted
    }

    /// Runs `sweep` every `sweep_interval` for the life of the process.
    pub fn spawn_sweeper(&self, eviction: SessionEviction) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(eviction.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.sweep(&eviction);
            }
        })
    }
}
