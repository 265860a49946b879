//! Scan lifecycle coordination
//!
//! One `ScanCoordinator` per product turns the engine's stream of per-folder scan
//! notifications into a result snapshot that presentation layers can read at any time.
//! Scans for different folders overlap freely and fail independently; a failed folder
//! is recorded as data and never disturbs its siblings.
//!
//! Events are handled one at a time by the channel's delivery task. State lives behind
//! a single mutex so readers on other tasks always see whole outcomes, never a folder
//! halfway through being replaced. The diagnostics bridge is queried before that lock
//! is taken, and synchronously, so a folder's outcome is settled by the time its
//! terminal event has been handled.

pub mod errors;
pub mod in_flight;
pub mod messages;
pub mod status;

pub use errors::{CoordinatorError, CoordinatorResult, TransportError};
pub use messages::{NewResultAvailable, ScanEvent};
pub use status::{AnalysisStatus, StatusTracker};

use crate::{
    channel::{ScanEventChannel, Subscription},
    diagnostics::DiagnosticsBridge,
    proto::{Issue, Product, ScanStatus},
    refresh::RefreshNotifier,
    result_store::{FolderOutcome, ResultStore},
    workspace::{TrustGate, WorkspaceManager},
};
use chrono::{DateTime, Utc};
use in_flight::{InFlightScans, Settle};
use parking_lot::Mutex;
use std::{
    fmt,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const UNKNOWN_SCAN_ERROR: &str = "Unknown scan error";
const RESULT_NOTICE_CAPACITY: usize = 16;

/// Collaborators a coordinator is built from. Nothing is looked up globally.
#[derive(Clone)]
pub struct CoordinatorDeps {
    pub diagnostics: Arc<dyn DiagnosticsBridge>,
    pub trust: Arc<dyn TrustGate>,
    pub workspace: WorkspaceManager,
    pub refresh_interval: Duration,
}

pub struct ScanCoordinator {
    product: Product,
    state: Mutex<CoordinatorState>,
    status: StatusTracker,
    diagnostics: Arc<dyn DiagnosticsBridge>,
    trust: Arc<dyn TrustGate>,
    workspace: WorkspaceManager,
    refresh: RefreshNotifier,
    results_tx: broadcast::Sender<NewResultAvailable>,
    subscription: Mutex<Option<Subscription>>,
    disposed: AtomicBool,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    results: ResultStore,
    in_flight: InFlightScans,
}

impl fmt::Debug for ScanCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ScanCoordinator")
            .field("product", &self.product)
            .field("folders", &state.results.len())
            .field("in_flight", &state.in_flight.total())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl ScanCoordinator {
    pub fn new(product: Product, deps: CoordinatorDeps) -> Self {
        let (results_tx, _) = broadcast::channel(RESULT_NOTICE_CAPACITY);
        Self {
            product,
            state: Mutex::new(CoordinatorState::default()),
            status: StatusTracker::new(),
            diagnostics: deps.diagnostics,
            trust: deps.trust,
            workspace: deps.workspace,
            refresh: RefreshNotifier::new(deps.refresh_interval),
            results_tx,
            subscription: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn product(&self) -> Product {
        self.product
    }

    /// Attaches the coordinator to `channel`. Only a weak reference is captured, so the
    /// delivery task never keeps a dropped coordinator alive.
    pub fn subscribe(self: &Arc<Self>, channel: &ScanEventChannel) -> CoordinatorResult<()> {
        if self.is_disposed() {
            return Err(CoordinatorError::Disposed {
                product: self.product,
            });
        }

        let mut slot = self.subscription.lock();
        if slot.is_some() {
            return Err(CoordinatorError::AlreadySubscribed {
                product: self.product,
            });
        }

        let coordinator = Arc::downgrade(self);
        let subscription = channel.subscribe(self.product, move |event| {
            if let Some(coordinator) = coordinator.upgrade() {
                coordinator.handle_event(event);
            }
        })?;

        *slot = Some(subscription);
        Ok(())
    }

    /// Waits until every event the channel queued for this coordinator has been handled.
    /// The channel must have been closed first, otherwise this waits for `dispose`.
    pub async fn finish_delivery(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.join().await;
            debug!("{} coordinator caught up with scan events", self.product);
        }
    }

    pub fn handle_event(&self, event: &ScanEvent) {
        if event.product != self.product {
            return;
        }

        let folder = event.folder_path.as_path();
        match event.status {
            ScanStatus::InProgress => self.handle_in_progress(folder),
            ScanStatus::Success => {
                let issues = self.diagnostics.issues_for(self.product, folder);
                debug!(
                    "{} scan succeeded for {} with {} issues",
                    self.product,
                    folder.display(),
                    issues.len()
                );
                self.handle_terminal(folder, FolderOutcome::Success(issues));
            }
            ScanStatus::Error => {
                let message = event
                    .error_message
                    .clone()
                    .unwrap_or_else(|| UNKNOWN_SCAN_ERROR.to_string());
                warn!(
                    "{} scan failed for {}: {}",
                    self.product,
                    folder.display(),
                    message
                );
                self.handle_terminal(folder, FolderOutcome::Failure(message));
            }
        }
    }

    fn handle_in_progress(&self, folder: &Path) {
        let mut state = self.state.lock();
        if self.is_disposed() {
            debug!("Ignoring scan start for {} after dispose", folder.display());
            return;
        }

        let was_idle = !state.in_flight.is_running();
        let in_flight = state.in_flight.start(folder);

        let placeholder_created = if was_idle {
            state.results.set(folder, FolderOutcome::placeholder());
            true
        } else {
            state
                .results
                .set_if_absent(folder, FolderOutcome::placeholder())
        };
        drop(state);

        if was_idle {
            let run_id = self.status.analysis_started();
            info!(
                "{} analysis {} started with {}",
                self.product,
                run_id,
                folder.display()
            );
        } else {
            debug!(
                "{} scan started for {} ({} in flight for this folder)",
                self.product,
                folder.display(),
                in_flight
            );
        }

        if placeholder_created {
            self.refresh.notify();
        }
    }

    fn handle_terminal(&self, folder: &Path, outcome: FolderOutcome) {
        let mut state = self.state.lock();
        if self.is_disposed() {
            debug!("Ignoring scan result for {} after dispose", folder.display());
            return;
        }

        match state.in_flight.settle(folder) {
            Settle::Underflow => warn!(
                "{} received a result for {} with no scan in flight, keeping count at zero",
                self.product,
                folder.display()
            ),
            Settle::Pending { remaining } => debug!(
                "{} still has {} scans in flight for {}",
                self.product,
                remaining,
                folder.display()
            ),
            Settle::Settled => {}
        }

        state.results.set(folder, outcome);

        let finished = if state.in_flight.is_running() {
            None
        } else {
            self.status.analysis_finished()
        };
        drop(state);

        if let Some(run) = finished {
            info!(
                "{} analysis {} finished in {}ms",
                self.product, run.run_id, run.duration_ms
            );
            let _ = self.results_tx.send(NewResultAvailable {
                product: self.product,
                run_id: run.run_id,
                duration_ms: run.duration_ms,
            });
        }

        self.refresh.notify();
    }

    /// Read-only copy of every folder's outcome, in the order folders were first seen.
    pub fn results(&self) -> ResultStore {
        self.state.lock().results.clone()
    }

    pub fn outcome(&self, folder: &Path) -> Option<FolderOutcome> {
        self.state.lock().results.get(folder).cloned()
    }

    pub fn get_issue(&self, folder: &Path, issue_id: &str) -> Option<Issue> {
        self.state
            .lock()
            .results
            .find_issue(folder, issue_id)
            .cloned()
    }

    pub fn get_issue_by_id(&self, issue_id: &str) -> Option<Issue> {
        self.state.lock().results.find_issue_by_id(issue_id).cloned()
    }

    pub fn is_any_result_available(&self) -> bool {
        !self.state.lock().results.is_empty()
    }

    /// Forgets the folder's outcome. In-flight tracking is left alone, so resetting a
    /// folder mid-scan keeps the coordinator running until that scan reports back.
    pub fn reset_result(&self, folder: &Path) {
        let mut state = self.state.lock();
        if self.is_disposed() {
            return;
        }

        let removed = state.results.remove(folder).is_some();
        drop(state);

        if removed {
            debug!("Reset {} result for {}", self.product, folder.display());
        }
        self.refresh.notify();
    }

    pub fn is_analysis_running(&self) -> bool {
        self.state.lock().in_flight.is_running()
    }

    pub fn running_scan_count(&self) -> u32 {
        self.state.lock().in_flight.total()
    }

    pub fn last_analysis_duration(&self) -> Option<Duration> {
        self.status.last_analysis_duration()
    }

    pub fn last_analysis_timestamp(&self) -> Option<DateTime<Utc>> {
        self.status.last_analysis_timestamp()
    }

    pub fn is_engine_available(&self) -> bool {
        self.status.is_engine_available()
    }

    pub fn handle_engine_download_failure(&self) {
        if self.status.handle_engine_download_failure() {
            self.refresh.notify();
        }
    }

    pub fn status(&self) -> AnalysisStatus {
        let mut status = self.status.snapshot();
        status.is_running = self.is_analysis_running();
        status
    }

    pub fn is_any_workspace_folder_trusted(&self) -> bool {
        !self
            .trust
            .trusted_folders(&self.workspace.folders())
            .is_empty()
    }

    pub fn subscribe_results(&self) -> broadcast::Receiver<NewResultAvailable> {
        self.results_tx.subscribe()
    }

    pub fn subscribe_refresh(&self) -> broadcast::Receiver<()> {
        self.refresh.subscribe()
    }

    /// Number of refresh fan-outs so far.
    pub fn refresh_count(&self) -> u64 {
        self.refresh.fired_count()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Stops reacting to events and drops all results. Safe to call more than once.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        state.results.clear();
        state.in_flight.clear();
        drop(state);

        if let Some(subscription) = self.subscription.lock().take() {
            subscription.dispose();
        }
        self.refresh.dispose();

        info!("{} coordinator disposed", self.product);
    }
}
