//! Analysis status
//!
//! Running flag and timing of the current or last analysis run, plus the sticky
//! engine-availability latch. The latch is an atomic on its own so that the installer
//! can flip it without contending with event handling.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct StatusTracker {
    inner: Mutex<StatusInner>,
    engine_available: AtomicBool,
}

#[derive(Debug, Default)]
struct StatusInner {
    is_running: bool,
    run_id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    started_instant: Option<Instant>,
    finished_at: Option<DateTime<Utc>>,
    last_duration_ms: Option<u64>,
}

/// Point-in-time copy handed to presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStatus {
    pub is_running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub is_engine_available: bool,
}

/// Returned when a run settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedRun {
    pub run_id: Uuid,
    pub duration_ms: u64,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatusInner::default()),
            engine_available: AtomicBool::new(true),
        }
    }

    pub fn analysis_started(&self) -> Uuid {
        let mut inner = self.inner.lock();
        let run_id = Uuid::new_v4();

        inner.is_running = true;
        inner.run_id = Some(run_id);
        inner.started_at = Some(Utc::now());
        inner.started_instant = Some(Instant::now());

        run_id
    }

    /// Marks the run as settled. Returns `None` if no run was active.
    pub fn analysis_finished(&self) -> Option<FinishedRun> {
        let mut inner = self.inner.lock();
        if !inner.is_running {
            return None;
        }

        let duration_ms = inner
            .started_instant
            .take()
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or_default();

        inner.is_running = false;
        inner.finished_at = Some(Utc::now());
        inner.last_duration_ms = Some(duration_ms);

        inner.run_id.take().map(|run_id| FinishedRun {
            run_id,
            duration_ms,
        })
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().is_running
    }

    pub fn current_run_id(&self) -> Option<Uuid> {
        self.inner.lock().run_id
    }

    pub fn last_analysis_duration(&self) -> Option<Duration> {
        self.inner.lock().last_duration_ms.map(Duration::from_millis)
    }

    pub fn last_analysis_timestamp(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().finished_at
    }

    /// One-way latch. Returns true only for the call that flipped it.
    pub fn handle_engine_download_failure(&self) -> bool {
        let flipped = self.engine_available.swap(false, Ordering::SeqCst);
        if flipped {
            warn!("Analysis engine could not be downloaded, marking it unavailable");
        } else {
            info!("Analysis engine already marked unavailable");
        }
        flipped
    }

    pub fn is_engine_available(&self) -> bool {
        self.engine_available.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> AnalysisStatus {
        let inner = self.inner.lock();
        AnalysisStatus {
            is_running: inner.is_running,
            started_at: inner.started_at,
            finished_at: inner.finished_at,
            last_duration_ms: inner.last_duration_ms,
            is_engine_available: self.is_engine_available(),
        }
    }
}
