use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cache::SnapshotCache;
use crate::client::TaskSource;
use crate::error::ClientError;
use crate::model::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Running,
}

/// Why a fetch cycle produced no snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleFailure {
    pub message: String,
    pub cause: String,
}

impl CycleFailure {
    fn from_client(stage: &str, error: &ClientError) -> Self {
        Self {
            message: format!("Failed to fetch {stage}"),
            cause: error.to_string(),
        }
    }

    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let cause = payload
            .downcast_ref::<&str>()
            .map(|text| text.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self {
            message: "Refresh worker crashed".to_string(),
            cause,
        }
    }
}

impl std::fmt::Display for CycleFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.message, self.cause)
    }
}

/// Exactly one of these is sent per started cycle.
#[derive(Debug, Clone)]
pub enum RefreshEvent {
    Succeeded(Arc<Snapshot>),
    Failed(CycleFailure),
}

/// Fetches everything a snapshot needs, in order. Nothing is returned unless
/// all four fetches completed.
pub fn run_cycle<S>(
    source: &S,
    project_id: &str,
    now: DateTime<Utc>,
) -> Result<Snapshot, CycleFailure>
where
    S: TaskSource + ?Sized,
{
    let sections = source
        .list_sections(project_id)
        .map_err(|err| CycleFailure::from_client("sections", &err))?;
    let active_tasks = source
        .list_active_tasks(project_id)
        .map_err(|err| CycleFailure::from_client("active tasks", &err))?;
    let completed_tasks = source
        .list_completed_tasks(Some(project_id))
        .map_err(|err| CycleFailure::from_client("completed tasks", &err))?;
    let all_completed = source
        .list_completed_tasks(None)
        .map_err(|err| CycleFailure::from_client("completed tasks for all projects", &err))?;

    Ok(Snapshot {
        sections,
        active_tasks,
        completed_tasks,
        all_completed,
        captured_at: now,
    })
}

struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct RefreshCoordinator<S: TaskSource + 'static> {
    source: Arc<S>,
    cache: Arc<SnapshotCache>,
    project_id: Arc<str>,
    running: Arc<AtomicBool>,
    events: Sender<RefreshEvent>,
}

impl<S: TaskSource + 'static> RefreshCoordinator<S> {
    pub fn new(
        source: Arc<S>,
        cache: Arc<SnapshotCache>,
        project_id: &str,
    ) -> (Self, Receiver<RefreshEvent>) {
        let (events, rx) = mpsc::channel();
        let coordinator = Self {
            source,
            cache,
            project_id: Arc::from(project_id.trim()),
            running: Arc::new(AtomicBool::new(false)),
            events,
        };
        (coordinator, rx)
    }

    pub fn state(&self) -> CycleState {
        if self.is_running() {
            CycleState::Running
        } else {
            CycleState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts a cycle on a fresh worker thread. Returns `false` without side
    /// effects when one is already running.
    pub fn request_cycle(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("refresh already in progress, ignoring trigger");
            return false;
        }

        let guard = RunningGuard(Arc::clone(&self.running));
        let source = Arc::clone(&self.source);
        let cache = Arc::clone(&self.cache);
        let project_id = Arc::clone(&self.project_id);
        let events = self.events.clone();

        let spawned = thread::Builder::new()
            .name("todoist-refresh".to_string())
            .spawn(move || {
                let started = Instant::now();
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_cycle(source.as_ref(), &project_id, Utc::now())
                }))
                .unwrap_or_else(|payload| Err(CycleFailure::from_panic(payload)));

                let event = match outcome {
                    Ok(snapshot) => {
                        info!(
                            sections = snapshot.sections.len(),
                            active = snapshot.active_tasks.len(),
                            completed = snapshot.completed_tasks.len(),
                            all_completed = snapshot.all_completed.len(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "refresh cycle succeeded"
                        );
                        cache.save(&snapshot);
                        RefreshEvent::Succeeded(Arc::new(snapshot))
                    }
                    Err(failure) => {
                        warn!("refresh cycle failed: {failure}");
                        RefreshEvent::Failed(failure)
                    }
                };
                // Listeners must observe Idle by the time they receive the event.
                drop(guard);
                if events.send(event).is_err() {
                    debug!("refresh result dropped, no listener");
                }
            });

        match spawned {
            Ok(_) => true,
            Err(err) => {
                // The running guard was dropped along with the closure.
                let failure = CycleFailure {
                    message: "Failed to start refresh worker".to_string(),
                    cause: err.to_string(),
                };
                warn!("{failure}");
                let _ = self.events.send(RefreshEvent::Failed(failure));
                true
            }
        }
    }

    /// Triggers `request_cycle` every `interval` until `stop` is set.
    pub fn spawn_timer(self: &Arc<Self>, interval: Duration, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        thread::spawn(move || {
            let tick = Duration::from_millis(100).min(interval);
            let mut last = Instant::now();
            while !stop.load(Ordering::SeqCst) {
                thread::sleep(tick);
                if last.elapsed() >= interval {
                    last = Instant::now();
                    coordinator.request_cycle();
                }
            }
        })
    }
}
