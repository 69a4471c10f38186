//! Scan lifecycle controller.
//!
//! Owns the single active scan task. The task is created here, mutated
//! only by polling the backend (plus the optimistic `cancelled` applied
//! when the operator cancels), and observed by everything else through
//! [`Subscription`]s.
//!
//! Polling runs on a spawned task while a scan is active. It holds only
//! a weak reference to the controller and a cancellation token, so it
//! stops as soon as the task turns terminal, the last subscriber goes
//! away, or the controller is dropped.

use super::{ScanTask, ScanTaskRequest, ScanTaskStatus, Scanner};
use crate::api::ScanApi;
use crate::error::{ApiError, ConsoleError};
use crate::target;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Default time between polls of the active task.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Consecutive poll failures tolerated before a banner error is published.
pub const MAX_SILENT_POLL_FAILURES: u32 = 5;

/// Polls that may still report a cancelled task as active before the
/// optimistic `cancelled` status is dropped in favour of the backend's.
const CANCEL_GRACE_POLLS: u32 = 5;

/// Notification delivered to subscribers, in observation order.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    /// The tracked task changed. `None` means the slot is empty again.
    TaskChanged(Option<ScanTask>),
    /// Polling has been failing for a while (`Some`) or recovered (`None`).
    ErrorChanged(Option<String>),
}

/// Where the controller's single task slot currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    Idle,
    Creating,
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ControllerPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ControllerPhase::Completed | ControllerPhase::Failed | ControllerPhase::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The cancel request was sent. The next polls will confirm it.
    Requested,
    /// The task had already finished; nothing was sent.
    AlreadyFinished,
}

#[derive(Debug, Clone, Copy)]
struct PendingCancel {
    task_id: i64,
    grace_polls: u32,
}

struct State {
    current: Option<ScanTask>,
    /// Serialized form of `current`, used to detect real changes.
    snapshot: Option<String>,
    applied_seq: u64,
    pending_cancel: Option<PendingCancel>,
    consecutive_failures: u32,
    last_error: Option<String>,
    poll_token: Option<CancellationToken>,
}

impl State {
    fn keeps_polling(&self) -> bool {
        self.pending_cancel.is_some() || self.current.as_ref().is_some_and(|t| t.is_active())
    }

    /// Task id the backend should still be asked about.
    fn tracked_id(&self) -> Option<i64> {
        self.pending_cancel.map(|p| p.task_id).or_else(|| {
            self.current
                .as_ref()
                .filter(|t| t.is_active())
                .map(|t| t.id)
        })
    }

    fn stop_polling(&mut self) {
        if let Some(token) = self.poll_token.take() {
            token.cancel();
        }
    }
}

struct Inner {
    api: Arc<dyn ScanApi>,
    poll_interval: Duration,
    state: Mutex<State>,
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<ScanEvent>>>,
    next_subscriber: AtomicU64,
    next_seq: AtomicU64,
    poll_in_flight: AtomicBool,
    /// Create requests awaiting the backend
    creating: AtomicUsize,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<ScanEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Deliver events to every live subscriber. Called with the state lock
    /// held so deliveries follow the order observations were applied.
    fn publish(&self, events: Vec<ScanEvent>) {
        if events.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers();
        subscribers.retain(|_, tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
    }

    fn unsubscribe(&self, id: u64) {
        let remaining = {
            let mut subscribers = self.subscribers();
            subscribers.remove(&id);
            subscribers.len()
        };
        if remaining == 0 {
            let mut state = self.state();
            if state.poll_token.is_some() {
                tracing::debug!("Last observer left, stopping scan polling");
                state.stop_polling();
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            state.stop_polling();
        }
    }
}

/// Resets an in-flight flag when the guarded future completes or is dropped.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Counts a create request for as long as it is awaiting the backend.
struct CreateGuard<'a> {
    count: &'a AtomicUsize,
    overlapping: bool,
}

impl<'a> CreateGuard<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        let before = count.fetch_add(1, Ordering::AcqRel);
        Self {
            count,
            overlapping: before > 0,
        }
    }
}

impl Drop for CreateGuard<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

fn snapshot_of(task: &Option<ScanTask>) -> Option<String> {
    serde_json::to_string(task).ok()
}

/// Owner of the active scan task. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ScanController {
    inner: Arc<Inner>,
}

impl fmt::Debug for ScanController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanController")
            .field("poll_interval", &self.inner.poll_interval)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl ScanController {
    pub fn new(api: Arc<dyn ScanApi>, poll_interval: Duration) -> Self {
        let empty = None;
        let state = State {
            snapshot: snapshot_of(&empty),
            current: empty,
            applied_seq: 0,
            pending_cancel: None,
            consecutive_failures: 0,
            last_error: None,
            poll_token: None,
        };

        Self {
            inner: Arc::new(Inner {
                api,
                poll_interval,
                state: Mutex::new(state),
                subscribers: Mutex::new(HashMap::new()),
                next_subscriber: AtomicU64::new(1),
                next_seq: AtomicU64::new(0),
                poll_in_flight: AtomicBool::new(false),
                creating: AtomicUsize::new(0),
            }),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// Latest observed task, including a just-finished one.
    pub fn current_task(&self) -> Option<ScanTask> {
        self.inner.state().current.clone()
    }

    /// The tracked task if it is still pending or running.
    pub fn active_task(&self) -> Option<ScanTask> {
        self.current_task().filter(|t| t.is_active())
    }

    pub fn phase(&self) -> ControllerPhase {
        if self.inner.creating.load(Ordering::Acquire) > 0 {
            return ControllerPhase::Creating;
        }
        match self.inner.state().current.as_ref().map(|t| t.status) {
            None => ControllerPhase::Idle,
            Some(ScanTaskStatus::Pending) => ControllerPhase::Pending,
            Some(ScanTaskStatus::Running) => ControllerPhase::Running,
            Some(ScanTaskStatus::Completed) => ControllerPhase::Completed,
            Some(ScanTaskStatus::Failed) => ControllerPhase::Failed,
            Some(ScanTaskStatus::Cancelled) => ControllerPhase::Cancelled,
        }
    }

    /// Banner-level polling error, set after repeated failures.
    pub fn last_error(&self) -> Option<String> {
        self.inner.state().last_error.clone()
    }

    /// Whether the UI should offer the submit action. The backend stays the
    /// judge of conflicts; this only avoids racing an obviously busy slot.
    pub fn can_submit(&self) -> bool {
        if self.inner.creating.load(Ordering::Acquire) > 0 {
            return false;
        }
        let state = self.inner.state();
        !state.keeps_polling()
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .state()
            .poll_token
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    /// Register for change notifications. Dropping the subscription
    /// unsubscribes; when the last one goes, polling stops.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers().insert(id, tx);
        tracing::debug!("Scan observer {} subscribed", id);

        self.ensure_polling();

        Subscription {
            id,
            rx,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }

    /// Create a scan task and start tracking it.
    pub async fn create(&self, request: ScanTaskRequest) -> Result<ScanTask, ConsoleError> {
        let name = request.name.trim();
        let target_str = request.target.trim();
        if target_str.is_empty() {
            return Err(ConsoleError::Validation("Target is required".to_string()));
        }
        if name.is_empty() {
            return Err(ConsoleError::Validation("Scan name is required".to_string()));
        }
        let check = target::validate(target_str);
        if !check.valid {
            return Err(ConsoleError::Validation(
                check.error.unwrap_or_else(|| "Invalid target".to_string()),
            ));
        }

        let request = ScanTaskRequest {
            name: name.to_string(),
            target: target_str.to_string(),
            ..request
        };

        if let Some(active) = self.active_task() {
            tracing::warn!(
                "Scan task {} is still {}; submitting anyway, the backend decides",
                active.id,
                active.status
            );
        }
        let creating = CreateGuard::enter(&self.inner.creating);
        if creating.overlapping {
            tracing::warn!("Another scan is still being submitted; the backend decides");
        }

        match self.inner.api.create_scan_task(&request).await {
            Ok(task) => {
                tracing::info!(
                    "Scan task {} '{}' created for {} ({})",
                    task.id,
                    task.name,
                    task.target,
                    task.status
                );
                // Sequenced on completion: polls sent before this point are stale.
                let seq = self.inner.next_seq();
                self.apply(seq, Some(task.clone()));
                if task.is_active() {
                    self.start_polling();
                }
                Ok(task)
            }
            Err(e) => {
                tracing::warn!("Failed to create scan task: {}", e);
                Err(ConsoleError::from(e))
            }
        }
    }

    /// Cancel a task. Sent fire-and-forget; polling reports the outcome.
    pub fn cancel(&self, task_id: i64) -> CancelOutcome {
        {
            let mut state = self.inner.state();
            match state.current.as_mut() {
                Some(task) if task.id == task_id && task.is_terminal() => {
                    tracing::info!(
                        "Scan task {} already {}, ignoring cancel",
                        task_id,
                        task.status
                    );
                    return CancelOutcome::AlreadyFinished;
                }
                Some(task) if task.id == task_id => {
                    task.status = ScanTaskStatus::Cancelled;
                    task.current_ip = None;
                    let optimistic = state.current.clone();
                    state.snapshot = snapshot_of(&optimistic);
                    state.pending_cancel = Some(PendingCancel {
                        task_id,
                        grace_polls: CANCEL_GRACE_POLLS,
                    });
                    self.inner.publish(vec![ScanEvent::TaskChanged(optimistic)]);
                }
                _ => {
                    tracing::debug!(
                        "Scan task {} is not tracked locally, sending cancel anyway",
                        task_id
                    );
                }
            }
        }

        tracing::info!("Requesting cancellation of scan task {}", task_id);
        let api = self.inner.api.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = api.cancel_scan_task(task_id).await {
                        tracing::warn!("Cancel request for scan task {} failed: {}", task_id, e);
                    }
                });
            }
            Err(_) => tracing::warn!(
                "No async runtime, cancel request for scan task {} not sent",
                task_id
            ),
        }

        if self.subscriber_count() > 0 {
            self.ensure_polling();
        }
        CancelOutcome::Requested
    }

    /// Fetch the active task from the backend and update the cached view.
    ///
    /// Overlapping calls are skipped and return the cached view. Transport
    /// failures are logged and swallowed; the next poll retries.
    pub async fn poll(&self) -> Option<ScanTask> {
        let Some(_flight) = FlightGuard::acquire(&self.inner.poll_in_flight) else {
            tracing::debug!("Poll already in flight, skipping");
            return self.current_task();
        };

        let seq = self.inner.next_seq();
        let tracked = self.inner.state().tracked_id();

        match self.fetch_active(tracked).await {
            Ok(observed) => self.apply(seq, observed),
            Err(e) => self.record_poll_failure(e),
        }

        if self.subscriber_count() > 0 {
            self.ensure_polling();
        }
        self.current_task()
    }

    /// Look for a task that was already running when the console started,
    /// and keep tracking it if there is one.
    pub async fn sync(&self) -> Option<ScanTask> {
        let task = self.poll().await;
        if task.as_ref().is_some_and(|t| t.is_active()) {
            self.start_polling();
        }
        task
    }

    /// Return to idle once a finished task has been shown.
    pub fn acknowledge(&self) {
        let mut state = self.inner.state();
        if state.current.as_ref().is_some_and(|t| t.is_terminal()) {
            // Polls already in flight must not bring the task back
            state.applied_seq = self.inner.next_seq();
            state.current = None;
            state.snapshot = snapshot_of(&None);
            state.pending_cancel = None;
            self.inner.publish(vec![ScanEvent::TaskChanged(None)]);
        }
    }

    /// Tear down the polling loop. Safe to call repeatedly.
    pub fn stop_polling(&self) {
        self.inner.state().stop_polling();
    }

    pub async fn list_scanners(&self) -> Result<Vec<Scanner>, ConsoleError> {
        self.inner
            .api
            .list_scanners()
            .await
            .map_err(ConsoleError::from)
    }

    pub async fn results(&self, task_id: i64) -> Result<serde_json::Value, ConsoleError> {
        self.inner
            .api
            .scan_results(task_id)
            .await
            .map_err(ConsoleError::from)
    }

    pub async fn download(&self, task_id: i64) -> Result<Vec<u8>, ConsoleError> {
        self.inner
            .api
            .download_results(task_id)
            .await
            .map_err(ConsoleError::from)
    }

    async fn fetch_active(&self, tracked: Option<i64>) -> Result<Option<ScanTask>, ApiError> {
        let active = self.inner.api.active_scan_task().await?;
        let Some(id) = tracked else {
            return Ok(active);
        };
        if active.as_ref().is_some_and(|t| t.id == id) {
            return Ok(active);
        }

        // The tracked task left the active slot, possibly replaced by another
        // one. Fetch its final record so the terminal status is observed
        // rather than inferred.
        match self.inner.api.scan_task(id).await {
            Ok(task) => Ok(Some(task)),
            Err(ApiError::Status { status: 404, .. }) => Ok(active),
            Err(e) => Err(e),
        }
    }

    fn apply(&self, seq: u64, observed: Option<ScanTask>) {
        let mut state = self.inner.state();
        if seq <= state.applied_seq {
            tracing::debug!(
                "Discarding stale observation #{} (already applied #{})",
                seq,
                state.applied_seq
            );
            return;
        }
        state.applied_seq = seq;

        let mut events = Vec::new();
        state.consecutive_failures = 0;
        if state.last_error.take().is_some() {
            tracing::info!("Scan service reachable again");
            events.push(ScanEvent::ErrorChanged(None));
        }

        if let Some(pending) = state.pending_cancel.as_mut() {
            let still_active = observed
                .as_ref()
                .is_some_and(|t| t.id == pending.task_id && t.is_active());
            if still_active && pending.grace_polls > 0 {
                pending.grace_polls -= 1;
                tracing::debug!(
                    "Scan task {} still active after cancel, waiting for backend",
                    pending.task_id
                );
                self.inner.publish(events);
                return;
            }
            if still_active {
                tracing::warn!(
                    "Backend kept scan task {} running after cancel",
                    pending.task_id
                );
            }
            state.pending_cancel = None;
        }

        let snapshot = snapshot_of(&observed);
        if snapshot != state.snapshot {
            match observed.as_ref() {
                Some(task) => tracing::info!(
                    "Scan task {} {} ({} devices)",
                    task.id,
                    task.status,
                    task.discovered_devices
                ),
                None => tracing::info!("No active scan task"),
            }
            state.snapshot = snapshot;
            state.current = observed.clone();
            events.push(ScanEvent::TaskChanged(observed));
        } else {
            tracing::debug!("Scan task unchanged");
        }

        if !state.keeps_polling() {
            state.stop_polling();
        }
        self.inner.publish(events);
    }

    fn record_poll_failure(&self, err: ApiError) {
        let mut state = self.inner.state();
        state.consecutive_failures += 1;
        tracing::warn!(
            "Polling active scan failed ({} in a row): {}",
            state.consecutive_failures,
            err
        );

        if state.consecutive_failures >= MAX_SILENT_POLL_FAILURES && state.last_error.is_none() {
            let message = format!("Lost contact with the scan service: {}", err);
            state.last_error = Some(message.clone());
            self.inner
                .publish(vec![ScanEvent::ErrorChanged(Some(message))]);
        }
    }

    /// Start polling regardless of observers (used right after creation).
    fn start_polling(&self) {
        self.spawn_poll_loop(true);
    }

    fn ensure_polling(&self) {
        self.spawn_poll_loop(false);
    }

    fn spawn_poll_loop(&self, force: bool) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime, polling not started");
            return;
        };

        let token = {
            let mut state = self.inner.state();
            if !state.keeps_polling() {
                return;
            }
            if !force && self.inner.subscribers().is_empty() {
                return;
            }
            if state.poll_token.as_ref().is_some_and(|t| !t.is_cancelled()) {
                return;
            }
            let token = CancellationToken::new();
            state.poll_token = Some(token.clone());
            token
        };

        runtime.spawn(poll_loop(
            Arc::downgrade(&self.inner),
            token,
            self.inner.poll_interval,
        ));
    }
}

async fn poll_loop(inner: Weak<Inner>, token: CancellationToken, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick is immediate; the caller already has a fresh snapshot.
    ticker.tick().await;
    tracing::debug!("Scan polling started ({:.1}s interval)", every.as_secs_f64());

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let Some(strong) = inner.upgrade() else { break };
                let controller = ScanController { inner: strong };
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = controller.poll() => {}
                }
            }
        }
    }

    tracing::debug!("Scan polling stopped");
}

/// Handle for receiving [`ScanEvent`]s. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<ScanEvent>,
    inner: Weak<Inner>,
}

impl Subscription {
    /// Wait for the next event. `None` once the controller is gone.
    pub async fn recv(&mut self) -> Option<ScanEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ScanEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now, oldest first.
    pub fn drain(&mut self) -> Vec<ScanEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.unsubscribe(self.id);
            tracing::debug!("Scan observer {} unsubscribed", self.id);
        }
    }
}
