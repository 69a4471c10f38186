//! In-memory stand-in for the remote API used by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use scanconsole_core::api::{EntityKind, InventoryApi, ScanApi};
use scanconsole_core::{
    ApiError, ScanTask, ScanTaskRequest, ScanTaskStatus, ScanType, Scanner, TargetValidation,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

pub const POLL: Duration = Duration::from_secs(2);

type Active = Result<Option<ScanTask>, ApiError>;

#[derive(Default)]
struct FakeState {
    /// Responses for `GET /scan-tasks/active`; the last one repeats.
    active: VecDeque<Active>,
    tasks: HashMap<i64, ScanTask>,
    create: Option<Result<ScanTask, ApiError>>,
    requests: Vec<ScanTaskRequest>,
    scanners: Vec<Scanner>,
    validation: Option<Result<TargetValidation, ApiError>>,
    failing_ids: HashSet<i64>,
    poll_delay: Duration,
    create_delay: Duration,
    validate_delay: Duration,
    calls: Vec<String>,
}

#[derive(Default)]
pub struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }

    pub fn script_active(&self, responses: Vec<Active>) {
        self.state().active = responses.into();
    }

    pub fn set_task(&self, task: ScanTask) {
        self.state().tasks.insert(task.id, task);
    }

    pub fn on_create(&self, result: Result<ScanTask, ApiError>) {
        self.state().create = Some(result);
    }

    pub fn set_scanners(&self, scanners: Vec<Scanner>) {
        self.state().scanners = scanners;
    }

    pub fn on_validate(&self, result: Result<TargetValidation, ApiError>) {
        self.state().validation = Some(result);
    }

    pub fn fail_ids(&self, ids: &[i64]) {
        self.state().failing_ids.extend(ids.iter().copied());
    }

    pub fn set_poll_delay(&self, delay: Duration) {
        self.state().poll_delay = delay;
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.state().create_delay = delay;
    }

    pub fn set_validate_delay(&self, delay: Duration) {
        self.state().validate_delay = delay;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of recorded calls whose name starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn last_request(&self) -> Option<ScanTaskRequest> {
        self.state().requests.last().cloned()
    }
}

#[async_trait]
impl ScanApi for FakeApi {
    async fn create_scan_task(&self, request: &ScanTaskRequest) -> Result<ScanTask, ApiError> {
        self.record("create".to_string());
        let delay = self.state().create_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        state.requests.push(request.clone());
        state.create.clone().unwrap_or_else(|| {
            Err(ApiError::Transport("no create response scripted".to_string()))
        })
    }

    async fn active_scan_task(&self) -> Result<Option<ScanTask>, ApiError> {
        self.record("active".to_string());
        let delay = self.state().poll_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        if state.active.len() > 1 {
            state.active.pop_front().unwrap()
        } else {
            state.active.front().cloned().unwrap_or(Ok(None))
        }
    }

    async fn scan_task(&self, task_id: i64) -> Result<ScanTask, ApiError> {
        self.record(format!("task {}", task_id));
        self.state()
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(ApiError::Status {
                status: 404,
                detail: "Scan task not found".to_string(),
            })
    }

    async fn cancel_scan_task(&self, task_id: i64) -> Result<(), ApiError> {
        self.record(format!("cancel {}", task_id));
        Ok(())
    }

    async fn list_scanners(&self) -> Result<Vec<Scanner>, ApiError> {
        self.record("scanners".to_string());
        Ok(self.state().scanners.clone())
    }

    async fn scan_results(&self, task_id: i64) -> Result<serde_json::Value, ApiError> {
        self.record(format!("results {}", task_id));
        Ok(serde_json::json!({ "task_id": task_id, "devices": [] }))
    }

    async fn download_results(&self, task_id: i64) -> Result<Vec<u8>, ApiError> {
        self.record(format!("download {}", task_id));
        Ok(b"ip,mac\n".to_vec())
    }

    async fn validate_target(&self, target: &str) -> Result<TargetValidation, ApiError> {
        self.record(format!("validate {}", target));
        let delay = self.state().validate_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state()
            .validation
            .clone()
            .unwrap_or_else(|| Err(ApiError::Transport("connection refused".to_string())))
    }
}

#[async_trait]
impl InventoryApi for FakeApi {
    async fn delete_entity(&self, kind: EntityKind, id: i64) -> Result<(), ApiError> {
        self.record(format!("delete {} {}", kind.path_segment(), id));
        self.outcome(id)
    }

    async fn convert_device(&self, device_id: i64) -> Result<(), ApiError> {
        self.record(format!("convert {}", device_id));
        self.outcome(device_id)
    }
}

impl FakeApi {
    fn outcome(&self, id: i64) -> Result<(), ApiError> {
        if self.state().failing_ids.contains(&id) {
            Err(ApiError::Status {
                status: 404,
                detail: "Not found".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

pub fn task(id: i64, status: ScanTaskStatus) -> ScanTask {
    ScanTask {
        id,
        name: format!("Scan {}", id),
        target: "10.0.0.0/24".to_string(),
        scan_type: ScanType::Quick,
        status,
        progress: None,
        current_ip: None,
        discovered_devices: 0,
        start_time: None,
        end_time: None,
        error_message: None,
    }
}

pub fn running(id: i64, progress: f64) -> ScanTask {
    ScanTask {
        progress: Some(progress),
        current_ip: Some("10.0.0.17".to_string()),
        ..task(id, ScanTaskStatus::Running)
    }
}

pub fn scanner(id: i64, name: &str, subnets: &[&str], is_default: bool) -> Scanner {
    Scanner {
        id,
        name: name.to_string(),
        subnets: subnets.iter().map(|s| s.to_string()).collect(),
        is_default,
        is_active: true,
    }
}

pub fn transport_error() -> ApiError {
    ApiError::Transport("connection reset".to_string())
}
