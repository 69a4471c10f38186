//! Guided scan workflow.
//!
//! Seven steps, walked strictly forward one at a time:
//!
//! 1. Start
//! 2. Select target (resolves the scanner)
//! 3. Scanner check (operator acknowledgement)
//! 4. Set intensity
//! 5. Submit
//! 6. Live progress
//! 7. Results
//!
//! Jumping back to an earlier step is always allowed and keeps every
//! collected value. Only [`ScanWorkflow::reset`] clears them.

use crate::error::ConsoleError;
use crate::scan::{
    ScanController, ScanEvent, ScanTask, ScanTaskRequest, ScanType, Scanner, Subscription,
    TaskProgressView,
};
use crate::target::{self, resolve_scanner};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Start = 1,
    SelectTarget = 2,
    ScannerCheck = 3,
    SetIntensity = 4,
    Submit = 5,
    LiveProgress = 6,
    Results = 7,
}

impl WorkflowStep {
    pub const ALL: [WorkflowStep; 7] = [
        WorkflowStep::Start,
        WorkflowStep::SelectTarget,
        WorkflowStep::ScannerCheck,
        WorkflowStep::SetIntensity,
        WorkflowStep::Submit,
        WorkflowStep::LiveProgress,
        WorkflowStep::Results,
    ];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.number() == n)
    }

    pub fn title(self) -> &'static str {
        match self {
            WorkflowStep::Start => "Start",
            WorkflowStep::SelectTarget => "Select target",
            WorkflowStep::ScannerCheck => "Scanner check",
            WorkflowStep::SetIntensity => "Set intensity",
            WorkflowStep::Submit => "Submit",
            WorkflowStep::LiveProgress => "Live progress",
            WorkflowStep::Results => "Results",
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.number(), self.title())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Current,
    Upcoming,
}

/// Qualitative scan depth offered to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    Quick,
    Standard,
    Comprehensive,
}

impl Intensity {
    pub fn scan_type(self) -> ScanType {
        match self {
            Intensity::Quick => ScanType::Quick,
            Intensity::Standard => ScanType::Arp,
            Intensity::Comprehensive => ScanType::Comprehensive,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Intensity::Quick => "Quick",
            Intensity::Standard => "Standard",
            Intensity::Comprehensive => "Comprehensive",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Intensity::Quick => "Ping sweep only, finishes in seconds",
            Intensity::Standard => "Ping and ARP discovery with vendor lookup",
            Intensity::Comprehensive => "Full discovery including services and OS detection",
        }
    }
}

impl fmt::Display for Intensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Intensity {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Ok(Intensity::Quick),
            "standard" => Ok(Intensity::Standard),
            "comprehensive" => Ok(Intensity::Comprehensive),
            other => Err(ConsoleError::Validation(format!(
                "Unknown intensity '{}' (expected quick, standard or comprehensive)",
                other
            ))),
        }
    }
}

/// Shortcut targets offered at the target step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetPreset {
    pub label: &'static str,
    pub target: &'static str,
}

pub const TARGET_PRESETS: &[TargetPreset] = &[
    TargetPreset {
        label: "Auto-detect local network",
        target: target::AUTO_TARGET,
    },
    TargetPreset {
        label: "Home network (192.168.1.0/24)",
        target: "192.168.1.0/24",
    },
    TargetPreset {
        label: "Office network (10.0.0.0/24)",
        target: "10.0.0.0/24",
    },
    TargetPreset {
        label: "Private range (172.16.0.0/24)",
        target: "172.16.0.0/24",
    },
];

/// Values collected across steps 2 to 4.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanConfig {
    pub target: String,
    pub intensity: Option<Intensity>,
    pub name: String,
}

/// Drives one guided scan on top of a [`ScanController`].
#[derive(Debug)]
pub struct ScanWorkflow {
    controller: ScanController,
    current_step: WorkflowStep,
    scan_config: ScanConfig,
    selected_scanner: Option<Scanner>,
    scanner_suggestion: Option<String>,
    task: Option<ScanTask>,
    subscription: Option<Subscription>,
    last_error: Option<ConsoleError>,
    connection_error: Option<String>,
}

impl ScanWorkflow {
    pub fn new(controller: ScanController) -> Self {
        Self {
            controller,
            current_step: WorkflowStep::Start,
            scan_config: ScanConfig::default(),
            selected_scanner: None,
            scanner_suggestion: None,
            task: None,
            subscription: None,
            last_error: None,
            connection_error: None,
        }
    }

    pub fn current_step(&self) -> WorkflowStep {
        self.current_step
    }

    pub fn scan_config(&self) -> &ScanConfig {
        &self.scan_config
    }

    pub fn selected_scanner(&self) -> Option<&Scanner> {
        self.selected_scanner.as_ref()
    }

    pub fn scanner_suggestion(&self) -> Option<&str> {
        self.scanner_suggestion.as_deref()
    }

    /// Task submitted from this workflow, as last observed.
    pub fn task(&self) -> Option<&ScanTask> {
        self.task.as_ref()
    }

    /// Error from the most recent step action, shown inline.
    pub fn last_error(&self) -> Option<&ConsoleError> {
        self.last_error.as_ref()
    }

    /// Non-fatal banner while the controller cannot reach the backend.
    pub fn connection_error(&self) -> Option<&str> {
        self.connection_error.as_deref()
    }

    pub fn controller(&self) -> &ScanController {
        &self.controller
    }

    pub fn progress_view(&self) -> Option<TaskProgressView> {
        self.task
            .as_ref()
            .map(|task| TaskProgressView::from_task(task, Utc::now()))
    }

    pub fn step_status(&self, step: WorkflowStep) -> StepStatus {
        match step.cmp(&self.current_step) {
            std::cmp::Ordering::Less => StepStatus::Completed,
            std::cmp::Ordering::Equal => StepStatus::Current,
            std::cmp::Ordering::Greater => StepStatus::Upcoming,
        }
    }

    pub fn can_submit(&self) -> bool {
        self.current_step == WorkflowStep::Submit
            && self.selected_scanner.is_some()
            && self.controller.can_submit()
    }

    /// Step 1 -> 2.
    pub fn begin(&mut self) -> Result<(), ConsoleError> {
        self.expect_step(WorkflowStep::Start, "start a scan")?;
        self.advance(WorkflowStep::SelectTarget);
        Ok(())
    }

    pub fn set_target(&mut self, target: &str) -> Result<(), ConsoleError> {
        self.expect_step(WorkflowStep::SelectTarget, "change the target")?;
        self.scan_config.target = target.trim().to_string();
        Ok(())
    }

    pub fn apply_preset(&mut self, preset: &TargetPreset) -> Result<(), ConsoleError> {
        self.set_target(preset.target)
    }

    /// Step 2 -> 3. Checks the target and resolves which scanner runs it.
    pub async fn confirm_target(&mut self) -> Result<(), ConsoleError> {
        self.expect_step(WorkflowStep::SelectTarget, "confirm the target")?;

        let target = self.scan_config.target.clone();
        if target.is_empty() {
            return self.fail(ConsoleError::Validation(
                "Select a preset or enter a target".to_string(),
            ));
        }
        let check = target::validate(&target);
        if !check.valid {
            return self.fail(ConsoleError::Validation(
                check.error.unwrap_or_else(|| "Invalid target".to_string()),
            ));
        }

        let scanners = match self.controller.list_scanners().await {
            Ok(scanners) => scanners,
            Err(e) => return self.fail(e),
        };
        let resolution = resolve_scanner(&target, &scanners);
        self.selected_scanner = resolution.scanner;
        self.scanner_suggestion = resolution.suggestion;

        self.advance(WorkflowStep::ScannerCheck);
        Ok(())
    }

    /// Step 3 -> 4. The operator has seen which scanner will be used.
    pub fn acknowledge_scanner(&mut self) -> Result<(), ConsoleError> {
        self.expect_step(WorkflowStep::ScannerCheck, "acknowledge the scanner")?;
        self.advance(WorkflowStep::SetIntensity);
        Ok(())
    }

    pub fn set_intensity(&mut self, intensity: Intensity) -> Result<(), ConsoleError> {
        self.expect_step(WorkflowStep::SetIntensity, "change the intensity")?;
        self.scan_config.intensity = Some(intensity);
        Ok(())
    }

    /// Name can be edited at any point before submission.
    pub fn set_name(&mut self, name: &str) -> Result<(), ConsoleError> {
        if self.current_step > WorkflowStep::Submit {
            return Err(ConsoleError::Validation(
                "The scan has already been submitted".to_string(),
            ));
        }
        self.scan_config.name = name.trim().to_string();
        Ok(())
    }

    /// Step 4 -> 5. Fills in a default name if none was given.
    pub fn confirm_intensity(&mut self) -> Result<(), ConsoleError> {
        self.expect_step(WorkflowStep::SetIntensity, "confirm the intensity")?;
        let Some(intensity) = self.scan_config.intensity else {
            return self.fail(ConsoleError::Validation(
                "Choose quick, standard or comprehensive".to_string(),
            ));
        };
        if self.scan_config.name.is_empty() {
            self.scan_config.name = default_scan_name(intensity, &self.scan_config.target);
        }
        self.advance(WorkflowStep::Submit);
        Ok(())
    }

    /// Step 5 -> 6. Creates the task; on failure the workflow stays on 5.
    pub async fn submit(&mut self) -> Result<ScanTask, ConsoleError> {
        self.expect_step(WorkflowStep::Submit, "submit")?;

        let Some(scanner_id) = self.selected_scanner.as_ref().map(|s| s.id) else {
            return self.fail(ConsoleError::NoScannerAvailable);
        };
        let Some(intensity) = self.scan_config.intensity else {
            return self.fail(ConsoleError::Validation(
                "Choose quick, standard or comprehensive".to_string(),
            ));
        };

        let request = ScanTaskRequest::new(
            self.scan_config.name.clone(),
            self.scan_config.target.clone(),
            intensity.scan_type(),
        )
        .with_scanner(scanner_id);

        // Subscribe first so no change between creation and now is missed
        let mut subscription = self.controller.subscribe();
        match self.controller.create(request).await {
            Ok(task) => {
                // Events queued before our creation describe some other task
                let queued = subscription.drain();
                let ours = queued
                    .iter()
                    .position(|e| matches!(e, ScanEvent::TaskChanged(Some(t)) if t.id == task.id))
                    .unwrap_or(queued.len());

                self.task = Some(task.clone());
                self.subscription = Some(subscription);
                self.connection_error = None;
                self.advance(WorkflowStep::LiveProgress);
                if task.is_terminal() {
                    self.finish();
                }
                for event in &queued[ours..] {
                    self.handle_event(event);
                }
                Ok(task)
            }
            Err(e) => {
                drop(subscription);
                self.fail(e)
            }
        }
    }

    /// Wait for the next controller event while the scan is tracked and
    /// fold it into the workflow. Returns `None` when nothing is tracked.
    pub async fn next_update(&mut self) -> Option<ScanEvent> {
        let event = self.subscription.as_mut()?.recv().await?;
        self.handle_event(&event);
        Some(event)
    }

    /// Apply an event without waiting, for callers that drive their own loop.
    pub fn handle_event(&mut self, event: &ScanEvent) {
        let Some(task_id) = self.task.as_ref().map(|t| t.id) else {
            return;
        };

        match event {
            ScanEvent::TaskChanged(Some(task)) if task.id == task_id => {
                self.task = Some(task.clone());
                if task.is_terminal() {
                    self.finish();
                }
            }
            ScanEvent::TaskChanged(Some(other)) => {
                // Ours is gone from the slot and its record could not be read
                tracing::info!(
                    "Scan task {} replaced by unrelated task {}",
                    task_id,
                    other.id
                );
                self.finish();
                self.subscription = None;
            }
            ScanEvent::TaskChanged(None) => {
                tracing::info!("Scan task {} left the active slot", task_id);
                self.finish();
            }
            ScanEvent::ErrorChanged(message) => {
                self.connection_error = message.clone();
            }
        }
    }

    /// Step 6 -> 7 before the scan has finished.
    pub fn proceed_to_results(&mut self) -> Result<(), ConsoleError> {
        self.expect_step(WorkflowStep::LiveProgress, "show results")?;
        self.advance(WorkflowStep::Results);
        Ok(())
    }

    /// Step 7 -> 1.
    pub fn new_scan(&mut self) -> Result<(), ConsoleError> {
        self.expect_step(WorkflowStep::Results, "start a new scan")?;
        self.reset();
        Ok(())
    }

    /// Jump back to an earlier step without touching collected values.
    pub fn go_back(&mut self, step: WorkflowStep) -> Result<(), ConsoleError> {
        if step >= self.current_step {
            return Err(ConsoleError::Validation(format!(
                "Cannot jump from step {} to step {}; later steps must be completed in order",
                self.current_step.number(),
                step.number()
            )));
        }
        tracing::debug!("Workflow back from {} to {}", self.current_step, step);
        self.current_step = step;
        self.last_error = None;
        Ok(())
    }

    /// Back to step 1 with everything cleared.
    pub fn reset(&mut self) {
        if self.task.as_ref().is_some_and(|t| t.is_terminal()) {
            self.controller.acknowledge();
        }
        self.subscription = None;
        self.task = None;
        self.scan_config = ScanConfig::default();
        self.selected_scanner = None;
        self.scanner_suggestion = None;
        self.last_error = None;
        self.connection_error = None;
        self.current_step = WorkflowStep::Start;
        tracing::debug!("Workflow reset");
    }

    fn finish(&mut self) {
        if self.current_step == WorkflowStep::LiveProgress {
            self.advance(WorkflowStep::Results);
        }
        // Keep observing while an optimistic cancel still awaits the backend
        if self.task.as_ref().is_some_and(|t| t.is_terminal()) && !self.controller.is_polling() {
            self.subscription = None;
        }
    }

    fn advance(&mut self, to: WorkflowStep) {
        tracing::debug!("Workflow {} -> {}", self.current_step, to);
        self.current_step = to;
        self.last_error = None;
    }

    fn expect_step(&self, step: WorkflowStep, action: &str) -> Result<(), ConsoleError> {
        if self.current_step == step {
            Ok(())
        } else {
            Err(ConsoleError::Validation(format!(
                "Cannot {} at step {} ({}), expected step {}",
                action,
                self.current_step.number(),
                self.current_step.title(),
                step.number()
            )))
        }
    }

    fn fail<T>(&mut self, err: ConsoleError) -> Result<T, ConsoleError> {
        tracing::debug!("Workflow step {} failed: {}", self.current_step.number(), err);
        self.last_error = Some(err.clone());
        Err(err)
    }
}

fn default_scan_name(intensity: Intensity, target: &str) -> String {
    format!(
        "{} scan of {} ({})",
        intensity.label(),
        target,
        Utc::now().format("%Y-%m-%d %H:%M")
    )
}
