//! Live following of a scan from the terminal
//!
//! Both loops below print every change the controller publishes and stop
//! once polling has ended. Ctrl+C either cancels the scan (when it was
//! launched from this terminal) or just stops watching.

use crate::OutputFormat;
use anyhow::Result;
use scanconsole_core::{
    ScanController, ScanEvent, ScanTask, ScanWorkflow, Subscription, TaskProgressView,
    WorkflowStep,
};

/// Print one task update in the selected format.
pub fn print_task(task: &ScanTask, format: OutputFormat) {
    let view = TaskProgressView::from_task(task, chrono::Utc::now());
    match format {
        OutputFormat::Text => println!("  {}", view.summary()),
        OutputFormat::Json => match serde_json::to_string(&view) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("Failed to encode progress: {}", e),
        },
    }
}

fn print_event(event: &ScanEvent, format: OutputFormat) {
    match event {
        ScanEvent::TaskChanged(Some(task)) => print_task(task, format),
        ScanEvent::TaskChanged(None) => tracing::debug!("Active scan slot emptied"),
        ScanEvent::ErrorChanged(Some(message)) => eprintln!("Warning: {}", message),
        ScanEvent::ErrorChanged(None) => eprintln!("Connection to the scan service restored"),
    }
}

fn print_outcome(task: Option<&ScanTask>, format: OutputFormat) {
    let Some(task) = task else {
        return;
    };
    match format {
        OutputFormat::Text => {
            println!();
            match task.failure() {
                Some(failure) => println!("Scan {} {}", task.id, failure),
                None => println!(
                    "Scan {} {}: {} devices discovered",
                    task.id, task.status, task.discovered_devices
                ),
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "task_id": task.id,
                "status": task.status,
                "discovered_devices": task.discovered_devices,
                "error_message": task.error_message,
            }));
        }
    }
}

/// Follow a scan submitted by `wf` until the backend settles it.
/// Ctrl+C requests cancellation once; a second Ctrl+C is ignored while
/// the cancellation is being confirmed.
pub async fn follow_workflow(wf: &mut ScanWorkflow, format: OutputFormat) -> Result<()> {
    let recheck = wf.controller().poll_interval();
    let mut cancel_requested = false;

    loop {
        if wf.current_step() != WorkflowStep::LiveProgress && !wf.controller().is_polling() {
            break;
        }

        tokio::select! {
            update = wf.next_update() => match update {
                Some(event) => print_event(&event, format),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                if let Some(task_id) = wf.task().map(|t| t.id) {
                    eprintln!("Cancelling scan task {}...", task_id);
                    wf.controller().cancel(task_id);
                }
            }
            // Cancellation can settle without a visible change
            _ = tokio::time::sleep(recheck) => {}
        }
    }

    print_outcome(wf.task(), format);
    Ok(())
}

/// Watch the controller's active task. Ctrl+C stops watching and leaves
/// the scan running.
pub async fn follow_controller(
    controller: &ScanController,
    updates: &mut Subscription,
    format: OutputFormat,
) -> Result<()> {
    while controller.is_polling() {
        tokio::select! {
            update = updates.recv() => match update {
                Some(event) => print_event(&event, format),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stopped watching; the scan keeps running");
                return Ok(());
            }
        }
    }

    print_outcome(controller.current_task().as_ref(), format);
    Ok(())
}
