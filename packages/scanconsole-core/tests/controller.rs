mod support;

use scanconsole_core::{
    ApiError, CancelOutcome, ConsoleError, ControllerPhase, ScanController, ScanEvent,
    ScanTaskRequest, ScanTaskStatus, ScanType,
};
use std::sync::Arc;
use std::time::Duration;
use support::*;

fn controller(api: &Arc<FakeApi>) -> ScanController {
    ScanController::new(api.clone(), POLL)
}

fn request(target: &str) -> ScanTaskRequest {
    ScanTaskRequest::new("Office sweep", target, ScanType::Quick)
}

fn statuses(events: &[ScanEvent]) -> Vec<Option<ScanTaskStatus>> {
    events
        .iter()
        .filter_map(|e| match e {
            ScanEvent::TaskChanged(task) => Some(task.as_ref().map(|t| t.status)),
            ScanEvent::ErrorChanged(_) => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_identical_polls_notify_once() {
    let api = Arc::new(FakeApi::new());
    api.script_active(vec![Ok(Some(running(1, 10.0)))]);
    let controller = controller(&api);
    let mut updates = controller.subscribe();

    for _ in 0..3 {
        controller.poll().await;
    }

    let events = updates.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0], ScanEvent::TaskChanged(Some(running(1, 10.0))));
}

#[tokio::test(start_paused = true)]
async fn test_distinct_snapshots_notify_in_order() {
    let api = Arc::new(FakeApi::new());
    let mut done = running(1, 100.0);
    done.status = ScanTaskStatus::Completed;
    done.current_ip = None;
    api.script_active(vec![
        Ok(Some(running(1, 10.0))),
        Ok(Some(running(1, 10.0))),
        Ok(Some(running(1, 40.0))),
        Ok(Some(done.clone())),
    ]);
    let controller = controller(&api);
    let mut updates = controller.subscribe();

    for _ in 0..4 {
        controller.poll().await;
    }

    let events = updates.drain();
    assert_eq!(
        events,
        vec![
            ScanEvent::TaskChanged(Some(running(1, 10.0))),
            ScanEvent::TaskChanged(Some(running(1, 40.0))),
            ScanEvent::TaskChanged(Some(done)),
        ]
    );
    assert!(!controller.is_polling());
    assert_eq!(controller.phase(), ControllerPhase::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_empty_target_rejected_without_api_call() {
    let api = Arc::new(FakeApi::new());
    let controller = controller(&api);

    for target in ["", "   "] {
        let err = controller.create(request(target)).await.unwrap_err();
        assert_eq!(err, ConsoleError::Validation("Target is required".to_string()));
    }
    let err = controller.create(request("10.0.0/24")).await.unwrap_err();
    assert!(matches!(err, ConsoleError::Validation(_)));

    assert!(api.calls().is_empty());
    assert_eq!(controller.phase(), ControllerPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_conflict_on_concurrent_scan() {
    let api = Arc::new(FakeApi::new());
    api.on_create(Err(ApiError::Status {
        status: 409,
        detail: "A scan is already running".to_string(),
    }));
    let controller = controller(&api);

    let err = controller.create(request("10.0.0.0/24")).await.unwrap_err();
    assert_eq!(
        err,
        ConsoleError::Conflict("A scan is already running".to_string())
    );
    assert_eq!(controller.current_task(), None);
    assert!(!controller.is_polling());
    assert!(controller.can_submit());
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_creates_both_reach_backend() {
    let api = Arc::new(FakeApi::new());
    api.set_create_delay(Duration::from_millis(500));
    api.on_create(Ok(task(30, ScanTaskStatus::Pending)));
    let controller = controller(&api);

    let submitter = controller.clone();
    let first = tokio::spawn(async move { submitter.create(request("10.0.0.0/24")).await });
    tokio::task::yield_now().await;
    assert_eq!(controller.phase(), ControllerPhase::Creating);
    assert!(!controller.can_submit());

    let second = controller.create(request("10.0.0.0/24")).await;

    assert!(first.await.unwrap().is_ok());
    assert!(second.is_ok());
    assert_eq!(api.count("create"), 2);
    assert_eq!(controller.phase(), ControllerPhase::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_create_sends_trimmed_request() {
    let api = Arc::new(FakeApi::new());
    api.on_create(Ok(task(5, ScanTaskStatus::Pending)));
    let controller = controller(&api);

    let task = controller
        .create(ScanTaskRequest::new("  Lab  ", " 10.0.0.0/24 ", ScanType::Arp).with_scanner(3))
        .await
        .unwrap();

    assert_eq!(task.id, 5);
    let sent = api.last_request().unwrap();
    assert_eq!(sent.name, "Lab");
    assert_eq!(sent.target, "10.0.0.0/24");
    assert_eq!(sent.scanner_ids, Some(vec![3]));
    assert_eq!(controller.phase(), ControllerPhase::Pending);
    assert!(!controller.can_submit());
}

#[tokio::test(start_paused = true)]
async fn test_polling_follows_task_to_final_record() {
    let api = Arc::new(FakeApi::new());
    api.on_create(Ok(task(7, ScanTaskStatus::Pending)));
    api.script_active(vec![Ok(Some(running(7, 50.0))), Ok(None)]);
    let mut finished = task(7, ScanTaskStatus::Completed);
    finished.progress = Some(100.0);
    finished.discovered_devices = 12;
    api.set_task(finished.clone());

    let controller = controller(&api);
    let mut updates = controller.subscribe();
    controller.create(request("10.0.0.0/24")).await.unwrap();
    assert!(controller.is_polling());

    tokio::time::sleep(Duration::from_millis(2100)).await;
    tokio::time::sleep(Duration::from_millis(2000)).await;

    let events = updates.drain();
    assert_eq!(
        statuses(&events),
        vec![
            Some(ScanTaskStatus::Pending),
            Some(ScanTaskStatus::Running),
            Some(ScanTaskStatus::Completed),
        ]
    );
    assert_eq!(controller.current_task(), Some(finished));
    assert!(!controller.is_polling());

    let polls = api.count("active");
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(api.count("active"), polls);
}

#[tokio::test(start_paused = true)]
async fn test_replaced_task_still_reports_final_record() {
    let api = Arc::new(FakeApi::new());
    api.on_create(Ok(running(7, 40.0)));
    api.script_active(vec![Ok(Some(running(8, 3.0))), Ok(None)]);
    let finished = task(7, ScanTaskStatus::Completed);
    api.set_task(finished.clone());
    api.set_task(task(8, ScanTaskStatus::Completed));

    let controller = controller(&api);
    let mut updates = controller.subscribe();
    controller.create(request("10.0.0.0/24")).await.unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(
        statuses(&updates.drain()),
        vec![Some(ScanTaskStatus::Running), Some(ScanTaskStatus::Completed)]
    );
    assert_eq!(controller.current_task(), Some(finished));
    assert_eq!(api.count("task 7"), 1);
    assert_eq!(api.count("task 8"), 0);
    assert!(!controller.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_vanished_task_empties_slot() {
    let api = Arc::new(FakeApi::new());
    api.script_active(vec![Ok(Some(running(8, 5.0))), Ok(None)]);
    let controller = controller(&api);
    let mut updates = controller.subscribe();

    controller.poll().await;
    controller.poll().await;

    assert_eq!(
        statuses(&updates.drain()),
        vec![Some(ScanTaskStatus::Running), None]
    );
    assert_eq!(api.count("task 8"), 1);
    assert_eq!(controller.phase(), ControllerPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_do_not_change_status() {
    let api = Arc::new(FakeApi::new());
    let mut script = vec![Ok(Some(running(2, 20.0)))];
    script.extend((0..5).map(|_| Err(transport_error())));
    script.push(Ok(Some(running(2, 60.0))));
    api.script_active(script);

    let controller = controller(&api);
    let mut updates = controller.subscribe();
    controller.poll().await;
    updates.drain();

    for _ in 0..4 {
        controller.poll().await;
        assert_eq!(controller.phase(), ControllerPhase::Running);
        assert_eq!(controller.last_error(), None);
    }
    assert!(updates.drain().is_empty());

    controller.poll().await;
    let events = updates.drain();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], ScanEvent::ErrorChanged(Some(msg)) if msg.contains("connection reset")));
    assert_eq!(controller.phase(), ControllerPhase::Running);

    controller.poll().await;
    assert_eq!(
        updates.drain(),
        vec![
            ScanEvent::ErrorChanged(None),
            ScanEvent::TaskChanged(Some(running(2, 60.0))),
        ]
    );
    assert_eq!(controller.last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_finished_task_is_noop() {
    let api = Arc::new(FakeApi::new());
    api.script_active(vec![Ok(Some(task(3, ScanTaskStatus::Completed)))]);
    let controller = controller(&api);
    controller.poll().await;

    assert_eq!(controller.cancel(3), CancelOutcome::AlreadyFinished);
    tokio::task::yield_now().await;

    assert_eq!(api.count("cancel"), 0);
    assert_eq!(controller.phase(), ControllerPhase::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_optimistic_cancel_then_backend_confirms() {
    let api = Arc::new(FakeApi::new());
    api.on_create(Ok(running(4, 30.0)));
    api.script_active(vec![Ok(Some(running(4, 35.0)))]);
    let controller = controller(&api);
    let mut updates = controller.subscribe();
    controller.create(request("10.0.0.0/24")).await.unwrap();
    updates.drain();

    assert_eq!(controller.cancel(4), CancelOutcome::Requested);
    let events = updates.drain();
    assert_eq!(statuses(&events), vec![Some(ScanTaskStatus::Cancelled)]);
    assert_eq!(controller.phase(), ControllerPhase::Cancelled);

    tokio::task::yield_now().await;
    assert_eq!(api.count("cancel 4"), 1);

    // Backend still reports the task as running; the optimistic view holds
    controller.poll().await;
    assert!(updates.drain().is_empty());
    assert_eq!(controller.phase(), ControllerPhase::Cancelled);
    assert!(controller.is_polling());

    let mut cancelled = task(4, ScanTaskStatus::Cancelled);
    cancelled.progress = Some(35.0);
    api.set_task(cancelled.clone());
    api.script_active(vec![Ok(None)]);
    controller.poll().await;

    assert_eq!(
        updates.drain(),
        vec![ScanEvent::TaskChanged(Some(cancelled))]
    );
    assert!(!controller.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_polls_are_single_flight() {
    let api = Arc::new(FakeApi::new());
    api.set_poll_delay(Duration::from_millis(500));
    api.script_active(vec![Ok(Some(running(6, 1.0)))]);
    let controller = controller(&api);

    let (first, second) = tokio::join!(controller.poll(), controller.poll());

    assert_eq!(api.count("active"), 1);
    assert_eq!(first, Some(running(6, 1.0)));
    assert_eq!(second, None);
}

#[tokio::test(start_paused = true)]
async fn test_poll_sent_before_create_is_discarded() {
    let api = Arc::new(FakeApi::new());
    api.set_poll_delay(Duration::from_secs(1));
    api.script_active(vec![Ok(None)]);
    api.on_create(Ok(task(9, ScanTaskStatus::Pending)));
    let controller = controller(&api);

    let poller = controller.clone();
    let in_flight = tokio::spawn(async move { poller.poll().await });
    tokio::task::yield_now().await;

    controller.create(request("10.0.0.0/24")).await.unwrap();
    let seen_by_poll = in_flight.await.unwrap();

    assert_eq!(seen_by_poll.map(|t| t.id), Some(9));
    assert_eq!(controller.phase(), ControllerPhase::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_last_subscriber_leaving_stops_polling() {
    let api = Arc::new(FakeApi::new());
    api.on_create(Ok(running(10, 0.0)));
    api.script_active(vec![Ok(Some(running(10, 5.0)))]);
    let controller = controller(&api);

    let first = controller.subscribe();
    let second = controller.subscribe();
    controller.create(request("10.0.0.0/24")).await.unwrap();
    assert!(controller.is_polling());

    drop(first);
    assert!(controller.is_polling());
    drop(second);
    assert!(!controller.is_polling());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(api.count("active"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_controller_stops_polling() {
    let api = Arc::new(FakeApi::new());
    api.on_create(Ok(running(11, 0.0)));
    api.script_active(vec![Ok(Some(running(11, 5.0)))]);
    let controller = controller(&api);
    controller.create(request("10.0.0.0/24")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(2100)).await;
    let polls = api.count("active");
    assert_eq!(polls, 1);

    drop(controller);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(api.count("active"), polls);
}

#[tokio::test(start_paused = true)]
async fn test_sync_resumes_existing_scan() {
    let api = Arc::new(FakeApi::new());
    api.script_active(vec![Ok(Some(running(12, 70.0)))]);
    let controller = controller(&api);
    let _updates = controller.subscribe();

    let task = controller.sync().await;

    assert_eq!(task.map(|t| t.id), Some(12));
    assert!(controller.is_polling());
    assert!(!controller.can_submit());
}

#[tokio::test(start_paused = true)]
async fn test_draining_after_sync_leaves_only_later_changes() {
    let api = Arc::new(FakeApi::new());
    api.script_active(vec![Ok(Some(running(15, 10.0))), Ok(Some(running(15, 30.0)))]);
    let controller = controller(&api);
    let mut updates = controller.subscribe();

    let task = controller.sync().await.unwrap();
    assert_eq!(
        updates.drain(),
        vec![ScanEvent::TaskChanged(Some(task))]
    );

    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(
        updates.drain(),
        vec![ScanEvent::TaskChanged(Some(running(15, 30.0)))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_acknowledge_returns_to_idle() {
    let api = Arc::new(FakeApi::new());
    api.script_active(vec![Ok(Some(task(13, ScanTaskStatus::Failed)))]);
    let controller = controller(&api);
    let mut updates = controller.subscribe();
    controller.poll().await;

    controller.acknowledge();

    assert_eq!(
        statuses(&updates.drain()),
        vec![Some(ScanTaskStatus::Failed), None]
    );
    assert_eq!(controller.phase(), ControllerPhase::Idle);
    assert!(controller.can_submit());
}

#[tokio::test(start_paused = true)]
async fn test_poll_in_flight_cannot_undo_acknowledge() {
    let api = Arc::new(FakeApi::new());
    api.script_active(vec![Ok(Some(task(14, ScanTaskStatus::Completed)))]);
    let controller = controller(&api);
    let mut updates = controller.subscribe();
    controller.poll().await;

    api.set_poll_delay(Duration::from_secs(1));
    let poller = controller.clone();
    let in_flight = tokio::spawn(async move { poller.poll().await });
    tokio::task::yield_now().await;
    assert_eq!(api.count("active"), 2);

    controller.acknowledge();
    let seen_by_poll = in_flight.await.unwrap();

    assert_eq!(seen_by_poll, None);
    assert_eq!(controller.phase(), ControllerPhase::Idle);
    assert_eq!(
        statuses(&updates.drain()),
        vec![Some(ScanTaskStatus::Completed), None]
    );
}
