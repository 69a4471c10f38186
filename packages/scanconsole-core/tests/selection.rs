mod support;

use scanconsole_core::{bulk_convert, bulk_delete, EntityKind, SelectionSet};
use support::*;

#[tokio::test]
async fn test_bulk_delete_keeps_failed_ids_selected() {
    let api = FakeApi::new();
    api.fail_ids(&[3]);
    let mut selection = SelectionSet::new();
    selection.select_all(vec![1, 2, 3]);

    let report = bulk_delete(&mut selection, &api, EntityKind::Device).await;

    assert_eq!(report.succeeded, vec![1, 2]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, 3);
    assert!(!report.is_complete_success());
    assert_eq!(selection.sorted_ids(), vec![3]);
    assert_eq!(api.count("delete devices"), 3);
    assert!(report.summary().starts_with("Deleted 2 of 3 devices; 1 failed: 3"));
}

#[tokio::test]
async fn test_bulk_delete_asset_groups() {
    let api = FakeApi::new();
    let mut selection = SelectionSet::new();
    selection.toggle(40);
    selection.toggle(41);

    let report = bulk_delete(&mut selection, &api, EntityKind::AssetGroup).await;

    assert!(report.is_complete_success());
    assert!(selection.is_empty());
    assert_eq!(
        api.calls(),
        vec![
            "delete asset-groups 40".to_string(),
            "delete asset-groups 41".to_string()
        ]
    );
    assert_eq!(report.summary(), "Deleted 2 asset groups");
}

#[tokio::test]
async fn test_bulk_convert_all_failures() {
    let api = FakeApi::new();
    api.fail_ids(&[5, 6]);
    let mut selection = SelectionSet::new();
    selection.select_all(vec![5, 6]);

    let report = bulk_convert(&mut selection, &api).await;

    assert!(report.succeeded.is_empty());
    assert_eq!(selection.len(), 2);
    assert!(report.summary().starts_with("Failed to convert 2 devices"));
}

#[tokio::test]
async fn test_empty_selection_makes_no_calls() {
    let api = FakeApi::new();
    let mut selection = SelectionSet::new();

    let report = bulk_delete(&mut selection, &api, EntityKind::Asset).await;

    assert_eq!(report.total(), 0);
    assert!(api.calls().is_empty());
    assert_eq!(report.summary(), "No assets selected");
}
