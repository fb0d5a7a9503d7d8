//! S5: clearing one site's `READY` tasks never touches another site's.

mod common;

use std::collections::HashMap;

#[tokio::test]
async fn clear_pending_tasks_is_scoped_to_its_site() {
    let fixture = common::build(&["site_a", "site_b"]).await;
    let controller = &fixture.controller;

    for _ in 0..5 {
        controller.admit_task("site_a", HashMap::new()).await.unwrap();
    }
    for _ in 0..3 {
        controller.admit_task("site_b", HashMap::new()).await.unwrap();
    }

    let result = controller
        .clear_pending_tasks(Some("site_a"))
        .await
        .unwrap();
    assert_eq!(result.cleared_count, 5);
    assert_eq!(result.total_ready_count, 5);

    let site_b_ready = controller
        .queue
        .get_pending_tasks(Some("site_b"))
        .await
        .unwrap();
    assert_eq!(site_b_ready.len(), 3);
    assert!(site_b_ready
        .iter()
        .all(|t| t.status == fleet_controller_lib::domain::entities::TaskStatus::Ready));

    let site_a_ready = controller
        .queue
        .get_pending_tasks(Some("site_a"))
        .await
        .unwrap();
    assert!(site_a_ready.is_empty());
}

#[tokio::test]
async fn clear_on_empty_queue_returns_zero_counts() {
    let fixture = common::build(&["site_a"]).await;
    let result = fixture
        .controller
        .clear_pending_tasks(Some("site_a"))
        .await
        .unwrap();
    assert_eq!(result.cleared_count, 0);
    assert_eq!(result.total_ready_count, 0);
}
