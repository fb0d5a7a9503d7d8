//! S3: three enabled sites, one task each, `max_concurrency=2` — exactly
//! two run, the third waits until a slot frees.

mod common;

use fleet_controller_lib::domain::entities::TaskStatus;
use std::collections::HashMap;

#[tokio::test]
async fn only_two_of_three_single_task_sites_run_at_once() {
    let fixture = common::build(&["site_a", "site_b", "site_c"]).await;
    let controller = &fixture.controller;

    for site_id in ["site_a", "site_b", "site_c"] {
        controller.admit_task(site_id, HashMap::new()).await.unwrap();
    }

    let running = common::simulate_tick(controller, &["site_a", "site_b", "site_c"], 2, 0).await;
    assert_eq!(running.len(), 2);
    for task in &running {
        assert_eq!(task.status, TaskStatus::Running);
    }

    let remaining_site = ["site_a", "site_b", "site_c"]
        .into_iter()
        .find(|s| !running.iter().any(|t| t.site_id == *s))
        .unwrap();
    let still_ready = controller
        .queue
        .get_pending_tasks(Some(remaining_site))
        .await
        .unwrap();
    assert_eq!(still_ready.len(), 1);
    assert_eq!(still_ready[0].status, TaskStatus::Ready);

    common::simulate_exit(controller, &running[0].task_id, 0).await;

    let after = common::simulate_tick(controller, &[remaining_site], 2, 1).await;
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].site_id, remaining_site);
}
