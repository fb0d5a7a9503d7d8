//! S2: with one site, a second task waits behind the first; both are
//! never `RUNNING` simultaneously.

mod common;

use fleet_controller_lib::domain::entities::TaskStatus;
use std::collections::HashMap;

#[tokio::test]
async fn second_task_waits_for_the_first_to_finish() {
    let fixture = common::build(&["site_a"]).await;
    let controller = &fixture.controller;

    controller.admit_task("site_a", HashMap::new()).await.unwrap();
    controller.admit_task("site_a", HashMap::new()).await.unwrap();

    let first = common::simulate_dispatch(controller, "site_a").await.unwrap();
    assert_eq!(first.status, TaskStatus::Running);

    // Nothing else may start for this site while the first is running.
    assert!(common::simulate_dispatch(controller, "site_a").await.is_none());

    common::simulate_exit(controller, &first.task_id, 0).await;

    let second = common::simulate_dispatch(controller, "site_a").await.unwrap();
    assert_eq!(second.status, TaskStatus::Running);
    assert_ne!(second.task_id, first.task_id);
}
