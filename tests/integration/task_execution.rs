//! End-to-end task scenarios through the hub: group fan-out, partial
//! failure roll-up, recurring re-arm and cancellation.

use std::collections::HashMap;

use chrono::Utc;
use fleet_control::CoreError;
use fleet_control::model::{TargetSpec, TaskKind, TaskLogStatus, TaskStatus};
use fleet_control::scheduler::NewTask;
use fleet_control::store::NewServerGroup;

use crate::helpers::{AgentBehavior, add_credential, register_server, test_hub, wait_for_terminal};

fn once_task(targets: TargetSpec) -> NewTask {
    NewTask {
        name: "rollout".into(),
        kind: TaskKind::Once,
        targets,
        command: "systemctl restart app".into(),
        cron_expression: None,
        run_at: None,
        created_by: 1,
    }
}

#[tokio::test]
async fn group_fan_out_with_partial_failure() {
    let hub = test_hub(HashMap::from([
        ("db-1".to_string(), AgentBehavior::Exit(1)),
        ("cache-1".to_string(), AgentBehavior::Unreachable),
    ]));
    let key = add_credential(&hub).await;

    let web = register_server(&hub, "web-1", Some(key)).await;
    let db = register_server(&hub, "db-1", Some(key)).await;
    let cache = register_server(&hub, "cache-1", Some(key)).await;

    // prod ─┬─ web-1 (member)
    //       └─ backend ─┬─ db-1
    //                   └─ cache-1
    let prod = hub
        .create_group(NewServerGroup {
            name: "prod".into(),
            description: None,
            parent_id: None,
        })
        .await
        .unwrap();
    let backend = hub
        .create_group(NewServerGroup {
            name: "backend".into(),
            description: None,
            parent_id: Some(prod.id),
        })
        .await
        .unwrap();
    hub.add_group_member(prod.id, web).await.unwrap();
    hub.add_group_member(backend.id, db).await.unwrap();
    hub.add_group_member(backend.id, cache).await.unwrap();

    let task = hub
        .submit_task(once_task(TargetSpec {
            server_ids: vec![],
            group_ids: vec![prod.id],
        }))
        .await
        .unwrap();

    let finished = wait_for_terminal(&hub, task.id).await;
    assert_eq!(finished.status, TaskStatus::Failed);

    let logs = hub.task_logs(task.id).await.unwrap();
    assert_eq!(logs.len(), 3);

    let status_of = |id| logs.iter().find(|l| l.server_id == id).unwrap().status;
    assert_eq!(status_of(web), TaskLogStatus::Success);
    assert_eq!(status_of(db), TaskLogStatus::Failed);
    assert_eq!(status_of(cache), TaskLogStatus::Failed);
}

#[tokio::test]
async fn duplicate_membership_yields_a_single_log() {
    let hub = test_hub(HashMap::new());
    let key = add_credential(&hub).await;
    let server = register_server(&hub, "web-1", Some(key)).await;

    let g1 = hub
        .create_group(NewServerGroup {
            name: "g1".into(),
            description: None,
            parent_id: None,
        })
        .await
        .unwrap();
    hub.add_group_member(g1.id, server).await.unwrap();

    // Server named both explicitly and via the group.
    let task = hub
        .submit_task(once_task(TargetSpec {
            server_ids: vec![server],
            group_ids: vec![g1.id],
        }))
        .await
        .unwrap();

    let finished = wait_for_terminal(&hub, task.id).await;
    assert_eq!(finished.status, TaskStatus::Completed);
    assert_eq!(hub.task_logs(task.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn recurring_task_lifecycle() {
    let hub = test_hub(HashMap::new());
    let key = add_credential(&hub).await;
    let server = register_server(&hub, "web-1", Some(key)).await;

    let task = hub
        .submit_task(NewTask {
            name: "hourly check".into(),
            kind: TaskKind::Recurring,
            targets: TargetSpec {
                server_ids: vec![server],
                group_ids: vec![],
            },
            command: "uptime".into(),
            cron_expression: Some("0 0 * * * *".into()),
            run_at: None,
            created_by: 1,
        })
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Pending);
    assert!(task.next_run_at.unwrap() > Utc::now());

    let cancelled = hub.cancel_task(task.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert_eq!(cancelled.next_run_at, None);

    // Terminal tasks cannot be cancelled again.
    assert!(matches!(
        hub.cancel_task(task.id).await,
        Err(CoreError::Conflict(_))
    ));
}

#[tokio::test]
async fn task_logs_for_unknown_task_is_not_found() {
    let hub = test_hub(HashMap::new());
    assert!(matches!(
        hub.task_logs(999).await,
        Err(CoreError::NotFound("task", 999))
    ));
}
