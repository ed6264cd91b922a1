//! Integration tests for the task plan tracker

use stepwise_orchestrator::{MarkOutcome, Remaining, Task, TaskPlan, TaskStatus};

fn tasks(n: usize) -> Vec<Task> {
    (1..=n).map(|i| Task::new(format!("t{}", i), format!("Task {}", i), "send_email")).collect()
}

#[test]
fn test_every_order_completes_the_plan() {
    let orders: [&[usize]; 4] = [&[1, 2, 3, 4], &[4, 3, 2, 1], &[2, 4, 1, 3], &[3, 1, 4, 2]];
    for order in orders {
        let mut plan = TaskPlan::new();
        plan.create_plan(tasks(4)).unwrap();

        let mut last = MarkOutcome::NoActivePlan;
        for i in order {
            last = plan.mark_complete(&format!("t{}", i), None);
        }

        assert!(last.is_all_done(), "order {:?}", order);
        assert_eq!(plan.remaining_tasks(), Remaining::Complete);
        let summary = plan.final_summary();
        assert_eq!(summary.matches('✅').count(), 4);
        assert!(!summary.contains('⏭'));
    }
}

#[test]
fn test_double_mark_counts_once() {
    let mut plan = TaskPlan::new();
    plan.create_plan(tasks(3)).unwrap();

    plan.mark_complete("t1", Some("done"));
    let again = plan.mark_complete("t1", Some("done again"));

    assert_eq!(plan.completed_count(), 1);
    match again {
        MarkOutcome::Next { remaining, next } => {
            assert_eq!(remaining, 2);
            assert_eq!(next.id, "t2");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn test_failure_then_success_keeps_sets_disjoint() {
    let mut plan = TaskPlan::new();
    plan.create_plan(tasks(2)).unwrap();

    plan.mark_failed("t1", "smtp down");
    assert_eq!(plan.status("t1"), Some(TaskStatus::Failed));
    plan.mark_complete("t1", None);
    assert_eq!(plan.status("t1"), Some(TaskStatus::Completed));
    assert_eq!(plan.failed_count(), 0);

    plan.mark_failed("t1", "late failure");
    assert_eq!(plan.status("t1"), Some(TaskStatus::Completed));
}

#[test]
fn test_dependencies_drive_next_task() {
    let mut plan = TaskPlan::new();
    plan.create_plan(vec![
        Task::new("upload", "Upload attachment", "upload_file"),
        Task::new("send", "Send email with attachment", "send_email").depends_on("upload"),
        Task::new("notify", "Notify channel", "post_message"),
    ])
    .unwrap();

    assert_eq!(plan.next_pending().map(|t| t.id.as_str()), Some("upload"));
    plan.mark_complete("upload", None);
    assert_eq!(plan.next_pending().map(|t| t.id.as_str()), Some("send"));
}

#[test]
fn test_cycles_rejected() {
    let mut plan = TaskPlan::new();
    let err = plan
        .create_plan(vec![
            Task::new("a", "A", "x").depends_on("b"),
            Task::new("b", "B", "x").depends_on("a"),
        ])
        .unwrap_err();
    assert!(err.to_string().contains("Invalid plan"));
    assert!(!plan.is_active());
}
