//! Integration tests for the single-flight generation queue
//!
//! Tests cover:
//! - One active session at a time, next request chosen by priority
//! - Cancelling the active session lets the queue move on
//! - Waiters of cancelled queued requests resolve at once
//! - Cancelling by goal

use crucible::error::GenerationError;
use crucible::generation::{GenerationTarget, Priority, RequestStatus};
use crucible::provider::scripted::ScriptedResponse;
use crucible::provider::{ChatMessage, GenerationParams};
use std::time::Duration;

use super::test_utils::{scripted_queue, text};

fn prompt(label: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(label)]
}

async fn wait_for_active(queue: &crucible::generation::GenerationQueue) {
    while queue.active().is_none() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_next_request_is_chosen_by_priority_after_active_finishes() {
    let (queue, provider) = scripted_queue(vec![
        ScriptedResponse::Hang,
        text("urgent"),
        text("normal"),
        text("low"),
    ]);
    queue.start();

    let first = queue
        .enqueue(GenerationTarget::Brainstorm, prompt("hang"), GenerationParams::default(), Priority::Normal)
        .unwrap();
    wait_for_active(&queue).await;

    for (label, priority) in [
        ("low", Priority::Low),
        ("urgent", Priority::Urgent),
        ("normal", Priority::Normal),
    ] {
        queue
            .enqueue(GenerationTarget::Brainstorm, prompt(label), GenerationParams::default(), priority)
            .unwrap();
    }
    // Only the hanging request has reached the provider.
    assert_eq!(provider.calls().len(), 1);
    assert_eq!(queue.active().unwrap().request_id, first);

    assert!(queue.cancel(first));
    queue
        .wait_for_idle(Some(Duration::from_secs(5)))
        .await
        .unwrap();
    queue.stop().await;

    let order: Vec<String> = provider
        .calls()
        .iter()
        .map(|messages| messages[0].content.clone())
        .collect();
    assert_eq!(order, vec!["hang", "urgent", "normal", "low"]);
    assert_eq!(queue.status(first), Some(RequestStatus::Cancelled));
    let stats = queue.stats();
    assert_eq!((stats.completed, stats.cancelled, stats.failed), (3, 1, 0));
}

#[tokio::test]
async fn test_cancelled_queued_waiter_resolves_immediately() {
    let (queue, _provider) = scripted_queue(vec![ScriptedResponse::Hang]);
    queue.start();
    let hanging = queue
        .enqueue(GenerationTarget::Brainstorm, prompt("hang"), GenerationParams::default(), Priority::Normal)
        .unwrap();
    wait_for_active(&queue).await;

    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move {
            queue
                .enqueue_and_wait(
                    GenerationTarget::Field {
                        field_id: "logline".to_string(),
                    },
                    prompt("field"),
                    GenerationParams::default(),
                    Priority::Normal,
                )
                .await
        })
    };
    while queue.stats().pending == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let cancelled = queue.cancel_matching(|t| matches!(t, GenerationTarget::Field { .. }));
    assert_eq!(cancelled, 1);
    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter resolved while the active request still hangs")
        .unwrap();
    assert!(matches!(result, Err(GenerationError::Cancelled)));

    assert!(queue.cancel(hanging));
    queue.stop().await;
}

#[tokio::test]
async fn test_cancel_matching_goal_leaves_other_goals() {
    let (queue, provider) = scripted_queue(vec![text("two"), text("field")]);
    let chain = |goal: &str| GenerationTarget::CrucibleChain {
        goal_id: goal.to_string(),
    };
    queue
        .enqueue(chain("g1"), prompt("g1"), GenerationParams::default(), Priority::Normal)
        .unwrap();
    queue
        .enqueue(chain("g2"), prompt("g2"), GenerationParams::default(), Priority::Normal)
        .unwrap();
    queue
        .enqueue(
            GenerationTarget::Field {
                field_id: "logline".to_string(),
            },
            prompt("field"),
            GenerationParams::default(),
            Priority::Normal,
        )
        .unwrap();

    assert_eq!(queue.cancel_matching(|t| t.goal_id() == Some("g1")), 1);
    assert_eq!(queue.run_next().await.unwrap().1, RequestStatus::Completed);
    assert_eq!(queue.run_next().await.unwrap().1, RequestStatus::Completed);
    assert!(queue.run_next().await.is_none());

    let labels: Vec<String> = provider
        .calls()
        .iter()
        .map(|messages| messages[0].content.clone())
        .collect();
    assert_eq!(labels, vec!["g2", "field"]);
}
