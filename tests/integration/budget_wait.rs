//! Integration tests for budget waits inside a queued session
//!
//! The collaborator runs out of tokens mid-stream; the session publishes the wait, the
//! user confirms or declines through the queue, and the stream resumes or is cancelled.

use crucible::error::GenerationError;
use crucible::generation::{
    BudgetConfig, BudgetState, GenerationConfig, GenerationQueue, GenerationTarget, Priority,
    ProviderGenerator, SessionEvent, TokenBudget,
};
use crucible::provider::scripted::ScriptedProvider;
use crucible::provider::GenerationParams;
use std::sync::Arc;

/// 40 chars in two 20-char deltas (5 tokens each) against 6 tokens refilling at 1/s:
/// the second delta waits 4 seconds.
fn budgeted_queue(auto_continue: bool) -> Arc<GenerationQueue> {
    let provider =
        Arc::new(ScriptedProvider::with_texts(["x".repeat(40)]).with_chunk_chars(20));
    let client = Arc::new(ProviderGenerator::new(provider, TokenBudget::new(6, 1.0)));
    Arc::new(GenerationQueue::new(
        client,
        GenerationConfig::default(),
        BudgetConfig {
            auto_continue,
            ..BudgetConfig::default()
        },
    ))
}

fn spawn_call(
    queue: &Arc<GenerationQueue>,
) -> tokio::task::JoinHandle<Result<crucible::generation::SessionOutput, GenerationError>> {
    let queue = Arc::clone(queue);
    tokio::spawn(async move {
        queue
            .enqueue_and_wait(
                GenerationTarget::Brainstorm,
                vec![],
                GenerationParams::default(),
                Priority::Normal,
            )
            .await
    })
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_wait_counts_down_and_resumes() {
    let queue = budgeted_queue(false);
    let mut events = queue.subscribe();
    let call = spawn_call(&queue);

    let mut states = Vec::new();
    let mut ticks = 0;
    loop {
        match events.recv().await.unwrap() {
            SessionEvent::BudgetChanged { snapshot, .. } => {
                states.push(snapshot.state);
                if snapshot.state == BudgetState::WaitingForUser {
                    assert_eq!(snapshot.needed, 5);
                    assert!(snapshot.available < 5);
                    assert!(queue.continue_budget());
                }
            }
            SessionEvent::BudgetTick { .. } => ticks += 1,
            SessionEvent::Completed { .. } => break,
            _ => {}
        }
    }

    let output = call.await.unwrap().unwrap();
    assert_eq!(output.text, "x".repeat(40));
    assert_eq!(
        states,
        vec![
            BudgetState::WaitingForUser,
            BudgetState::WaitingForTimer,
            BudgetState::Normal
        ]
    );
    assert!(ticks >= 1);
    assert!(!queue.continue_budget());
}

#[tokio::test(start_paused = true)]
async fn test_declined_wait_cancels_the_request() {
    let queue = budgeted_queue(false);
    let mut events = queue.subscribe();
    let call = spawn_call(&queue);

    loop {
        if let SessionEvent::BudgetChanged {
            request_id,
            snapshot,
        } = events.recv().await.unwrap()
        {
            if snapshot.state == BudgetState::WaitingForUser {
                assert!(queue.cancel(request_id));
                break;
            }
        }
    }

    let result = call.await.unwrap();
    assert!(matches!(result, Err(GenerationError::Cancelled)));
    assert_eq!(queue.stats().cancelled, 1);
}

#[tokio::test(start_paused = true)]
async fn test_auto_continue_goes_straight_to_countdown() {
    let queue = budgeted_queue(true);
    let mut events = queue.subscribe();
    let call = spawn_call(&queue);

    let output = call.await.unwrap().unwrap();
    assert_eq!(output.text.len(), 40);
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::BudgetChanged { snapshot, .. } = event {
            states.push(snapshot.state);
        }
    }
    assert!(states.contains(&BudgetState::WaitingForTimer));
    assert_eq!(states.last(), Some(&BudgetState::Normal));
}
