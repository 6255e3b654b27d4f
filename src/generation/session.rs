//! Generation Session
//!
//! Runtime state of the one active request: its cancellation token, its budget gate, and
//! the event channel its progress is published on. [`run_suspendable`] is the single
//! streaming routine every generation feature goes through.

use super::budget::{BudgetConfig, BudgetEvent, BudgetGate, BudgetHooks, BudgetSnapshot};
use super::client::{GenerateCall, GenerationClient};
use super::queue::{Priority, RequestId};
use super::stream::LineBuffer;
use super::target::{GenerationTarget, LiveRecord};
use crate::error::GenerationError;
use crate::provider::{ChatMessage, GenerationParams};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Progress published for the active request.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started {
        request_id: RequestId,
        target: GenerationTarget,
    },
    Delta {
        request_id: RequestId,
        text: String,
    },
    Line {
        request_id: RequestId,
        line: String,
    },
    Record {
        request_id: RequestId,
        record: LiveRecord,
    },
    BudgetChanged {
        request_id: RequestId,
        snapshot: BudgetSnapshot,
    },
    BudgetTick {
        request_id: RequestId,
        remaining: Duration,
    },
    Completed {
        request_id: RequestId,
    },
    Cancelled {
        request_id: RequestId,
    },
    Failed {
        request_id: RequestId,
        error: String,
    },
}

impl SessionEvent {
    pub fn request_id(&self) -> RequestId {
        match self {
            SessionEvent::Started { request_id, .. }
            | SessionEvent::Delta { request_id, .. }
            | SessionEvent::Line { request_id, .. }
            | SessionEvent::Record { request_id, .. }
            | SessionEvent::BudgetChanged { request_id, .. }
            | SessionEvent::BudgetTick { request_id, .. }
            | SessionEvent::Completed { request_id }
            | SessionEvent::Cancelled { request_id }
            | SessionEvent::Failed { request_id, .. } => *request_id,
        }
    }
}

/// Result of a finished stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOutput {
    /// Full generated text
    pub text: String,
    /// Records recognized line by line while streaming
    pub records: Vec<LiveRecord>,
}

pub struct GenerationSession {
    request_id: RequestId,
    target: GenerationTarget,
    cancel: CancellationToken,
    gate: BudgetGate,
    events: broadcast::Sender<SessionEvent>,
}

impl GenerationSession {
    pub fn new(
        request_id: RequestId,
        target: GenerationTarget,
        budget: &BudgetConfig,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let observer_events = events.clone();
        let gate = BudgetGate::new(cancel.clone())
            .with_auto_continue(budget.auto_continue)
            .with_tick(budget.tick())
            .with_observer(Arc::new(move |event| {
                let event = match event {
                    BudgetEvent::StateChanged(snapshot) => SessionEvent::BudgetChanged {
                        request_id,
                        snapshot,
                    },
                    BudgetEvent::Tick { remaining } => SessionEvent::BudgetTick {
                        request_id,
                        remaining,
                    },
                };
                let _ = observer_events.send(event);
            }));
        Self {
            request_id,
            target,
            cancel,
            gate,
            events,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn target(&self) -> &GenerationTarget {
        &self.target
    }

    pub fn budget(&self) -> BudgetSnapshot {
        self.gate.snapshot()
    }

    /// Confirm a pending budget wait. No-op (returns `false`) when none is pending.
    pub fn continue_budget(&self) -> bool {
        self.gate.resolve()
    }

    pub fn cancel(&self) {
        debug!(request_id = self.request_id.as_u64(), "Cancelling session");
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl BudgetHooks for GenerationSession {
    async fn on_budget_wait(
        &self,
        available: u64,
        needed: u64,
        wait: Duration,
    ) -> Result<(), GenerationError> {
        self.gate.on_budget_wait(available, needed, wait).await
    }

    fn on_budget_resume(&self) {
        self.gate.on_budget_resume();
    }
}

/// Stream one call through `session`: deltas are line-buffered, each complete line is
/// published and offered to the target's live parser, and the trailing fragment is flushed
/// once at the end. After cancellation no further deltas are buffered or parsed.
pub async fn run_suspendable(
    client: &dyn GenerationClient,
    session: &GenerationSession,
    messages: Vec<ChatMessage>,
    params: GenerationParams,
    priority: Priority,
) -> Result<SessionOutput, GenerationError> {
    let request_id = session.request_id();
    let mut buffer = LineBuffer::new();
    let mut records = Vec::new();
    let mut consume = |line: &str| {
        session.publish(SessionEvent::Line {
            request_id,
            line: line.to_string(),
        });
        for record in session.target().parse_live_line(line) {
            session.publish(SessionEvent::Record {
                request_id,
                record: record.clone(),
            });
            records.push(record);
        }
    };

    let result = {
        let mut on_delta = |delta: &str| {
            if session.is_cancelled() {
                return;
            }
            session.publish(SessionEvent::Delta {
                request_id,
                text: delta.to_string(),
            });
            buffer.push(delta, &mut consume);
        };
        client
            .generate(GenerateCall {
                messages,
                params,
                on_delta: &mut on_delta,
                priority,
                cancel: session.cancellation_token(),
                hooks: session,
            })
            .await
    };

    let text = match result {
        Ok(_) if session.is_cancelled() => return Err(GenerationError::Cancelled),
        Ok(text) => text,
        Err(e) if session.is_cancelled() => {
            debug!(request_id = request_id.as_u64(), error = %e, "Error after cancellation");
            return Err(GenerationError::Cancelled);
        }
        Err(e) => return Err(e),
    };

    buffer.finish(&mut consume);
    Ok(SessionOutput { text, records })
}
