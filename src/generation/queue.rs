//! Generation Queue
//!
//! Single-flight scheduler: requests wait in a priority heap and exactly one is processed
//! at a time, system-wide. Activation pops the highest-priority, oldest request, opens a
//! session for it and streams it to completion, then moves on. Failures are reported to
//! the waiter once and never retried.

use super::budget::{BudgetConfig, BudgetSnapshot};
use super::client::GenerationClient;
use super::session::{run_suspendable, GenerationSession, SessionEvent, SessionOutput};
use super::target::GenerationTarget;
use crate::error::GenerationError;
use crate::provider::{ChatMessage, GenerationParams};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot, Notify};
use tracing::{debug, error, info, warn};

/// Priority level for generation requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,    // Background derivation
    Normal = 1, // Default priority
    High = 2,   // Director oversight
    Urgent = 3, // User-initiated requests
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Request ID for tracking completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    /// Generate the next request ID (for internal use and testing)
    pub fn next() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        RequestId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Queued,
    Processing,
    Completed,
    Cancelled,
    Failed,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Queued | RequestStatus::Processing)
    }
}

/// Generation request. Messages are built at enqueue time and never change afterwards.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub request_id: RequestId,
    pub target: GenerationTarget,
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
    /// Priority level (higher = more important)
    pub priority: Priority,
    /// Timestamp when request was created
    pub created_at: Instant,
}

impl PartialEq for GenerationRequest {
    fn eq(&self, other: &Self) -> bool {
        self.request_id == other.request_id
    }
}

impl Eq for GenerationRequest {}

impl Ord for GenerationRequest {
    /// Order by priority (higher first), then by creation time (older first for same priority)
    /// BinaryHeap is a max-heap, so higher priority should compare as Greater
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.priority.cmp(&other.priority) {
            std::cmp::Ordering::Equal => self
                .created_at
                .cmp(&other.created_at)
                .reverse()
                // Same instant: lower id was enqueued first
                .then_with(|| self.request_id.cmp(&other.request_id).reverse()),
            ordering => ordering,
        }
    }
}

impl PartialOrd for GenerationRequest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Configuration for the generation queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum queued requests
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Capacity of the session event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Sampling for structured planning stages
    #[serde(default = "default_planning_params")]
    pub planning_params: GenerationParams,
    /// Sampling for prose: chain beats, fields, brainstorm
    #[serde(default)]
    pub creative_params: GenerationParams,
}

fn default_max_queue_size() -> usize {
    64
}

fn default_event_capacity() -> usize {
    1024
}

fn default_planning_params() -> GenerationParams {
    GenerationParams::default()
        .with_max_tokens(768)
        .with_temperature(0.8)
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            event_capacity: default_event_capacity(),
            planning_params: default_planning_params(),
            creative_params: GenerationParams::default(),
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Number of pending requests
    pub pending: usize,
    /// Number of requests currently being processed
    pub processing: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
}

type Completion = oneshot::Sender<Result<SessionOutput, GenerationError>>;

/// Finished requests whose status stays queryable.
const FINISHED_HISTORY: usize = 256;

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<GenerationRequest>,
    /// Live requests only: queued or processing
    statuses: HashMap<RequestId, RequestStatus>,
    /// Most recent terminal statuses, oldest first
    finished: VecDeque<(RequestId, RequestStatus)>,
    queued: usize,
    waiters: HashMap<RequestId, Vec<Completion>>,
    active: Option<Arc<GenerationSession>>,
}

impl QueueState {
    fn status(&self, request_id: RequestId) -> Option<RequestStatus> {
        self.statuses.get(&request_id).copied().or_else(|| {
            self.finished
                .iter()
                .rev()
                .find(|(id, _)| *id == request_id)
                .map(|(_, status)| *status)
        })
    }

    /// Drop a request from the live set and remember how it ended.
    fn settle(&mut self, request_id: RequestId, status: RequestStatus) {
        if self.statuses.remove(&request_id) == Some(RequestStatus::Queued) {
            self.queued = self.queued.saturating_sub(1);
        }
        self.finished.push_back((request_id, status));
        while self.finished.len() > FINISHED_HISTORY {
            self.finished.pop_front();
        }
    }
}

struct QueueShared {
    client: Arc<dyn GenerationClient>,
    config: GenerationConfig,
    budget: BudgetConfig,
    state: Mutex<QueueState>,
    /// Held for the whole of one activation
    flight: tokio::sync::Mutex<()>,
    notify: Notify,
    events: broadcast::Sender<SessionEvent>,
    stats: RwLock<QueueStats>,
    running: RwLock<bool>,
}

/// Single-flight generation queue
pub struct GenerationQueue {
    shared: Arc<QueueShared>,
    worker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Snapshot of the request being processed.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveRequest {
    pub request_id: RequestId,
    pub target: GenerationTarget,
    pub budget: BudgetSnapshot,
}

impl GenerationQueue {
    pub fn new(
        client: Arc<dyn GenerationClient>,
        config: GenerationConfig,
        budget: BudgetConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            shared: Arc::new(QueueShared {
                client,
                config,
                budget,
                state: Mutex::new(QueueState::default()),
                flight: tokio::sync::Mutex::new(()),
                notify: Notify::new(),
                events,
                stats: RwLock::new(QueueStats::default()),
                running: RwLock::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.shared.config
    }

    /// Enqueue a request (returns immediately)
    pub fn enqueue(
        &self,
        target: GenerationTarget,
        messages: Vec<ChatMessage>,
        params: GenerationParams,
        priority: Priority,
    ) -> Result<RequestId, GenerationError> {
        self.shared.push(target, messages, params, priority, None)
    }

    /// Enqueue a request and wait for its session to finish.
    ///
    /// Without a running worker the request is driven inline, along with anything queued
    /// ahead of it.
    pub async fn enqueue_and_wait(
        &self,
        target: GenerationTarget,
        messages: Vec<ChatMessage>,
        params: GenerationParams,
        priority: Priority,
    ) -> Result<SessionOutput, GenerationError> {
        let (tx, mut rx) = oneshot::channel();
        let request_id = self
            .shared
            .push(target, messages, params, priority, Some(tx))?;

        if !self.is_running() {
            while !self.status(request_id).map_or(true, RequestStatus::is_terminal) {
                if self.run_next().await.is_none() {
                    break;
                }
            }
        }

        match rx.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => {
                rx.await.map_err(|_| GenerationError::ChannelClosed)?
            }
            Err(oneshot::error::TryRecvError::Closed) => Err(GenerationError::ChannelClosed),
        }
    }

    /// Cancel a queued or active request. Returns `false` for unknown or finished ones.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        self.shared.cancel(request_id)
    }

    /// Cancel the active request and everything queued.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<RequestId> = self.shared.state.lock().statuses.keys().copied().collect();
        ids.into_iter().filter(|id| self.shared.cancel(*id)).count()
    }

    /// Cancel every live request whose target matches `predicate`.
    pub fn cancel_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&GenerationTarget) -> bool,
    {
        let ids: Vec<RequestId> = {
            let state = self.shared.state.lock();
            let active = state
                .active
                .as_ref()
                .filter(|s| predicate(s.target()))
                .map(|s| s.request_id());
            let queued = state
                .heap
                .iter()
                .filter(|r| state.statuses.get(&r.request_id) == Some(&RequestStatus::Queued))
                .filter(|r| predicate(&r.target))
                .map(|r| r.request_id);
            active.into_iter().chain(queued).collect()
        };
        ids.into_iter().filter(|id| self.shared.cancel(*id)).count()
    }

    /// Status of a live request, or of one of the most recently finished ones.
    pub fn status(&self, request_id: RequestId) -> Option<RequestStatus> {
        self.shared.state.lock().status(request_id)
    }

    pub fn active(&self) -> Option<ActiveRequest> {
        self.shared.state.lock().active.as_ref().map(|session| ActiveRequest {
            request_id: session.request_id(),
            target: session.target().clone(),
            budget: session.budget(),
        })
    }

    /// Confirm the active session's pending budget wait.
    pub fn continue_budget(&self) -> bool {
        let session = self.shared.state.lock().active.clone();
        match session {
            Some(session) => session.continue_budget(),
            None => false,
        }
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        self.shared.stats.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        *self.shared.running.read()
    }

    /// Process the next queued request, if any. Returns its id and final status.
    pub async fn run_next(&self) -> Option<(RequestId, RequestStatus)> {
        self.shared.run_next().await
    }

    /// Start the background worker
    pub fn start(&self) {
        let mut running = self.shared.running.write();
        if *running {
            return; // Already running
        }
        *running = true;
        drop(running);

        let shared = Arc::clone(&self.shared);
        *self.worker.lock() = Some(tokio::spawn(async move {
            shared.worker_loop().await;
        }));
        info!("Started generation queue worker");
    }

    /// Stop the background worker after its current request (graceful shutdown)
    pub async fn stop(&self) {
        {
            let mut running = self.shared.running.write();
            if !*running {
                return; // Already stopped
            }
            *running = false;
        }
        self.shared.notify.notify_one();

        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
        info!("Stopped generation queue worker");
    }

    /// Wait for the queue to drain
    pub async fn wait_for_idle(&self, timeout: Option<Duration>) -> Result<(), GenerationError> {
        let start = Instant::now();
        loop {
            let idle = {
                let state = self.shared.state.lock();
                state.active.is_none() && state.statuses.is_empty()
            };
            if idle {
                return Ok(());
            }
            if let Some(timeout) = timeout {
                if start.elapsed() >= timeout {
                    return Err(GenerationError::Provider(
                        "Timeout waiting for queue to drain".to_string(),
                    ));
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl QueueShared {
    fn push(
        &self,
        target: GenerationTarget,
        messages: Vec<ChatMessage>,
        params: GenerationParams,
        priority: Priority,
        completion: Option<Completion>,
    ) -> Result<RequestId, GenerationError> {
        let mut state = self.state.lock();
        let queued = state.queued;
        if queued >= self.config.max_queue_size {
            warn!(
                queue_size = queued,
                max_size = self.config.max_queue_size,
                "Generation queue is full, dropping request"
            );
            return Err(GenerationError::QueueFull(self.config.max_queue_size));
        }

        let request_id = RequestId::next();
        debug!(
            request_id = request_id.as_u64(),
            target = %target,
            priority = ?priority,
            queue_size = queued + 1,
            "Enqueued generation request"
        );
        state.heap.push(GenerationRequest {
            request_id,
            target,
            messages,
            params,
            priority,
            created_at: Instant::now(),
        });
        state.statuses.insert(request_id, RequestStatus::Queued);
        state.queued += 1;
        if let Some(tx) = completion {
            state.waiters.entry(request_id).or_default().push(tx);
        }
        drop(state);

        self.stats.write().pending += 1;
        self.notify.notify_one();
        Ok(request_id)
    }

    fn cancel(&self, request_id: RequestId) -> bool {
        let mut state = self.state.lock();
        if let Some(session) = state
            .active
            .as_ref()
            .filter(|s| s.request_id() == request_id)
        {
            info!(request_id = request_id.as_u64(), "Cancelling active request");
            session.cancel();
            return true;
        }

        match state.statuses.get(&request_id) {
            Some(RequestStatus::Queued) => {}
            _ => return false,
        }
        // The heap entry stays until the next activation sweep.
        state.settle(request_id, RequestStatus::Cancelled);
        let waiters = state.waiters.remove(&request_id).unwrap_or_default();
        drop(state);

        {
            let mut stats = self.stats.write();
            stats.pending = stats.pending.saturating_sub(1);
            stats.cancelled += 1;
        }
        for tx in waiters {
            let _ = tx.send(Err(GenerationError::Cancelled));
        }
        let _ = self.events.send(SessionEvent::Cancelled { request_id });
        info!(request_id = request_id.as_u64(), "Cancelled queued request");
        true
    }

    /// Pop the next live request, discarding cancelled entries on the way.
    fn activate(&self) -> Option<(GenerationRequest, Arc<GenerationSession>)> {
        let mut state = self.state.lock();
        let request = loop {
            let candidate = state.heap.pop()?;
            match state.statuses.get(&candidate.request_id) {
                Some(RequestStatus::Queued) => break candidate,
                _ => debug!(
                    request_id = candidate.request_id.as_u64(),
                    "Swept cancelled request"
                ),
            }
        };

        let session = Arc::new(GenerationSession::new(
            request.request_id,
            request.target.clone(),
            &self.budget,
            self.events.clone(),
        ));
        state
            .statuses
            .insert(request.request_id, RequestStatus::Processing);
        state.queued = state.queued.saturating_sub(1);
        state.active = Some(Arc::clone(&session));
        drop(state);

        let mut stats = self.stats.write();
        stats.pending = stats.pending.saturating_sub(1);
        stats.processing += 1;
        Some((request, session))
    }

    async fn run_next(&self) -> Option<(RequestId, RequestStatus)> {
        let _flight = self.flight.lock().await;
        let (request, session) = self.activate()?;
        let request_id = request.request_id;
        let started = Instant::now();

        info!(
            request_id = request_id.as_u64(),
            target = %request.target,
            "Processing generation request"
        );
        let _ = self.events.send(SessionEvent::Started {
            request_id,
            target: request.target.clone(),
        });

        let result = run_suspendable(
            self.client.as_ref(),
            &session,
            request.messages,
            request.params,
            request.priority,
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let status = match &result {
            Ok(_) => {
                debug!(request_id = request_id.as_u64(), duration_ms, "Generation completed");
                let _ = self.events.send(SessionEvent::Completed { request_id });
                RequestStatus::Completed
            }
            Err(GenerationError::Cancelled) => {
                info!(request_id = request_id.as_u64(), duration_ms, "Generation cancelled");
                let _ = self.events.send(SessionEvent::Cancelled { request_id });
                RequestStatus::Cancelled
            }
            Err(e) => {
                error!(
                    request_id = request_id.as_u64(),
                    target = %request.target,
                    duration_ms,
                    error = %e,
                    "Generation request failed"
                );
                let _ = self.events.send(SessionEvent::Failed {
                    request_id,
                    error: e.to_string(),
                });
                RequestStatus::Failed
            }
        };

        let waiters = {
            let mut state = self.state.lock();
            state.active = None;
            state.settle(request_id, status);
            state.waiters.remove(&request_id).unwrap_or_default()
        };
        {
            let mut stats = self.stats.write();
            stats.processing = stats.processing.saturating_sub(1);
            match status {
                RequestStatus::Completed => stats.completed += 1,
                RequestStatus::Cancelled => stats.cancelled += 1,
                _ => stats.failed += 1,
            }
        }
        for tx in waiters {
            let _ = tx.send(result.clone());
        }

        Some((request_id, status))
    }

    async fn worker_loop(&self) {
        debug!("Queue worker started");
        while *self.running.read() {
            if self.run_next().await.is_some() {
                continue;
            }
            // Nothing queued: wait for a notification, re-checking the running flag periodically
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
        debug!("Queue worker stopped");
    }
}
