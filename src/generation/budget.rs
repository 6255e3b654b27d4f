//! Budget-Wait Protocol
//!
//! When the provider's resource allowance runs dry, the generation collaborator calls
//! `on_budget_wait(available, needed, wait)` and does not resume streaming until the
//! returned future completes. The session answers through a [`BudgetGate`]:
//!
//! 1. state becomes `WaitingForUser` and a resolver is parked in the gate;
//! 2. `resolve()` (user confirmation or the auto-continue policy) releases it;
//! 3. state becomes `WaitingForTimer` and the gate counts down against an absolute
//!    deadline, re-reading the clock on every tick;
//! 4. at the deadline the future completes and the collaborator calls
//!    `on_budget_resume`, returning the state to `Normal`.
//!
//! Cancellation in either waiting state rejects the wait immediately and drops the timer.

use crate::error::GenerationError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetState {
    Normal,
    WaitingForUser,
    WaitingForTimer,
}

impl BudgetState {
    pub fn as_str(self) -> &'static str {
        match self {
            BudgetState::Normal => "normal",
            BudgetState::WaitingForUser => "waiting_for_user",
            BudgetState::WaitingForTimer => "waiting_for_timer",
        }
    }
}

/// Observable budget state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetSnapshot {
    pub state: BudgetState,
    pub available: u64,
    pub needed: u64,
    /// Wait requested by the collaborator
    pub wait: Duration,
    /// Time left on the countdown; equals `wait` until the user confirms
    pub time_remaining: Duration,
    /// The gate confirms this wait itself; observers must not prompt for it
    pub auto_continue: bool,
}

impl Default for BudgetSnapshot {
    fn default() -> Self {
        Self {
            state: BudgetState::Normal,
            available: 0,
            needed: 0,
            wait: Duration::ZERO,
            time_remaining: Duration::ZERO,
            auto_continue: false,
        }
    }
}

/// Change notifications from a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetEvent {
    StateChanged(BudgetSnapshot),
    Tick { remaining: Duration },
}

pub type BudgetObserver = Arc<dyn Fn(BudgetEvent) + Send + Sync>;

/// The two hooks a generation collaborator calls around a budget exhaustion.
#[async_trait]
pub trait BudgetHooks: Send + Sync {
    async fn on_budget_wait(
        &self,
        available: u64,
        needed: u64,
        wait: Duration,
    ) -> Result<(), GenerationError>;

    fn on_budget_resume(&self);
}

/// Hooks for calls made outside a session: wait out the timer, no confirmation.
pub struct UnattendedBudget;

#[async_trait]
impl BudgetHooks for UnattendedBudget {
    async fn on_budget_wait(
        &self,
        _available: u64,
        _needed: u64,
        wait: Duration,
    ) -> Result<(), GenerationError> {
        tokio::time::sleep(wait).await;
        Ok(())
    }

    fn on_budget_resume(&self) {}
}

/// Suspend point for one session's budget waits.
pub struct BudgetGate {
    snapshot: Mutex<BudgetSnapshot>,
    resolver: Mutex<Option<oneshot::Sender<()>>>,
    cancel: CancellationToken,
    auto_continue: bool,
    tick: Duration,
    observer: Option<BudgetObserver>,
}

impl BudgetGate {
    pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            snapshot: Mutex::new(BudgetSnapshot::default()),
            resolver: Mutex::new(None),
            cancel,
            auto_continue: false,
            tick: Self::DEFAULT_TICK,
            observer: None,
        }
    }

    /// Resolve every wait as soon as it starts.
    pub fn with_auto_continue(mut self, auto_continue: bool) -> Self {
        self.auto_continue = auto_continue;
        self
    }

    /// Countdown refresh interval. Only affects how often `time_remaining` updates.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    pub fn with_observer(mut self, observer: BudgetObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        *self.snapshot.lock()
    }

    pub fn state(&self) -> BudgetState {
        self.snapshot.lock().state
    }

    /// Release a parked wait. Returns `false` when nothing is parked, which makes a second
    /// call (or a call with no wait in progress) a no-op.
    pub fn resolve(&self) -> bool {
        let Some(resolver) = self.resolver.lock().take() else {
            debug!("Budget resolve ignored: no wait pending");
            return false;
        };
        // The receiver only disappears if the wait was already cancelled.
        resolver.send(()).is_ok()
    }

    /// Cancel the owning session. Any parked or counting wait rejects right away.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn update(&self, f: impl FnOnce(&mut BudgetSnapshot)) -> BudgetSnapshot {
        let snapshot = {
            let mut guard = self.snapshot.lock();
            f(&mut guard);
            *guard
        };
        if let Some(observer) = &self.observer {
            observer(BudgetEvent::StateChanged(snapshot));
        }
        snapshot
    }

    fn set_remaining(&self, remaining: Duration) {
        self.snapshot.lock().time_remaining = remaining;
        if let Some(observer) = &self.observer {
            observer(BudgetEvent::Tick { remaining });
        }
    }

    fn abandon(&self) -> GenerationError {
        self.resolver.lock().take();
        self.update(|s| {
            s.state = BudgetState::Normal;
            s.time_remaining = Duration::ZERO;
        });
        info!("Budget wait cancelled");
        GenerationError::Cancelled
    }

    async fn suspend(
        &self,
        available: u64,
        needed: u64,
        wait: Duration,
    ) -> Result<(), GenerationError> {
        let receiver = {
            let (tx, rx) = oneshot::channel();
            if self.resolver.lock().replace(tx).is_some() {
                warn!("Budget wait started while another was pending; superseding it");
            }
            rx
        };
        self.update(|s| {
            *s = BudgetSnapshot {
                state: BudgetState::WaitingForUser,
                available,
                needed,
                wait,
                time_remaining: wait,
                auto_continue: self.auto_continue,
            }
        });
        info!(
            available,
            needed,
            wait_ms = wait.as_millis() as u64,
            "Budget exhausted, waiting for confirmation"
        );

        if self.cancel.is_cancelled() {
            return Err(self.abandon());
        }
        if self.auto_continue {
            self.resolve();
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(self.abandon()),
            confirmed = receiver => {
                if confirmed.is_err() {
                    return Err(self.abandon());
                }
            }
        }

        let target_end = Instant::now() + wait;
        self.update(|s| {
            s.state = BudgetState::WaitingForTimer;
            s.time_remaining = wait;
        });
        debug!(wait_ms = wait.as_millis() as u64, "Budget wait confirmed, counting down");

        loop {
            let remaining = target_end.saturating_duration_since(Instant::now());
            self.set_remaining(remaining);
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.abandon()),
                _ = tokio::time::sleep(remaining.min(self.tick)) => {}
            }
        }

        Ok(())
    }
}

#[async_trait]
impl BudgetHooks for BudgetGate {
    async fn on_budget_wait(
        &self,
        available: u64,
        needed: u64,
        wait: Duration,
    ) -> Result<(), GenerationError> {
        self.suspend(available, needed, wait).await
    }

    fn on_budget_resume(&self) {
        let snapshot = self.update(|s| {
            s.state = BudgetState::Normal;
            s.time_remaining = Duration::ZERO;
        });
        debug!(state = snapshot.state.as_str(), "Budget resumed");
    }
}

/// Budget policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Token allowance when full. Zero disables budgeting.
    #[serde(default)]
    pub capacity: u64,
    /// Tokens restored per second
    #[serde(default = "default_refill")]
    pub refill_per_second: f64,
    /// Skip the confirmation step of every wait
    #[serde(default)]
    pub auto_continue: bool,
    /// Countdown refresh interval in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_refill() -> f64 {
    50.0
}

fn default_tick_ms() -> u64 {
    1000
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            capacity: 0,
            refill_per_second: default_refill(),
            auto_continue: false,
            tick_ms: default_tick_ms(),
        }
    }
}

impl BudgetConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity > 0 && self.refill_per_second <= 0.0 {
            return Err("refill_per_second must be positive when capacity is set".to_string());
        }
        if self.tick_ms == 0 {
            return Err("tick_ms must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Collaborator-side token allowance that refills continuously.
pub struct TokenBudget {
    capacity: u64,
    refill_per_second: f64,
    state: Mutex<(f64, Instant)>,
}

impl TokenBudget {
    pub fn new(capacity: u64, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
            state: Mutex::new((capacity as f64, Instant::now())),
        }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.capacity, config.refill_per_second)
    }

    pub fn is_unlimited(&self) -> bool {
        self.capacity == 0 || self.refill_per_second <= 0.0
    }

    fn refill(&self) -> f64 {
        let mut state = self.state.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.1).as_secs_f64();
        state.0 = (state.0 + elapsed * self.refill_per_second).min(self.capacity as f64);
        state.1 = now;
        state.0
    }

    /// `None` when `needed` tokens are available now; otherwise the current allowance and
    /// how long until it covers the request. Requests above capacity are clamped to it.
    pub fn shortfall(&self, needed: u64) -> Option<(u64, Duration)> {
        if self.is_unlimited() {
            return None;
        }
        let needed = needed.min(self.capacity) as f64;
        let available = self.refill();
        if available >= needed {
            return None;
        }
        let wait = Duration::from_secs_f64((needed - available) / self.refill_per_second);
        Some((available.floor() as u64, wait))
    }

    pub fn consume(&self, amount: u64) {
        if self.is_unlimited() {
            return;
        }
        self.refill();
        let mut state = self.state.lock();
        state.0 = (state.0 - amount as f64).max(0.0);
    }

    pub fn available(&self) -> u64 {
        if self.is_unlimited() {
            return u64::MAX;
        }
        self.refill().floor() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_gate(cancel: CancellationToken) -> (Arc<BudgetGate>, Arc<Mutex<Vec<BudgetState>>>) {
        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        let gate = BudgetGate::new(cancel).with_observer(Arc::new(move |event| {
            if let BudgetEvent::StateChanged(snapshot) = event {
                let mut states = sink.lock();
                if states.last() != Some(&snapshot.state) {
                    states.push(snapshot.state);
                }
            }
        }));
        (Arc::new(gate), states)
    }

    async fn wait_for_state(gate: &BudgetGate, state: BudgetState) {
        while gate.state() != state {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_runs_user_then_timer_then_normal() {
        let (gate, states) = recording_gate(CancellationToken::new());
        let started = Instant::now();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                gate.on_budget_wait(10, 400, Duration::from_millis(5000)).await?;
                gate.on_budget_resume();
                Ok::<_, GenerationError>(Instant::now())
            })
        };

        wait_for_state(&gate, BudgetState::WaitingForUser).await;
        assert_eq!(gate.snapshot().time_remaining, Duration::from_millis(5000));
        assert!(gate.resolve());

        let finished = waiter.await.unwrap().unwrap();
        assert!(finished - started >= Duration::from_millis(5000));
        assert_eq!(gate.snapshot().time_remaining, Duration::ZERO);
        assert_eq!(
            *states.lock(),
            vec![
                BudgetState::WaitingForUser,
                BudgetState::WaitingForTimer,
                BudgetState::Normal
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_resolve_is_noop() {
        let gate = Arc::new(BudgetGate::new(CancellationToken::new()));
        assert!(!gate.resolve());

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.on_budget_wait(0, 1, Duration::from_secs(1)).await })
        };
        wait_for_state(&gate, BudgetState::WaitingForUser).await;
        assert!(gate.resolve());
        assert!(!gate.resolve());
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting_for_user() {
        let cancel = CancellationToken::new();
        let gate = Arc::new(BudgetGate::new(cancel.clone()));
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.on_budget_wait(0, 100, Duration::from_secs(30)).await })
        };
        wait_for_state(&gate, BudgetState::WaitingForUser).await;

        cancel.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(GenerationError::Cancelled)));
        assert_eq!(gate.state(), BudgetState::Normal);
        assert!(!gate.resolve());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_countdown_stops_ticks() {
        let cancel = CancellationToken::new();
        let ticks = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&ticks);
        let gate = Arc::new(BudgetGate::new(cancel.clone()).with_observer(Arc::new(
            move |event| {
                if let BudgetEvent::Tick { .. } = event {
                    *counter.lock() += 1;
                }
            },
        )));
        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.on_budget_wait(0, 100, Duration::from_secs(30)).await })
        };
        wait_for_state(&gate, BudgetState::WaitingForUser).await;
        gate.resolve();
        wait_for_state(&gate, BudgetState::WaitingForTimer).await;
        tokio::time::sleep(Duration::from_millis(2500)).await;

        cancel.cancel();
        assert!(matches!(waiter.await.unwrap(), Err(GenerationError::Cancelled)));
        let after_cancel = *ticks.lock();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(*ticks.lock(), after_cancel);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_continue_skips_confirmation() {
        let gate = BudgetGate::new(CancellationToken::new()).with_auto_continue(true);
        let started = Instant::now();
        gate.on_budget_wait(0, 10, Duration::from_secs(3)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(gate.state(), BudgetState::WaitingForTimer);
        gate.on_budget_resume();
        assert_eq!(gate.state(), BudgetState::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_continue_is_visible_to_observers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let gate = BudgetGate::new(CancellationToken::new())
            .with_auto_continue(true)
            .with_observer(Arc::new(move |event| {
                if let BudgetEvent::StateChanged(snapshot) = event {
                    sink.lock().push(snapshot);
                }
            }));
        gate.on_budget_wait(1, 4, Duration::from_millis(500)).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen[0].state, BudgetState::WaitingForUser);
        assert!(seen.iter().all(|s| s.auto_continue));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_budget_shortfall_and_refill() {
        let budget = TokenBudget::new(100, 10.0);
        assert!(budget.shortfall(80).is_none());
        budget.consume(80);

        let (available, wait) = budget.shortfall(50).unwrap();
        assert_eq!(available, 20);
        assert_eq!(wait, Duration::from_secs(3));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(budget.shortfall(50).is_none());
    }

    #[test]
    fn test_unlimited_budget() {
        let budget = TokenBudget::new(0, 10.0);
        assert!(budget.is_unlimited());
        assert!(budget.shortfall(u64::MAX).is_none());
    }
}
