//! Generation orchestration: the tag codec, line buffering, the budget-wait suspend point,
//! sessions, and the single-flight queue that runs them.

pub mod budget;
pub mod client;
pub mod queue;
pub mod session;
pub mod stream;
pub mod tags;
pub mod target;

pub use budget::{BudgetConfig, BudgetGate, BudgetHooks, BudgetSnapshot, BudgetState, TokenBudget};
pub use client::{GenerateCall, GenerationClient, ProviderGenerator};
pub use queue::{
    ActiveRequest, GenerationConfig, GenerationQueue, Priority, QueueStats, RequestId,
    RequestStatus,
};
pub use session::{run_suspendable, GenerationSession, SessionEvent, SessionOutput};
pub use stream::{LineBuffer, LineConsumer};
pub use target::{DirectorDirective, GenerationTarget, LiveRecord};
