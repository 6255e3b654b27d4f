//! Crucible: backward-chaining narrative planner.
//!
//! Goals are chosen first, then each chain works backwards from its goal one scene at a
//! time, tracking which requirements are still open. A director reviews the chains
//! periodically, and completed chains are merged into a deduplicated world.

pub mod constraints;
pub mod director;
pub mod engine;
pub mod merge;
pub mod parse;
pub mod persist;
pub mod prompts;
pub mod service;
pub mod types;

pub use director::DirectorReport;
pub use engine::{ChainConfig, CrucibleEngine, StepReport};
pub use persist::{JsonFileStore, MemoryStore, StateStore};
pub use service::{AutoChainSummary, CrucibleService, StepOutcome};
pub use types::{
    Beat, Checkpoint, Constraint, ConstraintStatus, CrucibleChain, CrucibleGoal, CrucibleState,
    ElementCategory, MergedElement, Phase, Prerequisite, PrerequisiteCategory, StructuralGoal,
    WorldElement,
};
