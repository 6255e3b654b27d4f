//! Crucible: budget-aware streaming generation and backward-chaining story planning
//!
//! Every model call goes through one single-flight queue whose sessions stream, parse
//! tagged output line by line, and can suspend for a token budget to refill. The Crucible
//! planner drives that queue to work backwards from chosen story goals to the world
//! those goals need.

pub mod cli;
pub mod config;
pub mod crucible;
pub mod error;
pub mod generation;
pub mod logging;
pub mod provider;
pub mod story;
