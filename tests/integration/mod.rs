//! Integration tests for the Crucible generation orchestrator and planner

mod budget_wait;
mod chain_scenario;
mod config_integration;
mod director_rollback;
mod persistence;
mod queue_single_flight;
mod test_utils;
