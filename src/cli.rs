//! CLI domain: parse, route, help, output, and presentation only.
//! No planning logic; the single route table dispatches to the planning service.

mod help;
mod output;
mod parse;
mod presentation;
mod route;

pub use help::{command_name, generates};
pub use output::map_error;
pub use parse::{
    Cli, Commands, ConfigCommands, ConstraintCommands, DeriveCommands, GoalCommands,
};
pub use presentation::{
    format_auto_summary, format_chain_text, format_director_report, format_goal_list,
    format_ids, format_outcome, format_section_heading, format_status_json, format_status_text,
    format_step_report,
};
pub use route::RunContext;
