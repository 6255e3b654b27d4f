//! CLI presentation: text and json formatters per command family.

mod status;
mod steps;

pub use status::{format_chain_text, format_section_heading, format_status_json, format_status_text};
pub use steps::{
    format_auto_summary, format_director_report, format_goal_list, format_ids, format_outcome,
    format_step_report,
};
