//! Results of generated planning steps.

use crate::crucible::director::DirectorReport;
use crate::crucible::engine::StepReport;
use crate::crucible::service::{AutoChainSummary, StepOutcome};
use crate::crucible::types::CrucibleState;
use owo_colors::OwoColorize;

/// Render an outcome, delegating the applied value to `applied`.
pub fn format_outcome<T, F>(outcome: &StepOutcome<T>, applied: F) -> String
where
    F: FnOnce(&T) -> String,
{
    match outcome {
        StepOutcome::Applied(value) => applied(value),
        StepOutcome::Cancelled => "Cancelled; nothing changed.".to_string(),
        StepOutcome::ParseFailed { stage } => format!(
            "{} the {} output had no usable tags; nothing changed. Run the command again.",
            "Not applied:".yellow(),
            stage
        ),
    }
}

pub fn format_ids(label: &str, ids: &[String]) -> String {
    if ids.is_empty() {
        return format!("No {} derived.", label);
    }
    format!("Derived {} {}: {}", ids.len(), label, ids.join(", "))
}

pub fn format_goal_list(state: &CrucibleState, new_ids: &[String]) -> String {
    let mut out = String::new();
    for goal in &state.goals {
        let marker = if goal.selected { "*" } else { " " };
        let fresh = if new_ids.contains(&goal.id) { " (new)" } else { "" };
        out.push_str(&format!("{} {:<4} {}{}\n", marker, goal.id, goal.title(), fresh));
        if let Some(stakes) = goal.stakes() {
            out.push_str(&format!("       stakes: {}\n", stakes));
        }
    }
    out.push_str("\nToggle with `crucible select <goal-id>`, then `crucible confirm`.");
    out
}

pub fn format_step_report(report: &StepReport) -> String {
    let mut out = format!("Scene {} added to {}.", report.beat_index + 1, report.goal_id);
    if !report.resolved.is_empty() {
        out.push_str(&format!("\n  resolved: {}", report.resolved.join(", ")));
    }
    if !report.opened.is_empty() {
        out.push_str(&format!("\n  opened:   {}", report.opened.join(", ")));
    }
    if !report.grounded.is_empty() {
        out.push_str(&format!("\n  ground:   {}", report.grounded.join(", ")));
    }
    if report.complete {
        out.push_str(&format!("\n{}", "Chain complete.".green()));
    } else if let Some(checkpoint) = &report.checkpoint {
        out.push_str(&format!("\nCheckpoint: {}", checkpoint));
    }
    if report.director_due {
        out.push_str(&format!(
            "\nDirector is due: `crucible director {}`.",
            report.goal_id
        ));
    }
    out
}

pub fn format_director_report(goal_id: &str, report: &DirectorReport) -> String {
    let mut lines = Vec::new();
    if report.guidance_replaced {
        lines.push(format!("Director guidance updated for {}.", goal_id));
    }
    for index in &report.tainted {
        lines.push(format!("Scene {} marked for revision.", index + 1));
    }
    if let Some(beat) = &report.rejected {
        lines.push(format!("{} {}", "Rejected last scene:".red(), beat.scene));
    }
    if lines.is_empty() {
        lines.push("Director had nothing to change.".to_string());
    }
    lines.join("\n")
}

pub fn format_auto_summary(goal_id: &str, summary: &AutoChainSummary) -> String {
    let mut out = format!(
        "Auto-chain on {}: {} scene(s), {} director run(s).",
        goal_id, summary.steps, summary.director_runs
    );
    if let Some(checkpoint) = &summary.checkpoint {
        out.push_str(&format!("\nPaused: {}", checkpoint));
    }
    out
}
