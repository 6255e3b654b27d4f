//! Plan status: text via comfy-table with styled headings, or the raw state as json.

use crate::crucible::types::{ConstraintStatus, CrucibleChain, CrucibleState, Phase};
use crate::error::{ApiError, PlanningError};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;

/// Format a section heading with bold/underline.
pub fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn truncate(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let cut: String = flat.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut)
}

fn chain_summary(chain: Option<&CrucibleChain>) -> (String, String, String) {
    match chain {
        None => ("-".to_string(), "-".to_string(), "-".to_string()),
        Some(chain) => {
            let state = if chain.complete {
                format!("{}", "complete".green())
            } else if chain.stale {
                format!("{}", "stale".yellow())
            } else {
                "open".to_string()
            };
            (
                chain.beats.len().to_string(),
                chain.open_constraints.len().to_string(),
                state,
            )
        }
    }
}

pub fn format_status_text(state: &CrucibleState) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading("Plan")));
    out.push_str(&format!("  Phase: {}\n", state.phase.bold()));
    if !state.intent.is_empty() {
        out.push_str(&format!("  Intent: {}\n", truncate(&state.intent, 100)));
    }
    if let Some(direction) = &state.direction {
        out.push_str(&format!("  Direction: {}\n", truncate(direction, 100)));
    }
    if let Some(checkpoint) = &state.checkpoint {
        out.push_str(&format!("  Checkpoint: {}\n", checkpoint.yellow()));
    }
    if state.phase == Phase::Idle && state.goals.is_empty() {
        out.push_str("\nRun `crucible goals derive` to propose goals.\n");
        return out;
    }

    if !state.goals.is_empty() {
        out.push_str(&format!("\n{}\n\n", format_section_heading("Goals")));
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["Goal", "Selected", "Title", "Scenes", "Open", "Chain"]);
        for goal in &state.goals {
            let (beats, open, chain_state) = chain_summary(state.chain(&goal.id));
            table.add_row(vec![
                goal.id.clone(),
                if goal.selected { "yes" } else { "no" }.to_string(),
                truncate(&goal.title(), 60),
                beats,
                open,
                chain_state,
            ]);
        }
        out.push_str(&format!("{}\n", table));
    }

    if !state.structural_goals.is_empty() {
        out.push_str(&format!("\n{}\n\n", format_section_heading("Structural goals")));
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["Id", "Goal", "Text", "Stale"]);
        for structural in &state.structural_goals {
            table.add_row(vec![
                structural.id.clone(),
                structural.source_goal_id.clone(),
                truncate(&structural.text, 70),
                if structural.stale { "yes" } else { "" }.to_string(),
            ]);
        }
        out.push_str(&format!("{}\n", table));
    }

    if !state.prerequisites.is_empty() {
        out.push_str(&format!("\n{}\n\n", format_section_heading("Prerequisites")));
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["Id", "Category", "Prerequisite", "Satisfied by"]);
        for prerequisite in &state.prerequisites {
            table.add_row(vec![
                prerequisite.id.clone(),
                prerequisite.category.token().to_string(),
                truncate(&prerequisite.element, 60),
                prerequisite.satisfied_by.join(", "),
            ]);
        }
        out.push_str(&format!("{}\n", table));
    }

    if !state.elements.is_empty() {
        out.push_str(&format!("\n{}\n\n", format_section_heading("World elements")));
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["Id", "Category", "Name", "Goal", "Stale"]);
        for element in &state.elements {
            table.add_row(vec![
                element.id.clone(),
                element.category.to_string(),
                element.name.clone(),
                element.goal_id.clone().unwrap_or_else(|| "-".to_string()),
                if element.stale { "yes" } else { "" }.to_string(),
            ]);
        }
        out.push_str(&format!("{}\n", table));
    }

    if state.merged {
        out.push_str(&format!(
            "\n  Merged: {} unique element(s)\n",
            state.merged_elements.len()
        ));
    }
    out
}

/// One chain in detail: scenes newest last, then constraints.
pub fn format_chain_text(state: &CrucibleState, goal_id: &str) -> Result<String, ApiError> {
    let goal = state
        .goal(goal_id)
        .ok_or_else(|| PlanningError::UnknownGoal(goal_id.to_string()))?;
    let chain = state
        .chain(goal_id)
        .ok_or_else(|| PlanningError::UnknownGoal(goal_id.to_string()))?;

    let mut out = format!("{}\n\n", format_section_heading(&format!("Chain {}", goal_id)));
    out.push_str(&format!("  Goal: {}\n", goal.title()));
    if let Some(guidance) = &chain.guidance {
        if let Some(solver) = &guidance.solver {
            out.push_str(&format!("  Director (solver): {}\n", truncate(solver, 100)));
        }
        if let Some(builder) = &guidance.builder {
            out.push_str(&format!("  Director (builder): {}\n", truncate(builder, 100)));
        }
    }

    let mut scenes = Table::new();
    scenes.load_preset(UTF8_BORDERS_ONLY);
    scenes.set_header(vec!["Scene", "Text", "Resolved", "Opened", "Flags"]);
    for (index, beat) in chain.beats.iter().enumerate() {
        let mut flags = Vec::new();
        if beat.terminal {
            flags.push("terminal");
        }
        if beat.tainted {
            flags.push("tainted");
        }
        if beat.favorited {
            flags.push("favorite");
        }
        scenes.add_row(vec![
            (index + 1).to_string(),
            truncate(&beat.scene, 60),
            beat.constraints_resolved.join(", "),
            beat.new_open_constraints.join(", "),
            flags.join(" "),
        ]);
    }
    out.push_str(&format!("\n{}\n", scenes));

    let mut constraints = Table::new();
    constraints.load_preset(UTF8_BORDERS_ONLY);
    constraints.set_header(vec!["Id", "Status", "Description"]);
    for constraint in chain
        .open_constraints
        .iter()
        .chain(chain.resolved_constraints.iter())
    {
        let status = match constraint.status {
            ConstraintStatus::Open => format!("{}", "open".red()),
            ConstraintStatus::Resolved => format!("{}", "resolved".green()),
            ConstraintStatus::GroundState => format!("{}", "ground".blue()),
        };
        constraints.add_row(vec![
            constraint.short_id.clone(),
            status,
            truncate(&constraint.description, 70),
        ]);
    }
    out.push_str(&format!("\n{}\n", constraints));
    Ok(out)
}

pub fn format_status_json(state: &CrucibleState) -> Result<String, ApiError> {
    Ok(serde_json::to_string_pretty(state)?)
}
