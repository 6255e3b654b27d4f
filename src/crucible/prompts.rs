//! Message builders for every planning stage.
//!
//! Each builder reads the current planning state and returns the full message list for one
//! request. Messages are built when the request is enqueued and never rebuilt afterwards.

use super::types::{CrucibleChain, CrucibleGoal, CrucibleState, WorldElement};
use crate::provider::ChatMessage;

/// Beats of recent history shown to the chain solver and the director
const RECENT_BEATS: usize = 6;

const PROTOCOL: &str = r#"Answer only in the tagged format below. Every tag is written as [TAG NAME] followed by its content.
Do not use markdown headings. Separate multiple records with a line containing only +++."#;

fn system(role: &str) -> ChatMessage {
    ChatMessage::system(format!("{}\n\n{}", role, PROTOCOL))
}

fn premise(state: &CrucibleState) -> String {
    let mut out = format!("## Story intent\n{}\n", non_empty(&state.intent, "(none given)"));
    if let Some(direction) = &state.direction {
        out.push_str(&format!("\n## Direction\n{}\n", direction));
    }
    out
}

fn non_empty<'a>(text: &'a str, fallback: &'a str) -> &'a str {
    if text.trim().is_empty() {
        fallback
    } else {
        text
    }
}

fn goal_block(goal: &CrucibleGoal) -> String {
    format!("## Goal {}\n{}\n", goal.id, goal.text)
}

fn constraint_lines(chain: &CrucibleChain) -> String {
    let mut out = String::from("## Open constraints\n");
    if chain.open_constraints.is_empty() {
        out.push_str("(none)\n");
    }
    for c in &chain.open_constraints {
        out.push_str(&format!("- {}: {}\n", c.short_id, c.description));
    }
    out.push_str("\n## Resolved or established\n");
    if chain.resolved_constraints.is_empty() {
        out.push_str("(none)\n");
    }
    for c in &chain.resolved_constraints {
        out.push_str(&format!("- {} ({}): {}\n", c.short_id, c.status.as_str(), c.description));
    }
    out
}

fn recent_beats(chain: &CrucibleChain) -> String {
    if chain.beats.is_empty() {
        return "## Chain so far\n(no scenes yet: start from the goal itself)\n".to_string();
    }
    let start = chain.beats.len().saturating_sub(RECENT_BEATS);
    let mut out = String::from("## Chain so far (most recent last)\n");
    for (index, beat) in chain.beats.iter().enumerate().skip(start) {
        let mut flags = String::new();
        if beat.tainted {
            flags.push_str(" [tainted]");
        }
        if beat.favorited {
            flags.push_str(" [kept]");
        }
        out.push_str(&format!("Scene {}{}: {}\n", index + 1, flags, beat.scene));
    }
    out
}

fn element_lines(elements: &[&WorldElement]) -> String {
    let mut out = String::new();
    for e in elements {
        out.push_str(&format!("- [{}] {} ({}): {}\n", e.category.tag(), e.name, e.id, e.content));
    }
    out
}

pub fn direction_messages(state: &CrucibleState) -> Vec<ChatMessage> {
    vec![
        system("You are a story architect. Distill the author's intent into a single guiding direction."),
        ChatMessage::user(format!(
            r#"{premise}
Write one paragraph describing where this story should go and what makes it distinct.

[DIRECTION] <the direction>"#,
            premise = premise(state),
        )),
    ]
}

pub fn goals_messages(state: &CrucibleState) -> Vec<ChatMessage> {
    let kept: String = state.selected_goals().map(goal_block).collect();
    vec![
        system("You are a story architect. Propose structural goals a story thread can be driven toward."),
        ChatMessage::user(format!(
            r#"{premise}
{kept}
Propose 3 to 5 distinct goals{avoid}. For each goal give:

[GOAL] what must happen
[STAKES] what is lost if it does not
[THEME] the idea it tests
[TERMINAL CONDITION] the concrete state that proves the goal is reached
+++"#,
            premise = premise(state),
            kept = if kept.is_empty() {
                String::new()
            } else {
                format!("## Already chosen\n{}", kept)
            },
            avoid = if kept.is_empty() { "" } else { " that differ from those already chosen" },
        )),
    ]
}

pub fn structural_goals_messages(state: &CrucibleState, goal: &CrucibleGoal) -> Vec<ChatMessage> {
    vec![
        system("You are a story architect. Break a goal into the structural goals that carry it."),
        ChatMessage::user(format!(
            r#"{premise}
{goal}
List the structural goals this goal depends on, each with the reason it is needed.

[STRUCTURAL GOAL] the sub-goal
[WHY] why the goal needs it
+++"#,
            premise = premise(state),
            goal = goal_block(goal),
        )),
    ]
}

pub fn prerequisites_messages(state: &CrucibleState) -> Vec<ChatMessage> {
    let goals: String = state.selected_goals().map(goal_block).collect();
    vec![
        system("You are a story architect. Find the facts that must already be true for the chosen goals to work."),
        ChatMessage::user(format!(
            r#"{premise}
{goals}
List the prerequisites. CATEGORY must be one of RELATIONSHIP, SECRET, POWER, HISTORY, OBJECT, BELIEF, PLACE.

[PREREQUISITE] the fact that must be true
[LOAD BEARING] what breaks without it
[CATEGORY] one category token
+++"#,
            premise = premise(state),
            goals = goals,
        )),
    ]
}

pub fn elements_messages(state: &CrucibleState, goal: &CrucibleGoal) -> Vec<ChatMessage> {
    let mut prerequisites = String::new();
    for p in &state.prerequisites {
        prerequisites.push_str(&format!("- {} ({}): {}\n", p.id, p.category.token(), p.element));
    }
    let builder = state
        .chain(&goal.id)
        .and_then(|c| c.guidance.as_ref())
        .and_then(|g| g.builder.as_deref())
        .map(|b| format!("## Director notes for the world\n{}\n", b))
        .unwrap_or_default();
    vec![
        system("You are a world builder. Create the concrete people, places and forces a goal needs."),
        ChatMessage::user(format!(
            r#"{premise}
{goal}
## Prerequisites
{prerequisites}
{builder}
Create the world elements this goal needs. Open each element with exactly one of [CHARACTER], [LOCATION], [FACTION], [SYSTEM], [SITUATION] followed by its name.

[CHARACTER] name
[DESCRIPTION] who or what it is
[WANT] optional
[NEED] optional
[RELATIONSHIP] optional
[SATISFIES] prerequisite ids, comma separated
[PURPOSE] why this goal needs it
+++"#,
            premise = premise(state),
            goal = goal_block(goal),
            prerequisites = non_empty(&prerequisites, "(none)\n"),
            builder = builder,
        )),
    ]
}

pub fn chain_messages(state: &CrucibleState, goal: &CrucibleGoal, chain: &CrucibleChain) -> Vec<ChatMessage> {
    let elements: Vec<&WorldElement> = state
        .elements
        .iter()
        .filter(|e| e.goal_id.as_deref() == Some(goal.id.as_str()))
        .collect();
    let solver = chain
        .guidance
        .as_ref()
        .and_then(|g| g.solver.as_deref())
        .map(|s| format!("## Director notes\n{}\n", s))
        .unwrap_or_default();
    vec![
        system(
            "You are a backward-chaining story solver. Work from the goal toward the present, one scene at a time, \
             until nothing remains unexplained.",
        ),
        ChatMessage::user(format!(
            r#"{premise}
{goal}
{constraints}
{beats}
## World
{elements}
{solver}
Write the next scene. Resolve open constraints by id where the scene makes them true, open new ones for anything
the scene itself now requires, and mark as GROUND any constraint that is simply established background.
Add [TERMINAL] yes only when the chain reaches a natural starting point.

[SCENE] the scene
[RESOLVED] ids, comma separated
[OPEN] R#: a new requirement (one per line)
[GROUND] ids, comma separated
[TERMINAL] yes or no"#,
            premise = premise(state),
            goal = goal_block(goal),
            constraints = constraint_lines(chain),
            beats = recent_beats(chain),
            elements = non_empty(&element_lines(&elements), "(none yet)\n"),
            solver = solver,
        )),
    ]
}

pub fn director_messages(state: &CrucibleState, goal: &CrucibleGoal, chain: &CrucibleChain) -> Vec<ChatMessage> {
    vec![
        system("You are the story director reviewing a backward-chained plan for coherence and momentum."),
        ChatMessage::user(format!(
            r#"{premise}
{goal}
{constraints}
{beats}
Give short guidance to the solver and to the world builder. If the most recent scene breaks the plan, add [REJECT].
To flag an earlier scene for revision without removing it, add [TAINT Scene N].

[FOR SOLVER] guidance
[FOR BUILDER] guidance"#,
            premise = premise(state),
            goal = goal_block(goal),
            constraints = constraint_lines(chain),
            beats = recent_beats(chain),
        )),
    ]
}

pub fn expansion_messages(state: &CrucibleState, element: &WorldElement) -> Vec<ChatMessage> {
    vec![
        system("You are a world builder deepening one element of a finished plan."),
        ChatMessage::user(format!(
            r#"{premise}
## Element
[{tag}] {name}
{content}

Expand this element with history, texture and connections. You may introduce new elements after a +++ line,
each opened with its category tag and name.

[EXPANSION] the expansion"#,
            premise = premise(state),
            tag = element.category.tag(),
            name = element.name,
            content = element.content,
        )),
    ]
}

pub fn field_messages(field_id: &str, context: &str, instruction: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("You are a collaborative fiction writer filling in one part of a story bible."),
        ChatMessage::user(format!(
            "## Story so far\n{}\n\n## Field: {}\n{}\n\nWrite only the field content.",
            non_empty(context, "(empty)"),
            field_id,
            non_empty(instruction, "Write this field."),
        )),
    ]
}

pub fn list_messages(field_id: &str, context: &str, count: usize) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("You are a collaborative fiction writer brainstorming entries for a story bible."),
        ChatMessage::user(format!(
            "## Story so far\n{}\n\nList {} new entries for {}. One per line, each starting with \"- \". No commentary.",
            non_empty(context, "(empty)"),
            count,
            field_id,
        )),
    ]
}

pub fn brainstorm_messages(context: &str, history: &[ChatMessage], prompt: &str) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(format!(
        "You are a creative partner helping an author brainstorm.\n\n## Story so far\n{}",
        non_empty(context, "(empty)"),
    ))];
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(prompt));
    messages
}
