//! Planning State Machine
//!
//! `idle → goals → building|chaining → review → merged ⇄ expanding`, with `reset` back to
//! idle from anywhere. The engine is the single writer of every planning collection: it is
//! driven by completed generation output and by explicit user actions, never by a stream
//! in progress. Output that does not parse leaves the state exactly as it was.

use super::director::{self, DirectorReport};
use super::merge::merge_elements;
use super::parse::{self, ParsedElement};
use super::types::{
    Checkpoint, CrucibleChain, CrucibleGoal, CrucibleState, MergedElement, Phase, Prerequisite,
    StructuralGoal, WorldElement,
};
use crate::error::PlanningError;
use crate::generation::tags::parse_tag;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Chain pacing and checkpoint limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Run the director after this many beats. Zero disables it.
    #[serde(default = "default_director_interval")]
    pub director_interval: usize,
    #[serde(default = "default_max_beats")]
    pub max_beats: usize,
    #[serde(default = "default_max_open_constraints")]
    pub max_open_constraints: usize,
    /// Pause between automatic steps
    #[serde(default = "default_auto_chain_delay_ms")]
    pub auto_chain_delay_ms: u64,
}

fn default_director_interval() -> usize {
    3
}

fn default_max_beats() -> usize {
    40
}

fn default_max_open_constraints() -> usize {
    12
}

fn default_auto_chain_delay_ms() -> u64 {
    250
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            director_interval: default_director_interval(),
            max_beats: default_max_beats(),
            max_open_constraints: default_max_open_constraints(),
            auto_chain_delay_ms: default_auto_chain_delay_ms(),
        }
    }
}

impl ChainConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_beats == 0 {
            return Err("max_beats must be at least 1".to_string());
        }
        if self.max_open_constraints == 0 {
            return Err("max_open_constraints must be at least 1".to_string());
        }
        Ok(())
    }
}

/// What one applied chain step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub goal_id: String,
    pub beat_index: usize,
    pub resolved: Vec<String>,
    pub opened: Vec<String>,
    pub grounded: Vec<String>,
    pub complete: bool,
    pub director_due: bool,
    pub checkpoint: Option<Checkpoint>,
}

pub struct CrucibleEngine {
    state: CrucibleState,
    config: ChainConfig,
}

impl CrucibleEngine {
    pub fn new(config: ChainConfig) -> Self {
        Self::from_state(CrucibleState::default(), config)
    }

    /// Resume from persisted state.
    pub fn from_state(state: CrucibleState, config: ChainConfig) -> Self {
        Self { state, config }
    }

    pub fn state(&self) -> &CrucibleState {
        &self.state
    }

    pub fn snapshot(&self) -> CrucibleState {
        self.state.clone()
    }

    pub fn restore(&mut self, state: CrucibleState) {
        info!(phase = %state.phase, goals = state.goals.len(), "Restoring planning state");
        self.state = state;
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    fn require_phase(&self, allowed: &[Phase]) -> Result<(), PlanningError> {
        if allowed.contains(&self.state.phase) {
            return Ok(());
        }
        Err(PlanningError::InvalidPhase {
            expected: allowed
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join("|"),
            actual: self.state.phase.to_string(),
        })
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.state.phase != phase {
            info!(from = %self.state.phase, to = %phase, "Planning phase changed");
            self.state.phase = phase;
        }
    }

    fn goal_index(&self, goal_id: &str) -> Result<usize, PlanningError> {
        self.state
            .goals
            .iter()
            .position(|g| g.id == goal_id)
            .ok_or_else(|| PlanningError::UnknownGoal(goal_id.to_string()))
    }

    fn chain_mut(&mut self, goal_id: &str) -> Result<&mut CrucibleChain, PlanningError> {
        self.state
            .chains
            .get_mut(goal_id)
            .ok_or_else(|| PlanningError::UnknownGoal(goal_id.to_string()))
    }

    pub fn set_checkpoint(&mut self, checkpoint: Checkpoint) {
        info!(checkpoint = %checkpoint, "Checkpoint raised");
        self.state.checkpoint = Some(checkpoint);
    }

    pub fn clear_checkpoint(&mut self) {
        self.state.checkpoint = None;
    }

    /// Discard every derived entity and return to idle.
    pub fn reset(&mut self) {
        info!(from = %self.state.phase, "Resetting planning state");
        self.state = CrucibleState::default();
    }

    // ----- direction and goals -----

    pub fn set_intent(&mut self, intent: &str) -> Result<(), PlanningError> {
        self.require_phase(&[Phase::Idle, Phase::Goals])?;
        self.state.intent = intent.trim().to_string();
        Ok(())
    }

    pub fn apply_direction_output(&mut self, text: &str) -> Result<String, PlanningError> {
        self.require_phase(&[Phase::Idle, Phase::Goals])?;
        let direction = parse::parse_direction(text)?;
        self.state.direction = Some(direction.clone());
        Ok(direction)
    }

    /// Replace unselected goals with newly derived ones; selected goals survive
    /// re-derivation. Returns the new goal ids.
    pub fn apply_goals_output(&mut self, text: &str) -> Result<Vec<String>, PlanningError> {
        self.require_phase(&[Phase::Idle, Phase::Goals])?;
        let blocks = parse::parse_goals(text)?;

        let dropped: Vec<String> = self
            .state
            .goals
            .iter()
            .filter(|g| !g.selected)
            .map(|g| g.id.clone())
            .collect();
        for goal_id in &dropped {
            self.drop_goal_dependents(goal_id);
        }
        self.state.goals.retain(|g| g.selected);

        let mut ids = Vec::with_capacity(blocks.len());
        for text in blocks {
            let id = self.state.ids.next_goal();
            self.state.goals.push(CrucibleGoal {
                id: id.clone(),
                text,
                selected: false,
            });
            ids.push(id);
        }
        info!(derived = ids.len(), kept = self.state.goals.len() - ids.len(), "Goals derived");
        self.set_phase(Phase::Goals);
        Ok(ids)
    }

    pub fn add_goal(&mut self, text: &str) -> Result<String, PlanningError> {
        self.require_phase(&[Phase::Idle, Phase::Goals, Phase::Building])?;
        if parse_tag(text, "GOAL").is_none() {
            return Err(PlanningError::parse("goal", "missing [GOAL]"));
        }
        let id = self.state.ids.next_goal();
        self.state.goals.push(CrucibleGoal {
            id: id.clone(),
            text: text.trim().to_string(),
            selected: false,
        });
        if self.state.phase == Phase::Idle {
            self.set_phase(Phase::Goals);
        }
        Ok(id)
    }

    /// Replace a goal's text. Direct dependents (its structural goals and chain) become
    /// stale; nothing further down is touched.
    pub fn edit_goal(&mut self, goal_id: &str, text: &str) -> Result<(), PlanningError> {
        if parse_tag(text, "GOAL").is_none() {
            return Err(PlanningError::parse("goal", "edited goal has no [GOAL]"));
        }
        let at = self.goal_index(goal_id)?;
        self.state.goals[at].text = text.trim().to_string();

        for structural in self
            .state
            .structural_goals
            .iter_mut()
            .filter(|s| s.source_goal_id == goal_id)
        {
            structural.stale = true;
        }
        if let Some(chain) = self.state.chains.get_mut(goal_id) {
            chain.stale = true;
        }
        debug!(goal_id, "Goal edited, direct dependents marked stale");
        Ok(())
    }

    pub fn remove_goal(&mut self, goal_id: &str) -> Result<CrucibleGoal, PlanningError> {
        self.require_phase(&[Phase::Goals, Phase::Building, Phase::Chaining, Phase::Review])?;
        let at = self.goal_index(goal_id)?;
        let goal = self.state.goals.remove(at);
        self.drop_goal_dependents(goal_id);
        self.sync_review_phase();
        Ok(goal)
    }

    fn drop_goal_dependents(&mut self, goal_id: &str) {
        self.state
            .structural_goals
            .retain(|s| s.source_goal_id != goal_id);
        self.state.chains.remove(goal_id);
        let removed: HashSet<String> = self
            .state
            .elements
            .iter()
            .filter(|e| e.goal_id.as_deref() == Some(goal_id))
            .map(|e| e.id.clone())
            .collect();
        self.state.elements.retain(|e| !removed.contains(&e.id));
        for prerequisite in &mut self.state.prerequisites {
            prerequisite.satisfied_by.retain(|id| !removed.contains(id));
        }
    }

    /// Flip a goal's selection. Returns the new value.
    pub fn toggle_goal(&mut self, goal_id: &str) -> Result<bool, PlanningError> {
        self.require_phase(&[Phase::Goals, Phase::Building])?;
        let at = self.goal_index(goal_id)?;
        let goal = &mut self.state.goals[at];
        goal.selected = !goal.selected;
        Ok(goal.selected)
    }

    /// Selected goals → chaining.
    pub fn confirm_goals(&mut self) -> Result<Vec<String>, PlanningError> {
        self.require_phase(&[Phase::Goals, Phase::Building])?;
        self.open_chains()
    }

    /// Selected goals → building, to derive structure before chaining.
    pub fn confirm_goals_for_building(&mut self) -> Result<Vec<String>, PlanningError> {
        self.require_phase(&[Phase::Goals])?;
        let selected = self.selected_goal_ids()?;
        self.set_phase(Phase::Building);
        Ok(selected)
    }

    pub fn begin_chaining(&mut self) -> Result<Vec<String>, PlanningError> {
        self.require_phase(&[Phase::Building])?;
        self.open_chains()
    }

    fn selected_goal_ids(&self) -> Result<Vec<String>, PlanningError> {
        let selected: Vec<String> = self.state.selected_goals().map(|g| g.id.clone()).collect();
        if selected.is_empty() {
            return Err(PlanningError::NoGoalsSelected);
        }
        Ok(selected)
    }

    /// Open a chain for each selected goal, seeded with the goal itself as the first open
    /// constraint. Existing chains are kept.
    fn open_chains(&mut self) -> Result<Vec<String>, PlanningError> {
        let selected = self.selected_goal_ids()?;
        for goal_id in &selected {
            if self.state.chains.contains_key(goal_id) {
                continue;
            }
            let Some(goal) = self.state.goal(goal_id) else {
                continue;
            };
            let seed = goal
                .terminal_condition()
                .or_else(|| goal.goal())
                .unwrap_or_else(|| goal.title());
            let mut chain = CrucibleChain::new(goal_id.clone());
            chain.open_constraint(&mut self.state.ids, None, &seed, None);
            self.state.chains.insert(goal_id.clone(), chain);
        }
        self.state
            .chains
            .retain(|goal_id, _| selected.contains(goal_id));
        self.set_phase(Phase::Chaining);
        Ok(selected)
    }

    // ----- structure derivation -----

    pub fn apply_structural_goals_output(
        &mut self,
        goal_id: &str,
        text: &str,
    ) -> Result<Vec<String>, PlanningError> {
        self.require_phase(&[Phase::Building, Phase::Chaining])?;
        self.goal_index(goal_id)?;
        let parsed = parse::parse_structural_goals(text)?;

        self.state
            .structural_goals
            .retain(|s| s.source_goal_id != goal_id);
        let mut ids = Vec::with_capacity(parsed.len());
        for item in parsed {
            let id = self.state.ids.next_structural();
            self.state.structural_goals.push(StructuralGoal {
                id: id.clone(),
                source_goal_id: goal_id.to_string(),
                text: item.text,
                why: item.why,
                stale: false,
            });
            ids.push(id);
        }
        if let Some(chain) = self.state.chains.get_mut(goal_id) {
            chain.stale = false;
        }
        Ok(ids)
    }

    /// Replace all prerequisites. Satisfaction links are rebuilt from element `satisfies`
    /// lists, which name prerequisites by position-stable id.
    pub fn apply_prerequisites_output(&mut self, text: &str) -> Result<Vec<String>, PlanningError> {
        self.require_phase(&[Phase::Building, Phase::Chaining])?;
        let parsed = parse::parse_prerequisites(text)?;

        self.state.prerequisites.clear();
        let mut ids = Vec::with_capacity(parsed.len());
        for item in parsed {
            let id = self.state.ids.next_prerequisite();
            self.state.prerequisites.push(Prerequisite {
                id: id.clone(),
                element: item.element,
                load_bearing: item.load_bearing,
                category: item.category,
                satisfied_by: Vec::new(),
            });
            ids.push(id);
        }
        self.relink_prerequisites();
        Ok(ids)
    }

    /// Edit a prerequisite's text. Elements that satisfy it become stale.
    pub fn edit_prerequisite(&mut self, prerequisite_id: &str, element: &str) -> Result<(), PlanningError> {
        let prerequisite = self
            .state
            .prerequisites
            .iter_mut()
            .find(|p| p.id == prerequisite_id)
            .ok_or_else(|| PlanningError::UnknownPrerequisite(prerequisite_id.to_string()))?;
        prerequisite.element = element.trim().to_string();
        for item in self
            .state
            .elements
            .iter_mut()
            .filter(|e| e.satisfies.iter().any(|p| p == prerequisite_id))
        {
            item.stale = true;
        }
        Ok(())
    }

    fn relink_prerequisites(&mut self) {
        for prerequisite in &mut self.state.prerequisites {
            prerequisite.satisfied_by = self
                .state
                .elements
                .iter()
                .filter(|e| e.satisfies.contains(&prerequisite.id))
                .map(|e| e.id.clone())
                .collect();
        }
    }

    fn push_element(&mut self, goal_id: Option<&str>, parsed: ParsedElement) -> String {
        let id = self.state.ids.next_element();
        self.state.elements.push(WorldElement {
            id: id.clone(),
            category: parsed.category,
            name: parsed.name,
            content: parsed.description,
            want: parsed.want,
            need: parsed.need,
            relationship: parsed.relationship,
            satisfies: parsed.satisfies,
            goal_id: goal_id.map(str::to_string),
            purpose: parsed.purpose,
            stale: false,
        });
        id
    }

    /// Replace the elements derived for `goal_id`.
    pub fn apply_elements_output(&mut self, goal_id: &str, text: &str) -> Result<Vec<String>, PlanningError> {
        self.require_phase(&[Phase::Building, Phase::Chaining, Phase::Review])?;
        self.goal_index(goal_id)?;
        let parsed = parse::parse_elements(text)?;

        self.state
            .elements
            .retain(|e| e.goal_id.as_deref() != Some(goal_id));
        let ids: Vec<String> = parsed
            .into_iter()
            .map(|element| self.push_element(Some(goal_id), element))
            .collect();
        self.relink_prerequisites();
        Ok(ids)
    }

    // ----- chaining -----

    /// Check that `goal_id`'s chain can take another beat. A complete chain refuses until a
    /// constraint is reopened or its tail truncated.
    pub fn ensure_steppable(&self, goal_id: &str) -> Result<(), PlanningError> {
        self.require_phase(&[Phase::Chaining])?;
        let chain = self
            .state
            .chain(goal_id)
            .ok_or_else(|| PlanningError::UnknownGoal(goal_id.to_string()))?;
        if chain.complete {
            return Err(PlanningError::ChainComplete(goal_id.to_string()));
        }
        Ok(())
    }

    /// Append one beat to `goal_id`'s chain.
    pub fn apply_chain_output(&mut self, goal_id: &str, text: &str) -> Result<StepReport, PlanningError> {
        self.ensure_steppable(goal_id)?;
        let parsed = match parse::parse_chain_step(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(goal_id, error = %e, "Chain output not applied");
                return Err(e);
            }
        };
        let director_interval = self.config.director_interval;
        let max_open = self.config.max_open_constraints;
        let max_beats = self.config.max_beats;

        let state = &mut self.state;
        let chain = state
            .chains
            .get_mut(goal_id)
            .ok_or_else(|| PlanningError::UnknownGoal(goal_id.to_string()))?;
        let beat_index = chain.beats.len();
        let (resolved, opened, grounded) = {
            let beat = chain.apply_beat(&mut state.ids, text, parsed);
            (
                beat.constraints_resolved.clone(),
                beat.new_open_constraints.clone(),
                beat.ground_state_constraints.clone(),
            )
        };
        let mut report = StepReport {
            goal_id: goal_id.to_string(),
            beat_index,
            resolved,
            opened,
            grounded,
            complete: chain.complete,
            director_due: director::is_due(chain, director_interval),
            checkpoint: None,
        };

        report.checkpoint = if chain.complete {
            Some(Checkpoint::ChainComplete {
                goal_id: goal_id.to_string(),
            })
        } else if chain.open_constraints.len() > max_open {
            Some(Checkpoint::OpenConstraintLimit {
                goal_id: goal_id.to_string(),
                open: chain.open_constraints.len(),
            })
        } else if chain.beats.len() >= max_beats {
            Some(Checkpoint::BeatLimit {
                goal_id: goal_id.to_string(),
                beats: chain.beats.len(),
            })
        } else {
            None
        };

        info!(
            goal_id,
            beat_index,
            resolved = report.resolved.len(),
            opened = report.opened.len(),
            open_total = chain.open_constraints.len(),
            complete = report.complete,
            "Beat appended"
        );
        if let Some(checkpoint) = report.checkpoint.clone() {
            self.set_checkpoint(checkpoint);
        }
        self.sync_review_phase();
        Ok(report)
    }

    pub fn director_due(&self, goal_id: &str) -> bool {
        self.state
            .chain(goal_id)
            .map_or(false, |chain| director::is_due(chain, self.config.director_interval))
    }

    pub fn apply_director_output(&mut self, goal_id: &str, text: &str) -> Result<DirectorReport, PlanningError> {
        self.require_phase(&[Phase::Chaining, Phase::Review])?;
        let parsed = match parse::parse_director(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(goal_id, error = %e, "Director output not applied");
                return Err(e);
            }
        };
        let chain = self.chain_mut(goal_id)?;
        let report = director::apply_director(chain, parsed);
        if report.rejected.is_some() {
            self.set_checkpoint(Checkpoint::DirectorRejected {
                goal_id: goal_id.to_string(),
            });
        }
        self.sync_review_phase();
        Ok(report)
    }

    /// Chaining ⇄ review, following whether every chain is complete.
    fn sync_review_phase(&mut self) {
        if !matches!(self.state.phase, Phase::Chaining | Phase::Review) {
            return;
        }
        let all_complete =
            !self.state.chains.is_empty() && self.state.chains.values().all(|c| c.complete);
        self.set_phase(if all_complete {
            Phase::Review
        } else {
            Phase::Chaining
        });
    }

    // ----- manual constraint and beat edits -----

    pub fn add_constraint(&mut self, goal_id: &str, description: &str) -> Result<String, PlanningError> {
        let state = &mut self.state;
        let chain = state
            .chains
            .get_mut(goal_id)
            .ok_or_else(|| PlanningError::UnknownGoal(goal_id.to_string()))?;
        let short_id = chain.open_constraint(&mut state.ids, None, description, None);
        chain.refresh_complete();
        self.sync_review_phase();
        Ok(short_id)
    }

    pub fn resolve_constraint(&mut self, goal_id: &str, constraint_id: &str) -> Result<(), PlanningError> {
        let chain = self.chain_mut(goal_id)?;
        chain.resolve(constraint_id, None)?;
        chain.refresh_complete();
        self.sync_review_phase();
        Ok(())
    }

    pub fn reopen_constraint(&mut self, goal_id: &str, constraint_id: &str) -> Result<(), PlanningError> {
        let chain = self.chain_mut(goal_id)?;
        chain.reopen(constraint_id)?;
        chain.refresh_complete();
        self.sync_review_phase();
        Ok(())
    }

    pub fn ground_constraint(&mut self, goal_id: &str, constraint_id: &str) -> Result<(), PlanningError> {
        let chain = self.chain_mut(goal_id)?;
        chain.ground(constraint_id, None)?;
        chain.refresh_complete();
        self.sync_review_phase();
        Ok(())
    }

    pub fn remove_constraint(&mut self, goal_id: &str, constraint_id: &str) -> Result<(), PlanningError> {
        let chain = self.chain_mut(goal_id)?;
        chain.remove_constraint(constraint_id)?;
        chain.refresh_complete();
        self.sync_review_phase();
        Ok(())
    }

    /// Delete beats `from..` of a chain, newest first.
    pub fn truncate_from(&mut self, goal_id: &str, from: usize) -> Result<usize, PlanningError> {
        self.require_phase(&[Phase::Chaining, Phase::Review])?;
        let removed = self.chain_mut(goal_id)?.truncate_from(from)?;
        info!(goal_id, from, removed, "Chain truncated");
        self.sync_review_phase();
        Ok(removed)
    }

    pub fn toggle_favorite(&mut self, goal_id: &str, index: usize) -> Result<bool, PlanningError> {
        let beat = self.chain_mut(goal_id)?.beat_mut(index)?;
        beat.favorited = !beat.favorited;
        Ok(beat.favorited)
    }

    pub fn set_tainted(&mut self, goal_id: &str, index: usize, tainted: bool) -> Result<(), PlanningError> {
        self.chain_mut(goal_id)?.beat_mut(index)?.tainted = tainted;
        Ok(())
    }

    // ----- merge and expansion -----

    fn remerge(&mut self) {
        let completed: HashSet<&String> = self
            .state
            .chains
            .iter()
            .filter(|(_, chain)| chain.complete)
            .map(|(goal_id, _)| goal_id)
            .collect();
        let merged = merge_elements(&self.state.elements, |e| {
            e.goal_id.as_ref().map_or(true, |g| completed.contains(g))
        });
        self.state.merged_elements = merged;
    }

    /// Review → merged. Deduplicates elements of every completed goal.
    pub fn merge_world(&mut self) -> Result<&[MergedElement], PlanningError> {
        self.require_phase(&[Phase::Review])?;
        self.remerge();
        self.state.merged = true;
        info!(
            elements = self.state.elements.len(),
            merged = self.state.merged_elements.len(),
            "World merged"
        );
        self.set_phase(Phase::Merged);
        Ok(&self.state.merged_elements)
    }

    pub fn begin_expansion(&mut self, element_id: &str) -> Result<&WorldElement, PlanningError> {
        self.require_phase(&[Phase::Merged])?;
        if self.state.element(element_id).is_none() {
            return Err(PlanningError::UnknownElement(element_id.to_string()));
        }
        self.state.expanding = Some(element_id.to_string());
        self.set_phase(Phase::Expanding);
        self.state
            .element(element_id)
            .ok_or_else(|| PlanningError::UnknownElement(element_id.to_string()))
    }

    /// Append expansion text to the element and add any new elements it introduces.
    /// Returns the ids of the new elements.
    pub fn apply_expansion_output(&mut self, text: &str) -> Result<Vec<String>, PlanningError> {
        self.require_phase(&[Phase::Expanding])?;
        let element_id = self
            .state
            .expanding
            .clone()
            .ok_or_else(|| PlanningError::UnknownElement("<none>".to_string()))?;
        let parsed = parse::parse_expansion(text)?;

        let element = self
            .state
            .elements
            .iter_mut()
            .find(|e| e.id == element_id)
            .ok_or_else(|| PlanningError::UnknownElement(element_id.clone()))?;
        if !element.content.is_empty() {
            element.content.push_str("\n\n");
        }
        element.content.push_str(&parsed.text);
        let goal_id = element.goal_id.clone();
        let parent = element.name.clone();

        let mut added = Vec::new();
        for mut new_element in parsed.elements {
            if new_element.purpose.is_none() {
                new_element.purpose = Some(format!("expands {}", parent));
            }
            added.push(self.push_element(goal_id.as_deref(), new_element));
        }
        self.relink_prerequisites();
        self.remerge();
        self.state.expanding = None;
        self.set_phase(Phase::Merged);
        Ok(added)
    }

    pub fn cancel_expansion(&mut self) -> Result<(), PlanningError> {
        self.require_phase(&[Phase::Expanding])?;
        self.state.expanding = None;
        self.set_phase(Phase::Merged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crucible::types::ConstraintStatus;

    const GOAL: &str = "[GOAL] Stop the coup [STAKES] City falls [THEME] loyalty";

    fn chaining_engine() -> (CrucibleEngine, String) {
        let mut engine = CrucibleEngine::new(ChainConfig::default());
        let ids = engine.apply_goals_output(GOAL).unwrap();
        engine.toggle_goal(&ids[0]).unwrap();
        engine.confirm_goals().unwrap();
        (engine, ids[0].clone())
    }

    #[test]
    fn test_example_scenario() {
        let (mut engine, goal_id) = chaining_engine();
        assert_eq!(engine.phase(), Phase::Chaining);
        assert_eq!(
            engine.state().chain(&goal_id).unwrap().open_constraints[0].short_id,
            "R1"
        );

        let report = engine
            .apply_chain_output(
                &goal_id,
                "[SCENE] Guard warns the captain [RESOLVED] R1 [OPEN] R2: who tipped off the guard",
            )
            .unwrap();
        assert_eq!(report.beat_index, 0);
        assert_eq!(report.resolved, vec!["R1"]);
        assert_eq!(report.opened, vec!["R2"]);

        let chain = engine.state().chain(&goal_id).unwrap();
        assert_eq!(chain.beats.len(), 1);
        assert_eq!(chain.resolved_constraints[0].short_id, "R1");
        assert_eq!(chain.resolved_constraints[0].source_beat_index, Some(0));
        assert_eq!(chain.open_constraints[0].short_id, "R2");
        assert!(!chain.complete);
    }

    #[test]
    fn test_confirm_requires_selection() {
        let mut engine = CrucibleEngine::new(ChainConfig::default());
        engine.apply_goals_output(GOAL).unwrap();
        assert_eq!(engine.confirm_goals(), Err(PlanningError::NoGoalsSelected));
        assert_eq!(engine.phase(), Phase::Goals);
    }

    #[test]
    fn test_parse_failure_leaves_state_untouched() {
        let (mut engine, goal_id) = chaining_engine();
        let before = engine.snapshot();
        assert!(engine.apply_chain_output(&goal_id, "no tags at all").is_err());
        assert_eq!(engine.snapshot(), before);
        assert!(engine.apply_goals_output("no goals").is_err());
    }

    #[test]
    fn test_phase_gates() {
        let mut engine = CrucibleEngine::new(ChainConfig::default());
        let err = engine.apply_chain_output("g1", "[SCENE] x").unwrap_err();
        assert!(matches!(err, PlanningError::InvalidPhase { .. }));
        assert!(engine.merge_world().is_err());
    }

    #[test]
    fn test_completion_moves_to_review_and_reopen_returns() {
        let (mut engine, goal_id) = chaining_engine();
        let report = engine
            .apply_chain_output(&goal_id, "[SCENE] The vote fails [RESOLVED] R1 [TERMINAL] yes")
            .unwrap();
        assert!(report.complete);
        assert_eq!(
            report.checkpoint,
            Some(Checkpoint::ChainComplete {
                goal_id: goal_id.clone()
            })
        );
        assert_eq!(engine.phase(), Phase::Review);

        engine.reopen_constraint(&goal_id, "R1").unwrap();
        assert_eq!(engine.phase(), Phase::Chaining);
        assert!(!engine.state().chain(&goal_id).unwrap().complete);
    }

    #[test]
    fn test_complete_chain_refuses_more_beats() {
        let mut engine = CrucibleEngine::new(ChainConfig::default());
        let ids = engine
            .apply_goals_output("[GOAL] Stop the coup\n+++\n[GOAL] Save the heir")
            .unwrap();
        engine.toggle_goal(&ids[0]).unwrap();
        engine.toggle_goal(&ids[1]).unwrap();
        engine.confirm_goals().unwrap();
        engine
            .apply_chain_output(&ids[0], "[SCENE] end [RESOLVED] R1 [TERMINAL] yes")
            .unwrap();
        // The other goal keeps the plan in Chaining.
        assert_eq!(engine.phase(), Phase::Chaining);

        let before = engine.snapshot();
        assert_eq!(
            engine.ensure_steppable(&ids[0]),
            Err(PlanningError::ChainComplete(ids[0].clone()))
        );
        let err = engine
            .apply_chain_output(&ids[0], "[SCENE] after [OPEN] R9: loose end")
            .unwrap_err();
        assert_eq!(err, PlanningError::ChainComplete(ids[0].clone()));
        assert_eq!(engine.snapshot(), before);
        assert!(engine.ensure_steppable(&ids[1]).is_ok());
    }

    #[test]
    fn test_director_due_every_three_beats() {
        let (mut engine, goal_id) = chaining_engine();
        for i in 0..2 {
            let report = engine
                .apply_chain_output(&goal_id, &format!("[SCENE] s{}\n[OPEN] more {}", i, i))
                .unwrap();
            assert!(!report.director_due);
        }
        let report = engine.apply_chain_output(&goal_id, "[SCENE] s2").unwrap();
        assert!(report.director_due);
        engine
            .apply_director_output(&goal_id, "[FOR SOLVER] converge")
            .unwrap();
        assert!(!engine.director_due(&goal_id));
    }

    #[test]
    fn test_director_reject_leaves_review() {
        let (mut engine, goal_id) = chaining_engine();
        engine
            .apply_chain_output(&goal_id, "[SCENE] end [RESOLVED] R1 [TERMINAL] yes")
            .unwrap();
        assert_eq!(engine.phase(), Phase::Review);
        let report = engine.apply_director_output(&goal_id, "[REJECT]").unwrap();
        assert!(report.rejected.is_some());
        assert_eq!(engine.phase(), Phase::Chaining);
        let chain = engine.state().chain(&goal_id).unwrap();
        assert_eq!(chain.open_constraints[0].status, ConstraintStatus::Open);
        assert_eq!(
            engine.state().checkpoint,
            Some(Checkpoint::DirectorRejected { goal_id })
        );
    }

    #[test]
    fn test_open_constraint_limit_checkpoint() {
        let mut engine = CrucibleEngine::new(ChainConfig {
            max_open_constraints: 2,
            ..ChainConfig::default()
        });
        let ids = engine.apply_goals_output(GOAL).unwrap();
        engine.toggle_goal(&ids[0]).unwrap();
        engine.confirm_goals().unwrap();
        let report = engine
            .apply_chain_output(&ids[0], "[SCENE] x\n[OPEN] a\n[OPEN] b")
            .unwrap();
        assert!(matches!(
            report.checkpoint,
            Some(Checkpoint::OpenConstraintLimit { open: 3, .. })
        ));
    }

    #[test]
    fn test_edit_goal_marks_direct_dependents_stale() {
        let mut engine = CrucibleEngine::new(ChainConfig::default());
        let ids = engine.apply_goals_output(GOAL).unwrap();
        let goal_id = ids[0].clone();
        engine.toggle_goal(&goal_id).unwrap();
        engine.confirm_goals_for_building().unwrap();
        engine
            .apply_structural_goals_output(&goal_id, "[STRUCTURAL GOAL] Expose the regent [WHY] he leads it")
            .unwrap();
        engine
            .apply_elements_output(&goal_id, "[CHARACTER] Kael\n[DESCRIPTION] guard")
            .unwrap();

        assert!(engine.edit_goal(&goal_id, "no tag").is_err());
        engine
            .edit_goal(&goal_id, "[GOAL] Stop the coup quietly")
            .unwrap();
        assert!(engine.state().structural_goals[0].stale);
        // Elements hang off the goal only through derivation and are not marked.
        assert!(!engine.state().elements[0].stale);
    }

    #[test]
    fn test_rederiving_goals_keeps_selected() {
        let mut engine = CrucibleEngine::new(ChainConfig::default());
        let first = engine.apply_goals_output("[GOAL] a\n+++\n[GOAL] b").unwrap();
        engine.toggle_goal(&first[1]).unwrap();
        let second = engine.apply_goals_output("[GOAL] c").unwrap();
        let ids: Vec<_> = engine.state().goals.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec![first[1].as_str(), second[0].as_str()]);
        assert_eq!(second[0], "g3");
    }

    #[test]
    fn test_merge_and_expand() {
        let (mut engine, goal_id) = chaining_engine();
        engine
            .apply_elements_output(&goal_id, "[CHARACTER] Kael\n[DESCRIPTION] A guard.\n[PURPOSE] informant")
            .unwrap();
        engine
            .apply_chain_output(&goal_id, "[SCENE] end [RESOLVED] R1 [TERMINAL] yes")
            .unwrap();
        let merged = engine.merge_world().unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(engine.phase(), Phase::Merged);

        let element_id = engine.state().elements[0].id.clone();
        engine.begin_expansion(&element_id).unwrap();
        assert_eq!(engine.phase(), Phase::Expanding);
        let added = engine
            .apply_expansion_output("[EXPANSION] Raised on the docks.\n+++\n[LOCATION] The Docks\n[DESCRIPTION] Wet.")
            .unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(engine.phase(), Phase::Merged);
        assert!(engine.state().elements[0].content.ends_with("Raised on the docks."));
        assert_eq!(engine.state().merged_elements.len(), 2);
        assert!(engine.state().merged_elements[0].content.contains("docks"));
    }

    #[test]
    fn test_reset_discards_everything() {
        let (mut engine, _) = chaining_engine();
        engine.reset();
        assert_eq!(engine.snapshot(), CrucibleState::default());
    }
}
