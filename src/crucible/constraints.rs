//! Constraint Tracker
//!
//! Per-chain bookkeeping of what must still become true. A constraint lives in exactly one
//! of `open_constraints` or `resolved_constraints` (which also holds ground-state facts).
//! Every mutation touches only the owning chain.

use super::parse::ParsedBeat;
use super::types::{Beat, Constraint, ConstraintStatus, CrucibleChain, IdCounters};
use crate::error::PlanningError;
use std::collections::BTreeMap;
use tracing::debug;

impl CrucibleChain {
    pub fn new(goal_id: impl Into<String>) -> Self {
        Self {
            goal_id: goal_id.into(),
            beats: Vec::new(),
            open_constraints: Vec::new(),
            resolved_constraints: Vec::new(),
            complete: false,
            stale: false,
            guidance: None,
            beats_since_director: 0,
            next_short_id: 0,
        }
    }

    /// Look up by short id (`R2`) or global id (`c7`), case-insensitively.
    pub fn constraint(&self, id: &str) -> Option<&Constraint> {
        self.open_constraints
            .iter()
            .chain(self.resolved_constraints.iter())
            .find(|c| c.short_id.eq_ignore_ascii_case(id) || c.id.eq_ignore_ascii_case(id))
    }

    fn position(list: &[Constraint], id: &str) -> Option<usize> {
        list.iter()
            .position(|c| c.short_id.eq_ignore_ascii_case(id) || c.id.eq_ignore_ascii_case(id))
    }

    /// Keep the short-id counter ahead of any id already in use, including model-chosen ones.
    fn reserve_short_id(&mut self, short_id: &str) {
        let numeric = short_id
            .trim_start_matches(|c: char| c.is_ascii_alphabetic())
            .parse::<u32>()
            .unwrap_or(0);
        self.next_short_id = self.next_short_id.max(numeric);
    }

    fn allocate_short_id(&mut self) -> String {
        self.next_short_id += 1;
        format!("R{}", self.next_short_id)
    }

    /// Add an open constraint and return its short id. A requested short id already in
    /// use is replaced by a fresh one.
    pub fn open_constraint(
        &mut self,
        ids: &mut IdCounters,
        short_id: Option<&str>,
        description: &str,
        source_beat_index: Option<usize>,
    ) -> String {
        let short_id = match short_id {
            Some(requested) if self.constraint(requested).is_none() => {
                let requested = requested.to_ascii_uppercase();
                self.reserve_short_id(&requested);
                requested
            }
            _ => self.allocate_short_id(),
        };
        self.open_constraints.push(Constraint {
            id: ids.next_constraint(),
            short_id: short_id.clone(),
            description: description.trim().to_string(),
            status: ConstraintStatus::Open,
            source_beat_index,
        });
        self.complete = false;
        short_id
    }

    /// Move an open constraint to resolved.
    pub fn resolve(&mut self, id: &str, source_beat_index: Option<usize>) -> Result<(), PlanningError> {
        if let Some(existing) = self.constraint(id) {
            if existing.status == ConstraintStatus::GroundState {
                return Err(PlanningError::GroundStateLocked(existing.short_id.clone()));
            }
        }
        let Some(at) = Self::position(&self.open_constraints, id) else {
            return match self.constraint(id) {
                // Already resolved
                Some(_) => Ok(()),
                None => Err(PlanningError::UnknownConstraint(id.to_string())),
            };
        };
        let mut constraint = self.open_constraints.remove(at);
        constraint.status = ConstraintStatus::Resolved;
        constraint.source_beat_index = source_beat_index;
        self.resolved_constraints.push(constraint);
        Ok(())
    }

    /// Move a resolved constraint back to open. Ground-state constraints never re-open.
    pub fn reopen(&mut self, id: &str) -> Result<(), PlanningError> {
        let Some(at) = Self::position(&self.resolved_constraints, id) else {
            return match self.constraint(id) {
                Some(_) => Ok(()),
                None => Err(PlanningError::UnknownConstraint(id.to_string())),
            };
        };
        if self.resolved_constraints[at].status == ConstraintStatus::GroundState {
            return Err(PlanningError::GroundStateLocked(
                self.resolved_constraints[at].short_id.clone(),
            ));
        }
        let mut constraint = self.resolved_constraints.remove(at);
        constraint.status = ConstraintStatus::Open;
        constraint.source_beat_index = None;
        self.open_constraints.push(constraint);
        self.complete = false;
        Ok(())
    }

    /// Mark a constraint as a permanent background fact. Returns its previous status.
    pub fn ground(
        &mut self,
        id: &str,
        source_beat_index: Option<usize>,
    ) -> Result<ConstraintStatus, PlanningError> {
        if let Some(at) = Self::position(&self.open_constraints, id) {
            let mut constraint = self.open_constraints.remove(at);
            constraint.status = ConstraintStatus::GroundState;
            constraint.source_beat_index = source_beat_index;
            self.resolved_constraints.push(constraint);
            return Ok(ConstraintStatus::Open);
        }
        let at = Self::position(&self.resolved_constraints, id)
            .ok_or_else(|| PlanningError::UnknownConstraint(id.to_string()))?;
        let constraint = &mut self.resolved_constraints[at];
        let previous = constraint.status;
        if previous != ConstraintStatus::GroundState {
            constraint.status = ConstraintStatus::GroundState;
            constraint.source_beat_index = source_beat_index;
        }
        Ok(previous)
    }

    pub fn remove_constraint(&mut self, id: &str) -> Result<Constraint, PlanningError> {
        if let Some(at) = Self::position(&self.open_constraints, id) {
            return Ok(self.open_constraints.remove(at));
        }
        let at = Self::position(&self.resolved_constraints, id)
            .ok_or_else(|| PlanningError::UnknownConstraint(id.to_string()))?;
        Ok(self.resolved_constraints.remove(at))
    }

    /// Append a beat and apply its constraint effects. Ids the chain does not know, or
    /// that are not in a state the directive applies to, are skipped.
    pub fn apply_beat(&mut self, ids: &mut IdCounters, raw: &str, parsed: ParsedBeat) -> &Beat {
        let index = self.beats.len();
        let mut beat = Beat {
            text: raw.trim().to_string(),
            scene: parsed.scene,
            constraints_resolved: Vec::new(),
            new_open_constraints: Vec::new(),
            ground_state_constraints: Vec::new(),
            grounded_from: BTreeMap::new(),
            terminal: parsed.terminal,
            tainted: false,
            favorited: false,
        };

        for id in &parsed.resolved {
            let is_open = Self::position(&self.open_constraints, id).is_some();
            if is_open && self.resolve(id, Some(index)).is_ok() {
                if let Some(c) = self.constraint(id) {
                    beat.constraints_resolved.push(c.short_id.clone());
                }
            } else {
                debug!(goal_id = %self.goal_id, constraint = %id, "Skipping resolve of non-open constraint");
            }
        }

        for opened in &parsed.opened {
            let short_id = self.open_constraint(
                ids,
                opened.short_id.as_deref(),
                &opened.description,
                Some(index),
            );
            beat.new_open_constraints.push(short_id);
        }

        for id in &parsed.grounded {
            match self.ground(id, Some(index)) {
                Ok(ConstraintStatus::GroundState) => {}
                Ok(previous) => {
                    if let Some(c) = self.constraint(id) {
                        beat.grounded_from.insert(c.short_id.clone(), previous);
                        beat.ground_state_constraints.push(c.short_id.clone());
                    }
                }
                Err(_) => {
                    debug!(goal_id = %self.goal_id, constraint = %id, "Skipping ground of unknown constraint")
                }
            }
        }

        self.beats.push(beat);
        self.beats_since_director += 1;
        self.refresh_complete();
        &self.beats[index]
    }

    /// Pop the last beat and undo its constraint effects. `None` on an empty chain.
    pub fn pop_beat(&mut self) -> Option<Beat> {
        let beat = self.beats.pop()?;

        for short_id in beat.ground_state_constraints.iter().rev() {
            let previous = beat
                .grounded_from
                .get(short_id)
                .copied()
                .unwrap_or(ConstraintStatus::Open);
            if let Some(at) = Self::position(&self.resolved_constraints, short_id) {
                match previous {
                    ConstraintStatus::Open => {
                        let mut constraint = self.resolved_constraints.remove(at);
                        constraint.status = ConstraintStatus::Open;
                        constraint.source_beat_index = None;
                        self.open_constraints.push(constraint);
                    }
                    status => self.resolved_constraints[at].status = status,
                }
            }
        }
        // Short ids are unique within a chain, and later beats are already undone.
        for short_id in &beat.new_open_constraints {
            self.open_constraints
                .retain(|c| !c.short_id.eq_ignore_ascii_case(short_id));
            self.resolved_constraints
                .retain(|c| !c.short_id.eq_ignore_ascii_case(short_id));
        }
        for short_id in beat.constraints_resolved.iter().rev() {
            if let Some(at) = Self::position(&self.resolved_constraints, short_id) {
                if self.resolved_constraints[at].status == ConstraintStatus::Resolved {
                    let mut constraint = self.resolved_constraints.remove(at);
                    constraint.status = ConstraintStatus::Open;
                    constraint.source_beat_index = None;
                    self.open_constraints.push(constraint);
                }
            }
        }

        self.beats_since_director = self.beats_since_director.saturating_sub(1);
        self.refresh_complete();
        Some(beat)
    }

    /// Remove beats `from..` newest-first. Returns how many were removed.
    pub fn truncate_from(&mut self, from: usize) -> Result<usize, PlanningError> {
        if from >= self.beats.len() {
            return Err(PlanningError::BeatOutOfRange {
                goal_id: self.goal_id.clone(),
                index: from,
            });
        }
        let mut removed = 0;
        while self.beats.len() > from {
            self.pop_beat();
            removed += 1;
        }
        Ok(removed)
    }

    /// `complete` holds only with no open constraints and a terminal last beat.
    pub fn refresh_complete(&mut self) {
        self.complete = self.open_constraints.is_empty()
            && self.beats.last().map_or(false, |beat| beat.terminal);
    }

    pub fn beat_mut(&mut self, index: usize) -> Result<&mut Beat, PlanningError> {
        let goal_id = self.goal_id.clone();
        self.beats
            .get_mut(index)
            .ok_or(PlanningError::BeatOutOfRange { goal_id, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crucible::parse::parse_chain_step;

    fn seeded() -> (CrucibleChain, IdCounters) {
        let mut ids = IdCounters::default();
        let mut chain = CrucibleChain::new("g1");
        chain.open_constraint(&mut ids, None, "The coup is stopped", None);
        (chain, ids)
    }

    fn step(chain: &mut CrucibleChain, ids: &mut IdCounters, text: &str) {
        let parsed = parse_chain_step(text).unwrap();
        chain.apply_beat(ids, text, parsed);
    }

    #[test]
    fn test_resolve_records_source_beat() {
        let (mut chain, mut ids) = seeded();
        step(&mut chain, &mut ids, "[SCENE] a\n[RESOLVED] R1\n[OPEN] R2: why");
        let r1 = chain.constraint("R1").unwrap();
        assert_eq!(r1.status, ConstraintStatus::Resolved);
        assert_eq!(r1.source_beat_index, Some(0));
        assert_eq!(chain.open_constraints.len(), 1);
        assert!(!chain.complete);
    }

    #[test]
    fn test_reopen_resolved_but_not_ground() {
        let (mut chain, mut ids) = seeded();
        chain.open_constraint(&mut ids, None, "second", None);
        chain.resolve("R1", None).unwrap();
        chain.reopen("R1").unwrap();
        assert_eq!(chain.constraint("R1").unwrap().status, ConstraintStatus::Open);

        chain.ground("R2", None).unwrap();
        assert_eq!(
            chain.reopen("R2"),
            Err(PlanningError::GroundStateLocked("R2".to_string()))
        );
        assert_eq!(
            chain.resolve("R2", None),
            Err(PlanningError::GroundStateLocked("R2".to_string()))
        );
    }

    #[test]
    fn test_complete_requires_terminal_and_no_open() {
        let (mut chain, mut ids) = seeded();
        step(&mut chain, &mut ids, "[SCENE] a\n[RESOLVED] R1\n[OPEN] R2: x\n[TERMINAL] yes");
        assert!(!chain.complete);
        step(&mut chain, &mut ids, "[SCENE] b\n[RESOLVED] R2");
        assert!(!chain.complete);
        step(&mut chain, &mut ids, "[SCENE] c\n[TERMINAL] done");
        assert!(chain.complete);
    }

    #[test]
    fn test_pop_beat_undoes_effects() {
        let (mut chain, mut ids) = seeded();
        chain.open_constraint(&mut ids, None, "background", None);
        let before = chain.clone();
        step(&mut chain, &mut ids, "[SCENE] a\n[RESOLVED] R1\n[OPEN] R3: new\n[GROUND] R2");
        assert_eq!(chain.open_constraints.len(), 1);

        let popped = chain.pop_beat().unwrap();
        assert_eq!(popped.scene, "a");
        assert!(chain.beats.is_empty());
        let mut open: Vec<_> = chain.open_constraints.iter().map(|c| c.short_id.clone()).collect();
        open.sort();
        assert_eq!(open, vec!["R1", "R2"]);
        assert!(chain.resolved_constraints.is_empty());
        assert_eq!(chain.beats_since_director, before.beats_since_director);
        assert!(chain.pop_beat().is_none());
    }

    #[test]
    fn test_truncate_removes_suffix() {
        let (mut chain, mut ids) = seeded();
        step(&mut chain, &mut ids, "[SCENE] a\n[OPEN] R2: x");
        step(&mut chain, &mut ids, "[SCENE] b\n[RESOLVED] R2\n[OPEN] R3: y");
        step(&mut chain, &mut ids, "[SCENE] c\n[RESOLVED] R3");
        assert_eq!(chain.truncate_from(1).unwrap(), 2);
        assert_eq!(chain.beats.len(), 1);
        let open: Vec<_> = chain.open_constraints.iter().map(|c| c.short_id.as_str()).collect();
        assert_eq!(open, vec!["R1", "R2"]);
        assert!(chain.truncate_from(5).is_err());
    }

    #[test]
    fn test_duplicate_short_id_gets_fresh_id() {
        let (mut chain, mut ids) = seeded();
        let id = chain.open_constraint(&mut ids, Some("R1"), "clash", None);
        assert_eq!(id, "R2");
        let id = chain.open_constraint(&mut ids, Some("r7"), "model chose", None);
        assert_eq!(id, "R7");
        assert_eq!(chain.open_constraint(&mut ids, None, "next", None), "R8");
    }
}
