//! Planning data model.
//!
//! Every record here is plain data: it serializes as-is into the persisted planning state.
//! Sessions, cancellation tokens and resolvers never appear in these types.

use crate::generation::tags::parse_tag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Planning phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Goals,
    Building,
    Chaining,
    Review,
    Merged,
    Expanding,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Goals => "goals",
            Phase::Building => "building",
            Phase::Chaining => "chaining",
            Phase::Review => "review",
            Phase::Merged => "merged",
            Phase::Expanding => "expanding",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate goal. `text` is the raw tagged block and is the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrucibleGoal {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub selected: bool,
}

impl CrucibleGoal {
    pub fn goal(&self) -> Option<String> {
        parse_tag(&self.text, "GOAL")
    }

    pub fn stakes(&self) -> Option<String> {
        parse_tag(&self.text, "STAKES")
    }

    pub fn theme(&self) -> Option<String> {
        parse_tag(&self.text, "THEME")
    }

    pub fn terminal_condition(&self) -> Option<String> {
        parse_tag(&self.text, "TERMINAL CONDITION")
    }

    /// Short label for listings.
    pub fn title(&self) -> String {
        self.goal().unwrap_or_else(|| self.text.lines().next().unwrap_or("").to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralGoal {
    pub id: String,
    pub source_goal_id: String,
    pub text: String,
    #[serde(default)]
    pub why: Option<String>,
    #[serde(default)]
    pub stale: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrerequisiteCategory {
    #[default]
    Relationship,
    Secret,
    Power,
    History,
    Object,
    Belief,
    Place,
}

impl PrerequisiteCategory {
    pub const ALL: [PrerequisiteCategory; 7] = [
        PrerequisiteCategory::Relationship,
        PrerequisiteCategory::Secret,
        PrerequisiteCategory::Power,
        PrerequisiteCategory::History,
        PrerequisiteCategory::Object,
        PrerequisiteCategory::Belief,
        PrerequisiteCategory::Place,
    ];

    pub fn token(self) -> &'static str {
        match self {
            PrerequisiteCategory::Relationship => "RELATIONSHIP",
            PrerequisiteCategory::Secret => "SECRET",
            PrerequisiteCategory::Power => "POWER",
            PrerequisiteCategory::History => "HISTORY",
            PrerequisiteCategory::Object => "OBJECT",
            PrerequisiteCategory::Belief => "BELIEF",
            PrerequisiteCategory::Place => "PLACE",
        }
    }

    /// Exact token match; anything else falls back to `RELATIONSHIP`.
    pub fn from_token(token: &str) -> Self {
        let token = token.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.token() == token)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prerequisite {
    pub id: String,
    pub element: String,
    #[serde(default)]
    pub load_bearing: Option<String>,
    #[serde(default)]
    pub category: PrerequisiteCategory,
    /// Element ids that satisfy this prerequisite
    #[serde(default)]
    pub satisfied_by: Vec<String>,
}

/// The five fixed world-element categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementCategory {
    Character,
    Location,
    Faction,
    System,
    Situation,
}

impl ElementCategory {
    pub const ALL: [ElementCategory; 5] = [
        ElementCategory::Character,
        ElementCategory::Location,
        ElementCategory::Faction,
        ElementCategory::System,
        ElementCategory::Situation,
    ];

    /// Wire tag that opens an element section
    pub fn tag(self) -> &'static str {
        match self {
            ElementCategory::Character => "CHARACTER",
            ElementCategory::Location => "LOCATION",
            ElementCategory::Faction => "FACTION",
            ElementCategory::System => "SYSTEM",
            ElementCategory::Situation => "SITUATION",
        }
    }

    /// Story field the category's entries belong to
    pub fn field_id(self) -> &'static str {
        match self {
            ElementCategory::Character => "characters",
            ElementCategory::Location => "locations",
            ElementCategory::Faction => "factions",
            ElementCategory::System => "systems",
            ElementCategory::Situation => "situations",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }
}

impl fmt::Display for ElementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldElement {
    pub id: String,
    pub category: ElementCategory,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub want: Option<String>,
    #[serde(default)]
    pub need: Option<String>,
    #[serde(default)]
    pub relationship: Option<String>,
    /// Prerequisite ids this element resolves
    #[serde(default)]
    pub satisfies: Vec<String>,
    /// Goal the element was derived for
    #[serde(default)]
    pub goal_id: Option<String>,
    /// Why the goal needs this element
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub stale: bool,
}

/// A deduplicated element ready for the story collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedElement {
    pub category: ElementCategory,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub want: Option<String>,
    #[serde(default)]
    pub need: Option<String>,
    #[serde(default)]
    pub relationship: Option<String>,
    #[serde(default)]
    pub satisfies: Vec<String>,
    /// goal id → rationale, one entry per goal that referenced this name
    #[serde(default)]
    pub goal_purposes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintStatus {
    Open,
    Resolved,
    GroundState,
}

impl ConstraintStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConstraintStatus::Open => "open",
            ConstraintStatus::Resolved => "resolved",
            ConstraintStatus::GroundState => "ground",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// Globally unique id
    pub id: String,
    /// Id the model uses inside one chain (`R1`, `R2`, ...)
    pub short_id: String,
    pub description: String,
    pub status: ConstraintStatus,
    /// Beat that last changed the status; `None` for seeded and manual constraints
    #[serde(default)]
    pub source_beat_index: Option<usize>,
}

/// One backward-chained unit of progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beat {
    /// Raw tagged block as generated
    pub text: String,
    pub scene: String,
    #[serde(default)]
    pub constraints_resolved: Vec<String>,
    #[serde(default)]
    pub new_open_constraints: Vec<String>,
    #[serde(default)]
    pub ground_state_constraints: Vec<String>,
    /// Status each grounded constraint had before this beat
    #[serde(default)]
    pub grounded_from: BTreeMap<String, ConstraintStatus>,
    #[serde(default)]
    pub terminal: bool,
    #[serde(default)]
    pub tainted: bool,
    #[serde(default)]
    pub favorited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorGuidance {
    #[serde(default)]
    pub solver: Option<String>,
    #[serde(default)]
    pub builder: Option<String>,
    /// Beat count when the guidance was given
    pub at_beat_index: usize,
}

/// Per-goal planning progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrucibleChain {
    pub goal_id: String,
    #[serde(default)]
    pub beats: Vec<Beat>,
    #[serde(default)]
    pub open_constraints: Vec<Constraint>,
    /// Resolved and ground-state constraints
    #[serde(default)]
    pub resolved_constraints: Vec<Constraint>,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub stale: bool,
    #[serde(default)]
    pub guidance: Option<DirectorGuidance>,
    /// Beats appended since the director last ran
    #[serde(default)]
    pub beats_since_director: usize,
    #[serde(default)]
    pub(crate) next_short_id: u32,
}

/// Why auto-chaining paused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Checkpoint {
    ChainComplete { goal_id: String },
    DirectorRejected { goal_id: String },
    OpenConstraintLimit { goal_id: String, open: usize },
    BeatLimit { goal_id: String, beats: usize },
    ParseFailure { stage: String },
    Stopped { goal_id: String },
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checkpoint::ChainComplete { goal_id } => write!(f, "chain {} complete", goal_id),
            Checkpoint::DirectorRejected { goal_id } => {
                write!(f, "director rejected the last beat of {}", goal_id)
            }
            Checkpoint::OpenConstraintLimit { goal_id, open } => {
                write!(f, "{} has {} open constraints", goal_id, open)
            }
            Checkpoint::BeatLimit { goal_id, beats } => {
                write!(f, "{} reached {} beats", goal_id, beats)
            }
            Checkpoint::ParseFailure { stage } => write!(f, "unparseable {} output", stage),
            Checkpoint::Stopped { goal_id } => write!(f, "auto-chain stopped on {}", goal_id),
        }
    }
}

/// Deterministic id counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdCounters {
    pub goal: u32,
    pub structural: u32,
    pub prerequisite: u32,
    pub element: u32,
    pub constraint: u32,
}

impl IdCounters {
    fn bump(counter: &mut u32, prefix: &str) -> String {
        *counter += 1;
        format!("{}{}", prefix, counter)
    }

    pub fn next_goal(&mut self) -> String {
        Self::bump(&mut self.goal, "g")
    }

    pub fn next_structural(&mut self) -> String {
        Self::bump(&mut self.structural, "sg")
    }

    pub fn next_prerequisite(&mut self) -> String {
        Self::bump(&mut self.prerequisite, "p")
    }

    pub fn next_element(&mut self) -> String {
        Self::bump(&mut self.element, "e")
    }

    pub fn next_constraint(&mut self) -> String {
        Self::bump(&mut self.constraint, "c")
    }
}

/// The complete persisted planning state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrucibleState {
    pub phase: Phase,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub goals: Vec<CrucibleGoal>,
    #[serde(default)]
    pub structural_goals: Vec<StructuralGoal>,
    #[serde(default)]
    pub prerequisites: Vec<Prerequisite>,
    #[serde(default)]
    pub elements: Vec<WorldElement>,
    /// Keyed by goal id
    #[serde(default)]
    pub chains: BTreeMap<String, CrucibleChain>,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub merged_elements: Vec<MergedElement>,
    /// Element currently being expanded
    #[serde(default)]
    pub expanding: Option<String>,
    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,
    #[serde(default)]
    pub ids: IdCounters,
}

impl CrucibleState {
    pub fn goal(&self, goal_id: &str) -> Option<&CrucibleGoal> {
        self.goals.iter().find(|g| g.id == goal_id)
    }

    pub fn element(&self, element_id: &str) -> Option<&WorldElement> {
        self.elements.iter().find(|e| e.id == element_id)
    }

    pub fn selected_goals(&self) -> impl Iterator<Item = &CrucibleGoal> {
        self.goals.iter().filter(|g| g.selected)
    }

    pub fn chain(&self, goal_id: &str) -> Option<&CrucibleChain> {
        self.chains.get(goal_id)
    }
}
