//! Generation targets
//!
//! Every request names what it generates for. The set is closed: each variant carries the
//! ids it needs, and live line handling dispatches on the variant directly.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationTarget {
    /// One free-text story field
    Field { field_id: String },
    /// A list field, filled one item per line
    List { field_id: String },
    Brainstorm,
    CrucibleDirection,
    CrucibleGoals,
    CrucibleStructuralGoals { goal_id: String },
    CruciblePrerequisites,
    CrucibleElements { goal_id: String },
    CrucibleChain { goal_id: String },
    CrucibleDirector { goal_id: String },
    CrucibleExpansion { element_id: String },
}

/// A structured record recognized on a single streamed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveRecord {
    ListItem { text: String },
    Directive { directive: DirectorDirective },
}

/// Corrective directive emitted by the director.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum DirectorDirective {
    /// Undo the most recent beat
    Reject,
    /// Flag an earlier beat; `scene` is 1-based as the model writes it
    Taint { scene: usize },
}

static TAINT_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\[TAINT\s+(?:scene\s+)?(\d+)\]").expect("valid taint regex")
});

static LIST_BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+").expect("valid bullet regex"));

/// Every directive on one line, in order of appearance.
pub fn parse_directives(line: &str) -> Vec<DirectorDirective> {
    let mut found: Vec<(usize, DirectorDirective)> = TAINT_MARKER
        .captures_iter(line)
        .filter_map(|caps| {
            let at = caps.get(0)?.start();
            let scene = caps[1].parse().ok()?;
            Some((at, DirectorDirective::Taint { scene }))
        })
        .collect();
    let mut cursor = 0;
    while let Some(offset) = line[cursor..].find("[REJECT]") {
        found.push((cursor + offset, DirectorDirective::Reject));
        cursor += offset + "[REJECT]".len();
    }
    found.sort_by_key(|(at, _)| *at);
    found.into_iter().map(|(_, d)| d).collect()
}

/// Strip a list bullet or ordinal. Lines that are empty after stripping, or that are
/// tag lines rather than items, are not list items.
pub fn parse_list_item(line: &str) -> Option<String> {
    let item = LIST_BULLET.replace(line, "");
    let item = item.trim();
    if item.is_empty() || item.starts_with('[') {
        return None;
    }
    Some(item.to_string())
}

impl GenerationTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationTarget::Field { .. } => "field",
            GenerationTarget::List { .. } => "list",
            GenerationTarget::Brainstorm => "brainstorm",
            GenerationTarget::CrucibleDirection => "crucible_direction",
            GenerationTarget::CrucibleGoals => "crucible_goals",
            GenerationTarget::CrucibleStructuralGoals { .. } => "crucible_structural_goals",
            GenerationTarget::CruciblePrerequisites => "crucible_prerequisites",
            GenerationTarget::CrucibleElements { .. } => "crucible_elements",
            GenerationTarget::CrucibleChain { .. } => "crucible_chain",
            GenerationTarget::CrucibleDirector { .. } => "crucible_director",
            GenerationTarget::CrucibleExpansion { .. } => "crucible_expansion",
        }
    }

    /// The goal a Crucible request works on, if any.
    pub fn goal_id(&self) -> Option<&str> {
        match self {
            GenerationTarget::CrucibleStructuralGoals { goal_id }
            | GenerationTarget::CrucibleElements { goal_id }
            | GenerationTarget::CrucibleChain { goal_id }
            | GenerationTarget::CrucibleDirector { goal_id } => Some(goal_id),
            _ => None,
        }
    }

    pub fn is_crucible(&self) -> bool {
        self.kind().starts_with("crucible_")
    }

    /// Records this target recognizes on one complete line while the stream is running.
    pub fn parse_live_line(&self, line: &str) -> Vec<LiveRecord> {
        match self {
            GenerationTarget::List { .. } => parse_list_item(line)
                .map(|text| LiveRecord::ListItem { text })
                .into_iter()
                .collect(),
            GenerationTarget::CrucibleDirector { .. } => parse_directives(line)
                .into_iter()
                .map(|directive| LiveRecord::Directive { directive })
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for GenerationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationTarget::Field { field_id } | GenerationTarget::List { field_id } => {
                write!(f, "{}:{}", self.kind(), field_id)
            }
            GenerationTarget::CrucibleExpansion { element_id } => {
                write!(f, "{}:{}", self.kind(), element_id)
            }
            other => match other.goal_id() {
                Some(goal_id) => write!(f, "{}:{}", other.kind(), goal_id),
                None => f.write_str(other.kind()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_target_yields_items() {
        let target = GenerationTarget::List {
            field_id: "factions".to_string(),
        };
        assert_eq!(
            target.parse_live_line("- The Iron Court"),
            vec![LiveRecord::ListItem {
                text: "The Iron Court".to_string()
            }]
        );
        assert_eq!(
            target.parse_live_line("2) Salt Guild"),
            vec![LiveRecord::ListItem {
                text: "Salt Guild".to_string()
            }]
        );
        assert!(target.parse_live_line("   ").is_empty());
        assert!(target.parse_live_line("[CATEGORY] x").is_empty());
    }

    #[test]
    fn test_director_target_yields_directives_in_order() {
        let target = GenerationTarget::CrucibleDirector {
            goal_id: "g1".to_string(),
        };
        assert_eq!(
            target.parse_live_line("[TAINT Scene 2] and then [REJECT]"),
            vec![
                LiveRecord::Directive {
                    directive: DirectorDirective::Taint { scene: 2 }
                },
                LiveRecord::Directive {
                    directive: DirectorDirective::Reject
                },
            ]
        );
        assert!(target.parse_live_line("[FOR SOLVER] slow down").is_empty());
    }

    #[test]
    fn test_other_targets_ignore_lines() {
        let target = GenerationTarget::CrucibleChain {
            goal_id: "g1".to_string(),
        };
        assert!(target.parse_live_line("- not a list here").is_empty());
        assert_eq!(target.goal_id(), Some("g1"));
        assert!(target.is_crucible());
        assert!(!GenerationTarget::Brainstorm.is_crucible());
    }

    #[test]
    fn test_display() {
        let target = GenerationTarget::CrucibleChain {
            goal_id: "g2".to_string(),
        };
        assert_eq!(target.to_string(), "crucible_chain:g2");
        assert_eq!(GenerationTarget::CrucibleGoals.to_string(), "crucible_goals");
    }
}
