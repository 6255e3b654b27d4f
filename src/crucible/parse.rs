//! Tagged model output → planning records, one parser per stage.
//!
//! Parsers are pure. An output with no usable tag for its stage is a
//! [`PlanningError::ParseFailure`]; callers log it and leave the state untouched.

use super::types::{ElementCategory, PrerequisiteCategory};
use crate::error::PlanningError;
use crate::generation::tags::{parse_tag, parse_tag_all, split_sections, SECTION_SEPARATOR};
use crate::generation::target::{parse_directives, DirectorDirective};
use once_cell::sync::Lazy;
use regex::Regex;

/// `R2`, `c14`, `p3`...
static ID_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]{1,3}\d+$").expect("valid id regex"));

/// `R2: who tipped off the guard`
static OPEN_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]{1,3}\d+)\s*[:\-]\s*(.+)$").expect("valid open regex"));

/// Split a tag's content into id tokens, ignoring filler such as "none".
pub fn parse_id_list(content: &str) -> Vec<String> {
    content
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| ID_TOKEN.is_match(t))
        .map(str::to_string)
        .collect()
}

pub fn parse_direction(text: &str) -> Result<String, PlanningError> {
    parse_tag(text, "DIRECTION").ok_or_else(|| PlanningError::parse("direction", "missing [DIRECTION]"))
}

/// Raw goal blocks. Sections without a `[GOAL]` are skipped.
pub fn parse_goals(text: &str) -> Result<Vec<String>, PlanningError> {
    let goals: Vec<String> = split_sections(text, SECTION_SEPARATOR)
        .into_iter()
        .filter(|section| parse_tag(section, "GOAL").is_some())
        .collect();
    if goals.is_empty() {
        return Err(PlanningError::parse("goals", "no [GOAL] sections"));
    }
    Ok(goals)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStructuralGoal {
    pub text: String,
    pub why: Option<String>,
}

pub fn parse_structural_goals(text: &str) -> Result<Vec<ParsedStructuralGoal>, PlanningError> {
    let goals: Vec<ParsedStructuralGoal> = split_sections(text, SECTION_SEPARATOR)
        .iter()
        .filter_map(|section| {
            Some(ParsedStructuralGoal {
                text: parse_tag(section, "STRUCTURAL GOAL")?,
                why: parse_tag(section, "WHY"),
            })
        })
        .collect();
    if goals.is_empty() {
        return Err(PlanningError::parse(
            "structural goals",
            "no [STRUCTURAL GOAL] sections",
        ));
    }
    Ok(goals)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPrerequisite {
    pub element: String,
    pub load_bearing: Option<String>,
    pub category: PrerequisiteCategory,
}

pub fn parse_prerequisites(text: &str) -> Result<Vec<ParsedPrerequisite>, PlanningError> {
    let prerequisites: Vec<ParsedPrerequisite> = split_sections(text, SECTION_SEPARATOR)
        .iter()
        .filter_map(|section| {
            Some(ParsedPrerequisite {
                element: parse_tag(section, "PREREQUISITE")?,
                load_bearing: parse_tag(section, "LOAD BEARING"),
                category: parse_tag(section, "CATEGORY")
                    .map(|c| PrerequisiteCategory::from_token(&c))
                    .unwrap_or_default(),
            })
        })
        .collect();
    if prerequisites.is_empty() {
        return Err(PlanningError::parse(
            "prerequisites",
            "no [PREREQUISITE] sections",
        ));
    }
    Ok(prerequisites)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedElement {
    pub category: ElementCategory,
    pub name: String,
    pub description: String,
    pub want: Option<String>,
    pub need: Option<String>,
    pub relationship: Option<String>,
    pub satisfies: Vec<String>,
    pub purpose: Option<String>,
}

/// One element section. The category is whichever of the five element tags appears first.
fn parse_element_section(section: &str) -> Option<ParsedElement> {
    let (category, heading) = ElementCategory::ALL
        .into_iter()
        .filter_map(|category| {
            let at = section.find(&format!("[{}]", category.tag()))?;
            Some((at, category))
        })
        .min_by_key(|(at, _)| *at)
        .and_then(|(_, category)| Some((category, parse_tag(section, category.tag())?)))?;

    // The name is the heading's first line; anything after it belongs to the description.
    let mut heading_lines = heading.lines();
    let name = heading_lines.next()?.trim().to_string();
    let overflow: Vec<&str> = heading_lines.map(str::trim).filter(|l| !l.is_empty()).collect();
    let mut description = parse_tag(section, "DESCRIPTION").unwrap_or_default();
    if !overflow.is_empty() {
        if !description.is_empty() {
            description.push('\n');
        }
        description.push_str(&overflow.join("\n"));
    }

    Some(ParsedElement {
        category,
        name,
        description,
        want: parse_tag(section, "WANT"),
        need: parse_tag(section, "NEED"),
        relationship: parse_tag(section, "RELATIONSHIP"),
        satisfies: parse_tag(section, "SATISFIES")
            .map(|s| parse_id_list(&s))
            .unwrap_or_default(),
        purpose: parse_tag(section, "PURPOSE"),
    })
}

pub fn parse_elements(text: &str) -> Result<Vec<ParsedElement>, PlanningError> {
    let elements: Vec<ParsedElement> = split_sections(text, SECTION_SEPARATOR)
        .iter()
        .filter_map(|section| parse_element_section(section))
        .collect();
    if elements.is_empty() {
        return Err(PlanningError::parse("elements", "no element sections"));
    }
    Ok(elements)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedConstraint {
    /// Short id chosen by the model, if it gave one
    pub short_id: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBeat {
    pub scene: String,
    pub resolved: Vec<String>,
    pub opened: Vec<OpenedConstraint>,
    pub grounded: Vec<String>,
    pub terminal: bool,
}

fn is_negative(content: &str) -> bool {
    matches!(
        content.trim().to_ascii_lowercase().as_str(),
        "no" | "false" | "none" | "n/a"
    )
}

/// One chain step. `[SCENE]` is required; everything else is optional.
pub fn parse_chain_step(text: &str) -> Result<ParsedBeat, PlanningError> {
    let scene = parse_tag(text, "SCENE").ok_or_else(|| PlanningError::parse("chain", "missing [SCENE]"))?;

    let opened = parse_tag_all(text, "OPEN")
        .iter()
        .flat_map(|content| content.lines().map(str::trim).filter(|l| !l.is_empty()))
        .filter(|line| !is_negative(line))
        .map(|line| match OPEN_LINE.captures(line) {
            Some(caps) => OpenedConstraint {
                short_id: Some(caps[1].to_string()),
                description: caps[2].trim().to_string(),
            },
            None => OpenedConstraint {
                short_id: None,
                description: line.to_string(),
            },
        })
        .collect();

    let terminal = text.contains("[TERMINAL]")
        && parse_tag(text, "TERMINAL").map_or(true, |content| !is_negative(&content));

    Ok(ParsedBeat {
        scene,
        resolved: parse_tag_all(text, "RESOLVED")
            .iter()
            .flat_map(|c| parse_id_list(c))
            .collect(),
        opened,
        grounded: parse_tag_all(text, "GROUND")
            .iter()
            .flat_map(|c| parse_id_list(c))
            .collect(),
        terminal,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDirector {
    pub solver: Option<String>,
    pub builder: Option<String>,
    pub reject: bool,
    /// 1-based scene numbers
    pub taints: Vec<usize>,
}

impl ParsedDirector {
    pub fn has_guidance(&self) -> bool {
        self.solver.is_some() || self.builder.is_some()
    }
}

pub fn parse_director(text: &str) -> Result<ParsedDirector, PlanningError> {
    let mut parsed = ParsedDirector {
        solver: parse_tag(text, "FOR SOLVER"),
        builder: parse_tag(text, "FOR BUILDER"),
        ..ParsedDirector::default()
    };
    for line in text.lines() {
        for directive in parse_directives(line) {
            match directive {
                DirectorDirective::Reject => parsed.reject = true,
                DirectorDirective::Taint { scene } => {
                    if !parsed.taints.contains(&scene) {
                        parsed.taints.push(scene);
                    }
                }
            }
        }
    }
    if !parsed.has_guidance() && !parsed.reject && parsed.taints.is_empty() {
        return Err(PlanningError::parse("director", "no guidance or directives"));
    }
    Ok(parsed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedExpansion {
    pub text: String,
    /// New elements introduced by the expansion
    pub elements: Vec<ParsedElement>,
}

pub fn parse_expansion(text: &str) -> Result<ParsedExpansion, PlanningError> {
    let sections = split_sections(text, SECTION_SEPARATOR);
    let expansion = sections
        .iter()
        .find_map(|section| parse_tag(section, "EXPANSION"))
        .ok_or_else(|| PlanningError::parse("expansion", "missing [EXPANSION]"))?;
    let elements = sections
        .iter()
        .filter(|section| parse_tag(section, "EXPANSION").is_none())
        .filter_map(|section| parse_element_section(section))
        .collect();
    Ok(ParsedExpansion {
        text: expansion,
        elements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_chain_step() {
        let beat =
            parse_chain_step("[SCENE] Guard warns the captain [RESOLVED] R1 [OPEN] R2: who tipped off the guard")
                .unwrap();
        assert_eq!(beat.scene, "Guard warns the captain");
        assert_eq!(beat.resolved, vec!["R1"]);
        assert_eq!(
            beat.opened,
            vec![OpenedConstraint {
                short_id: Some("R2".to_string()),
                description: "who tipped off the guard".to_string(),
            }]
        );
        assert!(beat.grounded.is_empty());
        assert!(!beat.terminal);
    }

    #[test]
    fn test_chain_step_multiline_and_terminal() {
        let text = "[SCENE] The vote fails.\n[RESOLVED] R2, R3\n[OPEN]\nwho funds the guard\nR5: the missing seal\n[GROUND] R4\n[TERMINAL] yes";
        let beat = parse_chain_step(text).unwrap();
        assert_eq!(beat.resolved, vec!["R2", "R3"]);
        assert_eq!(beat.opened.len(), 2);
        assert_eq!(beat.opened[0].short_id, None);
        assert_eq!(beat.opened[1].short_id.as_deref(), Some("R5"));
        assert_eq!(beat.grounded, vec!["R4"]);
        assert!(beat.terminal);
    }

    #[test]
    fn test_negative_terminal_and_empty_lists() {
        let beat = parse_chain_step("[SCENE] x\n[RESOLVED] none\n[OPEN] none\n[TERMINAL] no").unwrap();
        assert!(beat.resolved.is_empty());
        assert!(beat.opened.is_empty());
        assert!(!beat.terminal);
        assert!(parse_chain_step("[SCENE] x\n[TERMINAL]").unwrap().terminal);
    }

    #[test]
    fn test_chain_step_without_scene_fails() {
        let err = parse_chain_step("The guard warns the captain.").unwrap_err();
        assert!(matches!(err, PlanningError::ParseFailure { stage: "chain", .. }));
    }

    #[test]
    fn test_goals_skip_sections_without_goal() {
        let text = "[GOAL] Stop the coup [STAKES] City falls\n+++\nchatter\n+++\n[GOAL] Find the heir\n[TERMINAL CONDITION] crowned";
        let goals = parse_goals(text).unwrap();
        assert_eq!(goals.len(), 2);
        assert!(goals[1].contains("Find the heir"));
        assert!(parse_goals("nothing here").is_err());
    }

    #[test]
    fn test_prerequisite_category_falls_back() {
        let text = "[PREREQUISITE] The captain owes the regent\n[LOAD BEARING] explains loyalty\n[CATEGORY] DEBT\n+++\n[PREREQUISITE] A hidden vault\n[CATEGORY] PLACE";
        let parsed = parse_prerequisites(text).unwrap();
        assert_eq!(parsed[0].category, PrerequisiteCategory::Relationship);
        assert_eq!(parsed[0].load_bearing.as_deref(), Some("explains loyalty"));
        assert_eq!(parsed[1].category, PrerequisiteCategory::Place);
    }

    #[test]
    fn test_elements() {
        let text = "[CHARACTER] Kael\n[DESCRIPTION] A disgraced guard.\n[WANT] redemption\n[NEED] trust\n[SATISFIES] p1, p2\n[PURPOSE] the informant\n+++\n[LOCATION] Salt Gate\n[DESCRIPTION] The eastern gate.";
        let parsed = parse_elements(text).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].category, ElementCategory::Character);
        assert_eq!(parsed[0].name, "Kael");
        assert_eq!(parsed[0].satisfies, vec!["p1", "p2"]);
        assert_eq!(parsed[0].purpose.as_deref(), Some("the informant"));
        assert_eq!(parsed[1].category, ElementCategory::Location);
        assert_eq!(parsed[1].want, None);
    }

    #[test]
    fn test_director() {
        let text = "[FOR SOLVER] Tighten the middle.\n[FOR BUILDER] Add a dock.\n[TAINT Scene 2]\n[REJECT]";
        let parsed = parse_director(text).unwrap();
        assert_eq!(parsed.solver.as_deref(), Some("Tighten the middle."));
        assert_eq!(parsed.builder.as_deref(), Some("Add a dock."));
        assert!(parsed.reject);
        assert_eq!(parsed.taints, vec![2]);
        assert!(parse_director("looks fine to me").is_err());
    }

    #[test]
    fn test_expansion_with_new_elements() {
        let text = "[EXPANSION] Kael grew up by the docks.\n+++\n[LOCATION] The Docks\n[DESCRIPTION] Wet.";
        let parsed = parse_expansion(text).unwrap();
        assert_eq!(parsed.text, "Kael grew up by the docks.");
        assert_eq!(parsed.elements.len(), 1);
        assert_eq!(parsed.elements[0].name, "The Docks");
    }

    #[test]
    fn test_id_list() {
        assert_eq!(parse_id_list("R1, R2;R3 and (R4)"), vec!["R1", "R2", "R3", "R4"]);
        assert!(parse_id_list("none").is_empty());
    }
}
