//! End-to-end planning run against a scripted model
//!
//! Intent → direction → goals → building (structure, prerequisites, elements) →
//! chaining to a terminal beat → merge into the story → expansion.

use crucible::crucible::{Checkpoint, Phase, StepOutcome};
use crucible::crucible::types::ElementCategory;

use super::test_utils::{harness, text};

#[tokio::test]
async fn test_full_plan_from_intent_to_expanded_world() {
    let h = harness(
        vec![
            text("[DIRECTION] A quiet political thriller told from the palace guard."),
            text(
                "[GOAL] Stop the coup\n[STAKES] The city falls\n[TERMINAL CONDITION] The regent is arrested\n+++\n[GOAL] Win the election",
            ),
            text("[STRUCTURAL GOAL] Expose the regent\n[WHY] He leads the plot"),
            text("[PREREQUISITE] A loyal guard\n[LOAD BEARING] someone must warn the captain\n[CATEGORY] character"),
            text(
                "[CHARACTER] Kael\n[DESCRIPTION] A loyal guard.\n[SATISFIES] p1\n[PURPOSE] warns the captain\n+++\n[LOCATION] The Palace\n[DESCRIPTION] Marble halls.",
            ),
            text("[SCENE] The captain arrests the regent on the palace steps.\n[RESOLVED] R1\n[OPEN] R2: the captain learns of the plot"),
            text("[SCENE] Kael warns the captain at night.\n[RESOLVED] R2\n[TERMINAL] yes"),
            text("[EXPANSION] Kael grew up on the docks.\n+++\n[LOCATION] The Docks\n[DESCRIPTION] Wet and loud."),
        ],
        None,
    );
    let service = &h.service;
    service
        .update(|engine| engine.set_intent("A coup in a harbor city"))
        .unwrap();

    let direction = service.derive_direction().await.unwrap().applied().unwrap();
    assert!(direction.starts_with("A quiet political thriller"));

    let goal_ids = service.derive_goals().await.unwrap().applied().unwrap();
    assert_eq!(goal_ids, vec!["g1", "g2"]);
    assert_eq!(service.state().phase, Phase::Goals);

    service.update(|engine| engine.toggle_goal("g1")).unwrap();
    service
        .update(|engine| engine.confirm_goals_for_building())
        .unwrap();
    assert_eq!(service.state().phase, Phase::Building);

    let structural = service.derive_structural_goals("g1").await.unwrap();
    assert_eq!(structural, StepOutcome::Applied(vec!["sg1".to_string()]));
    let prerequisites = service.derive_prerequisites().await.unwrap().applied().unwrap();
    assert_eq!(prerequisites, vec!["p1"]);
    let elements = service.derive_elements("g1").await.unwrap().applied().unwrap();
    assert_eq!(elements, vec!["e1", "e2"]);
    assert_eq!(service.state().prerequisites[0].satisfied_by, vec!["e1"]);

    service.update(|engine| engine.begin_chaining()).unwrap();
    let state = service.state();
    let chain = state.chain("g1").unwrap();
    assert_eq!(chain.open_constraints[0].short_id, "R1");
    assert_eq!(chain.open_constraints[0].description, "The regent is arrested");

    let first = service.chain_step("g1").await.unwrap().applied().unwrap();
    assert_eq!(first.opened, vec!["R2"]);
    assert!(!first.complete);
    let second = service.chain_step("g1").await.unwrap().applied().unwrap();
    assert!(second.complete);
    assert_eq!(
        second.checkpoint,
        Some(Checkpoint::ChainComplete {
            goal_id: "g1".to_string()
        })
    );
    assert_eq!(service.state().phase, Phase::Review);

    let created = service.merge_world().unwrap();
    assert_eq!(created, 2);
    let document = h.story.document();
    let characters = &document.entries[ElementCategory::Character.field_id()];
    assert_eq!(characters[0].name, "Kael");

    let added = service.expand_element("e1").await.unwrap().applied().unwrap();
    assert_eq!(added, vec!["e3"]);
    let state = service.state();
    assert_eq!(state.phase, Phase::Merged);
    assert!(state.element("e1").unwrap().content.contains("docks"));
    assert_eq!(state.merged_elements.len(), 3);

    // Every stage made exactly one model call.
    assert_eq!(h.provider.calls().len(), 8);
}

#[tokio::test]
async fn test_beat_prompt_carries_recent_scenes_and_open_constraints() {
    let h = harness(
        vec![
            text("[GOAL] Stop the coup"),
            text("[SCENE] The regent falls.\n[RESOLVED] R1\n[OPEN] R2: who betrayed him"),
            text("[SCENE] The letter is found."),
        ],
        None,
    );
    let service = &h.service;
    service.derive_goals().await.unwrap();
    service.update(|engine| engine.toggle_goal("g1")).unwrap();
    service.update(|engine| engine.confirm_goals()).unwrap();

    service.chain_step("g1").await.unwrap();
    service.chain_step("g1").await.unwrap();

    let calls = h.provider.calls();
    let prompt: String = calls[2]
        .iter()
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    assert!(prompt.contains("The regent falls."));
    assert!(prompt.contains("R2: who betrayed him"));
}

#[tokio::test]
async fn test_parse_failure_mid_chain_keeps_beats() {
    let h = harness(
        vec![
            text("[GOAL] Stop the coup"),
            text("[SCENE] One.\n[OPEN] R2: two"),
            text("I am not sure what to write."),
        ],
        None,
    );
    let service = &h.service;
    service.derive_goals().await.unwrap();
    service.update(|engine| engine.toggle_goal("g1")).unwrap();
    service.update(|engine| engine.confirm_goals()).unwrap();
    service.chain_step("g1").await.unwrap();

    let outcome = service.chain_step("g1").await.unwrap();
    assert!(matches!(outcome, StepOutcome::ParseFailed { .. }));
    let state = service.state();
    assert_eq!(state.chain("g1").unwrap().beats.len(), 1);
    assert!(matches!(state.checkpoint, Some(Checkpoint::ParseFailure { .. })));
}
