//! Director review through the service: taints, rejection and guidance.

use crucible::crucible::{Checkpoint, ConstraintStatus, Phase};

use super::test_utils::{harness, text};

#[tokio::test]
async fn test_taint_then_reject_rolls_back_last_beat() {
    let h = harness(
        vec![
            text("[GOAL] Stop the coup"),
            text("[SCENE] The regent falls.\n[OPEN] R2: who betrayed him"),
            text("[SCENE] A letter surfaces.\n[OPEN] R3: who wrote it"),
            text("[TAINT Scene 1]\n[REJECT]\n[FOR SOLVER] slow down and stay with the guard"),
        ],
        None,
    );
    let service = &h.service;
    service.derive_goals().await.unwrap();
    service.update(|engine| engine.toggle_goal("g1")).unwrap();
    service.update(|engine| engine.confirm_goals()).unwrap();
    service.chain_step("g1").await.unwrap();
    service.chain_step("g1").await.unwrap();

    let report = service.run_director("g1").await.unwrap().applied().unwrap();
    assert!(report.guidance_replaced);
    assert_eq!(report.tainted, vec![0]);
    assert_eq!(report.rejected.unwrap().scene, "A letter surfaces.");

    let state = service.state();
    let chain = state.chain("g1").unwrap();
    assert_eq!(chain.beats.len(), 1);
    assert!(chain.beats[0].tainted);
    let open: Vec<&str> = chain
        .open_constraints
        .iter()
        .map(|c| c.short_id.as_str())
        .collect();
    assert!(open.contains(&"R2"));
    assert!(!open.contains(&"R3"));
    assert_eq!(
        chain.guidance.as_ref().and_then(|g| g.solver.as_deref()),
        Some("slow down and stay with the guard")
    );
    assert_eq!(
        state.checkpoint,
        Some(Checkpoint::DirectorRejected {
            goal_id: "g1".to_string()
        })
    );
}

#[tokio::test]
async fn test_reject_of_terminal_beat_returns_to_chaining() {
    let h = harness(
        vec![
            text("[GOAL] Stop the coup"),
            text("[SCENE] The vote fails.\n[RESOLVED] R1\n[TERMINAL] yes"),
            text("[REJECT]"),
        ],
        None,
    );
    let service = &h.service;
    service.derive_goals().await.unwrap();
    service.update(|engine| engine.toggle_goal("g1")).unwrap();
    service.update(|engine| engine.confirm_goals()).unwrap();
    service.chain_step("g1").await.unwrap();
    assert_eq!(service.state().phase, Phase::Review);

    service.run_director("g1").await.unwrap();
    let state = service.state();
    assert_eq!(state.phase, Phase::Chaining);
    let chain = state.chain("g1").unwrap();
    assert!(chain.beats.is_empty());
    assert!(!chain.complete);
    assert_eq!(chain.open_constraints[0].short_id, "R1");
    assert_eq!(chain.open_constraints[0].status, ConstraintStatus::Open);
}

#[tokio::test]
async fn test_director_without_directives_changes_nothing() {
    let h = harness(
        vec![
            text("[GOAL] Stop the coup"),
            text("[SCENE] The regent falls.\n[OPEN] R2: why"),
            text("Looks fine to me."),
        ],
        None,
    );
    let service = &h.service;
    service.derive_goals().await.unwrap();
    service.update(|engine| engine.toggle_goal("g1")).unwrap();
    service.update(|engine| engine.confirm_goals()).unwrap();
    service.chain_step("g1").await.unwrap();
    let before = service.state().chain("g1").cloned();

    let outcome = service.run_director("g1").await.unwrap();
    assert!(!outcome.is_applied());
    assert_eq!(service.state().chain("g1").cloned(), before);
}
