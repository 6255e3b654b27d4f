//! Planning state on disk: resume after restart, corrupt files, reset.

use crucible::crucible::{ChainConfig, CrucibleService, JsonFileStore, Phase, StateStore};
use crucible::error::{ApiError, StorageError};
use crucible::story::{JsonStorySink, StoryDataSink};
use std::sync::Arc;
use tempfile::TempDir;

use super::test_utils::{harness, scripted_queue, text};

fn resume(store: Arc<JsonFileStore>, temp: &TempDir) -> Result<CrucibleService, ApiError> {
    let (queue, _) = scripted_queue(vec![]);
    let story = Arc::new(JsonStorySink::new(temp.path().join("story.json")));
    CrucibleService::resume(ChainConfig::default(), queue, story, store)
}

#[tokio::test]
async fn test_state_survives_restart() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::new(temp.path().join(".crucible/state.json")));
    let h = harness(
        vec![
            text("[GOAL] Stop the coup\n+++\n[GOAL] Win the election"),
            text("[SCENE] The regent falls.\n[OPEN] R2: who betrayed him"),
        ],
        Some(store.clone()),
    );
    h.service
        .update(|engine| engine.set_intent("A coup in a harbor city"))
        .unwrap();
    h.service.derive_goals().await.unwrap();
    h.service.update(|engine| engine.toggle_goal("g2")).unwrap();
    h.service.update(|engine| engine.confirm_goals()).unwrap();
    h.service.chain_step("g2").await.unwrap();
    let before = h.service.state();

    let resumed = resume(store, &temp).unwrap();
    let after = resumed.state();
    assert_eq!(after, before);
    assert_eq!(after.phase, Phase::Chaining);
    assert_eq!(after.chain("g2").unwrap().beats.len(), 1);

    // Ids continue where the first run stopped.
    let added = resumed
        .update(|engine| engine.add_constraint("g2", "who paid the guard"))
        .unwrap();
    assert_eq!(added, "R3");
}

#[test]
fn test_corrupt_state_file_is_reported() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state.json");
    std::fs::write(&path, "{ not json").unwrap();
    let store = Arc::new(JsonFileStore::new(&path));

    match resume(store, &temp) {
        Err(ApiError::Storage(StorageError::Corrupt { path: reported, .. })) => {
            assert_eq!(reported, path)
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("corrupt state file was accepted"),
    }
}

#[test]
fn test_reset_removes_state_file() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::new(temp.path().join("state.json")));
    let service = resume(store.clone(), &temp).unwrap();
    service
        .update(|engine| engine.set_intent("Something"))
        .unwrap();
    assert!(store.path().exists());

    service.reset().unwrap();
    assert!(!store.path().exists());
    assert!(store.load().unwrap().is_none());
    assert_eq!(service.state().phase, Phase::Idle);
}

#[test]
fn test_story_file_written_by_field_sink() {
    let temp = TempDir::new().unwrap();
    let sink = JsonStorySink::new(temp.path().join("nested/story.json"));
    sink.write_field("logline", "A guard saves the city.").unwrap();
    sink.append_list_items("themes", &["loyalty".to_string()]).unwrap();

    let reopened = JsonStorySink::new(temp.path().join("nested/story.json"));
    let context = reopened.context().unwrap();
    assert!(context.contains("A guard saves the city."));
    assert!(context.contains("- loyalty"));
}
