//! Integration tests for layered configuration loading

use crucible::config::{ConfigLoader, CrucibleConfig, ProviderType, ValidationError};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_workspace_file_overrides_defaults() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("crucible.toml"),
        r#"
[provider]
provider_type = "openai"
model = "gpt-4o-mini"
api_key = "sk-test"

[chain]
director_interval = 5

[budget]
capacity = 2000
refill_per_second = 25.0
"#,
    )
    .unwrap();

    let config = ConfigLoader::load(temp.path()).unwrap();
    assert_eq!(config.provider.provider_type, ProviderType::OpenAI);
    assert_eq!(config.provider.model, "gpt-4o-mini");
    assert_eq!(config.chain.director_interval, 5);
    assert_eq!(config.chain.max_beats, CrucibleConfig::default().chain.max_beats);
    assert_eq!(config.budget.capacity, 2000);
    assert!(config.validate().is_ok());
    assert_eq!(config.state_path, temp.path().join(".crucible/state.json"));
}

#[test]
fn test_explicit_file_roots_paths_at_its_directory() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("plan.toml");
    fs::write(&path, "story_path = \"out/story.json\"\n").unwrap();

    let config = ConfigLoader::load_from_file(&path).unwrap();
    assert_eq!(config.story_path, temp.path().join("out/story.json"));
    assert_eq!(config.provider.provider_type, ProviderType::Ollama);
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let temp = TempDir::new().unwrap();
    assert!(ConfigLoader::load_from_file(&temp.path().join("absent.toml")).is_err());
}

#[test]
fn test_invalid_values_are_collected() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("crucible.toml"),
        r#"
[generation]
max_queue_size = 0

[budget]
capacity = 100
refill_per_second = 0.0
"#,
    )
    .unwrap();

    let config = ConfigLoader::load(temp.path()).unwrap();
    let errors = config.validate().unwrap_err();
    assert!(errors
        .iter()
        .any(|e| matches!(e, ValidationError::Generation(_))));
    assert!(errors.iter().any(|e| matches!(e, ValidationError::Budget(_))));
    assert!(config.ensure_valid().is_err());
}
