//! Shared builders for integration tests.

use crucible::crucible::{ChainConfig, CrucibleEngine, CrucibleService, StateStore};
use crucible::generation::{BudgetConfig, GenerationConfig, GenerationQueue, ProviderGenerator};
use crucible::provider::scripted::{ScriptedProvider, ScriptedResponse};
use crucible::story::MemoryStorySink;
use std::sync::Arc;

pub fn text(s: &str) -> ScriptedResponse {
    ScriptedResponse::Text(s.to_string())
}

/// Queue over a scripted provider with budgeting off.
pub fn scripted_queue(responses: Vec<ScriptedResponse>) -> (Arc<GenerationQueue>, Arc<ScriptedProvider>) {
    let provider = Arc::new(ScriptedProvider::new(responses));
    let client = Arc::new(ProviderGenerator::unbudgeted(provider.clone()));
    let queue = Arc::new(GenerationQueue::new(
        client,
        GenerationConfig::default(),
        BudgetConfig::default(),
    ));
    (queue, provider)
}

pub struct Harness {
    pub service: CrucibleService,
    pub provider: Arc<ScriptedProvider>,
    pub story: Arc<MemoryStorySink>,
}

pub fn harness(responses: Vec<ScriptedResponse>, store: Option<Arc<dyn StateStore>>) -> Harness {
    let (queue, provider) = scripted_queue(responses);
    let story = Arc::new(MemoryStorySink::new());
    let chain = ChainConfig {
        auto_chain_delay_ms: 0,
        ..ChainConfig::default()
    };
    let mut service = CrucibleService::new(CrucibleEngine::new(chain), queue, story.clone());
    if let Some(store) = store {
        service = service.with_store(store);
    }
    Harness {
        service,
        provider,
        story,
    }
}
