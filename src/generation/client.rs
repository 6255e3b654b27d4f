//! The generation collaborator contract and its provider-backed implementation.

use super::budget::{BudgetHooks, TokenBudget};
use super::queue::Priority;
use crate::error::GenerationError;
use crate::provider::{ChatMessage, GenerationParams, ModelProviderClient};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One streamed call. Deltas go to `on_delta` as they arrive; the full text is returned.
pub struct GenerateCall<'a> {
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
    pub on_delta: &'a mut (dyn FnMut(&str) + Send),
    pub priority: Priority,
    pub cancel: &'a CancellationToken,
    pub hooks: &'a dyn BudgetHooks,
}

/// The opaque streaming generation function.
///
/// Implementations must return `GenerationError::Cancelled` promptly once `cancel` fires,
/// including while suspended in `hooks.on_budget_wait`, and must call
/// `hooks.on_budget_resume` after every wait that completes.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, call: GenerateCall<'_>) -> Result<String, GenerationError>;
}

/// Rough token count used for budget accounting.
pub fn estimate_tokens(text: &str) -> u64 {
    ((text.chars().count() as u64) + 3) / 4
}

/// Streams from a model provider and enforces a token budget on the way through.
pub struct ProviderGenerator {
    provider: Arc<dyn ModelProviderClient>,
    budget: TokenBudget,
}

impl ProviderGenerator {
    pub fn new(provider: Arc<dyn ModelProviderClient>, budget: TokenBudget) -> Self {
        Self { provider, budget }
    }

    pub fn unbudgeted(provider: Arc<dyn ModelProviderClient>) -> Self {
        Self::new(provider, TokenBudget::new(0, 0.0))
    }

    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    /// Wait out a shortfall for `needed` tokens, if there is one.
    async fn ensure_budget(
        &self,
        needed: u64,
        cancel: &CancellationToken,
        hooks: &dyn BudgetHooks,
    ) -> Result<(), GenerationError> {
        let Some((available, wait)) = self.budget.shortfall(needed) else {
            return Ok(());
        };
        debug!(
            provider = self.provider.provider_name(),
            available,
            needed,
            wait_ms = wait.as_millis() as u64,
            "Token budget exhausted"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            waited = hooks.on_budget_wait(available, needed, wait) => waited?,
        }
        hooks.on_budget_resume();
        Ok(())
    }
}

#[async_trait]
impl GenerationClient for ProviderGenerator {
    async fn generate(&self, call: GenerateCall<'_>) -> Result<String, GenerationError> {
        let GenerateCall {
            messages,
            params,
            on_delta,
            priority,
            cancel,
            hooks,
        } = call;

        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        debug!(
            provider = self.provider.provider_name(),
            model = self.provider.model_name(),
            priority = ?priority,
            message_count = messages.len(),
            "Opening generation stream"
        );

        let reserve = u64::from(params.min_tokens.max(1));
        self.ensure_budget(reserve, cancel, hooks).await?;

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            opened = self.provider.stream(messages, params) => opened?,
        };

        let mut output = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(provider = self.provider.provider_name(), error = %e, "Stream failed");
                    return Err(e);
                }
            };

            let cost = estimate_tokens(&chunk);
            self.ensure_budget(cost, cancel, hooks).await?;
            self.budget.consume(cost);

            on_delta(&chunk);
            output.push_str(&chunk);
        }

        Ok(output)
    }
}
