//! Crucible service: the single entry point that runs planning stages through the queue.
//!
//! Every stage follows the same path: build messages from the current state, enqueue,
//! wait for the session, then hand the finished text to the engine. The engine lock is
//! never held across an await. Cancellation resolves to [`StepOutcome::Cancelled`], parse
//! failures to [`StepOutcome::ParseFailed`] with the state untouched, and collaborator
//! failures surface as `ApiError` once.

use super::director::DirectorReport;
use super::engine::{ChainConfig, CrucibleEngine, StepReport};
use super::merge::group_by_category;
use super::persist::StateStore;
use super::prompts;
use super::types::{Checkpoint, CrucibleState};
use crate::error::{ApiError, GenerationError, PlanningError};
use crate::generation::queue::{GenerationQueue, Priority};
use crate::generation::session::SessionOutput;
use crate::generation::stream::split_logical_lines;
use crate::generation::target::{parse_list_item, GenerationTarget, LiveRecord};
use crate::provider::{ChatMessage, GenerationParams};
use crate::story::StoryDataSink;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one generated planning step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<T> {
    Applied(T),
    /// The request was cancelled; nothing changed
    Cancelled,
    /// Output had no usable tags; nothing changed
    ParseFailed { stage: String },
}

impl<T> StepOutcome<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            StepOutcome::Applied(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, StepOutcome::Applied(_))
    }
}

/// What an auto-chain run did before it paused.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoChainSummary {
    pub steps: usize,
    pub director_runs: usize,
    pub checkpoint: Option<Checkpoint>,
}

/// Which sampling profile a stage uses
#[derive(Debug, Clone, Copy)]
enum Sampling {
    Planning,
    Creative,
}

/// Removes a goal from the in-flight set when dropped.
struct GoalGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    goal_id: String,
}

impl Drop for GoalGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.goal_id);
    }
}

pub struct CrucibleService {
    engine: Mutex<CrucibleEngine>,
    queue: Arc<GenerationQueue>,
    story: Arc<dyn StoryDataSink>,
    store: Option<Arc<dyn StateStore>>,
    in_flight: Mutex<HashSet<String>>,
}

impl CrucibleService {
    pub fn new(
        engine: CrucibleEngine,
        queue: Arc<GenerationQueue>,
        story: Arc<dyn StoryDataSink>,
    ) -> Self {
        Self {
            engine: Mutex::new(engine),
            queue,
            story,
            store: None,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Persist the planning state after every change.
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build a service resuming from `store`, or starting fresh when it is empty.
    pub fn resume(
        config: ChainConfig,
        queue: Arc<GenerationQueue>,
        story: Arc<dyn StoryDataSink>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, ApiError> {
        let engine = match store.load()? {
            Some(state) => CrucibleEngine::from_state(state, config),
            None => CrucibleEngine::new(config),
        };
        Ok(Self::new(engine, queue, story).with_store(store))
    }

    pub fn queue(&self) -> &Arc<GenerationQueue> {
        &self.queue
    }

    pub fn story(&self) -> &Arc<dyn StoryDataSink> {
        &self.story
    }

    pub fn state(&self) -> CrucibleState {
        self.engine.lock().snapshot()
    }

    pub fn chain_config(&self) -> ChainConfig {
        self.engine.lock().config().clone()
    }

    /// Run a synchronous engine operation and persist on success.
    pub fn update<T, F>(&self, apply: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut CrucibleEngine) -> Result<T, PlanningError>,
    {
        let (value, snapshot) = {
            let mut engine = self.engine.lock();
            let value = apply(&mut engine)?;
            (value, engine.snapshot())
        };
        self.save(&snapshot)?;
        Ok(value)
    }

    /// Discard all planning state.
    pub fn reset(&self) -> Result<(), ApiError> {
        self.queue.cancel_matching(GenerationTarget::is_crucible);
        self.engine.lock().reset();
        if let Some(store) = &self.store {
            store.clear()?;
        }
        Ok(())
    }

    fn save(&self, state: &CrucibleState) -> Result<(), ApiError> {
        if let Some(store) = &self.store {
            store.save(state)?;
        }
        Ok(())
    }

    fn params(&self, sampling: Sampling) -> GenerationParams {
        let config = self.queue.config();
        match sampling {
            Sampling::Planning => config.planning_params.clone(),
            Sampling::Creative => config.creative_params.clone(),
        }
    }

    fn claim_goal(&self, goal_id: &str) -> Result<GoalGuard<'_>, PlanningError> {
        let mut in_flight = self.in_flight.lock();
        if !in_flight.insert(goal_id.to_string()) {
            return Err(PlanningError::GoalBusy(goal_id.to_string()));
        }
        Ok(GoalGuard {
            in_flight: &self.in_flight,
            goal_id: goal_id.to_string(),
        })
    }

    /// Enqueue and wait. `Ok(None)` means the request was cancelled. When `stop` fires
    /// while waiting, every request for the same goal is cancelled.
    async fn generate(
        &self,
        target: GenerationTarget,
        messages: Vec<ChatMessage>,
        sampling: Sampling,
        priority: Priority,
        stop: Option<&CancellationToken>,
    ) -> Result<Option<SessionOutput>, ApiError> {
        let goal_id = target.goal_id().map(str::to_string);
        let waiting = self.queue.enqueue_and_wait(
            target,
            messages,
            self.params(sampling),
            priority,
        );
        tokio::pin!(waiting);

        let result = match stop {
            Some(stop) => tokio::select! {
                result = &mut waiting => result,
                _ = stop.cancelled() => {
                    let cancelled = match &goal_id {
                        Some(goal_id) => self
                            .queue
                            .cancel_matching(|t| t.goal_id() == Some(goal_id.as_str())),
                        None => 0,
                    };
                    debug!(goal_id = ?goal_id, cancelled, "Stop requested during generation");
                    waiting.await
                }
            },
            None => waiting.await,
        };

        match result {
            Ok(output) => Ok(Some(output)),
            Err(GenerationError::Cancelled) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Apply finished output to the engine, turning parse failures into a checkpoint.
    fn apply<T, F>(&self, apply: F) -> Result<StepOutcome<T>, ApiError>
    where
        F: FnOnce(&mut CrucibleEngine) -> Result<T, PlanningError>,
    {
        let mut engine = self.engine.lock();
        match apply(&mut engine) {
            Ok(value) => {
                let snapshot = engine.snapshot();
                drop(engine);
                self.save(&snapshot)?;
                Ok(StepOutcome::Applied(value))
            }
            Err(PlanningError::ParseFailure { stage, detail }) => {
                warn!(stage, detail = %detail, "Generation output not applied");
                engine.set_checkpoint(Checkpoint::ParseFailure {
                    stage: stage.to_string(),
                });
                let snapshot = engine.snapshot();
                drop(engine);
                self.save(&snapshot)?;
                Ok(StepOutcome::ParseFailed {
                    stage: stage.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn messages<F>(&self, build: F) -> Vec<ChatMessage>
    where
        F: FnOnce(&CrucibleState) -> Vec<ChatMessage>,
    {
        build(self.engine.lock().state())
    }

    // ----- planning stages -----

    pub async fn derive_direction(&self) -> Result<StepOutcome<String>, ApiError> {
        let messages = self.messages(prompts::direction_messages);
        let Some(output) = self
            .generate(GenerationTarget::CrucibleDirection, messages, Sampling::Planning, Priority::Normal, None)
            .await?
        else {
            return Ok(StepOutcome::Cancelled);
        };
        self.apply(|engine| engine.apply_direction_output(&output.text))
    }

    pub async fn derive_goals(&self) -> Result<StepOutcome<Vec<String>>, ApiError> {
        let messages = self.messages(prompts::goals_messages);
        let Some(output) = self
            .generate(GenerationTarget::CrucibleGoals, messages, Sampling::Planning, Priority::Normal, None)
            .await?
        else {
            return Ok(StepOutcome::Cancelled);
        };
        self.apply(|engine| engine.apply_goals_output(&output.text))
    }

    pub async fn derive_structural_goals(&self, goal_id: &str) -> Result<StepOutcome<Vec<String>>, ApiError> {
        let _guard = self.claim_goal(goal_id)?;
        let messages = {
            let engine = self.engine.lock();
            let state = engine.state();
            let goal = state
                .goal(goal_id)
                .ok_or_else(|| PlanningError::UnknownGoal(goal_id.to_string()))?;
            prompts::structural_goals_messages(state, goal)
        };
        let target = GenerationTarget::CrucibleStructuralGoals {
            goal_id: goal_id.to_string(),
        };
        let Some(output) = self
            .generate(target, messages, Sampling::Planning, Priority::Normal, None)
            .await?
        else {
            return Ok(StepOutcome::Cancelled);
        };
        self.apply(|engine| engine.apply_structural_goals_output(goal_id, &output.text))
    }

    pub async fn derive_prerequisites(&self) -> Result<StepOutcome<Vec<String>>, ApiError> {
        let messages = self.messages(prompts::prerequisites_messages);
        let Some(output) = self
            .generate(GenerationTarget::CruciblePrerequisites, messages, Sampling::Planning, Priority::Normal, None)
            .await?
        else {
            return Ok(StepOutcome::Cancelled);
        };
        self.apply(|engine| engine.apply_prerequisites_output(&output.text))
    }

    pub async fn derive_elements(&self, goal_id: &str) -> Result<StepOutcome<Vec<String>>, ApiError> {
        let _guard = self.claim_goal(goal_id)?;
        let messages = {
            let engine = self.engine.lock();
            let state = engine.state();
            let goal = state
                .goal(goal_id)
                .ok_or_else(|| PlanningError::UnknownGoal(goal_id.to_string()))?;
            prompts::elements_messages(state, goal)
        };
        let target = GenerationTarget::CrucibleElements {
            goal_id: goal_id.to_string(),
        };
        let Some(output) = self
            .generate(target, messages, Sampling::Planning, Priority::Normal, None)
            .await?
        else {
            return Ok(StepOutcome::Cancelled);
        };
        self.apply(|engine| engine.apply_elements_output(goal_id, &output.text))
    }

    // ----- chaining -----

    /// Generate and apply one beat.
    pub async fn chain_step(&self, goal_id: &str) -> Result<StepOutcome<StepReport>, ApiError> {
        let _guard = self.claim_goal(goal_id)?;
        self.chain_step_claimed(goal_id, None).await
    }

    async fn chain_step_claimed(
        &self,
        goal_id: &str,
        stop: Option<&CancellationToken>,
    ) -> Result<StepOutcome<StepReport>, ApiError> {
        let messages = {
            let engine = self.engine.lock();
            engine.ensure_steppable(goal_id)?;
            let state = engine.state();
            let goal = state
                .goal(goal_id)
                .ok_or_else(|| PlanningError::UnknownGoal(goal_id.to_string()))?;
            let chain = state
                .chain(goal_id)
                .ok_or_else(|| PlanningError::UnknownGoal(goal_id.to_string()))?;
            prompts::chain_messages(state, goal, chain)
        };
        let target = GenerationTarget::CrucibleChain {
            goal_id: goal_id.to_string(),
        };
        let Some(output) = self
            .generate(target, messages, Sampling::Creative, Priority::Normal, stop)
            .await?
        else {
            return Ok(StepOutcome::Cancelled);
        };
        self.apply(|engine| engine.apply_chain_output(goal_id, &output.text))
    }

    /// Run the director over a chain now.
    pub async fn run_director(&self, goal_id: &str) -> Result<StepOutcome<DirectorReport>, ApiError> {
        let _guard = self.claim_goal(goal_id)?;
        self.run_director_claimed(goal_id, None).await
    }

    async fn run_director_claimed(
        &self,
        goal_id: &str,
        stop: Option<&CancellationToken>,
    ) -> Result<StepOutcome<DirectorReport>, ApiError> {
        let messages = {
            let engine = self.engine.lock();
            let state = engine.state();
            let goal = state
                .goal(goal_id)
                .ok_or_else(|| PlanningError::UnknownGoal(goal_id.to_string()))?;
            let chain = state
                .chain(goal_id)
                .ok_or_else(|| PlanningError::UnknownGoal(goal_id.to_string()))?;
            prompts::director_messages(state, goal, chain)
        };
        let target = GenerationTarget::CrucibleDirector {
            goal_id: goal_id.to_string(),
        };
        let Some(output) = self
            .generate(target, messages, Sampling::Planning, Priority::High, stop)
            .await?
        else {
            return Ok(StepOutcome::Cancelled);
        };
        self.apply(|engine| engine.apply_director_output(goal_id, &output.text))
    }

    /// Step a chain repeatedly until a checkpoint, a stop request, or an error. The director
    /// runs whenever it is due.
    pub async fn auto_chain(&self, goal_id: &str, stop: CancellationToken) -> Result<AutoChainSummary, ApiError> {
        let _guard = self.claim_goal(goal_id)?;
        let delay = Duration::from_millis(self.chain_config().auto_chain_delay_ms);
        self.engine.lock().clear_checkpoint();
        info!(goal_id, "Auto-chain started");

        let mut summary = AutoChainSummary::default();
        loop {
            if stop.is_cancelled() {
                summary.checkpoint = Some(self.stop_checkpoint(goal_id)?);
                break;
            }
            if let Some(checkpoint) = self.complete_checkpoint(goal_id)? {
                summary.checkpoint = Some(checkpoint);
                break;
            }

            let report = match self.chain_step_claimed(goal_id, Some(&stop)).await? {
                StepOutcome::Applied(report) => report,
                StepOutcome::Cancelled => {
                    summary.checkpoint = Some(self.stop_checkpoint(goal_id)?);
                    break;
                }
                StepOutcome::ParseFailed { stage } => {
                    summary.checkpoint = Some(Checkpoint::ParseFailure { stage });
                    break;
                }
            };
            summary.steps += 1;

            if let Some(checkpoint) = report.checkpoint {
                summary.checkpoint = Some(checkpoint);
                break;
            }

            if report.director_due {
                match self.run_director_claimed(goal_id, Some(&stop)).await? {
                    StepOutcome::Applied(director) => {
                        summary.director_runs += 1;
                        if director.rejected.is_some() {
                            summary.checkpoint = Some(Checkpoint::DirectorRejected {
                                goal_id: goal_id.to_string(),
                            });
                            break;
                        }
                    }
                    StepOutcome::Cancelled => continue,
                    StepOutcome::ParseFailed { stage } => {
                        summary.checkpoint = Some(Checkpoint::ParseFailure { stage });
                        break;
                    }
                }
            }

            if !delay.is_zero() {
                tokio::select! {
                    _ = stop.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        info!(
            goal_id,
            steps = summary.steps,
            director_runs = summary.director_runs,
            checkpoint = ?summary.checkpoint,
            "Auto-chain paused"
        );
        Ok(summary)
    }

    /// `ChainComplete` when `goal_id`'s chain needs no more beats.
    fn complete_checkpoint(&self, goal_id: &str) -> Result<Option<Checkpoint>, ApiError> {
        let snapshot = {
            let mut engine = self.engine.lock();
            let complete = engine
                .state()
                .chain(goal_id)
                .ok_or_else(|| PlanningError::UnknownGoal(goal_id.to_string()))?
                .complete;
            if !complete {
                return Ok(None);
            }
            engine.set_checkpoint(Checkpoint::ChainComplete {
                goal_id: goal_id.to_string(),
            });
            engine.snapshot()
        };
        self.save(&snapshot)?;
        Ok(snapshot.checkpoint)
    }

    fn stop_checkpoint(&self, goal_id: &str) -> Result<Checkpoint, ApiError> {
        let checkpoint = Checkpoint::Stopped {
            goal_id: goal_id.to_string(),
        };
        let snapshot = {
            let mut engine = self.engine.lock();
            engine.set_checkpoint(checkpoint.clone());
            engine.snapshot()
        };
        self.save(&snapshot)?;
        Ok(checkpoint)
    }

    /// Cancel whatever is queued or streaming for `goal_id`.
    pub fn cancel_goal(&self, goal_id: &str) -> usize {
        self.queue
            .cancel_matching(|t| t.goal_id() == Some(goal_id))
    }

    // ----- merge and expansion -----

    /// Merge the world and hand each category to the story collaborator. Returns how many
    /// story entries were created.
    pub fn merge_world(&self) -> Result<usize, ApiError> {
        let (merged, snapshot) = {
            let mut engine = self.engine.lock();
            let merged = engine.merge_world()?.to_vec();
            (merged, engine.snapshot())
        };
        self.save(&snapshot)?;

        let mut created = 0;
        for (category, elements) in group_by_category(&merged) {
            created += self.story.create_entries(category, &elements)?;
        }
        info!(merged = merged.len(), created, "Merged world handed to story");
        Ok(created)
    }

    pub async fn expand_element(&self, element_id: &str) -> Result<StepOutcome<Vec<String>>, ApiError> {
        let messages = {
            let mut engine = self.engine.lock();
            let element = engine.begin_expansion(element_id)?.clone();
            prompts::expansion_messages(engine.state(), &element)
        };
        let target = GenerationTarget::CrucibleExpansion {
            element_id: element_id.to_string(),
        };
        let output = match self
            .generate(target, messages, Sampling::Creative, Priority::Normal, None)
            .await
        {
            Ok(Some(output)) => output,
            Ok(None) => {
                self.engine.lock().cancel_expansion()?;
                return Ok(StepOutcome::Cancelled);
            }
            Err(e) => {
                self.engine.lock().cancel_expansion()?;
                return Err(e);
            }
        };

        let outcome = self.apply(|engine| engine.apply_expansion_output(&output.text))?;
        if !outcome.is_applied() {
            self.engine.lock().cancel_expansion()?;
        }
        Ok(outcome)
    }

    // ----- story fields -----

    /// Generate one free-text field and write it to the story.
    pub async fn generate_field(&self, field_id: &str, instruction: &str) -> Result<StepOutcome<String>, ApiError> {
        let context = self.story.context()?;
        let messages = prompts::field_messages(field_id, &context, instruction);
        let target = GenerationTarget::Field {
            field_id: field_id.to_string(),
        };
        let Some(output) = self
            .generate(target, messages, Sampling::Creative, Priority::Normal, None)
            .await?
        else {
            return Ok(StepOutcome::Cancelled);
        };
        let content = output.text.trim();
        if content.is_empty() {
            warn!(field_id, "Field generation produced no text");
            return Ok(StepOutcome::ParseFailed {
                stage: "field".to_string(),
            });
        }
        self.story.write_field(field_id, content)?;
        Ok(StepOutcome::Applied(content.to_string()))
    }

    /// Generate list items and append them to the story.
    pub async fn generate_list(&self, field_id: &str, count: usize) -> Result<StepOutcome<Vec<String>>, ApiError> {
        let context = self.story.context()?;
        let messages = prompts::list_messages(field_id, &context, count);
        let target = GenerationTarget::List {
            field_id: field_id.to_string(),
        };
        let Some(output) = self
            .generate(target, messages, Sampling::Creative, Priority::Normal, None)
            .await?
        else {
            return Ok(StepOutcome::Cancelled);
        };

        let mut items: Vec<String> = output
            .records
            .iter()
            .filter_map(|record| match record {
                LiveRecord::ListItem { text } => Some(text.clone()),
                _ => None,
            })
            .collect();
        if items.is_empty() {
            items = split_logical_lines(&output.text)
                .iter()
                .filter_map(|line| parse_list_item(line))
                .collect();
        }
        if items.is_empty() {
            warn!(field_id, "List generation produced no items");
            return Ok(StepOutcome::ParseFailed {
                stage: "list".to_string(),
            });
        }
        self.story.append_list_items(field_id, &items)?;
        Ok(StepOutcome::Applied(items))
    }

    /// One brainstorm turn. The reply is returned and not stored.
    pub async fn brainstorm(&self, history: &[ChatMessage], prompt: &str) -> Result<StepOutcome<String>, ApiError> {
        let context = self.story.context()?;
        let messages = prompts::brainstorm_messages(&context, history, prompt);
        let Some(output) = self
            .generate(GenerationTarget::Brainstorm, messages, Sampling::Creative, Priority::High, None)
            .await?
        else {
            return Ok(StepOutcome::Cancelled);
        };
        Ok(StepOutcome::Applied(output.text.trim().to_string()))
    }
}
