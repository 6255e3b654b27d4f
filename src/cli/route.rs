//! CLI route: single route table and run context. Dispatches to the planning service and
//! presentation.

use crate::cli::parse::{
    Commands, ConfigCommands, ConstraintCommands, DeriveCommands, GoalCommands,
};
use crate::cli::presentation::{
    format_auto_summary, format_chain_text, format_director_report, format_goal_list,
    format_ids, format_outcome, format_status_json, format_status_text, format_step_report,
};
use crate::cli::{command_name, generates};
use crate::config::{ConfigLoader, CrucibleConfig};
use crate::crucible::persist::JsonFileStore;
use crate::crucible::service::CrucibleService;
use crate::error::{ApiError, PlanningError};
use crate::generation::budget::{BudgetState, TokenBudget};
use crate::generation::client::ProviderGenerator;
use crate::generation::queue::{GenerationQueue, RequestId};
use crate::generation::session::SessionEvent;
use crate::story::JsonStorySink;
use once_cell::sync::OnceCell;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runtime context for CLI execution: workspace, configuration, and the planning service.
/// The service is built on first use so config commands work with an invalid config.
pub struct RunContext {
    config: CrucibleConfig,
    workspace_root: PathBuf,
    config_path: Option<PathBuf>,
    service: OnceCell<Arc<CrucibleService>>,
    runtime: tokio::runtime::Runtime,
    quiet: bool,
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(
        workspace_root: PathBuf,
        config_path: Option<PathBuf>,
        auto_continue: bool,
        quiet: bool,
    ) -> Result<Self, ApiError> {
        let mut config = if let Some(ref cfg_path) = config_path {
            ConfigLoader::load_from_file(cfg_path)?
        } else {
            ConfigLoader::load(&workspace_root)?
        };
        if auto_continue {
            config.budget.auto_continue = true;
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| ApiError::ConfigError(format!("Failed to create runtime: {}", e)))?;

        Ok(Self {
            config,
            workspace_root,
            config_path,
            service: OnceCell::new(),
            runtime,
            quiet,
        })
    }

    pub fn config(&self) -> &CrucibleConfig {
        &self.config
    }

    /// The planning service, wired to the configured provider, state file and story file.
    pub fn service(&self) -> Result<&Arc<CrucibleService>, ApiError> {
        self.service.get_or_try_init(|| {
            self.config.ensure_valid()?;
            let provider = self.config.provider.create_client()?;
            let generator = ProviderGenerator::new(provider, TokenBudget::from_config(&self.config.budget));
            let queue = Arc::new(GenerationQueue::new(
                Arc::new(generator),
                self.config.generation.clone(),
                self.config.budget.clone(),
            ));
            let story = Arc::new(JsonStorySink::new(&self.config.story_path));
            let store = Arc::new(JsonFileStore::new(&self.config.state_path));
            let service = CrucibleService::resume(self.config.chain.clone(), queue, story, store)?;
            debug!(
                state_path = %self.config.state_path.display(),
                phase = %service.state().phase,
                "Planning service ready"
            );
            Ok(Arc::new(service))
        })
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        let started = Instant::now();
        let name = command_name(command);
        info!(command = %name, "Command started");
        let result = if generates(command) {
            let service = Arc::clone(self.service()?);
            self.runtime.block_on(self.watched(&service, self.execute_async(&service, command)))
        } else {
            self.execute_sync(command)
        };
        match &result {
            Ok(_) => info!(
                command = %name,
                duration_ms = started.elapsed().as_millis() as u64,
                "Command finished"
            ),
            Err(e) => warn!(command = %name, error = %e, "Command failed"),
        }
        result
    }

    /// Drive `work` while echoing the active session's events and answering budget prompts.
    async fn watched<F, T>(&self, service: &Arc<CrucibleService>, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let done = CancellationToken::new();
        let watcher = tokio::spawn(watch_events(
            Arc::clone(service.queue()),
            service.queue().subscribe(),
            done.clone(),
            self.quiet,
        ));
        let result = work.await;
        done.cancel();
        let _ = watcher.await;
        result
    }

    async fn execute_async(
        &self,
        service: &Arc<CrucibleService>,
        command: &Commands,
    ) -> Result<String, ApiError> {
        match command {
            Commands::Direction => {
                let outcome = service.derive_direction().await?;
                Ok(format_outcome(&outcome, |direction| {
                    format!("Direction:\n{}", direction)
                }))
            }
            Commands::Goals {
                command: GoalCommands::Derive,
            } => {
                let outcome = service.derive_goals().await?;
                let state = service.state();
                Ok(format_outcome(&outcome, |ids| format_goal_list(&state, ids)))
            }
            Commands::Derive { command } => {
                let outcome = match command {
                    DeriveCommands::Structural { goal_id } => {
                        service.derive_structural_goals(goal_id).await?
                    }
                    DeriveCommands::Prerequisites => service.derive_prerequisites().await?,
                    DeriveCommands::Elements { goal_id } => service.derive_elements(goal_id).await?,
                };
                let label = match command {
                    DeriveCommands::Structural { .. } => "structural goal(s)",
                    DeriveCommands::Prerequisites => "prerequisite(s)",
                    DeriveCommands::Elements { .. } => "element(s)",
                };
                Ok(format_outcome(&outcome, |ids| format_ids(label, ids)))
            }
            Commands::Step { goal_id } => {
                let outcome = service.chain_step(goal_id).await?;
                Ok(format_outcome(&outcome, format_step_report))
            }
            Commands::Auto { goal_id } => {
                let stop = CancellationToken::new();
                let interrupt = tokio::spawn(stop_on_ctrl_c(stop.clone()));
                let summary = service.auto_chain(goal_id, stop.clone()).await;
                interrupt.abort();
                Ok(format_auto_summary(goal_id, &summary?))
            }
            Commands::Director { goal_id } => {
                let outcome = service.run_director(goal_id).await?;
                Ok(format_outcome(&outcome, |report| {
                    format_director_report(goal_id, report)
                }))
            }
            Commands::Expand { element_id } => {
                let outcome = service.expand_element(element_id).await?;
                Ok(format_outcome(&outcome, |ids| {
                    if ids.is_empty() {
                        format!("Expanded {}.", element_id)
                    } else {
                        format!("Expanded {}; new element(s): {}", element_id, ids.join(", "))
                    }
                }))
            }
            Commands::Field {
                field_id,
                instruction,
            } => {
                let outcome = service.generate_field(field_id, instruction).await?;
                Ok(format_outcome(&outcome, |text| {
                    format!("{}:\n{}", field_id, text)
                }))
            }
            Commands::List { field_id, count } => {
                let outcome = service.generate_list(field_id, *count).await?;
                Ok(format_outcome(&outcome, |items| {
                    let lines: Vec<String> = items.iter().map(|i| format!("- {}", i)).collect();
                    format!("Added {} item(s) to {}:\n{}", items.len(), field_id, lines.join("\n"))
                }))
            }
            Commands::Brainstorm { prompt } => {
                let outcome = service.brainstorm(&[], prompt).await?;
                Ok(format_outcome(&outcome, |reply| reply.clone()))
            }
            other => self.execute_sync(other),
        }
    }

    fn execute_sync(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Init { intent, force } => {
                let service = self.service()?;
                let state = service.state();
                let existing = !state.intent.is_empty() || !state.goals.is_empty();
                if existing && !force {
                    return Err(ApiError::ConfigError(
                        "A plan already exists; pass --force to discard it".to_string(),
                    ));
                }
                if existing {
                    service.reset()?;
                }
                service.update(|engine| engine.set_intent(intent))?;
                Ok("Plan started. Next: `crucible direction` or `crucible goals derive`.".to_string())
            }
            Commands::Goals { command } => {
                let service = self.service()?;
                match command {
                    GoalCommands::Derive => Err(ApiError::ConfigError(
                        "goals derive must run through the generation route".to_string(),
                    )),
                    GoalCommands::Add { text } => {
                        let id = service.update(|engine| engine.add_goal(text))?;
                        Ok(format!("Added goal {}", id))
                    }
                    GoalCommands::Edit { goal_id, text } => {
                        service.update(|engine| engine.edit_goal(goal_id, text))?;
                        Ok(format!("Updated goal {}", goal_id))
                    }
                    GoalCommands::Remove { goal_id } => {
                        let removed = service.update(|engine| engine.remove_goal(goal_id))?;
                        service.cancel_goal(goal_id);
                        Ok(format!("Removed goal {}: {}", removed.id, removed.title()))
                    }
                }
            }
            Commands::Select { goal_ids } => {
                let service = self.service()?;
                let mut lines = Vec::new();
                for goal_id in goal_ids {
                    let selected = service.update(|engine| engine.toggle_goal(goal_id))?;
                    lines.push(format!(
                        "{} {}",
                        goal_id,
                        if selected { "selected" } else { "unselected" }
                    ));
                }
                Ok(lines.join("\n"))
            }
            Commands::Confirm { build } => {
                let service = self.service()?;
                if *build {
                    let ids = service.update(|engine| engine.confirm_goals_for_building())?;
                    Ok(format!(
                        "Building {} goal(s): {}. Derive structure with `crucible derive`, then `crucible confirm`.",
                        ids.len(),
                        ids.join(", ")
                    ))
                } else {
                    let ids = service.update(|engine| engine.confirm_goals())?;
                    Ok(format!(
                        "Chaining {} goal(s): {}. Run `crucible step <goal-id>` or `crucible auto <goal-id>`.",
                        ids.len(),
                        ids.join(", ")
                    ))
                }
            }
            Commands::Prerequisite {
                prerequisite_id,
                text,
            } => {
                self.service()?
                    .update(|engine| engine.edit_prerequisite(prerequisite_id, text))?;
                Ok(format!("Updated prerequisite {}", prerequisite_id))
            }
            Commands::Constraint { command } => self.handle_constraint(command),
            Commands::Truncate { goal_id, from } => {
                let from = scene_index(goal_id, *from)?;
                let removed = self
                    .service()?
                    .update(|engine| engine.truncate_from(goal_id, from))?;
                Ok(format!("Removed {} scene(s) from {}", removed, goal_id))
            }
            Commands::Favorite { goal_id, scene } => {
                let index = scene_index(goal_id, *scene)?;
                let favorited = self
                    .service()?
                    .update(|engine| engine.toggle_favorite(goal_id, index))?;
                Ok(format!(
                    "Scene {} {}",
                    scene,
                    if favorited { "kept as favorite" } else { "no longer a favorite" }
                ))
            }
            Commands::Taint {
                goal_id,
                scene,
                clear,
            } => {
                let index = scene_index(goal_id, *scene)?;
                self.service()?
                    .update(|engine| engine.set_tainted(goal_id, index, !clear))?;
                Ok(if *clear {
                    format!("Scene {} no longer marked for revision", scene)
                } else {
                    format!("Scene {} marked for revision", scene)
                })
            }
            Commands::Merge => {
                let service = self.service()?;
                let created = service.merge_world()?;
                let merged = service.state().merged_elements.len();
                Ok(format!(
                    "Merged {} unique element(s); {} new story entr{} written to {}",
                    merged,
                    created,
                    if created == 1 { "y" } else { "ies" },
                    self.config.story_path.display()
                ))
            }
            Commands::Status { format, goal } => {
                let state = self.service()?.state();
                match (format.as_str(), goal) {
                    ("json", _) => format_status_json(&state),
                    ("text", Some(goal_id)) => format_chain_text(&state, goal_id),
                    ("text", None) => Ok(format_status_text(&state)),
                    (other, _) => Err(ApiError::ConfigError(format!(
                        "Invalid format: {} (must be 'text' or 'json')",
                        other
                    ))),
                }
            }
            Commands::Config { command } => self.handle_config(command),
            Commands::Reset { force } => {
                if !force {
                    use dialoguer::Confirm;
                    let confirmed = Confirm::new()
                        .with_prompt("Discard the whole plan?")
                        .interact()
                        .map_err(|e| {
                            ApiError::ConfigError(format!("Failed to get user input: {}", e))
                        })?;
                    if !confirmed {
                        return Ok("Reset cancelled".to_string());
                    }
                }
                self.service()?.reset()?;
                Ok("Plan discarded.".to_string())
            }
            Commands::Direction
            | Commands::Derive { .. }
            | Commands::Step { .. }
            | Commands::Auto { .. }
            | Commands::Director { .. }
            | Commands::Expand { .. }
            | Commands::Field { .. }
            | Commands::List { .. }
            | Commands::Brainstorm { .. } => Err(ApiError::ConfigError(format!(
                "{} must run through the generation route",
                command_name(command)
            ))),
        }
    }

    fn handle_constraint(&self, command: &ConstraintCommands) -> Result<String, ApiError> {
        let service = self.service()?;
        match command {
            ConstraintCommands::Add {
                goal_id,
                description,
            } => {
                let id = service.update(|engine| engine.add_constraint(goal_id, description))?;
                Ok(format!("Opened {} on {}", id, goal_id))
            }
            ConstraintCommands::Resolve {
                goal_id,
                constraint_id,
            } => {
                service.update(|engine| engine.resolve_constraint(goal_id, constraint_id))?;
                Ok(format!("Resolved {}", constraint_id))
            }
            ConstraintCommands::Reopen {
                goal_id,
                constraint_id,
            } => {
                service.update(|engine| engine.reopen_constraint(goal_id, constraint_id))?;
                Ok(format!("Reopened {}", constraint_id))
            }
            ConstraintCommands::Ground {
                goal_id,
                constraint_id,
            } => {
                service.update(|engine| engine.ground_constraint(goal_id, constraint_id))?;
                Ok(format!("{} is now ground state", constraint_id))
            }
            ConstraintCommands::Remove {
                goal_id,
                constraint_id,
            } => {
                service.update(|engine| engine.remove_constraint(goal_id, constraint_id))?;
                Ok(format!("Removed {}", constraint_id))
            }
        }
    }

    fn handle_config(&self, command: &ConfigCommands) -> Result<String, ApiError> {
        match command {
            ConfigCommands::Show => toml::to_string_pretty(&self.config)
                .map_err(|e| ApiError::ConfigError(format!("Failed to render config: {}", e))),
            ConfigCommands::Init { force } => {
                let path = self.workspace_root.join("crucible.toml");
                write_default_config(&path, *force)?;
                Ok(format!("Wrote {}", path.display()))
            }
            ConfigCommands::Validate => match self.config.validate() {
                Ok(()) => Ok(match &self.config_path {
                    Some(path) => format!("Configuration is valid ({})", path.display()),
                    None => "Configuration is valid".to_string(),
                }),
                Err(errors) => {
                    let lines: Vec<String> =
                        errors.iter().map(|e| format!("  - {}", e)).collect();
                    Err(ApiError::ConfigError(format!(
                        "Configuration validation failed:\n{}",
                        lines.join("\n")
                    )))
                }
            },
        }
    }
}

/// 1-based scene number from the command line to a beat index.
fn scene_index(goal_id: &str, scene: usize) -> Result<usize, ApiError> {
    scene.checked_sub(1).ok_or_else(|| {
        PlanningError::BeatOutOfRange {
            goal_id: goal_id.to_string(),
            index: scene,
        }
        .into()
    })
}

fn write_default_config(path: &Path, force: bool) -> Result<(), ApiError> {
    if path.exists() && !force {
        return Err(ApiError::ConfigError(format!(
            "{} already exists; pass --force to overwrite",
            path.display()
        )));
    }
    let content = toml::to_string_pretty(&CrucibleConfig::default())
        .map_err(|e| ApiError::ConfigError(format!("Failed to render config: {}", e)))?;
    std::fs::write(path, content)
        .map_err(|e| ApiError::ConfigError(format!("Failed to write {}: {}", path.display(), e)))
}

async fn stop_on_ctrl_c(stop: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("\nCancelling the current request and stopping...");
        stop.cancel();
    }
}

/// Echo streamed text to stderr and put budget confirmations to the user.
async fn watch_events(
    queue: Arc<GenerationQueue>,
    mut events: broadcast::Receiver<SessionEvent>,
    done: CancellationToken,
    quiet: bool,
) {
    loop {
        let event = tokio::select! {
            _ = done.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => handle_event(&queue, event, quiet).await,
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event watcher lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn handle_event(queue: &Arc<GenerationQueue>, event: SessionEvent, quiet: bool) {
    match event {
        SessionEvent::Delta { text, .. } if !quiet => {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{}", text);
            let _ = stderr.flush();
        }
        SessionEvent::Completed { .. } if !quiet => eprintln!(),
        SessionEvent::BudgetChanged {
            request_id,
            snapshot,
        } => match snapshot.state {
            BudgetState::WaitingForUser if snapshot.auto_continue => {
                if !quiet {
                    eprintln!(
                        "\nToken budget exhausted ({} available, {} needed); continuing automatically.",
                        snapshot.available, snapshot.needed
                    );
                }
            }
            BudgetState::WaitingForUser => {
                let prompt = format!(
                    "Token budget exhausted ({} available, {} needed). Wait {}s and continue?",
                    snapshot.available,
                    snapshot.needed,
                    snapshot.wait.as_secs()
                );
                confirm_budget(queue, request_id, prompt).await;
            }
            BudgetState::WaitingForTimer if !quiet => {
                eprintln!("\nWaiting {}s for the token budget to refill...", snapshot.time_remaining.as_secs());
            }
            _ => {}
        },
        SessionEvent::BudgetTick { remaining, .. } if !quiet => {
            eprint!("\r  resuming in {:>3}s", remaining.as_secs());
        }
        SessionEvent::Failed { error, .. } => debug!(error = %error, "Session failed"),
        _ => {}
    }
}

async fn confirm_budget(queue: &Arc<GenerationQueue>, request_id: RequestId, prompt: String) {
    let answer = tokio::task::spawn_blocking(move || {
        use dialoguer::Confirm;
        Confirm::new().with_prompt(prompt).default(true).interact()
    })
    .await;
    let declined = match answer {
        Ok(Ok(true)) => {
            queue.continue_budget();
            return;
        }
        Ok(Ok(false)) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) => Some(e.to_string()),
    };
    // Only a wait still parked on the user can be declined.
    let still_waiting = queue.active().map_or(false, |active| {
        active.request_id == request_id && active.budget.state == BudgetState::WaitingForUser
    });
    if !still_waiting {
        debug!(request_id = request_id.as_u64(), "Budget wait already moved on; not cancelling");
        return;
    }
    match declined {
        Some(error) => warn!(error = %error, "Budget prompt failed; cancelling request"),
        None => info!(request_id = request_id.as_u64(), "Budget wait declined"),
    }
    queue.cancel(request_id);
}
