//! CLI parse: clap types for Crucible. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Crucible CLI - backward-chaining story planner
#[derive(Parser)]
#[command(name = "crucible")]
#[command(about = "Plan stories backwards from their goals with a streaming language model")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Continue through budget waits without asking
    #[arg(long)]
    pub auto_continue: bool,

    /// Do not echo generated text while it streams
    #[arg(long)]
    pub quiet: bool,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new plan from a story intent
    Init {
        /// What the story is about
        #[arg(long)]
        intent: String,
        /// Discard an existing plan
        #[arg(long)]
        force: bool,
    },
    /// Derive a guiding direction from the intent
    Direction,
    /// Derive, add, edit or remove goals
    Goals {
        #[command(subcommand)]
        command: GoalCommands,
    },
    /// Toggle selection of one or more goals
    Select {
        goal_ids: Vec<String>,
    },
    /// Confirm selected goals and start chaining
    Confirm {
        /// Derive structure (structural goals, prerequisites, elements) before chaining
        #[arg(long)]
        build: bool,
    },
    /// Derive planning structure for the building phase
    Derive {
        #[command(subcommand)]
        command: DeriveCommands,
    },
    /// Edit a prerequisite's text
    Prerequisite {
        prerequisite_id: String,
        text: String,
    },
    /// Generate one beat for a goal's chain
    Step {
        goal_id: String,
    },
    /// Step a chain until it completes or needs attention (Ctrl-C stops)
    Auto {
        goal_id: String,
    },
    /// Run the director over a chain now
    Director {
        goal_id: String,
    },
    /// Edit a chain's constraints by hand
    Constraint {
        #[command(subcommand)]
        command: ConstraintCommands,
    },
    /// Remove a chain's scenes from the given scene onwards
    Truncate {
        goal_id: String,
        /// First scene to remove (1-based)
        #[arg(long)]
        from: usize,
    },
    /// Toggle the favorite flag of a scene
    Favorite {
        goal_id: String,
        /// Scene number (1-based)
        scene: usize,
    },
    /// Mark a scene as needing revision
    Taint {
        goal_id: String,
        /// Scene number (1-based)
        scene: usize,
        /// Clear the mark instead
        #[arg(long)]
        clear: bool,
    },
    /// Merge the world of every completed chain into the story
    Merge,
    /// Expand one merged element
    Expand {
        element_id: String,
    },
    /// Generate a free-text story field
    Field {
        field_id: String,
        /// Extra instruction for the field
        #[arg(long, default_value = "")]
        instruction: String,
    },
    /// Generate list items for a story field
    List {
        field_id: String,
        #[arg(long, default_value = "5")]
        count: usize,
    },
    /// Ask one brainstorm question about the story
    Brainstorm {
        prompt: String,
    },
    /// Show the plan
    Status {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
        /// Show one chain in detail
        #[arg(long)]
        goal: Option<String>,
    },
    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Discard the plan and return to idle
    Reset {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
pub enum GoalCommands {
    /// Derive candidate goals; selected goals are kept
    Derive,
    /// Add a goal by hand (tagged text with at least [GOAL])
    Add { text: String },
    /// Replace a goal's text
    Edit { goal_id: String, text: String },
    /// Remove a goal and everything derived from it
    Remove { goal_id: String },
}

#[derive(Subcommand)]
pub enum DeriveCommands {
    /// Structural goals for one goal
    Structural { goal_id: String },
    /// Prerequisites for all selected goals
    Prerequisites,
    /// World elements for one goal
    Elements { goal_id: String },
}

#[derive(Subcommand)]
pub enum ConstraintCommands {
    /// Open a new constraint
    Add { goal_id: String, description: String },
    /// Mark a constraint resolved
    Resolve { goal_id: String, constraint_id: String },
    /// Move a constraint back to open
    Reopen { goal_id: String, constraint_id: String },
    /// Mark a constraint as established background
    Ground { goal_id: String, constraint_id: String },
    /// Delete a constraint
    Remove { goal_id: String, constraint_id: String },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write a default crucible.toml to the workspace
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate the configuration
    Validate,
}
