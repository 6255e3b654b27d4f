//! CLI command-name contract for logging and routing.

use crate::cli::parse::{Commands, ConfigCommands, ConstraintCommands, DeriveCommands, GoalCommands};

/// Command name string for log records (e.g. "goals.derive", "constraint.resolve").
pub fn command_name(command: &Commands) -> String {
    match command {
        Commands::Init { .. } => "init".to_string(),
        Commands::Direction => "direction".to_string(),
        Commands::Goals { command } => format!("goals.{}", goal_command_name(command)),
        Commands::Select { .. } => "select".to_string(),
        Commands::Confirm { .. } => "confirm".to_string(),
        Commands::Derive { command } => format!("derive.{}", derive_command_name(command)),
        Commands::Prerequisite { .. } => "prerequisite".to_string(),
        Commands::Step { .. } => "step".to_string(),
        Commands::Auto { .. } => "auto".to_string(),
        Commands::Director { .. } => "director".to_string(),
        Commands::Constraint { command } => {
            format!("constraint.{}", constraint_command_name(command))
        }
        Commands::Truncate { .. } => "truncate".to_string(),
        Commands::Favorite { .. } => "favorite".to_string(),
        Commands::Taint { .. } => "taint".to_string(),
        Commands::Merge => "merge".to_string(),
        Commands::Expand { .. } => "expand".to_string(),
        Commands::Field { .. } => "field".to_string(),
        Commands::List { .. } => "list".to_string(),
        Commands::Brainstorm { .. } => "brainstorm".to_string(),
        Commands::Status { .. } => "status".to_string(),
        Commands::Config { command } => format!("config.{}", config_command_name(command)),
        Commands::Reset { .. } => "reset".to_string(),
    }
}

pub fn goal_command_name(command: &GoalCommands) -> &'static str {
    match command {
        GoalCommands::Derive => "derive",
        GoalCommands::Add { .. } => "add",
        GoalCommands::Edit { .. } => "edit",
        GoalCommands::Remove { .. } => "remove",
    }
}

pub fn derive_command_name(command: &DeriveCommands) -> &'static str {
    match command {
        DeriveCommands::Structural { .. } => "structural",
        DeriveCommands::Prerequisites => "prerequisites",
        DeriveCommands::Elements { .. } => "elements",
    }
}

pub fn constraint_command_name(command: &ConstraintCommands) -> &'static str {
    match command {
        ConstraintCommands::Add { .. } => "add",
        ConstraintCommands::Resolve { .. } => "resolve",
        ConstraintCommands::Reopen { .. } => "reopen",
        ConstraintCommands::Ground { .. } => "ground",
        ConstraintCommands::Remove { .. } => "remove",
    }
}

pub fn config_command_name(command: &ConfigCommands) -> &'static str {
    match command {
        ConfigCommands::Show => "show",
        ConfigCommands::Init { .. } => "init",
        ConfigCommands::Validate => "validate",
    }
}

/// Whether a command sends requests to the model provider.
pub fn generates(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Direction
            | Commands::Goals {
                command: GoalCommands::Derive
            }
            | Commands::Derive { .. }
            | Commands::Step { .. }
            | Commands::Auto { .. }
            | Commands::Director { .. }
            | Commands::Expand { .. }
            | Commands::Field { .. }
            | Commands::List { .. }
            | Commands::Brainstorm { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::parse::Cli;
    use clap::Parser;

    #[test]
    fn test_command_names() {
        let cli = Cli::try_parse_from(["crucible", "constraint", "resolve", "g1", "R2"]).unwrap();
        assert_eq!(command_name(&cli.command), "constraint.resolve");
        assert!(!generates(&cli.command));

        let cli = Cli::try_parse_from(["crucible", "goals", "derive"]).unwrap();
        assert_eq!(command_name(&cli.command), "goals.derive");
        assert!(generates(&cli.command));
    }

    #[test]
    fn test_truncate_requires_from() {
        assert!(Cli::try_parse_from(["crucible", "truncate", "g1"]).is_err());
        assert!(Cli::try_parse_from(["crucible", "truncate", "g1", "--from", "2"]).is_ok());
    }
}
