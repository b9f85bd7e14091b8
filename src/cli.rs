//! Command-line interface definitions for Awful Newsroom.
//!
//! This module defines the CLI arguments and subcommands using the `clap` crate.
//! Paths can be provided via command-line flags or environment variables.

use clap::{Parser, Subcommand};

/// Command-line arguments for the Awful Newsroom application.
///
/// # Examples
///
/// ```sh
/// # Whole pipeline, once
/// awful_newsroom run-full
///
/// # Step by step
/// awful_newsroom discover
/// awful_newsroom score
/// awful_newsroom draft --publish
///
/// # Every day at the configured hour
/// awful_newsroom --config ./newsroom.yaml daemon
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML configuration file (built-in defaults when missing)
    #[arg(short, long, env = "NEWSROOM_CONFIG", default_value = "./newsroom.yaml", global = true)]
    pub config: String,

    /// Overrides `output.articles_dir` from the config
    #[arg(short, long, env = "NEWSROOM_ARTICLES_DIR", global = true)]
    pub articles_dir: Option<String>,

    /// Overrides `output.data_dir` from the config
    #[arg(long, env = "NEWSROOM_DATA_DIR", global = true)]
    pub data_dir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Discover fresh topics and drop the ones already covered
    Discover,

    /// Score and rank the latest discovered topics
    Score,

    /// Research, draft, illustrate and save the best ranked topic
    Draft {
        /// Also push the saved article to the CMS
        #[arg(long)]
        publish: bool,
    },

    /// Run the complete pipeline once
    RunFull {
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List generated articles, newest first
    List {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Show the latest snapshots and the configuration in use
    Status,

    /// Run the pipeline every day at `schedule.hour`; Ctrl-C stops
    Daemon {
        /// Run once immediately before waiting for the schedule
        #[arg(long)]
        run_now: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["awful_newsroom", "--config", "/etc/newsroom.yaml", "run-full", "--json"]);
        assert_eq!(cli.config, "/etc/newsroom.yaml");
        assert_eq!(cli.command, Command::RunFull { json: true });
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["awful_newsroom", "draft", "--publish", "-a", "/tmp/articles"]);
        assert_eq!(cli.command, Command::Draft { publish: true });
        assert_eq!(cli.articles_dir.as_deref(), Some("/tmp/articles"));
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["awful_newsroom", "list"]);
        assert_eq!(cli.command, Command::List { limit: 20 });
        assert!(cli.data_dir.is_none() || std::env::var("NEWSROOM_DATA_DIR").is_ok());
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["awful_newsroom"]).is_err());
    }
}
