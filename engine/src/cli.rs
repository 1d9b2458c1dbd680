//! CLI interface for Hive
//!
//! Defines the commands and global flags of the `hive` binary using clap's
//! derive API.

use clap::{Parser, Subcommand};
use sdk::types::Priority;
use std::path::PathBuf;

/// Hive multi-agent engine
///
/// Routes a task to the best-suited agent, plans and executes it against a
/// local model, and learns from the outcome.
#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Process one task end to end
    Run {
        /// Short task title
        #[arg(long)]
        title: String,

        /// Full task description
        #[arg(long, default_value = "")]
        description: String,

        /// Task priority (low, medium, high, critical)
        #[arg(long, default_value = "medium")]
        priority: Priority,

        /// Metadata entry as key=value (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Show registered agents, bus activity and provider availability
    Status,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
}
