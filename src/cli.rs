use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "strato")]
#[command(version)]
#[command(about = "Declarative infrastructure orchestration", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level; also renders per-field differences in plans
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Resolve the configuration and show the changes it would apply
    Plan(PlanArgs),

    /// Resolve, diff, and execute the configuration
    Apply(ApplyArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct PlanArgs {
    /// Project directory containing *.strato files
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Re-read current resources from their providers before diffing
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Project directory containing *.strato files
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Re-read current resources from their providers before diffing
    #[arg(long)]
    pub refresh: bool,

    /// Skip the confirmation prompt
    #[arg(long)]
    pub auto_approve: bool,
}
