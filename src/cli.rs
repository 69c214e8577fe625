use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// scaled-ptr-check CLI options.
#[derive(Debug, Parser)]
#[command(
    name = "scaled-ptr-check",
    version,
    about = "Find pointer arithmetic scaled by sizeof/offsetof values in C code",
    args_conflicts_with_subcommands = true,
    subcommand_precedence_over_arg = true
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub check: CheckArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Analyse files or directories.
    Check(CheckArgs),

    /// List available checkers.
    ListCheckers,

    /// Explain a checker.
    Explain {
        /// Checker name.
        checker: String,
    },
}

#[derive(Debug, Clone, ClapArgs)]
pub struct CheckArgs {
    /// C files/directories to analyse. Defaults to stdin when absent.
    #[arg(value_name = "PATH")]
    pub paths: Vec<PathBuf>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,

    /// Only run these checkers (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Skip these checkers (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Path to a config file; otherwise `scaled-ptr-check.toml` is searched
    /// upwards from the first input.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Exit with code 1 if any diagnostics are emitted.
    #[arg(long)]
    pub deny_warnings: bool,

    /// Evaluation steps per entry function.
    #[arg(long, value_name = "N")]
    pub max_steps: Option<usize>,

    /// Times a loop body is entered on one path.
    #[arg(long, value_name = "N")]
    pub loop_bound: Option<u32>,

    /// Keep the sizeof/offsetof tag on results of arithmetic.
    #[arg(long)]
    pub propagate_through_arithmetic: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
    Github,
}
