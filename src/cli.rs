// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines the up and down subcommands and the global flags.

use clap::{Parser, Subcommand, ValueEnum};
use kube_compose::output::OutputMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kube-compose")]
#[command(about = "Run docker-compose services as Pods on Kubernetes")]
#[command(version)]
pub struct Cli {
    /// Compose file (default: discovered in the current directory)
    #[arg(short, long, global = true)]
    pub file: Option<PathBuf>,

    /// Environment ID used to name and label every object
    #[arg(short, long, global = true, env = "KUBECOMPOSE_ENVID")]
    pub env_id: Option<String>,

    /// Kubernetes namespace
    #[arg(short, long, global = true)]
    pub namespace: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Normal)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create Pods and Services and wait until every service is ready
    Up {
        /// Return once every service is ready instead of following logs
        #[arg(short, long)]
        detach: bool,

        /// Services to deploy, with their dependencies (default: all)
        services: Vec<String>,
    },

    /// Delete every Pod and Service of the environment
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Normal,
    Quiet,
    Json,
}

impl From<OutputFormat> for OutputMode {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Normal => OutputMode::Normal,
            OutputFormat::Quiet => OutputMode::Quiet,
            OutputFormat::Json => OutputMode::Json,
        }
    }
}
