use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "mentor")]
#[command(version, about = "Automated code review orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory holding mentor.toml and the .mentor state tree.
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the review pipeline over a source file, offering the fix
    /// pipeline when the review signals it is worth running
    Review {
        /// File containing the code to review
        file: PathBuf,

        /// Submitter identifier
        #[arg(long, default_value = "default_user")]
        user: String,

        /// Resume an existing session instead of starting a new one
        #[arg(long)]
        session: Option<String>,

        /// Accept the fix offer without prompting
        #[arg(long)]
        yes: bool,

        /// Never run the fix pipeline, even when offered
        #[arg(long)]
        no_fix: bool,
    },
    /// Show a submitter's accumulated record and past feedback
    History {
        #[arg(default_value = "default_user")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("mentor=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mentor=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let project_dir = match cli.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Review {
            file,
            user,
            session,
            yes,
            no_fix,
        } => cmd::review::run(&project_dir, &file, &user, session, yes, no_fix).await,
        Commands::History { user } => cmd::history::run(&project_dir, &user),
    }
}
