//! launchpad CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use launchpad_core::pipeline::TriggerKind;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "launchpad")]
#[command(about = "Gate, build, sign, publish and prune desktop releases", long_about = None)]
struct Cli {
    /// Path to the release configuration
    #[arg(long, global = true, env = "LAUNCHPAD_CONFIG", default_value = "launchpad.kdl")]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the release pipeline
    Run {
        /// Source tree containing the version file and build scripts
        #[arg(long, default_value = ".")]
        source_dir: PathBuf,
        /// What invoked this run
        #[arg(long, env = "LAUNCHPAD_TRIGGER", default_value = "manual")]
        trigger: TriggerKind,
        /// Branch that was pushed
        #[arg(long)]
        branch: Option<String>,
        /// Commit being released (defaults to the CI environment)
        #[arg(long)]
        commit: Option<String>,
        /// Build everything but publish to an in-memory host
        #[arg(long)]
        dry_run: bool,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
        /// Show build output
        #[arg(short, long)]
        verbose: bool,
    },
    /// Check whether the declared version may be released
    Gate {
        #[arg(long, default_value = ".")]
        source_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Delete releases beyond the retention window
    Prune {
        /// Override the configured keep count
        #[arg(long)]
        keep: Option<usize>,
        /// Report what would be deleted
        #[arg(long)]
        dry_run: bool,
        /// Keep running, pruning every SECS seconds
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// List published releases
    Releases {
        #[arg(long)]
        json: bool,
    },
    /// Validate a release configuration
    Validate {
        /// Path to the configuration file (defaults to --config)
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let code = match cli.command {
        Commands::Run {
            source_dir,
            trigger,
            branch,
            commit,
            dry_run,
            json,
            verbose,
        } => {
            let options = commands::run::RunOptions {
                source_dir,
                trigger,
                branch,
                commit,
                dry_run,
                json,
                verbose,
            };
            commands::run::run(&cli.config, options).await?
        }
        Commands::Gate { source_dir, json } => {
            commands::gate::gate(&cli.config, &source_dir, json).await?
        }
        Commands::Prune {
            keep,
            dry_run,
            watch,
            json,
        } => commands::prune::prune(&cli.config, keep, dry_run, watch, json).await?,
        Commands::Releases { json } => commands::releases::list(&cli.config, json).await?,
        Commands::Validate { path } => commands::validate(path.as_deref().unwrap_or(&cli.config))?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
