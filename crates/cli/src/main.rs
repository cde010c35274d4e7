mod commands;
mod store_file;

use std::path::{Path, PathBuf};
use std::process;

use campus_restore::{DuplicateStrategy, RestoreConfig, RestoreMode};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// How restored records meet existing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Merge,
    Replace,
}

/// What to do when a record matches one existing row on a unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DuplicatesArg {
    Skip,
    Update,
}

/// Backup and restore for campus data.
#[derive(Parser)]
#[command(name = "campus", version, about = "Backup and restore for campus data")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Path to a TOML restore configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the JSON store file
    #[arg(long, global = true, default_value = "campus-store.json")]
    store: PathBuf,

    /// Directory holding job records
    #[arg(long, global = true, default_value = ".campus/jobs")]
    jobs_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export entity types to a snapshot file
    Backup {
        /// Destination snapshot file
        #[arg(long)]
        out: PathBuf,
        /// Entity type to export (repeatable). Default: every allow-listed type.
        #[arg(long = "entity")]
        entities: Vec<String>,
    },

    /// Restore a snapshot file or a previous backup into the store
    Restore {
        /// Snapshot file to restore
        #[arg(conflicts_with = "backup", required_unless_present = "backup")]
        file: Option<PathBuf>,
        /// Id of a successful backup job to restore from
        #[arg(long)]
        backup: Option<String>,
        /// Merge into existing data or replace it
        #[arg(long, default_value = "merge", value_enum)]
        mode: ModeArg,
        /// Unique-key match handling in merge mode
        #[arg(long, default_value = "skip", value_enum)]
        duplicates: DuplicatesArg,
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Check that a file is a well-formed snapshot
    Validate {
        /// Snapshot file to check
        file: PathBuf,
    },

    /// Remove old job records, their backup files and old rollback snapshots
    Cleanup {
        /// Age in days past which records and files are removed
        #[arg(long)]
        older_than_days: u32,
    },

    /// List job records, or show one
    Jobs {
        /// Job id to show
        id: Option<String>,
    },
}

/// Everything a command needs from the global flags.
pub(crate) struct Context {
    pub output: OutputFormat,
    pub quiet: bool,
    pub store: PathBuf,
    pub jobs_dir: PathBuf,
    pub config: RestoreConfig,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(msg) => {
            report_error(&msg, cli.output, cli.quiet);
            process::exit(1);
        }
    };
    let ctx = Context {
        output: cli.output,
        quiet: cli.quiet,
        store: cli.store,
        jobs_dir: cli.jobs_dir,
        config,
    };

    match cli.command {
        Commands::Backup { out, entities } => {
            block_on(&ctx, commands::backup::cmd_backup(&ctx, &out, entities));
        }
        Commands::Restore {
            file,
            backup,
            mode,
            duplicates,
            dry_run,
        } => {
            let mode = match mode {
                ModeArg::Merge => RestoreMode::Merge,
                ModeArg::Replace => RestoreMode::Replace,
            };
            let duplicates = match duplicates {
                DuplicatesArg::Skip => DuplicateStrategy::Skip,
                DuplicatesArg::Update => DuplicateStrategy::Update,
            };
            block_on(
                &ctx,
                commands::restore::cmd_restore(
                    &ctx,
                    commands::restore::RestoreArgs {
                        file,
                        backup,
                        mode,
                        duplicates,
                        dry_run,
                    },
                ),
            );
        }
        Commands::Validate { file } => {
            commands::validate::cmd_validate(&ctx, &file);
        }
        Commands::Cleanup { older_than_days } => {
            block_on(&ctx, commands::cleanup::cmd_cleanup(&ctx, older_than_days));
        }
        Commands::Jobs { id } => {
            commands::jobs::cmd_jobs(&ctx, id.as_deref());
        }
    }
}

/// Logs go to stderr so `--output json` keeps stdout machine-readable.
fn init_logging(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<RestoreConfig, String> {
    match path {
        Some(path) => RestoreConfig::load(path)
            .map_err(|e| format!("error loading config '{}': {}", path.display(), e)),
        None => Ok(RestoreConfig::default()),
    }
}

fn block_on<F: std::future::Future<Output = ()>>(ctx: &Context, fut: F) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to create tokio runtime: {}", e), ctx.output, ctx.quiet);
            process::exit(1);
        }
    };
    rt.block_on(fut);
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}

/// Print a serializable value as pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e));
    println!("{}", json);
}
