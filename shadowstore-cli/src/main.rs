mod plan;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use plan::Plan;
use shadowstore_core::{
    purge_orphans, AmbientContext, CommitReport, FileStore, PhysicalStore, ScopeError,
    ScopedWrapper, SessionId, ShadowConfig, ShadowPath, TransactionScope,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shadowstore")]
#[command(about = "Stage file changes in a shadow copy and publish them in one step")]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a JSON change plan to a directory as one transaction
    Apply {
        /// Directory the plan is applied to
        #[arg(short, long)]
        root: PathBuf,

        /// Plan file
        #[arg(short, long)]
        plan: PathBuf,

        /// Staging directory (overrides the configuration)
        #[arg(long)]
        staging: Option<PathBuf>,

        /// Stage everything, print the result, then roll back
        #[arg(long)]
        dry_run: bool,
    },

    /// List a directory
    Ls {
        /// Store root
        #[arg(short, long)]
        root: PathBuf,

        /// Directory inside the store
        #[arg(default_value = "")]
        path: String,

        /// Wildcard over file names
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Remove session directories left behind by a crashed process
    Purge {
        /// Staging directory (overrides the configuration)
        #[arg(long)]
        staging: Option<PathBuf>,
    },
}

/// Result of running a plan.
#[derive(Debug)]
enum Outcome {
    Committed(CommitReport),
    DryRun {
        staged: Vec<ShadowPath>,
        deleted: Vec<ShadowPath>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.filter_directive().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(errors) = config.validate() {
        bail!("Invalid configuration:\n  {}", errors.join("\n  "));
    }

    match cli.command {
        Commands::Apply {
            root,
            plan,
            staging,
            dry_run,
        } => {
            let plan = Plan::load(&plan)?;
            let staging = staging.unwrap_or_else(|| config.staging_root.clone());
            info!(
                "Applying {} operation(s) to {}",
                plan.operations.len(),
                root.display()
            );

            let outcome = AmbientContext::scope(None, async {
                apply(&config, &root, &staging, &plan, dry_run)
            })
            .await?;
            print_outcome(&outcome);
        }
        Commands::Ls { root, path, filter } => {
            for line in list(&root, &path, filter.as_deref())? {
                println!("{}", line);
            }
        }
        Commands::Purge { staging } => {
            let staging = staging.unwrap_or_else(|| config.staging_root.clone());
            let removed = purge(&staging)?;
            println!("Removed {} orphaned session(s)", removed);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ShadowConfig> {
    match path {
        Some(path) => ShadowConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(ShadowConfig::default()),
    }
}

/// Runs a plan inside one transaction scope.
///
/// A failing operation drops the scope, which rolls back everything staged
/// before it.
fn apply(
    config: &ShadowConfig,
    root: &Path,
    staging: &Path,
    plan: &Plan,
    dry_run: bool,
) -> Result<Outcome> {
    let base = PhysicalStore::open(root)
        .with_context(|| format!("Failed to open {}", root.display()))?
        .with_root_url(config.root_url.clone());
    let staging = PhysicalStore::open(staging)
        .with_context(|| format!("Failed to open staging {}", staging.display()))?;
    let wrapper = Arc::new(ScopedWrapper::new(
        Arc::new(base),
        ShadowPath::parse("apply")?,
        staging.clone(),
    ));

    let scope = TransactionScope::create(&staging, SessionId::generate(), &[wrapper.clone()])?;
    for (index, operation) in plan.operations.iter().enumerate() {
        operation.apply(&*wrapper).with_context(|| {
            format!("Operation {} on {} failed", index + 1, operation.path())
        })?;
    }

    if dry_run {
        let mut staged = Vec::new();
        let mut deleted = Vec::new();
        for overlay in scope.session().overlays() {
            staged.extend(overlay.staged_files());
            deleted.extend(overlay.deleted_paths());
        }
        info!("Dry run, discarding session {}", scope.id());
        return Ok(Outcome::DryRun { staged, deleted });
    }

    match scope.complete() {
        Ok(report) => Ok(Outcome::Committed(report)),
        Err(ScopeError::Commit(overlays)) => {
            for failure in overlays.iter().flat_map(|overlay| &overlay.failures) {
                warn!("{}: {}", failure, failure.source);
            }
            let failed = overlays.iter().map(|overlay| overlay.failures.len()).sum::<usize>();
            bail!("{} change(s) could not be applied, the rest were committed", failed)
        }
        Err(e) => Err(e.into()),
    }
}

fn print_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Committed(report) => println!(
            "Committed: {} file(s) written, {} deletion(s) applied",
            report.files_written, report.deletions_applied
        ),
        Outcome::DryRun { staged, deleted } => {
            for path in staged {
                println!("write  {}", path);
            }
            for path in deleted {
                println!("delete {}", path);
            }
            println!("Dry run: nothing was changed");
        }
    }
}

/// Directories (with a trailing `/`) then files.
fn list(root: &Path, path: &str, filter: Option<&str>) -> Result<Vec<String>> {
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    let store = PhysicalStore::open(root)?;
    let dir = ShadowPath::parse(path)?;

    let mut lines: Vec<String> = store
        .get_directories(&dir)?
        .into_iter()
        .map(|sub| format!("{}/", sub))
        .collect();
    lines.extend(store.get_files(&dir, filter)?.into_iter().map(|file| file.to_string()));
    Ok(lines)
}

fn purge(staging: &Path) -> Result<usize> {
    if !staging.is_dir() {
        return Ok(0);
    }
    let staging = PhysicalStore::open(staging)?;
    Ok(purge_orphans(&staging)?)
}
