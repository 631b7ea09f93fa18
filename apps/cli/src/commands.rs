//! CLI command definitions, routing, and tracing setup.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use tractscore_core::export::EXPORT_DATASET_NAME;
use tractscore_core::{
    DatasetRegistry, ProgressReporter, RunReport, RunRequest, SchedulerOptions, default_registry,
    runner, scheduler,
};
use tractscore_shared::{AppConfig, init_config, load_config, load_config_from};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// tractscore: run dataset pipelines and publish the score artifacts.
#[derive(Parser)]
#[command(
    name = "tractscore",
    version,
    about = "Run dataset pipelines and publish census tract score artifacts.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.tractscore/tractscore.toml).
    #[arg(long, global = true, env = "TRACTSCORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run every dataset pipeline, or one by name.
    Run {
        /// Run only this dataset.
        #[arg(short, long)]
        dataset: Option<String>,

        /// Reuse sources already downloaded.
        #[arg(long)]
        use_cache: bool,

        /// Run one job at a time.
        #[arg(long)]
        no_concurrency: bool,
    },

    /// Inspect, download or remove dataset sources.
    Sources {
        #[command(subcommand)]
        action: SourcesAction,
    },

    /// Score export commands.
    Score {
        #[command(subcommand)]
        action: ScoreAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Source subcommands.
#[derive(Subcommand)]
pub(crate) enum SourcesAction {
    /// List the sources of the selected datasets.
    List {
        #[arg(short, long)]
        dataset: Option<String>,
    },
    /// Download the sources of the selected datasets.
    Extract {
        #[arg(short, long)]
        dataset: Option<String>,

        /// Skip sources already on disk.
        #[arg(long)]
        use_cache: bool,
    },
    /// Delete the downloaded sources of the selected datasets.
    Clear {
        #[arg(short, long)]
        dataset: Option<String>,
    },
}

/// Score subcommands.
#[derive(Subcommand)]
pub(crate) enum ScoreAction {
    /// Merge the score with reference data and write every public artifact.
    Post {
        /// Reuse the county gazetteer if already downloaded.
        #[arg(long)]
        use_cache: bool,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "tractscore=info",
        1 => "tractscore=debug",
        _ => "tractscore=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            dataset,
            use_cache,
            no_concurrency,
        } => {
            let request = RunRequest {
                selector: dataset.as_deref(),
                use_cache,
                concurrency_disabled: no_concurrency,
            };
            cmd_run(config_path, &request).await
        }
        Command::Sources { action } => match action {
            SourcesAction::List { dataset } => cmd_sources_list(config_path, dataset.as_deref()),
            SourcesAction::Extract { dataset, use_cache } => {
                cmd_sources_extract(config_path, dataset.as_deref(), use_cache).await
            }
            SourcesAction::Clear { dataset } => cmd_sources_clear(config_path, dataset.as_deref()),
        },
        Command::Score { action } => match action {
            ScoreAction::Post { use_cache } => {
                let request = RunRequest {
                    selector: Some(EXPORT_DATASET_NAME),
                    use_cache,
                    concurrency_disabled: true,
                };
                cmd_run(config_path, &request).await
            }
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

fn resolve_registry(path: Option<&Path>) -> Result<(AppConfig, DatasetRegistry)> {
    let config = resolve_config(path)?;
    let registry = default_registry(&config).wrap_err_with(|| {
        format!(
            "failed to build dataset registry (export config {})",
            config.paths.export_config.display()
        )
    })?;
    Ok((config, registry))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, request: &RunRequest<'_>) -> Result<()> {
    let (config, registry) = resolve_registry(config_path)?;
    let options = SchedulerOptions::from(&config.scheduler);

    info!(
        dataset = request.selector.unwrap_or("all"),
        use_cache = request.use_cache,
        parallelism = options.parallelism,
        "starting run"
    );

    let reporter = CliProgress::new();
    let result = scheduler::run(&registry, request, &options, &reporter).await;
    reporter.spinner.finish_and_clear();
    let report = result?;

    println!();
    println!("  Run complete!");
    println!("  Run:       {}", report.run_id);
    println!("  Completed: {}", report.completed.len());
    if !report.skipped.is_empty() {
        println!("  Skipped:   {}", report.skipped.join(", "));
    }
    println!("  Time:      {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

fn cmd_sources_list(config_path: Option<&Path>, dataset: Option<&str>) -> Result<()> {
    let (_, registry) = resolve_registry(config_path)?;
    for (name, source) in runner::data_sources(&registry, dataset)? {
        let state = if source.is_cached() { "cached" } else { "missing" };
        println!("{name:<24} {state:<8} {source}");
    }
    Ok(())
}

async fn cmd_sources_extract(
    config_path: Option<&Path>,
    dataset: Option<&str>,
    use_cache: bool,
) -> Result<()> {
    let (_, registry) = resolve_registry(config_path)?;
    runner::extract_data_sources(&registry, dataset, use_cache).await?;
    println!("Sources extracted.");
    Ok(())
}

fn cmd_sources_clear(config_path: Option<&Path>, dataset: Option<&str>) -> Result<()> {
    let (_, registry) = resolve_registry(config_path)?;
    runner::clear_data_source_cache(&registry, dataset)?;
    println!("Source cache cleared.");
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
    phase: Mutex<String>,
    running: Mutex<BTreeSet<String>>,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self {
            spinner,
            phase: Mutex::new(String::new()),
            running: Mutex::new(BTreeSet::new()),
        }
    }

    fn refresh(&self) {
        let phase = self.phase.lock().map(|p| p.clone()).unwrap_or_default();
        let running = self
            .running
            .lock()
            .map(|r| r.iter().cloned().collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        if running.is_empty() {
            self.spinner.set_message(phase);
        } else {
            self.spinner.set_message(format!("{phase}: {running}"));
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = name.to_string();
        }
        self.refresh();
    }

    fn job_started(&self, dataset: &str) {
        if let Ok(mut running) = self.running.lock() {
            running.insert(dataset.to_string());
        }
        self.refresh();
    }

    fn job_finished(&self, dataset: &str, ok: bool) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(dataset);
        }
        let mark = if ok { "✓" } else { "✗" };
        self.spinner.println(format!("  {mark} {dataset}"));
        self.refresh();
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}
