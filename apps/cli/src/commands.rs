//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use ingestkit_connectors::build_registry;
use ingestkit_core::{
    ConnectorOutcome, ExecutionPlan, Orchestrator, ProgressReporter, RunReport, SkipReason,
};
use ingestkit_shared::{
    AppConfig, IngestMode, IngestRequest, OrchestratorConfig, Phase, config_dir, init_config,
    load_config, load_config_from,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ingestkit: phase-ordered, budget-aware entity ingestion.
#[derive(Parser)]
#[command(
    name = "ingestkit",
    version,
    about = "Run configured data-source connectors over a query and merge what they find.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.ingestkit/ingestkit.toml).
    #[arg(long, global = true, env = "INGESTKIT_CONFIG")]
    pub config: Option<PathBuf>,

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
    /// Run a request through every configured connector.
    Run {
        /// Free-text query.
        query: String,

        /// Ingestion mode: resolve-one or discover-many.
        #[arg(short, long, default_value = "discover-many")]
        mode: IngestMode,

        /// Stop once this many unique entities are accepted.
        #[arg(long)]
        target: Option<usize>,

        /// Stop a resolve-one run once confidence reaches this value.
        #[arg(long)]
        min_confidence: Option<f64>,

        /// Ceiling on total connector cost, in USD.
        #[arg(long)]
        budget: Option<f64>,

        /// Override the configured connector concurrency.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Write the full JSON run report here.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show the execution plan built from the configured connectors.
    Plan {
        /// Print the plan as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the features extracted from a query.
    Features {
        /// Free-text query.
        query: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file and starter fixtures.
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
        0 => "ingestkit=info",
        1 => "ingestkit=debug",
        _ => "ingestkit=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Run {
            query,
            mode,
            target,
            min_confidence,
            budget,
            concurrency,
            out,
        } => {
            let request = build_request(mode, query, target, min_confidence, budget);
            cmd_run(config_path.as_deref(), request, concurrency, out.as_deref()).await
        }
        Command::Plan { json } => cmd_plan(config_path.as_deref(), json),
        Command::Features { query } => cmd_features(&query),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref()),
        },
    }
}

/// Assemble the request from flags. Goals left unset fall back to config
/// defaults inside the orchestrator.
fn build_request(
    mode: IngestMode,
    query: String,
    target: Option<usize>,
    min_confidence: Option<f64>,
    budget: Option<f64>,
) -> IngestRequest {
    let mut request = IngestRequest::new(mode, query);
    if let Some(count) = target {
        request = request.with_target(count);
    }
    if let Some(confidence) = min_confidence {
        request = request.with_min_confidence(confidence);
    }
    if let Some(usd) = budget {
        request = request.with_budget(usd);
    }
    request
}

/// Load the config and the directory relative fixture paths resolve against.
fn resolve_config(path: Option<&Path>) -> Result<(AppConfig, PathBuf)> {
    match path {
        Some(p) => {
            let config = load_config_from(p)?;
            let base = p
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            Ok((config, base))
        }
        None => Ok((load_config()?, config_dir()?)),
    }
}

fn build_plan(config: &AppConfig) -> Result<ExecutionPlan> {
    if config.connectors.is_empty() {
        return Err(eyre!(
            "no connectors configured. Run `ingestkit config init` or pass --config"
        ));
    }
    let specs = config.connectors.iter().map(|d| d.spec.clone()).collect();
    Ok(ExecutionPlan::build(specs)?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(
    config_path: Option<&Path>,
    request: IngestRequest,
    concurrency: Option<usize>,
    out: Option<&Path>,
) -> Result<()> {
    let (config, base_dir) = resolve_config(config_path)?;
    let plan = build_plan(&config)?;
    let registry = build_registry(&config.connectors, &base_dir)?;

    let mut runtime = OrchestratorConfig::from(&config);
    if let Some(n) = concurrency {
        runtime.max_concurrency = n.max(1);
    }
    let orchestrator = Orchestrator::new(plan, registry, runtime)?;

    info!(query = %request.query, mode = %request.mode, "starting ingestion run");

    let reporter = CliProgress::new();
    let report = orchestrator.run(request, &reporter).await?;

    print_summary(&report);

    if let Some(path) = out {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).map_err(|e| eyre!("failed to write {}: {e}", path.display()))?;
        println!("  Report: {}", path.display());
        println!();
    }

    Ok(())
}

fn print_summary(report: &RunReport) {
    let ctx = &report.context;

    println!();
    println!("  Run complete");
    println!("  Run ID:     {}", report.run_id);
    println!("  Mode:       {}", report.request.mode);
    println!("  Phases:     {}/{} run", report.phases_run(), Phase::ALL.len());
    println!("  Entities:   {}", ctx.entity_count());
    println!("  Confidence: {:.2}", ctx.confidence());
    println!("  Spent:      ${:.2}", ctx.budget_spent_usd());
    if let Some(stop) = report.stop_reason {
        println!("  Stopped:    {}", SkipReason::from(stop));
    }
    println!("  Time:       {:.1}s", report.elapsed_ms() as f64 / 1000.0);

    let skipped = report.skipped();
    if !skipped.is_empty() {
        println!();
        println!("  Skipped:");
        for (name, reason) in skipped {
            println!("    {name} ({reason})");
        }
    }

    if !ctx.errors().is_empty() {
        println!();
        println!("  Errors:");
        for e in ctx.errors() {
            println!("    [{}] {}: {}", e.phase, e.connector, e.message);
        }
    }

    if !ctx.entities().is_empty() {
        println!();
        println!("  Entities:");
        for entity in ctx.entities() {
            println!("    {}  {}", entity.candidate.name, entity.dedup_key);
        }
    }
    println!();
}

fn cmd_plan(config_path: Option<&Path>, json: bool) -> Result<()> {
    let (config, _) = resolve_config(config_path)?;
    let plan = build_plan(&config)?;
    let outline = plan.outline();

    if json {
        println!("{}", serde_json::to_string_pretty(&outline)?);
        return Ok(());
    }

    for phase in &outline.phases {
        println!("{}", phase.phase);
        if phase.waves.is_empty() {
            println!("  (no connectors)");
        }
        for (i, wave) in phase.waves.iter().enumerate() {
            println!("  wave {}: {}", i + 1, wave.join(", "));
        }
    }
    if !outline.providers.is_empty() {
        println!();
        println!("providers");
        for (key, provider) in &outline.providers {
            println!("  {key} <- {provider}");
        }
    }
    Ok(())
}

fn cmd_features(query: &str) -> Result<()> {
    let features = ingestkit_features::extract(query, None);
    println!("{}", serde_json::to_string_pretty(&features)?);
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let (config, _) = resolve_config(config_path)?;
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
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase_started(&self, phase: Phase, connectors: usize) {
        self.spinner
            .set_message(format!("{phase}: running {connectors} connector(s)"));
    }

    fn phase_skipped(&self, phase: Phase, reason: SkipReason) {
        self.spinner.set_message(format!("{phase}: skipped ({reason})"));
    }

    fn connector_finished(&self, connector: &str, outcome: &ConnectorOutcome) {
        let status = match outcome {
            ConnectorOutcome::Succeeded { accepted, .. } => format!("{accepted} accepted"),
            ConnectorOutcome::Errored { message } => format!("failed: {message}"),
            ConnectorOutcome::Skipped { reason } => format!("skipped ({reason})"),
        };
        self.spinner.set_message(format!("{connector}: {status}"));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse_into_request() {
        let cli = Cli::try_parse_from([
            "ingestkit",
            "run",
            "padel courts in leeds",
            "--mode",
            "discover-many",
            "--target",
            "5",
            "--budget",
            "1.5",
        ])
        .unwrap();
        let Command::Run {
            query,
            mode,
            target,
            min_confidence,
            budget,
            ..
        } = cli.command
        else {
            panic!("expected run command");
        };
        let request = build_request(mode, query, target, min_confidence, budget);
        assert_eq!(request.mode, IngestMode::DiscoverMany);
        assert_eq!(request.target_entity_count, Some(5));
        assert_eq!(request.budget_usd, Some(1.5));
        assert_eq!(request.min_confidence, None);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["ingestkit", "run", "x", "--mode", "everything"]).is_err());
    }

    #[test]
    fn empty_connector_list_is_reported() {
        let err = build_plan(&AppConfig::default()).unwrap_err();
        assert!(err.to_string().contains("no connectors configured"));
    }
}
