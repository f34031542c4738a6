//! LockedIn gate CLI
//!
//! Operator tooling around the admission scoring pipeline: score a one-off
//! application against the live providers, explain a score offline, refresh
//! a single provider signal, and inspect the default weights.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, warn, Level};
use tracing_subscriber::FmtSubscriber;

use lockedin_core::{
    default_weight_rows, validate_rows, Application, ApplicationStatus, Credential, Decision,
    Provider, ScoringResult, SignalInput, User,
};
use lockedin_providers::ProviderRegistry;
use lockedin_runtime::{
    Gate, GateConfig, GateDeps, MemoryCache, MemoryStore, RefreshOutcome, SharedClock,
    SystemClock,
};

const CLI_USER: &str = "cli-user";
const CLI_APPLICATION: &str = "cli-application";

#[derive(Parser)]
#[command(name = "lockedin-gate")]
#[command(author, version, about = "LockedIn admission gate", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3)
    #[arg(short, long, default_value = "1", global = true)]
    verbose: u8,

    /// Gate configuration file (TOML)
    #[arg(short, long, env = "LOCKEDIN_CONFIG", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Score an application against the live providers
    Score {
        /// GitHub profile URL
        #[arg(long)]
        github: Option<String>,

        /// Codeforces handle
        #[arg(long)]
        codeforces: Option<String>,

        /// LeetCode username
        #[arg(long)]
        leetcode: Option<String>,

        /// GitHub token for exact contribution counts (or set GITHUB_TOKEN)
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        github_token: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Score key=value signals offline with the default weights
    Explain {
        /// Signals such as github_contributions=1000
        #[arg(required = true)]
        signals: Vec<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fetch one provider signal the way the refresh queue does
    Refresh {
        /// source-control, competitive-rating or problem-count
        #[arg(short, long)]
        provider: Provider,

        /// Handle on that provider
        #[arg(long)]
        handle: String,

        /// GitHub token for exact contribution counts (or set GITHUB_TOKEN)
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        github_token: Option<String>,
    },

    /// Show the default scoring weights
    Weights,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let config = GateConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    debug!("Scoring thresholds: {:?}", config.scoring);

    match cli.command {
        Commands::Score {
            github,
            codeforces,
            leetcode,
            github_token,
            json,
        } => {
            let application = Application::new(CLI_APPLICATION, CLI_USER)
                .with_status(ApplicationStatus::Processing);
            let application = match &github {
                Some(url) => application.with_github(url),
                None => application,
            };
            let application = match &codeforces {
                Some(handle) => application.with_codeforces(handle),
                None => application,
            };
            let application = match &leetcode {
                Some(handle) => application.with_leetcode(handle),
                None => application,
            };
            run_score(config, application, github_token, json).await?;
        }
        Commands::Explain { signals, json } => {
            run_explain(&config, &signals, json)?;
        }
        Commands::Refresh {
            provider,
            handle,
            github_token,
        } => {
            run_refresh(config, provider, &handle, github_token).await?;
        }
        Commands::Weights => {
            print_weights();
        }
    }

    Ok(())
}

/// Gate over an in-process store and cache, talking to the real providers
fn build_gate(config: GateConfig, store: Arc<MemoryStore>) -> Result<Gate> {
    let registry = ProviderRegistry::http(&config.providers)
        .context("failed to set up provider clients")?;
    let clock: SharedClock = Arc::new(SystemClock);

    let deps = GateDeps {
        store,
        cache: Arc::new(MemoryCache::new(clock.clone())),
        clock,
        registry: Arc::new(registry),
    };
    Gate::new(config, deps)
}

fn cli_user(github_token: Option<String>) -> User {
    let user = User::new(CLI_USER);
    match github_token {
        Some(token) => user.with_github_token(Credential::new(token)),
        None => user,
    }
}

async fn run_score(
    config: GateConfig,
    application: Application,
    github_token: Option<String>,
    json: bool,
) -> Result<()> {
    if application.proven_providers().is_empty() {
        bail!("Nothing to score. Pass at least one of --github, --codeforces or --leetcode");
    }

    let store = Arc::new(MemoryStore::with_weights(default_weight_rows()));
    store.insert_user(cli_user(github_token));
    store.insert_application(application);

    let gate = build_gate(config, store)?;
    let outcome = gate.verify_now(CLI_APPLICATION).await?;

    if json {
        let doc = serde_json::json!({
            "result": outcome.result,
            "decision": outcome.decision,
            "failedProviders": outcome.failed_providers,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("🔐 LockedIn admission score\n");
    print_result(&outcome.result, outcome.decision);
    if !outcome.failed_providers.is_empty() {
        let failed: Vec<&str> = outcome.failed_providers.iter().map(|p| p.as_str()).collect();
        println!("\n⚠️  Left out (fetch failed): {}", failed.join(", "));
    }
    Ok(())
}

fn parse_signal(arg: &str) -> Result<SignalInput> {
    let (key, value) = arg
        .split_once('=')
        .with_context(|| format!("expected key=value, got {:?}", arg))?;
    let value: f64 = value
        .trim()
        .parse()
        .with_context(|| format!("{} is not a number", value.trim()))?;
    Ok(SignalInput::new(key.trim(), value))
}

fn run_explain(config: &GateConfig, args: &[String], json: bool) -> Result<()> {
    let signals = args
        .iter()
        .map(|arg| parse_signal(arg))
        .collect::<Result<Vec<_>>>()?;
    let weights = validate_rows(&default_weight_rows())?;

    for signal in &signals {
        if !weights.iter().any(|w| w.key == signal.key) {
            warn!("No weight for '{}', it will not count", signal.key);
        }
    }

    let (result, decision) = config.scoring.evaluate(&signals, &weights);

    if json {
        let doc = serde_json::json!({ "result": result, "decision": decision });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        print_result(&result, decision);
    }
    Ok(())
}

async fn run_refresh(
    config: GateConfig,
    provider: Provider,
    handle: &str,
    github_token: Option<String>,
) -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    store.insert_user(cli_user(github_token).with_handle(provider, handle));

    let gate = build_gate(config, store)?;
    match gate.refresh_now(CLI_USER, provider).await? {
        RefreshOutcome::Refreshed(signal) => {
            println!("✅ {} = {}", signal.key, signal.raw_value);
            println!("   fetched at {}", signal.fetched_at);
        }
        RefreshOutcome::Throttled => println!("⏳ {} is backing off, nothing fetched", provider),
        RefreshOutcome::NoHandle => println!("❌ No {} handle to refresh", provider),
    }
    Ok(())
}

fn print_result(result: &ScoringResult, decision: Decision) {
    let verdict = if result.passed { "passed" } else { "not passed" };
    println!(
        "📊 Score: {:.2} / 100 ({} at {})",
        result.score, verdict, result.passing_threshold
    );

    if result.breakdown.is_empty() {
        println!("   No signal matched a weight");
    }
    for (key, b) in &result.breakdown {
        println!(
            "   {:<22} raw {:>9}  normalized {:>6.2}  x {:.2} = {:.2}",
            key, b.raw_value, b.normalized_value, b.weight, b.weighted_contribution
        );
    }

    println!("⚖️  Decision: {}", decision);
}

fn print_weights() {
    println!("{:<22} {:>6} {:>10} {:>10}  description", "key", "weight", "minimum", "threshold");
    for row in default_weight_rows() {
        println!(
            "{:<22} {:>6.2} {:>10} {:>10}  {}",
            row.key, row.weight, row.minimum, row.threshold, row.description
        );
    }
}
