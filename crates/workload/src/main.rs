//! Synthetic traffic CLI.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use traffic_workload::report::RunResults;
use traffic_workload::{
    FilterChain, FilterSpec, Headers, RandomSource, ReqwestTransport, RequestTemplate,
    ResultsReport, ScenarioConfig, SystemClock, Workload, WorkloadEvent, WorkloadOptions,
};

#[derive(Parser)]
#[command(name = "traffic-workload")]
#[command(about = "Generate synthetic HTTP traffic from weighted request templates", long_about = None)]
struct Cli {
    /// Log filter, e.g. `info` or `traffic_workload=debug` (RUST_LOG overrides)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workload from a scenario file
    Run {
        /// Path to scenario YAML file
        #[arg(short, long)]
        scenario: PathBuf,

        /// Override run duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Override target requests per minute
        #[arg(short, long)]
        max: Option<u32>,

        /// Output format: table (default), json, csv
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Send traffic to a single URL pattern
    Quick {
        /// Target URL, may contain brace patterns like {a,b}
        #[arg(short, long)]
        url: String,

        /// Target requests per minute
        #[arg(short, long, default_value = "60")]
        max: u32,

        /// Run duration in seconds
        #[arg(short, long, default_value = "30")]
        duration: u64,

        /// Filter stages in order (workdays, working_hours, expand)
        #[arg(short, long)]
        filter: Vec<String>,

        /// Extra header as "Name: value"
        #[arg(short = 'H', long)]
        header: Vec<String>,

        /// Request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// List available scenarios
    List {
        /// Scenarios directory
        #[arg(short, long, default_value = "scenarios")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs)?;

    match cli.command {
        Commands::Run {
            scenario,
            duration,
            max,
            output,
        } => {
            info!(path = %scenario.display(), "Loading scenario");

            let mut config = ScenarioConfig::from_file(&scenario)
                .with_context(|| format!("Failed to load scenario {}", scenario.display()))?;

            // Apply overrides
            if let Some(d) = duration {
                config.duration_secs = d;
            }
            if let Some(m) = max {
                config.max = m;
            }

            config.validate()?;

            info!(
                name = %config.name,
                templates = config.requests.len(),
                max_per_minute = config.max,
                duration_secs = config.duration_secs,
                "Configuration loaded"
            );

            let options = config.to_options()?;
            let results =
                execute(&config.name, options, config.max, config.duration(), config.timeout()).await?;

            match output.as_str() {
                "json" => println!("{}", ResultsReport::format_json(&results)?),
                "csv" => {
                    println!("{}", ResultsReport::csv_header());
                    println!("{}", ResultsReport::format_csv(&results));
                }
                _ => println!("{}", ResultsReport::format_table(&results)),
            }
            Ok(())
        }
        Commands::Quick {
            url,
            max,
            duration,
            filter,
            header,
            timeout,
        } => {
            let headers = parse_headers(&header)?;
            let rng = RandomSource::default();
            let clock: Arc<dyn traffic_workload::Clock> = Arc::new(SystemClock);

            let mut options = WorkloadOptions::new(vec![RequestTemplate::get(&url)])
                .max(max)
                .headers(headers)
                .rng(rng.clone());
            if !filter.is_empty() {
                let mut chain = FilterChain::default();
                for name in &filter {
                    chain.push(FilterSpec::from_name(name)?.build(&rng, &clock)?);
                }
                options = options.filters(chain);
            }

            info!(url = %url, max_per_minute = max, duration_secs = duration, "Running quick workload");
            let results = execute(
                "quick",
                options,
                max,
                Duration::from_secs(duration),
                Duration::from_secs(timeout),
            )
            .await?;

            println!("{}", ResultsReport::format_table(&results));
            Ok(())
        }
        Commands::List { dir } => {
            println!("Available scenarios in {}:", dir.display());
            println!();

            let entries = std::fs::read_dir(&dir)
                .with_context(|| format!("Failed to read directory {}", dir.display()))?;

            let mut scenarios = Vec::new();
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().map_or(false, |ext| ext == "yaml" || ext == "yml") {
                    match ScenarioConfig::from_file(&path) {
                        Ok(config) => scenarios.push((
                            path.file_name()
                                .map(|n| n.to_string_lossy().to_string())
                                .unwrap_or_default(),
                            config.name,
                            config.description,
                        )),
                        Err(e) => warn!(path = %path.display(), error = %e, "Skipping scenario"),
                    }
                }
            }

            scenarios.sort_by(|a, b| a.0.cmp(&b.0));

            if scenarios.is_empty() {
                println!("No scenario files found");
            } else {
                for (filename, name, desc) in scenarios {
                    println!("  {} - {}", filename, name);
                    println!("    {}", desc);
                    println!();
                }
            }
            Ok(())
        }
    }
}

fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(log_level, env.as_deref())?;

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Build the log filter. A non-empty `RUST_LOG` takes precedence over
/// `--log-level`.
fn log_filter(log_level: &str, env: Option<&str>) -> Result<EnvFilter> {
    let directives = env.filter(|v| !v.trim().is_empty()).unwrap_or(log_level);
    EnvFilter::try_new(directives)
        .with_context(|| format!("Invalid log filter '{}'", directives))
}

/// Parse `Name: value` pairs given on the command line.
fn parse_headers(raw: &[String]) -> Result<Headers> {
    let mut headers = Headers::new();
    for entry in raw {
        let (name, value) = entry
            .split_once(':')
            .with_context(|| format!("Header '{}' is not in 'Name: value' form", entry))?;
        headers.insert(name.trim(), value.trim());
    }
    Ok(headers)
}

/// Run a workload for `duration`, consuming its events, then stop and wait
/// for in-flight requests.
async fn execute(
    name: &str,
    options: WorkloadOptions,
    max: u32,
    duration: Duration,
    timeout: Duration,
) -> Result<RunResults> {
    let transport = Arc::new(ReqwestTransport::new(timeout)?);
    let (mut workload, mut events) = Workload::new(options, transport)?;
    let mut results = RunResults::new(name, max);

    let pb = ProgressBar::new(duration.as_secs());
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}s {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("##-"),
    );

    let start = Instant::now();
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut progress = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = &mut ctrl_c => {
                info!("Received shutdown signal");
                break;
            }
            Some(event) = events.recv() => record(&mut results, &event, &pb),
            _ = progress.tick() => pb.set_position(start.elapsed().as_secs().min(duration.as_secs())),
        }
    }

    let stopped = workload.stop();
    debug!(samples = stopped.samples, "Tick source stopped");

    pb.set_message("Waiting for in-flight requests...");
    results.summary = workload.drain().await;
    while let Ok(event) = events.try_recv() {
        record(&mut results, &event, &pb);
    }
    results.duration_secs = start.elapsed().as_secs_f64();

    pb.finish_with_message("Complete!");
    Ok(results)
}

fn record(results: &mut RunResults, event: &WorkloadEvent, pb: &ProgressBar) {
    results.observe(event);
    if let WorkloadEvent::Visit(visit) = event {
        debug!(
            url = %visit.request.url,
            status = visit.response.status,
            bytes = visit.body.len(),
            "Visit"
        );
    }
    pb.set_message(format!("{} visits, {} errors", results.visits, results.errors));
}
