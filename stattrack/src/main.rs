use clap::{Arg, ArgAction, Command};
use stattrack_core::{
    config::CliConfig, provider, shutdown_signal, Config, Orchestrator, Pipeline, RunSummary,
};
use std::{future::Future, path::PathBuf, process, time::Duration};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn cli() -> Command {
    Command::new("stattrack")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Record CPU, memory and network statistics to CSV or SQLite")
        .arg(
            Arg::new("metric")
                .short('m')
                .long("metric")
                .value_name("METRIC")
                .help("Metric to record (cpu|0, mem|1, net|2); repeat for several (default: all)")
                .value_parser(["cpu", "mem", "net", "0", "1", "2"])
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("duration")
                .short('t')
                .long("duration")
                .value_name("SECONDS")
                .help("How long to record; negative or absent runs until interrupted")
                .allow_negative_numbers(true)
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FORMAT")
                .help("Output format")
                .value_parser(["csv", "sqlite"]),
        )
        .arg(
            Arg::new("dir")
                .short('d')
                .long("dir")
                .value_name("PATH")
                .help("Directory the run's output directory is created in")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("interval")
                .long("interval-ms")
                .value_name("MS")
                .help("Sampling interval in milliseconds")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("json-config")
                .long("json-config")
                .value_name("PATH")
                .help("Path to JSON configuration file")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("More log output (-v debug, -vv trace)")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only log errors")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose"),
        )
}

fn run() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    init_tracing(matches.get_count("verbose"), matches.get_flag("quiet"))?;

    // Build CLI configuration
    let cli_config = CliConfig {
        interval_ms: matches.get_one::<u64>("interval").copied(),
        duration_secs: matches.get_one::<i64>("duration").copied(),
        format: matches.get_one::<String>("output").cloned(),
        output_dir: matches.get_one::<PathBuf>("dir").cloned(),
        metrics: matches
            .get_many::<String>("metric")
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
    };

    // Load and validate configuration before anything touches the disk
    let json_config_path = matches.get_one::<PathBuf>("json-config");
    let config = Config::load(Some(&cli_config), json_config_path)?;

    let grace = config.shutdown_grace();
    block_on_bounded(record(config), grace)?
}

/// Runs `future` to completion, then gives leftover blocking work (a
/// provider call that already timed out) at most `grace` before the runtime
/// is torn down.
fn block_on_bounded<F: Future>(future: F, grace: Duration) -> anyhow::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(grace);
    Ok(output)
}

async fn record(config: Config) -> anyhow::Result<()> {
    let metrics = config.selected_metrics();

    let mut providers = Vec::with_capacity(metrics.len());
    for metric in &metrics {
        providers.push(provider::for_metric(*metric)?);
    }

    let run_dir = stattrack_persist::create_run_directory(&config.output_dir)?;

    let mut orchestrator = Orchestrator::new(config.clone());
    for (metric, provider) in metrics.iter().zip(providers) {
        let sink = stattrack_persist::open_sink(config.format, &run_dir, *metric)?;
        orchestrator.add(Pipeline::new(provider, sink)?)?;
    }

    let summary = orchestrator.run(shutdown_signal(config.duration())).await?;
    log_summary(&summary);
    info!(path = %run_dir.display(), "output written");
    Ok(())
}

fn log_summary(summary: &RunSummary) {
    for report in &summary.samplers {
        info!(
            metric = %report.metric,
            ticks = report.ticks,
            emitted = report.emitted,
            skipped = report.skipped,
            "sampler summary"
        );
    }
    for report in &summary.sinks {
        if report.failed > 0 || !report.closed_cleanly {
            warn!(
                metric = %report.metric,
                persisted = report.persisted,
                failed = report.failed,
                closed_cleanly = report.closed_cleanly,
                "sink summary"
            );
        } else {
            info!(metric = %report.metric, persisted = report.persisted, "sink summary");
        }
    }
    info!(
        reason = ?summary.reason,
        persisted = summary.persisted(),
        dropped = summary.dropped(),
        "run complete"
    );
}

fn init_tracing(verbose: u8, quiet: bool) -> anyhow::Result<()> {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("stattrack={}", level).parse()?)
        .add_directive(format!("stattrack_core={}", level).parse()?)
        .add_directive(format!("stattrack_persist={}", level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
