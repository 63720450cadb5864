//! Estimate finalization latency, throughput, and resilience with Monte-Carlo trials.

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use colored::Colorize;
use estimator::{
    bench::{
        LatencyAnalysis, Orchestrator, ResilienceReport, ScalabilityReport, ThroughputAnalysis,
    },
    crate_version,
    strategy::{Parallel, Sequential, Strategy},
    Config, Error,
};
use serde::Serialize;
use std::{process, str::FromStr};
use tracing::{debug, error, Level};

/// Analyses that can be selected from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Analysis {
    Latency,
    Throughput,
    Resilience,
    Scalability,
    All,
}

impl FromStr for Analysis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latency" => Ok(Self::Latency),
            "throughput" => Ok(Self::Throughput),
            "resilience" => Ok(Self::Resilience),
            "scalability" => Ok(Self::Scalability),
            "all" => Ok(Self::All),
            other => Err(format!("unknown analysis: {other}")),
        }
    }
}

impl Analysis {
    fn includes(&self, other: Analysis) -> bool {
        *self == Analysis::All || *self == other
    }
}

/// Everything produced by one invocation.
#[derive(Serialize)]
struct Report {
    config: Config,
    latency: Option<LatencyAnalysis>,
    throughput: Option<ThroughputAnalysis>,
    resilience: Option<ResilienceReport>,
    scalability: Option<ScalabilityReport>,
}

fn main() {
    let matches = Command::new("alpenglow-estimator")
        .about("Estimate finalization latency, throughput, and resilience with Monte-Carlo trials")
        .version(crate_version())
        .arg(
            Arg::new("analysis")
                .value_parser(["latency", "throughput", "resilience", "scalability", "all"])
                .default_value("latency")
                .help("Analysis to run"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_parser(value_parser!(String))
                .help("Path to a YAML configuration (omitted fields use defaults)"),
        )
        .arg(
            Arg::new("validators")
                .long("validators")
                .value_parser(value_parser!(usize))
                .help("Number of validators"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(value_parser!(u64))
                .help("Seed of the run"),
        )
        .arg(
            Arg::new("trials")
                .long("trials")
                .value_parser(value_parser!(usize))
                .default_value("1000")
                .help("Trials per configuration (leader windows for the throughput analysis)"),
        )
        .arg(
            Arg::new("base-delay")
                .long("base-delay")
                .value_parser(value_parser!(f64))
                .help("Base one-way network delay (in milliseconds)"),
        )
        .arg(
            Arg::new("adversarial")
                .long("adversarial")
                .value_parser(value_parser!(f64))
                .help("Fraction of stake that withholds votes"),
        )
        .arg(
            Arg::new("crash")
                .long("crash")
                .value_parser(value_parser!(f64))
                .help("Fraction of stake that is offline"),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_parser(value_parser!(usize))
                .default_value("1")
                .help("Worker threads (0 uses all available cores)"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print results as JSON"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info")
                .help("Maximum level of log events"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .action(ArgAction::SetTrue)
                .help("Emit log events as JSON"),
        )
        .get_matches();

    // Initialize logging
    let level = matches
        .get_one::<String>("log-level")
        .and_then(|level| Level::from_str(level).ok())
        .unwrap_or(Level::INFO);
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr);
    if matches.get_flag("log-json") {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    // Run the selected analyses
    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            process::exit(1);
        }
    };
    let threads = *matches.get_one::<usize>("threads").unwrap_or(&1);
    let result = if threads == 1 {
        run(config, Sequential, &matches)
    } else {
        match Parallel::with_threads(threads) {
            Ok(strategy) => {
                debug!(threads = strategy.threads(), "built thread pool");
                run(config, strategy, &matches)
            }
            Err(err) => {
                error!(%err, "unable to build thread pool");
                process::exit(1);
            }
        }
    };
    let report = match result {
        Ok(report) => report,
        Err(err) => {
            error!(%err, "analysis failed");
            process::exit(1);
        }
    };

    // Emit results
    if matches.get_flag("json") {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                error!(%err, "unable to serialize results");
                process::exit(1);
            }
        }
    } else {
        print_report(&report);
    }
}

/// Load the configuration file (if any) and apply command-line overrides.
fn load_config(matches: &ArgMatches) -> Result<Config, Error> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_yaml_file(path)?,
        None => Config::default(),
    };
    if let Some(validators) = matches.get_one::<usize>("validators") {
        config.validators = *validators;
    }
    if let Some(seed) = matches.get_one::<u64>("seed") {
        config.seed = *seed;
    }
    if let Some(base_delay) = matches.get_one::<f64>("base-delay") {
        config.base_delay_ms = *base_delay;
    }
    if let Some(adversarial) = matches.get_one::<f64>("adversarial") {
        config.adversarial_stake = *adversarial;
    }
    if let Some(crash) = matches.get_one::<f64>("crash") {
        config.crash_stake = *crash;
    }
    config.validate()?;
    Ok(config)
}

fn run<S: Strategy>(config: Config, strategy: S, matches: &ArgMatches) -> Result<Report, Error> {
    let analysis = matches
        .get_one::<String>("analysis")
        .and_then(|analysis| Analysis::from_str(analysis).ok())
        .unwrap_or(Analysis::Latency);
    let trials = *matches.get_one::<usize>("trials").unwrap_or(&1000);
    debug!(?analysis, trials, ?config, "starting run");

    let mut orchestrator = Orchestrator::new(config.clone(), strategy)?;
    let latency = analysis
        .includes(Analysis::Latency)
        .then(|| orchestrator.run_latency_analysis(trials));
    let throughput = analysis
        .includes(Analysis::Throughput)
        .then(|| orchestrator.run_throughput_analysis(trials));
    let resilience = if analysis.includes(Analysis::Resilience) {
        Some(orchestrator.run_resilience_analysis(trials)?)
    } else {
        None
    };
    let scalability = if analysis.includes(Analysis::Scalability) {
        Some(orchestrator.run_scalability_analysis(trials)?)
    } else {
        None
    };
    Ok(Report {
        config,
        latency,
        throughput,
        resilience,
        scalability,
    })
}

fn ms(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:.2}ms"),
        None => "n/a".to_string(),
    }
}

fn mbps(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{:.2}MB/s", value / 1_000_000.0),
        None => "n/a".to_string(),
    }
}

fn print_latency(analysis: &LatencyAnalysis) {
    let latency_line = format!(
        "    latency mean: {} (stdv: {}) | median: {} | p95: {} | p99: {}",
        ms(analysis.mean_latency_ms),
        ms(analysis.std_dev_latency_ms),
        ms(analysis.median_latency_ms),
        ms(analysis.p95_latency_ms),
        ms(analysis.p99_latency_ms),
    );
    println!("{}", latency_line.cyan());
    let path_line = format!(
        "    fast path: {:.1}% | slow path: {:.1}% | finalized: {:.1}% ({} of {} trials, {} skipped)",
        analysis.fast_path_rate * 100.0,
        analysis.slow_path_rate * 100.0,
        analysis.finalization_rate * 100.0,
        analysis.finalized,
        analysis.completed,
        analysis.skipped,
    );
    println!("{}", path_line.magenta());
    let stage_line = format!(
        "    dissemination: {:.2}ms | voting: {} | throughput: {} | relays: {:.1} | utilization: {:.1}%",
        analysis.mean_dissemination_ms,
        ms(analysis.mean_voting_ms),
        mbps(analysis.mean_throughput_bps),
        analysis.mean_relays,
        analysis.mean_network_utilization * 100.0,
    );
    println!("{}", stage_line.white());
    let bound_line = format!(
        "    bound: {:.2}ms (δ_fast: {:.2}ms, 2·δ_slow: {:.2}ms) | actual/bound: {}",
        analysis.bound.bound_ms,
        analysis.bound.delta_fast_ms,
        2.0 * analysis.bound.delta_slow_ms,
        analysis
            .bound_ratio
            .map_or("n/a".to_string(), |ratio| format!("{ratio:.2}")),
    );
    println!("{}", bound_line.yellow());
}

fn print_report(report: &Report) {
    println!("{}", "-".repeat(80).yellow());
    let header = format!(
        "validators: {} | seed: {} | base delay: {}ms | adversarial: {} | crash: {}",
        report.config.validators,
        report.config.seed,
        report.config.base_delay_ms,
        report.config.adversarial_stake,
        report.config.crash_stake,
    );
    println!("{}", header.bold().blue());

    if let Some(analysis) = &report.latency {
        println!("{}", "\nlatency:".bold().green());
        print_latency(analysis);
    }
    if let Some(analysis) = &report.throughput {
        println!("{}", "\nthroughput:".bold().green());
        let line = format!(
            "    windows: {} x {} blocks | finalized: {} of {} | sustained: {} | peak: {} | nominal: {}",
            analysis.windows - analysis.skipped,
            analysis.leader_window,
            analysis.blocks_finalized,
            analysis.blocks_proposed,
            mbps(analysis.sustained_throughput_bps),
            mbps(analysis.peak_throughput_bps),
            mbps(Some(analysis.nominal_throughput_bps)),
        );
        println!("{}", line.cyan());
    }
    if let Some(report) = &report.resilience {
        println!("{}", "\nresilience:".bold().green());
        for case in &report.cases {
            println!("{}", format!("  {:?}", case.case).green());
            print_latency(&case.analysis);
            let line = format!(
                "    degradation: {} | fast path change: {:+.1}% | finalization change: {:+.1}%",
                case.degradation
                    .latency_increase_ms
                    .map_or("n/a".to_string(), |increase| format!("{increase:+.2}ms")),
                case.degradation.fast_path_rate_change * 100.0,
                case.degradation.finalization_rate_change * 100.0,
            );
            println!("{}", line.red());
        }
    }
    if let Some(report) = &report.scalability {
        println!("{}", "\nscalability:".bold().green());
        for point in &report.points {
            println!("{}", format!("  validators: {}", point.validators).green());
            print_latency(&point.analysis);
        }
        let line = format!(
            "    latency trend: {} per validator | throughput trend: {} per validator",
            ms(report.latency_slope()),
            mbps(report.throughput_slope()),
        );
        println!("{}", line.yellow());
    }
}
