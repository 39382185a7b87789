//! memlimit - inspect and apply container memory limits.
//!
//! `probe` reports what the limiter would discover on this host; `watch`
//! applies it to the process budget and keeps it current until Ctrl-C.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use memlimit::collector::procfs::parse_mountinfo;
use memlimit::collector::{
    CgroupMode, CgroupProvider, FileSystem, RealFs, SystemMemoryProvider, detect_hierarchies,
};
use memlimit::env::DEFAULT_RATIO;
use memlimit::fmt::{format_budget, format_bytes};
use memlimit::provider::{Provider, ProviderExt};
use memlimit::{CancellationToken, Config, Error, MemoryBudget, budget};

const DEFAULT_PROC_PATH: &str = "/proc";

/// Container-aware memory limit tool.
#[derive(Parser)]
#[command(name = "memlimit", about = "Container-aware memory limit tool", version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = DEFAULT_PROC_PATH, global = true)]
    proc_path: PathBuf,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Discover the memory limit once and print it.
    Probe {
        /// Where to look for the limit.
        #[arg(long, value_enum, default_value_t = Source::Auto)]
        mode: Source,

        /// Fraction of the limit to use as the budget.
        #[arg(long, default_value_t = DEFAULT_RATIO)]
        ratio: f64,

        /// Print a JSON report instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Apply the limit to this process and keep it refreshed until Ctrl-C.
    Watch {
        /// Refresh interval in seconds.
        #[arg(short, long, default_value = "10")]
        interval: u64,

        /// Fraction of the limit to use as the budget.
        #[arg(long, default_value_t = DEFAULT_RATIO)]
        ratio: f64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum Source {
    Auto,
    V1,
    V2,
    Hybrid,
    System,
}

impl Source {
    fn provider(self, proc_path: &Path) -> Box<dyn Provider> {
        let mode = match self {
            Source::Auto => CgroupMode::Auto,
            Source::V1 => CgroupMode::V1,
            Source::V2 => CgroupMode::V2,
            Source::Hybrid => CgroupMode::Hybrid,
            Source::System => {
                return Box::new(SystemMemoryProvider::new(RealFs::new(), proc_path));
            }
        };
        if proc_path == Path::new(DEFAULT_PROC_PATH) {
            Box::new(CgroupProvider::system(mode))
        } else {
            Box::new(CgroupProvider::new(RealFs::new(), proc_path).with_mode(mode))
        }
    }
}

/// Result of a single discovery.
#[derive(Debug, Serialize)]
struct ProbeReport {
    source: Source,
    cgroup_v1: bool,
    cgroup_v2: bool,
    ratio: f64,
    /// Raw limit in bytes; `None` when no limit was found.
    limit: Option<u64>,
    /// Budget the limiter would apply.
    budget: Option<i64>,
    error: Option<String>,
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let result = match args.command {
        Command::Probe { mode, ratio, json } => probe(&args.proc_path, mode, ratio, json),
        Command::Watch { interval, ratio } => watch(&args.proc_path, interval, ratio),
    };

    if let Err(e) = result {
        error!(error = %e, "memlimit failed");
        std::process::exit(1);
    }
}

/// Initializes the logging subsystem based on verbosity flags.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = format!("memlimit={}", level).parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn probe(proc_path: &Path, source: Source, ratio: f64, json: bool) -> Result<(), Error> {
    let ratio = memlimit::env::validate_ratio(ratio)?;

    let mountinfo_path = proc_path.join("self/mountinfo");
    let hierarchies = match RealFs::new().read_to_string(&mountinfo_path) {
        Ok(content) => detect_hierarchies(&parse_mountinfo(&content)?),
        Err(e) => {
            debug!(path = %mountinfo_path.display(), error = %e, "mount table unavailable");
            Default::default()
        }
    };

    let provider = source.provider(proc_path);
    let (limit, error) = match provider.memory_limit() {
        Ok(limit) => (Some(limit), None),
        Err(e) if e.is_no_limit() => (None, None),
        Err(e) => (None, Some(e.to_string())),
    };
    let budget = limit.and_then(|_| provider.with_ratio(ratio).capped().memory_limit().ok());

    let report = ProbeReport {
        source,
        cgroup_v1: hierarchies.v1,
        cgroup_v2: hierarchies.v2,
        ratio,
        limit,
        budget: budget.map(|b| i64::try_from(b).unwrap_or(i64::MAX)),
        error,
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(out) => println!("{}", out),
            Err(e) => return Err(Error::Provider(format!("cannot encode report: {}", e))),
        }
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &ProbeReport) {
    println!("source:    {:?}", report.source);
    println!(
        "cgroups:   v1={} v2={}",
        report.cgroup_v1, report.cgroup_v2
    );
    match (report.limit, &report.error) {
        (_, Some(e)) => println!("limit:     error: {}", e),
        (Some(limit), None) => println!("limit:     {} ({} bytes)", format_bytes(limit), limit),
        (None, None) => println!("limit:     none"),
    }
    match report.budget {
        Some(budget) => println!(
            "budget:    {} ({} x {})",
            format_budget(budget),
            report.ratio,
            report.limit.map(format_bytes).unwrap_or_default()
        ),
        None => println!("budget:    unchanged"),
    }
}

fn watch(proc_path: &Path, interval: u64, ratio: f64) -> Result<(), Error> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let token = CancellationToken::new();
    let mut config = Config::new()
        .with_ratio(ratio)
        .with_refresh_interval(Duration::from_secs(interval), token.clone());
    if proc_path != Path::new(DEFAULT_PROC_PATH) {
        config = config.with_provider(Source::Auto.provider(proc_path));
    }

    check_initial(config.apply())?;

    let global = budget::global();
    let mut last = global.memory_limit();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
        let current = global.memory_limit();
        if current != last {
            info!(
                budget = %format_budget(current),
                previous = %format_budget(last),
                "memory budget changed"
            );
            last = current;
        }
    }

    token.cancel();
    token.wait();
    info!("Shutdown complete");
    Ok(())
}

/// Decides whether `watch` keeps running after the first application.
///
/// Only configuration errors are fatal: they are reported before any refresh
/// thread starts. Any other failure is left to the refresh thread.
fn check_initial(result: Result<i64, Error>) -> Result<(), Error> {
    match result {
        Ok(applied) => {
            info!(budget = %format_budget(applied), "memory budget applied");
            Ok(())
        }
        Err(e @ Error::Config(_)) => Err(e),
        Err(e) => {
            warn!(error = %e, "initial memory budget not applied, waiting for refresh");
            Ok(())
        }
    }
}
