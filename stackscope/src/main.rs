//! # stackscope - Main Entry Point
//!
//! Supports two operational modes:
//! - **Parse** (`stackscope parse <TRACE>`): rebuild call trees from a recorded trace
//! - **Replay** (`stackscope replay <DUMPS>`): run the live sampler over recorded stack dumps
//! - **Sample** (`stackscope sample`): run the live sampler over this process's own threads

// Time conversions lose precision for display
#![allow(clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::{Duration, Instant};

use stackscope::analysis::{analyze_hotspots, percentage_bar, MethodHotspot};
use stackscope::calltree::Forest;
use stackscope::cli::{Args, Command, ParseArgs, ReplayArgs, SampleArgs};
use stackscope::export::ChromeTraceExporter;
use stackscope::sampling::{ReplaySource, Sampler, SamplerConfig, SamplingResult};
use stackscope::trace::{self, ParsedTrace};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// How often the sampling loop polls for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Cells in a hotspot percentage bar.
const BAR_WIDTH: usize = 10;

/// Name of the thread running the `sample` workload.
#[cfg(target_os = "linux")]
const WORKLOAD_THREAD: &str = "ss-workload";

fn main() {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_SUCCESS,
                _ => EXIT_USAGE,
            };
            // Printing help or usage; nothing useful to do if stdout is gone
            let _ = e.print();
            std::process::exit(code);
        }
    };

    std::process::exit(match run(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

#[tokio::main]
async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Parse(parse) => run_parse(&parse),
        Command::Replay(replay) => run_replay(replay).await,
        Command::Sample(sample) => run_sample(sample).await,
    }
}

fn run_parse(args: &ParseArgs) -> Result<()> {
    let started = Instant::now();
    let parsed = trace::parse_file(&args.trace, args.format.to_format(), args.pid)
        .with_context(|| format!("Failed to parse {}", args.trace.display()))?;
    info!("Parsed {} in {:?}", args.trace.display(), started.elapsed());

    if !args.quiet {
        print_trace_summary(&parsed);
        print_forest(&parsed.forest);
        print_hotspots(&analyze_hotspots(&parsed.forest, args.top));
    }

    if let Some(ref path) = args.export {
        export_forest(&parsed.forest, args.pid.unwrap_or(0), path)?;
        if !args.quiet {
            println!("saved: {}", path.display());
        }
    }

    Ok(())
}

async fn run_replay(args: ReplayArgs) -> Result<()> {
    let source = ReplaySource::from_path(&args.dumps)
        .with_context(|| format!("Failed to load {}", args.dumps.display()))?;

    if !args.quiet {
        println!("stackscope v{}", env!("CARGO_PKG_VERSION"));
        println!("dumps: {} ({} captures)", args.dumps.display(), source.len());
        println!("interval: {}ms", args.interval_ms);
    }

    let config = SamplerConfig {
        interval: Duration::from_millis(args.interval_ms),
        ..SamplerConfig::default()
    };
    let sampler = Sampler::start(source, config).context("Failed to start sampler")?;

    let (result, exit_reason, elapsed) =
        drive_sampler(sampler, args.duration, || false).await?;

    if !args.quiet {
        print_sampling_summary(&result, exit_reason, elapsed);
        print_forest(&result.forest);
        print_hotspots(&analyze_hotspots(&result.forest, args.top));
    }

    if let Some(ref path) = args.export {
        export_forest(&result.forest, std::process::id(), path)?;
        if !args.quiet {
            println!("saved: {}", path.display());
        }
    }

    Ok(())
}

#[cfg(target_os = "linux")]
async fn run_sample(args: SampleArgs) -> Result<()> {
    use stackscope::sampling::{LiveCaptureConfig, ProcessStackSource};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let source = ProcessStackSource::new(LiveCaptureConfig {
        thread_prefix: args.threads.clone(),
        ..LiveCaptureConfig::default()
    })
    .context("Failed to set up stack capture")?;

    if !args.quiet {
        println!("stackscope v{}", env!("CARGO_PKG_VERSION"));
        println!("pid: {}", std::process::id());
        println!("interval: {}ms", args.interval_ms);
    }

    let config = SamplerConfig {
        interval: Duration::from_millis(args.interval_ms),
        ..SamplerConfig::default()
    };
    let sampler = Sampler::start(source, config).context("Failed to start sampler")?;

    // Parse the workload trace on a named thread so it is easy to pick out
    let workload_done = Arc::new(AtomicBool::new(false));
    let workload = match args.workload.clone() {
        Some(trace) => {
            let done = Arc::clone(&workload_done);
            let repeat = args.repeat;
            let handle = std::thread::Builder::new()
                .name(WORKLOAD_THREAD.to_string())
                .spawn(move || {
                    let outcome = (0..repeat).try_for_each(|_| {
                        trace::parse_file(&trace, None, None).map(|_| ())
                    });
                    done.store(true, Ordering::Release);
                    outcome
                })
                .context("Failed to spawn workload thread")?;
            Some(handle)
        }
        None => None,
    };

    let done = Arc::clone(&workload_done);
    let (result, exit_reason, elapsed) =
        drive_sampler(sampler, args.duration, move || done.load(Ordering::Acquire)).await?;

    if let Some(handle) = workload {
        match handle.join() {
            Ok(outcome) => outcome.context("Workload failed to parse its trace")?,
            Err(_) => anyhow::bail!("Workload thread panicked"),
        }
    }

    if !args.quiet {
        print_sampling_summary(&result, exit_reason, elapsed);
        print_forest(&result.forest);
        print_hotspots(&analyze_hotspots(&result.forest, args.top));
    }

    if let Some(ref path) = args.export {
        export_forest(&result.forest, std::process::id(), path)?;
        if !args.quiet {
            println!("saved: {}", path.display());
        }
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
async fn run_sample(_args: SampleArgs) -> Result<()> {
    anyhow::bail!("live sampling is only supported on Linux")
}

/// Run `sampler` until its source ends, `done` reports true, the duration
/// limit passes or Ctrl+C arrives.
async fn drive_sampler(
    sampler: Sampler,
    duration_secs: u64,
    done: impl Fn() -> bool,
) -> Result<(SamplingResult, &'static str, Duration)> {
    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let sampling_start = Instant::now();
    let duration_limit =
        if duration_secs > 0 { Some(Duration::from_secs(duration_secs)) } else { None };

    // Track why we exited the loop
    let exit_reason = loop {
        if sampler.is_finished() {
            break "source exhausted";
        }
        if done() {
            break "workload finished";
        }
        if let Some(limit) = duration_limit {
            if sampling_start.elapsed() >= limit {
                break "duration limit reached";
            }
        }

        tokio::select! {
            () = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = &mut ctrl_c => break "interrupted",
        }
    };

    let result = sampler.stop().context("Failed to stop sampler")?;
    Ok((result, exit_reason, sampling_start.elapsed()))
}

fn print_sampling_summary(result: &SamplingResult, exit_reason: &str, elapsed: Duration) {
    eprintln!(
        "\n{}: {:.1}s, {} ticks ({} abandoned), {} thread samples, {} empty stacks",
        exit_reason,
        elapsed.as_secs_f64(),
        result.stats.ticks,
        result.stats.ticks_abandoned,
        result.stats.thread_samples,
        result.stats.empty_stacks,
    );
}

fn export_forest(forest: &Forest, pid: u32, path: &Path) -> Result<()> {
    let mut exporter = ChromeTraceExporter::new(pid);
    exporter.add_forest(forest);

    let file = File::create(path).context("Failed to create trace output file")?;
    let writer = BufWriter::new(file);
    exporter.export(writer).context("Failed to export trace")?;
    info!("Exported {} events to {}", exporter.event_count(), path.display());
    Ok(())
}

fn print_trace_summary(parsed: &ParsedTrace) {
    let stats = &parsed.stats;
    println!("format: {}", parsed.format);
    if let Some(ref package) = parsed.app_package {
        println!("app: {package}");
    }
    if !parsed.event_types.is_empty() {
        println!("events: {}", parsed.event_types.join(", "));
    }
    println!(
        "samples: {} ({} used, {} dropped, {} lost of {} reported)",
        stats.samples,
        stats.used_samples(),
        stats.dropped_samples,
        stats.lost_samples,
        stats.reported_samples,
    );
    if let (Some(start), Some(end)) = (parsed.start_time, parsed.end_time) {
        let span = end.saturating_since(start);
        println!("span: {:.3}ms", span as f64 / 1_000_000.0);
    }
    if let Some(ref main) = parsed.main_thread {
        println!("main thread: {main}");
    }
}

fn print_forest(forest: &Forest) {
    println!("\nTHREADS ({} threads, {} nodes)", forest.len(), forest.node_count());
    for (name, tree) in forest.iter() {
        let duration = tree.root().duration().unwrap_or(0);
        println!(
            "  {name:<32} {:>6} nodes  {:>10.3}ms",
            tree.len() - 1,
            duration as f64 / 1_000_000.0
        );
    }
}

fn print_hotspots(hotspots: &[MethodHotspot]) {
    if hotspots.is_empty() {
        return;
    }
    println!("\nHOTSPOTS");
    println!("{}", "─".repeat(60));
    for hotspot in hotspots {
        println!(
            "  {:<40} {:>5.1}%  {}  self {:>9.3}ms  total {:>9.3}ms  calls {}",
            hotspot.method.to_string(),
            hotspot.percentage,
            percentage_bar(hotspot.percentage, BAR_WIDTH),
            hotspot.self_time_ns as f64 / 1_000_000.0,
            hotspot.total_time_ns as f64 / 1_000_000.0,
            hotspot.calls,
        );
    }
}
