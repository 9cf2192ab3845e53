//! CLI argument definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::trace::TraceFormat;

#[derive(Parser)]
#[command(
    name = "stackscope",
    version,
    about = "Build per-thread call trees from stack samples",
    after_help = "\
EXAMPLES:
    stackscope parse perf.trace                     Summarize a simpleperf trace
    stackscope parse perf.trace --export out.json   Convert to Chrome trace JSON
    stackscope replay stacks.jsonl --interval-ms 5  Re-sample recorded stack dumps
    stackscope sample --workload perf.trace         Profile stackscope parsing a trace"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Parse a recorded trace file offline
    Parse(ParseArgs),
    /// Drive the live sampler from recorded stack dumps
    Replay(ReplayArgs),
    /// Sample the threads of this process (Linux)
    Sample(SampleArgs),
}

/// Trace container selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    /// Detect from the leading bytes
    Auto,
    Simpleperf,
}

impl FormatArg {
    pub fn to_format(self) -> Option<TraceFormat> {
        match self {
            Self::Auto => None,
            Self::Simpleperf => Some(TraceFormat::Simpleperf),
        }
    }
}

#[derive(clap::Args)]
pub struct ParseArgs {
    /// Trace file to parse
    #[arg(value_name = "TRACE")]
    pub trace: PathBuf,

    /// Trace container format
    #[arg(long, value_enum, default_value = "auto")]
    pub format: FormatArg,

    /// Process whose main thread should be reported
    #[arg(short, long)]
    pub pid: Option<u32>,

    /// Export Chrome trace JSON to file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Number of hotspots to print (0 = all)
    #[arg(long, default_value = "10")]
    pub top: usize,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(clap::Args)]
pub struct ReplayArgs {
    /// JSON-lines file of recorded stack dumps
    #[arg(value_name = "DUMPS")]
    pub dumps: PathBuf,

    /// Capture interval in milliseconds
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_ms: u64,

    /// Stop after N seconds (0 = until the dumps run out)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Export Chrome trace JSON to file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Number of hotspots to print (0 = all)
    #[arg(long, default_value = "10")]
    pub top: usize,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(clap::Args)]
pub struct SampleArgs {
    /// Trace to parse repeatedly on a worker thread while sampling
    #[arg(long, value_name = "TRACE")]
    pub workload: Option<PathBuf>,

    /// How many times the workload parses its trace
    #[arg(long, default_value = "20", requires = "workload")]
    pub repeat: u32,

    /// Only sample threads whose name starts with PREFIX
    #[arg(long, value_name = "PREFIX")]
    pub threads: Option<String>,

    /// Capture interval in milliseconds
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_ms: u64,

    /// Stop after N seconds (0 = when the workload ends, or on Ctrl+C)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Export Chrome trace JSON to file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Number of hotspots to print (0 = all)
    #[arg(long, default_value = "10")]
    pub top: usize,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommand() {
        let args = Args::try_parse_from([
            "stackscope",
            "parse",
            "perf.trace",
            "--format",
            "simpleperf",
            "--pid",
            "100",
        ])
        .unwrap();
        let Command::Parse(parse) = args.command else {
            panic!("expected parse subcommand");
        };
        assert_eq!(parse.trace, PathBuf::from("perf.trace"));
        assert_eq!(parse.format.to_format(), Some(TraceFormat::Simpleperf));
        assert_eq!(parse.pid, Some(100));
        assert_eq!(parse.top, 10);
    }

    #[test]
    fn test_replay_defaults() {
        let args = Args::try_parse_from(["stackscope", "replay", "stacks.jsonl"]).unwrap();
        let Command::Replay(replay) = args.command else {
            panic!("expected replay subcommand");
        };
        assert_eq!(replay.interval_ms, 1);
        assert_eq!(replay.duration, 0);
        assert!(replay.export.is_none());
    }

    #[test]
    fn test_sample_subcommand() {
        let args = Args::try_parse_from([
            "stackscope",
            "sample",
            "--workload",
            "perf.trace",
            "--threads",
            "ss-",
            "--duration",
            "2",
        ])
        .unwrap();
        let Command::Sample(sample) = args.command else {
            panic!("expected sample subcommand");
        };
        assert_eq!(sample.workload, Some(PathBuf::from("perf.trace")));
        assert_eq!(sample.repeat, 20);
        assert_eq!(sample.threads.as_deref(), Some("ss-"));
        assert_eq!(sample.duration, 2);
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(
            Args::try_parse_from(["stackscope", "replay", "s.jsonl", "--interval-ms", "0"])
                .is_err()
        );
    }
}
