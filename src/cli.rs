//! Command-line interface for the fetch binary.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "batchfetch",
    about = "Polite batch fetcher: robots-aware grouping, per-host pacing, bounded workers",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch a file of URLs into content and status JSONL streams.
    Fetch {
        /// Input file with one URL per line.
        input: PathBuf,

        /// Directory for content.jsonl and status.jsonl.
        #[arg(long, default_value = "fetched")]
        output_dir: PathBuf,

        /// User agent sent on every request.
        #[arg(long, default_value = "batchfetch/0.3 (+https://example.com/batchfetch)")]
        user_agent: String,

        /// Upper bound on concurrent fetches.
        #[arg(long, default_value_t = 10)]
        max_threads: usize,

        /// Stop dispatching new URLs after this many seconds.
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Delay between requests to one host when robots.txt names none.
        #[arg(long, default_value_t = 30_000)]
        crawl_delay_ms: u64,

        /// Abort transfers slower than this many bytes/sec (0 = no floor).
        #[arg(long, default_value_t = 0)]
        min_response_rate: u64,

        /// Truncate bodies beyond this many bytes.
        #[arg(long, default_value_t = 64 * 1024)]
        max_content_size: usize,

        /// Concurrent requests allowed per host.
        #[arg(long, default_value_t = 1)]
        threads_per_host: usize,

        /// Group URLs by resolved IP address instead of domain.
        #[arg(long)]
        group_by_ip: bool,

        /// Simulate fetching instead of touching the network.
        #[arg(long)]
        dry_run: bool,

        /// Directory for rotated log files (stdout only when unset).
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
