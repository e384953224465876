mod cli;

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use batchfetch::config::FetcherPolicy;
use batchfetch::datum::{now_millis, FetchedDatum, StatusDatum, UrlDatum};
use batchfetch::fetcher::{Fetcher, HttpFetcher};
use batchfetch::logging::init_logging;
use batchfetch::pipeline::FetchPipe;
use batchfetch::scoring::LastFetchScoreGenerator;
use batchfetch::simulation::{FakeFetcher, NullFetcher};
use batchfetch::sink::OutputSink;

use cli::{Cli, Commands};

/// Ten days, matching the default re-fetch horizon of the scorer.
const RESCORE_WINDOW_MS: u64 = 1000 * 60 * 60 * 24 * 10;

fn read_url_file(path: &Path) -> Result<Vec<UrlDatum>, std::io::Error> {
    let file = File::open(path)?;
    let mut urls = Vec::new();

    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        urls.push(UrlDatum::new(trimmed));
    }

    Ok(urls)
}

/// Drain a stream of serializable records onto a JSONL file from a
/// dedicated thread, so slow disks never stall fetch workers.
fn spawn_jsonl_writer<T>(
    path: PathBuf,
    rx: flume::Receiver<T>,
) -> thread::JoinHandle<Result<usize, std::io::Error>>
where
    T: serde::Serialize + Send + 'static,
{
    thread::spawn(move || {
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        let mut count = 0usize;

        for record in rx.iter() {
            let line = serde_json::to_string(&record)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            count += 1;
        }

        writer.flush()?;
        Ok(count)
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Fetch {
            input,
            output_dir,
            user_agent,
            max_threads,
            duration_secs,
            crawl_delay_ms,
            min_response_rate,
            max_content_size,
            threads_per_host,
            group_by_ip,
            dry_run,
            log_dir,
        } => {
            let _log_guard = init_logging(log_dir.as_deref())?;

            let urls = read_url_file(&input)?;
            if urls.is_empty() {
                tracing::warn!(input = %input.display(), "no URLs to fetch");
                return Ok(());
            }

            let mut policy = FetcherPolicy::new()
                .with_min_response_rate(min_response_rate)
                .with_max_content_size(max_content_size)
                .with_default_crawl_delay(crawl_delay_ms)
                .with_threads_per_host(threads_per_host);
            if let Some(secs) = duration_secs {
                policy = policy.with_crawl_end_time(now_millis() + secs * 1000);
            }

            tracing::info!(
                urls = urls.len(),
                max_threads,
                dry_run,
                "starting fetch run"
            );

            let fetcher: Arc<dyn Fetcher> = if dry_run {
                Arc::new(
                    FakeFetcher::new(max_threads)
                        .with_policy(policy.clone())
                        .with_latency(Duration::from_millis(10)),
                )
            } else {
                Arc::new(HttpFetcher::new(
                    max_threads,
                    policy.clone(),
                    user_agent.clone(),
                )?)
            };

            // robots.txt goes through its own single-connection fetcher so
            // page fetches never queue behind it.
            let robots_fetcher: Arc<dyn Fetcher> = if dry_run {
                Arc::new(NullFetcher::new())
            } else {
                Arc::new(HttpFetcher::new(1, policy.clone(), user_agent.clone())?)
            };

            std::fs::create_dir_all(&output_dir)?;
            let (sink, content_rx, status_rx) = OutputSink::channels();
            let content_writer =
                spawn_jsonl_writer::<FetchedDatum>(output_dir.join("content.jsonl"), content_rx);
            let status_writer =
                spawn_jsonl_writer::<StatusDatum>(output_dir.join("status.jsonl"), status_rx);

            let scorer = Arc::new(LastFetchScoreGenerator::new(now_millis(), RESCORE_WINDOW_MS));
            let pipe = FetchPipe::new(fetcher, robots_fetcher, scorer, sink)
                .with_group_by_ip(group_by_ip);

            let snapshot = pipe.run(urls).await;

            // Dropping the pipe closes the sink channels so the writers
            // see end-of-stream and flush.
            drop(pipe);

            let content_count = content_writer
                .join()
                .map_err(|_| "content writer thread panicked")??;
            let status_count = status_writer
                .join()
                .map_err(|_| "status writer thread panicked")??;

            tracing::info!(
                content_records = content_count,
                status_records = status_count,
                "run complete: {}",
                snapshot
            );

            println!("Fetch run complete");
            println!("  {}", snapshot);
            println!(
                "  wrote {} content and {} status records to {}",
                content_count,
                status_count,
                output_dir.display()
            );
        }
    }

    Ok(())
}
