use std::path::PathBuf;

use clap::{Parser, Subcommand};
use linkharvest::runner::{Runner, RunnerOptions};
use log::debug;

#[derive(Parser, Debug)]
#[command(author, version, about = "Domain outlink harvester and archival submitter", long_about = None)]
struct Args {
    #[command(subcommand)]
    stage: Stage,
}

#[derive(Subcommand, Debug)]
enum Stage {
    /// Crawl a domain breadth-first and collect its external urls
    Crawl {
        /// Domain the crawl stays inside (e.g. example.com)
        #[arg(short, long)]
        domain: String,
        /// Newline-delimited seed urls; defaults to the frontier log, then the built-in seed
        #[arg(short, long)]
        seed_file: Option<PathBuf>,
        /// Durable visited-set log, reloaded on restart
        #[arg(long, default_value = "frontier.txt")]
        frontier_file: PathBuf,
        /// Flat file external urls are appended to
        #[arg(long, default_value = "outlinks.txt")]
        outlinks_file: PathBuf,
        /// Total number of concurrent crawl workers
        #[arg(short = 'w', long, default_value_t = 8)]
        workers: usize,
        /// Number of requeues per failed url before it is dead-lettered
        #[arg(short = 'r', long, default_value_t = 2)]
        retries: u32,
        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Collapse the collected outlinks into a sorted unique list
    Normalize {
        #[arg(long, default_value = "outlinks.txt")]
        outlinks_file: PathBuf,
        #[arg(long, default_value = "outlinks_uniq.txt")]
        normalized_file: PathBuf,
    },
    /// Submit the normalized urls to the archival endpoint
    Submit {
        /// Json list of access/secret credential pairs
        #[arg(short, long)]
        credentials: PathBuf,
        #[arg(long, default_value = "outlinks_uniq.txt")]
        normalized_file: PathBuf,
        /// Archival endpoint to POST to; defaults to the built-in save endpoint
        #[arg(short, long)]
        endpoint: Option<String>,
        /// Total number of concurrent submission workers
        #[arg(short = 'w', long, default_value_t = 4)]
        workers: usize,
        /// Number of requeues per failed url before it is dead-lettered
        #[arg(short = 'r', long, default_value_t = 2)]
        retries: u32,
        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
        /// Worker pause in seconds after a connection-level failure
        #[arg(long, default_value_t = 20)]
        long_backoff: u64,
        /// Worker pause in seconds after any other failed attempt
        #[arg(long, default_value_t = 10)]
        short_backoff: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    debug!("starting with {:#?}", args);

    match args.stage {
        Stage::Crawl {
            domain,
            seed_file,
            frontier_file,
            outlinks_file,
            workers,
            retries,
            timeout,
        } => {
            let options = RunnerOptions::default_builder()
                .target_domain(Some(domain))
                .seed_file(seed_file)
                .frontier_file(frontier_file)
                .outlinks_file(outlinks_file)
                .crawl_workers(workers)
                .url_retries(retries)
                .request_timeout(timeout)
                .build()?;
            let runner = Runner::new(options)?;
            let report = runner.run_crawl().await?;
            println!(
                "visited {} pages, collected {} external urls, {} urls dead-lettered",
                report.visited.len(),
                report.external_count,
                report.dead_lettered.len()
            );
        }
        Stage::Normalize {
            outlinks_file,
            normalized_file,
        } => {
            let options = RunnerOptions::default_builder()
                .outlinks_file(outlinks_file)
                .normalized_file(normalized_file.clone())
                .build()?;
            let runner = Runner::new(options)?;
            let count = runner.run_normalize().await?;
            println!("wrote {} unique urls to {:?}", count, normalized_file);
        }
        Stage::Submit {
            credentials,
            normalized_file,
            endpoint,
            workers,
            retries,
            timeout,
            long_backoff,
            short_backoff,
        } => {
            let mut builder = RunnerOptions::default_builder();
            builder
                .credentials_file(Some(credentials))
                .normalized_file(normalized_file)
                .submit_workers(workers)
                .submit_retries(retries)
                .request_timeout(timeout)
                .long_backoff_secs(long_backoff)
                .short_backoff_secs(short_backoff);
            if let Some(endpoint) = endpoint {
                builder.endpoint(endpoint);
            }
            let runner = Runner::new(builder.build()?)?;
            let report = runner.run_submit().await?;
            println!(
                "submitted {} urls, {} dead-lettered",
                report.submitted.len(),
                report.dead_lettered.len()
            );
        }
    }

    Ok(())
}
