use std::{
    collections::HashSet,
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use anyhow::{anyhow, Context};
use signal_hook::consts::{SIGINT, SIGTERM};

use crate::{
    crawler::{Crawler, CrawlerOptions},
    normalizer,
    pool::{self, CredentialPool},
    store::{FrontierStore, OutlinkSink},
    submitter::{Submitter, SubmitterOptions},
    types::{CrawlReport, SubmissionReport},
    utils,
};

pub struct Runner {
    options: RunnerOptions,
    should_terminate: Arc<AtomicBool>,
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct RunnerOptions {
    // registrable domain the crawl stays inside; required for the crawl stage
    #[builder(default = "None")]
    target_domain: Option<String>,
    // optional newline-delimited seed urls for the crawl queue
    #[builder(default = "None")]
    seed_file: Option<PathBuf>,
    // durable visited-set log
    #[builder(default = "self.default_frontier_file()")]
    frontier_file: PathBuf,
    // flat file the crawler appends external urls to
    #[builder(default = "self.default_outlinks_file()")]
    outlinks_file: PathBuf,
    // sorted unique output of the normalize stage, input of the submit stage
    #[builder(default = "self.default_normalized_file()")]
    normalized_file: PathBuf,
    // json list of access/secret pairs; required for the submit stage
    #[builder(default = "None")]
    credentials_file: Option<PathBuf>,
    // archival endpoint POSTed to by the submit stage
    #[builder(default = "self.default_endpoint()")]
    endpoint: String,
    #[builder(default = "8")]
    crawl_workers: usize,
    #[builder(default = "4")]
    submit_workers: usize,
    // requeue budget per url in each stage
    #[builder(default = "2")]
    url_retries: u32,
    #[builder(default = "2")]
    submit_retries: u32,
    // per-request timeout in seconds
    #[builder(default = "30")]
    request_timeout: u64,
    // worker pauses in seconds after a failed submission
    #[builder(default = "20")]
    long_backoff_secs: u64,
    #[builder(default = "10")]
    short_backoff_secs: u64,
}

impl RunnerOptions {
    pub fn default_builder() -> RunnerOptionsBuilder {
        RunnerOptionsBuilder::default()
    }
}

impl RunnerOptionsBuilder {
    fn default_frontier_file(&self) -> PathBuf {
        PathBuf::from("frontier.txt")
    }
    fn default_outlinks_file(&self) -> PathBuf {
        PathBuf::from("outlinks.txt")
    }
    fn default_normalized_file(&self) -> PathBuf {
        PathBuf::from("outlinks_uniq.txt")
    }
    fn default_endpoint(&self) -> String {
        utils::ENDPOINT_URL.clone()
    }
}

impl Runner {
    pub fn new(options: RunnerOptions) -> anyhow::Result<Self> {
        let should_terminate = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGTERM, Arc::clone(&should_terminate))?;
        signal_hook::flag::register(SIGINT, Arc::clone(&should_terminate))?;

        Ok(Runner {
            options,
            should_terminate,
        })
    }

    pub async fn run_crawl(&self) -> anyhow::Result<CrawlReport> {
        let domain = self
            .options
            .target_domain
            .as_ref()
            .ok_or_else(|| anyhow!("the crawl stage requires a target domain"))?;

        let store = Arc::new(FrontierStore::new(&self.options.frontier_file));
        let sink = Arc::new(OutlinkSink::new(&self.options.outlinks_file));

        let logged = store.load().await.context("could not load frontier store")?;
        let visited: HashSet<String> = logged.iter().cloned().collect();

        // the seed file wins, then the persisted frontier, then the
        // well-known default
        let seeds = match &self.options.seed_file {
            Some(path) => utils::read_url_lines(path)?,
            None => logged,
        };
        let seeds = if seeds.is_empty() {
            vec![utils::DEFAULT_SEED_URL.clone()]
        } else {
            seeds
        };

        info!(
            "initializing crawl of {} with {} workers, {} retries and {} urls already visited",
            domain,
            self.options.crawl_workers,
            self.options.url_retries,
            visited.len()
        );

        let options = CrawlerOptions::default_builder()
            .workers(self.options.crawl_workers)
            .url_retries(self.options.url_retries)
            .request_timeout(self.options.request_timeout)
            .build()?;
        let mut crawler = Crawler::new(domain, visited, store, sink, options);

        let report = crawler
            .crawl(seeds, self.should_terminate.clone())
            .await?;

        info!(
            "crawl of {} completed: {} visited, {} dead-lettered, {} external urls collected",
            domain,
            report.visited.len(),
            report.dead_lettered.len(),
            report.external_count
        );
        Ok(report)
    }

    pub async fn run_normalize(&self) -> anyhow::Result<usize> {
        normalizer::normalize_file(&self.options.outlinks_file, &self.options.normalized_file)
    }

    pub async fn run_submit(&self) -> anyhow::Result<SubmissionReport> {
        let credentials_file = self
            .options
            .credentials_file
            .as_ref()
            .ok_or_else(|| anyhow!("the submit stage requires a credentials file"))?;

        let configs = pool::load_credentials(credentials_file)?;
        let pool = Arc::new(CredentialPool::new(
            configs,
            Duration::from_secs(self.options.request_timeout),
        )?);

        let urls = utils::read_url_lines(&self.options.normalized_file)?;
        if urls.is_empty() {
            info!("nothing to submit");
            return Ok(SubmissionReport {
                submitted: vec![],
                dead_lettered: vec![],
            });
        }

        info!(
            "submitting {} urls to {} across {} credentials",
            urls.len(),
            self.options.endpoint,
            pool.size()
        );

        let options = SubmitterOptions::default_builder()
            .workers(self.options.submit_workers)
            .submit_retries(self.options.submit_retries)
            .long_backoff(Duration::from_secs(self.options.long_backoff_secs))
            .short_backoff(Duration::from_secs(self.options.short_backoff_secs))
            .build()?;
        let submitter = Submitter::new(&self.options.endpoint, pool, options);

        submitter
            .submit_all(urls, self.should_terminate.clone())
            .await
    }
}
