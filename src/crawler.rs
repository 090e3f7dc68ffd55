use anyhow::anyhow;
use futures::StreamExt;
use reqwest::{header, redirect, Client};
use scraper::{Html, Selector};
use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc, Mutex},
    time::sleep,
};

use crate::{
    classifier::{classify, Link},
    store::{FrontierStore, OutlinkSink},
    types::{CrawlItem, CrawlReport},
    utils,
};

const QUEUE_CAPACITY: usize = 1000;

pub struct Crawler {
    reference_domain: String,
    visited: Arc<Mutex<HashSet<String>>>,
    store: Arc<FrontierStore>,
    sink: Arc<OutlinkSink>,
    options: CrawlerOptions,
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct CrawlerOptions {
    // number of concurrent crawl workers
    #[builder(default = "8")]
    workers: usize,
    // requeue budget per url before it is dead-lettered
    #[builder(default = "2")]
    url_retries: u32,
    // per-request timeout in seconds
    #[builder(default = "30")]
    request_timeout: u64,
}

impl CrawlerOptions {
    pub fn default_builder() -> CrawlerOptionsBuilder {
        CrawlerOptionsBuilder::default()
    }
}

impl Crawler {
    /// `visited` seeds the in-memory visited-set, normally from
    /// [`FrontierStore::load`]; urls already in it are never fetched again.
    pub fn new(
        reference_domain: &str,
        visited: HashSet<String>,
        store: Arc<FrontierStore>,
        sink: Arc<OutlinkSink>,
        options: CrawlerOptions,
    ) -> Crawler {
        Crawler {
            reference_domain: reference_domain.into(),
            visited: Arc::new(Mutex::new(visited)),
            store,
            sink,
            options,
        }
    }

    pub async fn crawl(
        &mut self,
        seeds: Vec<String>,
        should_terminate: Arc<AtomicBool>,
    ) -> anyhow::Result<CrawlReport> {
        let client = Client::builder()
            .user_agent(utils::user_agent())
            .redirect(redirect::Policy::none())
            .timeout(Duration::from_secs(self.options.request_timeout))
            .build()?;

        // visit carries work to the pool; discovered brings each page's
        // internal links back here; failed brings urls whose probe or fetch
        // errored out and want a requeue
        let (visit_tx, visit_rx) = mpsc::channel::<CrawlItem>(QUEUE_CAPACITY);
        let (discovered_tx, mut discovered_rx) = mpsc::channel::<Vec<String>>(QUEUE_CAPACITY);
        let (failed_tx, mut failed_rx) = mpsc::channel::<CrawlItem>(QUEUE_CAPACITY);

        // counts urls that are queued, in flight or awaiting a retry verdict;
        // the crawl is done when it reaches zero, not when the queue is empty
        let pending = Arc::new(AtomicUsize::new(0));
        let fatal: Arc<Mutex<Option<anyhow::Error>>> = Arc::new(Mutex::new(None));

        let mut backlog: VecDeque<CrawlItem> = VecDeque::new();
        pending.fetch_add(seeds.len(), Ordering::SeqCst);
        for seed in seeds {
            backlog.push_back(CrawlItem::fresh(seed));
        }

        let handle = self.processor(
            visit_rx,
            discovered_tx,
            failed_tx,
            pending.clone(),
            fatal.clone(),
            should_terminate.clone(),
            client,
        );

        let mut dead_lettered: HashSet<String> = HashSet::new();

        while !should_terminate.load(Ordering::Relaxed) {
            while let Ok(links) = discovered_rx.try_recv() {
                let visited = self.visited.lock().await;
                for link in links {
                    if !visited.contains(&link) {
                        pending.fetch_add(1, Ordering::SeqCst);
                        backlog.push_back(CrawlItem::fresh(link));
                    }
                }
            }

            while let Ok(item) = failed_rx.try_recv() {
                let attempt = item.attempt + 1;
                if attempt > self.options.url_retries {
                    error!("{} could not be retrieved, dead-lettering", item.url);
                    dead_lettered.insert(item.url);
                    pending.fetch_sub(1, Ordering::SeqCst);
                } else {
                    warn!("retrying {} (attempt {})", item.url, attempt);
                    backlog.push_back(CrawlItem {
                        url: item.url,
                        attempt,
                    });
                }
            }

            // top up the work channel without ever blocking, so the return
            // channels above always keep draining
            while let Some(item) = backlog.pop_front() {
                if let Err(e) = visit_tx.try_send(item) {
                    backlog.push_front(e.into_inner());
                    break;
                }
            }

            // pending only grows through the drains above; a zero here with
            // both return channels empty means every item reached a terminal
            // state and no late send is still waiting for a drain
            if pending.load(Ordering::SeqCst) == 0
                && discovered_rx.is_empty()
                && failed_rx.is_empty()
            {
                break;
            }

            sleep(Duration::from_millis(10)).await;
        }

        // closing the work channel ends the worker stream; keep draining the
        // return channels so no worker stays parked on a full send
        drop(visit_tx);
        while !handle.is_finished() {
            while discovered_rx.try_recv().is_ok() {}
            while failed_rx.try_recv().is_ok() {}
            sleep(Duration::from_millis(10)).await;
        }
        let _ = handle.await;

        if let Some(e) = fatal.lock().await.take() {
            return Err(e);
        }

        let visited = self.visited.lock().await.clone();
        let external_count = self.sink.collected().await.len();

        debug!(
            "total of {} pages visited, {} dead-lettered, {} external urls collected",
            visited.len(),
            dead_lettered.len(),
            external_count
        );

        Ok(CrawlReport {
            visited,
            dead_lettered,
            external_count,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn processor(
        &self,
        visit_rx: mpsc::Receiver<CrawlItem>,
        discovered_tx: mpsc::Sender<Vec<String>>,
        failed_tx: mpsc::Sender<CrawlItem>,
        pending: Arc<AtomicUsize>,
        fatal: Arc<Mutex<Option<anyhow::Error>>>,
        should_terminate: Arc<AtomicBool>,
        client: Client,
    ) -> tokio::task::JoinHandle<()> {
        let workers = self.options.workers;
        let reference_domain = self.reference_domain.clone();
        let visited = self.visited.clone();
        let store = self.store.clone();
        let sink = self.sink.clone();

        tokio::spawn(async move {
            tokio_stream::wrappers::ReceiverStream::new(visit_rx)
                .for_each_concurrent(workers, |item| {
                    let client = client.clone();
                    let reference_domain = reference_domain.clone();
                    let visited = visited.clone();
                    let store = store.clone();
                    let sink = sink.clone();
                    let discovered_tx = discovered_tx.clone();
                    let failed_tx = failed_tx.clone();
                    let pending = pending.clone();
                    let fatal = fatal.clone();
                    let should_terminate = should_terminate.clone();

                    async move {
                        if should_terminate.load(Ordering::Relaxed) {
                            pending.fetch_sub(1, Ordering::SeqCst);
                            return;
                        }

                        // dedup at the consumption boundary; producers may
                        // over-enqueue. a retried item owns its visited mark
                        // and skips the check
                        if item.attempt == 0 && visited.lock().await.contains(&item.url) {
                            pending.fetch_sub(1, Ordering::SeqCst);
                            return;
                        }

                        debug!("crawling {} at attempt {}", item.url, item.attempt);

                        let canonical = match Self::probe(&client, &item.url).await {
                            Ok(c) => c,
                            Err(e) => {
                                warn!("could not probe {}: {}", item.url, e);
                                // the failed channel now owns this pending slot
                                match failed_tx.send(item).await {
                                    Ok(_) => {}
                                    Err(e) => {
                                        error!("could not send to failed_tx {}", e);
                                        pending.fetch_sub(1, Ordering::SeqCst);
                                    }
                                };
                                return;
                            }
                        };

                        // durability point: the visited mark is persisted
                        // before the full fetch, so a crash here loses at most
                        // this one page's outbound links
                        let first_visit = visited.lock().await.insert(canonical.clone());
                        if first_visit {
                            if let Err(e) = store.append(&canonical).await {
                                error!("frontier append failed for {}: {}", canonical, e);
                                let mut fatal = fatal.lock().await;
                                if fatal.is_none() {
                                    *fatal = Some(e);
                                }
                                should_terminate.store(true, Ordering::Relaxed);
                                pending.fetch_sub(1, Ordering::SeqCst);
                                return;
                            }
                        } else if item.attempt == 0 {
                            // a concurrent worker canonicalized to the same
                            // url first
                            pending.fetch_sub(1, Ordering::SeqCst);
                            return;
                        }

                        let body = match Self::fetch(&client, &canonical).await {
                            Ok(b) => b,
                            Err(e) => {
                                warn!("could not fetch {}: {}", canonical, e);
                                match failed_tx
                                    .send(CrawlItem {
                                        url: canonical,
                                        attempt: item.attempt,
                                    })
                                    .await
                                {
                                    Ok(_) => {}
                                    Err(e) => {
                                        error!("could not send to failed_tx {}", e);
                                        pending.fetch_sub(1, Ordering::SeqCst);
                                    }
                                };
                                return;
                            }
                        };

                        let mut internal = vec![];
                        let mut external_count = 0;
                        for href in Self::extract_hrefs(&body) {
                            match classify(&href, &reference_domain) {
                                Link::External(url) => {
                                    external_count += 1;
                                    if let Err(e) = sink.record(&url).await {
                                        error!("outlink append failed for {}: {}", url, e);
                                        let mut fatal = fatal.lock().await;
                                        if fatal.is_none() {
                                            *fatal = Some(e);
                                        }
                                        should_terminate.store(true, Ordering::Relaxed);
                                        pending.fetch_sub(1, Ordering::SeqCst);
                                        return;
                                    }
                                }
                                Link::Internal(url) => internal.push(url),
                                Link::Invalid => {}
                            }
                        }

                        debug!(
                            "{} yielded {} internal and {} external links",
                            canonical,
                            internal.len(),
                            external_count
                        );

                        if !internal.is_empty() {
                            match discovered_tx.send(internal).await {
                                Ok(_) => {}
                                Err(e) => error!("could not send to discovered_tx {}", e),
                            };
                        }

                        pending.fetch_sub(1, Ordering::SeqCst);
                    }
                })
                .await;
        })
    }

    /// Redirect-probing HEAD request. A 3xx with a Location makes the
    /// resolved Location the canonical url, otherwise the requested url is
    /// already canonical.
    async fn probe(client: &Client, url: &str) -> anyhow::Result<String> {
        let res = client.head(url).send().await?;
        if res.status().is_redirection() {
            if let Some(location) = res.headers().get(header::LOCATION) {
                if let Ok(location) = location.to_str() {
                    if let Ok(resolved) = res.url().join(location) {
                        return Ok(resolved.to_string());
                    }
                }
            }
        }
        Ok(res.url().to_string())
    }

    async fn fetch(client: &Client, url: &str) -> anyhow::Result<String> {
        let res = client.get(url).send().await?;
        if !res.status().is_success() {
            return Err(anyhow!("fetch of {} returned status {}", url, res.status()));
        }
        Ok(res.text().await?)
    }

    fn extract_hrefs(body: &str) -> Vec<String> {
        let document = Html::parse_document(body);
        let selector = Selector::parse("a[href]").unwrap();
        document
            .select(&selector)
            .filter_map(|a| a.value().attr("href"))
            .map(|href| href.to_string())
            .collect()
    }
}
