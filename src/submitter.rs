use futures::StreamExt;
use reqwest::header;
use std::{
    collections::VecDeque,
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
    pool::{Credential, CredentialPool},
    types::{SubmissionReport, SubmitItem},
};

const QUEUE_CAPACITY: usize = 1000;

/// Outcome of one submission attempt. Connection-level failures carry a
/// heavier back-off than rejections since they usually mean the endpoint
/// itself is down.
enum Outcome {
    Accepted(reqwest::StatusCode),
    Refused(String),
    Rejected(String),
}

pub struct Submitter {
    endpoint: String,
    pool: Arc<CredentialPool>,
    options: SubmitterOptions,
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct SubmitterOptions {
    // number of concurrent submission workers; in-flight requests are still
    // capped by the credential pool size
    #[builder(default = "4")]
    workers: usize,
    // requeue budget per url before it is dead-lettered
    #[builder(default = "2")]
    submit_retries: u32,
    // worker pause after a connection-level failure
    #[builder(default = "Duration::from_secs(20)")]
    long_backoff: Duration,
    // worker pause after any other failed attempt
    #[builder(default = "Duration::from_secs(10)")]
    short_backoff: Duration,
}

impl SubmitterOptions {
    pub fn default_builder() -> SubmitterOptionsBuilder {
        SubmitterOptionsBuilder::default()
    }
}

impl Submitter {
    pub fn new(endpoint: &str, pool: Arc<CredentialPool>, options: SubmitterOptions) -> Submitter {
        Submitter {
            endpoint: endpoint.into(),
            pool,
            options,
        }
    }

    pub async fn submit_all(
        &self,
        urls: Vec<String>,
        should_terminate: Arc<AtomicBool>,
    ) -> anyhow::Result<SubmissionReport> {
        let (submit_tx, submit_rx) = mpsc::channel::<SubmitItem>(QUEUE_CAPACITY);
        let (failed_tx, mut failed_rx) = mpsc::channel::<SubmitItem>(QUEUE_CAPACITY);

        // queued + in flight + awaiting a retry verdict; drained means zero,
        // not an empty channel, since a worker may still hold an item
        let pending = Arc::new(AtomicUsize::new(0));
        let submitted: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let mut backlog: VecDeque<SubmitItem> = VecDeque::new();
        pending.fetch_add(urls.len(), Ordering::SeqCst);
        for url in urls {
            backlog.push_back(SubmitItem { url, attempt: 0 });
        }

        let handle = self.processor(
            submit_rx,
            failed_tx,
            pending.clone(),
            submitted.clone(),
            should_terminate.clone(),
        );

        let mut dead_lettered = vec![];

        while !should_terminate.load(Ordering::Relaxed) {
            while let Ok(item) = failed_rx.try_recv() {
                let attempt = item.attempt + 1;
                if attempt > self.options.submit_retries {
                    error!("{} could not be submitted, dead-lettering", item.url);
                    dead_lettered.push(item.url);
                    pending.fetch_sub(1, Ordering::SeqCst);
                } else {
                    warn!("requeueing {} (attempt {})", item.url, attempt);
                    backlog.push_back(SubmitItem {
                        url: item.url,
                        attempt,
                    });
                }
            }

            while let Some(item) = backlog.pop_front() {
                if let Err(e) = submit_tx.try_send(item) {
                    backlog.push_front(e.into_inner());
                    break;
                }
            }

            if pending.load(Ordering::SeqCst) == 0 && failed_rx.is_empty() {
                break;
            }

            sleep(Duration::from_millis(10)).await;
        }

        drop(submit_tx);
        while !handle.is_finished() {
            while failed_rx.try_recv().is_ok() {}
            sleep(Duration::from_millis(10)).await;
        }
        let _ = handle.await;

        let submitted = submitted.lock().await.clone();
        info!(
            "submission drained: {} accepted, {} dead-lettered",
            submitted.len(),
            dead_lettered.len()
        );

        Ok(SubmissionReport {
            submitted,
            dead_lettered,
        })
    }

    fn processor(
        &self,
        submit_rx: mpsc::Receiver<SubmitItem>,
        failed_tx: mpsc::Sender<SubmitItem>,
        pending: Arc<AtomicUsize>,
        submitted: Arc<Mutex<Vec<String>>>,
        should_terminate: Arc<AtomicBool>,
    ) -> tokio::task::JoinHandle<()> {
        let workers = self.options.workers;
        let endpoint = self.endpoint.clone();
        let pool = self.pool.clone();
        let long_backoff = self.options.long_backoff;
        let short_backoff = self.options.short_backoff;

        tokio::spawn(async move {
            tokio_stream::wrappers::ReceiverStream::new(submit_rx)
                .for_each_concurrent(workers, |item| {
                    let endpoint = endpoint.clone();
                    let pool = pool.clone();
                    let failed_tx = failed_tx.clone();
                    let pending = pending.clone();
                    let submitted = submitted.clone();
                    let should_terminate = should_terminate.clone();

                    async move {
                        if should_terminate.load(Ordering::Relaxed) {
                            pending.fetch_sub(1, Ordering::SeqCst);
                            return;
                        }

                        // blocks while every credential is in flight; this is
                        // the engine's backpressure, not an error
                        let credential = pool.checkout().await;
                        debug!("submitting {} as {}", item.url, credential.access);

                        let outcome = Self::submit_once(&credential, &endpoint, &item.url).await;

                        // unconditional return, before any back-off sleep, so
                        // a failure never strands the credential
                        pool.give_back(credential).await;

                        match outcome {
                            Outcome::Accepted(status) => {
                                info!("submitted {} ({})", item.url, status);
                                submitted.lock().await.push(item.url);
                                pending.fetch_sub(1, Ordering::SeqCst);
                            }
                            Outcome::Refused(reason) => {
                                warn!("endpoint refused connection for {}: {}", item.url, reason);
                                match failed_tx.send(item).await {
                                    Ok(_) => {}
                                    Err(e) => {
                                        error!("could not send to failed_tx {}", e);
                                        pending.fetch_sub(1, Ordering::SeqCst);
                                    }
                                };
                                // this worker pauses, the rest of the pool
                                // keeps going
                                sleep(long_backoff).await;
                            }
                            Outcome::Rejected(reason) => {
                                warn!("submission failed for {}: {}", item.url, reason);
                                match failed_tx.send(item).await {
                                    Ok(_) => {}
                                    Err(e) => {
                                        error!("could not send to failed_tx {}", e);
                                        pending.fetch_sub(1, Ordering::SeqCst);
                                    }
                                };
                                sleep(short_backoff).await;
                            }
                        }
                    }
                })
                .await;
        })
    }

    async fn submit_once(credential: &Credential, endpoint: &str, url: &str) -> Outcome {
        let body = format!("url={}", urlencoding::encode(url));
        let res = credential
            .client
            .post(endpoint)
            .header(header::ACCEPT, "application/json")
            .header(header::AUTHORIZATION, credential.auth_header())
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await;

        match res {
            Ok(res) if res.status().is_success() => Outcome::Accepted(res.status()),
            Ok(res) => Outcome::Rejected(format!("status {}", res.status())),
            Err(e) if e.is_connect() => Outcome::Refused(e.to_string()),
            Err(e) => Outcome::Rejected(e.to_string()),
        }
    }
}
