use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("durable_write: {0}")]
    DurableWrite(String),
    #[error("empty_credential_pool")]
    EmptyCredentialPool,
}

/// One unit of crawl work. `attempt` is 0 for freshly discovered urls and
/// counts up on every requeue; retried items bypass the visited-set discard
/// since the retrying worker already owns the visited mark.
#[derive(Debug, Clone)]
pub struct CrawlItem {
    pub url: String,
    pub attempt: u32,
}

impl CrawlItem {
    pub fn fresh(url: impl Into<String>) -> Self {
        CrawlItem {
            url: url.into(),
            attempt: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmitItem {
    pub url: String,
    pub attempt: u32,
}

#[derive(Debug)]
pub struct CrawlReport {
    pub visited: HashSet<String>,
    pub dead_lettered: HashSet<String>,
    pub external_count: usize,
}

#[derive(Debug)]
pub struct SubmissionReport {
    pub submitted: Vec<String>,
    pub dead_lettered: Vec<String>,
}

/// An (identity, secret) pair as read from the credentials file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub access: String,
    pub secret: String,
}
