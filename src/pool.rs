use std::{path::Path, time::Duration};

use anyhow::Context;
use reqwest::Client;
use tokio::sync::{mpsc, Mutex};

use crate::{
    types::{CredentialConfig, HarvestError},
    utils,
};

/// A credential checked out of the pool. The client is the credential's own
/// long-lived session, reused across every request it serves.
pub struct Credential {
    pub access: String,
    secret: String,
    pub client: Client,
}

impl Credential {
    pub fn auth_header(&self) -> String {
        format!("LOW {}:{}", self.access, self.secret)
    }
}

/// Fixed set of credentials, each bound 1:1 to one reusable session for its
/// lifetime. Checkout blocks while the pool is empty, so at most pool-size
/// submissions are in flight system-wide regardless of worker count; this is
/// the submission engine's backpressure.
pub struct CredentialPool {
    size: usize,
    slots_tx: mpsc::Sender<Credential>,
    slots_rx: Mutex<mpsc::Receiver<Credential>>,
}

impl CredentialPool {
    pub fn new(configs: Vec<CredentialConfig>, request_timeout: Duration) -> anyhow::Result<Self> {
        if configs.is_empty() {
            return Err(HarvestError::EmptyCredentialPool.into());
        }
        let size = configs.len();
        let (slots_tx, slots_rx) = mpsc::channel(size);
        for config in configs {
            let client = Client::builder()
                .user_agent(utils::user_agent())
                .timeout(request_timeout)
                .build()
                .context("could not build a credential session")?;
            slots_tx
                .try_send(Credential {
                    access: config.access,
                    secret: config.secret,
                    client,
                })
                .expect("pool channel is sized to the credential count");
        }
        Ok(CredentialPool {
            size,
            slots_tx,
            slots_rx: Mutex::new(slots_rx),
        })
    }

    pub async fn checkout(&self) -> Credential {
        let mut rx = self.slots_rx.lock().await;
        rx.recv()
            .await
            .expect("pool sender lives as long as the pool")
    }

    /// Always called after an attempt, success or failure, and before any
    /// back-off sleep, so one failure never strands a credential.
    pub async fn give_back(&self, credential: Credential) {
        match self.slots_tx.send(credential).await {
            Ok(_) => {}
            Err(e) => error!("could not return credential {} to the pool", e.0.access),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Reads the static credentials file: a JSON list of access/secret pairs.
pub fn load_credentials(path: &Path) -> anyhow::Result<Vec<CredentialConfig>> {
    let content = std::fs::read_to_string(path)
        .context(format!("could not read credentials file at {:?}", path))?;
    let configs: Vec<CredentialConfig> = serde_json::from_str(&content)
        .context(format!("credentials file at {:?} is not valid json", path))?;
    Ok(configs)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn configs(n: usize) -> Vec<CredentialConfig> {
        (0..n)
            .map(|i| CredentialConfig {
                access: format!("access{}", i),
                secret: format!("secret{}", i),
            })
            .collect()
    }

    #[test]
    fn auth_header_uses_the_archive_scheme() {
        let pool = CredentialPool::new(configs(1), Duration::from_secs(5)).unwrap();
        let c = tokio_test::block_on(pool.checkout());
        assert_eq!(c.auth_header(), "LOW access0:secret0");
    }

    #[test]
    fn empty_pool_is_a_startup_error() {
        assert!(CredentialPool::new(vec![], Duration::from_secs(5)).is_err());
    }

    #[tokio::test]
    async fn checkout_blocks_when_exhausted_and_wakes_on_return() {
        let pool = CredentialPool::new(configs(2), Duration::from_secs(5)).unwrap();

        let a = pool.checkout().await;
        let _b = pool.checkout().await;

        // pool of 2 is empty now, a third checkout must block
        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.checkout()).await;
        assert!(blocked.is_err());

        pool.give_back(a).await;
        let c = tokio::time::timeout(Duration::from_millis(50), pool.checkout())
            .await
            .expect("checkout should complete once a credential is returned");
        assert_eq!(c.access, "access0");
    }

    #[test]
    fn reads_credentials_from_json() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("linkharvest-creds-{}", nanos));
        std::fs::write(
            &path,
            r#"[{"access": "ak1", "secret": "sk1"}, {"access": "ak2", "secret": "sk2"}]"#,
        )
        .unwrap();

        let configs = load_credentials(&path).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].access, "ak1");
        assert_eq!(configs[1].secret, "sk2");
        std::fs::remove_file(path).unwrap();
    }
}
