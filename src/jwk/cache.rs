use super::{jwk_set, Jwk, KeyResolver};
use crate::Error;
use async_trait::async_trait;
use std::future::Future;
use std::{collections::HashMap, time::Duration};
use tokio::sync::watch;

const RETRY_AFTER_FAILURE: Duration = Duration::from_secs(60);
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

fn refresh_interval(max_age: Option<Duration>, default_duration: Duration) -> Duration {
    max_age
        .unwrap_or(default_duration)
        .max(MIN_REFRESH_INTERVAL)
}

/// Keeps a provider key set fresh in the background. Lookups go through the
/// [`CachedKeyResolver`] handed out by [`JwkCache::new`].
pub struct JwkCache {
    client: reqwest::Client,
    keys: watch::Sender<HashMap<String, Jwk>>,
    url: String,
    default_duration: Duration,
    cache_duration: Duration,
}

#[derive(Clone)]
pub struct CachedKeyResolver {
    keys: watch::Receiver<HashMap<String, Jwk>>,
}

impl JwkCache {
    /// Fetches the key set once. `default_duration` applies whenever the
    /// response carries no `max-age`. Refreshes are never scheduled sooner
    /// than a minute apart.
    pub async fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        default_duration: Duration,
    ) -> Result<(CachedKeyResolver, Self), Error> {
        let url = url.into();
        let (keys, max_age) = jwk_set::fetch_key_set(&client, &url).await?;
        let (sender, receiver) = watch::channel(keys);
        let cache = Self {
            client,
            keys: sender,
            url,
            default_duration,
            cache_duration: refresh_interval(max_age, default_duration),
        };
        Ok((CachedKeyResolver { keys: receiver }, cache))
    }

    pub async fn run<F>(mut self, mut shutdown: F)
    where
        F: Future<Output = ()> + Send + Unpin + 'static,
    {
        tracing::info!(url = %self.url, "starting jwk cache");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.cache_duration) => {
                    self.cache_duration = self
                        .refresh_key_set()
                        .await
                        .inspect_err(|err| {
                            metrics::counter!("jwk-cache-refresh-failed").increment(1);
                            tracing::error!(?err, "failure to refresh jwk set")
                        })
                        .unwrap_or(RETRY_AFTER_FAILURE);
                }
            }
        }

        tracing::info!(url = %self.url, "stopping jwk cache");
    }

    async fn refresh_key_set(&mut self) -> Result<Duration, Error> {
        let (new_keys, max_age) = jwk_set::fetch_key_set(&self.client, &self.url).await?;
        tracing::debug!(keys = new_keys.len(), "refreshed jwk set");
        self.keys.send_replace(new_keys);
        Ok(refresh_interval(max_age, self.default_duration))
    }
}

#[async_trait]
impl KeyResolver for CachedKeyResolver {
    async fn resolve(&self, kid: &str) -> Result<String, Error> {
        let pem = self.keys.borrow().get(kid).map(Jwk::to_pem);
        pem.ok_or_else(|| Error::KeyNotFound(kid.to_string()))?
    }
}
