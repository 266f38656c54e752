use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Deserialize;

use crate::error::GatewayError;
use crate::upstream_client::{RetryClient, RetryOutcome};

#[derive(Debug, Clone, Default)]
struct ModelTable {
    entries: HashMap<String, u64>,
}

/// Per-model capability cache (§4.6). Readers see an immutable snapshot via
/// `ArcSwap`; the background refresher builds a whole new table and swaps
/// the pointer rather than mutating in place.
pub struct ModelCache {
    table: ArcSwap<ModelTable>,
    last_update: AtomicI64,
    ttl_secs: u64,
    metadata_endpoint: String,
    default_max_input_tokens: u64,
    profile_arn: Option<String>,
}

#[derive(Deserialize)]
struct ListModelsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    model_id: String,
    #[serde(default)]
    max_input_tokens: Option<u64>,
}

impl ModelCache {
    pub fn new(
        metadata_endpoint: String,
        ttl_secs: u64,
        default_max_input_tokens: u64,
        profile_arn: Option<String>,
    ) -> Self {
        Self {
            table: ArcSwap::from_pointee(ModelTable::default()),
            last_update: AtomicI64::new(0),
            ttl_secs,
            metadata_endpoint,
            default_max_input_tokens,
            profile_arn,
        }
    }

    pub fn len(&self) -> usize {
        self.table.load().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn snapshot(&self, client: &RetryClient) -> Vec<(String, u64)> {
        if self.is_stale() {
            let _ = self.refresh(client).await;
        }
        self.table
            .load()
            .entries
            .iter()
            .map(|(id, max_input)| (id.clone(), *max_input))
            .collect()
    }

    fn is_stale(&self) -> bool {
        let last = self.last_update.load(Ordering::Acquire);
        last == 0 || now_unix() - last > self.ttl_secs as i64
    }

    /// Returns the cached input-token limit for `model_id`, refreshing
    /// inline first if the cache is empty or stale (lazy population).
    pub async fn get_max_input_tokens(&self, model_id: &str, client: &RetryClient) -> u64 {
        if self.is_stale() {
            let _ = self.refresh(client).await;
        }
        self.table
            .load()
            .entries
            .get(model_id)
            .copied()
            .unwrap_or(self.default_max_input_tokens)
    }

    pub async fn refresh(&self, client: &RetryClient) -> Result<(), GatewayError> {
        let mut url = format!("{}/ListAvailableModels?origin=AI_EDITOR", self.metadata_endpoint);
        if let Some(arn) = &self.profile_arn {
            url.push_str(&format!("&profileArn={arn}"));
        }

        let outcome = client
            .execute(|credential| client.http().get(&url).bearer_auth(credential), false)
            .await?;

        let response = match outcome {
            RetryOutcome::Response(response) => response,
            RetryOutcome::ClientError(response) => {
                return Err(GatewayError::Upstream {
                    status: axum::http::StatusCode::from_u16(response.status().as_u16())
                        .unwrap_or(axum::http::StatusCode::BAD_GATEWAY),
                });
            }
        };

        let parsed: ListModelsResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::parse(e.to_string()))?;

        let mut entries = HashMap::new();
        for entry in parsed.models {
            entries.insert(
                entry.model_id,
                entry.max_input_tokens.unwrap_or(self.default_max_input_tokens),
            );
        }

        self.table.store(Arc::new(ModelTable { entries }));
        self.last_update.store(now_unix(), Ordering::Release);
        Ok(())
    }

    /// Spawns the background refresh task; runs every `ttl_secs / 2`. The
    /// returned handle is owned by the caller, which drops it to cancel —
    /// the task holds no reference back to its owner.
    pub fn spawn_background_refresh(
        self: &Arc<Self>,
        client: Arc<RetryClient>,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        let interval = Duration::from_secs((self.ttl_secs / 2).max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(error) = cache.refresh(&client).await {
                    tracing::warn!(%error, "background model cache refresh failed");
                }
            }
        })
    }
}

fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cache_reports_stale() {
        let cache = ModelCache::new("https://example.invalid".to_string(), 3600, 200_000, None);
        assert!(cache.is_stale());
        assert!(cache.is_empty());
    }
}
