use std::sync::Arc;

use async_trait::async_trait;

use aigw_provider_core::{AliasResolver, ModelMapping, RotationCounter};
use aigw_storage::{KvStore, Repository};

fn mapping_key(alias: &str) -> String {
    format!("model:mapping:{alias}")
}

/// Alias table resolution, read-through cached in the KV without expiry.
/// Admin writes call `invalidate` so the next lookup re-reads the row.
pub struct KvAliasResolver {
    kv: Arc<dyn KvStore>,
    repo: Repository,
}

impl KvAliasResolver {
    pub fn new(kv: Arc<dyn KvStore>, repo: Repository) -> Self {
        Self { kv, repo }
    }

    pub async fn invalidate(&self, alias: &str) {
        if let Err(err) = self.kv.del(&mapping_key(alias)).await {
            tracing::warn!(alias, error = %err, "failed to invalidate model mapping cache");
        }
    }
}

#[async_trait]
impl AliasResolver for KvAliasResolver {
    async fn resolve(&self, alias: &str) -> Option<ModelMapping> {
        let key = mapping_key(alias);
        match self.kv.get(&key).await {
            Ok(Some(raw)) => {
                if let Ok(mapping) = serde_json::from_str::<ModelMapping>(&raw) {
                    return Some(mapping);
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(alias, error = %err, "model mapping cache read failed");
            }
        }

        let row = match self.repo.get_model_mapping(alias).await {
            Ok(row) => row?,
            Err(err) => {
                tracing::warn!(alias, error = %err, "model mapping lookup failed");
                return None;
            }
        };
        let mapping = ModelMapping {
            provider_id: row.provider_id,
            upstream_model: row.upstream_model,
        };
        if let Ok(raw) = serde_json::to_string(&mapping)
            && let Err(err) = self.kv.set(&key, &raw, None).await
        {
            tracing::warn!(alias, error = %err, "model mapping cache write failed");
        }
        Some(mapping)
    }
}

/// KV-backed rotation counter; fair across all processes sharing the KV.
/// A KV outage degrades to always-first rather than failing requests.
pub struct KvRotation {
    kv: Arc<dyn KvStore>,
}

impl KvRotation {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl RotationCounter for KvRotation {
    async fn next(&self, key: &str) -> u64 {
        match self.kv.incr(key).await {
            // INCR returns the new value; index from zero.
            Ok(value) => value.saturating_sub(1).max(0) as u64,
            Err(err) => {
                tracing::warn!(key, error = %err, "rotation counter unavailable");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aigw_storage::MemoryKv;

    #[tokio::test]
    async fn rotation_counts_from_zero() {
        let kv = Arc::new(MemoryKv::new());
        let rotation = KvRotation::new(kv);
        assert_eq!(rotation.next("auth:rr:m").await, 0);
        assert_eq!(rotation.next("auth:rr:m").await, 1);
        assert_eq!(rotation.next("auth:rr:other").await, 0);
    }
}
