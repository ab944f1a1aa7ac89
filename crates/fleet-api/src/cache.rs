//! Cloud-provider list cache.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use fleet_state::{ClusterStatus, StateStore};

use crate::error::ApiResult;
use crate::presenters::{CloudProvider, cloud_provider};

pub const PROVIDER_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

struct Cached {
    fetched_at: Instant,
    providers: Vec<CloudProvider>,
}

/// Providers offered by ready clusters, recomputed at most once per TTL.
#[derive(Clone)]
pub struct ProviderCache {
    inner: Arc<Mutex<Option<Cached>>>,
    ttl: Duration,
}

impl Default for ProviderCache {
    fn default() -> Self {
        Self::new(PROVIDER_CACHE_TTL)
    }
}

impl ProviderCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            ttl,
        }
    }

    pub fn get_or_refresh(&self, store: &StateStore) -> ApiResult<Vec<CloudProvider>> {
        let mut cached = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = cached.as_ref()
            && entry.fetched_at.elapsed() < self.ttl
        {
            return Ok(entry.providers.clone());
        }

        let ids: BTreeSet<String> = store
            .list_clusters()?
            .into_iter()
            .filter(|c| c.status == ClusterStatus::Ready)
            .map(|c| c.cloud_provider)
            .collect();
        let providers: Vec<CloudProvider> = ids.iter().map(|id| cloud_provider(id)).collect();
        debug!(providers = providers.len(), "cloud provider cache refreshed");
        *cached = Some(Cached {
            fetched_at: Instant::now(),
            providers: providers.clone(),
        });
        Ok(providers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_state::DataPlaneCluster;
    use std::collections::BTreeMap;

    fn cluster(id: &str, provider: &str) -> DataPlaneCluster {
        DataPlaneCluster {
            cluster_id: id.to_string(),
            cloud_provider: provider.to_string(),
            region: "us-east-1".to_string(),
            multi_az: true,
            status: ClusterStatus::Ready,
            schedulable: true,
            supported_instance_types: Vec::new(),
            capacity: BTreeMap::new(),
            cluster_dns: String::new(),
            operators: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refreshes_only_after_ttl() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_cluster(&cluster("c1", "aws")).unwrap();
        let cache = ProviderCache::default();

        let first = cache.get_or_refresh(&store).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].display_name, "Amazon Web Services");

        store.put_cluster(&cluster("c2", "gcp")).unwrap();
        assert_eq!(cache.get_or_refresh(&store).unwrap().len(), 1);

        tokio::time::advance(PROVIDER_CACHE_TTL + Duration::from_secs(1)).await;
        let ids: Vec<String> = cache
            .get_or_refresh(&store)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["aws", "gcp"]);
    }
}
