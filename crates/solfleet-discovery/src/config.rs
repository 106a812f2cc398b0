use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the discovery service and its query index.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DiscoveryConfig {
    /// Number of shards the table keyspace is crawled in.
    pub num_partitions: usize,
    /// Worker count for the partition fan-out.
    pub max_concurrent_requests: usize,
    /// Pause between full refreshes; `None` disables the refresh loop after
    /// the cache bootstrap.
    pub reload_delay: Option<Duration>,
    /// Number of windows a query splits `all_tables` into for parallel
    /// scoring.
    pub num_partitions_per_query: usize,
    /// Tables kept per scoring window.
    pub top_tables_per_partition: usize,
    /// Tables scoring at or below this are dropped during scoring.
    pub min_score: u32,
    /// Directory for the per-partition disk cache; `None` disables caching.
    pub cache_directory: Option<PathBuf>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            num_partitions: 257,
            max_concurrent_requests: 8,
            reload_delay: Some(Duration::from_secs(60 * 60)),
            num_partitions_per_query: 8,
            top_tables_per_partition: 16,
            min_score: 1,
            cache_directory: None,
        }
    }
}
