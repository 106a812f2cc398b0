use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::{join_all, BoxFuture};
use rayon::prelude::*;
use solana_sdk::pubkey::Pubkey;
use solfleet_core::{CallContext, CallError, LoadBalancer};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::cache;
use crate::config::DiscoveryConfig;
use crate::index::TableIndex;
use crate::table::AddressLookupTable;

/// Type-erased fetch of one keyspace partition against a backend.
pub type PartitionFetch<T> = Arc<
    dyn Fn(T, u32) -> BoxFuture<'static, Result<Vec<AddressLookupTable>, CallError>>
        + Send
        + Sync,
>;

/// Crawls the sharded lookup-table keyspace through the balanced dispatcher
/// and maintains the in-memory [`TableIndex`].
///
/// Queries (`find_optimal_tables`, `scan_for_table`) never touch the
/// network; they run against whatever the last publish produced.
pub struct DiscoveryService<T> {
    balancer: Arc<LoadBalancer<T>>,
    fetch: PartitionFetch<T>,
    index: Arc<TableIndex>,
    config: DiscoveryConfig,
    call_context: CallContext,
    initialized_tx: watch::Sender<bool>,
}

impl<T: Clone + Send + Sync + 'static> DiscoveryService<T> {
    pub fn new<F, Fut>(
        balancer: Arc<LoadBalancer<T>>,
        config: DiscoveryConfig,
        fetch: F,
    ) -> Self
    where
        F: Fn(T, u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<AddressLookupTable>, CallError>> + Send + 'static,
    {
        let fetch: PartitionFetch<T> =
            Arc::new(move |client, partition| Box::pin(fetch(client, partition)));
        let index = Arc::new(TableIndex::new(&config));
        let (initialized_tx, _) = watch::channel(false);
        // partition crawls are long-lived background work: spend retries
        // freely and overdraft rather than give up
        let call_context = CallContext {
            max_retries: 20,
            force_call: true,
            measure_call_time: true,
            ..CallContext::default()
        };
        Self {
            balancer,
            fetch,
            index,
            config,
            call_context,
            initialized_tx,
        }
    }

    pub fn index(&self) -> &Arc<TableIndex> {
        &self.index
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Whether at least 80% of partitions have been populated, from cache
    /// or from a live refresh.
    pub fn is_initialized(&self) -> bool {
        *self.initialized_tx.borrow()
    }

    /// Completes once the index is initialized. Resolves immediately when
    /// initialization already happened.
    pub async fn initialized(&self) {
        let mut rx = self.initialized_tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// See [`TableIndex::find_optimal_tables`].
    pub fn find_optimal_tables(
        &self,
        distinct_accounts: &HashSet<Pubkey>,
    ) -> Option<Vec<Arc<AddressLookupTable>>> {
        self.index.find_optimal_tables(distinct_accounts)
    }

    /// See [`TableIndex::scan_for_table`].
    pub fn scan_for_table(&self, address: &Pubkey) -> Option<Arc<AddressLookupTable>> {
        self.index.scan_for_table(address)
    }

    /// Bootstraps from the disk cache, then refreshes on `reload_delay`
    /// until dropped. With `reload_delay: None` this returns after the
    /// bootstrap.
    pub async fn run(&self) {
        if self.index.all_tables().is_empty() {
            self.load_cache();
        }
        let Some(reload_delay) = self.config.reload_delay else {
            return;
        };
        loop {
            self.refresh().await;
            tokio::time::sleep(reload_delay).await;
        }
    }

    /// One full crawl of the keyspace: `max_concurrent_requests` workers
    /// pull partition numbers from a shared counter and fetch them through
    /// the dispatcher. Republishes `all_tables` when enough partitions are
    /// populated.
    pub async fn refresh(&self) {
        let started = Instant::now();
        let next_partition = AtomicUsize::new(0);
        let workers: Vec<_> = (0..self.config.max_concurrent_requests.max(1))
            .map(|_| self.worker(&next_partition))
            .collect();
        join_all(workers).await;

        let populated = self.index.populated_count();
        if populated * 10 >= self.config.num_partitions * 8 {
            self.index.join_partitions();
            info!(
                num_tables = self.index.all_tables().len(),
                duration_ms = started.elapsed().as_millis() as u64,
                "fetched all lookup table partitions"
            );
            self.initialized_tx.send_replace(true);
        } else {
            warn!(
                populated,
                num_partitions = self.config.num_partitions,
                "refresh left the index partially populated"
            );
        }
    }

    async fn worker(&self, next_partition: &AtomicUsize) {
        loop {
            let partition = next_partition.fetch_add(1, Ordering::Relaxed);
            if partition >= self.config.num_partitions {
                return;
            }
            let started = Instant::now();
            let result = self
                .balancer
                .call(&self.call_context, "lookup table partition fetch", |client| {
                    (self.fetch.as_ref())(client, partition as u32)
                })
                .await;
            match result {
                Ok(Some(tables)) => {
                    let tables: Vec<Arc<AddressLookupTable>> =
                        tables.into_iter().map(Arc::new).collect();
                    let avg_unique_accounts = if tables.is_empty() {
                        0.0
                    } else {
                        tables.iter().map(|t| t.num_unique_accounts()).sum::<usize>() as f64
                            / tables.len() as f64
                    };
                    info!(
                        partition,
                        num_tables = tables.len(),
                        avg_unique_accounts,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "loaded lookup table partition"
                    );
                    if let Some(dir) = &self.config.cache_directory {
                        if let Err(err) = cache::write_partition(dir, partition, &tables) {
                            warn!(
                                partition,
                                error = %err,
                                "failed to write lookup table cache"
                            );
                        }
                    }
                    self.index.store_partition(partition, tables);
                }
                Ok(None) => {
                    error!(partition, "no capacity to fetch lookup table partition");
                }
                Err(err) => {
                    error!(
                        partition,
                        error = %err,
                        "failed to fetch lookup tables for partition"
                    );
                }
            }
        }
    }

    /// Loads whatever partitions the disk cache holds. Signals
    /// initialization when at least 80% of them were present and intact;
    /// otherwise the first live refresh completes it.
    pub fn load_cache(&self) {
        let Some(dir) = &self.config.cache_directory else {
            return;
        };
        let started = Instant::now();
        let loaded = (0..self.config.num_partitions)
            .into_par_iter()
            .filter(|&partition| match cache::read_partition(dir, partition) {
                Ok(Some(tables)) => {
                    self.index.store_partition(partition, tables);
                    true
                }
                Ok(None) => false,
                Err(err) => {
                    warn!(
                        partition,
                        error = %err,
                        "ignoring corrupt lookup table cache partition"
                    );
                    false
                }
            })
            .count();

        if loaded * 10 >= self.config.num_partitions * 8 {
            self.index.join_partitions();
            info!(
                num_tables = self.index.all_tables().len(),
                loaded_partitions = loaded,
                duration_ms = started.elapsed().as_millis() as u64,
                "loaded lookup tables from disk cache"
            );
            self.initialized_tx.send_replace(true);
        } else if loaded > 0 {
            info!(
                loaded_partitions = loaded,
                num_partitions = self.config.num_partitions,
                "partial cache load, waiting for first refresh"
            );
        }
    }
}
