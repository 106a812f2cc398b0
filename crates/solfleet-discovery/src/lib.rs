//! Address Lookup Table Discovery
//!
//! This crate crawls the sharded keyspace of Solana address lookup tables,
//! keeps a partitioned in-memory index of them, and answers the question
//! "which tables best compress this set of accounts" with a near-minimal
//! cover.
//!
//! # Overview
//!
//! - [`table`] - The [`AddressLookupTable`] model and its serialized form
//! - [`cache`] - Bit-exact per-partition disk cache for fast bootstraps
//! - [`index`] - The sharded [`TableIndex`]: parallel scoring plus a greedy
//!   bitmask cover bounded by [`MAX_COVER_TABLES`](index::MAX_COVER_TABLES)
//! - [`service`] - The [`DiscoveryService`] crawler, dispatching partition
//!   fetches through a `solfleet_core` load balancer
//!
//! Queries are pure in-memory computation; only the periodic refresh talks
//! to the backends.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::collections::HashSet;
//! use std::sync::Arc;
//! use solana_sdk::pubkey::Pubkey;
//! use solfleet_core::{BalancedItem, CapacityConfig, ErrorHandler, LoadBalancer};
//! use solfleet_discovery::{AddressLookupTable, DiscoveryConfig, DiscoveryService};
//!
//! # #[derive(Clone)]
//! # struct RpcClient;
//! # impl RpcClient {
//! #     async fn program_accounts_for_partition(
//! #         &self,
//! #         _partition: u32,
//! #     ) -> Result<Vec<AddressLookupTable>, solfleet_core::CallError> { Ok(Vec::new()) }
//! # }
//! #[tokio::main]
//! async fn main() {
//!     let balancer = Arc::new(LoadBalancer::new(vec![BalancedItem::new(
//!         RpcClient,
//!         CapacityConfig::per_second(10.0),
//!         ErrorHandler::default(),
//!     )]));
//!     let service = Arc::new(DiscoveryService::new(
//!         balancer,
//!         DiscoveryConfig::default(),
//!         |client: RpcClient, partition| async move {
//!             client.program_accounts_for_partition(partition).await
//!         },
//!     ));
//!
//!     let runner = service.clone();
//!     tokio::spawn(async move { runner.run().await });
//!     service.initialized().await;
//!
//!     let accounts: HashSet<Pubkey> = HashSet::new();
//!     if let Some(tables) = service.find_optimal_tables(&accounts) {
//!         println!("cover of {} tables", tables.len());
//!     }
//! }
//! ```

pub mod cache;
pub mod config;
pub mod index;
pub mod service;
pub mod table;

pub use cache::CacheError;
pub use config::DiscoveryConfig;
pub use index::{TableIndex, MAX_QUERY_ACCOUNTS};
pub use service::{DiscoveryService, PartitionFetch};
pub use table::AddressLookupTable;
