//! Balanced Call Dispatch
//!
//! This crate provides the client-side dispatch core for applications that
//! issue many remote procedure calls against a fleet of interchangeable
//! backends. It executes a user-supplied asynchronous operation against the
//! best backend in a pool, honoring per-backend rate limits, sampling
//! latencies, and retrying or failing over on error.
//!
//! # Overview
//!
//! The crate is backend-agnostic: a backend is any cloneable handle (usually
//! an `Arc`-wrapped RPC client). The dispatch pipeline composes four pieces:
//!
//! - [`capacity`] - Per-backend token-bucket budgets with lazy refill,
//!   overdraft accounting, and sliding-window health tracking
//! - [`backoff`] - Backoff policies mapping an error count and error class
//!   to a retry verdict (delay, immediate, or give up)
//! - [`balancer`] - [`BalancedItem`] (a backend plus its bookkeeping) and
//!   the ordered [`LoadBalancer`] with its best-first selection
//! - [`call`] - The retry/failover state machine executing an operation in
//!   one of three modes: unchecked, greedy, or courteous
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use solfleet_core::{
//!     BalancedItem, CallContext, CallError, CapacityConfig, ErrorHandler, LoadBalancer,
//! };
//!
//! # struct RpcClient;
//! # impl RpcClient {
//! #     fn new(_url: &str) -> Self { RpcClient }
//! #     async fn get_slot(&self) -> Result<u64, CallError> { Ok(0) }
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), CallError> {
//!     let items = ["https://rpc-a.example", "https://rpc-b.example"]
//!         .iter()
//!         .map(|url| {
//!             BalancedItem::new(
//!                 Arc::new(RpcClient::new(url)),
//!                 CapacityConfig::per_second(10.0),
//!                 ErrorHandler::default(),
//!             )
//!         })
//!         .collect();
//!     let balancer = LoadBalancer::new(items);
//!
//!     let ctx = CallContext::default();
//!     let slot = balancer
//!         .call(&ctx, "get_slot", |client| async move { client.get_slot().await })
//!         .await?;
//!     println!("slot: {slot:?}");
//!     Ok(())
//! }
//! ```
//!
//! # Dispatch modes
//!
//! - **Unchecked**: no capacity bookkeeping; always calls the current head.
//! - **Greedy**: unconditionally claims capacity (overdraft allowed), then
//!   calls.
//! - **Courteous**: claims capacity only when available, rotating across the
//!   pool and sleeping for the shortest estimated wait; returns `Ok(None)`
//!   when the pool has no capacity and `force_call` is off.

pub mod backoff;
pub mod balancer;
pub mod call;
pub mod capacity;
pub mod error;

pub use backoff::{BackoffPolicy, ErrorHandler, RetryAdvice};
pub use balancer::{BalancedItem, LoadBalancer};
pub use call::{CallContext, CallMode};
pub use capacity::{CapacityConfig, CapacityState};
pub use error::{CallError, ClassifyError, ErrorClass};
