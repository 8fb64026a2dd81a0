//! wordtop - concurrent URL word-frequency service with an LRU cache
//!
//! This library provides:
//! - An arena-backed LRU cache with O(1) get/set and an observable
//!   wrapper that emits structured events on every operation
//! - A bounded work queue with a cooperative drain protocol (stop
//!   markers, task acknowledgement, join)
//! - A TCP dispatcher + worker pool that fetches URLs and reduces each
//!   body to its top-K word frequencies
//! - A concurrent client that streams URLs at the server with retry and
//!   busy-handling policies

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod server;

// Re-export main types
pub use cache::{LruCache, ObservedLruCache};
pub use client::{Client, ClientSummary};
pub use config::{ClientConfig, ServerConfig};
pub use error::{Error, Result};
pub use server::Server;
