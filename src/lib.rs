#![allow(clippy::doc_markdown)] // Allow technical terms like Redis, DragonflyDB in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Cache Guard
//!
//! Read-through caching over a shared key-value store with protection against
//! cache stampedes and cache penetration.
//!
//! ## Overview
//!
//! Many processes share one Redis-compatible store. When a hot key is missing,
//! [`CacheStampedeGuard`] lets exactly one caller across the fleet recompute it
//! while the others wait for the value to appear (bounded, unbounded, or not at
//! all). Computations that produce nothing are cached as a negative marker for
//! a shorter TTL so repeated lookups of absent data stop reaching the origin.
//!
//! ## Module Organization
//!
//! - [`guard`] - Single-flight fetch protocol and lock key derivation
//! - [`facade`] - Serialization and negative-marker handling over a store
//! - [`store`] - Backing store trait with Redis and in-memory providers
//! - [`config`] - Per-call fetch policy and file/env loadable settings
//! - [`error`] - Structured error handling
//! - [`logging`] - `tracing` subscriber setup
//!
//! ## Quick Start
//!
//! ```rust
//! use cache_guard::{CacheConfig, CacheStampedeGuard, MemoryStore};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let guard = CacheStampedeGuard::new(MemoryStore::new());
//! let config = CacheConfig::new(Duration::from_secs(300))
//!     .with_null_expire_time(Duration::from_secs(30));
//!
//! let roles: Option<Vec<String>> = guard
//!     .fetch_typed("user:42:roles", &config, || async {
//!         Ok::<_, anyhow::Error>(Some(vec!["admin".to_string()]))
//!     })
//!     .await?;
//!
//! assert_eq!(roles, Some(vec!["admin".to_string()]));
//! # Ok::<(), cache_guard::CacheError>(())
//! # }).unwrap();
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                          # Unit and in-memory integration tests
//! cargo test --features test-services # Also run against REDIS_URL
//! ```

pub mod config;
pub mod error;
pub mod facade;
pub mod guard;
pub mod logging;
pub mod store;

pub use config::{CacheConfig, GuardSettings, WaitPolicy};
pub use error::{BoxError, CacheError, CacheResult};
pub use facade::{KeyValueAccess, StoredValue, NEGATIVE_MARKER};
pub use guard::{CacheKey, CacheStampedeGuard, LOCK_KEY_PREFIX};
pub use store::{KeyValueStore, MemoryStore, StoreProvider};

#[cfg(feature = "redis-store")]
pub use store::RedisStore;
