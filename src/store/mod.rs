//! # Backing Stores
//!
//! ```text
//! StoreProvider (enum)            <- Zero-cost dispatch, no vtable
//!   ├── Redis(RedisStore)         <- ConnectionManager, SET NX PX, Lua INCR
//!   └── Memory(MemoryStore)       <- DashMap with per-entry TTL, single process
//! ```
//!
//! Every store implements [`KeyValueStore`]. Store errors are never retried or
//! swallowed here; they surface as `CacheError::Store`.

pub mod memory;
pub mod provider;
pub mod traits;

#[cfg(feature = "redis-store")]
pub mod redis;

pub use memory::MemoryStore;
pub use provider::StoreProvider;
pub use traits::KeyValueStore;

#[cfg(feature = "redis-store")]
pub use self::redis::RedisStore;
