//! TTL cache for AI-derived artifacts and chat snapshots, layered over a
//! durable key-value store.

pub mod clock;
pub mod error;
pub mod key;
pub mod layer;
pub mod sqlite;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CacheError;
pub use key::{CacheKey, Namespace};
pub use layer::CacheLayer;
pub use sqlite::SqliteKvStore;
pub use store::{KvStore, MemoryKvStore};
