mod cache_manager;
mod file_cache;
mod types;

pub use cache_manager::{CacheManager, CacheSettings, CacheStats};
pub use file_cache::FileCache;
pub use types::{CacheEntry, Clock, ManualClock, SystemClock, TtlPolicy};
