mod memory;
mod store;

pub use memory::MemoryCache;
pub use store::CacheEntry;
pub use store::CacheError;
pub use store::CacheStore;
