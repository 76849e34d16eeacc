mod analysis;
mod key;
mod memory;
mod single_flight;

pub use analysis::{AnalysisCache, CacheLookup, CacheOutcome, CachePolicy, CacheScope};
pub use key::{transcript_hash, CacheKeyGenerator, CACHE_KEY_SCHEMA};
pub use memory::{MemoryHit, MemoryTier};
pub use single_flight::{Flight, SingleFlight};
