//! Tax-id registry lookups: cache, rate limiting, HTTP backend.

mod cache;
mod registry;
mod types;

pub use cache::LookupCache;
pub use registry::HttpLookupClient;
pub use types::{LookupClient, LookupError, Resolved};
