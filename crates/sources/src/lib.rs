//! Source acquisition: per-source rate limiting, a retrying HTTP fetcher,
//! the [`SourceAdapter`] trait with its pagination driver, and the builtin
//! adapters.

pub mod adapter;
pub mod fetcher;
pub mod pagination;
pub mod rate_limiter;
pub mod registry;
pub mod sources;

pub use adapter::{drain, DrainConfig, DrainOutcome, Page, Pagination, Payload, SourceAdapter};
pub use fetcher::{backoff_delay, FetchStatsSnapshot, Method, Request, ResilientFetcher};
pub use rate_limiter::{RateLimiter, RateLimiterRegistry};
pub use registry::{SourceInfo, SourceRegistry, BUILTIN_SOURCES};
