//! Market data fetching, caching, retries, and request normalization.

mod cache;
pub mod coins;
mod fetch;
mod key;
mod retry;
mod transport;

pub use cache::ResponseCache;
pub use fetch::{FetchConfig, FetchError, Fetcher};
pub use key::{CacheKey, ParamValue, QueryParams};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use transport::{HttpResponse, HttpTransport, Transport, TransportError};
