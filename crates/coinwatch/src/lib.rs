//! coinwatch — market data and watchlists for a crypto portfolio dashboard.
//!
//! Fetches CoinGecko-style market data through an in-memory TTL cache with
//! retry on rate limiting, and keeps per-account watchlists in a local store.
//! Read-only; no wallet keys; no transaction signing.

pub mod market;
pub mod watchlist;

pub use market::coins::{search_coins, Coin, CoinDetails, MarketChart, MarketData};
pub use market::{
    retry_with_backoff, CacheKey, FetchConfig, FetchError, Fetcher, HttpTransport, QueryParams,
    ResponseCache, RetryPolicy, Transport,
};
pub use watchlist::{Account, WatchlistError, WatchlistStore};
