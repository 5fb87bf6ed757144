//! Per-account coin watchlists kept in a local SQLite key-value store.

mod account;
mod store;

pub use account::Account;
pub use store::{resolve, WatchlistError, WatchlistStore};
