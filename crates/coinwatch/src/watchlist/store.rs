//! SQLite key-value store holding one JSON id list per account.

use crate::market::coins::Coin;
use crate::watchlist::account::Account;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum WatchlistError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid account address: {0:?}")]
    InvalidAccount(String),
}

/// Watchlists keyed by `watchlist_<account>`, each an ordered list of coin ids.
pub struct WatchlistStore {
    conn: Mutex<Connection>,
}

impl WatchlistStore {
    /// Open or create the store at `path`. Creates parent dirs if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WatchlistError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self, WatchlistError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, WatchlistError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_utc INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn read(conn: &Connection, key: &str) -> Result<Vec<String>, WatchlistError> {
        let raw = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |r| {
                r.get::<_, String>(0)
            })
            .optional()?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    fn write(conn: &Connection, key: &str, ids: &[String]) -> Result<(), WatchlistError> {
        let json = serde_json::to_string(ids)?;
        let updated = time::OffsetDateTime::now_utc().unix_timestamp();
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_utc) VALUES (?1, ?2, ?3)",
            rusqlite::params![key, json, updated],
        )?;
        Ok(())
    }

    /// Read, modify, and write back one watchlist inside a transaction.
    fn update<R>(
        &self,
        account: &Account,
        f: impl FnOnce(&mut Vec<String>) -> R,
    ) -> Result<R, WatchlistError> {
        let key = account.storage_key();
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let tx = conn.transaction()?;
        let mut ids = Self::read(&tx, &key)?;
        let before = ids.clone();
        let out = f(&mut ids);
        if ids != before {
            Self::write(&tx, &key, &ids)?;
        }
        tx.commit()?;
        Ok(out)
    }

    /// The account's watchlist in insertion order; empty if none was saved.
    pub fn load(&self, account: &Account) -> Result<Vec<String>, WatchlistError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Self::read(&conn, &account.storage_key())
    }

    pub fn contains(&self, account: &Account, coin_id: &str) -> Result<bool, WatchlistError> {
        Ok(self.load(account)?.iter().any(|id| id == coin_id))
    }

    /// Append `coin_id` unless already present. Returns whether it was added.
    pub fn add(&self, account: &Account, coin_id: &str) -> Result<bool, WatchlistError> {
        let added = self.update(account, |ids| {
            if ids.iter().any(|id| id == coin_id) {
                false
            } else {
                ids.push(coin_id.to_string());
                true
            }
        })?;
        debug!(account = %account, coin_id, added, "watchlist add");
        Ok(added)
    }

    /// Remove `coin_id`. Returns whether it was present.
    pub fn remove(&self, account: &Account, coin_id: &str) -> Result<bool, WatchlistError> {
        let removed = self.update(account, |ids| {
            let before = ids.len();
            ids.retain(|id| id != coin_id);
            ids.len() != before
        })?;
        debug!(account = %account, coin_id, removed, "watchlist remove");
        Ok(removed)
    }

    /// Add if absent, remove if present. Returns membership after the call.
    pub fn toggle(&self, account: &Account, coin_id: &str) -> Result<bool, WatchlistError> {
        self.update(account, |ids| {
            if let Some(pos) = ids.iter().position(|id| id == coin_id) {
                ids.remove(pos);
                false
            } else {
                ids.push(coin_id.to_string());
                true
            }
        })
    }

    /// Empty the account's watchlist.
    pub fn clear(&self, account: &Account) -> Result<(), WatchlistError> {
        self.update(account, |ids| ids.clear())
    }
}

/// Pair each watchlisted id with its market row, when `coins` has one.
pub fn resolve<'a>(ids: &'a [String], coins: &'a [Coin]) -> Vec<(&'a str, Option<&'a Coin>)> {
    ids.iter()
        .map(|id| (id.as_str(), coins.iter().find(|c| &c.id == id)))
        .collect()
}
