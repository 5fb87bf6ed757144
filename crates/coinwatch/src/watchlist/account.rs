//! Ethereum account addresses used to key watchlists.

use crate::watchlist::store::WatchlistError;
use std::fmt;
use std::str::FromStr;

const ADDRESS_BYTES: usize = 20;
const KEY_PREFIX: &str = "watchlist_";

/// A `0x`-prefixed 20-byte hex address, stored lowercase.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Account(String);

impl Account {
    pub fn parse(s: &str) -> Result<Self, WatchlistError> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| WatchlistError::InvalidAccount(s.to_string()))?;
        match hex::decode(digits) {
            Ok(bytes) if bytes.len() == ADDRESS_BYTES => {
                Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
            }
            _ => Err(WatchlistError::InvalidAccount(s.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Store key for this account's watchlist: `watchlist_<address>`.
    pub fn storage_key(&self) -> String {
        format!("{}{}", KEY_PREFIX, self.0)
    }
}

impl FromStr for Account {
    type Err = WatchlistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Account::parse(s)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
