//! Typed CoinGecko market-data requests on top of the cached fetcher.

use crate::market::fetch::{FetchError, Fetcher};
use crate::market::key::QueryParams;
use crate::market::transport::Transport;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

const VS_CURRENCY: &str = "usd";
const DEFAULT_LIMIT: u32 = 100;
const ALL_COINS_LIMIT: u32 = 250;
const DEFAULT_HISTORY_DAYS: u32 = 30;

/// One row of `/coins/markets`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Coin {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub image: Option<String>,
    pub current_price: Option<f64>,
    pub market_cap: Option<f64>,
    pub market_cap_rank: Option<u32>,
    pub price_change_percentage_24h: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CoinImage {
    pub thumb: Option<String>,
    pub small: Option<String>,
    pub large: Option<String>,
}

/// Per-currency figures from `/coins/{id}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MarketData {
    #[serde(default)]
    pub current_price: BTreeMap<String, f64>,
    #[serde(default)]
    pub market_cap: BTreeMap<String, f64>,
    #[serde(default)]
    pub total_volume: BTreeMap<String, f64>,
    pub price_change_percentage_24h: Option<f64>,
    pub market_cap_rank: Option<u32>,
}

impl MarketData {
    pub fn price_usd(&self) -> Option<f64> {
        self.current_price.get(VS_CURRENCY).copied()
    }

    pub fn market_cap_usd(&self) -> Option<f64> {
        self.market_cap.get(VS_CURRENCY).copied()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CoinDetails {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub image: Option<CoinImage>,
    pub market_data: Option<MarketData>,
}

/// `[timestamp_ms, value]` series from `/coins/{id}/market_chart`.
/// `prices` is required so an error object is not taken for an empty chart.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MarketChart {
    pub prices: Vec<[f64; 2]>,
    #[serde(default)]
    pub market_caps: Vec<[f64; 2]>,
    #[serde(default)]
    pub total_volumes: Vec<[f64; 2]>,
}

impl MarketChart {
    /// Lowest and highest price in the series.
    pub fn price_range(&self) -> Option<(f64, f64)> {
        let mut prices = self.prices.iter().map(|p| p[1]);
        let first = prices.next()?;
        Some(prices.fold((first, first), |(lo, hi), p| (lo.min(p), hi.max(p))))
    }

    /// Percent change from first to last price.
    pub fn change_pct(&self) -> Option<f64> {
        let first = self.prices.first()?[1];
        let last = self.prices.last()?[1];
        if first == 0.0 {
            return None;
        }
        Some((last - first) / first * 100.0)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub coins: Vec<SearchHit>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub market_cap_rank: Option<u32>,
}

fn markets_params(per_page: u32) -> QueryParams {
    QueryParams::new()
        .with("vs_currency", VS_CURRENCY)
        .with("order", "market_cap_desc")
        .with("per_page", per_page)
        .with("page", 1u32)
        .with("sparkline", false)
}

fn coin_path(id: &str) -> String {
    format!("/coins/{}", urlencoding::encode(id))
}

impl<T: Transport> Fetcher<T> {
    async fn fetch_typed<R: DeserializeOwned>(
        &self,
        what: &str,
        endpoint: &str,
        params: &QueryParams,
    ) -> Result<R, FetchError> {
        self.fetch_with_cache_as(endpoint, params)
            .await
            .inspect_err(|e| warn!(what, error = %e, "fetch failed"))
    }

    /// Top coins by market cap. `limit` defaults to 100.
    pub async fn fetch_coins(&self, limit: Option<u32>) -> Result<Vec<Coin>, FetchError> {
        let params = markets_params(limit.unwrap_or(DEFAULT_LIMIT));
        let coins: Vec<Coin> = self.fetch_typed("coins", "/coins/markets", &params).await?;
        info!(count = coins.len(), "coins");
        Ok(coins)
    }

    /// The largest single page of market rows the API serves (250).
    pub async fn fetch_all_coins(&self) -> Result<Vec<Coin>, FetchError> {
        self.fetch_coins(Some(ALL_COINS_LIMIT)).await
    }

    pub async fn get_coin_details(&self, id: &str) -> Result<CoinDetails, FetchError> {
        let params = QueryParams::new()
            .with("localization", false)
            .with("tickers", false)
            .with("market_data", true)
            .with("community_data", false)
            .with("developer_data", false)
            .with("sparkline", false);
        self.fetch_typed("coin details", &coin_path(id), &params).await
    }

    pub async fn get_coin_history(&self, id: &str, days: u32) -> Result<MarketChart, FetchError> {
        let params = QueryParams::new()
            .with("vs_currency", VS_CURRENCY)
            .with("days", days);
        let endpoint = format!("{}/market_chart", coin_path(id));
        self.fetch_typed("coin history", &endpoint, &params).await
    }

    /// Price history; `days` defaults to 30.
    pub async fn fetch_token_history(
        &self,
        id: &str,
        days: Option<u32>,
    ) -> Result<MarketChart, FetchError> {
        self.get_coin_history(id, days.unwrap_or(DEFAULT_HISTORY_DAYS))
            .await
    }

    /// Server-side search; details of the best match, or `None` if nothing matched.
    pub async fn fetch_token_data(&self, query: &str) -> Result<Option<CoinDetails>, FetchError> {
        let params = QueryParams::new().with("query", query);
        let results: SearchResults = self.fetch_typed("search", "/search", &params).await?;
        match results.coins.first() {
            Some(hit) => Ok(Some(self.get_coin_details(&hit.id).await?)),
            None => Ok(None),
        }
    }
}

/// Coins whose name or symbol contains `query`, ignoring case, in input order.
/// The query is used as given, whitespace included. An empty query matches
/// every candidate.
pub fn search_coins<'a>(query: &str, candidates: &'a [Coin]) -> Vec<&'a Coin> {
    let needle = query.to_lowercase();
    candidates
        .iter()
        .filter(|c| {
            c.name.to_lowercase().contains(&needle) || c.symbol.to_lowercase().contains(&needle)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(id: &str, symbol: &str, name: &str) -> Coin {
        Coin {
            id: id.to_string(),
            symbol: symbol.to_string(),
            name: name.to_string(),
            image: None,
            current_price: None,
            market_cap: None,
            market_cap_rank: None,
            price_change_percentage_24h: None,
        }
    }

    #[test]
    fn search_matches_name_or_symbol_case_insensitively() {
        let coins = vec![
            coin("bitcoin", "btc", "Bitcoin"),
            coin("ethereum", "eth", "Ethereum"),
            coin("wrapped-bitcoin", "wbtc", "Wrapped Bitcoin"),
        ];
        let hits: Vec<&str> = search_coins("BTC", &coins)
            .into_iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(hits, vec!["bitcoin", "wrapped-bitcoin"]);
        let hits = search_coins("ether", &coins);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "ethereum");
        assert!(search_coins("doge", &coins).is_empty());
    }

    #[test]
    fn search_does_not_trim_the_query() {
        let coins = vec![
            coin("bitcoin", "btc", "Bitcoin"),
            coin("wrapped-bitcoin", "wbtc", "Wrapped Bitcoin"),
        ];
        assert!(search_coins(" btc", &coins).is_empty());
        let hits = search_coins(" bitcoin", &coins);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "wrapped-bitcoin");
        assert_eq!(search_coins("", &coins).len(), 2);
    }

    #[test]
    fn chart_requires_prices() {
        let err = serde_json::from_str::<MarketChart>(r#"{"status":{"error_code":429}}"#);
        assert!(err.is_err());
        let chart: MarketChart = serde_json::from_str(r#"{"prices":[[1.0,2.0]]}"#).unwrap();
        assert_eq!(chart.prices.len(), 1);
        assert!(chart.market_caps.is_empty());
    }

    #[test]
    fn chart_range_and_change() {
        let chart = MarketChart {
            prices: vec![[0.0, 100.0], [1.0, 80.0], [2.0, 120.0], [3.0, 110.0]],
            ..Default::default()
        };
        assert_eq!(chart.price_range(), Some((80.0, 120.0)));
        let pct = chart.change_pct().unwrap();
        assert!((pct - 10.0).abs() < 1e-9);
        assert_eq!(MarketChart::default().price_range(), None);
    }

    #[test]
    fn coin_path_encodes_id() {
        assert_eq!(coin_path("bitcoin"), "/coins/bitcoin");
        assert_eq!(coin_path("a b/c"), "/coins/a%20b%2Fc");
    }

    #[test]
    fn markets_row_tolerates_missing_figures() {
        let row: Coin =
            serde_json::from_str(r#"{"id":"x","symbol":"x","name":"X","current_price":null}"#)
                .unwrap();
        assert_eq!(row.current_price, None);
        assert_eq!(row.market_cap_rank, None);
    }
}
