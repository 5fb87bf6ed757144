//! coinwatch CLI: market data, search, watchlists, raw API calls.

use clap::{Args, Parser, Subcommand};
use coinwatch::market::coins::CoinDetails;
use coinwatch::watchlist::resolve;
use coinwatch::{
    search_coins, Account, Coin, FetchConfig, FetchError, Fetcher, MarketChart, QueryParams,
    RetryPolicy, Transport, WatchlistStore,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();
    let cli = Cli::parse();
    let config = cli.api.fetch_config();
    match cli.command {
        Command::Coins(args) => run_coins(config, args),
        Command::Coin(args) => run_coin(config, args),
        Command::Search(args) => run_search(config, args),
        Command::Get(args) => run_get(config, args),
        Command::Watchlist(args) => run_watchlist(config, args),
    }
}

#[derive(Parser)]
#[command(name = "coinwatch")]
#[command(author = "gorusys <goru.connector@outlook.com>")]
#[command(about = "Crypto market data and per-account watchlists")]
struct Cli {
    #[command(flatten)]
    api: ApiArgs,
    #[command(subcommand)]
    command: Command,
}

/// Upstream API settings. Anything left unset keeps the library default.
#[derive(Args)]
struct ApiArgs {
    #[arg(long, global = true, env = "COINWATCH_BASE_URL")]
    base_url: Option<String>,
    #[arg(long, global = true, env = "COINWATCH_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    #[arg(long, global = true, env = "COINWATCH_CACHE_TTL_SECS")]
    cache_ttl_secs: Option<u64>,
    #[arg(long, global = true, env = "COINWATCH_RATE_LIMIT_RETRIES")]
    rate_limit_retries: Option<u32>,
    #[arg(long, global = true, env = "COINWATCH_RATE_LIMIT_DELAY_MS")]
    rate_limit_delay_ms: Option<u64>,
    #[arg(long, global = true, env = "COINWATCH_MIN_INTERVAL_MS")]
    min_interval_ms: Option<u64>,
}

impl ApiArgs {
    fn fetch_config(&self) -> FetchConfig {
        let mut config = FetchConfig {
            api_key: self.api_key.clone(),
            ..Default::default()
        };
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if let Some(secs) = self.cache_ttl_secs {
            config.cache_ttl_secs = secs;
        }
        if let Some(n) = self.rate_limit_retries {
            config.rate_limit_retries = n;
        }
        if let Some(ms) = self.rate_limit_delay_ms {
            config.rate_limit_delay_ms = ms;
        }
        if let Some(ms) = self.min_interval_ms {
            config.min_interval_ms = ms;
        }
        config
    }
}

#[derive(Subcommand)]
enum Command {
    /// List top coins by market cap.
    Coins(CoinsArgs),
    /// Show one coin's market data and price history.
    Coin(CoinArgs),
    /// Find coins by name or symbol.
    Search(SearchArgs),
    /// Uncached GET against the API with exponential backoff; prints the JSON body.
    Get(GetArgs),
    /// Manage an account's watchlist.
    Watchlist(WatchlistArgs),
}

#[derive(Parser)]
struct CoinsArgs {
    #[arg(long, default_value_t = 100)]
    limit: u32,
    /// Fetch the largest page (250 coins); overrides --limit.
    #[arg(long)]
    all: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct CoinArgs {
    id: String,
    #[arg(long, default_value_t = 30)]
    days: u32,
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct SearchArgs {
    query: String,
    /// Ask the API's search endpoint instead of filtering the top 250 locally.
    #[arg(long)]
    remote: bool,
}

#[derive(Parser)]
struct GetArgs {
    /// Path under the base URL, e.g. /ping
    endpoint: String,
    /// Query parameter as name=value; repeatable.
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
    #[arg(long, default_value_t = 3)]
    attempts: u32,
    #[arg(long, default_value_t = 300)]
    initial_delay_ms: u64,
}

#[derive(Parser)]
struct WatchlistArgs {
    #[arg(long, env = "COINWATCH_ACCOUNT")]
    account: String,
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
    #[command(subcommand)]
    action: WatchlistAction,
}

#[derive(Subcommand)]
enum WatchlistAction {
    /// Print the watchlisted coin ids.
    List,
    /// Add a coin id.
    Add { id: String },
    /// Remove a coin id.
    Remove { id: String },
    /// Add if absent, remove if present.
    Toggle { id: String },
    /// Watchlisted coins with current market data.
    Show,
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got {:?}", s))?;
    if name.is_empty() {
        return Err(format!("empty parameter name in {:?}", s));
    }
    Ok((name.to_string(), value.to_string()))
}

fn fetcher(config: FetchConfig) -> Result<Fetcher, Box<dyn std::error::Error>> {
    let cache = Arc::new(config.new_cache());
    Ok(Fetcher::new(config, cache)?)
}

fn store_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("watchlist.sqlite")
}

fn fmt_usd(v: Option<f64>) -> String {
    v.map(|x| format!("${:.2}", x))
        .unwrap_or_else(|| "—".to_string())
}

fn fmt_pct(v: Option<f64>) -> String {
    v.map(|x| format!("{:+.2}%", x))
        .unwrap_or_else(|| "—".to_string())
}

fn print_coin_table<'a>(coins: impl IntoIterator<Item = &'a Coin>) {
    println!(
        "{:>4}  {:<24} {:<8} {:>14} {:>9} {:>20}",
        "rank", "name", "symbol", "price", "24h", "market cap"
    );
    for c in coins {
        println!(
            "{:>4}  {:<24} {:<8} {:>14} {:>9} {:>20}",
            c.market_cap_rank
                .map(|r| r.to_string())
                .unwrap_or_else(|| "—".to_string()),
            c.name,
            c.symbol.to_uppercase(),
            fmt_usd(c.current_price),
            fmt_pct(c.price_change_percentage_24h),
            fmt_usd(c.market_cap),
        );
    }
}

fn print_details(details: &CoinDetails) {
    println!("{} ({})", details.name, details.symbol.to_uppercase());
    if let Some(m) = &details.market_data {
        println!("  price       {}", fmt_usd(m.price_usd()));
        println!("  market cap  {}", fmt_usd(m.market_cap_usd()));
        println!("  24h         {}", fmt_pct(m.price_change_percentage_24h));
    }
}

fn chart_date(ts_ms: f64) -> String {
    OffsetDateTime::from_unix_timestamp((ts_ms / 1000.0) as i64)
        .map(|t| t.date().to_string())
        .unwrap_or_else(|_| "?".to_string())
}

fn run_coins(config: FetchConfig, args: CoinsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = fetcher(config)?;
    let rt = tokio::runtime::Runtime::new()?;
    let coins = rt.block_on(async {
        if args.all {
            fetcher.fetch_all_coins().await
        } else {
            fetcher.fetch_coins(Some(args.limit)).await
        }
    })?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&coins)?);
    } else {
        print_coin_table(&coins);
    }
    info!(requests = fetcher.request_count(), "coins complete");
    Ok(())
}

/// Details and price history requested side by side.
async fn coin_with_history<T: Transport>(
    fetcher: &Fetcher<T>,
    id: &str,
    days: u32,
) -> (
    Result<CoinDetails, FetchError>,
    Result<MarketChart, FetchError>,
) {
    tokio::join!(
        fetcher.get_coin_details(id),
        fetcher.get_coin_history(id, days)
    )
}

fn run_coin(config: FetchConfig, args: CoinArgs) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = fetcher(config)?;
    let rt = tokio::runtime::Runtime::new()?;
    let (details, history) = rt.block_on(coin_with_history(&fetcher, &args.id, args.days));
    let details = details?;
    let history = history?;
    if args.json {
        let out = serde_json::json!({ "details": details, "history": history });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    print_details(&details);
    println!("  last {} days", args.days);
    if let (Some(first), Some(last)) = (history.prices.first(), history.prices.last()) {
        println!("    from        {}", chart_date(first[0]));
        println!("    to          {}", chart_date(last[0]));
    }
    if let Some((lo, hi)) = history.price_range() {
        println!("    low         {}", fmt_usd(Some(lo)));
        println!("    high        {}", fmt_usd(Some(hi)));
    }
    println!("    change      {}", fmt_pct(history.change_pct()));
    Ok(())
}

fn run_search(config: FetchConfig, args: SearchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = fetcher(config)?;
    let rt = tokio::runtime::Runtime::new()?;
    if args.remote {
        match rt.block_on(fetcher.fetch_token_data(&args.query))? {
            Some(details) => print_details(&details),
            None => println!("no match for {:?}", args.query),
        }
        return Ok(());
    }
    if args.query.trim().is_empty() {
        return Ok(());
    }
    let coins = rt.block_on(fetcher.fetch_all_coins())?;
    let hits = search_coins(&args.query, &coins);
    info!(hits = hits.len(), "search");
    print_coin_table(hits);
    Ok(())
}

fn run_get(config: FetchConfig, args: GetArgs) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = fetcher(config)?;
    let params: QueryParams = args.params.into_iter().collect();
    let policy = RetryPolicy::new(args.attempts, Duration::from_millis(args.initial_delay_ms));
    let rt = tokio::runtime::Runtime::new()?;
    let body = rt.block_on(fetcher.fetch_uncached(&args.endpoint, &params, &policy))?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn run_watchlist(
    config: FetchConfig,
    args: WatchlistArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let account = Account::parse(&args.account)?;
    let store = WatchlistStore::open(store_path(&args.data_dir))?;
    match args.action {
        WatchlistAction::List => {
            for id in store.load(&account)? {
                println!("{}", id);
            }
        }
        WatchlistAction::Add { id } => {
            if store.add(&account, &id)? {
                println!("added {}", id);
            } else {
                println!("{} already watched", id);
            }
        }
        WatchlistAction::Remove { id } => {
            if store.remove(&account, &id)? {
                println!("removed {}", id);
            } else {
                println!("{} was not watched", id);
            }
        }
        WatchlistAction::Toggle { id } => {
            if store.toggle(&account, &id)? {
                println!("added {}", id);
            } else {
                println!("removed {}", id);
            }
        }
        WatchlistAction::Show => {
            let ids = store.load(&account)?;
            if ids.is_empty() {
                println!("watchlist for {} is empty", account);
                return Ok(());
            }
            let fetcher = fetcher(config)?;
            let rt = tokio::runtime::Runtime::new()?;
            let coins = rt.block_on(fetcher.fetch_all_coins())?;
            let rows = resolve(&ids, &coins);
            print_coin_table(rows.iter().filter_map(|(_, c)| *c));
            for (id, _) in rows.iter().filter(|(_, c)| c.is_none()) {
                println!("{:>4}  {:<24} (not in top {} by market cap)", "—", id, coins.len());
            }
        }
    }
    info!(account = %account, "watchlist complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use coinwatch::market::{HttpResponse, TransportError};
    use std::sync::Mutex;
    use url::Url;

    #[derive(Default)]
    struct Offline {
        paths: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for Offline {
        async fn get(&self, url: &Url) -> Result<HttpResponse, TransportError> {
            self.paths.lock().unwrap().push(url.path().to_string());
            Err(TransportError::Connection("offline".into()))
        }
    }

    #[tokio::test]
    async fn coin_command_requests_details_and_history() {
        let config = FetchConfig {
            base_url: "http://upstream.test".to_string(),
            min_interval_ms: 0,
            ..Default::default()
        };
        let cache = Arc::new(config.new_cache());
        let f = Fetcher::with_transport(config, Offline::default(), cache);
        let (details, history) = coin_with_history(&f, "bitcoin", 7).await;
        assert!(matches!(details, Err(FetchError::Network(_))));
        assert!(matches!(history, Err(FetchError::Network(_))));
        let mut paths = f.transport().paths.lock().unwrap().clone();
        paths.sort();
        assert_eq!(paths, vec!["/coins/bitcoin", "/coins/bitcoin/market_chart"]);
    }

    #[test]
    fn parse_param_splits_on_first_equals() {
        assert_eq!(
            parse_param("query=a=b").unwrap(),
            ("query".to_string(), "a=b".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn unset_flags_keep_library_defaults() {
        let cli = Cli::parse_from(["coinwatch", "coins"]);
        let config = cli.api.fetch_config();
        let defaults = FetchConfig::default();
        assert_eq!(config.base_url, defaults.base_url);
        assert_eq!(config.cache_ttl_secs, defaults.cache_ttl_secs);
        assert_eq!(config.rate_limit_retries, defaults.rate_limit_retries);
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "coinwatch",
            "coins",
            "--cache-ttl-secs",
            "60",
            "--rate-limit-retries",
            "0",
            "--base-url",
            "http://localhost:9000",
        ]);
        let config = cli.api.fetch_config();
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.rate_limit_retries, 0);
        assert_eq!(config.base_url, "http://localhost:9000");
    }

    #[test]
    fn formats() {
        assert_eq!(fmt_usd(Some(1234.5)), "$1234.50");
        assert_eq!(fmt_pct(Some(-0.871)), "-0.87%");
        assert_eq!(fmt_usd(None), "—");
        assert_eq!(chart_date(1_729_555_200_000.0), "2024-10-22");
    }
}
