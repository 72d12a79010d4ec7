use serde::Deserialize;

/// Rows per page, as in the web table.
pub const ITEMS_PER_PAGE: usize = 50;

// ---------------------------------------------------------------------------
// API response types (mirror routes.rs shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AllResponse {
    pub last_update: Option<String>,
    #[allow(dead_code)]
    pub count: usize,
    pub cryptos: Vec<CryptoResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CryptoResponse {
    #[allow(dead_code)]
    pub id: i64,
    pub name: String,
    pub symbol: String,
    pub cmc_rank: i64,
    pub quote: QuoteBlock,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteBlock {
    #[serde(rename = "USD")]
    pub usd: QuoteResponse,
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct QuoteResponse {
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub volume_24h: f64,
    #[serde(default)]
    pub percent_change_24h: f64,
    #[serde(default)]
    pub market_cap: f64,
}

// ---------------------------------------------------------------------------
// Sorting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Rank,
    Price,
    Volume24h,
    MarketCap,
    PercentChange24h,
}

impl SortKey {
    pub fn label(self) -> &'static str {
        match self {
            SortKey::Rank => "rank",
            SortKey::Price => "price",
            SortKey::Volume24h => "volume 24h",
            SortKey::MarketCap => "market cap",
            SortKey::PercentChange24h => "24h %",
        }
    }

    fn value(self, c: &CryptoResponse) -> f64 {
        match self {
            SortKey::Rank => c.cmc_rank as f64,
            SortKey::Price => c.quote.usd.price,
            SortKey::Volume24h => c.quote.usd.volume_24h,
            SortKey::MarketCap => c.quote.usd.market_cap,
            SortKey::PercentChange24h => c.quote.usd.percent_change_24h,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortConfig {
    pub key: SortKey,
    pub direction: Direction,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            key: SortKey::Rank,
            direction: Direction::Asc,
        }
    }
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ConnectionStatus,
    pub cryptos: Vec<CryptoResponse>,
    pub last_update: Option<String>,
    pub sort: SortConfig,
    /// 1-based, clamped to `1..=total_pages()`.
    pub page: usize,
    pub base_url: String,
}

impl AppState {
    pub fn new(base_url: String) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            cryptos: Vec::new(),
            last_update: None,
            sort: SortConfig::default(),
            page: 1,
            base_url,
        }
    }

    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let url = format!("{}/cryptos/all", self.base_url);
        let resp = match client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                self.status = ConnectionStatus::Error(format!("{e}"));
                return;
            }
        };
        if !resp.status().is_success() {
            self.status = ConnectionStatus::Error(format!("HTTP {}", resp.status()));
            return;
        }
        match resp.json::<AllResponse>().await {
            Ok(all) => self.apply(all),
            Err(e) => self.status = ConnectionStatus::Error(format!("parse error: {e}")),
        }
    }

    pub fn apply(&mut self, all: AllResponse) {
        self.cryptos = all.cryptos;
        self.last_update = all.last_update;
        self.status = ConnectionStatus::Connected;
        self.page = self.page.clamp(1, self.total_pages());
    }

    /// Same column toggles direction; a new column starts ascending.
    pub fn handle_sort(&mut self, key: SortKey) {
        self.sort = if self.sort.key == key {
            let direction = match self.sort.direction {
                Direction::Asc => Direction::Desc,
                Direction::Desc => Direction::Asc,
            };
            SortConfig { key, direction }
        } else {
            SortConfig {
                key,
                direction: Direction::Asc,
            }
        };
    }

    pub fn sorted(&self) -> Vec<&CryptoResponse> {
        let mut rows: Vec<&CryptoResponse> = self.cryptos.iter().collect();
        let key = self.sort.key;
        rows.sort_by(|a, b| {
            let ord = key.value(a).total_cmp(&key.value(b));
            match self.sort.direction {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            }
        });
        rows
    }

    /// At least one page, so an empty table still shows "1/1".
    pub fn total_pages(&self) -> usize {
        self.cryptos.len().div_ceil(ITEMS_PER_PAGE).max(1)
    }

    pub fn change_page(&mut self, new_page: usize) {
        if (1..=self.total_pages()).contains(&new_page) {
            self.page = new_page;
        }
    }

    pub fn next_page(&mut self) {
        self.change_page(self.page + 1);
    }

    pub fn prev_page(&mut self) {
        self.change_page(self.page.saturating_sub(1));
    }

    pub fn current_page_data(&self) -> Vec<&CryptoResponse> {
        let start = (self.page - 1) * ITEMS_PER_PAGE;
        self.sorted().into_iter().skip(start).take(ITEMS_PER_PAGE).collect()
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

pub fn format_large_number(num: f64) -> String {
    if num <= 0.0 || !num.is_finite() {
        "—".to_string()
    } else if num >= 1e9 {
        format!("{:.2} B", num / 1e9)
    } else if num >= 1e6 {
        format!("{:.2} M", num / 1e6)
    } else {
        format!("{num:.2}")
    }
}

pub fn format_price(price: f64) -> String {
    if price >= 1.0 {
        format!("${price:.2}")
    } else {
        format!("${price:.6}")
    }
}

pub fn format_change(pct: f64) -> String {
    format!("{pct:+.2}%")
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}
