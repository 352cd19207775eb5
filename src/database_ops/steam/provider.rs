use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::database_ops::http::{RetryPolicy, SourceHttp};
use crate::database_ops::throttle::{RateLimitSettings, RequestThrottle};
use crate::normalization::fuzzy::{best_match, DEFAULT_MIN_CONFIDENCE};
use crate::util::env::{env_opt, env_parse};

const DEFAULT_BASE_URL: &str = "https://store.steampowered.com";
const CDN_BASE: &str = "https://cdn.cloudflare.steamstatic.com";
const SEARCH_RESULTS: usize = 10;

#[derive(Debug, Clone)]
pub struct SteamConfig {
    pub base_url: String,
    pub region: String,
    pub language: String,
    pub timeout: Duration,
    pub limits: RateLimitSettings,
    pub retry: RetryPolicy,
}

impl SteamConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_opt("STEAM_STORE_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            region: env_opt("STEAM_REGION").unwrap_or_else(|| "KR".to_string()),
            language: normalize_language(&env_opt("STEAM_LANGUAGE").unwrap_or_else(|| "korean".to_string())),
            timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 12u64)),
            limits: RateLimitSettings::from_env("STEAM", 1500, 1),
            retry: RetryPolicy::from_env(),
        }
    }

    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            region: "KR".to_string(),
            language: "korean".to_string(),
            timeout: Duration::from_secs(5),
            limits: RateLimitSettings::unthrottled(),
            retry: RetryPolicy::none(),
        }
    }
}

fn normalize_language(lang: &str) -> String {
    let s = lang.to_ascii_lowercase().replace([' ', '-'], "_");
    if s.is_empty() {
        "english".into()
    } else {
        s
    }
}

/// Price in major units. Storefront amounts arrive in hundredths for every
/// currency (KRW included) and are divided down on the way in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteamPrice {
    pub current: i64,
    pub original: i64,
    pub discount_rate: i32,
    pub currency: String,
}

impl SteamPrice {
    fn from_minor(final_minor: i64, initial_minor: Option<i64>, discount: Option<i64>, currency: Option<String>) -> Self {
        let current = final_minor / 100;
        let original = initial_minor.filter(|v| *v > 0).unwrap_or(final_minor) / 100;
        let discount_rate = match discount {
            Some(d) => d.clamp(0, 100) as i32,
            None if original > 0 && current < original => {
                (((original - current) as f64 / original as f64) * 100.0).round() as i32
            }
            None => 0,
        };
        Self {
            current,
            original,
            discount_rate,
            currency: currency.unwrap_or_else(|| "KRW".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDetails {
    pub app_id: i64,
    pub name: String,
    pub short_description: Option<String>,
    pub is_free: bool,
    pub price: Option<SteamPrice>,
    pub cover_image: Option<String>,
    pub header_image: Option<String>,
    pub background_image: Option<String>,
    pub genres: Vec<String>,
    pub developers: Vec<String>,
    pub publishers: Vec<String>,
    pub metacritic_score: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSearchResult {
    pub id: i64,
    pub name: String,
    pub price: Option<SteamPrice>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub review_score: i32,
    pub review_score_desc: Option<String>,
    pub total_positive: i64,
    pub total_negative: i64,
    pub total_reviews: i64,
}

impl ReviewSummary {
    /// Share of positive reviews, 0-100.
    pub fn positive_ratio(&self) -> Option<i32> {
        if self.total_reviews <= 0 {
            return None;
        }
        Some(((self.total_positive as f64 / self.total_reviews as f64) * 100.0).round() as i32)
    }
}

/// Outcome of name-based identity resolution. The search price doubles as the
/// merge fallback when the details call yields nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedApp {
    pub app_id: i64,
    pub confidence: f64,
    pub matched_name: String,
    pub search_price: Option<SteamPrice>,
}

// ---- wire shapes ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AppDetailsWrapper {
    #[serde(default)]
    success: bool,
    data: Option<AppData>,
}

#[derive(Debug, Deserialize)]
struct AppData {
    #[serde(default)]
    steam_appid: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    is_free: Option<bool>,
    #[serde(default)]
    short_description: Option<String>,
    #[serde(default)]
    header_image: Option<String>,
    #[serde(default)]
    background: Option<String>,
    #[serde(default)]
    background_raw: Option<String>,
    #[serde(default)]
    price_overview: Option<PriceOverview>,
    #[serde(default)]
    genres: Option<Vec<GenreEntry>>,
    #[serde(default)]
    developers: Option<Vec<String>>,
    #[serde(default)]
    publishers: Option<Vec<String>>,
    #[serde(default)]
    metacritic: Option<Metacritic>,
}

#[derive(Debug, Deserialize)]
struct PriceOverview {
    #[serde(default)]
    currency: Option<String>,
    #[serde(rename = "initial", default)]
    initial_price: Option<i64>,
    #[serde(rename = "final", default)]
    final_price: Option<i64>,
    #[serde(default)]
    discount_percent: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct GenreEntry {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Metacritic {
    score: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SearchResp {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: Option<i64>,
    name: Option<String>,
    #[serde(default)]
    price: Option<SearchPrice>,
}

#[derive(Debug, Deserialize)]
struct SearchPrice {
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    initial: Option<i64>,
    #[serde(rename = "final", default)]
    final_price: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ReviewsResp {
    #[serde(default)]
    success: Option<i64>,
    query_summary: Option<QuerySummary>,
}

#[derive(Debug, Deserialize)]
struct QuerySummary {
    #[serde(default)]
    review_score: Option<i32>,
    #[serde(default)]
    review_score_desc: Option<String>,
    #[serde(default)]
    total_positive: Option<i64>,
    #[serde(default)]
    total_negative: Option<i64>,
    #[serde(default)]
    total_reviews: Option<i64>,
}

// ---- helpers -------------------------------------------------------------

/// Normalize possibly-relative storefront URLs to fully-qualified ones.
pub fn normalize_steam_url(u: &str) -> String {
    let s = u.trim();
    if s.is_empty() {
        return String::new();
    }
    if s.starts_with("//") {
        return format!("https:{}", s);
    }
    if s.starts_with("/steam/apps/") {
        return format!("{CDN_BASE}{s}");
    }
    if s.starts_with('/') {
        return format!("{DEFAULT_BASE_URL}{s}");
    }
    s.to_string()
}

fn non_empty_url(u: Option<String>) -> Option<String> {
    u.map(|u| normalize_steam_url(&u)).filter(|u| !u.is_empty())
}

/// Portrait capsule served by the CDN for every app id.
pub fn library_cover_url(app_id: i64) -> String {
    format!("{CDN_BASE}/steam/apps/{app_id}/library_600x900.jpg")
}

fn store_app_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"store\.steampowered\.com/app/(\d+)").ok())
        .as_ref()
}

/// App id embedded in a storefront product URL.
pub fn app_id_from_store_url(url: &str) -> Option<i64> {
    store_app_regex()?
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn strip_html_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    let mut prev_space = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => {
                if c.is_whitespace() {
                    if !prev_space {
                        out.push(' ');
                        prev_space = true;
                    }
                } else {
                    out.push(c);
                    prev_space = false;
                }
            }
            _ => {}
        }
    }
    out.trim().to_string()
}

fn parse_details(app_id: i64, body: &Value) -> Option<ProductDetails> {
    let entry = body.get(app_id.to_string())?;
    let wrapper: AppDetailsWrapper = match serde_json::from_value(entry.clone()) {
        Ok(w) => w,
        Err(err) => {
            warn!(app_id, error = %err, "steam: unexpected appdetails shape");
            return None;
        }
    };
    if !wrapper.success {
        return None;
    }
    let data = wrapper.data?;
    let price = data.price_overview.and_then(|p| {
        let final_minor = p.final_price?;
        Some(SteamPrice::from_minor(
            final_minor,
            p.initial_price,
            p.discount_percent,
            p.currency,
        ))
    });
    let id = data.steam_appid.unwrap_or(app_id);
    Some(ProductDetails {
        app_id: id,
        name: data.name.unwrap_or_default(),
        short_description: data
            .short_description
            .map(|d| strip_html_tags(&d))
            .filter(|d| !d.is_empty()),
        is_free: data.is_free.unwrap_or(false),
        price,
        cover_image: Some(library_cover_url(id)),
        header_image: non_empty_url(data.header_image),
        background_image: non_empty_url(data.background_raw.or(data.background)),
        genres: data
            .genres
            .unwrap_or_default()
            .into_iter()
            .filter_map(|g| g.description)
            .filter(|g| !g.trim().is_empty())
            .collect(),
        developers: data.developers.unwrap_or_default(),
        publishers: data.publishers.unwrap_or_default(),
        metacritic_score: data.metacritic.and_then(|m| m.score).map(|s| s as i32),
    })
}

/// Storefront read adapter: product details, name search and review summary.
#[derive(Clone)]
pub struct SteamProvider {
    base_url: String,
    region: String,
    language: String,
    http: SourceHttp,
}

impl SteamProvider {
    pub fn new(cfg: SteamConfig) -> Result<Self> {
        let http = SourceHttp::new(
            "steam",
            cfg.timeout,
            RequestThrottle::new(cfg.limits),
            cfg.retry,
        )?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            region: cfg.region,
            language: cfg.language,
            http,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Details for one app in the given region. `None` when unknown or on failure.
    pub async fn product_details(&self, app_id: i64, region: &str) -> Option<ProductDetails> {
        let url = format!("{}/api/appdetails", self.base_url);
        let query = [
            ("appids", app_id.to_string()),
            ("cc", region.to_string()),
            ("l", self.language.clone()),
        ];
        let body = self.http.get_json(&url, &query).await?;
        parse_details(app_id, &body)
    }

    /// Free-text search returning candidate id/name/price tuples.
    pub async fn search_by_name(&self, name: &str, max_results: usize) -> Vec<ProductSearchResult> {
        let name = name.trim();
        if name.is_empty() {
            return Vec::new();
        }
        let url = format!("{}/api/storesearch/", self.base_url);
        let query = [
            ("term", name.to_string()),
            ("l", self.language.clone()),
            ("cc", self.region.clone()),
        ];
        let Some(body) = self.http.get_json(&url, &query).await else {
            return Vec::new();
        };
        let resp: SearchResp = match serde_json::from_value(body) {
            Ok(r) => r,
            Err(err) => {
                warn!(term = name, error = %err, "steam: unexpected storesearch shape");
                return Vec::new();
            }
        };
        resp.items
            .into_iter()
            .filter_map(|item| {
                let id = item.id?;
                let name = item.name.filter(|n| !n.trim().is_empty())?;
                let price = item.price.and_then(|p| {
                    let final_minor = p.final_price?;
                    Some(SteamPrice::from_minor(final_minor, p.initial, None, p.currency))
                });
                Some(ProductSearchResult { id, name, price })
            })
            .take(max_results)
            .collect()
    }

    /// Aggregate user review summary (all languages, all purchase types).
    pub async fn review_summary(&self, app_id: i64) -> Option<ReviewSummary> {
        let url = format!("{}/appreviews/{}", self.base_url, app_id);
        let query = [
            ("json", "1".to_string()),
            ("language", "all".to_string()),
            ("purchase_type", "all".to_string()),
            ("num_per_page", "0".to_string()),
        ];
        let body = self.http.get_json(&url, &query).await?;
        let resp: ReviewsResp = serde_json::from_value(body).ok()?;
        if resp.success != Some(1) {
            return None;
        }
        let q = resp.query_summary?;
        let total_positive = q.total_positive.unwrap_or(0);
        let total_negative = q.total_negative.unwrap_or(0);
        Some(ReviewSummary {
            review_score: q.review_score.unwrap_or(0),
            review_score_desc: q.review_score_desc.filter(|d| !d.trim().is_empty()),
            total_positive,
            total_negative,
            total_reviews: q.total_reviews.unwrap_or(total_positive + total_negative),
        })
    }

    /// Try each name variant in order; the first confident match wins.
    pub async fn resolve_by_names(&self, names: &[String]) -> Option<ResolvedApp> {
        let mut tried: Vec<String> = Vec::new();
        for name in names {
            let key = name.trim().to_lowercase();
            if key.is_empty() || tried.contains(&key) {
                continue;
            }
            tried.push(key);
            let results = self.search_by_name(name, SEARCH_RESULTS).await;
            let candidates = results.iter().map(|r| (r.id, r.name.as_str()));
            if let Some(m) = best_match(name, candidates, DEFAULT_MIN_CONFIDENCE) {
                info!(query = %name, app_id = m.matched_id, confidence = m.confidence, matched = %m.matched_name, "steam: resolved by name");
                let search_price = results
                    .iter()
                    .find(|r| r.id == m.matched_id)
                    .and_then(|r| r.price.clone());
                return Some(ResolvedApp {
                    app_id: m.matched_id,
                    confidence: m.confidence,
                    matched_name: m.matched_name,
                    search_price,
                });
            }
            debug!(query = %name, candidates = results.len(), "steam: no confident match");
        }
        None
    }
}
