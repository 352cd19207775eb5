use anyhow::{anyhow, bail, Context, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::database_ops::http::{RetryPolicy, SourceHttp};
use crate::database_ops::steam::provider::app_id_from_store_url;
use crate::database_ops::throttle::{RateLimitSettings, RequestThrottle};
use crate::normalization::slug::slugify;
use crate::util::env::{env_opt, env_parse};

const TWITCH_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";
const IGDB_BASE_URL: &str = "https://api.igdb.com/v4";
const IGDB_IMAGE_BASE: &str = "https://images.igdb.com/igdb/image/upload";
const COVER_SIZE: &str = "t_cover_big_2x";
const WIDE_SIZE: &str = "t_1080p";
/// `external_games.category` value for the Steam storefront.
const EXTERNAL_STEAM: i64 = 1;
const TOKEN_SKEW: Duration = Duration::from_secs(30);
const STEP_LIMIT: usize = 5;

const GAME_FIELDS: &str = "fields id,name,slug,summary,category,total_rating_count,aggregated_rating,\
cover.image_id,artworks.image_id,screenshots.image_id,genres.name,themes.name,\
involved_companies.developer,involved_companies.publisher,involved_companies.company.name,\
external_games.category,external_games.uid,websites.url;";

#[derive(Debug, Clone)]
pub struct IgdbConfig {
    pub base_url: String,
    pub token_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub timeout: Duration,
    pub limits: RateLimitSettings,
    pub retry: RetryPolicy,
}

impl IgdbConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_opt("IGDB_BASE_URL").unwrap_or_else(|| IGDB_BASE_URL.to_string()),
            token_url: env_opt("IGDB_TOKEN_URL").unwrap_or_else(|| TWITCH_TOKEN_URL.to_string()),
            client_id: env_opt("TWITCH_CLIENT_ID"),
            client_secret: env_opt("TWITCH_CLIENT_SECRET"),
            timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 12u64)),
            limits: RateLimitSettings::from_env("IGDB", 250, 2),
            retry: RetryPolicy::from_env(),
        }
    }

    pub fn for_base_url(base_url: impl Into<String>, token_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token_url: token_url.into(),
            client_id: Some("test-client".to_string()),
            client_secret: Some("test-secret".to_string()),
            timeout: Duration::from_secs(5),
            limits: RateLimitSettings::unthrottled(),
            retry: RetryPolicy::none(),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct TwitchTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Client-credentials access token with expiry tracking.
#[derive(Debug, Default)]
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached token if it stays valid for at least the skew window.
    pub async fn current(&self) -> Option<String> {
        let guard = self.slot.lock().await;
        guard
            .as_ref()
            .filter(|t| t.expires_at > Instant::now() + TOKEN_SKEW)
            .map(|t| t.access_token.clone())
    }

    pub async fn store(&self, access_token: String, expires_in: Duration) {
        let mut guard = self.slot.lock().await;
        *guard = Some(CachedToken {
            access_token,
            expires_at: Instant::now() + expires_in,
        });
    }

    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

// ---- wire shapes ---------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct IgdbImage {
    #[serde(default)]
    image_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct IgdbNamed {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct IgdbInvolvedCompany {
    #[serde(default)]
    developer: bool,
    #[serde(default)]
    publisher: bool,
    #[serde(default)]
    company: Option<IgdbNamed>,
}

#[derive(Debug, Clone, Deserialize)]
struct IgdbExternalGame {
    #[serde(default)]
    category: Option<i64>,
    #[serde(default)]
    uid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct IgdbWebsite {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct IgdbGame {
    id: i64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    total_rating_count: Option<i64>,
    #[serde(default)]
    aggregated_rating: Option<f64>,
    #[serde(default)]
    cover: Option<IgdbImage>,
    #[serde(default)]
    artworks: Vec<IgdbImage>,
    #[serde(default)]
    screenshots: Vec<IgdbImage>,
    #[serde(default)]
    genres: Vec<IgdbNamed>,
    #[serde(default)]
    themes: Vec<IgdbNamed>,
    #[serde(default)]
    involved_companies: Vec<IgdbInvolvedCompany>,
    #[serde(default)]
    external_games: Vec<IgdbExternalGame>,
    #[serde(default)]
    websites: Vec<IgdbWebsite>,
}

/// Normalized catalog entry consumed by the merge engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogResult {
    pub id: i64,
    pub name: String,
    pub slug: Option<String>,
    pub summary: Option<String>,
    pub cover_url: Option<String>,
    pub header_url: Option<String>,
    pub background_url: Option<String>,
    pub genres: Vec<String>,
    pub themes: Vec<String>,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    /// Storefront cross-reference from external links, if the catalog has one.
    pub steam_app_id: Option<i64>,
    pub aggregated_rating: Option<f64>,
    pub total_rating_count: i64,
}

fn image_url(image: &IgdbImage, size: &str) -> Option<String> {
    let id = image.image_id.as_deref().filter(|s| !s.is_empty())?;
    Some(format!("{IGDB_IMAGE_BASE}/{size}/{id}.jpg"))
}

fn names(list: Vec<IgdbNamed>) -> Vec<String> {
    list.into_iter()
        .filter_map(|n| n.name)
        .filter(|n| !n.trim().is_empty())
        .collect()
}

fn company(list: &[IgdbInvolvedCompany], pick: fn(&IgdbInvolvedCompany) -> bool) -> Option<String> {
    list.iter()
        .filter(|c| pick(c))
        .find_map(|c| c.company.as_ref().and_then(|n| n.name.clone()))
}

fn steam_xref(game: &IgdbGame) -> Option<i64> {
    game.external_games
        .iter()
        .filter(|e| e.category == Some(EXTERNAL_STEAM))
        .find_map(|e| e.uid.as_deref().and_then(|uid| uid.trim().parse().ok()))
        .or_else(|| {
            game.websites
                .iter()
                .find_map(|w| w.url.as_deref().and_then(app_id_from_store_url))
        })
}

impl From<IgdbGame> for CatalogResult {
    fn from(game: IgdbGame) -> Self {
        let steam_app_id = steam_xref(&game);
        Self {
            id: game.id,
            name: game.name.clone().unwrap_or_default(),
            slug: game.slug.clone(),
            summary: game.summary.clone().filter(|s| !s.trim().is_empty()),
            cover_url: game.cover.as_ref().and_then(|c| image_url(c, COVER_SIZE)),
            header_url: game.artworks.iter().find_map(|a| image_url(a, WIDE_SIZE)),
            background_url: game.screenshots.iter().find_map(|s| image_url(s, WIDE_SIZE)),
            developer: company(&game.involved_companies, |c| c.developer),
            publisher: company(&game.involved_companies, |c| c.publisher),
            steam_app_id,
            aggregated_rating: game.aggregated_rating,
            total_rating_count: game.total_rating_count.unwrap_or(0),
            genres: names(game.genres),
            themes: names(game.themes),
        }
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.trim().replace('\\', "\\\\").replace('"', "\\\""))
}

/// Primary releases only, most-rated first.
fn filtered_query(condition: &str) -> String {
    format!("{GAME_FIELDS} where ({condition}) & category = 0; sort total_rating_count desc; limit {STEP_LIMIT};")
}

fn search_query(term: &str) -> String {
    format!("{GAME_FIELDS} search {}; where category = 0; limit {STEP_LIMIT};", quote(term))
}

/// Catalog read adapter (IGDB over the Twitch client-credentials flow).
pub struct IgdbService {
    base_url: String,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    http: SourceHttp,
    token: TokenCache,
}

impl IgdbService {
    pub fn new(cfg: IgdbConfig) -> Result<Self> {
        let http = SourceHttp::new(
            "igdb",
            cfg.timeout,
            RequestThrottle::new(cfg.limits),
            cfg.retry,
        )?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token_url: cfg.token_url,
            client_id: cfg.client_id,
            client_secret: cfg.client_secret,
            http,
            token: TokenCache::new(),
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }

    async fn ensure_token(&self) -> Result<String> {
        if let Some(token) = self.token.current().await {
            return Ok(token);
        }
        let client_id = self
            .client_id
            .as_deref()
            .context("missing env: TWITCH_CLIENT_ID (required for IGDB)")?;
        let client_secret = self
            .client_secret
            .as_deref()
            .context("missing env: TWITCH_CLIENT_SECRET (required for IGDB)")?;
        let response = self
            .http
            .client()
            .post(&self.token_url)
            .query(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .context("requesting Twitch OAuth token")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("twitch token request failed (status={}): {}", status, text));
        }
        let token: TwitchTokenResponse = response.json().await?;
        debug!(expires_in = token.expires_in, "igdb: fetched access token");
        self.token
            .store(token.access_token.clone(), Duration::from_secs(token.expires_in))
            .await;
        Ok(token.access_token)
    }

    async fn execute_request<T>(&self, endpoint: &str, body: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let client_id = self.client_id.as_deref().unwrap_or_default();
        let url = format!("{}/{}", self.base_url, endpoint);
        for attempt in 0..2 {
            let token = self.ensure_token().await?;
            let resp = self
                .http
                .send(|c| {
                    c.post(&url)
                        .header("Client-ID", client_id)
                        .header("Content-Type", "text/plain")
                        .header("Authorization", format!("Bearer {}", token))
                        .body(body.to_string())
                })
                .await?;
            let status = resp.status();
            if status == StatusCode::UNAUTHORIZED && attempt == 0 {
                self.token.invalidate().await;
                continue;
            }
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                bail!("igdb request failed (status={}): {}", status, text);
            }
            let text = resp.text().await?;
            return serde_json::from_str(&text)
                .map_err(|err| anyhow!("failed to parse IGDB payload ({err}): {text}"));
        }
        bail!("igdb rejected a freshly issued token")
    }

    async fn first_with_cover(&self, step: &str, body: String) -> Result<Option<CatalogResult>> {
        let mut games: Vec<IgdbGame> = self.execute_request("games", &body).await?;
        // `search` cannot be combined with `sort`, so rank locally as well.
        games.sort_by(|a, b| b.total_rating_count.unwrap_or(0).cmp(&a.total_rating_count.unwrap_or(0)));
        let hit = games
            .into_iter()
            .map(CatalogResult::from)
            .find(|g| g.cover_url.is_some());
        if let Some(g) = &hit {
            info!(step, igdb_id = g.id, name = %g.name, "igdb: matched");
        }
        Ok(hit)
    }

    /// Look a game up by its localized and English names.
    ///
    /// Steps, first hit with a cover wins: exact alternative name in the
    /// localized form, exact primary or alternative English name, exact slug,
    /// then free-text search. Each step is spaced by the source throttle.
    pub async fn search_game(&self, localized: Option<&str>, english: Option<&str>) -> Option<CatalogResult> {
        let localized = localized.map(str::trim).filter(|s| !s.is_empty());
        let english = english.map(str::trim).filter(|s| !s.is_empty());
        let primary = english.or(localized)?;

        let mut steps: Vec<(&str, String)> = Vec::new();
        if let Some(loc) = localized {
            steps.push(("alt-name", filtered_query(&format!("alternative_names.name = {}", quote(loc)))));
        }
        if let Some(en) = english {
            steps.push((
                "name",
                filtered_query(&format!("name = {q} | alternative_names.name = {q}", q = quote(en))),
            ));
        }
        let slug = slugify(primary);
        if !slug.is_empty() {
            steps.push(("slug", filtered_query(&format!("slug = {}", quote(&slug)))));
        }
        steps.push(("search", search_query(primary)));

        for (step, body) in steps {
            match self.first_with_cover(step, body).await {
                Ok(Some(hit)) => return Some(hit),
                Ok(None) => debug!(step, query = primary, "igdb: no usable result"),
                Err(err) => {
                    warn!(step, query = primary, error = %err, "igdb: lookup failed");
                    return None;
                }
            }
        }
        None
    }
}
