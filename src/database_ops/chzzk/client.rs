use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::database_ops::http::{RetryPolicy, SourceHttp};
use crate::database_ops::throttle::{RateLimitSettings, RequestThrottle};
use crate::util::env::{env_opt, env_parse};

pub const GAME_CATEGORY: &str = "GAME";
const DEFAULT_BASE_URL: &str = "https://api.chzzk.naver.com";
const SUCCESS_CODE: i64 = 200;
/// Size templates in thumbnail URLs are pinned to this resolution.
const THUMBNAIL_SIZE: &str = "720";
const IMAGE_SIZE_PLACEHOLDER: &str = "{type}";

#[derive(Debug, Clone)]
pub struct ChzzkConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub limits: RateLimitSettings,
    pub retry: RetryPolicy,
}

impl ChzzkConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_opt("CHZZK_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 12u64)),
            limits: RateLimitSettings::from_env("CHZZK", 300, 2),
            retry: RetryPolicy::from_env(),
        }
    }

    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(5),
            limits: RateLimitSettings::unthrottled(),
            retry: RetryPolicy::none(),
        }
    }
}

/// One live broadcast as seen by a search or category listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamCandidate {
    pub channel_id: String,
    pub channel_name: String,
    pub channel_image_url: Option<String>,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub viewer_count: i64,
    pub category_type: Option<String>,
    pub category_id: Option<String>,
    pub category_value: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
}

impl StreamCandidate {
    pub fn is_game(&self) -> bool {
        self.category_type.as_deref() == Some(GAME_CATEGORY)
    }

    /// Category label as displayed by the platform, falling back to the raw id.
    pub fn category_label(&self) -> Option<&str> {
        self.category_value
            .as_deref()
            .or(self.category_id.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    /// English-ish name hidden in the category id (`League_of_Legends`), if any.
    pub fn english_category_hint(&self) -> Option<String> {
        english_hint(self.category_id.as_deref()?)
    }
}

/// A currently popular live category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub category_id: String,
    pub category_value: String,
    pub category_type: Option<String>,
    pub poster_image_url: Option<String>,
    pub viewer_count: i64,
    pub open_live_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_no: i64,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub duration_secs: i64,
    pub view_count: i64,
    pub published_at: Option<DateTime<Utc>>,
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
    pub category_id: Option<String>,
    pub category_value: Option<String>,
}

/// Esports schedule entry keyed by the platform's sequence id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub seq: i64,
    pub title: String,
    pub league: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub channel_id: Option<String>,
    pub thumbnail_url: Option<String>,
}

// ---- wire shapes ---------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    content: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct DataPage<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChannel {
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    channel_name: Option<String>,
    #[serde(default)]
    channel_image_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLive {
    #[serde(default)]
    live_title: Option<String>,
    #[serde(default)]
    live_image_url: Option<String>,
    #[serde(default)]
    default_thumbnail_image_url: Option<String>,
    #[serde(default)]
    concurrent_user_count: Option<i64>,
    #[serde(default)]
    open_date: Option<String>,
    #[serde(default)]
    category_type: Option<String>,
    #[serde(default)]
    live_category: Option<String>,
    #[serde(default)]
    live_category_value: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    channel: Option<RawChannel>,
}

/// Search responses nest the broadcast under `live`; category listings put the
/// same fields at the top level.
#[derive(Debug, Deserialize)]
struct RawLiveEntry {
    #[serde(default)]
    live: Option<RawLive>,
    #[serde(default)]
    channel: Option<RawChannel>,
    #[serde(flatten)]
    top: RawLive,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCategory {
    #[serde(default)]
    category_type: Option<String>,
    #[serde(default)]
    category_id: Option<String>,
    #[serde(default)]
    category_value: Option<String>,
    #[serde(default)]
    poster_image_url: Option<String>,
    #[serde(default)]
    open_live_count: Option<i64>,
    #[serde(default)]
    concurrent_user_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVideo {
    #[serde(default)]
    video_no: Option<i64>,
    #[serde(default)]
    video_title: Option<String>,
    #[serde(default)]
    thumbnail_image_url: Option<String>,
    #[serde(default)]
    duration: Option<i64>,
    #[serde(default)]
    read_count: Option<i64>,
    #[serde(default)]
    publish_date: Option<String>,
    #[serde(default)]
    video_category: Option<String>,
    #[serde(default)]
    video_category_value: Option<String>,
    #[serde(default)]
    channel: Option<RawChannel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSchedule {
    #[serde(default, alias = "scheduleSeq")]
    seq: Option<i64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    league_name: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    thumbnail_image_url: Option<String>,
}

// ---- normalization -------------------------------------------------------

/// Replace the size template with a fixed resolution and force https.
pub fn pin_image_size(url: &str) -> String {
    let url = url.trim().replace(IMAGE_SIZE_PLACEHOLDER, THUMBNAIL_SIZE);
    match url.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => url,
    }
}

fn pinned(url: Option<String>) -> Option<String> {
    url.filter(|u| !u.trim().is_empty()).map(|u| pin_image_size(&u))
}

/// Platform timestamps come as "2024-05-01 18:00:00" (KST) or RFC 3339.
pub fn parse_platform_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok()?;
    let kst = chrono::FixedOffset::east_opt(9 * 3600)?;
    kst.from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn english_hint(category_id: &str) -> Option<String> {
    let hint = category_id.replace('_', " ");
    let hint = hint.trim();
    if hint.is_empty() || !hint.is_ascii() || !hint.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some(hint.to_string())
}

fn normalize_live(entry: RawLiveEntry, default_type: Option<&str>) -> Option<StreamCandidate> {
    let RawLiveEntry { live, channel, top } = entry;
    let live = live.unwrap_or(top);
    let channel = channel.or(live.channel).unwrap_or_default();
    let channel_id = channel
        .channel_id
        .or(live.channel_id)
        .filter(|id| !id.trim().is_empty())?;
    Some(StreamCandidate {
        channel_name: channel.channel_name.unwrap_or_default(),
        channel_image_url: pinned(channel.channel_image_url),
        title: live.live_title.unwrap_or_default(),
        thumbnail_url: pinned(live.live_image_url.or(live.default_thumbnail_image_url)),
        viewer_count: live.concurrent_user_count.unwrap_or(0).max(0),
        category_type: live
            .category_type
            .or_else(|| default_type.map(str::to_string)),
        category_id: live.live_category,
        category_value: live.live_category_value,
        opened_at: live.open_date.as_deref().and_then(parse_platform_time),
        channel_id,
    })
}

fn sort_by_viewers(streams: &mut [StreamCandidate]) {
    streams.sort_by(|a, b| b.viewer_count.cmp(&a.viewer_count));
}

/// Streaming-platform read adapter. Every public call degrades to "no data" on failure.
#[derive(Clone)]
pub struct ChzzkClient {
    base_url: String,
    http: SourceHttp,
}

impl ChzzkClient {
    pub fn new(cfg: ChzzkConfig) -> Result<Self> {
        let http = SourceHttp::new(
            "chzzk",
            cfg.timeout,
            RequestThrottle::new(cfg.limits),
            cfg.retry,
        )?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn fetch_page<T>(&self, path: &str, query: &[(&str, String)]) -> Vec<T>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let Some(body) = self.http.get_json(&url, query).await else {
            return Vec::new();
        };
        let envelope: Envelope<DataPage<Value>> = match serde_json::from_value(body) {
            Ok(e) => e,
            Err(err) => {
                warn!(%url, error = %err, "chzzk: unexpected response shape");
                return Vec::new();
            }
        };
        if envelope.code != Some(SUCCESS_CODE) {
            warn!(%url, code = ?envelope.code, message = ?envelope.message, "chzzk: non-success code");
            return Vec::new();
        }
        // Entries are decoded one by one so a single odd record does not void the page.
        envelope
            .content
            .map(|c| c.data)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| match serde_json::from_value::<T>(v) {
                Ok(item) => Some(item),
                Err(err) => {
                    debug!(%url, error = %err, "chzzk: skipping malformed entry");
                    None
                }
            })
            .collect()
    }

    /// Keyword search across live broadcasts, all category types, in platform order.
    pub async fn search_live_streams_raw(&self, keyword: &str, size: usize) -> Vec<StreamCandidate> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Vec::new();
        }
        let query = [
            ("keyword", keyword.to_string()),
            ("offset", "0".to_string()),
            ("size", size.max(1).to_string()),
        ];
        self.fetch_page::<RawLiveEntry>("/service/v1/search/lives", &query)
            .await
            .into_iter()
            .filter_map(|e| normalize_live(e, None))
            .collect()
    }

    /// Keyword search limited to GAME broadcasts, most viewers first.
    pub async fn search_live_streams(&self, keyword: &str, size: usize) -> Vec<StreamCandidate> {
        let mut streams: Vec<StreamCandidate> = self
            .search_live_streams_raw(keyword, size)
            .await
            .into_iter()
            .filter(StreamCandidate::is_game)
            .collect();
        sort_by_viewers(&mut streams);
        streams
    }

    /// Currently popular live categories ranked by viewers (every category type).
    pub async fn popular_categories(&self, size: usize) -> Vec<Category> {
        let query = [("size", size.max(1).to_string())];
        let mut categories: Vec<Category> = self
            .fetch_page::<RawCategory>("/service/v1/categories/live", &query)
            .await
            .into_iter()
            .filter_map(|raw| {
                let category_id = raw.category_id.filter(|s| !s.trim().is_empty())?;
                Some(Category {
                    category_value: raw
                        .category_value
                        .filter(|s| !s.trim().is_empty())
                        .unwrap_or_else(|| category_id.clone()),
                    category_id,
                    category_type: raw.category_type,
                    poster_image_url: pinned(raw.poster_image_url),
                    viewer_count: raw.concurrent_user_count.unwrap_or(0),
                    open_live_count: raw.open_live_count.unwrap_or(0),
                })
            })
            .collect();
        categories.sort_by(|a, b| b.viewer_count.cmp(&a.viewer_count));
        categories.truncate(size);
        categories
    }

    /// Exact category lookup. Preferred over keyword search when the id is known.
    pub async fn live_streams_by_category(&self, category_id: &str, size: usize) -> Vec<StreamCandidate> {
        let path = format!(
            "/service/v2/categories/{}/{}/lives",
            GAME_CATEGORY,
            urlencoding::encode(category_id)
        );
        let query = [("size", size.max(1).to_string())];
        let mut streams: Vec<StreamCandidate> = self
            .fetch_page::<RawLiveEntry>(&path, &query)
            .await
            .into_iter()
            .filter_map(|e| normalize_live(e, Some(GAME_CATEGORY)))
            .filter(StreamCandidate::is_game)
            .collect();
        sort_by_viewers(&mut streams);
        streams
    }

    /// Paginated VOD listing for a category.
    pub async fn videos_by_category(&self, category_id: &str, size: usize, offset: usize) -> Vec<VideoRecord> {
        let path = format!(
            "/service/v2/categories/{}/{}/videos",
            GAME_CATEGORY,
            urlencoding::encode(category_id)
        );
        let query = [
            ("size", size.max(1).to_string()),
            ("offset", offset.to_string()),
        ];
        self.fetch_page::<RawVideo>(&path, &query)
            .await
            .into_iter()
            .filter_map(|raw| {
                let video_no = raw.video_no?;
                let channel = raw.channel.unwrap_or_default();
                Some(VideoRecord {
                    video_no,
                    title: raw.video_title.unwrap_or_default(),
                    thumbnail_url: pinned(raw.thumbnail_image_url),
                    duration_secs: raw.duration.unwrap_or(0),
                    view_count: raw.read_count.unwrap_or(0),
                    published_at: raw.publish_date.as_deref().and_then(parse_platform_time),
                    channel_id: channel.channel_id,
                    channel_name: channel.channel_name,
                    category_id: raw.video_category.or_else(|| Some(category_id.to_string())),
                    category_value: raw.video_category_value,
                })
            })
            .collect()
    }

    /// Esports schedule between two dates (inclusive, `YYYY-MM-DD`).
    pub async fn esports_schedules(&self, from: &str, to: &str) -> Vec<ScheduleEvent> {
        let query = [("from", from.to_string()), ("to", to.to_string())];
        self.fetch_page::<RawSchedule>("/service/v1/esports/schedules", &query)
            .await
            .into_iter()
            .filter_map(|raw| {
                Some(ScheduleEvent {
                    seq: raw.seq?,
                    title: raw.title.unwrap_or_default(),
                    league: raw.league_name,
                    start_at: raw.start_date.as_deref().and_then(parse_platform_time),
                    end_at: raw.end_date.as_deref().and_then(parse_platform_time),
                    status: raw.status,
                    channel_id: raw.channel_id,
                    thumbnail_url: pinned(raw.thumbnail_image_url),
                })
            })
            .collect()
    }
}
