//! Persistent store boundary. Every write is an upsert or a by-id update keyed
//! on a stable identifier, so overlapping job runs converge on last-write-wins.

pub mod memory;
pub mod pg;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database_ops::chzzk::client::{ScheduleEvent, VideoRecord};
use crate::database_ops::mapping::GameMapping;

pub use memory::MemoryStore;
pub use pg::PgStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct GameRow {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub title_ko: Option<String>,
    pub title_en: Option<String>,
    pub igdb_id: Option<i64>,
    pub steam_app_id: Option<i64>,
    pub cover_image: Option<String>,
    pub header_image: Option<String>,
    pub background_image: Option<String>,
    pub description: Option<String>,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub current_price: Option<i64>,
    pub original_price: Option<i64>,
    pub discount_rate: Option<i32>,
    pub currency: Option<String>,
    pub is_free: Option<bool>,
    pub popularity_rank: Option<i32>,
    pub total_viewers: Option<i64>,
    pub live_streams: Option<i32>,
    pub review_score: Option<i32>,
    pub review_score_desc: Option<String>,
    pub review_positive_ratio: Option<i32>,
    pub review_total: Option<i64>,
    pub critic_score: Option<i32>,
    pub tags: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Last review lookup, whether or not it wrote anything.
    pub reviews_checked_at: Option<DateTime<Utc>>,
    pub critic_checked_at: Option<DateTime<Utc>>,
}

impl GameRow {
    /// Search keyword for stream lookups: localized title first.
    pub fn search_keyword(&self) -> &str {
        self.title_ko
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.title)
    }

    pub fn has_pricing(&self) -> bool {
        self.current_price.is_some() || self.is_free.is_some()
    }
}

/// Popularity snapshot written by top-game discovery (conflict key: slug).
#[derive(Debug, Clone, PartialEq)]
pub struct GameSnapshot {
    pub slug: String,
    pub title: String,
    pub title_ko: Option<String>,
    pub title_en: Option<String>,
    pub popularity_rank: i32,
    pub total_viewers: i64,
    pub live_streams: i32,
    /// Category poster, only used when the game has no cover yet.
    pub poster_image: Option<String>,
}

/// Merge engine output. `None` leaves the stored column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameMetadataUpdate {
    pub igdb_id: Option<i64>,
    pub title_en: Option<String>,
    pub steam_app_id: Option<i64>,
    pub cover_image: Option<String>,
    pub header_image: Option<String>,
    pub background_image: Option<String>,
    pub description: Option<String>,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub current_price: Option<i64>,
    pub original_price: Option<i64>,
    pub discount_rate: Option<i32>,
    pub currency: Option<String>,
    pub is_free: Option<bool>,
}

impl GameMetadataUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewUpdate {
    pub review_score: i32,
    pub review_score_desc: Option<String>,
    pub review_positive_ratio: Option<i32>,
    pub review_total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameOrder {
    /// Rank ascending, unranked last.
    #[default]
    Popularity,
    /// Rows without a cover first, then by id.
    MissingImageFirst,
}

/// Rows needing an evaluation are always returned least recently checked
/// first, so rows that keep coming back empty cannot pin a capped batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameNeed {
    #[default]
    Any,
    /// Has a storefront id but no review fields.
    MissingReviews,
    /// No critic score yet.
    MissingCriticScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Reviews,
    Critic,
}

#[derive(Debug, Clone, Default)]
pub struct GameQuery {
    pub id: Option<i64>,
    pub steam_app_id: Option<i64>,
    pub need: GameNeed,
    pub order: GameOrder,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct StreamRow {
    pub id: i64,
    pub channel_id: String,
    pub channel_name: String,
    pub channel_image_url: Option<String>,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub viewer_count: i64,
    pub is_live: bool,
    pub category: Option<String>,
    pub game_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// One live observation of a channel. Writing it always sets `is_live`.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamUpsert {
    pub channel_id: String,
    pub channel_name: String,
    pub channel_image_url: Option<String>,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub viewer_count: i64,
    pub category: Option<String>,
    pub game_id: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn games(&self, query: &GameQuery) -> Result<Vec<GameRow>>;
    async fn find_game_by_slug(&self, slug: &str) -> Result<Option<GameRow>>;
    async fn upsert_game_snapshot(&self, snapshot: &GameSnapshot) -> Result<(GameRow, WriteOutcome)>;
    async fn update_game_metadata(&self, game_id: i64, update: &GameMetadataUpdate) -> Result<()>;
    async fn update_game_reviews(&self, game_id: i64, update: &ReviewUpdate) -> Result<()>;
    async fn update_game_critic_score(&self, game_id: i64, score: i32) -> Result<()>;
    async fn mark_evaluation_checked(&self, game_id: i64, kind: Evaluation) -> Result<()>;
    /// Full resync: upsert tags by slug, replace the join rows, store the ordered list.
    async fn replace_game_tags(&self, game_id: i64, tags: &[String]) -> Result<()>;

    async fn find_stream_by_channel(&self, channel_id: &str) -> Result<Option<StreamRow>>;
    /// Conflict key: channel id. A `None` game id keeps the stored link.
    async fn upsert_stream(&self, stream: &StreamUpsert) -> Result<WriteOutcome>;
    async fn insert_stream(&self, stream: &StreamUpsert) -> Result<()>;
    async fn update_stream(&self, stream_id: i64, stream: &StreamUpsert) -> Result<()>;
    /// Live rows outside `active` whose last sighting is before `cutoff` or unknown.
    async fn stale_live_streams(&self, active: &[String], cutoff: DateTime<Utc>) -> Result<Vec<StreamRow>>;
    async fn mark_streams_offline(&self, stream_ids: &[i64]) -> Result<u64>;
    async fn delete_streams(&self, stream_ids: &[i64]) -> Result<u64>;

    async fn load_game_mappings(&self) -> Result<Vec<GameMapping>>;

    async fn videos_by_category(&self, category_id: &str, size: usize, offset: usize) -> Result<Vec<VideoRecord>>;
    async fn upsert_videos(&self, videos: &[VideoRecord]) -> Result<u64>;

    async fn upsert_event(&self, event: &ScheduleEvent) -> Result<WriteOutcome>;

    async fn ping(&self) -> bool;
}
