use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

use super::{
    Evaluation, GameMetadataUpdate, GameNeed, GameOrder, GameQuery, GameRow, GameSnapshot, ReviewUpdate,
    Store, StreamRow, StreamUpsert, WriteOutcome,
};
use crate::database_ops::chzzk::client::{ScheduleEvent, VideoRecord};
use crate::database_ops::mapping::GameMapping;
use crate::normalization::slug::slugify;

#[derive(Debug, Default)]
struct State {
    next_game_id: i64,
    next_stream_id: i64,
    games: Vec<GameRow>,
    streams: Vec<StreamRow>,
    /// tag slug -> display name
    tags: BTreeMap<String, String>,
    game_tags: Vec<(i64, String)>,
    mappings: Vec<GameMapping>,
    videos: BTreeMap<i64, VideoRecord>,
    events: BTreeMap<i64, ScheduleEvent>,
}

/// In-process store with the same conflict-key semantics as the Postgres one.
/// Backs dry runs and the job tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn set<T>(slot: &mut Option<T>, value: &Option<T>)
where
    T: Clone,
{
    if let Some(v) = value {
        *slot = Some(v.clone());
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_mappings(&self, mappings: Vec<GameMapping>) {
        self.state.lock().await.mappings = mappings;
    }

    /// Insert a game row as-is, assigning an id when it has none.
    pub async fn seed_game(&self, mut game: GameRow) -> i64 {
        let mut state = self.state.lock().await;
        if game.id == 0 {
            state.next_game_id += 1;
            game.id = state.next_game_id;
        } else {
            state.next_game_id = state.next_game_id.max(game.id);
        }
        let id = game.id;
        state.games.push(game);
        id
    }

    pub async fn seed_stream(&self, mut stream: StreamRow) -> i64 {
        let mut state = self.state.lock().await;
        if stream.id == 0 {
            state.next_stream_id += 1;
            stream.id = state.next_stream_id;
        } else {
            state.next_stream_id = state.next_stream_id.max(stream.id);
        }
        let id = stream.id;
        state.streams.push(stream);
        id
    }

    pub async fn all_games(&self) -> Vec<GameRow> {
        self.state.lock().await.games.clone()
    }

    pub async fn all_streams(&self) -> Vec<StreamRow> {
        self.state.lock().await.streams.clone()
    }

    pub async fn all_events(&self) -> Vec<ScheduleEvent> {
        self.state.lock().await.events.values().cloned().collect()
    }

    pub async fn tag_slugs_for(&self, game_id: i64) -> Vec<String> {
        self.state
            .lock()
            .await
            .game_tags
            .iter()
            .filter(|(g, _)| *g == game_id)
            .map(|(_, slug)| slug.clone())
            .collect()
    }
}

fn stream_from(id: i64, s: &StreamUpsert) -> StreamRow {
    StreamRow {
        id,
        channel_id: s.channel_id.clone(),
        channel_name: s.channel_name.clone(),
        channel_image_url: s.channel_image_url.clone(),
        title: s.title.clone(),
        thumbnail_url: s.thumbnail_url.clone(),
        viewer_count: s.viewer_count,
        is_live: true,
        category: s.category.clone(),
        game_id: s.game_id,
        started_at: s.started_at,
        last_seen_at: Some(s.observed_at),
    }
}

fn apply_stream(row: &mut StreamRow, s: &StreamUpsert) {
    row.channel_name = s.channel_name.clone();
    set(&mut row.channel_image_url, &s.channel_image_url);
    row.title = s.title.clone();
    set(&mut row.thumbnail_url, &s.thumbnail_url);
    row.viewer_count = s.viewer_count;
    row.is_live = true;
    set(&mut row.category, &s.category);
    set(&mut row.game_id, &s.game_id);
    set(&mut row.started_at, &s.started_at);
    row.last_seen_at = Some(s.observed_at);
}

#[async_trait]
impl Store for MemoryStore {
    async fn games(&self, query: &GameQuery) -> Result<Vec<GameRow>> {
        let state = self.state.lock().await;
        let mut rows: Vec<GameRow> = state
            .games
            .iter()
            .filter(|g| query.id.map_or(true, |id| g.id == id))
            .filter(|g| query.steam_app_id.map_or(true, |s| g.steam_app_id == Some(s)))
            .filter(|g| match query.need {
                GameNeed::Any => true,
                GameNeed::MissingReviews => g.steam_app_id.is_some() && g.review_score.is_none(),
                GameNeed::MissingCriticScore => g.critic_score.is_none(),
            })
            .cloned()
            .collect();
        match query.order {
            GameOrder::Popularity => rows.sort_by_key(|g| (g.popularity_rank.is_none(), g.popularity_rank, g.id)),
            GameOrder::MissingImageFirst => rows.sort_by_key(|g| (g.cover_image.is_some(), g.id)),
        }
        match query.need {
            GameNeed::Any => {}
            GameNeed::MissingReviews => rows.sort_by_key(|g| (g.reviews_checked_at.is_some(), g.reviews_checked_at)),
            GameNeed::MissingCriticScore => rows.sort_by_key(|g| (g.critic_checked_at.is_some(), g.critic_checked_at)),
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn find_game_by_slug(&self, slug: &str) -> Result<Option<GameRow>> {
        let state = self.state.lock().await;
        Ok(state.games.iter().find(|g| g.slug == slug).cloned())
    }

    async fn upsert_game_snapshot(&self, snap: &GameSnapshot) -> Result<(GameRow, WriteOutcome)> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        if let Some(row) = state.games.iter_mut().find(|g| g.slug == snap.slug) {
            row.popularity_rank = Some(snap.popularity_rank);
            row.total_viewers = Some(snap.total_viewers);
            row.live_streams = Some(snap.live_streams);
            if row.title_ko.is_none() {
                row.title_ko = snap.title_ko.clone();
            }
            if row.title_en.is_none() {
                row.title_en = snap.title_en.clone();
            }
            if row.cover_image.is_none() {
                row.cover_image = snap.poster_image.clone();
            }
            row.updated_at = Some(now);
            return Ok((row.clone(), WriteOutcome::Updated));
        }
        state.next_game_id += 1;
        let row = GameRow {
            id: state.next_game_id,
            slug: snap.slug.clone(),
            title: snap.title.clone(),
            title_ko: snap.title_ko.clone(),
            title_en: snap.title_en.clone(),
            cover_image: snap.poster_image.clone(),
            popularity_rank: Some(snap.popularity_rank),
            total_viewers: Some(snap.total_viewers),
            live_streams: Some(snap.live_streams),
            updated_at: Some(now),
            ..Default::default()
        };
        state.games.push(row.clone());
        Ok((row, WriteOutcome::Inserted))
    }

    async fn update_game_metadata(&self, game_id: i64, u: &GameMetadataUpdate) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(row) = state.games.iter_mut().find(|g| g.id == game_id) else {
            bail!("game {game_id} not found");
        };
        set(&mut row.igdb_id, &u.igdb_id);
        set(&mut row.title_en, &u.title_en);
        set(&mut row.steam_app_id, &u.steam_app_id);
        set(&mut row.cover_image, &u.cover_image);
        set(&mut row.header_image, &u.header_image);
        set(&mut row.background_image, &u.background_image);
        set(&mut row.description, &u.description);
        set(&mut row.developer, &u.developer);
        set(&mut row.publisher, &u.publisher);
        set(&mut row.current_price, &u.current_price);
        set(&mut row.original_price, &u.original_price);
        set(&mut row.discount_rate, &u.discount_rate);
        set(&mut row.currency, &u.currency);
        set(&mut row.is_free, &u.is_free);
        row.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn update_game_reviews(&self, game_id: i64, u: &ReviewUpdate) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(row) = state.games.iter_mut().find(|g| g.id == game_id) else {
            bail!("game {game_id} not found");
        };
        row.review_score = Some(u.review_score);
        row.review_score_desc = u.review_score_desc.clone();
        row.review_positive_ratio = u.review_positive_ratio;
        row.review_total = Some(u.review_total);
        Ok(())
    }

    async fn update_game_critic_score(&self, game_id: i64, score: i32) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(row) = state.games.iter_mut().find(|g| g.id == game_id) else {
            bail!("game {game_id} not found");
        };
        row.critic_score = Some(score);
        Ok(())
    }

    async fn mark_evaluation_checked(&self, game_id: i64, kind: Evaluation) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(row) = state.games.iter_mut().find(|g| g.id == game_id) else {
            bail!("game {game_id} not found");
        };
        let now = Some(Utc::now());
        match kind {
            Evaluation::Reviews => row.reviews_checked_at = now,
            Evaluation::Critic => row.critic_checked_at = now,
        }
        Ok(())
    }

    async fn replace_game_tags(&self, game_id: i64, tags: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.games.iter().any(|g| g.id == game_id) {
            bail!("game {game_id} not found");
        }
        let mut slugs = Vec::new();
        for tag in tags {
            let slug = slugify(tag);
            if slug.is_empty() {
                continue;
            }
            state.tags.insert(slug.clone(), tag.clone());
            slugs.push(slug);
        }
        state.game_tags.retain(|(g, _)| *g != game_id);
        let mut seen = HashSet::new();
        for slug in slugs {
            if seen.insert(slug.clone()) {
                state.game_tags.push((game_id, slug));
            }
        }
        if let Some(row) = state.games.iter_mut().find(|g| g.id == game_id) {
            row.tags = tags.to_vec();
        }
        Ok(())
    }

    async fn find_stream_by_channel(&self, channel_id: &str) -> Result<Option<StreamRow>> {
        let state = self.state.lock().await;
        Ok(state.streams.iter().find(|s| s.channel_id == channel_id).cloned())
    }

    async fn upsert_stream(&self, s: &StreamUpsert) -> Result<WriteOutcome> {
        let mut state = self.state.lock().await;
        if let Some(row) = state.streams.iter_mut().find(|r| r.channel_id == s.channel_id) {
            apply_stream(row, s);
            return Ok(WriteOutcome::Updated);
        }
        state.next_stream_id += 1;
        let row = stream_from(state.next_stream_id, s);
        state.streams.push(row);
        Ok(WriteOutcome::Inserted)
    }

    async fn insert_stream(&self, s: &StreamUpsert) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.streams.iter().any(|r| r.channel_id == s.channel_id) {
            bail!("duplicate key value violates unique constraint on channel_id ({})", s.channel_id);
        }
        state.next_stream_id += 1;
        let row = stream_from(state.next_stream_id, s);
        state.streams.push(row);
        Ok(())
    }

    async fn update_stream(&self, stream_id: i64, s: &StreamUpsert) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(row) = state.streams.iter_mut().find(|r| r.id == stream_id) else {
            bail!("stream {stream_id} not found");
        };
        apply_stream(row, s);
        Ok(())
    }

    async fn stale_live_streams(&self, active: &[String], cutoff: DateTime<Utc>) -> Result<Vec<StreamRow>> {
        let state = self.state.lock().await;
        let active: HashSet<&str> = active.iter().map(String::as_str).collect();
        Ok(state
            .streams
            .iter()
            .filter(|s| s.is_live && !active.contains(s.channel_id.as_str()))
            .filter(|s| s.last_seen_at.map_or(true, |t| t < cutoff))
            .cloned()
            .collect())
    }

    async fn mark_streams_offline(&self, stream_ids: &[i64]) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut n = 0;
        for row in state.streams.iter_mut().filter(|s| stream_ids.contains(&s.id)) {
            row.is_live = false;
            row.viewer_count = 0;
            n += 1;
        }
        Ok(n)
    }

    async fn delete_streams(&self, stream_ids: &[i64]) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.streams.len();
        state.streams.retain(|s| !stream_ids.contains(&s.id));
        Ok((before - state.streams.len()) as u64)
    }

    async fn load_game_mappings(&self) -> Result<Vec<GameMapping>> {
        Ok(self.state.lock().await.mappings.clone())
    }

    async fn videos_by_category(&self, category_id: &str, size: usize, offset: usize) -> Result<Vec<VideoRecord>> {
        let state = self.state.lock().await;
        let mut rows: Vec<VideoRecord> = state
            .videos
            .values()
            .filter(|v| v.category_id.as_deref() == Some(category_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.published_at.cmp(&a.published_at).then(b.video_no.cmp(&a.video_no)));
        Ok(rows.into_iter().skip(offset).take(size).collect())
    }

    async fn upsert_videos(&self, videos: &[VideoRecord]) -> Result<u64> {
        let mut state = self.state.lock().await;
        for v in videos {
            state.videos.insert(v.video_no, v.clone());
        }
        Ok(videos.len() as u64)
    }

    async fn upsert_event(&self, event: &ScheduleEvent) -> Result<WriteOutcome> {
        let mut state = self.state.lock().await;
        let outcome = if state.events.contains_key(&event.seq) {
            WriteOutcome::Updated
        } else {
            WriteOutcome::Inserted
        };
        state.events.insert(event.seq, event.clone());
        Ok(outcome)
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn observation(channel: &str, viewers: i64, game_id: Option<i64>) -> StreamUpsert {
        StreamUpsert {
            channel_id: channel.to_string(),
            channel_name: channel.to_uppercase(),
            channel_image_url: None,
            title: "live".to_string(),
            thumbnail_url: None,
            viewer_count: viewers,
            category: Some("Apex Legends".to_string()),
            game_id,
            started_at: None,
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn stream_upsert_keys_on_channel_and_keeps_link() {
        let store = MemoryStore::new();
        assert_eq!(store.upsert_stream(&observation("a", 10, Some(7))).await.unwrap(), WriteOutcome::Inserted);
        assert_eq!(store.upsert_stream(&observation("a", 20, None)).await.unwrap(), WriteOutcome::Updated);
        let rows = store.all_streams().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].viewer_count, 20);
        assert_eq!(rows[0].game_id, Some(7));
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_channel() {
        let store = MemoryStore::new();
        store.insert_stream(&observation("a", 1, None)).await.unwrap();
        assert!(store.insert_stream(&observation("a", 2, None)).await.is_err());
    }

    #[tokio::test]
    async fn snapshot_upsert_preserves_curated_fields() {
        let store = MemoryStore::new();
        store
            .seed_game(GameRow {
                slug: "apex-legends".into(),
                title: "Apex Legends".into(),
                cover_image: Some("curated.jpg".into()),
                ..Default::default()
            })
            .await;
        let (row, outcome) = store
            .upsert_game_snapshot(&GameSnapshot {
                slug: "apex-legends".into(),
                title: "Apex Legends".into(),
                title_ko: None,
                title_en: Some("Apex Legends".into()),
                popularity_rank: 1,
                total_viewers: 700,
                live_streams: 2,
                poster_image: Some("poster.jpg".into()),
            })
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Updated);
        assert_eq!(row.cover_image.as_deref(), Some("curated.jpg"));
        assert_eq!(row.total_viewers, Some(700));
    }

    #[tokio::test]
    async fn tag_resync_replaces_join_rows() {
        let store = MemoryStore::new();
        let id = store.seed_game(GameRow { slug: "x".into(), title: "X".into(), ..Default::default() }).await;
        store.replace_game_tags(id, &["슈팅".into(), "액션".into()]).await.unwrap();
        store.replace_game_tags(id, &["RPG".into()]).await.unwrap();
        assert_eq!(store.tag_slugs_for(id).await, vec!["rpg".to_string()]);
        assert_eq!(store.all_games().await[0].tags, vec!["RPG".to_string()]);
    }

    #[tokio::test]
    async fn games_query_orders_missing_images_first() {
        let store = MemoryStore::new();
        store.seed_game(GameRow { slug: "a".into(), cover_image: Some("a.jpg".into()), ..Default::default() }).await;
        store.seed_game(GameRow { slug: "b".into(), ..Default::default() }).await;
        let rows = store
            .games(&GameQuery { order: GameOrder::MissingImageFirst, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(rows[0].slug, "b");

        let stale = store.stale_live_streams(&[], Utc::now() - Duration::minutes(30)).await.unwrap();
        assert!(stale.is_empty());
    }
}
