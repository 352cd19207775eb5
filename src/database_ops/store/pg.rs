use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Postgres};

use super::{
    Evaluation, GameMetadataUpdate, GameNeed, GameOrder, GameQuery, GameRow, GameSnapshot, ReviewUpdate,
    Store, StreamRow, StreamUpsert, WriteOutcome,
};
use crate::database_ops::chzzk::client::{ScheduleEvent, VideoRecord};
use crate::database_ops::mapping::GameMapping;
use crate::normalization::slug::slugify;
use crate::util::db::Db;

const GAME_COLUMNS: &str = "id, slug, title, title_ko, title_en, igdb_id, steam_app_id, \
     cover_image, header_image, background_image, description, developer, publisher, \
     current_price, original_price, discount_rate, currency, is_free, \
     popularity_rank, total_viewers, live_streams, \
     review_score, review_score_desc, review_positive_ratio, review_total, critic_score, \
     tags, updated_at, reviews_checked_at, critic_checked_at";

const STREAM_COLUMNS: &str = "id, channel_id, channel_name, channel_image_url, title, thumbnail_url, \
     viewer_count, is_live, category, game_id, started_at, last_seen_at";

#[derive(Debug, FromRow)]
struct GameUpsertRow {
    #[sqlx(flatten)]
    game: GameRow,
    inserted: bool,
}

#[derive(Debug, FromRow)]
struct VideoRow {
    video_no: i64,
    title: String,
    thumbnail_url: Option<String>,
    duration_secs: i64,
    view_count: i64,
    published_at: Option<DateTime<Utc>>,
    channel_id: Option<String>,
    channel_name: Option<String>,
    category_id: Option<String>,
    category_value: Option<String>,
}

impl From<VideoRow> for VideoRecord {
    fn from(r: VideoRow) -> Self {
        Self {
            video_no: r.video_no,
            title: r.title,
            thumbnail_url: r.thumbnail_url,
            duration_secs: r.duration_secs,
            view_count: r.view_count,
            published_at: r.published_at,
            channel_id: r.channel_id,
            channel_name: r.channel_name,
            category_id: r.category_id,
            category_value: r.category_value,
        }
    }
}

fn outcome(inserted: bool) -> WriteOutcome {
    if inserted {
        WriteOutcome::Inserted
    } else {
        WriteOutcome::Updated
    }
}

/// Postgres-backed store. Jobs must be handed the service-level `Db`.
#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn games(&self, query: &GameQuery) -> Result<Vec<GameRow>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {GAME_COLUMNS} FROM public.games WHERE true"));
        if let Some(id) = query.id {
            qb.push(" AND id = ").push_bind(id);
        }
        if let Some(steam) = query.steam_app_id {
            qb.push(" AND steam_app_id = ").push_bind(steam);
        }
        match query.need {
            GameNeed::Any => {}
            GameNeed::MissingReviews => {
                qb.push(" AND steam_app_id IS NOT NULL AND review_score IS NULL");
            }
            GameNeed::MissingCriticScore => {
                qb.push(" AND critic_score IS NULL");
            }
        }
        qb.push(" ORDER BY ");
        match query.need {
            GameNeed::Any => {}
            GameNeed::MissingReviews => {
                qb.push("reviews_checked_at ASC NULLS FIRST, ");
            }
            GameNeed::MissingCriticScore => {
                qb.push("critic_checked_at ASC NULLS FIRST, ");
            }
        }
        match query.order {
            GameOrder::Popularity => qb.push("popularity_rank ASC NULLS LAST, id ASC"),
            GameOrder::MissingImageFirst => qb.push("(cover_image IS NOT NULL) ASC, id ASC"),
        };
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
        qb.build_query_as::<GameRow>()
            .fetch_all(&self.db.pool)
            .await
            .context("select games")
    }

    async fn find_game_by_slug(&self, slug: &str) -> Result<Option<GameRow>> {
        let q = format!("SELECT {GAME_COLUMNS} FROM public.games WHERE slug = $1");
        sqlx::query_as::<_, GameRow>(&q)
            .bind(slug)
            .fetch_optional(&self.db.pool)
            .await
            .context("select game by slug")
    }

    async fn upsert_game_snapshot(&self, s: &GameSnapshot) -> Result<(GameRow, WriteOutcome)> {
        let q = format!(
            "INSERT INTO public.games (slug, title, title_ko, title_en, cover_image, popularity_rank, total_viewers, live_streams, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now()) \
             ON CONFLICT (slug) DO UPDATE \
               SET popularity_rank = EXCLUDED.popularity_rank, \
                   total_viewers = EXCLUDED.total_viewers, \
                   live_streams = EXCLUDED.live_streams, \
                   title_ko = COALESCE(games.title_ko, EXCLUDED.title_ko), \
                   title_en = COALESCE(games.title_en, EXCLUDED.title_en), \
                   cover_image = COALESCE(games.cover_image, EXCLUDED.cover_image), \
                   updated_at = now() \
             RETURNING {GAME_COLUMNS}, (xmax = 0) AS inserted"
        );
        let row = sqlx::query_as::<_, GameUpsertRow>(&q)
            .bind(&s.slug)
            .bind(&s.title)
            .bind(&s.title_ko)
            .bind(&s.title_en)
            .bind(&s.poster_image)
            .bind(s.popularity_rank)
            .bind(s.total_viewers)
            .bind(s.live_streams)
            .fetch_one(&self.db.pool)
            .await
            .with_context(|| format!("upsert game snapshot {}", s.slug))?;
        Ok((row.game, outcome(row.inserted)))
    }

    async fn update_game_metadata(&self, game_id: i64, u: &GameMetadataUpdate) -> Result<()> {
        sqlx::query(
            "UPDATE public.games SET \
               igdb_id = COALESCE($2, igdb_id), \
               title_en = COALESCE($3, title_en), \
               steam_app_id = COALESCE($4, steam_app_id), \
               cover_image = COALESCE($5, cover_image), \
               header_image = COALESCE($6, header_image), \
               background_image = COALESCE($7, background_image), \
               description = COALESCE($8, description), \
               developer = COALESCE($9, developer), \
               publisher = COALESCE($10, publisher), \
               current_price = COALESCE($11, current_price), \
               original_price = COALESCE($12, original_price), \
               discount_rate = COALESCE($13, discount_rate), \
               currency = COALESCE($14, currency), \
               is_free = COALESCE($15, is_free), \
               updated_at = now() \
             WHERE id = $1",
        )
        .bind(game_id)
        .bind(u.igdb_id)
        .bind(&u.title_en)
        .bind(u.steam_app_id)
        .bind(&u.cover_image)
        .bind(&u.header_image)
        .bind(&u.background_image)
        .bind(&u.description)
        .bind(&u.developer)
        .bind(&u.publisher)
        .bind(u.current_price)
        .bind(u.original_price)
        .bind(u.discount_rate)
        .bind(&u.currency)
        .bind(u.is_free)
        .execute(&self.db.pool)
        .await
        .with_context(|| format!("update metadata for game {game_id}"))?;
        Ok(())
    }

    async fn update_game_reviews(&self, game_id: i64, u: &ReviewUpdate) -> Result<()> {
        sqlx::query(
            "UPDATE public.games SET review_score = $2, review_score_desc = $3, \
             review_positive_ratio = $4, review_total = $5, updated_at = now() WHERE id = $1",
        )
        .bind(game_id)
        .bind(u.review_score)
        .bind(&u.review_score_desc)
        .bind(u.review_positive_ratio)
        .bind(u.review_total)
        .execute(&self.db.pool)
        .await
        .with_context(|| format!("update reviews for game {game_id}"))?;
        Ok(())
    }

    async fn update_game_critic_score(&self, game_id: i64, score: i32) -> Result<()> {
        sqlx::query("UPDATE public.games SET critic_score = $2, updated_at = now() WHERE id = $1")
            .bind(game_id)
            .bind(score)
            .execute(&self.db.pool)
            .await
            .with_context(|| format!("update critic score for game {game_id}"))?;
        Ok(())
    }

    async fn mark_evaluation_checked(&self, game_id: i64, kind: Evaluation) -> Result<()> {
        let q = match kind {
            Evaluation::Reviews => "UPDATE public.games SET reviews_checked_at = now() WHERE id = $1",
            Evaluation::Critic => "UPDATE public.games SET critic_checked_at = now() WHERE id = $1",
        };
        sqlx::query(q)
            .bind(game_id)
            .execute(&self.db.pool)
            .await
            .with_context(|| format!("mark {kind:?} checked for game {game_id}"))?;
        Ok(())
    }

    async fn replace_game_tags(&self, game_id: i64, tags: &[String]) -> Result<()> {
        let mut tag_ids: Vec<i64> = Vec::with_capacity(tags.len());
        for tag in tags {
            let slug = slugify(tag);
            if slug.is_empty() {
                continue;
            }
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO public.tags (name, slug) VALUES ($1, $2) \
                 ON CONFLICT (slug) DO UPDATE SET name = EXCLUDED.name \
                 RETURNING id",
            )
            .bind(tag)
            .bind(&slug)
            .fetch_one(&self.db.pool)
            .await
            .with_context(|| format!("upsert tag {slug}"))?;
            if !tag_ids.contains(&id) {
                tag_ids.push(id);
            }
        }
        sqlx::query("DELETE FROM public.game_tags WHERE game_id = $1")
            .bind(game_id)
            .execute(&self.db.pool)
            .await
            .context("clear game tags")?;
        if !tag_ids.is_empty() {
            sqlx::query(
                "INSERT INTO public.game_tags (game_id, tag_id) \
                 SELECT $1, t FROM UNNEST($2::bigint[]) AS t \
                 ON CONFLICT DO NOTHING",
            )
            .bind(game_id)
            .bind(&tag_ids)
            .execute(&self.db.pool)
            .await
            .context("insert game tags")?;
        }
        sqlx::query("UPDATE public.games SET tags = $2, updated_at = now() WHERE id = $1")
            .bind(game_id)
            .bind(tags)
            .execute(&self.db.pool)
            .await
            .context("store ordered tag list")?;
        Ok(())
    }

    async fn find_stream_by_channel(&self, channel_id: &str) -> Result<Option<StreamRow>> {
        let q = format!("SELECT {STREAM_COLUMNS} FROM public.streams WHERE channel_id = $1");
        sqlx::query_as::<_, StreamRow>(&q)
            .bind(channel_id)
            .fetch_optional(&self.db.pool)
            .await
            .context("select stream by channel")
    }

    async fn upsert_stream(&self, s: &StreamUpsert) -> Result<WriteOutcome> {
        let inserted: bool = sqlx::query_scalar(
            "INSERT INTO public.streams (channel_id, channel_name, channel_image_url, title, thumbnail_url, \
               viewer_count, is_live, category, game_id, started_at, last_seen_at) \
             VALUES ($1, $2, $3, $4, $5, $6, true, $7, $8, $9, $10) \
             ON CONFLICT (channel_id) DO UPDATE \
               SET channel_name = EXCLUDED.channel_name, \
                   channel_image_url = COALESCE(EXCLUDED.channel_image_url, streams.channel_image_url), \
                   title = EXCLUDED.title, \
                   thumbnail_url = COALESCE(EXCLUDED.thumbnail_url, streams.thumbnail_url), \
                   viewer_count = EXCLUDED.viewer_count, \
                   is_live = true, \
                   category = COALESCE(EXCLUDED.category, streams.category), \
                   game_id = COALESCE(EXCLUDED.game_id, streams.game_id), \
                   started_at = COALESCE(EXCLUDED.started_at, streams.started_at), \
                   last_seen_at = EXCLUDED.last_seen_at \
             RETURNING (xmax = 0)",
        )
        .bind(&s.channel_id)
        .bind(&s.channel_name)
        .bind(&s.channel_image_url)
        .bind(&s.title)
        .bind(&s.thumbnail_url)
        .bind(s.viewer_count)
        .bind(&s.category)
        .bind(s.game_id)
        .bind(s.started_at)
        .bind(s.observed_at)
        .fetch_one(&self.db.pool)
        .await
        .with_context(|| format!("upsert stream {}", s.channel_id))?;
        Ok(outcome(inserted))
    }

    async fn insert_stream(&self, s: &StreamUpsert) -> Result<()> {
        sqlx::query(
            "INSERT INTO public.streams (channel_id, channel_name, channel_image_url, title, thumbnail_url, \
               viewer_count, is_live, category, game_id, started_at, last_seen_at) \
             VALUES ($1, $2, $3, $4, $5, $6, true, $7, $8, $9, $10)",
        )
        .bind(&s.channel_id)
        .bind(&s.channel_name)
        .bind(&s.channel_image_url)
        .bind(&s.title)
        .bind(&s.thumbnail_url)
        .bind(s.viewer_count)
        .bind(&s.category)
        .bind(s.game_id)
        .bind(s.started_at)
        .bind(s.observed_at)
        .execute(&self.db.pool)
        .await
        .with_context(|| format!("insert stream {}", s.channel_id))?;
        Ok(())
    }

    async fn update_stream(&self, stream_id: i64, s: &StreamUpsert) -> Result<()> {
        sqlx::query(
            "UPDATE public.streams SET channel_name = $2, \
               channel_image_url = COALESCE($3, channel_image_url), \
               title = $4, thumbnail_url = COALESCE($5, thumbnail_url), \
               viewer_count = $6, is_live = true, \
               category = COALESCE($7, category), game_id = COALESCE($8, game_id), \
               started_at = COALESCE($9, started_at), last_seen_at = $10 \
             WHERE id = $1",
        )
        .bind(stream_id)
        .bind(&s.channel_name)
        .bind(&s.channel_image_url)
        .bind(&s.title)
        .bind(&s.thumbnail_url)
        .bind(s.viewer_count)
        .bind(&s.category)
        .bind(s.game_id)
        .bind(s.started_at)
        .bind(s.observed_at)
        .execute(&self.db.pool)
        .await
        .with_context(|| format!("update stream {stream_id}"))?;
        Ok(())
    }

    async fn stale_live_streams(&self, active: &[String], cutoff: DateTime<Utc>) -> Result<Vec<StreamRow>> {
        let q = format!(
            "SELECT {STREAM_COLUMNS} FROM public.streams \
             WHERE is_live = true \
               AND NOT (channel_id = ANY($1)) \
               AND (last_seen_at < $2 OR last_seen_at IS NULL)"
        );
        sqlx::query_as::<_, StreamRow>(&q)
            .bind(active)
            .bind(cutoff)
            .fetch_all(&self.db.pool)
            .await
            .context("select stale live streams")
    }

    async fn mark_streams_offline(&self, stream_ids: &[i64]) -> Result<u64> {
        let res = sqlx::query(
            "UPDATE public.streams SET is_live = false, viewer_count = 0 WHERE id = ANY($1)",
        )
        .bind(stream_ids)
        .execute(&self.db.pool)
        .await
        .context("mark streams offline")?;
        Ok(res.rows_affected())
    }

    async fn delete_streams(&self, stream_ids: &[i64]) -> Result<u64> {
        let res = sqlx::query("DELETE FROM public.streams WHERE id = ANY($1)")
            .bind(stream_ids)
            .execute(&self.db.pool)
            .await
            .context("delete offline streams")?;
        Ok(res.rows_affected())
    }

    async fn load_game_mappings(&self) -> Result<Vec<GameMapping>> {
        sqlx::query_as::<_, GameMapping>(
            "SELECT category_name, steam_app_id, skip_steam, skip_igdb, igdb_name, \
               override_cover_image, override_header_image, override_background_image, \
               override_price, override_original_price, override_is_free, notes \
             FROM public.game_mappings",
        )
        .fetch_all(&self.db.pool)
        .await
        .context("load game mappings")
    }

    async fn videos_by_category(&self, category_id: &str, size: usize, offset: usize) -> Result<Vec<VideoRecord>> {
        let rows = sqlx::query_as::<_, VideoRow>(
            "SELECT video_no, title, thumbnail_url, duration_secs, view_count, published_at, \
               channel_id, channel_name, category_id, category_value \
             FROM public.game_videos WHERE category_id = $1 \
             ORDER BY published_at DESC NULLS LAST, video_no DESC \
             LIMIT $2 OFFSET $3",
        )
        .bind(category_id)
        .bind(size as i64)
        .bind(offset as i64)
        .fetch_all(&self.db.pool)
        .await
        .context("select cached videos")?;
        Ok(rows.into_iter().map(VideoRecord::from).collect())
    }

    async fn upsert_videos(&self, videos: &[VideoRecord]) -> Result<u64> {
        let mut written = 0;
        for v in videos {
            sqlx::query(
                "INSERT INTO public.game_videos (video_no, title, thumbnail_url, duration_secs, view_count, \
                   published_at, channel_id, channel_name, category_id, category_value, cached_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now()) \
                 ON CONFLICT (video_no) DO UPDATE \
                   SET title = EXCLUDED.title, thumbnail_url = EXCLUDED.thumbnail_url, \
                       view_count = EXCLUDED.view_count, cached_at = now()",
            )
            .bind(v.video_no)
            .bind(&v.title)
            .bind(&v.thumbnail_url)
            .bind(v.duration_secs)
            .bind(v.view_count)
            .bind(v.published_at)
            .bind(&v.channel_id)
            .bind(&v.channel_name)
            .bind(&v.category_id)
            .bind(&v.category_value)
            .execute(&self.db.pool)
            .await
            .with_context(|| format!("upsert video {}", v.video_no))?;
            written += 1;
        }
        Ok(written)
    }

    async fn upsert_event(&self, e: &ScheduleEvent) -> Result<WriteOutcome> {
        let inserted: bool = sqlx::query_scalar(
            "INSERT INTO public.events (seq, title, league, start_at, end_at, status, channel_id, thumbnail_url, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now()) \
             ON CONFLICT (seq) DO UPDATE \
               SET title = EXCLUDED.title, league = EXCLUDED.league, \
                   start_at = EXCLUDED.start_at, end_at = EXCLUDED.end_at, \
                   status = EXCLUDED.status, channel_id = EXCLUDED.channel_id, \
                   thumbnail_url = EXCLUDED.thumbnail_url, updated_at = now() \
             RETURNING (xmax = 0)",
        )
        .bind(e.seq)
        .bind(&e.title)
        .bind(&e.league)
        .bind(e.start_at)
        .bind(e.end_at)
        .bind(&e.status)
        .bind(&e.channel_id)
        .bind(&e.thumbnail_url)
        .fetch_one(&self.db.pool)
        .await
        .with_context(|| format!("upsert event {}", e.seq))?;
        Ok(outcome(inserted))
    }

    async fn ping(&self) -> bool {
        self.db.ping().await
    }
}
