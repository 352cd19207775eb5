use chrono::Utc;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::database_ops::chzzk::client::{Category, StreamCandidate};
use crate::database_ops::reconcile::reconcile_offline;
use crate::database_ops::store::{GameSnapshot, StreamUpsert};
use crate::error::JobError;
use crate::normalization::fuzzy::loosely_contains;
use crate::normalization::slug::slugify;

use super::{Deadline, ItemOutcome, JobContext, JobKind, JobParams, JobSummary};

const POPULAR_CATEGORY_LIMIT: usize = 50;
/// Upper bound on categories probed per run.
const PROBE_SAMPLE: usize = 30;
const CONFIRMED_LIMIT: usize = 10;
const SEARCH_SIZE: usize = 20;
const DEFAULT_STREAM_LIMIT: usize = 100;

/// One category's popularity snapshot for this run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCategory {
    pub rank: i32,
    pub slug: String,
    pub title: String,
    pub title_en: Option<String>,
    pub total_viewers: i64,
    pub live_streams: i32,
    #[serde(skip)]
    pub category_id: Option<String>,
}

fn has_non_ascii(s: &str) -> bool {
    !s.is_ascii()
}

/// Whether a search hit actually belongs to the category it was searched for.
fn in_category(stream: &StreamCandidate, category: &Category) -> bool {
    if stream.category_id.as_deref() == Some(category.category_id.as_str()) {
        return true;
    }
    stream
        .category_value
        .as_deref()
        .is_some_and(|v| loosely_contains(v, &category.category_value))
}

/// One record per channel; a later sighting replaces an earlier one.
pub fn dedupe_by_channel<I>(candidates: I) -> Vec<StreamCandidate>
where
    I: IntoIterator<Item = StreamCandidate>,
{
    let mut by_channel: IndexMap<String, StreamCandidate> = IndexMap::new();
    for c in candidates {
        by_channel.insert(c.channel_id.clone(), c);
    }
    by_channel.into_values().collect()
}

/// GAME-only, non-empty channel, most viewers first, capped to `limit`.
pub fn select_streams(mut streams: Vec<StreamCandidate>, limit: usize) -> Vec<StreamCandidate> {
    streams.retain(|s| s.is_game() && !s.channel_id.trim().is_empty());
    streams.sort_by(|a, b| b.viewer_count.cmp(&a.viewer_count));
    streams.truncate(limit);
    streams
}

/// Sum viewers and streams per category label and rank by total viewers.
/// Labels that slugify to the same value collapse into one entry.
pub fn rank_categories(streams: &[StreamCandidate]) -> Vec<RankedCategory> {
    let mut by_slug: IndexMap<String, RankedCategory> = IndexMap::new();
    for s in streams {
        let Some(label) = s.category_label() else {
            continue;
        };
        let slug = slugify(label);
        if slug.is_empty() {
            debug!(category = label, "category slug is empty, skipping");
            continue;
        }
        let entry = by_slug.entry(slug.clone()).or_insert_with(|| RankedCategory {
            rank: 0,
            slug,
            title: label.trim().to_string(),
            title_en: None,
            total_viewers: 0,
            live_streams: 0,
            category_id: s.category_id.clone(),
        });
        if entry.title != label.trim() {
            info!(slug = %entry.slug, kept = %entry.title, merged = label, "category labels share a slug, merging");
        }
        entry.total_viewers += s.viewer_count;
        entry.live_streams += 1;
        if entry.title_en.is_none() {
            entry.title_en = s.english_category_hint();
        }
    }
    let mut ranked: Vec<RankedCategory> = by_slug.into_values().collect();
    ranked.sort_by(|a, b| b.total_viewers.cmp(&a.total_viewers));
    for (i, r) in ranked.iter_mut().enumerate() {
        r.rank = i as i32 + 1;
    }
    ranked
}

fn stream_upsert(s: &StreamCandidate, game_id: Option<i64>, observed_at: chrono::DateTime<Utc>) -> StreamUpsert {
    StreamUpsert {
        channel_id: s.channel_id.clone(),
        channel_name: s.channel_name.clone(),
        channel_image_url: s.channel_image_url.clone(),
        title: s.title.clone(),
        thumbnail_url: s.thumbnail_url.clone(),
        viewer_count: s.viewer_count,
        category: s.category_label().map(str::to_string),
        game_id,
        started_at: s.opened_at,
        observed_at,
    }
}

/// Probe popular categories one by one until enough GAME ones are confirmed.
async fn confirm_game_categories(ctx: &JobContext, categories: Vec<Category>, deadline: &Deadline) -> Vec<Category> {
    let mut confirmed = Vec::new();
    for category in categories.into_iter().take(PROBE_SAMPLE) {
        if confirmed.len() >= CONFIRMED_LIMIT || deadline.expired() {
            break;
        }
        if category
            .category_type
            .as_deref()
            .is_some_and(|t| !t.eq_ignore_ascii_case("GAME"))
        {
            continue;
        }
        let probe = ctx
            .sources
            .chzzk
            .search_live_streams_raw(&category.category_value, 1)
            .await;
        if probe.first().is_some_and(StreamCandidate::is_game) {
            confirmed.push(category);
        } else {
            debug!(category = %category.category_value, "probe did not confirm a GAME category");
        }
    }
    confirmed
}

pub async fn run(ctx: &JobContext, params: &JobParams, deadline: &Deadline) -> Result<JobSummary, JobError> {
    let mut summary = JobSummary::new(JobKind::TopGames);
    let limit = params.limit.unwrap_or(DEFAULT_STREAM_LIMIT).max(1);

    let popular = ctx.sources.chzzk.popular_categories(POPULAR_CATEGORY_LIMIT).await;
    if popular.is_empty() {
        warn!("top-games: no popular categories returned");
        return Ok(summary);
    }
    let posters: HashMap<String, Option<String>> = popular
        .iter()
        .map(|c| (c.category_id.clone(), c.poster_image_url.clone()))
        .collect();

    let confirmed = confirm_game_categories(ctx, popular, deadline).await;
    info!(confirmed = confirmed.len(), "top-games: GAME categories confirmed");

    let chzzk = &ctx.sources.chzzk;
    let searches: Vec<Vec<StreamCandidate>> = stream::iter(confirmed.iter().map(|category| async move {
        if deadline.expired() {
            return None;
        }
        let hits = chzzk.search_live_streams_raw(&category.category_value, SEARCH_SIZE).await;
        Some(hits.into_iter().filter(|s| in_category(s, category)).collect::<Vec<_>>())
    }))
    .buffered(ctx.settings.concurrency)
    .filter_map(|r| async move { r })
    .collect()
    .await;
    if searches.len() < confirmed.len() {
        summary.timed_out = true;
        summary.section("categories").skipped += confirmed.len() - searches.len();
    }

    let streams = select_streams(dedupe_by_channel(searches.into_iter().flatten()), limit);
    let ranked = rank_categories(&streams);

    let mut game_ids: HashMap<String, i64> = HashMap::new();
    for r in &ranked {
        if deadline.expired() {
            summary.timed_out = true;
            summary.section("games").record(ItemOutcome::Skipped);
            continue;
        }
        let snapshot = GameSnapshot {
            slug: r.slug.clone(),
            title: r.title.clone(),
            title_ko: has_non_ascii(&r.title).then(|| r.title.clone()),
            title_en: r.title_en.clone(),
            popularity_rank: r.rank,
            total_viewers: r.total_viewers,
            live_streams: r.live_streams,
            poster_image: r
                .category_id
                .as_ref()
                .and_then(|id| posters.get(id).cloned().flatten()),
        };
        match ctx.store.upsert_game_snapshot(&snapshot).await {
            Ok((row, outcome)) => {
                game_ids.insert(r.slug.clone(), row.id);
                summary.section("games").record(outcome.into());
            }
            Err(err) => {
                warn!(slug = %r.slug, error = %err, "top-games: game upsert failed, reading existing row");
                summary.section("games").record(ItemOutcome::Failed);
                if let Ok(Some(row)) = ctx.store.find_game_by_slug(&r.slug).await {
                    game_ids.insert(r.slug.clone(), row.id);
                }
            }
        }
    }

    let observed_at = Utc::now();
    let mut active = Vec::with_capacity(streams.len());
    for s in &streams {
        active.push(s.channel_id.clone());
        let game_id = s
            .category_label()
            .and_then(|label| game_ids.get(&slugify(label)).copied());
        match ctx.store.upsert_stream(&stream_upsert(s, game_id, observed_at)).await {
            Ok(outcome) => summary.section("streams").record(outcome.into()),
            Err(err) => {
                warn!(channel_id = %s.channel_id, error = %err, "top-games: stream upsert failed");
                summary.section("streams").record(ItemOutcome::Failed);
            }
        }
    }

    match reconcile_offline(
        ctx.store.as_ref(),
        &active,
        ctx.settings.offline_grace,
        params.policy.unwrap_or_default(),
        observed_at,
    )
    .await
    {
        Ok(outcome) => summary.offline = Some(outcome),
        Err(err) => warn!(error = %err, "top-games: offline reconciliation failed"),
    }

    for counts in summary.sections.values().copied().collect::<Vec<_>>() {
        summary.counts.absorb(counts);
    }
    summary.details = Some(json!({ "ranking": ranked }));
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(channel: &str, viewers: i64, ty: &str, value: &str) -> StreamCandidate {
        StreamCandidate {
            channel_id: channel.to_string(),
            channel_name: channel.to_string(),
            channel_image_url: None,
            title: format!("{channel} live"),
            thumbnail_url: None,
            viewer_count: viewers,
            category_type: Some(ty.to_string()),
            category_id: Some(value.replace(' ', "_")),
            category_value: Some(value.to_string()),
            opened_at: None,
        }
    }

    #[test]
    fn later_duplicate_channel_wins() {
        let out = dedupe_by_channel(vec![
            cand("a", 400, "GAME", "Apex Legends"),
            cand("c", 200, "GAME", "Apex Legends"),
            cand("a", 500, "GAME", "Apex Legends"),
        ]);
        assert_eq!(out.len(), 2);
        let a = out.iter().find(|s| s.channel_id == "a").unwrap();
        assert_eq!(a.viewer_count, 500);
    }

    #[test]
    fn selection_drops_non_game_and_caps() {
        let out = select_streams(
            vec![
                cand("a", 10, "GAME", "X"),
                cand("b", 90, "TALK", "Just Chatting"),
                cand("c", 50, "GAME", "X"),
                cand("", 999, "GAME", "X"),
            ],
            1,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].channel_id, "c");
    }

    #[test]
    fn ranking_sums_per_category() {
        let ranked = rank_categories(&[
            cand("a", 500, "GAME", "Apex Legends"),
            cand("b", 100, "GAME", "리그 오브 레전드"),
            cand("c", 200, "GAME", "Apex Legends"),
            cand("d", 250, "GAME", "리그 오브 레전드"),
        ]);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].title, "Apex Legends");
        assert_eq!(ranked[0].total_viewers, 700);
        assert_eq!(ranked[0].live_streams, 2);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].title_en.as_deref(), Some("Apex Legends"));
        assert_eq!(ranked[1].rank, 2);
        assert_eq!(ranked[1].total_viewers, 350);
    }

    #[test]
    fn slug_collisions_merge() {
        let ranked = rank_categories(&[cand("a", 5, "GAME", "Apex Legends"), cand("b", 7, "GAME", "APEX  legends")]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].total_viewers, 12);
    }

    #[test]
    fn search_hits_are_scoped_to_category() {
        let apex = Category {
            category_id: "Apex_Legends".into(),
            category_value: "Apex Legends".into(),
            category_type: Some("GAME".into()),
            poster_image_url: None,
            viewer_count: 0,
            open_live_count: 0,
        };
        assert!(in_category(&cand("a", 1, "GAME", "Apex Legends"), &apex));
        assert!(!in_category(&cand("b", 1, "GAME", "Valorant"), &apex));
    }
}
