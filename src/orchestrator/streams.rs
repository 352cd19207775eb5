use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::database_ops::chzzk::client::{ChzzkClient, StreamCandidate};
use crate::database_ops::reconcile::reconcile_offline;
use crate::database_ops::store::{GameOrder, GameQuery, GameRow, StreamUpsert};
use crate::error::JobError;
use crate::normalization::fuzzy::{loosely_contains, normalize};

use super::{Deadline, ItemOutcome, JobContext, JobKind, JobParams, JobSummary};

/// Category page size in popular mode when no limit is given.
const DEFAULT_CATEGORY_PAGE: usize = 20;
const STREAMS_PER_TARGET: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Popular live categories, matched to stored games where possible.
    Popular,
    /// Stored games, searched by their localized title.
    #[default]
    Database,
}

/// What a single search pass is looking for.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchTarget {
    MatchedGame {
        id: i64,
        title: String,
        search_term: String,
        category_id: Option<String>,
    },
    /// A live category with no stored game; streams are kept without a link.
    UnmatchedCategory {
        search_term: String,
        category_id: Option<String>,
    },
}

impl SearchTarget {
    fn for_game(game: &GameRow, category_id: Option<String>) -> Self {
        Self::MatchedGame {
            id: game.id,
            title: game.title.clone(),
            search_term: game.search_keyword().to_string(),
            category_id,
        }
    }

    pub fn search_term(&self) -> &str {
        match self {
            Self::MatchedGame { search_term, .. } | Self::UnmatchedCategory { search_term, .. } => search_term,
        }
    }

    pub fn category_id(&self) -> Option<&str> {
        match self {
            Self::MatchedGame { category_id, .. } | Self::UnmatchedCategory { category_id, .. } => {
                category_id.as_deref()
            }
        }
    }

    pub fn game_id(&self) -> Option<i64> {
        match self {
            Self::MatchedGame { id, .. } => Some(*id),
            Self::UnmatchedCategory { .. } => None,
        }
    }

    /// Whether a stream's category label plausibly refers to this target.
    fn accepts(&self, stream: &StreamCandidate) -> bool {
        let Some(label) = stream.category_label() else {
            return false;
        };
        if loosely_contains(label, self.search_term()) {
            return true;
        }
        match self {
            Self::MatchedGame { title, .. } => loosely_contains(label, title),
            Self::UnmatchedCategory { .. } => false,
        }
    }
}

/// Stored game for a live category label: exact normalized title first, then containment.
pub fn match_category<'a>(label: &str, games: &'a [GameRow]) -> Option<&'a GameRow> {
    let key = normalize(label);
    let titles = |g: &'a GameRow| [Some(g.title.as_str()), g.title_ko.as_deref(), g.title_en.as_deref()];
    games
        .iter()
        .find(|g| titles(*g).into_iter().flatten().any(|t| normalize(t) == key))
        .or_else(|| {
            games.iter().find(|g| {
                [Some(g.title.as_str()), g.title_ko.as_deref()]
                    .into_iter()
                    .flatten()
                    .any(|t| loosely_contains(label, t))
            })
        })
}

async fn popular_targets(ctx: &JobContext, limit: usize) -> Result<Vec<SearchTarget>, JobError> {
    let categories = ctx.sources.chzzk.popular_categories(limit).await;
    let games = ctx.store.games(&GameQuery::default()).await?;
    Ok(categories
        .into_iter()
        .filter(|c| c.category_type.as_deref().map_or(true, |t| t.eq_ignore_ascii_case("GAME")))
        .map(|c| match match_category(&c.category_value, &games) {
            Some(game) => SearchTarget::for_game(game, Some(c.category_id)),
            None => SearchTarget::UnmatchedCategory {
                search_term: c.category_value,
                category_id: Some(c.category_id),
            },
        })
        .collect())
}

async fn database_targets(ctx: &JobContext, params: &JobParams, limit: Option<usize>) -> Result<Vec<SearchTarget>, JobError> {
    let games = ctx
        .store
        .games(&GameQuery {
            id: params.game_id,
            order: GameOrder::Popularity,
            limit,
            ..Default::default()
        })
        .await?;
    Ok(games.iter().map(|g| SearchTarget::for_game(g, None)).collect())
}

/// Exact category lookup when the id is known, keyword search otherwise.
async fn fetch_for_target(chzzk: &ChzzkClient, target: &SearchTarget) -> Vec<StreamCandidate> {
    let mut found = match target.category_id() {
        Some(id) => chzzk.live_streams_by_category(id, STREAMS_PER_TARGET).await,
        None => Vec::new(),
    };
    if found.is_empty() {
        found = chzzk.search_live_streams(target.search_term(), STREAMS_PER_TARGET).await;
    }
    found.retain(|s| target.accepts(s));
    found
}

fn observation(s: &StreamCandidate, game_id: Option<i64>, observed_at: DateTime<Utc>) -> StreamUpsert {
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

/// Existing row: update by id. Absent: insert, falling back to the keyed
/// upsert when a concurrent run inserted the channel first.
async fn write_stream(ctx: &JobContext, obs: &StreamUpsert) -> anyhow::Result<ItemOutcome> {
    match ctx.store.find_stream_by_channel(&obs.channel_id).await? {
        Some(existing) => {
            ctx.store.update_stream(existing.id, obs).await?;
            Ok(ItemOutcome::Updated)
        }
        None => match ctx.store.insert_stream(obs).await {
            Ok(()) => Ok(ItemOutcome::Created),
            Err(err) => {
                debug!(channel_id = %obs.channel_id, error = %err, "insert raced, retrying as upsert");
                Ok(ctx.store.upsert_stream(obs).await?.into())
            }
        },
    }
}

pub async fn run(ctx: &JobContext, params: &JobParams, deadline: &Deadline) -> Result<JobSummary, JobError> {
    let mut summary = JobSummary::new(JobKind::Streams);
    let mode = params.mode.unwrap_or_default();
    let limit = params.limit.map(|l| l.max(1));

    let targets = match mode {
        StreamMode::Popular => popular_targets(ctx, limit.unwrap_or(DEFAULT_CATEGORY_PAGE)).await?,
        StreamMode::Database => database_targets(ctx, params, limit).await?,
    };
    let matched = targets.iter().filter(|t| t.game_id().is_some()).count();
    info!(?mode, targets = targets.len(), matched, "streams: search targets ready");

    let chzzk = &ctx.sources.chzzk;
    let fetched: Vec<(SearchTarget, Option<Vec<StreamCandidate>>)> = stream::iter(targets.into_iter().map(|target| async move {
        if deadline.expired() {
            return (target, None);
        }
        let found = fetch_for_target(chzzk, &target).await;
        (target, Some(found))
    }))
    .buffered(ctx.settings.concurrency)
    .collect()
    .await;

    let observed_at = Utc::now();
    let mut active: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for (target, found) in &fetched {
        let Some(found) = found else {
            summary.timed_out = true;
            summary.section("targets").record(ItemOutcome::Skipped);
            continue;
        };
        if found.is_empty() {
            debug!(term = target.search_term(), "streams: nothing live");
            summary.section("targets").record(ItemOutcome::Skipped);
            continue;
        }
        summary.section("targets").record(ItemOutcome::Updated);
        for s in found {
            if seen.insert(s.channel_id.clone()) {
                active.push(s.channel_id.clone());
            }
            let obs = observation(s, target.game_id(), observed_at);
            let outcome = match write_stream(ctx, &obs).await {
                Ok(o) => o,
                Err(err) => {
                    warn!(channel_id = %s.channel_id, error = %err, "streams: write failed");
                    ItemOutcome::Failed
                }
            };
            summary.counts.record(outcome);
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
        Err(err) => warn!(error = %err, "streams: offline reconciliation failed"),
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn game(id: i64, title: &str, ko: Option<&str>) -> GameRow {
        GameRow {
            id,
            slug: title.to_lowercase(),
            title: title.to_string(),
            title_ko: ko.map(str::to_string),
            ..Default::default()
        }
    }

    fn cand(label: &str) -> StreamCandidate {
        StreamCandidate {
            channel_id: "c".into(),
            channel_name: "c".into(),
            channel_image_url: None,
            title: "t".into(),
            thumbnail_url: None,
            viewer_count: 1,
            category_type: Some("GAME".into()),
            category_id: None,
            category_value: Some(label.to_string()),
            opened_at: None,
        }
    }

    #[test]
    fn category_matching_prefers_exact_titles() {
        let games = vec![
            game(1, "League of Legends: Wild Rift", None),
            game(2, "League of Legends", Some("리그 오브 레전드")),
        ];
        assert_eq!(match_category("리그 오브 레전드", &games).map(|g| g.id), Some(2));
        assert_eq!(match_category("league of legends", &games).map(|g| g.id), Some(2));
        assert_eq!(match_category("Valorant", &games), None);
    }

    #[test]
    fn targets_filter_unrelated_categories() {
        let t = SearchTarget::for_game(&game(2, "League of Legends", Some("리그 오브 레전드")), None);
        assert_eq!(t.search_term(), "리그 오브 레전드");
        assert!(t.accepts(&cand("리그 오브 레전드")));
        assert!(t.accepts(&cand("League of Legends")));
        assert!(!t.accepts(&cand("Just Chatting")));

        let u = SearchTarget::UnmatchedCategory {
            search_term: "Apex Legends".into(),
            category_id: None,
        };
        assert_eq!(u.game_id(), None);
        assert!(u.accepts(&cand("Apex Legends")));
    }

    #[test]
    fn mode_defaults_to_database() {
        assert_eq!(StreamMode::default(), StreamMode::Database);
        let m: StreamMode = serde_json::from_str("\"popular\"").unwrap();
        assert_eq!(m, StreamMode::Popular);
    }
}
