//! Review and critic scores only. Runs on a faster cadence than the metadata
//! job and must never write pricing, images or tags.

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::database_ops::mapping::{GameMapping, GameMappings};
use crate::database_ops::store::{Evaluation, GameNeed, GameQuery, GameRow, ReviewUpdate};
use crate::error::JobError;
use crate::normalization::fuzzy::normalize;

use super::{Counts, Deadline, ItemOutcome, JobContext, JobKind, JobParams, JobSummary};

const DEFAULT_REVIEW_LIMIT: usize = 30;
/// Catalog lookups cost several calls each.
const DEFAULT_CRITIC_LIMIT: usize = 10;

fn mapping_for<'a>(mappings: &'a GameMappings, game: &GameRow) -> Option<&'a GameMapping> {
    mappings.find(
        [Some(game.title.as_str()), game.title_ko.as_deref(), game.title_en.as_deref()]
            .into_iter()
            .flatten(),
    )
}

fn title_denied(game: &GameRow, denied: &[String]) -> bool {
    [Some(game.title.as_str()), game.title_ko.as_deref(), game.title_en.as_deref()]
        .into_iter()
        .flatten()
        .map(normalize)
        .any(|t| denied.iter().any(|d| normalize(d) == t))
}

async fn refresh_reviews(ctx: &JobContext, mappings: &GameMappings, game: &GameRow) -> ItemOutcome {
    let Some(app_id) = game.steam_app_id else {
        return ItemOutcome::Skipped;
    };
    if ctx.settings.evaluation_skip_steam_ids.contains(&app_id) || mapping_for(mappings, game).is_some_and(|m| m.skip_steam) {
        debug!(game_id = game.id, app_id, "evaluations: reviews skipped by denylist");
        return ItemOutcome::Skipped;
    }
    let Some(summary) = ctx.sources.steam.review_summary(app_id).await else {
        return ItemOutcome::Skipped;
    };
    if summary.total_reviews <= 0 {
        return ItemOutcome::Skipped;
    }
    let update = ReviewUpdate {
        review_score: summary.review_score,
        review_score_desc: summary.review_score_desc.clone(),
        review_positive_ratio: summary.positive_ratio(),
        review_total: summary.total_reviews,
    };
    match ctx.store.update_game_reviews(game.id, &update).await {
        Ok(()) => ItemOutcome::Updated,
        Err(err) => {
            warn!(game_id = game.id, error = %err, "evaluations: review update failed");
            ItemOutcome::Failed
        }
    }
}

async fn refresh_critic_score(
    ctx: &JobContext,
    mappings: &GameMappings,
    game: &GameRow,
) -> ItemOutcome {
    let mapping = mapping_for(mappings, game);
    if title_denied(game, &ctx.settings.evaluation_skip_igdb_titles) || mapping.is_some_and(|m| m.skip_igdb) {
        debug!(game_id = game.id, title = %game.title, "evaluations: critic score skipped by denylist");
        return ItemOutcome::Skipped;
    }
    let localized = game.title_ko.as_deref().or(Some(game.title.as_str()));
    let english = mapping
        .and_then(|m| m.igdb_name.as_deref())
        .or(game.title_en.as_deref());
    let Some(score) = ctx
        .sources
        .igdb
        .search_game(localized, english)
        .await
        .and_then(|c| c.aggregated_rating)
    else {
        return ItemOutcome::Skipped;
    };
    match ctx.store.update_game_critic_score(game.id, score.round() as i32).await {
        Ok(()) => ItemOutcome::Updated,
        Err(err) => {
            warn!(game_id = game.id, error = %err, "evaluations: critic score update failed");
            ItemOutcome::Failed
        }
    }
}

async fn evaluate(
    ctx: &JobContext,
    mappings: &GameMappings,
    game: &GameRow,
    kind: Evaluation,
    deadline: &Deadline,
) -> ItemOutcome {
    if deadline.expired() {
        return ItemOutcome::Skipped;
    }
    let outcome = match kind {
        Evaluation::Reviews => refresh_reviews(ctx, mappings, game).await,
        Evaluation::Critic => refresh_critic_score(ctx, mappings, game).await,
    };
    // Stamped on every attempt so the next run starts with other games.
    if let Err(err) = ctx.store.mark_evaluation_checked(game.id, kind).await {
        warn!(game_id = game.id, error = %err, "evaluations: could not stamp check time");
    }
    outcome
}

fn tally(outcomes: Vec<ItemOutcome>) -> Counts {
    let mut counts = Counts::default();
    for o in outcomes {
        counts.record(o);
    }
    counts
}

pub async fn run(ctx: &JobContext, params: &JobParams, deadline: &Deadline) -> Result<JobSummary, JobError> {
    let review_limit = params.review_limit.or(params.limit).unwrap_or(DEFAULT_REVIEW_LIMIT);
    let critic_limit = params.critic_limit.unwrap_or(DEFAULT_CRITIC_LIMIT);
    if critic_limit > 0 && !ctx.sources.igdb.has_credentials() {
        return Err(JobError::config(
            "TWITCH_CLIENT_ID and TWITCH_CLIENT_SECRET are required for critic scores (pass critic_limit=0 to skip)",
        ));
    }
    let mappings = GameMappings::new(ctx.store.load_game_mappings().await?);
    let mut summary = JobSummary::new(JobKind::Evaluations);

    if review_limit > 0 {
        let games = ctx
            .store
            .games(&GameQuery {
                id: params.game_id,
                steam_app_id: params.steam_app_id,
                need: GameNeed::MissingReviews,
                limit: Some(review_limit),
                ..Default::default()
            })
            .await?;
        let outcomes: Vec<ItemOutcome> = stream::iter(games.iter().map(|g| evaluate(ctx, &mappings, g, Evaluation::Reviews, deadline)))
            .buffered(ctx.settings.concurrency)
            .collect()
            .await;
        *summary.section("reviews") = tally(outcomes);
    }

    if critic_limit > 0 {
        let games = ctx
            .store
            .games(&GameQuery {
                id: params.game_id,
                steam_app_id: params.steam_app_id,
                need: GameNeed::MissingCriticScore,
                limit: Some(critic_limit),
                ..Default::default()
            })
            .await?;
        let outcomes: Vec<ItemOutcome> = stream::iter(games.iter().map(|g| evaluate(ctx, &mappings, g, Evaluation::Critic, deadline)))
            .buffered(ctx.settings.concurrency)
            .collect()
            .await;
        *summary.section("critic") = tally(outcomes);
    }

    for counts in summary.sections.values().copied().collect::<Vec<_>>() {
        summary.counts.absorb(counts);
    }
    info!(
        reviews = ?summary.sections.get("reviews"),
        critic = ?summary.sections.get("critic"),
        "evaluations: sections done"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denylist_matches_any_title_form() {
        let game = GameRow {
            title: "배틀그라운드".into(),
            title_en: Some("PUBG: Battlegrounds".into()),
            ..Default::default()
        };
        assert!(title_denied(&game, &["pubg battlegrounds".to_string()]));
        assert!(!title_denied(&game, &["PUBG Mobile".to_string()]));
        assert!(!title_denied(&game, &[]));
    }
}
