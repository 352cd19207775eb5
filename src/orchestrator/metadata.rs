use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::database_ops::igdb::client::CatalogResult;
use crate::database_ops::mapping::{GameMapping, GameMappings};
use crate::database_ops::merge::{merge_metadata, MergeInput};
use crate::database_ops::steam::provider::SteamPrice;
use crate::database_ops::store::{GameOrder, GameQuery, GameRow};
use crate::error::JobError;

use super::{Deadline, ItemOutcome, JobContext, JobKind, JobParams, JobSummary};

/// Where the storefront id for a game came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SteamIdSource {
    Mapping,
    Existing,
    CatalogXref,
    NameSearch,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SteamIdentity {
    pub app_id: i64,
    pub source: SteamIdSource,
    pub search_price: Option<SteamPrice>,
}

/// Names to try against the storefront, in priority order.
pub fn name_variants(game: &GameRow, catalog: Option<&CatalogResult>) -> Vec<String> {
    [
        game.title_ko.as_deref(),
        Some(game.title.as_str()),
        game.title_en.as_deref(),
        catalog.map(|c| c.name.as_str()),
    ]
    .into_iter()
    .flatten()
    .map(str::trim)
    .filter(|s| !s.is_empty())
    .map(str::to_string)
    .collect()
}

/// Mapped id, then stored id, then the catalog cross-reference, then name search.
async fn resolve_steam_identity(
    ctx: &JobContext,
    game: &GameRow,
    mapping: Option<&GameMapping>,
    catalog: Option<&CatalogResult>,
) -> Option<SteamIdentity> {
    let known = |app_id, source| SteamIdentity {
        app_id,
        source,
        search_price: None,
    };
    if let Some(id) = mapping.and_then(|m| m.steam_app_id) {
        return Some(known(id, SteamIdSource::Mapping));
    }
    if let Some(id) = game.steam_app_id {
        return Some(known(id, SteamIdSource::Existing));
    }
    // Assumed more reliable than name search; not yet measured against mismatch rates.
    if let Some(id) = catalog.and_then(|c| c.steam_app_id) {
        return Some(known(id, SteamIdSource::CatalogXref));
    }
    let resolved = ctx
        .sources
        .steam
        .resolve_by_names(&name_variants(game, catalog))
        .await?;
    Some(SteamIdentity {
        app_id: resolved.app_id,
        source: SteamIdSource::NameSearch,
        search_price: resolved.search_price,
    })
}

async fn update_game(ctx: &JobContext, mappings: &GameMappings, game: &GameRow, deadline: &Deadline) -> ItemOutcome {
    if deadline.expired() {
        return ItemOutcome::Skipped;
    }
    let mapping = mappings.find(
        [Some(game.title.as_str()), game.title_ko.as_deref(), game.title_en.as_deref()]
            .into_iter()
            .flatten(),
    );
    let skip_igdb = mapping.is_some_and(|m| m.skip_igdb);
    let skip_steam = mapping.is_some_and(|m| m.skip_steam);

    let catalog = if skip_igdb {
        None
    } else {
        let localized = game.title_ko.as_deref().or(Some(game.title.as_str()));
        let english = mapping
            .and_then(|m| m.igdb_name.as_deref())
            .or(game.title_en.as_deref())
            .or_else(|| game.title.is_ascii().then_some(game.title.as_str()));
        ctx.sources.igdb.search_game(localized, english).await
    };

    let identity = if skip_steam {
        None
    } else {
        resolve_steam_identity(ctx, game, mapping, catalog.as_ref()).await
    };
    let storefront = match &identity {
        Some(id) => {
            ctx.sources
                .steam
                .product_details(id.app_id, ctx.sources.steam.region())
                .await
        }
        None => None,
    };

    let discovered_steam_id = identity
        .as_ref()
        .filter(|i| matches!(i.source, SteamIdSource::CatalogXref | SteamIdSource::NameSearch))
        .map(|i| i.app_id);
    let Some(merged) = merge_metadata(MergeInput {
        existing: game,
        mapping,
        catalog: catalog.as_ref(),
        storefront: storefront.as_ref(),
        search_price: identity.as_ref().and_then(|i| i.search_price.as_ref()),
        discovered_steam_id,
    }) else {
        debug!(game_id = game.id, title = %game.title, "metadata: no source data, leaving row untouched");
        return ItemOutcome::Skipped;
    };

    if let Err(err) = ctx.store.update_game_metadata(game.id, &merged.update).await {
        warn!(game_id = game.id, error = %err, "metadata: update failed");
        return ItemOutcome::Failed;
    }
    if let Some(tags) = &merged.tags {
        if let Err(err) = ctx.store.replace_game_tags(game.id, tags).await {
            warn!(game_id = game.id, error = %err, "metadata: tag resync failed");
            return ItemOutcome::Failed;
        }
    }
    debug!(
        game_id = game.id,
        catalog = catalog.is_some(),
        storefront = storefront.is_some(),
        steam_source = ?identity.as_ref().map(|i| i.source),
        "metadata: updated"
    );
    ItemOutcome::Updated
}

pub async fn run(ctx: &JobContext, params: &JobParams, deadline: &Deadline) -> Result<JobSummary, JobError> {
    if !ctx.sources.igdb.has_credentials() {
        return Err(JobError::config(
            "TWITCH_CLIENT_ID and TWITCH_CLIENT_SECRET are required for metadata updates",
        ));
    }
    let mappings = GameMappings::new(ctx.store.load_game_mappings().await?);
    let games = ctx
        .store
        .games(&GameQuery {
            id: params.game_id,
            steam_app_id: params.steam_app_id,
            order: GameOrder::MissingImageFirst,
            limit: params.limit.map(|l| l.max(1)),
            ..Default::default()
        })
        .await?;
    info!(games = games.len(), mappings = mappings.len(), "metadata: starting");

    let mut summary = JobSummary::new(JobKind::Metadata);
    let outcomes: Vec<ItemOutcome> = stream::iter(games.iter().map(|g| update_game(ctx, &mappings, g, deadline)))
        .buffered(ctx.settings.concurrency)
        .collect()
        .await;
    for outcome in outcomes {
        summary.counts.record(outcome);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_follow_priority() {
        let game = GameRow {
            title: "배틀그라운드".into(),
            title_ko: Some("배틀그라운드".into()),
            title_en: Some("PUBG".into()),
            ..Default::default()
        };
        let catalog = CatalogResult {
            id: 1,
            name: "PUBG: Battlegrounds".into(),
            slug: None,
            summary: None,
            cover_url: None,
            header_url: None,
            background_url: None,
            genres: vec![],
            themes: vec![],
            developer: None,
            publisher: None,
            steam_app_id: None,
            aggregated_rating: None,
            total_rating_count: 0,
        };
        assert_eq!(
            name_variants(&game, Some(&catalog)),
            vec!["배틀그라운드", "배틀그라운드", "PUBG", "PUBG: Battlegrounds"]
        );
    }
}
