use crate::database_ops::igdb::client::CatalogResult;
use crate::database_ops::mapping::GameMapping;
use crate::database_ops::steam::provider::{ProductDetails, SteamPrice};
use crate::database_ops::store::{GameMetadataUpdate, GameRow};
use crate::normalization::tags::normalize_tags;

/// Everything known about one game for this run. Absent sources are `None`
/// (not fetched, skipped by mapping, or nothing found).
#[derive(Debug, Clone, Copy)]
pub struct MergeInput<'a> {
    pub existing: &'a GameRow,
    pub mapping: Option<&'a GameMapping>,
    pub catalog: Option<&'a CatalogResult>,
    pub storefront: Option<&'a ProductDetails>,
    /// Price seen in storefront search results during identity resolution.
    pub search_price: Option<&'a SteamPrice>,
    pub discovered_steam_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedMetadata {
    pub update: GameMetadataUpdate,
    /// `None` leaves stored tags untouched.
    pub tags: Option<Vec<String>>,
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn discount(current: i64, original: i64) -> i32 {
    if original > 0 && current < original {
        (((original - current) as f64 / original as f64) * 100.0).round() as i32
    } else {
        0
    }
}

fn apply_price(update: &mut GameMetadataUpdate, price: &SteamPrice) {
    update.current_price = Some(price.current);
    update.original_price = Some(price.original);
    update.discount_rate = Some(price.discount_rate);
    update.currency = Some(price.currency.clone());
    update.is_free = Some(false);
}

/// Build the update payload for one game.
///
/// Catalog fields win over storefront ones; storefront details price wins
/// over the search-result price. Mapping overrides are applied last. Returns
/// `None` when there is nothing to write, so a double outage never blanks a row.
pub fn merge_metadata(input: MergeInput<'_>) -> Option<MergedMetadata> {
    let MergeInput {
        existing,
        mapping,
        catalog,
        storefront,
        search_price,
        discovered_steam_id,
    } = input;

    let has_overrides = mapping.is_some_and(GameMapping::has_overrides);
    if catalog.is_none() && storefront.is_none() && search_price.is_none() && !has_overrides {
        return None;
    }

    let mut u = GameMetadataUpdate {
        steam_app_id: mapping
            .and_then(|m| m.steam_app_id)
            .or(existing.steam_app_id)
            .or(discovered_steam_id),
        ..Default::default()
    };

    if let Some(c) = catalog {
        u.igdb_id = Some(c.id);
        if existing.title_en.is_none() {
            u.title_en = non_empty(Some(c.name.as_str()));
        }
        u.cover_image = c.cover_url.clone();
        u.header_image = c.header_url.clone();
        u.background_image = c.background_url.clone();
        u.description = non_empty(c.summary.as_deref());
        u.developer = non_empty(c.developer.as_deref());
        u.publisher = non_empty(c.publisher.as_deref());
    }

    if let Some(s) = storefront {
        u.cover_image = u.cover_image.or_else(|| s.cover_image.clone());
        u.header_image = u.header_image.or_else(|| s.header_image.clone());
        u.background_image = u.background_image.or_else(|| s.background_image.clone());
        u.description = u.description.or_else(|| non_empty(s.short_description.as_deref()));
        u.developer = u.developer.or_else(|| non_empty(s.developers.first().map(String::as_str)));
        u.publisher = u.publisher.or_else(|| non_empty(s.publishers.first().map(String::as_str)));
    }

    let free_listing = storefront.filter(|s| s.is_free);
    let details_price = storefront.and_then(|s| s.price.as_ref());
    if let Some(s) = free_listing {
        u.current_price = Some(0);
        u.original_price = Some(0);
        u.discount_rate = Some(0);
        u.currency = s.price.as_ref().map(|p| p.currency.clone());
        u.is_free = Some(true);
    } else if let Some(p) = details_price.or(search_price) {
        apply_price(&mut u, p);
    } else if storefront.is_some() {
        u.is_free = Some(false);
    }

    let catalog_terms: Vec<&str> = catalog
        .map(|c| c.genres.iter().chain(c.themes.iter()).map(String::as_str).collect())
        .unwrap_or_default();
    let tags = if !catalog_terms.is_empty() {
        normalize_tags(catalog_terms)
    } else {
        normalize_tags(storefront.map(|s| s.genres.iter().map(String::as_str).collect::<Vec<_>>()).unwrap_or_default())
    };

    if let Some(m) = mapping {
        if let Some(img) = non_empty(m.override_cover_image.as_deref()) {
            u.cover_image = Some(img);
        }
        if let Some(img) = non_empty(m.override_header_image.as_deref()) {
            u.header_image = Some(img);
        }
        if let Some(img) = non_empty(m.override_background_image.as_deref()) {
            u.background_image = Some(img);
        }
        if let Some(price) = m.override_price {
            let original = m.override_original_price.unwrap_or(price).max(price);
            u.current_price = Some(price);
            u.original_price = Some(original);
            u.discount_rate = Some(discount(price, original));
        } else if let Some(original) = m.override_original_price {
            u.original_price = Some(original);
        }
        if let Some(free) = m.override_is_free {
            u.is_free = Some(free);
        }
    }

    Some(MergedMetadata {
        update: u,
        tags: (!tags.is_empty()).then_some(tags),
    })
}
