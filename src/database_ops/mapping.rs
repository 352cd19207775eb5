use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

use crate::normalization::fuzzy::normalize;

/// Curated override row keyed by the canonical stream-category text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, FromRow)]
pub struct GameMapping {
    pub category_name: String,
    /// Forced storefront id. `None` means unknown, not "skip".
    pub steam_app_id: Option<i64>,
    pub skip_steam: bool,
    pub skip_igdb: bool,
    /// Name to query the catalog with when the category text is localized.
    pub igdb_name: Option<String>,
    pub override_cover_image: Option<String>,
    pub override_header_image: Option<String>,
    pub override_background_image: Option<String>,
    pub override_price: Option<i64>,
    pub override_original_price: Option<i64>,
    pub override_is_free: Option<bool>,
    pub notes: Option<String>,
}

impl GameMapping {
    pub fn has_overrides(&self) -> bool {
        self.override_cover_image.is_some()
            || self.override_header_image.is_some()
            || self.override_background_image.is_some()
            || self.override_price.is_some()
            || self.override_original_price.is_some()
            || self.override_is_free.is_some()
    }
}

/// Read-through cache of mapping rows, loaded once per job run.
///
/// Lookups try the exact category text first, then its normalized form
/// (case, punctuation and spacing folded).
#[derive(Debug, Clone, Default)]
pub struct GameMappings {
    rows: Vec<GameMapping>,
    exact: HashMap<String, usize>,
    normalized: HashMap<String, usize>,
}

impl GameMappings {
    pub fn new(rows: Vec<GameMapping>) -> Self {
        let mut exact = HashMap::new();
        let mut normalized = HashMap::new();
        for (idx, row) in rows.iter().enumerate() {
            exact.entry(row.category_name.trim().to_string()).or_insert(idx);
            let key = normalize(&row.category_name);
            if !key.is_empty() {
                normalized.entry(key).or_insert(idx);
            }
        }
        Self {
            rows,
            exact,
            normalized,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&GameMapping> {
        let idx = self
            .exact
            .get(name.trim())
            .or_else(|| self.normalized.get(&normalize(name)))?;
        self.rows.get(*idx)
    }

    /// First mapping hit among several names for the same game.
    pub fn find<'a, I>(&self, names: I) -> Option<&GameMapping>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names.into_iter().find_map(|n| self.get(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(name: &str, steam: Option<i64>) -> GameMapping {
        GameMapping {
            category_name: name.to_string(),
            steam_app_id: steam,
            ..Default::default()
        }
    }

    #[test]
    fn exact_then_normalized_lookup() {
        let m = GameMappings::new(vec![
            mapping("리그 오브 레전드", None),
            mapping("Counter-Strike 2", Some(730)),
        ]);
        assert_eq!(m.len(), 2);
        assert_eq!(m.get("리그 오브 레전드").map(|r| r.steam_app_id), Some(None));
        assert_eq!(m.get("counter strike 2"), None);
        assert_eq!(m.get("COUNTER-STRIKE  2").and_then(|r| r.steam_app_id), Some(730));
        assert!(m.get("Dota 2").is_none());
    }

    #[test]
    fn find_walks_names_in_order() {
        let m = GameMappings::new(vec![mapping("PUBG: BATTLEGROUNDS", Some(578080))]);
        let hit = m.find(["배틀그라운드", "PUBG: BATTLEGROUNDS"]).unwrap();
        assert_eq!(hit.steam_app_id, Some(578080));
    }

    #[test]
    fn overrides_detection() {
        let mut row = mapping("x", None);
        assert!(!row.has_overrides());
        row.override_is_free = Some(true);
        assert!(row.has_overrides());
    }
}
