use strsim::levenshtein;

/// Containment matches never score above this; only an exact match earns 100.
pub const MAX_CONTAINMENT_SCORE: f64 = 80.0;
/// Confidence used by storefront identity resolution when the caller has no opinion.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 70.0;

/// Longest "short" name (in non-whitespace chars) that gets the stricter spinoff ratio.
const SHORT_NAME_LEN: usize = 3;
const SHORT_NAME_MAX_RATIO: f64 = 1.2;
const MAX_RATIO: f64 = 1.5;

/// Lowercase, drop punctuation/symbols (letters of every script survive), collapse whitespace.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for c in raw.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(c.to_lowercase());
        } else if c.is_whitespace() {
            pending_space = true;
        }
    }
    out
}

/// Title with any subtitle (after ':' or a spaced dash) removed.
fn base_title(raw: &str) -> &str {
    let cut = [":", " - ", " – ", " — "]
        .iter()
        .filter_map(|sep| raw.find(sep))
        .min();
    match cut {
        Some(idx) if idx > 0 => &raw[..idx],
        _ => raw,
    }
}

fn has_subtitle(raw: &str) -> bool {
    base_title(raw).len() != raw.len()
}

fn compact_len(s: &str) -> usize {
    s.chars().filter(|c| !c.is_whitespace()).count()
}

/// Outcome of comparing one query against one candidate name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Normalized names are identical.
    Exact,
    /// One name contains the other but is too much longer: a different product.
    Spinoff,
    Scored(f64),
}

/// Score `candidate` against `query` (0-100), applying the spinoff filter.
///
/// Containment and length ratios are measured against the candidate's base title
/// unless the query carries a subtitle of its own, so "Witcher 3" can still find
/// "The Witcher 3: Wild Hunt". A base title equal to the query falls back to the
/// full name, so "Minecraft" rejects "Minecraft: Story Mode" as it does
/// "Minecraft Dungeons".
pub fn compare(query: &str, candidate: &str) -> Verdict {
    let q = normalize(query);
    let full = normalize(candidate);
    if q.is_empty() || full.is_empty() {
        return Verdict::Scored(0.0);
    }
    if q == full {
        return Verdict::Exact;
    }

    let base = normalize(base_title(candidate));
    let c = if has_subtitle(query) || base == q { full.clone() } else { base };

    if !c.is_empty() && (c.contains(&q) || q.contains(&c)) {
        let (short, long) = if compact_len(&q) <= compact_len(&c) {
            (compact_len(&q), compact_len(&c))
        } else {
            (compact_len(&c), compact_len(&q))
        };
        let ratio = long as f64 / short.max(1) as f64;
        let limit = if short <= SHORT_NAME_LEN {
            SHORT_NAME_MAX_RATIO
        } else {
            MAX_RATIO
        };
        if ratio > limit {
            return Verdict::Spinoff;
        }
        return Verdict::Scored((100.0 / ratio).min(MAX_CONTAINMENT_SCORE));
    }

    Verdict::Scored(edit_similarity(&q, &full))
}

/// Levenshtein distance normalized by the longer string, as 0-100.
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 100.0;
    }
    let dist = levenshtein(a, b) as f64;
    ((1.0 - dist / longest as f64) * 100.0).max(0.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyMatch<T> {
    pub matched_id: T,
    pub confidence: f64,
    pub matched_name: String,
}

/// Pick the candidate that best identifies `query`.
///
/// An exact normalized match returns immediately with confidence 100 regardless of
/// `min_confidence`. Otherwise the highest score strictly above `min_confidence`
/// wins (first one on ties); spinoffs are never eligible.
pub fn best_match<'a, T, I>(query: &str, candidates: I, min_confidence: f64) -> Option<FuzzyMatch<T>>
where
    T: Clone,
    I: IntoIterator<Item = (T, &'a str)>,
{
    let mut best: Option<FuzzyMatch<T>> = None;
    for (id, name) in candidates {
        match compare(query, name) {
            Verdict::Exact => {
                return Some(FuzzyMatch {
                    matched_id: id,
                    confidence: 100.0,
                    matched_name: name.to_string(),
                })
            }
            Verdict::Spinoff => continue,
            Verdict::Scored(score) => {
                if score <= min_confidence {
                    continue;
                }
                if best.as_ref().map_or(true, |b| score > b.confidence) {
                    best = Some(FuzzyMatch {
                        matched_id: id,
                        confidence: score,
                        matched_name: name.to_string(),
                    });
                }
            }
        }
    }
    best
}

/// Loose containment in either direction after normalization. Used to relate
/// stream category labels to stored game titles.
pub fn loosely_contains(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_keeps_hangul_and_drops_punctuation() {
        assert_eq!(normalize("  리그 오브   레전드! "), "리그 오브 레전드");
        assert_eq!(normalize("The Witcher 3: Wild Hunt"), "the witcher 3 wild hunt");
        assert_eq!(normalize("Counter-Strike 2"), "counterstrike 2");
    }

    #[test]
    fn exact_match_short_circuits_any_threshold() {
        let m = best_match("GTFO", [(1, "GTFO")], 100.0).unwrap();
        assert_eq!(m.confidence, 100.0);
        assert_eq!(m.matched_id, 1);
    }

    #[test]
    fn exact_match_wins_over_earlier_partial_candidates() {
        let m = best_match(
            "Elden Ring",
            [(2, "ELDEN RING Shadow of the Erdtree"), (1, "ELDEN RING")],
            0.0,
        )
        .unwrap();
        assert_eq!(m.matched_id, 1);
    }

    #[test]
    fn short_query_spinoff_is_rejected() {
        for threshold in [0.0, 30.0, 70.0, 100.0] {
            assert!(best_match("롤", [(1, "리그 오브 레전드 이야기")], threshold).is_none());
        }
        assert_eq!(compare("롤", "롤 토너먼트"), Verdict::Spinoff);
    }

    #[test]
    fn sequel_with_shared_word_is_rejected() {
        assert_eq!(compare("Minecraft", "Minecraft Dungeons"), Verdict::Spinoff);
        assert!(best_match("Minecraft", [(1, "Minecraft Dungeons")], 0.0).is_none());
    }

    #[test]
    fn subtitled_spinoff_of_the_query_is_rejected() {
        assert_eq!(compare("Minecraft", "Minecraft: Story Mode"), Verdict::Spinoff);
        assert_eq!(compare("Elden Ring", "Elden Ring: Nightreign"), Verdict::Spinoff);
        assert!(best_match("Minecraft", [(1, "Minecraft: Story Mode")], DEFAULT_MIN_CONFIDENCE).is_none());
    }

    #[test]
    fn subtitle_containment_scores_below_exact() {
        let m = best_match("Witcher 3", [(292030, "The Witcher 3: Wild Hunt")], 70.0).unwrap();
        assert_eq!(m.matched_id, 292030);
        assert!(m.confidence < 100.0);
        assert!(m.confidence >= 70.0, "confidence was {}", m.confidence);
    }

    #[test]
    fn containment_is_capped() {
        match compare("Dota 2", "Dota 2:") {
            Verdict::Exact => {}
            other => panic!("expected exact after normalization, got {other:?}"),
        }
        match compare("Forza Horizon 5", "Forza Horizon 5 PC") {
            Verdict::Scored(s) => assert_eq!(s, MAX_CONTAINMENT_SCORE),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn edit_distance_floors_at_zero() {
        assert_eq!(edit_similarity("abc", "xyz"), 0.0);
        let near = edit_similarity("palworld", "palwrold");
        assert!(near > 70.0 && near < 100.0);
    }

    #[test]
    fn threshold_is_exclusive() {
        // "palworld" vs "palwrold" scores exactly 75
        assert!(best_match("Palworld", [(1, "Palwrold")], 75.0).is_none());
        assert!(best_match("Palworld", [(1, "Palwrold")], 74.9).is_some());
    }

    #[test]
    fn loose_containment_either_direction() {
        assert!(loosely_contains("배틀그라운드", "PUBG: 배틀그라운드"));
        assert!(loosely_contains("PUBG: 배틀그라운드", "배틀그라운드"));
        assert!(!loosely_contains("", "anything"));
    }
}
