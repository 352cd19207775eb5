use std::collections::HashSet;

/// Tags kept per game.
pub const MAX_TAGS: usize = 5;

/// Korean label for an English catalog genre/theme. Unknown terms pass through.
pub fn translate_term(term: &str) -> Option<&'static str> {
    let key = term.trim().to_ascii_lowercase();
    let ko = match key.as_str() {
        "action" => "액션",
        "adventure" => "어드벤처",
        "arcade" => "아케이드",
        "card & board game" => "카드/보드",
        "fighting" => "격투",
        "hack and slash/beat 'em up" => "핵앤슬래시",
        "indie" => "인디",
        "moba" => "MOBA",
        "music" => "음악",
        "platform" => "플랫포머",
        "point-and-click" => "포인트 앤 클릭",
        "puzzle" => "퍼즐",
        "quiz/trivia" => "퀴즈",
        "racing" => "레이싱",
        "real time strategy (rts)" => "실시간 전략",
        "role-playing (rpg)" | "rpg" => "RPG",
        "shooter" => "슈팅",
        "simulator" | "simulation" => "시뮬레이션",
        "sport" | "sports" => "스포츠",
        "strategy" => "전략",
        "tactical" => "전술",
        "turn-based strategy (tbs)" => "턴제 전략",
        "visual novel" => "비주얼 노벨",
        "fantasy" => "판타지",
        "science fiction" => "SF",
        "horror" => "호러",
        "thriller" => "스릴러",
        "survival" => "생존",
        "historical" => "역사",
        "stealth" => "잠입",
        "comedy" => "코미디",
        "drama" => "드라마",
        "sandbox" => "샌드박스",
        "open world" => "오픈 월드",
        "warfare" => "전쟁",
        "party" => "파티",
        "mystery" => "미스터리",
        "romance" => "로맨스",
        "kids" => "키즈",
        "educational" => "교육",
        "business" => "경영",
        "massively multiplayer" => "MMO",
        "casual" => "캐주얼",
        "free to play" => "무료 플레이",
        "early access" => "앞서 해보기",
        _ => return None,
    };
    Some(ko)
}

/// Translate, drop blanks and duplicates (first occurrence wins), keep the top `MAX_TAGS`.
pub fn normalize_tags<I, S>(terms: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for term in terms {
        let term = term.as_ref().trim();
        if term.is_empty() {
            continue;
        }
        let label = translate_term(term).map(str::to_string).unwrap_or_else(|| term.to_string());
        if seen.insert(label.to_lowercase()) {
            out.push(label);
        }
        if out.len() == MAX_TAGS {
            break;
        }
    }
    out
}
