//! Text cleanup for synthesis input.
//!
//! Two cleaners share the same tail passes (dash normalization, whitespace
//! collapse, pronunciation fixes) but differ at the front: the line-level
//! cleaner extracts quoted speech from a whole dialog line, while the
//! segment-level cleaner strips annotation markup from narrator/character
//! sub-spans.

use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};

/// Whole-word, case-insensitive spelling substitutions applied to synthesis
/// text only. These correct pronunciations the synthesis engine gets wrong;
/// display text is never touched.
const PRONUNCIATION_FIXES: &[(&str, &str)] = &[
    ("TOO", "too"),
    ("DEAD", "dead"),
    ("morte", "mort"),
    ("WHO", "who"),
    ("Pharod", "Fah-rod"),
    ("Ysgard", "izgard"),
    ("DOES", "does"),
    ("ye", "ya"),
    ("MOST", "most"),
];

/// Placeholder text used by state-machine sentinel entries that carry no
/// actual speech.
pub const NULL_SENTINEL: &str = "NULL NODE";

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static QUOTED_SPAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).expect("valid regex"));
static EMPHASIS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.*?)\*").expect("valid regex"));
static DASH_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\s*)([-\u{2013}\u{2014}]+)(\s*)").expect("valid regex"));
static NOTE_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\^[A-Za-z0-9_\-]+:?\s*").expect("valid regex"));
static ENGINE_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static PUNCT_ONLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[.\-\u{2013}\u{2014}\u{2026}\s]+$").expect("valid regex"));
static FIX_TABLE: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    PRONUNCIATION_FIXES
        .iter()
        .map(|&(src, repl)| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(src));
            (Regex::new(&pattern).expect("valid regex"), repl)
        })
        .collect()
});

/// Collapse runs of whitespace (including line-ending variants) to single
/// spaces and trim. This is the normalization used for text-equality
/// matching across the string table.
pub fn normalize_for_match(text: &str) -> String {
    let t = text.replace("\r\n", "\n");
    WHITESPACE_RE.replace_all(&t, " ").trim().to_string()
}

/// Normalize "floating" dashes to commas while leaving intra-word hyphens
/// alone.
///
/// `journal - though` becomes `journal, though`; `meat-hook` is untouched.
pub fn normalize_dashes(text: &str) -> String {
    DASH_RUN_RE
        .replace_all(text, |caps: &regex::Captures| {
            let m = caps.get(0).expect("group 0 always present");
            let spaced_both = !caps[1].is_empty() && !caps[3].is_empty();
            let prev_is_word = text[..m.start()].chars().next_back().is_some_and(is_word);
            let next_is_word = text[m.end()..].chars().next().is_some_and(is_word);
            if (prev_is_word && next_is_word && spaced_both) || (!prev_is_word && !next_is_word) {
                ", ".to_string()
            } else {
                m.as_str().to_string()
            }
        })
        .into_owned()
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn apply_pronunciation_fixes(text: &str) -> String {
    let mut result = text.to_string();
    for (re, repl) in FIX_TABLE.iter() {
        result = re.replace_all(&result, NoExpand(repl)).into_owned();
    }
    result
}

/// True when cleaned text is the engine's empty-node placeholder. Such
/// lines are excluded from resolution entirely.
pub fn is_null_sentinel(cleaned: &str) -> bool {
    normalize_for_match(cleaned).eq_ignore_ascii_case(NULL_SENTINEL)
}

/// Line-level cleaner: reduce a raw dialog line to speakable text.
///
/// Quoted spans are preferred when present (narration around them is
/// dropped); otherwise a single enclosing quote pair is stripped. Emphasis
/// markup, floating dashes, and whitespace runs are normalized, then the
/// pronunciation table is applied.
pub fn clean_line(text: &str) -> String {
    let trimmed = text.trim();

    let quoted: Vec<&str> = QUOTED_SPAN_RE
        .captures_iter(trimmed)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    let mut t = if !quoted.is_empty() {
        quoted.join(" ")
    } else if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim().to_string()
    } else {
        trimmed.to_string()
    };

    t = EMPHASIS_RE.replace_all(&t, "$1").into_owned();
    t = normalize_dashes(&t);
    t = t.replace("\r\n", " ").replace('\n', " ");
    t = WHITESPACE_RE.replace_all(&t, " ").trim().to_string();
    apply_pronunciation_fixes(&t)
}

/// Segment-level cleaner for narrator/character sub-spans.
///
/// Additionally strips leading caret-note prefixes (`^TAG:` and the like)
/// and angle-bracket engine tags. Returns `None` when nothing speakable
/// remains (empty, or punctuation/dash/ellipsis only).
pub fn clean_segment(text: &str) -> Option<String> {
    let mut t = text.trim().to_string();

    t = NOTE_PREFIX_RE.replace(&t, "").into_owned();
    t = ENGINE_TAG_RE.replace_all(&t, "").into_owned();
    t = EMPHASIS_RE.replace_all(&t, "$1").into_owned();
    t = normalize_dashes(&t);
    t = t.replace("\r\n", " ").replace('\n', " ");
    t = WHITESPACE_RE.replace_all(&t, " ").trim().to_string();

    if t.is_empty() || PUNCT_ONLY_RE.is_match(&t) {
        return None;
    }
    Some(apply_pronunciation_fixes(&t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floating_dash_becomes_comma() {
        assert_eq!(normalize_dashes("journal - though"), "journal, though");
        assert_eq!(normalize_dashes("paused -- then left"), "paused, then left");
    }

    #[test]
    fn intra_word_hyphen_is_preserved() {
        assert_eq!(normalize_dashes("meat-hook"), "meat-hook");
        assert_eq!(normalize_dashes("a well-worn blade"), "a well-worn blade");
    }

    #[test]
    fn standalone_dash_run_becomes_comma() {
        assert_eq!(normalize_dashes("wait. -- \"Go.\""), "wait., \"Go.\"");
    }

    #[test]
    fn clean_line_extracts_quoted_spans() {
        assert_eq!(
            clean_line(r#"He grins. "Not a chance." He turns away. "Ever.""#),
            "Not a chance. Ever."
        );
    }

    #[test]
    fn clean_line_strips_single_enclosing_quotes() {
        assert_eq!(clean_line(r#""Wait.""#), "Wait.");
    }

    #[test]
    fn clean_line_strips_emphasis_and_collapses_whitespace() {
        assert_eq!(clean_line("*sighs*  Fine.\r\nGo."), "sighs Fine. Go.");
    }

    #[test]
    fn pronunciation_fixes_match_whole_words_case_insensitively() {
        assert_eq!(clean_line("YE know WHO waits."), "ya know who waits.");
        // No substring matches: "yearn" must not become "yaarn".
        assert_eq!(clean_line("They yearn."), "They yearn.");
    }

    #[test]
    fn sentinel_detection_is_case_insensitive() {
        assert!(is_null_sentinel("NULL NODE"));
        assert!(is_null_sentinel("null  node"));
        assert!(!is_null_sentinel("null node of power"));
    }

    #[test]
    fn clean_segment_strips_note_prefix_and_engine_tags() {
        assert_eq!(
            clean_segment("^NNOTE: You see a sign."),
            Some("You see a sign.".to_string())
        );
        assert_eq!(
            clean_segment("<TAG2> The wound closes."),
            Some("The wound closes.".to_string())
        );
    }

    #[test]
    fn clean_segment_drops_punctuation_only_spans() {
        assert_eq!(clean_segment("..."), None);
        assert_eq!(clean_segment(" - "), None);
        assert_eq!(clean_segment("\u{2026}"), None);
        assert_eq!(clean_segment("   "), None);
    }
}
