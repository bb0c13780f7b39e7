//! Global string-table index and duplicate propagation.
//!
//! Many dialog units reuse the same table text under different strrefs.
//! Once a line is resolved, every unvoiced strref with identical
//! normalized text is cloned onto it so the finished audio serves all of
//! them without extra synthesis work.

use std::collections::{HashMap, HashSet};

use crate::adapter::DialogStore;
use crate::error::VoError;
use crate::resolver::Line;
use crate::text;

/// Whole string table, indexed for text-equality lookups.
pub struct StringTable {
    by_strref: HashMap<u32, String>,
    by_text: HashMap<String, Vec<u32>>,
}

impl StringTable {
    pub fn from_entries(entries: Vec<(u32, String)>) -> Self {
        let mut by_strref = HashMap::new();
        let mut by_text: HashMap<String, Vec<u32>> = HashMap::new();
        for (strref, txt) in entries {
            by_text
                .entry(text::normalize_for_match(&txt))
                .or_default()
                .push(strref);
            by_strref.insert(strref, txt);
        }
        Self { by_strref, by_text }
    }

    pub fn len(&self) -> usize {
        self.by_strref.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_strref.is_empty()
    }

    pub fn text(&self, strref: u32) -> Option<&str> {
        self.by_strref.get(&strref).map(|s| s.as_str())
    }

    fn duplicates_of(&self, normalized: &str) -> &[u32] {
        self.by_text.get(normalized).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Clone each resolved line onto every unvoiced strref whose table text
/// normalizes identically.
///
/// Clones carry the duplicate's own strref and raw text but share the
/// matched line's synthesis text and asset name, so one physical audio
/// file serves all of them. Entries that already carry audio are never
/// overwritten. Returns the number of clones added.
pub fn propagate_duplicates(
    lines: &mut Vec<Line>,
    table: &StringTable,
    store: &dyn DialogStore,
) -> Result<usize, VoError> {
    let mut seen: HashSet<u32> = lines.iter().map(|l| l.strref).collect();
    let mut extra = Vec::new();

    for line in lines.iter() {
        let Some(base_text) = table.text(line.strref) else {
            continue;
        };
        let key = text::normalize_for_match(base_text);

        for &strref in table.duplicates_of(&key) {
            if seen.contains(&strref) {
                continue;
            }
            if let Some(sound) = store.existing_audio(strref)? {
                log::debug!("duplicate strref {strref} already has audio [{sound}], skipping");
                continue;
            }
            seen.insert(strref);
            let dup_text = table.text(strref).unwrap_or(&line.text).to_string();
            extra.push(Line {
                local_id: None,
                strref,
                text: dup_text,
                tts_text: line.tts_text.clone(),
                resref: line.resref.clone(),
                seed_key: line.seed_key.clone(),
                intensity_override: None,
                steps_override: None,
            });
        }
    }

    let added = extra.len();
    if added > 0 {
        log::debug!("duplicate propagation added {added} strref(s) by text match");
    }
    lines.extend(extra);
    Ok(added)
}
