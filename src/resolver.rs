//! Candidate line resolution for one dialog unit.

use crate::adapter::{self, DialogSource, DialogStore};
use crate::config::RunConfig;
use crate::error::VoError;
use crate::text;

/// One speakable dialog line headed for synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    /// Local id within the decompiled source; `None` for propagated
    /// duplicates, which have no source entry of their own.
    pub local_id: Option<u32>,
    /// Global string-table reference.
    pub strref: u32,
    /// Raw display text.
    pub text: String,
    /// Cleaned synthesis text.
    pub tts_text: String,
    /// Derived asset name. Duplicates share the asset of the line they
    /// matched, so this is not unique across a resolved set.
    pub resref: String,
    /// Reference voice assigned by the scheduler.
    pub seed_key: Option<String>,
    /// Planner overrides for targeted regeneration.
    pub intensity_override: Option<f32>,
    pub steps_override: Option<u32>,
}

impl Line {
    /// One-line description for prompts and logs.
    pub fn describe(&self) -> String {
        format!("[strref {}] {}", self.strref, text::normalize_for_match(&self.text))
    }
}

/// Derive the asset name: two-character voice prefix plus the zero-padded
/// strref. Short prefixes are padded with `X` so names stay fixed-width;
/// the strref keeps names collision-free within one prefix.
pub fn asset_name(voice_prefix: &str, strref: u32) -> String {
    let upper = voice_prefix.to_uppercase();
    let mut prefix: String = upper.chars().take(2).collect();
    while prefix.chars().count() < 2 {
        prefix.push('X');
    }
    format!("{prefix}{strref:06}")
}

/// Outcome of resolving one dialog variant.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Candidate lines, ordered by local id.
    pub lines: Vec<Line>,
    /// Speak references with no matching translation entry.
    pub gaps: usize,
    /// Lines excluded because the table already references audio.
    pub skipped_existing: usize,
}

/// Resolve candidate lines for one decompiled dialog unit.
///
/// Existing-audio lookups go through the store, which caches them for the
/// whole run; the same strref is commonly queried by several variants.
pub fn resolve_lines(
    source: &DialogSource,
    voice_prefix: &str,
    store: &dyn DialogStore,
    config: &RunConfig,
) -> Result<Resolution, VoError> {
    let speak_ids = adapter::parse_speak_refs(&source.script);
    let translations = adapter::parse_translations(&source.translations);

    let mut res = Resolution::default();
    for local_id in speak_ids {
        let Some(entry) = translations.get(&local_id) else {
            res.gaps += 1;
            continue;
        };

        if let Some(sound) = store.existing_audio(entry.strref)? {
            if config.respect_existing_audio {
                res.skipped_existing += 1;
                log::debug!("skipping strref {}: existing audio [{sound}]", entry.strref);
                continue;
            }
            log::debug!(
                "overriding existing audio [{sound}] for strref {}",
                entry.strref
            );
        }

        let tts_text = text::clean_line(&entry.text);
        if text::is_null_sentinel(&tts_text) {
            log::debug!("skipping sentinel entry for strref {}", entry.strref);
            continue;
        }

        res.lines.push(Line {
            local_id: Some(local_id),
            strref: entry.strref,
            text: entry.text.clone(),
            tts_text,
            resref: asset_name(voice_prefix, entry.strref),
            seed_key: None,
            intensity_override: None,
            steps_override: None,
        });
    }

    if res.gaps > 0 {
        log::warn!("{} speak reference(s) had no translation entry", res.gaps);
    }
    if res.skipped_existing > 0 {
        log::debug!(
            "skipped {} line(s) that already carry audio",
            res.skipped_existing
        );
    }
    Ok(res)
}

/// Variant policy: `name` is a variant of `base` iff it equals `base` or
/// `base` plus exactly one trailing `[A-Z0-9]` character.
pub fn is_variant_of(name: &str, base: &str) -> bool {
    match name.strip_prefix(base) {
        Some("") => true,
        Some(suffix) => {
            suffix.len() == 1
                && suffix
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        }
        None => false,
    }
}

/// Select base + variants from the resource listing. An empty listing (or
/// one with no matches) falls back to the base name alone.
pub fn find_variants(resources: &[String], base: &str) -> Vec<String> {
    let mut variants: Vec<String> = resources
        .iter()
        .filter(|name| is_variant_of(name, base))
        .cloned()
        .collect();
    if variants.is_empty() {
        variants.push(base.to_string());
    }
    variants.sort();
    variants.dedup();
    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfigBuilder;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    struct TableOnlyStore {
        audio: BTreeMap<u32, String>,
        queries: RefCell<usize>,
    }

    impl TableOnlyStore {
        fn new(audio: &[(u32, &str)]) -> Self {
            Self {
                audio: audio.iter().map(|&(k, v)| (k, v.to_string())).collect(),
                queries: RefCell::new(0),
            }
        }
    }

    impl DialogStore for TableOnlyStore {
        fn list_resources(&self) -> Result<Vec<String>, VoError> {
            Ok(Vec::new())
        }
        fn decompile(&self, _name: &str) -> Result<DialogSource, VoError> {
            Ok(DialogSource::default())
        }
        fn table_dump(&self) -> Result<String, VoError> {
            Ok(String::new())
        }
        fn existing_audio(&self, strref: u32) -> Result<Option<String>, VoError> {
            *self.queries.borrow_mut() += 1;
            Ok(self.audio.get(&strref).cloned())
        }
    }

    fn test_config() -> crate::config::RunConfig {
        RunConfigBuilder::default()
            .game_dir("game")
            .out_root("out")
            .ref_base_dir("voices")
            .narrator_ref_dir("voices/narrator_refs")
            .decompiler_exe("decomp")
            .string_table_path("game/dialog.tlk")
            .build()
            .expect("all required fields set")
    }

    fn source() -> DialogSource {
        DialogSource {
            script: "SAY @1\nSAY @2\nSAY @3\nSAY @4\n".to_string(),
            translations: "\
@1 = #1001 /* ~\"Wait.\"~ */\n\
@2 = #1002 /* ~\"Already voiced.\"~ */\n\
@4 = #1004 /* ~null node~ */\n"
                .to_string(),
        }
    }

    #[test]
    fn resolves_gaps_existing_audio_and_sentinels() {
        let store = TableOnlyStore::new(&[(1002, "OLDVO")]);
        let res = resolve_lines(&source(), "MORTE", &store, &test_config()).expect("resolution");

        // @3 has no translation entry, @2 already has audio, @4 is the
        // sentinel placeholder. Only @1 survives.
        assert_eq!(res.gaps, 1);
        assert_eq!(res.skipped_existing, 1);
        assert_eq!(res.lines.len(), 1);
        assert_eq!(res.lines[0].strref, 1001);
        assert_eq!(res.lines[0].tts_text, "Wait.");
        assert_eq!(res.lines[0].resref, "MO001001");
    }

    #[test]
    fn override_mode_keeps_already_voiced_lines() {
        let store = TableOnlyStore::new(&[(1002, "OLDVO")]);
        let mut config = test_config();
        config.respect_existing_audio = false;
        let res = resolve_lines(&source(), "MORTE", &store, &config).expect("resolution");
        assert!(res.lines.iter().any(|l| l.strref == 1002));
    }

    #[test]
    fn asset_names_are_fixed_width() {
        assert_eq!(asset_name("MORTE", 123), "MO000123");
        assert_eq!(asset_name("x", 5), "XX000005");
        assert_eq!(asset_name("", 42), "XX000042");
    }

    #[test]
    fn variant_policy_accepts_one_trailing_character() {
        assert!(is_variant_of("DMORTE", "DMORTE"));
        assert!(is_variant_of("DMORTE1", "DMORTE"));
        assert!(is_variant_of("DMORTEN", "DMORTE"));
        assert!(!is_variant_of("DMORTENX", "DMORTE"));
        assert!(!is_variant_of("XMORTE", "DMORTE"));
        assert!(!is_variant_of("DMORTEn", "DMORTE"));
    }

    #[test]
    fn empty_listing_falls_back_to_base_name() {
        assert_eq!(find_variants(&[], "DMORTE"), vec!["DMORTE"]);

        let listing = vec![
            "DMORTE".to_string(),
            "DMORTE1".to_string(),
            "DAKKON".to_string(),
        ];
        assert_eq!(find_variants(&listing, "DMORTE"), vec!["DMORTE", "DMORTE1"]);
    }
}
