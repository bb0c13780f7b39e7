//! Persisted manifest and preview index.
//!
//! The packaging collaborator consumes one record per unique asset; the
//! asset to strref mapping is explicit because duplicate propagation makes
//! one physical audio file serve many string references.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Serialize;

use crate::error::VoError;
use crate::resolver::Line;

/// One unique audio asset and every string reference it serves.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AssetRecord {
    pub resref: String,
    pub strrefs: Vec<u32>,
    /// Display text of the line the asset was generated from.
    pub text: String,
}

/// Packaging manifest, unique by asset name.
#[derive(Debug, Serialize)]
pub struct Manifest {
    pub dialog: String,
    pub assets: Vec<AssetRecord>,
}

/// One preview-index entry.
#[derive(Debug, Serialize)]
pub struct IndexEntry {
    pub strref: u32,
    pub resref: String,
    pub text: String,
    /// Audio path relative to the output tree.
    pub wav: String,
}

/// Preview index consumed by the external preview tool.
#[derive(Debug, Serialize)]
pub struct PreviewIndex {
    pub dialog: String,
    pub entries: Vec<IndexEntry>,
}

/// Collapse the resolved set into unique assets. The first line seen for
/// an asset supplies its display text; strref lists are sorted.
pub fn build_manifest(dialog: &str, lines: &[Line]) -> Manifest {
    let mut by_resref: BTreeMap<String, AssetRecord> = BTreeMap::new();
    for line in lines {
        by_resref
            .entry(line.resref.clone())
            .or_insert_with(|| AssetRecord {
                resref: line.resref.clone(),
                strrefs: Vec::new(),
                text: line.text.clone(),
            })
            .strrefs
            .push(line.strref);
    }

    let mut assets: Vec<AssetRecord> = by_resref.into_values().collect();
    for record in &mut assets {
        record.strrefs.sort_unstable();
        record.strrefs.dedup();
    }
    Manifest {
        dialog: dialog.to_string(),
        assets,
    }
}

/// One entry per strref, ordered by strref. Duplicates each get their own
/// entry pointing at the shared audio file.
pub fn build_index(dialog: &str, lines: &[Line]) -> PreviewIndex {
    let mut seen = BTreeSet::new();
    let mut entries: Vec<IndexEntry> = lines
        .iter()
        .filter(|line| seen.insert(line.strref))
        .map(|line| IndexEntry {
            strref: line.strref,
            resref: line.resref.clone(),
            text: line.text.clone(),
            wav: format!("sounds/{}.wav", line.resref),
        })
        .collect();
    entries.sort_by_key(|e| e.strref);
    PreviewIndex {
        dialog: dialog.to_string(),
        entries,
    }
}

pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<(), VoError> {
    std::fs::write(path, serde_json::to_string_pretty(manifest)?)?;
    log::debug!("wrote packaging manifest: {}", path.display());
    Ok(())
}

pub fn write_index(path: &Path, index: &PreviewIndex) -> Result<(), VoError> {
    std::fs::write(path, serde_json::to_string_pretty(index)?)?;
    log::debug!("wrote preview index: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(strref: u32, resref: &str, raw: &str) -> Line {
        Line {
            local_id: Some(strref),
            strref,
            text: raw.to_string(),
            tts_text: raw.to_string(),
            resref: resref.to_string(),
            seed_key: None,
            intensity_override: None,
            steps_override: None,
        }
    }

    #[test]
    fn shared_assets_collapse_into_one_record() {
        let lines = vec![
            line(1001, "MO001001", "\"Wait.\""),
            line(2002, "MO001001", "\"Wait.\""),
            line(1500, "MO001500", "Something else."),
        ];
        let manifest = build_manifest("DMORTE", &lines);

        assert_eq!(manifest.assets.len(), 2);
        let shared = manifest
            .assets
            .iter()
            .find(|a| a.resref == "MO001001")
            .expect("shared asset present");
        assert_eq!(shared.strrefs, vec![1001, 2002]);
    }

    #[test]
    fn index_is_ordered_by_strref_with_one_entry_each() {
        let lines = vec![
            line(2002, "MO001001", "\"Wait.\""),
            line(1001, "MO001001", "\"Wait.\""),
        ];
        let index = build_index("DMORTE", &lines);

        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.entries[0].strref, 1001);
        assert_eq!(index.entries[1].strref, 2002);
        assert!(index.entries.iter().all(|e| e.wav == "sounds/MO001001.wav"));
    }

    #[test]
    fn written_manifest_round_trips_as_json() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("manifest.json");
        let manifest = build_manifest("DMORTE", &[line(1, "MO000001", "Text.")]);
        write_manifest(&path, &manifest).expect("write");

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read"))
                .expect("valid json");
        assert_eq!(value["dialog"], "DMORTE");
        assert_eq!(value["assets"][0]["resref"], "MO000001");
    }
}
