//! Decompiler boundary.
//!
//! The core pipeline consumes structured `(local id, strref, text)` triples
//! and whole-table entries; everything that knows about the decompiler's
//! output syntax lives here, behind the `DialogStore` trait. The scrapers
//! tolerate whatever surrounds the patterns they match.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::process::Command;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{RunConfig, RunContext};
use crate::error::VoError;

static SPEAK_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSAY\s+@(\d+)").expect("valid regex"));
static TRANSLATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)@(\d+)\s*=\s*#(\d+)\s*/\*\s*~(.*?)~.*?\*/").expect("valid regex"));
static TABLE_ENTRY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)@(\d+)\s*=\s*~(.*?)~").expect("valid regex"));
static RESOURCE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([A-Za-z0-9_]+)\.DLG\b").expect("valid regex"));
static AUDIO_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)~.*?~\s*\[([^\]]+)\]").expect("valid regex"));

/// Decompiled source plus its parallel translation blob for one dialog unit.
#[derive(Debug, Clone, Default)]
pub struct DialogSource {
    /// State-machine script exposing `SAY @N` references.
    pub script: String,
    /// Translation blob mapping local ids to (strref, text).
    pub translations: String,
}

/// One `(local id, strref, text)` triple from a translation blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationEntry {
    pub local_id: u32,
    pub strref: u32,
    pub text: String,
}

/// Black-box dialog/string-table service.
pub trait DialogStore {
    /// Enumerate all known dialog resource names. Queried once per run.
    fn list_resources(&self) -> Result<Vec<String>, VoError>;
    /// Decompile one dialog resource into source + translation blobs.
    fn decompile(&self, name: &str) -> Result<DialogSource, VoError>;
    /// Dump the whole string table as a translation blob.
    fn table_dump(&self) -> Result<String, VoError>;
    /// Existing audio reference for a strref, if the table carries one.
    fn existing_audio(&self, strref: u32) -> Result<Option<String>, VoError>;
    /// Remove any sources this store itself decompiled during the run.
    fn cleanup(&self) {}
}

/// Every `SAY @N` local id in a decompiled script, ordered.
pub fn parse_speak_refs(script: &str) -> BTreeSet<u32> {
    SPEAK_REF_RE
        .captures_iter(script)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

/// All `@N = #strref /* ~text~ ... */` triples in a translation blob.
pub fn parse_translations(blob: &str) -> BTreeMap<u32, TranslationEntry> {
    TRANSLATION_RE
        .captures_iter(blob)
        .filter_map(|c| {
            let local_id: u32 = c[1].parse().ok()?;
            let strref: u32 = c[2].parse().ok()?;
            Some((
                local_id,
                TranslationEntry {
                    local_id,
                    strref,
                    text: c[3].to_string(),
                },
            ))
        })
        .collect()
}

/// All `@strref = ~text~` entries in a whole-table dump.
pub fn parse_table_dump(blob: &str) -> Vec<(u32, String)> {
    TABLE_ENTRY_RE
        .captures_iter(blob)
        .filter_map(|c| Some((c[1].parse().ok()?, c[2].to_string())))
        .collect()
}

fn parse_resource_names(listing: &str) -> Vec<String> {
    let names: BTreeSet<String> = RESOURCE_NAME_RE
        .captures_iter(listing)
        .map(|c| c[1].to_uppercase())
        .collect();
    names.into_iter().collect()
}

/// `DialogStore` backed by an external decompiler executable.
///
/// Holds the run's write-once caches: the resource listing (one tool
/// invocation per run) and per-strref audio lookups, shared across dialog
/// variants because the underlying table does not change mid-run.
pub struct CommandStore<'a> {
    config: &'a RunConfig,
    ctx: &'a RunContext,
    resources: RefCell<Option<Vec<String>>>,
    audio_refs: RefCell<BTreeMap<u32, Option<String>>>,
    /// Basenames this run decompiled itself; pre-existing sources are
    /// never cleaned up.
    decompiled: RefCell<BTreeSet<String>>,
}

impl<'a> CommandStore<'a> {
    pub fn new(config: &'a RunConfig, ctx: &'a RunContext) -> Self {
        Self {
            config,
            ctx,
            resources: RefCell::new(None),
            audio_refs: RefCell::new(BTreeMap::new()),
            decompiled: RefCell::new(BTreeSet::new()),
        }
    }

    fn tool(&self) -> Command {
        let mut cmd = Command::new(&self.config.decompiler_exe);
        cmd.current_dir(&self.config.game_dir);
        cmd
    }

    fn run(&self, cmd: &mut Command) -> Result<std::process::Output, VoError> {
        log::debug!("decompiler: {cmd:?}");
        cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VoError::ToolNotFound(self.config.decompiler_exe.clone())
            } else {
                VoError::Io(e)
            }
        })
    }
}

impl DialogStore for CommandStore<'_> {
    fn list_resources(&self) -> Result<Vec<String>, VoError> {
        if let Some(cached) = self.resources.borrow().as_ref() {
            return Ok(cached.clone());
        }

        let mut cmd = self.tool();
        cmd.arg("--list-files");
        let output = self.run(&mut cmd)?;
        let text = combined_output(&output);
        if !output.status.success() && text.trim().is_empty() {
            return Err(VoError::Decompiler(format!(
                "resource listing exited with {} and no output",
                output.status
            )));
        }

        let names = parse_resource_names(&text);
        if names.is_empty() {
            log::warn!(
                "resource listing produced no dialog entries; variant discovery falls back to the base name"
            );
        } else {
            log::debug!("discovered {} dialog resource(s)", names.len());
        }
        *self.resources.borrow_mut() = Some(names.clone());
        Ok(names)
    }

    fn decompile(&self, name: &str) -> Result<DialogSource, VoError> {
        let base = name.to_uppercase();
        let d_path = self.config.game_dir.join(format!("{base}.D"));
        let tra_path = self.config.game_dir.join(format!("{base}.TRA"));

        let fresh = self.config.force_reextract || !(d_path.is_file() && tra_path.is_file());
        if fresh {
            let mut cmd = self.tool();
            cmd.args(["--trans", "--transref", "--use-lang"])
                .arg(&self.config.language)
                .arg(format!("{base}.DLG"));
            let output = self.run(&mut cmd)?;
            if !output.status.success() {
                return Err(VoError::Decompiler(format!(
                    "decompile of {base}.DLG exited with {}",
                    output.status
                )));
            }
            if !d_path.is_file() || !tra_path.is_file() {
                return Err(VoError::Decompiler(format!(
                    "decompiler ran but {} or {} is missing",
                    d_path.display(),
                    tra_path.display()
                )));
            }
            self.decompiled.borrow_mut().insert(base);
        } else {
            log::debug!("sources already present for {base}, skipping decompile");
        }

        Ok(DialogSource {
            script: read_lossy(&d_path)?,
            translations: read_lossy(&tra_path)?,
        })
    }

    fn table_dump(&self) -> Result<String, VoError> {
        let dump = &self.ctx.table_dump_path;
        if dump.is_file() && !self.config.force_redump_table {
            log::debug!("using existing string-table dump at {}", dump.display());
            return Ok(read_lossy(dump)?);
        }

        let table = &self.config.string_table_path;
        if !table.is_file() {
            return Err(VoError::Config(format!(
                "string table not found at {}",
                table.display()
            )));
        }
        if let Some(parent) = dump.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut cmd = self.tool();
        cmd.arg("--traify-tlk").arg(table).arg("--out").arg(dump);
        let output = self.run(&mut cmd)?;
        if !output.status.success() {
            return Err(VoError::Decompiler(format!(
                "string-table dump exited with {}",
                output.status
            )));
        }
        if !dump.is_file() {
            return Err(VoError::Decompiler(format!(
                "expected string-table dump at {} but it was not created",
                dump.display()
            )));
        }
        Ok(read_lossy(dump)?)
    }

    fn existing_audio(&self, strref: u32) -> Result<Option<String>, VoError> {
        if let Some(cached) = self.audio_refs.borrow().get(&strref) {
            return Ok(cached.clone());
        }

        let mut cmd = self.tool();
        cmd.arg("--use-lang")
            .arg(&self.config.language)
            .arg("--string")
            .arg(strref.to_string());
        let output = self.run(&mut cmd)?;
        let text = combined_output(&output);

        let sound = AUDIO_REF_RE
            .captures(&text)
            .map(|c| c[1].trim().to_string())
            .filter(|s| !s.is_empty());
        self.audio_refs.borrow_mut().insert(strref, sound.clone());
        Ok(sound)
    }

    fn cleanup(&self) {
        if !self.config.cleanup_sources {
            return;
        }
        for base in self.decompiled.borrow().iter() {
            for ext in ["D", "TRA"] {
                let path = self.config.game_dir.join(format!("{base}.{ext}"));
                if !path.exists() {
                    continue;
                }
                match std::fs::remove_file(&path) {
                    Ok(()) => log::debug!("cleaned decompiled {}", path.display()),
                    Err(e) => log::warn!("failed to remove {}: {e}", path.display()),
                }
            }
        }
    }
}

fn combined_output(output: &std::process::Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

fn read_lossy(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
