//! Run configuration and per-dialog context.
//!
//! `RunConfig` is built once, is immutable, and is passed by reference to
//! every component. Everything derived from the dialog being processed
//! (identity prefix, output tree, chosen seed directory) lives in
//! `RunContext`, created once per invocation.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use derive_builder::Builder;

use crate::error::VoError;

/// Transcript paired with a seed bank that is a bare audio file.
pub const DEFAULT_SEED_TRANSCRIPT: &str =
    "Hey, chief. You okay? You playing corpse or you putting the blinds on the Dusties? \
     I thought you was a deader for sure.";

/// Immutable configuration for one pipeline run.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct RunConfig {
    /// Game installation root; the decompiler runs from here.
    pub game_dir: PathBuf,
    /// Root directory for generated output trees.
    pub out_root: PathBuf,
    /// Base directory holding `<voice>_refs` seed directories.
    pub ref_base_dir: PathBuf,
    /// Narrator reference directory (or a single reference file).
    pub narrator_ref_dir: PathBuf,
    /// Decompiler executable.
    pub decompiler_exe: PathBuf,
    /// Live string-table file, snapshotted before each run.
    pub string_table_path: PathBuf,
    /// Language folder the decompiler resolves strings against.
    #[builder(default = "\"en_us\".to_string()")]
    pub language: String,
    /// Synthesis CLI program.
    #[builder(default = "\"voxcpm\".to_string()")]
    pub synth_program: String,

    /// Never touch lines that already carry an audio reference in the table.
    #[builder(default = "true")]
    pub respect_existing_audio: bool,
    /// Ask per line when an asset already exists on disk.
    #[builder(default = "true")]
    pub ask_on_existing: bool,
    /// Propagate resolutions to text-identical string-table entries.
    #[builder(default = "true")]
    pub dedup_enabled: bool,
    /// Stitch mixed narrator/character lines from segment audio.
    #[builder(default = "true")]
    pub narration_enabled: bool,
    /// Remove decompiled sources created by this run.
    #[builder(default = "true")]
    pub cleanup_sources: bool,
    /// Re-decompile even when sources are already on disk.
    #[builder(default = "false")]
    pub force_reextract: bool,
    /// Re-dump the string table even when a dump is already on disk.
    #[builder(default = "false")]
    pub force_redump_table: bool,

    /// Inclusive range the per-line guidance intensity is drawn from.
    /// A single-point range yields a fixed value.
    #[builder(default = "1.7")]
    pub intensity_min: f32,
    #[builder(default = "1.7")]
    pub intensity_max: f32,
    /// Intensity for baseline, narrator, and segment batches.
    #[builder(default = "1.8")]
    pub baseline_intensity: f32,
    /// Default inference step count.
    #[builder(default = "15")]
    pub steps: u32,
    /// Consecutive lines assigned to one seed before rotating to the next.
    #[builder(default = "20")]
    pub seed_group_size: usize,
    /// Edge fades applied to every finished asset, in milliseconds.
    #[builder(default = "10")]
    pub fade_in_ms: u32,
    #[builder(default = "10")]
    pub fade_out_ms: u32,
    /// Ask the synthesis engine to normalize / denoise its output.
    #[builder(default = "true")]
    pub normalize: bool,
    #[builder(default = "true")]
    pub denoise: bool,
    /// Transcript used when a seed bank is a bare audio file.
    #[builder(default = "DEFAULT_SEED_TRANSCRIPT.to_string()")]
    pub fallback_transcript: String,
}

/// Per-dialog derived state, created once per invocation.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Uppercased dialog base name.
    pub dialog: String,
    /// Voice identity prefix derived from the dialog name.
    pub voice_prefix: String,
    /// Seed directory chosen for this dialog.
    pub ref_audio_dir: PathBuf,
    /// Root of this dialog's generated output tree.
    pub mod_dir: PathBuf,
    /// Finished per-line audio assets.
    pub sounds_dir: PathBuf,
    /// Scratch directory for raw synthesis output.
    pub tmp_dir: PathBuf,
    /// Newline-joined batch input handed to the synthesis CLI.
    pub input_txt: PathBuf,
    /// Per-run event log.
    pub log_path: PathBuf,
    /// Cached whole-table dump location.
    pub table_dump_path: PathBuf,
}

impl RunContext {
    pub fn new(config: &RunConfig, dialog_name: &str) -> Result<Self, VoError> {
        let mut dialog = dialog_name.trim().to_uppercase();
        if dialog.is_empty() {
            return Err(VoError::Config("no dialog name provided".to_string()));
        }
        if let Some(stripped) = dialog.strip_suffix(".DLG") {
            dialog = stripped.to_string();
        }

        let voice_prefix = derive_voice_prefix(&dialog);
        let ref_audio_dir = choose_ref_dir(&config.ref_base_dir, &dialog, &voice_prefix);

        let subdir = format!("autovo_{}", dialog.to_lowercase());
        let mod_dir = config.out_root.join(&subdir);

        Ok(Self {
            voice_prefix,
            ref_audio_dir,
            sounds_dir: mod_dir.join("sounds"),
            tmp_dir: mod_dir.join("tmp_batch"),
            input_txt: mod_dir.join(format!("{subdir}_input.txt")),
            log_path: mod_dir.join(format!("{subdir}_run.log")),
            table_dump_path: mod_dir.join("dialog_full.tra"),
            mod_dir,
            dialog,
        })
    }

    /// On-disk location of one finished asset.
    pub fn sound_path(&self, resref: &str) -> PathBuf {
        self.sounds_dir.join(format!("{resref}.wav"))
    }

    /// True when no generated audio exists yet for this dialog.
    pub fn is_first_run(&self) -> bool {
        let Ok(entries) = std::fs::read_dir(&self.sounds_dir) else {
            return true;
        };
        !entries.flatten().any(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| x.eq_ignore_ascii_case("wav"))
        })
    }
}

/// Drop a leading `D` when the next character is alphabetic; dialog
/// resources conventionally prefix the speaker's name with `D`.
fn derive_voice_prefix(dialog: &str) -> String {
    let mut chars = dialog.chars();
    match (chars.next(), chars.next()) {
        (Some('D'), Some(second)) if second.is_alphabetic() => dialog[1..].to_string(),
        _ => dialog.to_string(),
    }
}

/// Prefer `<dialog>_refs`, then `<prefix>_refs`; fall back to the dialog
/// path so the error names the directory the operator should create.
fn choose_ref_dir(base: &Path, dialog: &str, voice_prefix: &str) -> PathBuf {
    let dialog_dir = base.join(format!("{}_refs", dialog.to_lowercase()));
    let prefix_dir = base.join(format!("{}_refs", voice_prefix.to_lowercase()));

    for candidate in [&dialog_dir, &prefix_dir] {
        if candidate.exists() {
            log::debug!("using voice ref dir {}", candidate.display());
            return candidate.clone();
        }
    }
    log::debug!(
        "voice ref dir does not exist yet, will use {}",
        dialog_dir.display()
    );
    dialog_dir
}

/// Append-only per-run log file recording chunk submissions and every
/// generated asset.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    /// Truncate and stamp the log for a fresh run.
    pub fn create(path: &Path, dialog: &str) -> Result<Self, VoError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        std::fs::write(path, format!("autovo run for {dialog} at unix {stamp}\n"))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Append one event line. Failures are logged, never fatal.
    pub fn append(&self, line: &str) {
        use std::io::Write;
        let result = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            log::warn!("run log write failed: {e}");
        }
    }
}
