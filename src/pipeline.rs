//! End-to-end pipeline for one dialog.
//!
//! Single-threaded and synchronous: every synthesis submission blocks, and
//! outputs are never distributed before the count invariant is checked.
//! Anything that would leave the manifest referencing a missing asset
//! aborts before the manifest is written.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::adapter::DialogStore;
use crate::audio::{self, FadeSpec};
use crate::config::{RunConfig, RunContext, RunLog};
use crate::dedup::{self, StringTable};
use crate::error::VoError;
use crate::manifest;
use crate::plan::{self, DecisionProvider};
use crate::resolver::{self, Line};
use crate::schedule;
use crate::seeds::{self, Seed, SeedBank};
use crate::segment::{self, LineClass, Role, SegmentTask};
use crate::synth::{self, BatchRequest, SynthesisService};
use crate::{adapter, text};

/// File name of the packaging manifest inside the output tree.
pub const MANIFEST_FILE: &str = "manifest.json";
/// File name of the preview index inside the output tree.
pub const INDEX_FILE: &str = "vo_lines.json";

/// The full resolution/synthesis/assembly pipeline for one dialog.
pub struct VoPipeline<'a> {
    config: &'a RunConfig,
    ctx: &'a RunContext,
    store: &'a dyn DialogStore,
    synth: &'a dyn SynthesisService,
}

impl<'a> VoPipeline<'a> {
    pub fn new(
        config: &'a RunConfig,
        ctx: &'a RunContext,
        store: &'a dyn DialogStore,
        synth: &'a dyn SynthesisService,
    ) -> Self {
        Self {
            config,
            ctx,
            store,
            synth,
        }
    }

    /// Run the pipeline and return the final resolved set, in the order it
    /// was assembled (kept, then regenerated, then propagated duplicates).
    pub fn run(&self, decisions: &mut dyn DecisionProvider) -> Result<Vec<Line>, VoError> {
        std::fs::create_dir_all(&self.ctx.mod_dir)?;
        let run_log = RunLog::create(&self.ctx.log_path, &self.ctx.dialog)?;
        self.snapshot_string_table()?;

        let table = if self.config.dedup_enabled {
            let dump = self.store.table_dump()?;
            let table = StringTable::from_entries(adapter::parse_table_dump(&dump));
            log::debug!("string table parsed: {} entries", table.len());
            Some(table)
        } else {
            None
        };

        let lines = self.resolve_all_variants()?;
        if lines.is_empty() {
            self.store.cleanup();
            return Err(VoError::NoLines(self.ctx.dialog.clone()));
        }

        let bank = SeedBank::load(&self.ctx.ref_audio_dir, &self.config.fallback_transcript)?;
        let narrator = if self.config.narration_enabled {
            seeds::load_narrator_seed(&self.config.narrator_ref_dir)
        } else {
            None
        };
        let char_seed = bank.baseline().clone();

        // Decided before any synthesis touches the sounds directory.
        let first_run = self.ctx.is_first_run();

        let mut plan =
            plan::plan_generation(lines, self.ctx, self.config.ask_on_existing, decisions);
        plan::targeted_regeneration(&mut plan, decisions);
        let plan::Plan { keep, regen } = plan;

        let (narr_only, mut char_only, mixed) = if narrator.is_some() {
            split_by_class(regen)
        } else {
            (Vec::new(), regen, Vec::new())
        };

        let chunks = if first_run {
            log::debug!("no existing audio found: baseline mode enabled");
            schedule::baseline_chunk(&mut char_only, &bank, self.config)
        } else {
            schedule::build_chunks(&mut char_only, &bank, self.config, &mut rand::thread_rng())
        };
        synth::run_chunks(
            &chunks,
            &char_only,
            &bank,
            self.synth,
            self.config,
            self.ctx,
            &run_log,
        )?;

        let narr_only = match &narrator {
            Some(seed) => self.synthesize_narrator_only(narr_only, seed, &run_log)?,
            None => narr_only,
        };
        let mixed = match &narrator {
            Some(seed) => self.stitch_mixed(mixed, seed, &char_seed, &run_log)?,
            None => mixed,
        };

        let mut voiced = keep;
        voiced.extend(narr_only);
        voiced.extend(char_only);
        voiced.extend(mixed);

        if let Some(table) = &table {
            dedup::propagate_duplicates(&mut voiced, table, self.store)?;
        }
        if voiced.is_empty() {
            self.store.cleanup();
            return Err(VoError::NoLines(self.ctx.dialog.clone()));
        }

        let manifest = manifest::build_manifest(&self.ctx.dialog, &voiced);
        self.verify_assets(&manifest)?;
        manifest::write_manifest(&self.ctx.mod_dir.join(MANIFEST_FILE), &manifest)?;
        let index = manifest::build_index(&self.ctx.dialog, &voiced);
        manifest::write_index(&self.ctx.mod_dir.join(INDEX_FILE), &index)?;

        self.store.cleanup();
        log::info!(
            "{} line(s) in the final set, {} unique asset(s)",
            voiced.len(),
            manifest.assets.len()
        );
        Ok(voiced)
    }

    /// Resolve every variant of the dialog, deduplicating lines carried by
    /// more than one variant.
    fn resolve_all_variants(&self) -> Result<Vec<Line>, VoError> {
        let resources = self.store.list_resources()?;
        let variants = resolver::find_variants(&resources, &self.ctx.dialog);
        log::info!(
            "dialog variants for {}: {}",
            self.ctx.dialog,
            variants.join(", ")
        );

        let mut all_lines = Vec::new();
        for name in &variants {
            let source = self.store.decompile(name)?;
            let res =
                resolver::resolve_lines(&source, &self.ctx.voice_prefix, self.store, self.config)?;
            log::debug!("{name}: {} candidate line(s)", res.lines.len());
            all_lines.extend(res.lines);
        }

        let mut seen = HashSet::new();
        let lines: Vec<Line> = all_lines
            .into_iter()
            .filter(|l| seen.insert((l.strref, l.resref.clone())))
            .collect();
        if !lines.is_empty() {
            log::info!(
                "{} speakable line(s) need voice-over across {} variant(s)",
                lines.len(),
                variants.len()
            );
        }
        Ok(lines)
    }

    /// Generate narrator-only lines in one batch against the narrator
    /// voice at fixed baseline parameters. Lines whose text cleans to
    /// nothing are dropped from the final set, never left as dangling
    /// manifest entries.
    fn synthesize_narrator_only(
        &self,
        lines: Vec<Line>,
        seed: &Seed,
        run_log: &RunLog,
    ) -> Result<Vec<Line>, VoError> {
        if lines.is_empty() {
            return Ok(lines);
        }

        let dir = self.ctx.tmp_dir.join("narrator_only");
        synth::clear_stale_outputs(&dir)?;

        let mut kept = Vec::new();
        let mut texts = Vec::new();
        for line in lines {
            match text::clean_segment(&line.text) {
                Some(cleaned) => {
                    texts.push(cleaned);
                    kept.push(line);
                }
                None => log::warn!(
                    "narrator line strref {} cleans to nothing, dropped",
                    line.strref
                ),
            }
        }
        if kept.is_empty() {
            return Ok(kept);
        }

        run_log.append(&format!(
            "[narrator-only] lines={} cfg={:.3} steps={}",
            kept.len(),
            self.config.baseline_intensity,
            self.config.steps
        ));
        let outputs = self.synth.synthesize_batch(&BatchRequest {
            texts: &texts,
            seed,
            intensity: self.config.baseline_intensity,
            steps: self.config.steps,
            out_dir: &dir,
        })?;
        if outputs.len() != kept.len() {
            return Err(VoError::BatchMismatch {
                context: "narrator-only batch".to_string(),
                expected: kept.len(),
                got: outputs.len(),
            });
        }

        std::fs::create_dir_all(&self.ctx.sounds_dir)?;
        let fade = self.fade_spec();
        for (src, line) in outputs.iter().zip(&kept) {
            let target = self.ctx.sound_path(&line.resref);
            std::fs::rename(src, &target)?;
            audio::fade_wav_file(&target, &fade)?;
            run_log.append(&format!("[gen-narrator] {} <- strref={}", line.resref, line.strref));
        }
        log::debug!("narrator-only generation wrote {} wav(s)", kept.len());
        Ok(kept)
    }

    /// Synthesize mixed lines as two role batches, then reassemble each
    /// line's clips in segment order. Temp clips are removed after a
    /// successful assembly.
    fn stitch_mixed(
        &self,
        mixed: Vec<Line>,
        narrator: &Seed,
        char_seed: &Seed,
        run_log: &RunLog,
    ) -> Result<Vec<Line>, VoError> {
        if mixed.is_empty() {
            return Ok(mixed);
        }

        let tasks = segment::segment_tasks(&mixed);
        if tasks.is_empty() {
            log::debug!("narration stitching: no speakable mixed segments found");
            return Ok(Vec::new());
        }

        let char_tasks: Vec<&SegmentTask> =
            tasks.iter().filter(|t| t.role == Role::Character).collect();
        let narr_tasks: Vec<&SegmentTask> =
            tasks.iter().filter(|t| t.role == Role::Narrator).collect();

        let char_clips = self.run_segment_batch(&char_tasks, char_seed, Role::Character, run_log)?;
        let narr_clips = self.run_segment_batch(&narr_tasks, narrator, Role::Narrator, run_log)?;

        let mut clips_by_line: BTreeMap<usize, Vec<(usize, PathBuf)>> = BTreeMap::new();
        for (task, clip) in char_tasks
            .iter()
            .zip(&char_clips)
            .chain(narr_tasks.iter().zip(&narr_clips))
        {
            clips_by_line
                .entry(task.line_index)
                .or_default()
                .push((task.seg_order, clip.clone()));
        }

        std::fs::create_dir_all(&self.ctx.sounds_dir)?;
        let fade = self.fade_spec();
        let mut stitched = Vec::new();

        for (line_index, line) in mixed.into_iter().enumerate() {
            let Some(mut clips) = clips_by_line.remove(&line_index) else {
                log::warn!(
                    "mixed line strref {} has no speakable segments, dropped",
                    line.strref
                );
                continue;
            };
            clips.sort_by_key(|&(order, _)| order);
            let paths: Vec<PathBuf> = clips.into_iter().map(|(_, p)| p).collect();

            let target = self.ctx.sound_path(&line.resref);
            audio::concat_wavs(&paths, &target)?;
            audio::fade_wav_file(&target, &fade)?;
            for path in &paths {
                let _ = std::fs::remove_file(path);
            }
            run_log.append(&format!(
                "[stitch] {} <- {} segment(s), strref={}",
                line.resref,
                paths.len(),
                line.strref
            ));
            stitched.push(line);
        }

        log::debug!("narration stitching rebuilt {} line(s)", stitched.len());
        Ok(stitched)
    }

    /// One role batch over segment tasks. Outputs are renamed to stable
    /// per-segment names so the second role batch cannot clobber them.
    fn run_segment_batch(
        &self,
        tasks: &[&SegmentTask],
        seed: &Seed,
        role: Role,
        run_log: &RunLog,
    ) -> Result<Vec<PathBuf>, VoError> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let role_dir = self.ctx.tmp_dir.join(role.label());
        synth::clear_stale_outputs(&role_dir)?;

        let texts: Vec<String> = tasks.iter().map(|t| t.text.clone()).collect();
        run_log.append(&format!(
            "[stitch-{}] segments={} cfg={:.3} steps={}",
            role.label(),
            tasks.len(),
            self.config.baseline_intensity,
            self.config.steps
        ));
        let outputs = self.synth.synthesize_batch(&BatchRequest {
            texts: &texts,
            seed,
            intensity: self.config.baseline_intensity,
            steps: self.config.steps,
            out_dir: &role_dir,
        })?;
        if outputs.len() != tasks.len() {
            return Err(VoError::BatchMismatch {
                context: format!("{} segment batch", role.label()),
                expected: tasks.len(),
                got: outputs.len(),
            });
        }

        let mut clips = Vec::with_capacity(outputs.len());
        for (src, task) in outputs.iter().zip(tasks) {
            let dst = role_dir.join(format!(
                "stitch_{}_{:02}_{}.wav",
                task.strref,
                task.seg_order,
                role.label()
            ));
            std::fs::rename(src, &dst)?;
            clips.push(dst);
        }
        Ok(clips)
    }

    /// Snapshot the live string table and restore it from the baseline
    /// backup, so repeated runs always start from the same table state.
    fn snapshot_string_table(&self) -> Result<(), VoError> {
        let table = &self.config.string_table_path;
        if !table.is_file() {
            return Err(VoError::Config(format!(
                "string table not found at {}",
                table.display()
            )));
        }
        let name = table
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "table".to_string());

        let backup_dir = self.ctx.mod_dir.join("backup");
        std::fs::create_dir_all(&backup_dir)?;

        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        std::fs::copy(table, backup_dir.join(format!("snapshot_{stamp}_{name}")))?;

        let baseline = backup_dir.join(format!("baseline_{name}"));
        if baseline.exists() {
            std::fs::copy(&baseline, table)?;
            log::debug!("restored string table from baseline backup");
        } else {
            std::fs::copy(table, &baseline)?;
            log::debug!("created baseline string-table backup");
        }
        Ok(())
    }

    /// Abort before writing a manifest that references a missing asset.
    fn verify_assets(&self, manifest: &manifest::Manifest) -> Result<(), VoError> {
        for record in &manifest.assets {
            let path = self.ctx.sound_path(&record.resref);
            if !path.is_file() {
                return Err(VoError::Manifest(format!(
                    "asset {} missing at {}",
                    record.resref,
                    path.display()
                )));
            }
        }
        Ok(())
    }

    fn fade_spec(&self) -> FadeSpec {
        FadeSpec {
            fade_in_ms: self.config.fade_in_ms,
            fade_out_ms: self.config.fade_out_ms,
        }
    }
}

/// Split regeneration lines by scheduling category.
fn split_by_class(lines: Vec<Line>) -> (Vec<Line>, Vec<Line>, Vec<Line>) {
    let mut narr_only = Vec::new();
    let mut char_only = Vec::new();
    let mut mixed = Vec::new();

    for line in lines {
        match segment::classify(&line.text) {
            LineClass::NarratorOnly => narr_only.push(line),
            LineClass::CharacterOnly => char_only.push(line),
            LineClass::Mixed => mixed.push(line),
        }
    }
    log::debug!(
        "regen lines: {} narrator-only, {} character-only, {} mixed",
        narr_only.len(),
        char_only.len(),
        mixed.len()
    );
    (narr_only, char_only, mixed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::DialogSource;
    use crate::config::RunConfigBuilder;
    use crate::plan::AcceptExisting;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::cell::Cell;
    use std::path::Path;

    struct ScriptedStore {
        resources: Vec<String>,
        sources: BTreeMap<String, DialogSource>,
        dump: String,
    }

    impl DialogStore for ScriptedStore {
        fn list_resources(&self) -> Result<Vec<String>, VoError> {
            Ok(self.resources.clone())
        }
        fn decompile(&self, name: &str) -> Result<DialogSource, VoError> {
            Ok(self.sources.get(name).cloned().unwrap_or_default())
        }
        fn table_dump(&self) -> Result<String, VoError> {
            Ok(self.dump.clone())
        }
        fn existing_audio(&self, _strref: u32) -> Result<Option<String>, VoError> {
            Ok(None)
        }
    }

    struct CountingSynth {
        batches: Cell<usize>,
    }

    impl SynthesisService for CountingSynth {
        fn synthesize_batch(&self, request: &BatchRequest) -> Result<Vec<PathBuf>, VoError> {
            self.batches.set(self.batches.get() + 1);
            std::fs::create_dir_all(request.out_dir)?;
            let spec = WavSpec {
                channels: 1,
                sample_rate: 8000,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            };
            let mut outputs = Vec::new();
            for i in 0..request.texts.len() {
                let path = request.out_dir.join(format!("batch_{i:03}.wav"));
                let mut writer = WavWriter::create(&path, spec).expect("create wav");
                for _ in 0..64 {
                    writer.write_sample(800i16).expect("write sample");
                }
                writer.finalize().expect("finalize wav");
                outputs.push(path);
            }
            Ok(outputs)
        }
    }

    fn fixture(tmp: &Path) -> (crate::config::RunConfig, RunContext) {
        let game_dir = tmp.join("game");
        std::fs::create_dir_all(&game_dir).expect("mkdir game");
        std::fs::write(game_dir.join("dialog.tlk"), b"table bytes").expect("touch table");

        let seed_dir = tmp.join("voices/testnpc_refs");
        std::fs::create_dir_all(&seed_dir).expect("mkdir seeds");
        std::fs::write(seed_dir.join("s0.wav"), b"").expect("touch wav");
        std::fs::write(seed_dir.join("s0.txt"), "seed transcript").expect("touch txt");

        let narrator_dir = tmp.join("voices/narrator_refs");
        std::fs::create_dir_all(&narrator_dir).expect("mkdir narrator");
        std::fs::write(narrator_dir.join("n0.wav"), b"").expect("touch wav");
        std::fs::write(narrator_dir.join("n0.txt"), "narrator transcript").expect("touch txt");

        let config = RunConfigBuilder::default()
            .game_dir(game_dir.clone())
            .out_root(tmp.join("out"))
            .ref_base_dir(tmp.join("voices"))
            .narrator_ref_dir(narrator_dir)
            .decompiler_exe(game_dir.join("decomp"))
            .string_table_path(game_dir.join("dialog.tlk"))
            .build()
            .expect("all required fields set");
        let ctx = RunContext::new(&config, "TESTNPC").expect("valid dialog name");
        (config, ctx)
    }

    fn store() -> ScriptedStore {
        let script = "SAY @1\nSAY @2\nSAY @3\n".to_string();
        let translations = "\
@1 = #1001 /* ~\"Wait here.\"~ */\n\
@2 = #1002 /* ~He nods. \"Good.\" He leaves.~ */\n\
@3 = #1003 /* ~Plain speech with no quotes at all.~ */\n"
            .to_string();
        ScriptedStore {
            resources: vec!["TESTNPC".to_string()],
            sources: [(
                "TESTNPC".to_string(),
                DialogSource {
                    script,
                    translations,
                },
            )]
            .into_iter()
            .collect(),
            // strref 5005 duplicates 1001's text and must join the set.
            dump: "\
@1001 = ~\"Wait here.\"~\n\
@1002 = ~He nods. \"Good.\" He leaves.~\n\
@1003 = ~Plain speech with no quotes at all.~\n\
@5005 = ~\"Wait  here.\"~\n"
                .to_string(),
        }
    }

    #[test]
    fn full_run_produces_assets_manifest_and_duplicates() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (config, ctx) = fixture(tmp.path());
        let store = store();
        let synth = CountingSynth {
            batches: Cell::new(0),
        };

        let pipeline = VoPipeline::new(&config, &ctx, &store, &synth);
        let voiced = pipeline.run(&mut AcceptExisting).expect("pipeline runs");

        // 3 resolved lines + 1 propagated duplicate.
        assert_eq!(voiced.len(), 4);
        let mut strrefs: Vec<u32> = voiced.iter().map(|l| l.strref).collect();
        strrefs.sort_unstable();
        assert_eq!(strrefs, vec![1001, 1002, 1003, 5005]);

        // The duplicate shares 1001's asset; no extra synthesis ran for it:
        // one character chunk + one character-segment batch + one
        // narrator-segment batch.
        assert_eq!(synth.batches.get(), 3);
        let dup = voiced.iter().find(|l| l.strref == 5005).expect("duplicate");
        let orig = voiced.iter().find(|l| l.strref == 1001).expect("original");
        assert_eq!(dup.resref, orig.resref);

        // Assets exist for every unique resref named by the manifest.
        let manifest_json: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(ctx.mod_dir.join(MANIFEST_FILE)).expect("manifest written"),
        )
        .expect("valid json");
        let assets = manifest_json["assets"].as_array().expect("assets array");
        assert_eq!(assets.len(), 3);
        for asset in assets {
            let resref = asset["resref"].as_str().expect("resref");
            assert!(ctx.sound_path(resref).is_file(), "{resref}");
        }

        // Preview index is ordered by strref.
        let index_json: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(ctx.mod_dir.join(INDEX_FILE)).expect("index written"),
        )
        .expect("valid json");
        let entries = index_json["entries"].as_array().expect("entries array");
        let order: Vec<u64> = entries
            .iter()
            .map(|e| e["strref"].as_u64().expect("strref"))
            .collect();
        assert_eq!(order, vec![1001, 1002, 1003, 5005]);
    }

    #[test]
    fn second_run_keeps_existing_assets_without_new_synthesis() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (config, ctx) = fixture(tmp.path());
        let store = store();

        let first = CountingSynth {
            batches: Cell::new(0),
        };
        VoPipeline::new(&config, &ctx, &store, &first)
            .run(&mut AcceptExisting)
            .expect("first run");
        assert!(first.batches.get() > 0);

        let second = CountingSynth {
            batches: Cell::new(0),
        };
        let voiced = VoPipeline::new(&config, &ctx, &store, &second)
            .run(&mut AcceptExisting)
            .expect("second run");

        // Everything already has audio, so the provider keeps it all and
        // no batch is submitted. The final set is unchanged.
        assert_eq!(second.batches.get(), 0);
        assert_eq!(voiced.len(), 4);
    }

    #[test]
    fn run_fails_when_nothing_resolves() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (config, ctx) = fixture(tmp.path());
        let store = ScriptedStore {
            resources: Vec::new(),
            sources: BTreeMap::new(),
            dump: String::new(),
        };
        let synth = CountingSynth {
            batches: Cell::new(0),
        };

        let err = VoPipeline::new(&config, &ctx, &store, &synth)
            .run(&mut AcceptExisting)
            .expect_err("no lines must fail");
        assert!(matches!(err, VoError::NoLines(_)));
    }
}
