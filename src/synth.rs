//! Synthesis boundary and chunk execution.
//!
//! The engine is a black box: N texts plus one reference voice in, N audio
//! files out, consumable in lexicographic filename order as positionally
//! corresponding to input order. Everything here enforces that contract;
//! nothing downstream sees a chunk whose output count is wrong.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::audio::{self, FadeSpec};
use crate::config::{RunConfig, RunContext, RunLog};
use crate::error::VoError;
use crate::resolver::Line;
use crate::schedule::SynthesisChunk;
use crate::seeds::{Seed, SeedBank};

/// One synthesis submission: N texts against one reference voice.
#[derive(Debug)]
pub struct BatchRequest<'a> {
    pub texts: &'a [String],
    pub seed: &'a Seed,
    pub intensity: f32,
    pub steps: u32,
    pub out_dir: &'a Path,
}

/// Black-box batch synthesis.
pub trait SynthesisService {
    /// Synthesize every text in the request into `out_dir`, returning the
    /// output paths in input order. Blocking; there is no cancellation
    /// mid-batch.
    fn synthesize_batch(&self, request: &BatchRequest) -> Result<Vec<PathBuf>, VoError>;
}

/// `SynthesisService` backed by the configured synthesis CLI.
pub struct SynthCommand<'a> {
    config: &'a RunConfig,
    input_txt: PathBuf,
}

impl<'a> SynthCommand<'a> {
    pub fn new(config: &'a RunConfig, ctx: &RunContext) -> Self {
        Self {
            config,
            input_txt: ctx.input_txt.clone(),
        }
    }
}

impl SynthesisService for SynthCommand<'_> {
    fn synthesize_batch(&self, request: &BatchRequest) -> Result<Vec<PathBuf>, VoError> {
        std::fs::create_dir_all(request.out_dir)?;
        if let Some(parent) = self.input_txt.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.input_txt, request.texts.join("\n"))?;

        let mut cmd = Command::new(&self.config.synth_program);
        cmd.arg("--input")
            .arg(&self.input_txt)
            .arg("--output-dir")
            .arg(request.out_dir)
            .arg("--prompt-audio")
            .arg(&request.seed.audio)
            .arg("--prompt-text")
            .arg(&request.seed.transcript)
            .arg("--cfg-value")
            .arg(format!("{:.3}", request.intensity))
            .arg("--inference-timesteps")
            .arg(request.steps.to_string());
        if self.config.normalize {
            cmd.arg("--normalize");
        }
        if self.config.denoise {
            cmd.arg("--denoise");
        }

        log::debug!("synthesis: {cmd:?}");
        let status = cmd.status().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VoError::Synthesis(format!(
                    "synthesis program not found: {}",
                    self.config.synth_program
                ))
            } else {
                VoError::Io(e)
            }
        })?;
        if !status.success() {
            return Err(VoError::Synthesis(format!(
                "synthesis command exited with {status}"
            )));
        }

        collect_wavs(request.out_dir)
    }
}

/// Wav files in a directory, sorted by file name.
pub fn collect_wavs(dir: &Path) -> Result<Vec<PathBuf>, VoError> {
    let mut wavs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_wav = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
        if is_wav {
            wavs.push(path);
        }
    }
    wavs.sort();
    Ok(wavs)
}

/// Delete stale wav output from a previous (possibly failed) submission.
///
/// A residual file must never be mistaken for fresh output, so this runs
/// before every submission.
pub fn clear_stale_outputs(dir: &Path) -> Result<(), VoError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        return Ok(());
    }
    for wav in collect_wavs(dir)? {
        match std::fs::remove_file(&wav) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(VoError::Io(e)),
        }
    }
    Ok(())
}

/// Run every chunk: clear the temp directory, submit, verify the output
/// count, then move each output into the sounds directory and fade it.
///
/// A count mismatch aborts before any file is moved; partial audio sets
/// would leave an inconsistent manifest.
pub fn run_chunks(
    chunks: &[SynthesisChunk],
    lines: &[Line],
    bank: &SeedBank,
    service: &dyn SynthesisService,
    config: &RunConfig,
    ctx: &RunContext,
    run_log: &RunLog,
) -> Result<(), VoError> {
    let fade = FadeSpec {
        fade_in_ms: config.fade_in_ms,
        fade_out_ms: config.fade_out_ms,
    };

    for chunk in chunks {
        clear_stale_outputs(&ctx.tmp_dir)?;

        let seed = bank.get(&chunk.seed_key).ok_or_else(|| {
            VoError::Config(format!("no seed loaded for key '{}'", chunk.seed_key))
        })?;
        let texts: Vec<String> = chunk
            .items
            .iter()
            .map(|&i| lines[i].tts_text.clone())
            .collect();

        log::debug!(
            "synthesizing chunk: seed '{}' cfg={:.3} steps={} lines={}",
            chunk.seed_key,
            chunk.intensity,
            chunk.steps,
            chunk.items.len()
        );
        run_log.append(&format!(
            "[chunk] seed={} cfg={:.3} steps={} lines={}",
            chunk.seed_key,
            chunk.intensity,
            chunk.steps,
            chunk.items.len()
        ));

        let outputs = service.synthesize_batch(&BatchRequest {
            texts: &texts,
            seed,
            intensity: chunk.intensity,
            steps: chunk.steps,
            out_dir: &ctx.tmp_dir,
        })?;
        if outputs.len() != chunk.items.len() {
            return Err(VoError::BatchMismatch {
                context: format!("chunk for seed '{}'", chunk.seed_key),
                expected: chunk.items.len(),
                got: outputs.len(),
            });
        }

        std::fs::create_dir_all(&ctx.sounds_dir)?;
        for (src, &idx) in outputs.iter().zip(&chunk.items) {
            let line = &lines[idx];
            let target = ctx.sound_path(&line.resref);
            std::fs::rename(src, &target)?;
            audio::fade_wav_file(&target, &fade)?;
            run_log.append(&format!(
                "[gen] {} <- seed={} cfg={:.3} steps={} strref={}",
                line.resref, chunk.seed_key, chunk.intensity, chunk.steps, line.strref
            ));
        }
        log::debug!(
            "wrote {} wav(s) into {}",
            chunk.items.len(),
            ctx.sounds_dir.display()
        );
    }

    Ok(())
}
