//! WAV concatenation and edge fades.
//!
//! Assembly is strict: every clip in a concatenation must share the same
//! channel count, sample width, sample rate, and sample format, and a
//! mismatch aborts rather than coercing. Fades are tolerant: unsupported
//! formats leave the file untouched.

use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::error::VoError;

/// Edge-fade durations, in milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct FadeSpec {
    pub fade_in_ms: u32,
    pub fade_out_ms: u32,
}

impl FadeSpec {
    pub fn is_noop(&self) -> bool {
        self.fade_in_ms == 0 && self.fade_out_ms == 0
    }
}

enum SampleBuf {
    Int(Vec<i32>),
    Float(Vec<f32>),
}

fn read_wav(path: &Path) -> Result<(WavSpec, SampleBuf), VoError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let buf = match spec.sample_format {
        SampleFormat::Int => SampleBuf::Int(reader.samples::<i32>().collect::<Result<_, _>>()?),
        SampleFormat::Float => SampleBuf::Float(reader.samples::<f32>().collect::<Result<_, _>>()?),
    };
    Ok((spec, buf))
}

fn write_wav(path: &Path, spec: WavSpec, buf: &SampleBuf) -> Result<(), VoError> {
    let mut writer = WavWriter::create(path, spec)?;
    match buf {
        SampleBuf::Int(samples) => {
            for &s in samples {
                writer.write_sample(s)?;
            }
        }
        SampleBuf::Float(samples) => {
            for &s in samples {
                writer.write_sample(s)?;
            }
        }
    }
    writer.finalize()?;
    Ok(())
}

fn describe_spec(spec: &WavSpec) -> String {
    format!(
        "{}ch {}Hz {}bit {:?}",
        spec.channels, spec.sample_rate, spec.bits_per_sample, spec.sample_format
    )
}

/// Concatenate per-segment clips, in order, into one output asset.
pub fn concat_wavs(paths: &[PathBuf], out_path: &Path) -> Result<(), VoError> {
    let Some((first, rest)) = paths.split_first() else {
        return Ok(());
    };
    let (spec, mut combined) = read_wav(first)?;

    for path in rest {
        let (clip_spec, clip) = read_wav(path)?;
        if clip_spec != spec {
            return Err(VoError::FormatMismatch {
                path: path.clone(),
                got: describe_spec(&clip_spec),
                expected: describe_spec(&spec),
            });
        }
        match (&mut combined, clip) {
            (SampleBuf::Int(dst), SampleBuf::Int(src)) => dst.extend(src),
            (SampleBuf::Float(dst), SampleBuf::Float(src)) => dst.extend(src),
            _ => unreachable!("spec equality implies matching sample formats"),
        }
    }

    write_wav(out_path, spec, &combined)
}

/// Linear edge fades as a pure transform over interleaved samples.
///
/// Amplitude ramps 0 to 1 over the fade-in window and 1 to 0 over the
/// fade-out window. Both windows are clamped to half the clip, so a clip
/// shorter than twice the configured fade degrades to half-length fades.
/// Scaling is per channel on integer sample amplitudes.
pub fn fade_samples(samples: &mut [i32], channels: u16, sample_rate: u32, spec: &FadeSpec) {
    let channels = channels.max(1) as usize;
    let total_frames = samples.len() / channels;
    if total_frames == 0 {
        return;
    }

    let half = total_frames / 2;
    let fade_in_frames = frames_for(spec.fade_in_ms, sample_rate).min(half);
    let fade_out_frames = frames_for(spec.fade_out_ms, sample_rate).min(half);

    for i in 0..fade_in_frames {
        let factor = i as f64 / fade_in_frames as f64;
        scale_frame(samples, i, channels, factor);
    }
    for i in 0..fade_out_frames {
        let factor = (fade_out_frames - i) as f64 / fade_out_frames as f64;
        scale_frame(samples, total_frames - fade_out_frames + i, channels, factor);
    }
}

fn frames_for(ms: u32, sample_rate: u32) -> usize {
    (sample_rate as u64 * ms as u64 / 1000) as usize
}

fn scale_frame(samples: &mut [i32], frame: usize, channels: usize, factor: f64) {
    for c in 0..channels {
        if let Some(s) = samples.get_mut(frame * channels + c) {
            *s = (*s as f64 * factor) as i32;
        }
    }
}

/// Apply edge fades to a finished asset in place.
///
/// Only 16-bit integer PCM is supported; anything else leaves the file
/// untouched (logged, not an error). Missing files are ignored.
pub fn fade_wav_file(path: &Path, spec: &FadeSpec) -> Result<(), VoError> {
    if spec.is_noop() || !path.is_file() {
        return Ok(());
    }

    let mut reader = WavReader::open(path)?;
    let wav_spec = reader.spec();
    if wav_spec.sample_format != SampleFormat::Int || wav_spec.bits_per_sample != 16 {
        log::debug!(
            "skipping fade on {}: unsupported format ({})",
            path.display(),
            describe_spec(&wav_spec)
        );
        return Ok(());
    }

    let mut samples: Vec<i32> = reader.samples::<i32>().collect::<Result<_, _>>()?;
    drop(reader);

    fade_samples(&mut samples, wav_spec.channels, wav_spec.sample_rate, spec);
    write_wav(path, wav_spec, &SampleBuf::Int(samples))
}
