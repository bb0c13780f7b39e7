//! Reference-voice seed banks.
//!
//! A seed is an audio sample paired with the transcript of that sample;
//! synthesis is conditioned on the pair to imitate the voice. Banks are
//! loaded once per run and read-only afterward.

use std::path::{Path, PathBuf};

use crate::error::VoError;

/// Transcript substituted when a narrator reference ships without one.
const NARRATOR_FALLBACK_TRANSCRIPT: &str = "Narrator voice reference.";

/// One reference voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    /// Identifying key (the audio file stem).
    pub key: String,
    pub audio: PathBuf,
    pub transcript: String,
}

/// The rotating bank of reference voices for one dialog.
#[derive(Debug)]
pub struct SeedBank {
    seeds: Vec<Seed>,
}

impl SeedBank {
    /// Load `(wav, txt)` pairs from a directory, or accept a single audio
    /// file with the configured fallback transcript.
    ///
    /// An empty bank or an empty transcript file fails the run before any
    /// synthesis is attempted.
    pub fn load(path: &Path, fallback_transcript: &str) -> Result<Self, VoError> {
        if path.is_file() {
            log::debug!("seed bank: single file {}", path.display());
            return Ok(Self {
                seeds: vec![Seed {
                    key: stem_of(path),
                    audio: path.to_path_buf(),
                    transcript: fallback_transcript.to_string(),
                }],
            });
        }
        if !path.is_dir() {
            return Err(VoError::SeedBank {
                dir: path.to_path_buf(),
                reason: "not found or not a directory".to_string(),
            });
        }

        let mut seeds = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let wav = entry?.path();
            if !wav.is_file() || !has_wav_ext(&wav) {
                continue;
            }
            let txt = wav.with_extension("txt");
            if !txt.is_file() {
                continue;
            }
            let transcript = read_lossy(&txt)?.trim().to_string();
            if transcript.is_empty() {
                return Err(VoError::SeedBank {
                    dir: path.to_path_buf(),
                    reason: format!("transcript file is empty: {}", txt.display()),
                });
            }
            seeds.push(Seed {
                key: stem_of(&wav),
                audio: wav,
                transcript,
            });
        }

        if seeds.is_empty() {
            return Err(VoError::SeedBank {
                dir: path.to_path_buf(),
                reason: "no (wav, txt) seed pairs found".to_string(),
            });
        }
        seeds.sort_by(|a, b| a.key.cmp(&b.key));
        log::debug!("seed bank: {} seed(s) loaded from {}", seeds.len(), path.display());
        Ok(Self { seeds })
    }

    /// Seed keys in rotation order.
    pub fn keys(&self) -> Vec<&str> {
        self.seeds.iter().map(|s| s.key.as_str()).collect()
    }

    pub fn get(&self, key: &str) -> Option<&Seed> {
        self.seeds.iter().find(|s| s.key == key)
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    /// The lexicographically first sample anchors first-run voice identity.
    pub fn baseline(&self) -> &Seed {
        self.seeds
            .iter()
            .min_by_key(|s| file_name_lower(&s.audio))
            .expect("bank is never empty")
    }
}

/// Load the fixed narrator reference, if one is present.
///
/// `None` disables narration stitching for the run; that is a feature
/// toggle, not an error.
pub fn load_narrator_seed(path: &Path) -> Option<Seed> {
    if path.is_file() {
        let txt = path.with_extension("txt");
        let transcript = read_transcript_or_fallback(&txt);
        log::debug!("narrator seed (single file): {}", path.display());
        return Some(Seed {
            key: stem_of(path),
            audio: path.to_path_buf(),
            transcript,
        });
    }
    if !path.is_dir() {
        log::debug!(
            "narrator refs {} not found; narration stitching disabled",
            path.display()
        );
        return None;
    }

    let mut wavs: Vec<PathBuf> = std::fs::read_dir(path)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_wav_ext(p))
        .collect();
    wavs.sort();

    for wav in wavs {
        let txt = wav.with_extension("txt");
        if !txt.is_file() {
            continue;
        }
        let transcript = read_transcript_or_fallback(&txt);
        log::debug!("narrator seed selected: {}", wav.display());
        return Some(Seed {
            key: stem_of(&wav),
            audio: wav,
            transcript,
        });
    }

    log::debug!(
        "no (wav, txt) pairs in {}; narration stitching disabled",
        path.display()
    );
    None
}

fn read_transcript_or_fallback(txt: &Path) -> String {
    match read_lossy(txt) {
        Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => NARRATOR_FALLBACK_TRANSCRIPT.to_string(),
    }
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_name_lower(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn has_wav_ext(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
}

fn read_lossy(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path, contents: &str) {
        std::fs::write(path, contents).expect("write fixture");
    }

    #[test]
    fn loads_pairs_and_sorts_by_key() {
        let tmp = tempfile::tempdir().expect("tempdir");
        touch(&tmp.path().join("b.wav"), "");
        touch(&tmp.path().join("b.txt"), "second sample");
        touch(&tmp.path().join("a.wav"), "");
        touch(&tmp.path().join("a.txt"), "first sample");
        // No transcript, ignored.
        touch(&tmp.path().join("c.wav"), "");

        let bank = SeedBank::load(tmp.path(), "fallback").expect("bank loads");
        assert_eq!(bank.keys(), vec!["a", "b"]);
        assert_eq!(bank.baseline().key, "a");
    }

    #[test]
    fn empty_transcript_fails_loading() {
        let tmp = tempfile::tempdir().expect("tempdir");
        touch(&tmp.path().join("a.wav"), "");
        touch(&tmp.path().join("a.txt"), "   ");
        assert!(matches!(
            SeedBank::load(tmp.path(), "fallback"),
            Err(VoError::SeedBank { .. })
        ));
    }

    #[test]
    fn empty_directory_fails_loading() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            SeedBank::load(tmp.path(), "fallback"),
            Err(VoError::SeedBank { .. })
        ));
    }

    #[test]
    fn single_file_bank_uses_fallback_transcript() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let wav = tmp.path().join("voice.wav");
        touch(&wav, "");
        let bank = SeedBank::load(&wav, "spoken fallback").expect("bank loads");
        assert_eq!(bank.len(), 1);
        assert_eq!(bank.baseline().transcript, "spoken fallback");
    }

    #[test]
    fn missing_narrator_dir_disables_stitching() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert!(load_narrator_seed(&tmp.path().join("nope")).is_none());
    }

    #[test]
    fn narrator_seed_picks_first_sorted_pair() {
        let tmp = tempfile::tempdir().expect("tempdir");
        touch(&tmp.path().join("n2.wav"), "");
        touch(&tmp.path().join("n2.txt"), "later");
        touch(&tmp.path().join("n1.wav"), "");
        touch(&tmp.path().join("n1.txt"), "sooner");
        let seed = load_narrator_seed(tmp.path()).expect("narrator present");
        assert_eq!(seed.key, "n1");
        assert_eq!(seed.transcript, "sooner");
    }
}
