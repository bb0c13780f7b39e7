//! Batch grouping: seed rotation and parameter-keyed chunks.

use rand::Rng;

use crate::config::RunConfig;
use crate::resolver::Line;
use crate::seeds::SeedBank;

/// A batch of lines synthesized together under one voice/parameter key.
///
/// All members are submitted in one synthesis call; the output count must
/// equal `items.len()`, in the same order.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisChunk {
    pub seed_key: String,
    pub intensity: f32,
    pub steps: u32,
    /// Indices into the pending-line slice, in submission order.
    pub items: Vec<usize>,
}

/// Partition pending lines into chunks keyed by (seed, intensity, steps).
///
/// Lines are assigned to seeds in fixed-size consecutive groups, cycling
/// through the bank in key order so large batches spread across reference
/// voices while parameters stay stable within a sub-batch. Intensity comes
/// from the per-line override when set, else a uniform draw from the
/// configured range; a single-point range yields a fixed value.
pub fn build_chunks<R: Rng>(
    lines: &mut [Line],
    bank: &SeedBank,
    config: &RunConfig,
    rng: &mut R,
) -> Vec<SynthesisChunk> {
    let keys = bank.keys();
    let group_size = config.seed_group_size.max(1);
    let mut chunks: Vec<SynthesisChunk> = Vec::new();

    for (idx, line) in lines.iter_mut().enumerate() {
        let group_index = idx / group_size;
        let seed_key = keys[group_index % keys.len()].to_string();
        line.seed_key = Some(seed_key.clone());

        let intensity = line
            .intensity_override
            .unwrap_or_else(|| draw_intensity(config, rng));
        let steps = line.steps_override.unwrap_or(config.steps);

        // Float keys are grouped by exact bit pattern; chunk counts are
        // small enough that a linear scan beats hashing f32s.
        let existing = chunks.iter().position(|c| {
            c.seed_key == seed_key
                && c.intensity.to_bits() == intensity.to_bits()
                && c.steps == steps
        });
        match existing {
            Some(pos) => chunks[pos].items.push(idx),
            None => chunks.push(SynthesisChunk {
                seed_key,
                intensity,
                steps,
                items: vec![idx],
            }),
        }
    }

    chunks
}

fn draw_intensity<R: Rng>(config: &RunConfig, rng: &mut R) -> f32 {
    if config.intensity_min >= config.intensity_max {
        config.intensity_min
    } else {
        rng.gen_range(config.intensity_min..=config.intensity_max)
    }
}

/// One chunk holding every line, pinned to the baseline seed and fixed
/// baseline parameters.
///
/// Used on a first-ever run to establish a consistent voice identity
/// before targeted regeneration diversifies it.
pub fn baseline_chunk(lines: &mut [Line], bank: &SeedBank, config: &RunConfig) -> Vec<SynthesisChunk> {
    if lines.is_empty() {
        return Vec::new();
    }
    let baseline = bank.baseline();
    log::debug!("baseline seed selected: {}", baseline.key);
    for line in lines.iter_mut() {
        line.seed_key = Some(baseline.key.clone());
    }
    vec![SynthesisChunk {
        seed_key: baseline.key.clone(),
        intensity: config.baseline_intensity,
        steps: config.steps,
        items: (0..lines.len()).collect(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfigBuilder;
    use crate::seeds::SeedBank;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::path::Path;

    fn bank_with_keys(dir: &Path, keys: &[&str]) -> SeedBank {
        for key in keys {
            std::fs::write(dir.join(format!("{key}.wav")), b"").expect("touch wav");
            std::fs::write(dir.join(format!("{key}.txt")), "sample transcript").expect("touch txt");
        }
        SeedBank::load(dir, "fallback").expect("bank loads")
    }

    fn pending(count: usize) -> Vec<Line> {
        (0..count)
            .map(|i| Line {
                local_id: Some(i as u32),
                strref: i as u32,
                text: format!("line {i}"),
                tts_text: format!("line {i}"),
                resref: format!("XX{i:06}"),
                seed_key: None,
                intensity_override: None,
                steps_override: None,
            })
            .collect()
    }

    fn config(group_size: usize) -> crate::config::RunConfig {
        RunConfigBuilder::default()
            .game_dir("game")
            .out_root("out")
            .ref_base_dir("voices")
            .narrator_ref_dir("voices/narrator_refs")
            .decompiler_exe("decomp")
            .string_table_path("game/dialog.tlk")
            .seed_group_size(group_size)
            .build()
            .expect("all required fields set")
    }

    #[test]
    fn seed_groups_rotate_in_fixed_size_blocks() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let bank = bank_with_keys(tmp.path(), &["s0", "s1", "s2"]);
        let mut lines = pending(45);
        let mut rng = StdRng::seed_from_u64(7);

        let chunks = build_chunks(&mut lines, &bank, &config(20), &mut rng);

        for (idx, line) in lines.iter().enumerate() {
            let expected = ["s0", "s1", "s2"][idx / 20];
            assert_eq!(line.seed_key.as_deref(), Some(expected), "line {idx}");
        }
        // Fixed intensity range, so exactly one chunk per seed.
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].items.len(), 20);
        assert_eq!(chunks[1].items.len(), 20);
        assert_eq!(chunks[2].items.len(), 5);
    }

    #[test]
    fn rotation_wraps_around_the_bank() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let bank = bank_with_keys(tmp.path(), &["s0", "s1"]);
        let mut lines = pending(5);
        let mut rng = StdRng::seed_from_u64(7);

        build_chunks(&mut lines, &bank, &config(1), &mut rng);
        let keys: Vec<&str> = lines.iter().map(|l| l.seed_key.as_deref().unwrap()).collect();
        assert_eq!(keys, vec!["s0", "s1", "s0", "s1", "s0"]);
    }

    #[test]
    fn single_point_range_yields_a_fixed_intensity() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let bank = bank_with_keys(tmp.path(), &["s0"]);
        let mut lines = pending(8);
        let mut rng = StdRng::seed_from_u64(7);

        let chunks = build_chunks(&mut lines, &bank, &config(20), &mut rng);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].intensity, 1.7);
        assert_eq!(chunks[0].items, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn overrides_split_lines_into_their_own_chunk() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let bank = bank_with_keys(tmp.path(), &["s0"]);
        let mut lines = pending(4);
        lines[2].intensity_override = Some(2.2);
        lines[2].steps_override = Some(40);
        let mut rng = StdRng::seed_from_u64(7);

        let chunks = build_chunks(&mut lines, &bank, &config(20), &mut rng);
        assert_eq!(chunks.len(), 2);
        let override_chunk = chunks
            .iter()
            .find(|c| c.steps == 40)
            .expect("override chunk exists");
        assert_eq!(override_chunk.items, vec![2]);
        assert_eq!(override_chunk.intensity, 2.2);
    }

    #[test]
    fn baseline_mode_uses_one_chunk_and_one_seed() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let bank = bank_with_keys(tmp.path(), &["zz", "aa"]);
        let mut lines = pending(6);

        let chunks = baseline_chunk(&mut lines, &bank, &config(2));
        assert_eq!(chunks.len(), 1);
        // Lexicographically first audio file anchors the baseline voice.
        assert_eq!(chunks[0].seed_key, "aa");
        assert_eq!(chunks[0].intensity, 1.8);
        assert_eq!(chunks[0].items.len(), 6);
        assert!(lines.iter().all(|l| l.seed_key.as_deref() == Some("aa")));
    }
}
