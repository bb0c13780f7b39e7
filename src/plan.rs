//! Regeneration planning: keep, regenerate, or skip each resolved line.
//!
//! All prompting goes through `DecisionProvider`, so the pipeline stays
//! synchronous and deterministic for any fixed provider.

use crate::config::RunContext;
use crate::resolver::Line;

/// Outcome for a single line that already has an asset on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Keep,
    Regenerate,
    /// Remove the line from all downstream processing.
    Skip,
}

/// One round of the substring-targeted override pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SubstringPass {
    /// Case-insensitive needle matched against raw line text.
    pub needle: String,
    /// Optional per-line parameter overrides applied to every match.
    pub intensity: Option<f32>,
    pub steps: Option<u32>,
}

/// Pluggable replacement for interactive prompting.
pub trait DecisionProvider {
    /// Asked once, on the first line found with an existing asset: keep
    /// all existing audio and skip the per-line prompts?
    fn keep_all_existing(&mut self, first: &Line) -> bool;
    /// Per-line decision when an asset already exists.
    fn decide(&mut self, line: &Line) -> Decision;
    /// Next substring-targeted pass; `None` ends the loop.
    fn next_substring_pass(&mut self) -> Option<SubstringPass>;
}

/// Keeps everything that exists and runs no targeted passes.
#[derive(Debug, Default)]
pub struct AcceptExisting;

impl DecisionProvider for AcceptExisting {
    fn keep_all_existing(&mut self, _first: &Line) -> bool {
        true
    }
    fn decide(&mut self, _line: &Line) -> Decision {
        Decision::Keep
    }
    fn next_substring_pass(&mut self) -> Option<SubstringPass> {
        None
    }
}

/// The planner's output: lines to leave alone and lines to synthesize.
/// Skipped lines appear in neither set.
#[derive(Debug, Default)]
pub struct Plan {
    pub keep: Vec<Line>,
    pub regen: Vec<Line>,
}

/// Sort lines into keep/regenerate/skip based on on-disk assets and the
/// decision provider.
pub fn plan_generation(
    lines: Vec<Line>,
    ctx: &RunContext,
    ask_on_existing: bool,
    provider: &mut dyn DecisionProvider,
) -> Plan {
    let mut plan = Plan::default();

    if !ctx.sounds_dir.exists() {
        log::debug!(
            "no sounds directory yet, all {} line(s) marked for generation",
            lines.len()
        );
        plan.regen = lines;
        return plan;
    }

    let mut asked_global = false;
    let mut keep_all = false;

    for line in lines {
        if !ctx.sound_path(&line.resref).is_file() {
            plan.regen.push(line);
            continue;
        }
        if !ask_on_existing {
            plan.keep.push(line);
            continue;
        }
        if !asked_global {
            asked_global = true;
            keep_all = provider.keep_all_existing(&line);
            if keep_all {
                log::debug!("global choice: keep all existing audio, no per-line questions");
            }
        }
        if keep_all {
            plan.keep.push(line);
            continue;
        }
        match provider.decide(&line) {
            Decision::Keep => plan.keep.push(line),
            Decision::Regenerate => plan.regen.push(line),
            Decision::Skip => log::debug!("skipping strref {} entirely", line.strref),
        }
    }

    plan
}

/// Repeated substring-targeted regeneration.
///
/// Each pass force-moves matching kept lines into the regeneration set and
/// applies any parameter overrides to every match, kept or regenerated.
pub fn targeted_regeneration(plan: &mut Plan, provider: &mut dyn DecisionProvider) {
    while let Some(pass) = provider.next_substring_pass() {
        let needle = pass.needle.to_lowercase();
        if needle.is_empty() {
            continue;
        }

        let (moved, kept): (Vec<Line>, Vec<Line>) = plan
            .keep
            .drain(..)
            .partition(|line| line.text.to_lowercase().contains(&needle));
        plan.keep = kept;
        plan.regen.extend(moved);

        let mut matched = 0usize;
        for line in plan
            .regen
            .iter_mut()
            .filter(|line| line.text.to_lowercase().contains(&needle))
        {
            matched += 1;
            if pass.intensity.is_some() {
                line.intensity_override = pass.intensity;
            }
            if pass.steps.is_some() {
                line.steps_override = pass.steps;
            }
        }
        log::debug!(
            "targeted pass {:?} matched {matched} line(s)",
            pass.needle
        );
    }
}
