//! Command-line front end.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use autovo::adapter::CommandStore;
use autovo::plan::{AcceptExisting, Decision, DecisionProvider, SubstringPass};
use autovo::synth::SynthCommand;
use autovo::{Line, RunConfigBuilder, RunContext, VoPipeline};

#[derive(Debug, Parser)]
#[command(name = "autovo")]
#[command(about = "Batch voice-over generation for game dialog")]
struct Cli {
    /// Dialog resource name (e.g. DMORTE)
    dialog: String,
    /// Game installation root
    #[arg(long)]
    game_dir: PathBuf,
    /// Root for generated output trees [default: <game-dir>/autovo]
    #[arg(long)]
    out_root: Option<PathBuf>,
    /// Base directory holding <voice>_refs seed directories
    #[arg(long)]
    refs: PathBuf,
    /// Narrator reference directory [default: <refs>/narrator_refs]
    #[arg(long)]
    narrator_refs: Option<PathBuf>,
    /// Decompiler executable
    #[arg(long)]
    decompiler: PathBuf,
    #[arg(long, default_value = "en_us")]
    language: String,
    /// String table file [default: <game-dir>/lang/<language>/dialog.tlk]
    #[arg(long)]
    string_table: Option<PathBuf>,
    /// Synthesis CLI program
    #[arg(long, default_value = "voxcpm")]
    synth_program: String,
    /// Keep all existing audio without prompting
    #[arg(long)]
    accept_existing: bool,
    /// Voice lines even when the table already references audio
    #[arg(long)]
    ignore_existing_audio: bool,
    /// Disable duplicate propagation across the string table
    #[arg(long)]
    no_dedup: bool,
    /// Disable narration stitching
    #[arg(long)]
    no_narration: bool,
    /// Leave decompiled sources on disk after the run
    #[arg(long)]
    keep_sources: bool,
    /// Re-decompile sources even when already present
    #[arg(long)]
    force_reextract: bool,
    #[arg(long, default_value_t = 1.7)]
    intensity_min: f32,
    #[arg(long, default_value_t = 1.7)]
    intensity_max: f32,
    #[arg(long, default_value_t = 15)]
    steps: u32,
    /// Consecutive lines per seed before rotating
    #[arg(long, default_value_t = 20)]
    seed_group_size: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let out_root = cli
        .out_root
        .unwrap_or_else(|| cli.game_dir.join("autovo"));
    let narrator_refs = cli
        .narrator_refs
        .unwrap_or_else(|| cli.refs.join("narrator_refs"));
    let string_table = cli.string_table.unwrap_or_else(|| {
        cli.game_dir
            .join("lang")
            .join(&cli.language)
            .join("dialog.tlk")
    });

    let config = RunConfigBuilder::default()
        .game_dir(cli.game_dir)
        .out_root(out_root)
        .ref_base_dir(cli.refs)
        .narrator_ref_dir(narrator_refs)
        .decompiler_exe(cli.decompiler)
        .language(cli.language)
        .string_table_path(string_table)
        .synth_program(cli.synth_program)
        .respect_existing_audio(!cli.ignore_existing_audio)
        .ask_on_existing(!cli.accept_existing)
        .dedup_enabled(!cli.no_dedup)
        .narration_enabled(!cli.no_narration)
        .cleanup_sources(!cli.keep_sources)
        .force_reextract(cli.force_reextract)
        .intensity_min(cli.intensity_min)
        .intensity_max(cli.intensity_max)
        .steps(cli.steps)
        .seed_group_size(cli.seed_group_size)
        .build()
        .context("invalid configuration")?;

    let ctx = RunContext::new(&config, &cli.dialog)?;
    let store = CommandStore::new(&config, &ctx);
    let synth = SynthCommand::new(&config, &ctx);
    let pipeline = VoPipeline::new(&config, &ctx, &store, &synth);

    let voiced = if cli.accept_existing {
        pipeline.run(&mut AcceptExisting)?
    } else {
        pipeline.run(&mut TerminalDecider)?
    };

    println!(
        "{} line(s) in the final manifest for {}",
        voiced.len(),
        ctx.dialog
    );
    Ok(())
}

/// Interactive decision provider backed by stdin prompts.
#[derive(Debug, Default)]
struct TerminalDecider;

impl TerminalDecider {
    fn prompt(question: &str) -> String {
        print!("{question}");
        let _ = io::stdout().flush();
        let mut buf = String::new();
        if io::stdin().read_line(&mut buf).is_err() {
            return String::new();
        }
        buf.trim().to_string()
    }
}

impl DecisionProvider for TerminalDecider {
    fn keep_all_existing(&mut self, first: &Line) -> bool {
        println!("\nExisting audio found for:");
        println!("{}", first.describe());
        let ans =
            Self::prompt("Keep all existing audio and skip per-line prompts? [Y/n]: ").to_lowercase();
        matches!(ans.as_str(), "" | "y" | "yes")
    }

    fn decide(&mut self, line: &Line) -> Decision {
        println!("{}", line.describe());
        let ans =
            Self::prompt("Keep this clip? [Y=keep / n=regenerate / s=skip line]: ").to_lowercase();
        match ans.as_str() {
            "" | "y" | "yes" => Decision::Keep,
            "s" => Decision::Skip,
            _ => Decision::Regenerate,
        }
    }

    fn next_substring_pass(&mut self) -> Option<SubstringPass> {
        let needle = Self::prompt(
            "\nRegenerate all lines containing a word/substring? Enter text (blank to continue): ",
        );
        if needle.is_empty() {
            return None;
        }

        let intensity = parse_override(
            &Self::prompt("Static intensity for matched lines? (blank = random range): "),
            "intensity",
        );
        let steps = parse_override(
            &Self::prompt("Static inference steps for matched lines? (blank = default): "),
            "steps",
        );
        Some(SubstringPass {
            needle,
            intensity,
            steps,
        })
    }
}

/// Bad numeric input falls back to the default with a warning, never fatal.
fn parse_override<T: std::str::FromStr>(input: &str, what: &str) -> Option<T> {
    if input.is_empty() {
        return None;
    }
    match input.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("invalid {what} value {input:?}, ignoring override");
            None
        }
    }
}
