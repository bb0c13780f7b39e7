//! # autovo
//!
//! Batch voice-over generation for game dialog using reference-conditioned
//! text-to-speech.
//!
//! ## Pipeline
//!
//! - **Resolve**: find dialog lines that lack voice audio, cross-referencing
//!   decompiled sources against the global string table.
//! - **Segment**: split each line into narrator/character spans by quote
//!   state and classify it for scheduling.
//! - **Plan**: keep, regenerate, or skip lines with existing assets, plus a
//!   substring-targeted override pass.
//! - **Schedule**: group pending lines into synthesis chunks keyed by
//!   (reference voice, intensity, steps), rotating through a seed bank.
//! - **Synthesize**: submit each chunk to the external engine and verify the
//!   output count before anything moves.
//! - **Assemble**: concatenate per-segment clips for mixed lines and apply
//!   edge fades.
//! - **Propagate**: clone finished resolutions onto every unvoiced
//!   string-table entry with identical text, then emit the manifest.
//!
//! ## Quick Start
//!
//! ```ignore
//! use autovo::{RunConfigBuilder, RunContext, VoPipeline};
//! use autovo::adapter::CommandStore;
//! use autovo::plan::AcceptExisting;
//! use autovo::synth::SynthCommand;
//!
//! let config = RunConfigBuilder::default()
//!     .game_dir("/games/torment")
//!     .out_root("/games/torment/autovo")
//!     .ref_base_dir("/voices")
//!     .narrator_ref_dir("/voices/narrator_refs")
//!     .decompiler_exe("/games/torment/weidu")
//!     .string_table_path("/games/torment/lang/en_us/dialog.tlk")
//!     .build()?;
//! let ctx = RunContext::new(&config, "DMORTE")?;
//!
//! let store = CommandStore::new(&config, &ctx);
//! let synth = SynthCommand::new(&config, &ctx);
//! let voiced = VoPipeline::new(&config, &ctx, &store, &synth).run(&mut AcceptExisting)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! External collaborators (the decompiler, the synthesis engine, and any
//! interactive prompting) sit behind the [`adapter::DialogStore`],
//! [`synth::SynthesisService`], and [`plan::DecisionProvider`] traits, so
//! the pipeline is deterministic given fixed implementations.

pub mod adapter;
pub mod audio;
pub mod config;
pub mod dedup;
pub mod error;
pub mod manifest;
pub mod pipeline;
pub mod plan;
pub mod resolver;
pub mod schedule;
pub mod seeds;
pub mod segment;
pub mod synth;
pub mod text;

pub use config::{RunConfig, RunConfigBuilder, RunContext};
pub use error::VoError;
pub use pipeline::VoPipeline;
pub use resolver::Line;
