use std::path::PathBuf;

/// Errors raised by the voice-over pipeline.
///
/// Anything that would leave the final manifest referencing a missing or
/// format-inconsistent asset is fatal; resolution gaps and bad user input
/// degrade gracefully and never reach this enum.
#[derive(thiserror::Error, Debug)]
pub enum VoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("decompiler tool not found at {}", .0.display())]
    ToolNotFound(PathBuf),
    #[error("decompiler failed: {0}")]
    Decompiler(String),
    #[error("reference voice bank {}: {reason}", .dir.display())]
    SeedBank { dir: PathBuf, reason: String },
    #[error("synthesis failed: {0}")]
    Synthesis(String),
    #[error("{context}: expected {expected} output file(s), got {got}")]
    BatchMismatch {
        context: String,
        expected: usize,
        got: usize,
    },
    #[error("audio format mismatch in {}: got {got}, expected {expected}", .path.display())]
    FormatMismatch {
        path: PathBuf,
        got: String,
        expected: String,
    },
    #[error("manifest error: {0}")]
    Manifest(String),
    #[error("no speakable lines resolved for dialog {0}")]
    NoLines(String),
}
