//! Quote-state role segmentation.
//!
//! A single left-to-right pass toggles an in-quote flag on each literal
//! quote character; accumulated text is emitted as a span tagged by the
//! role active before the toggle. Segmentation is a pure function of the
//! input text, so re-running it always yields identical spans.

use crate::resolver::Line;
use crate::text;

/// Who speaks a span of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Narrator,
    Character,
}

impl Role {
    /// Short label used for temp directories and batch logging.
    pub fn label(self) -> &'static str {
        match self {
            Role::Narrator => "narrator",
            Role::Character => "character",
        }
    }
}

/// A contiguous span of one line's text attributed to a single role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub role: Role,
    /// Raw span text; cleaning happens when the span is scheduled.
    pub text: String,
}

/// Scheduling category of a whole line, derived from its spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    NarratorOnly,
    CharacterOnly,
    Mixed,
}

/// One schedulable sub-span of a mixed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentTask {
    /// Index of the parent line within the mixed-line slice.
    pub line_index: usize,
    pub strref: u32,
    pub role: Role,
    /// Position within the parent line; assembly concatenates in this order.
    pub seg_order: usize,
    /// Cleaned synthesis text.
    pub text: String,
}

/// Split a raw line into role-tagged spans using quotation-mark state.
///
/// Text outside double quotes is narration, text inside is character
/// speech. Whitespace-only spans are dropped. A line without any quote
/// characters yields no spans; callers treat such lines as character-only.
pub fn split_roles(text: &str) -> Vec<Segment> {
    if !text.contains('"') {
        return Vec::new();
    }

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for ch in text.chars() {
        if ch == '"' {
            flush_span(&mut segments, &mut current, in_quote);
            in_quote = !in_quote;
        } else {
            current.push(ch);
        }
    }
    flush_span(&mut segments, &mut current, in_quote);

    segments
}

fn flush_span(segments: &mut Vec<Segment>, current: &mut String, in_quote: bool) {
    if current.trim().is_empty() {
        current.clear();
        return;
    }
    let role = if in_quote {
        Role::Character
    } else {
        Role::Narrator
    };
    segments.push(Segment {
        role,
        text: std::mem::take(current),
    });
}

/// Classify a line for scheduling from its quote structure.
pub fn classify(text: &str) -> LineClass {
    let segments = split_roles(text);
    if segments.is_empty() {
        return LineClass::CharacterOnly;
    }
    let has_narr = segments.iter().any(|s| s.role == Role::Narrator);
    let has_char = segments.iter().any(|s| s.role == Role::Character);
    match (has_narr, has_char) {
        (true, true) => LineClass::Mixed,
        (true, false) => LineClass::NarratorOnly,
        _ => LineClass::CharacterOnly,
    }
}

/// Build ordered synthesis tasks for the cleaned segments of mixed lines.
///
/// Spans that clean to nothing are not scheduled; `seg_order` counts only
/// the spans that survive, so assembly indices stay dense.
pub fn segment_tasks(lines: &[Line]) -> Vec<SegmentTask> {
    let mut tasks = Vec::new();

    for (line_index, line) in lines.iter().enumerate() {
        let spans = split_roles(&line.text);
        let has_narr = spans.iter().any(|s| s.role == Role::Narrator);
        let has_char = spans.iter().any(|s| s.role == Role::Character);
        if !(has_narr && has_char) {
            continue;
        }

        let mut seg_order = 0;
        for span in spans {
            let Some(cleaned) = text::clean_segment(&span.text) else {
                continue;
            };
            tasks.push(SegmentTask {
                line_index,
                strref: line.strref,
                role: span.role,
                seg_order,
                text: cleaned,
            });
            seg_order += 1;
        }
    }

    tasks
}
