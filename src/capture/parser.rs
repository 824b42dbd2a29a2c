// src/capture/parser.rs

/// One classified fragment of the capture process's diagnostic output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticLine {
    /// `... Opening '<path>' for writing`
    OutputOpened { path: String },
    /// Anything else. Progress lines, warnings, banner.
    Other,
}

const OPENING_PREFIX: &str = "Opening '";
const OPENING_SUFFIX: &str = "' for writing";

/// Classifies one diagnostic fragment. ffmpeg separates progress updates
/// with `\r`, so callers pass each `\r`/`\n` separated fragment on its own.
pub fn parse_line(line: &str) -> DiagnosticLine {
    let Some(start) = line.find(OPENING_PREFIX) else {
        return DiagnosticLine::Other;
    };
    let rest = &line[start + OPENING_PREFIX.len()..];

    // The path itself may contain quotes; the suffix anchors the end.
    let Some(end) = rest.rfind(OPENING_SUFFIX) else {
        return DiagnosticLine::Other;
    };
    let path = &rest[..end];
    if path.is_empty() {
        return DiagnosticLine::Other;
    }

    DiagnosticLine::OutputOpened {
        path: path.to_string(),
    }
}

/// Splits a raw chunk on both line terminators ffmpeg uses.
pub fn fragments(chunk: &str) -> impl Iterator<Item = &str> {
    chunk
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
}
