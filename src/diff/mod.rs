//! Structured, line-addressable form of a single file's unified diff.
//!
//! [`ParsedDiff::parse`] never fails: malformed hunk headers produce a hunk
//! with an unknown range whose lines are all context, so an interactive
//! session keeps working on slightly broken input.

pub mod hunk;
pub mod line;

pub use hunk::{Hunk, HunkRange};
pub use line::{DiffLine, LineKind};

const NO_NEWLINE_MARKER: char = '\\';

/// Parsed diff for a single file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDiff {
    /// `diff --git`, `index`, `---`, `+++` and other lines outside any hunk
    pub file_headers: Vec<DiffLine>,
    pub hunks: Vec<Hunk>,
}

/// Old/new lines a hunk still expects, per its header
#[derive(Clone, Copy)]
struct Remaining {
    old: u32,
    new: u32,
}

impl Remaining {
    fn exhausted(self) -> bool {
        self.old == 0 && self.new == 0
    }
}

impl ParsedDiff {
    /// Parse unified diff text for one file.
    ///
    /// Pure and idempotent: the same text always yields an equal value.
    pub fn parse(text: &str) -> Self {
        let mut parsed = ParsedDiff::default();
        // `None` outside a hunk
        let mut open: Option<Option<Remaining>> = None;

        for (raw_index, line) in split_lines(text).enumerate() {
            if line.starts_with("@@") {
                let hunk = Hunk::open(line, raw_index);
                open = Some(hunk.range.map(|r| Remaining {
                    old: r.old_count,
                    new: r.new_count,
                }));
                parsed.hunks.push(hunk);
                continue;
            }

            let (Some(remaining), Some(hunk)) = (open.as_mut(), parsed.hunks.last_mut()) else {
                parsed
                    .file_headers
                    .push(DiffLine::new(LineKind::FileHeader, line, raw_index));
                continue;
            };

            if line.starts_with(NO_NEWLINE_MARKER) {
                if let Some(last) = hunk.lines.last_mut() {
                    last.no_newline = true;
                }
                continue;
            }

            let exhausted = remaining.is_none_or(|r| r.exhausted());
            if is_file_header(line, exhausted) {
                open = None;
                parsed
                    .file_headers
                    .push(DiffLine::new(LineKind::FileHeader, line, raw_index));
                continue;
            }

            let Some(counts) = remaining else {
                let text = line.strip_prefix(' ').unwrap_or(line);
                hunk.lines
                    .push(DiffLine::new(LineKind::Context, text, raw_index));
                continue;
            };

            let (kind, text) = classify_body_line(line);
            match kind {
                LineKind::Removed => counts.old = counts.old.saturating_sub(1),
                LineKind::Added => counts.new = counts.new.saturating_sub(1),
                _ => {
                    counts.old = counts.old.saturating_sub(1);
                    counts.new = counts.new.saturating_sub(1);
                }
            }
            hunk.lines.push(DiffLine::new(kind, text, raw_index));
        }

        parsed
    }

    /// File path from the `+++ b/` header, or `--- a/` for deletions
    pub fn path(&self) -> Option<&str> {
        let header = |prefix: &str| {
            self.file_headers
                .iter()
                .find_map(|line| line.text.strip_prefix(prefix))
                .map(|path| path.trim_end_matches('\r'))
                .filter(|path| !path.is_empty())
        };
        header("+++ b/").or_else(|| header("--- a/"))
    }

    /// True when the diff has no hunks at all
    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    /// True when at least one hunk adds or removes a line
    pub fn has_changes(&self) -> bool {
        self.hunks.iter().any(Hunk::has_changes)
    }

    /// Body lines of every hunk, in display order, with their hunk index
    pub fn body_lines(&self) -> impl Iterator<Item = (usize, &DiffLine)> {
        self.hunks
            .iter()
            .enumerate()
            .flat_map(|(index, hunk)| hunk.lines.iter().map(move |line| (index, line)))
    }
}

/// Split on `\n`, keeping any `\r` as part of the line, without a phantom
/// empty line after the final terminator
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    let body = text.strip_suffix('\n').unwrap_or(text);
    body.split('\n').filter(move |_| !text.is_empty())
}

/// `diff --git` and `index` can never appear in a hunk body. `---`/`+++`
/// can, as a removed `-- ` or added `++ ` line, so they only count as
/// headers once the open hunk has consumed its declared lines.
fn is_file_header(line: &str, hunk_exhausted: bool) -> bool {
    line.starts_with("diff --git ")
        || line.starts_with("index ")
        || (hunk_exhausted && (line.starts_with("--- ") || line.starts_with("+++ ")))
}

fn classify_body_line(line: &str) -> (LineKind, &str) {
    if let Some(text) = line.strip_prefix('-') {
        (LineKind::Removed, text)
    } else if let Some(text) = line.strip_prefix('+') {
        (LineKind::Added, text)
    } else {
        (LineKind::Context, line.strip_prefix(' ').unwrap_or(line))
    }
}
