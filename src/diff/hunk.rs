use super::line::DiffLine;
use nom::{
    IResult, Parser,
    bytes::complete::tag,
    character::complete::{char, digit1},
    combinator::{map_res, opt},
    sequence::preceded,
};
use std::fmt;

/// Old/new spans declared by a hunk header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkRange {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
}

impl HunkRange {
    /// Parse `@@ -old_start[,old_count] +new_start[,new_count] @@ [section]`.
    ///
    /// A missing count defaults to 1. Returns `None` for anything else,
    /// including combined-diff `@@@` headers.
    pub fn parse(header: &str) -> Option<Self> {
        hunk_header(header).ok().map(|(_, range)| range)
    }

    /// Number of base lines preceding the hunk's first old line.
    ///
    /// A zero-length old side means "insert after line `old_start`".
    pub fn anchor(&self) -> usize {
        if self.old_count == 0 {
            self.old_start as usize
        } else {
            self.old_start.saturating_sub(1) as usize
        }
    }
}

impl fmt::Display for HunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let old_part = match self.old_count {
            1 => format!("-{}", self.old_start),
            n => format!("-{},{}", self.old_start, n),
        };

        let new_part = match self.new_count {
            1 => format!("+{}", self.new_start),
            n => format!("+{},{}", self.new_start, n),
        };

        write!(f, "@@ {} {} @@", old_part, new_part)
    }
}

/// Parse a line number
fn number(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |digits: &str| digits.parse::<u32>()).parse(input)
}

/// Parse `start[,count]`, defaulting count to 1
fn span(input: &str) -> IResult<&str, (u32, u32)> {
    (number, opt(preceded(char(','), number)))
        .map(|(start, count)| (start, count.unwrap_or(1)))
        .parse(input)
}

fn hunk_header(input: &str) -> IResult<&str, HunkRange> {
    (tag("@@ -"), span, tag(" +"), span, tag(" @@"))
        .map(
            |(_, (old_start, old_count), _, (new_start, new_count), _)| HunkRange {
                old_start,
                old_count,
                new_start,
                new_count,
            },
        )
        .parse(input)
}

/// A single hunk from a unified diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// `None` when the header could not be parsed; body lines are then all context
    pub range: Option<HunkRange>,
    /// Raw index of the `@@` line
    pub header_index: usize,
    /// Context, added and removed lines in diff order
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    pub(crate) fn open(header: &str, header_index: usize) -> Self {
        Self {
            range: HunkRange::parse(header),
            header_index,
            lines: Vec::new(),
        }
    }

    /// Whether any body line is an addition or removal
    pub fn has_changes(&self) -> bool {
        self.lines.iter().any(|line| line.kind.is_change())
    }
}
