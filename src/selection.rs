//! Display-line selections and the `FILE:RANGE` syntax used to name them.
//!
//! # Syntax
//!
//! `FILE:RANGE` where `RANGE` is one of:
//! - `N` - the single display line `N`
//! - `N..M` - display lines `N` through `M`, inclusive, in either order
//!
//! Display indices are the zero-based numbers printed in the first column of
//! `line-stager diff FILE`.
//!
//! # Examples
//!
//! ```
//! use line_stager::selection::{parse_file_selection, SelectionRange};
//!
//! let sel = parse_file_selection("src/lib.rs:4..7").unwrap();
//! assert_eq!(sel.file, "src/lib.rs");
//! assert_eq!(sel.range, SelectionRange::new(4, 7));
//!
//! // Ranges are normalized
//! let sel = parse_file_selection("notes.txt:9..2").unwrap();
//! assert_eq!(sel.range, SelectionRange::new(2, 9));
//! ```

use error_set::error_set;
use std::fmt;

error_set! {
    /// Errors from parsing `FILE:RANGE` syntax
    ParseError := {
        /// Input string does not contain a colon separator
        #[display("Invalid format '{input}': expected 'file:range'")]
        InvalidFormat { input: String },
        /// File name portion before the colon is empty or whitespace
        #[display("Invalid format '{input}': file name cannot be empty")]
        EmptyFileName { input: String },
        /// Nothing after the colon
        #[display("No display range provided")]
        EmptyRange,
        /// Display index could not be parsed as a non-negative integer
        #[display("Invalid display index '{value}'")]
        InvalidIndex { value: String },
    }
}

/// Inclusive range of display indices, normalized so `start <= end`.
///
/// The empty selection corresponds to `(-1, -1)` in raw form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SelectionRange(Option<(usize, usize)>);

impl SelectionRange {
    /// Nothing selected
    pub const NONE: Self = Self(None);

    /// Selection of `a..=b` or `b..=a`, whichever is ordered
    pub fn new(a: usize, b: usize) -> Self {
        Self(Some((a.min(b), a.max(b))))
    }

    /// Selection of a single display line
    pub fn single(index: usize) -> Self {
        Self::new(index, index)
    }

    /// Build from raw signed indices; any negative bound means no selection
    pub fn from_raw(start: i64, end: i64) -> Self {
        match (usize::try_from(start), usize::try_from(end)) {
            (Ok(start), Ok(end)) => Self::new(start, end),
            _ => Self::NONE,
        }
    }

    /// Raw signed form, `(-1, -1)` when empty
    pub fn to_raw(self) -> (i64, i64) {
        match self.0 {
            Some((start, end)) => (start as i64, end as i64),
            None => (-1, -1),
        }
    }

    pub fn is_empty(self) -> bool {
        self.0.is_none()
    }

    pub fn start(self) -> Option<usize> {
        self.0.map(|(start, _)| start)
    }

    pub fn end(self) -> Option<usize> {
        self.0.map(|(_, end)| end)
    }

    pub fn contains(self, index: usize) -> bool {
        self.0
            .is_some_and(|(start, end)| (start..=end).contains(&index))
    }

    /// Selected display indices, ascending
    pub fn indices(self) -> impl Iterator<Item = usize> {
        self.0.into_iter().flat_map(|(start, end)| start..=end)
    }

    /// Clamp to the first `len` display lines; empty if nothing remains
    pub fn clamp(self, len: usize) -> Self {
        match self.0 {
            Some((start, end)) if start < len => Self::new(start, end.min(len - 1)),
            _ => Self::NONE,
        }
    }
}

impl fmt::Display for SelectionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some((start, end)) if start == end => write!(f, "{start}"),
            Some((start, end)) => write!(f, "{start}..{end}"),
            None => write!(f, "none"),
        }
    }
}

/// Parsed file reference with a display selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSelection {
    /// File path relative to the repository root
    pub file: String,
    pub range: SelectionRange,
}

/// Parse a `FILE:RANGE` string.
///
/// The last colon separates the range, so paths containing colons work.
///
/// # Errors
///
/// Returns [`ParseError`] if:
/// - Input doesn't contain `:`
/// - File name is empty or whitespace
/// - No range follows the colon
/// - An index is not a non-negative integer
pub fn parse_file_selection(input: &str) -> Result<FileSelection, ParseError> {
    let Some((file, range)) = input.rsplit_once(':') else {
        return Err(ParseError::InvalidFormat {
            input: input.to_string(),
        });
    };

    let file = file.trim();
    if file.is_empty() {
        return Err(ParseError::EmptyFileName {
            input: input.to_string(),
        });
    }

    Ok(FileSelection {
        file: file.to_string(),
        range: parse_range(range)?,
    })
}

/// Parse the range part (after the colon): `N` or `N..M`
pub fn parse_range(input: &str) -> Result<SelectionRange, ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseError::EmptyRange);
    }

    match input.split_once("..") {
        Some((start, end)) => Ok(SelectionRange::new(
            parse_index(start)?,
            parse_index(end)?,
        )),
        None => Ok(SelectionRange::single(parse_index(input)?)),
    }
}

fn parse_index(input: &str) -> Result<usize, ParseError> {
    input
        .trim()
        .parse::<usize>()
        .map_err(|_| ParseError::InvalidIndex {
            value: input.to_string(),
        })
}
