//! Projection of a [`ParsedDiff`] into the header-free line space the user sees.
//!
//! Display index `n` is the `n`-th body line across all hunks. Both the
//! single-column and the side-by-side presentations number their gutters from
//! the same [`DisplayIndexMap`], so a selection means the same lines in either.

use crate::diff::{LineKind, ParsedDiff};
use crate::selection::SelectionRange;
use std::collections::HashMap;
use std::fmt::Write;

/// One visible line and where it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayLine {
    /// Raw index of the underlying diff line
    pub raw_index: usize,
    pub kind: LineKind,
    /// Index of the owning hunk in [`ParsedDiff::hunks`]
    pub hunk: usize,
    /// Line number on the old side, absent for additions
    pub old_line: Option<u32>,
    /// Line number on the new side, absent for removals
    pub new_line: Option<u32>,
}

/// Bidirectional mapping between display indices and raw diff indices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayIndexMap {
    lines: Vec<DisplayLine>,
    by_raw: HashMap<usize, usize>,
}

impl DisplayIndexMap {
    /// Number the body lines of `parsed` in display order.
    ///
    /// Old/new counters are seeded from each hunk's header; hunks whose header
    /// did not parse contribute lines without numbers.
    pub fn project(parsed: &ParsedDiff) -> Self {
        let mut lines = Vec::new();
        let mut counters: Option<(u32, u32)> = None;
        let mut current_hunk = None;

        for (hunk_index, line) in parsed.body_lines() {
            if current_hunk != Some(hunk_index) {
                current_hunk = Some(hunk_index);
                counters = parsed.hunks[hunk_index]
                    .range
                    .map(|range| (range.old_start, range.new_start));
            }

            let (old_line, new_line) = match (line.kind, counters.as_mut()) {
                (_, None) => (None, None),
                (LineKind::Removed, Some((old, _))) => {
                    *old += 1;
                    (Some(*old - 1), None)
                }
                (LineKind::Added, Some((_, new))) => {
                    *new += 1;
                    (None, Some(*new - 1))
                }
                (_, Some((old, new))) => {
                    *old += 1;
                    *new += 1;
                    (Some(*old - 1), Some(*new - 1))
                }
            };

            lines.push(DisplayLine {
                raw_index: line.raw_index,
                kind: line.kind,
                hunk: hunk_index,
                old_line,
                new_line,
            });
        }

        let by_raw = lines
            .iter()
            .enumerate()
            .map(|(display, line)| (line.raw_index, display))
            .collect();

        Self { lines, by_raw }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn get(&self, display_index: usize) -> Option<&DisplayLine> {
        self.lines.get(display_index)
    }

    pub fn lines(&self) -> &[DisplayLine] {
        &self.lines
    }

    pub fn raw_index(&self, display_index: usize) -> Option<usize> {
        self.get(display_index).map(|line| line.raw_index)
    }

    pub fn old_line(&self, display_index: usize) -> Option<u32> {
        self.get(display_index).and_then(|line| line.old_line)
    }

    pub fn new_line(&self, display_index: usize) -> Option<u32> {
        self.get(display_index).and_then(|line| line.new_line)
    }

    /// Reverse lookup; `None` for header lines
    pub fn display_index(&self, raw_index: usize) -> Option<usize> {
        self.by_raw.get(&raw_index).copied()
    }

    /// Whether any selected display line is an addition or removal
    pub fn selects_changes(&self, selection: SelectionRange) -> bool {
        selection
            .clamp(self.len())
            .indices()
            .filter_map(|index| self.get(index))
            .any(|line| line.kind.is_change())
    }

    /// Selection covering every display line
    pub fn full_selection(&self) -> SelectionRange {
        match self.len() {
            0 => SelectionRange::NONE,
            n => SelectionRange::new(0, n - 1),
        }
    }
}

/// Render a plain numbered listing of the display lines.
///
/// Each line shows `display old new marker text`; hunks are separated by
/// their header so gaps between regions stay visible.
pub fn format_numbered(parsed: &ParsedDiff, map: &DisplayIndexMap) -> String {
    let mut result = String::new();

    if let Some(path) = parsed.path() {
        result.push_str(path);
        result.push_str(":\n");
    }

    let number_width = map
        .lines()
        .iter()
        .flat_map(|line| [line.old_line, line.new_line])
        .flatten()
        .max()
        .map_or(1, |n| n.to_string().len());
    let index_width = map.len().saturating_sub(1).to_string().len();
    let gutter = |n: Option<u32>| n.map_or(String::new(), |n| n.to_string());

    let mut current_hunk = None;
    let rows = parsed.body_lines().zip(map.lines()).enumerate();
    for (display_index, ((hunk_index, diff_line), display_line)) in rows {
        if current_hunk != Some(hunk_index) {
            current_hunk = Some(hunk_index);
            match parsed.hunks[hunk_index].range {
                Some(range) => {
                    let _ = writeln!(result, "{range}");
                }
                None => result.push_str("@@ ? @@\n"),
            }
        }

        let _ = writeln!(
            result,
            "{:>iw$} {:>nw$} {:>nw$} {}{}",
            display_index,
            gutter(display_line.old_line),
            gutter(display_line.new_line),
            display_line.kind.marker(),
            diff_line.text.trim_end_matches('\r'),
            iw = index_width,
            nw = number_width,
        );
    }

    result
}
