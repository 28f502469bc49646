//! Build the content that should become the staged snapshot of a file.
//!
//! [`compose`] merges the base content (what the index currently holds) with
//! the selected additions and removals of a parsed working diff. It walks two
//! cursors in lockstep: one over base lines, one over diff body lines in
//! display order, re-anchoring the base cursor at every hunk header.

use crate::diff::{DiffLine, LineKind, ParsedDiff};
use crate::selection::SelectionRange;

/// Output buffer that never glues a line onto one lacking a terminator
#[derive(Default)]
struct Composed(String);

impl Composed {
    fn push(&mut self, line: &str) {
        if !self.0.is_empty() && !self.0.ends_with('\n') {
            self.0.push('\n');
        }
        self.0.push_str(line);
    }

    /// Push a line taken from the diff itself
    fn push_diff_line(&mut self, line: &DiffLine) {
        self.push(&line.text);
        if !line.no_newline {
            self.0.push('\n');
        }
    }
}

/// Compose the new staged content for `selection` applied on top of `base`.
///
/// - Removed, selected: dropped (the deletion is applied)
/// - Removed, not selected: the base line is kept
/// - Added, selected: inserted
/// - Added, not selected: ignored
/// - Context: the base line is kept
///
/// Base lines keep their original terminators. Hunks with an unknown range
/// are passed through untouched. If `base` runs out before the diff does, the
/// diff's own context/removed text stands in for the missing base lines.
///
/// # Examples
///
/// ```
/// use line_stager::{compose, ParsedDiff, SelectionRange};
///
/// let diff = "@@ -1,2 +1,2 @@\n-old\n+new\n keep\n";
/// let parsed = ParsedDiff::parse(diff);
///
/// let staged = compose("old\nkeep\n", &parsed, SelectionRange::new(0, 1));
/// assert_eq!(staged, "new\nkeep\n");
///
/// let untouched = compose("old\nkeep\n", &parsed, SelectionRange::NONE);
/// assert_eq!(untouched, "old\nkeep\n");
/// ```
pub fn compose(base: &str, parsed: &ParsedDiff, selection: SelectionRange) -> String {
    let base_lines: Vec<&str> = base.split_inclusive('\n').collect();
    let mut out = Composed::default();
    let mut cursor = 0usize;
    let mut current_hunk = None;
    let mut passthrough = false;

    for (display_index, (hunk_index, line)) in parsed.body_lines().enumerate() {
        if current_hunk != Some(hunk_index) {
            current_hunk = Some(hunk_index);
            let range = parsed.hunks[hunk_index].range;
            passthrough = range.is_none();

            if let Some(range) = range {
                let anchor = range.anchor().min(base_lines.len());
                while cursor < anchor {
                    out.push(base_lines[cursor]);
                    cursor += 1;
                }
            }
        }

        if passthrough {
            continue;
        }

        let selected = selection.contains(display_index);
        match (line.kind, selected) {
            (LineKind::Removed, true) => cursor += 1,
            (LineKind::Removed, false) | (LineKind::Context, _) => {
                match base_lines.get(cursor) {
                    Some(base_line) => out.push(base_line),
                    None => out.push_diff_line(line),
                }
                cursor += 1;
            }
            (LineKind::Added, true) => out.push_diff_line(line),
            _ => {}
        }
    }

    for base_line in base_lines.iter().skip(cursor) {
        out.push(base_line);
    }

    out.0
}


/// Random diff cases shared by property tests
#[cfg(test)]
pub(crate) mod testing {
    use crate::diff::HunkRange;
    use proptest::prelude::*;

    /// A base/working pair and the unified diff between them
    #[derive(Debug, Clone)]
    pub(crate) struct DiffCase {
        pub base: String,
        pub working: String,
        pub diff_text: String,
    }

    #[derive(Debug, Clone)]
    enum Op {
        Keep(String),
        Remove(String),
        Add(String),
    }

    impl Op {
        fn on_old_side(&self) -> bool {
            !matches!(self, Op::Add(_))
        }

        fn on_new_side(&self) -> bool {
            !matches!(self, Op::Remove(_))
        }

        fn is_change(&self) -> bool {
            !matches!(self, Op::Keep(_))
        }

        fn render(&self) -> String {
            match self {
                Op::Keep(text) => format!(" {text}\n"),
                Op::Remove(text) => format!("-{text}\n"),
                Op::Add(text) => format!("+{text}\n"),
            }
        }
    }

    fn join(lines: impl Iterator<Item = String>) -> String {
        lines.map(|line| line + "\n").collect()
    }

    impl DiffCase {
        fn build(base: &[String], removed: &[bool], inserted: &[Vec<String>], context: usize) -> Self {
            let mut ops = Vec::new();
            for (i, line) in base.iter().enumerate() {
                ops.extend(inserted[i].iter().cloned().map(Op::Add));
                ops.push(if removed[i] {
                    Op::Remove(line.clone())
                } else {
                    Op::Keep(line.clone())
                });
            }
            ops.extend(inserted[base.len()].iter().cloned().map(Op::Add));

            // Group changes whose separating context would overlap
            let changes: Vec<usize> = (0..ops.len()).filter(|&i| ops[i].is_change()).collect();
            let mut groups: Vec<(usize, usize)> = Vec::new();
            for index in changes {
                match groups.last_mut() {
                    Some((_, last)) if index - *last - 1 <= 2 * context => *last = index,
                    _ => groups.push((index, index)),
                }
            }

            let mut diff_text = String::from("diff --git a/case.txt b/case.txt\n--- a/case.txt\n+++ b/case.txt\n");
            for (first, last) in groups {
                let lo = first.saturating_sub(context);
                let hi = (last + context + 1).min(ops.len());
                let old_before = ops[..lo].iter().filter(|op| op.on_old_side()).count() as u32;
                let new_before = ops[..lo].iter().filter(|op| op.on_new_side()).count() as u32;
                let old_count = ops[lo..hi].iter().filter(|op| op.on_old_side()).count() as u32;
                let new_count = ops[lo..hi].iter().filter(|op| op.on_new_side()).count() as u32;
                let range = HunkRange {
                    old_start: if old_count == 0 { old_before } else { old_before + 1 },
                    old_count,
                    new_start: if new_count == 0 { new_before } else { new_before + 1 },
                    new_count,
                };
                diff_text.push_str(&format!("{range}\n"));
                for op in &ops[lo..hi] {
                    diff_text.push_str(&op.render());
                }
            }

            let working = join(ops.iter().filter_map(|op| match op {
                Op::Keep(text) | Op::Add(text) => Some(text.clone()),
                Op::Remove(_) => None,
            }));

            DiffCase {
                base: join(base.iter().cloned()),
                working,
                diff_text,
            }
        }
    }

    fn arb_insertions() -> impl Strategy<Value = Vec<String>> {
        prop_oneof![
            3 => Just(Vec::new()),
            1 => prop::collection::vec("[A-Z]{1,6}", 1..3),
        ]
    }

    pub(crate) fn arb_diff_case() -> impl Strategy<Value = DiffCase> {
        (prop::collection::vec("[a-z]{0,6}", 0..24), 0usize..4)
            .prop_flat_map(|(base, context)| {
                let n = base.len();
                (
                    Just(base),
                    prop::collection::vec(prop::bool::weighted(0.2), n),
                    prop::collection::vec(arb_insertions(), n + 1),
                    Just(context),
                )
            })
            .prop_map(|(base, removed, inserted, context)| {
                DiffCase::build(&base, &removed, &inserted, context)
            })
    }
}
