/// Classification of one physical line of a unified diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineKind {
    /// Unchanged line carried on both sides
    Context,
    /// Line present only in the new version
    Added,
    /// Line present only in the old version
    Removed,
    /// `@@ -a,b +c,d @@` line opening a hunk
    HunkHeader,
    /// `diff --git`, `index`, `---`, `+++` and other pre-hunk lines
    FileHeader,
}

impl LineKind {
    /// Header lines never reach the display
    pub fn is_header(self) -> bool {
        matches!(self, LineKind::HunkHeader | LineKind::FileHeader)
    }

    /// Added or removed
    pub fn is_change(self) -> bool {
        matches!(self, LineKind::Added | LineKind::Removed)
    }

    /// Marker character used when a line is written back out in diff form
    pub fn marker(self) -> char {
        match self {
            LineKind::Added => '+',
            LineKind::Removed => '-',
            _ => ' ',
        }
    }
}

/// A single line of a unified diff, addressed by its raw position in the diff text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub kind: LineKind,
    /// Content with the `+`/`-`/` ` prefix stripped (headers keep their full text)
    pub text: String,
    /// Position in the unfiltered diff line sequence
    pub raw_index: usize,
    /// Followed by `\ No newline at end of file`
    pub no_newline: bool,
}

impl DiffLine {
    pub(crate) fn new(kind: LineKind, text: impl Into<String>, raw_index: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            raw_index,
            no_newline: false,
        }
    }
}
