//! Backend primitives consumed by the staging orchestrator.
//!
//! [`Vcs`] is the seam between the diff model and whatever stores the
//! repository; [`GitCli`] implements it by running the `git` binary.

use error_set::error_set;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, trace};

error_set! {
    /// Errors from running the version-control backend
    VcsError := {
        #[display("Failed to run git {command}: {message}")]
        SpawnFailed { command: String, message: String },
        #[display("git {command} failed: {stderr}")]
        ExitError { command: String, stderr: String },
        #[display("Invalid UTF-8 in git {command} output: {message}")]
        InvalidUtf8 { command: String, message: String },
    }
}

/// Pending changes in a repository, as repository-relative paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    /// Index differs from HEAD
    pub staged: Vec<String>,
    /// Working tree differs from the index
    pub modified: Vec<String>,
    /// Not tracked and not ignored
    pub untracked: Vec<String>,
}

/// Where a file's pending changes currently live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// Everything is in the index; nothing left in the working tree
    Staged,
    /// Only working-tree changes
    Modified,
    /// Some changes staged, more in the working tree
    PartiallyStaged,
    Untracked,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageStatus::Staged => "staged",
            StageStatus::Modified => "modified",
            StageStatus::PartiallyStaged => "partial",
            StageStatus::Untracked => "untracked",
        })
    }
}

impl StageStatus {
    /// Whether the working tree holds changes that can be staged
    pub fn has_working_changes(self) -> bool {
        !matches!(self, StageStatus::Staged)
    }
}

impl Changes {
    /// Status of `file`, or `None` when it has no pending changes
    pub fn status(&self, file: &str) -> Option<StageStatus> {
        let staged = self.staged.iter().any(|f| f == file);
        let modified = self.modified.iter().any(|f| f == file);
        if self.untracked.iter().any(|f| f == file) {
            return Some(StageStatus::Untracked);
        }
        match (staged, modified) {
            (true, true) => Some(StageStatus::PartiallyStaged),
            (true, false) => Some(StageStatus::Staged),
            (false, true) => Some(StageStatus::Modified),
            (false, false) => None,
        }
    }

    /// Every changed file once, in a stable order, with its status
    pub fn entries(&self) -> Vec<(String, StageStatus)> {
        let mut files: Vec<&String> = self
            .staged
            .iter()
            .chain(&self.modified)
            .chain(&self.untracked)
            .collect();
        files.sort();
        files.dedup();
        files
            .into_iter()
            .filter_map(|file| self.status(file).map(|status| (file.clone(), status)))
            .collect()
    }
}

/// Version-control primitives the orchestrator depends on.
///
/// Paths are relative to `root`, the repository's top-level directory.
pub trait Vcs {
    fn list_changes(&self, root: &Path) -> Result<Changes, VcsError>;

    /// Unified diff of the working tree against the index
    fn working_diff(
        &self,
        file: &str,
        root: &Path,
        ignore_whitespace: bool,
    ) -> Result<String, VcsError>;

    /// Unified diff of the index against HEAD
    fn staged_diff(&self, file: &str, root: &Path) -> Result<String, VcsError>;

    /// Index content, falling back to HEAD, then to empty for new files
    fn index_content(&self, file: &str, root: &Path) -> Result<Vec<u8>, VcsError>;

    fn stage(&self, file: &str, root: &Path) -> Result<(), VcsError>;

    fn unstage(&self, file: &str, root: &Path) -> Result<(), VcsError>;

    fn discard_working_changes(&self, file: &str, root: &Path) -> Result<(), VcsError>;

    fn commit(&self, message: &str, root: &Path) -> Result<(), VcsError>;

    fn amend_commit(&self, message: &str, root: &Path) -> Result<(), VcsError>;
}

/// [`Vcs`] backed by the `git` command-line tool
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }

    /// Top-level directory of the repository containing `path`
    pub fn toplevel(&self, path: &Path) -> Result<PathBuf, VcsError> {
        let out = self.run_text(path, &["rev-parse", "--show-toplevel"])?;
        Ok(PathBuf::from(out.trim_end()))
    }

    fn run_raw(&self, root: &Path, args: &[&str]) -> Result<Output, VcsError> {
        trace!(root = %root.display(), ?args, "running git");
        Command::new("git")
            .arg("-C")
            .arg(root)
            .args(args)
            .output()
            .map_err(|e| VcsError::SpawnFailed {
                command: args.join(" "),
                message: e.to_string(),
            })
    }

    /// Run git, failing on a non-zero exit status
    fn run(&self, root: &Path, args: &[&str]) -> Result<Vec<u8>, VcsError> {
        let output = self.run_raw(root, args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VcsError::ExitError {
                command: args.join(" "),
                stderr: stderr.trim_end().to_string(),
            });
        }
        Ok(output.stdout)
    }

    fn run_text(&self, root: &Path, args: &[&str]) -> Result<String, VcsError> {
        let stdout = self.run(root, args)?;
        String::from_utf8(stdout).map_err(|e| VcsError::InvalidUtf8 {
            command: args.join(" "),
            message: e.to_string(),
        })
    }

    /// Blob at `spec` (e.g. `:path` or `HEAD:path`), `None` if it does not exist
    fn show(&self, root: &Path, spec: &str) -> Result<Option<Vec<u8>>, VcsError> {
        let output = self.run_raw(root, &["cat-file", "blob", spec])?;
        Ok(output.status.success().then_some(output.stdout))
    }

    fn is_untracked(&self, file: &str, root: &Path) -> Result<bool, VcsError> {
        let out = self.run_text(
            root,
            &["ls-files", "--others", "--exclude-standard", "--", file],
        )?;
        Ok(!out.trim().is_empty())
    }

    /// `git diff --no-index` exits 1 when the inputs differ
    fn diff_untracked(&self, file: &str, root: &Path) -> Result<String, VcsError> {
        let args = [
            "diff",
            "--no-index",
            "--no-ext-diff",
            "--no-color",
            "--",
            "/dev/null",
            file,
        ];
        let output = self.run_raw(root, &args)?;
        if output.status.code().is_some_and(|code| code > 1) {
            return Err(VcsError::ExitError {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            });
        }
        String::from_utf8(output.stdout).map_err(|e| VcsError::InvalidUtf8 {
            command: args.join(" "),
            message: e.to_string(),
        })
    }
}

impl Vcs for GitCli {
    fn list_changes(&self, root: &Path) -> Result<Changes, VcsError> {
        let out = self.run_text(
            root,
            &["status", "--porcelain=v1", "-z", "--untracked-files=all"],
        )?;
        let changes = parse_porcelain(&out);
        debug!(
            staged = changes.staged.len(),
            modified = changes.modified.len(),
            untracked = changes.untracked.len(),
            "listed changes"
        );
        Ok(changes)
    }

    fn working_diff(
        &self,
        file: &str,
        root: &Path,
        ignore_whitespace: bool,
    ) -> Result<String, VcsError> {
        let mut args = vec!["diff", "--no-ext-diff", "--no-color"];
        if ignore_whitespace {
            args.push("--ignore-all-space");
        }
        args.extend(["--", file]);

        let diff = self.run_text(root, &args)?;
        if diff.is_empty() && self.is_untracked(file, root)? {
            return self.diff_untracked(file, root);
        }
        Ok(diff)
    }

    fn staged_diff(&self, file: &str, root: &Path) -> Result<String, VcsError> {
        self.run_text(
            root,
            &["diff", "--cached", "--no-ext-diff", "--no-color", "--", file],
        )
    }

    fn index_content(&self, file: &str, root: &Path) -> Result<Vec<u8>, VcsError> {
        if let Some(content) = self.show(root, &format!(":{file}"))? {
            return Ok(content);
        }
        if let Some(content) = self.show(root, &format!("HEAD:{file}"))? {
            debug!(file, "not in index, using HEAD content");
            return Ok(content);
        }
        debug!(file, "new file, base content is empty");
        Ok(Vec::new())
    }

    fn stage(&self, file: &str, root: &Path) -> Result<(), VcsError> {
        self.run(root, &["add", "--", file]).map(drop)
    }

    fn unstage(&self, file: &str, root: &Path) -> Result<(), VcsError> {
        self.run(root, &["reset", "--quiet", "--", file]).map(drop)
    }

    fn discard_working_changes(&self, file: &str, root: &Path) -> Result<(), VcsError> {
        self.run(root, &["checkout", "--", file]).map(drop)
    }

    fn commit(&self, message: &str, root: &Path) -> Result<(), VcsError> {
        self.run(root, &["commit", "--quiet", "-m", message]).map(drop)
    }

    fn amend_commit(&self, message: &str, root: &Path) -> Result<(), VcsError> {
        self.run(root, &["commit", "--quiet", "--amend", "-m", message])
            .map(drop)
    }
}

/// Parse `git status --porcelain=v1 -z` output.
///
/// Each entry is `XY path`; renames and copies carry the original path as
/// an extra NUL-terminated field, which is skipped.
pub fn parse_porcelain(output: &str) -> Changes {
    let mut changes = Changes::default();
    let mut entries = output.split('\0').filter(|entry| !entry.is_empty());

    while let Some(entry) = entries.next() {
        let Some((code, path)) = entry.split_at_checked(2) else {
            continue;
        };
        let path = path.strip_prefix(' ').unwrap_or(path).to_string();
        let mut flags = code.chars();
        let (index, worktree) = (flags.next(), flags.next());

        if code == "??" {
            changes.untracked.push(path);
            continue;
        }
        if code == "!!" {
            continue;
        }
        if matches!(index, Some('R' | 'C')) {
            entries.next();
        }
        if index.is_some_and(|c| c != ' ') {
            changes.staged.push(path.clone());
        }
        if worktree.is_some_and(|c| c != ' ') {
            changes.modified.push(path);
        }
    }

    changes
}
