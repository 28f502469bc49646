//! Stage a contiguous range of display lines of one file.
//!
//! The composed snapshot reaches the index by temporarily writing it over the
//! working file and asking the backend to stage the whole file. The original
//! bytes are always written back afterwards, whether staging worked or not.

use crate::compose::compose;
use crate::diff::ParsedDiff;
use crate::display::DisplayIndexMap;
use crate::selection::SelectionRange;
use crate::vcs::{StageStatus, Vcs, VcsError};
use error_set::error_set;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, error, info, warn};

error_set! {
    /// Errors from staging a display selection
    StageError := {
        /// Line-level staging of a file with no working-tree delta
        #[display("Staging lines of an already staged file is not implemented")]
        NotSupported,
        /// Symlinks, submodules and the like cannot be overwritten and restored
        #[display("{file} is not a regular file and cannot be staged by line")]
        NotRegularFile { file: String },
        #[display("Staged content of {file} is not valid UTF-8")]
        NonUtf8Content { file: String },
        #[display("Failed to read {file}: {message}")]
        ReadFailed { file: String, message: String },
        /// Writing the composed content failed; the working file is untouched
        #[display("Failed to write {file}: {message}")]
        WriteFailed { file: String, message: String },
        /// Staging failed; the working file was restored
        #[display("Failed to stage {file}: {message}")]
        StageFailed { file: String, message: String },
        #[display("Failed to stage {file} ({stage_error}) and to restore it ({restore_error}); the working copy is left inconsistent")]
        Inconsistent { file: String, stage_error: String, restore_error: String },
        #[display("Staged {file} but failed to restore it: {message}; the working copy holds the staged content")]
        RestoreFailed { file: String, message: String },
        VcsError(VcsError),
    }
}

/// How loudly an outcome should be surfaced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    #[default]
    Info,
    /// Recoverable by retrying
    Error,
    /// The working tree may hold synthetic content and needs attention
    Critical,
}

impl StageError {
    pub fn severity(&self) -> Severity {
        match self {
            StageError::Inconsistent { .. } | StageError::RestoreFailed { .. } => {
                Severity::Critical
            }
            _ => Severity::Error,
        }
    }
}

/// Outcome of a staging action, ready for a status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    /// The action completed, including the "nothing to stage" case
    pub staged: bool,
    /// Working diff after the action
    pub new_diff_text: String,
    pub message: String,
    pub severity: Severity,
    /// No working-tree changes remain for the file
    pub file_clean: bool,
}

impl StageReport {
    fn skipped(diff_text: &str) -> Self {
        Self {
            staged: false,
            new_diff_text: diff_text.to_string(),
            message: String::new(),
            severity: Severity::Info,
            file_clean: diff_text.trim().is_empty(),
        }
    }

    fn nothing_staged(diff_text: &str) -> Self {
        Self {
            staged: true,
            message: "No changes were staged".to_string(),
            ..Self::skipped(diff_text)
        }
    }

    /// Report for a failed action; the diff is left as it was
    pub fn from_error(error: &StageError, diff_text: &str) -> Self {
        Self {
            message: error.to_string(),
            severity: error.severity(),
            ..Self::skipped(diff_text)
        }
    }
}

/// What to stage
#[derive(Debug, Clone, Copy)]
pub struct StageRequest<'a> {
    /// Path relative to the repository root
    pub file: &'a str,
    /// Current status, `None` if unknown
    pub status: Option<StageStatus>,
    /// The diff the selection indexes into, as shown to the user
    pub diff_text: &'a str,
    pub selection: SelectionRange,
    /// Passed through when re-fetching the diff afterwards
    pub ignore_whitespace: bool,
}

/// Stage the selected display lines of one file.
///
/// # Errors
///
/// Rejects files that are already fully staged before touching the backend.
/// Read, write and backend failures are reported as [`StageError`]; if the
/// working file cannot be restored the error has [`Severity::Critical`].
pub fn stage_selection<V: Vcs + ?Sized>(
    vcs: &V,
    root: &Path,
    request: &StageRequest<'_>,
) -> Result<StageReport, StageError> {
    let StageRequest {
        file,
        status,
        diff_text,
        selection,
        ignore_whitespace,
    } = *request;

    if status == Some(StageStatus::Staged) {
        return Err(StageError::NotSupported);
    }
    if file.is_empty() || diff_text.is_empty() || selection.is_empty() {
        debug!(file, %selection, "nothing to stage");
        return Ok(StageReport::skipped(diff_text));
    }

    let path = root.join(file);
    if fs::symlink_metadata(&path).is_ok_and(|meta| !meta.file_type().is_file()) {
        return Err(StageError::NotRegularFile {
            file: file.to_string(),
        });
    }
    let original = read_working(&path).map_err(|e| StageError::ReadFailed {
        file: file.to_string(),
        message: e.to_string(),
    })?;
    let base = String::from_utf8(vcs.index_content(file, root)?).map_err(|_| {
        StageError::NonUtf8Content {
            file: file.to_string(),
        }
    })?;

    let parsed = ParsedDiff::parse(diff_text);
    let map = DisplayIndexMap::project(&parsed);
    if !map.selects_changes(selection) {
        info!(file, %selection, "selection holds no changes");
        return Ok(StageReport::nothing_staged(diff_text));
    }

    let composed = compose(&base, &parsed, selection);
    if composed == base {
        info!(file, %selection, "composed content equals staged content");
        return Ok(StageReport::nothing_staged(diff_text));
    }

    // Staging a missing path records the deletion
    let stages_deletion = original.is_none() && composed.is_empty();
    if !stages_deletion {
        write_atomic(&path, composed.as_bytes()).map_err(|e| StageError::WriteFailed {
            file: file.to_string(),
            message: e.to_string(),
        })?;
        debug!(file, bytes = composed.len(), "wrote composed content");
    }

    let staged = vcs.stage(file, root);
    let restored = if stages_deletion {
        Ok(())
    } else {
        restore_working(&path, original.as_deref())
    };

    match (staged, restored) {
        (Err(stage_error), Err(restore_error)) => {
            error!(file, %stage_error, %restore_error, "stage and restore both failed");
            return Err(StageError::Inconsistent {
                file: file.to_string(),
                stage_error: stage_error.to_string(),
                restore_error: restore_error.to_string(),
            });
        }
        (Err(stage_error), Ok(())) => {
            warn!(file, %stage_error, "stage failed, working file restored");
            return Err(StageError::StageFailed {
                file: file.to_string(),
                message: stage_error.to_string(),
            });
        }
        (Ok(()), Err(restore_error)) => {
            error!(file, %restore_error, "restore failed after staging");
            return Err(StageError::RestoreFailed {
                file: file.to_string(),
                message: restore_error.to_string(),
            });
        }
        (Ok(()), Ok(())) => {}
    }

    let message = format!("Staged lines {selection} of {file}");
    let new_diff_text = match vcs.working_diff(file, root, ignore_whitespace) {
        Ok(text) => text,
        Err(e) => {
            warn!(file, error = %e, "staged but could not reload the diff");
            return Ok(StageReport {
                staged: true,
                new_diff_text: diff_text.to_string(),
                message: format!("{message} (diff not refreshed: {e})"),
                severity: Severity::Info,
                file_clean: false,
            });
        }
    };
    let file_clean = new_diff_text.trim().is_empty();
    info!(file, %selection, file_clean, "staged selection");

    Ok(StageReport {
        staged: true,
        new_diff_text,
        message,
        severity: Severity::Info,
        file_clean,
    })
}

/// Working bytes, or `None` when the file was deleted
fn read_working(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn restore_working(path: &Path, original: Option<&[u8]>) -> io::Result<()> {
    match original {
        Some(bytes) => write_atomic(path, bytes),
        None => fs::remove_file(path),
    }
}

/// Replace `path` through a temporary file in the same directory, keeping
/// the permissions of the file being replaced
fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let permissions = fs::metadata(path).ok().map(|meta| meta.permissions());

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    if let Some(permissions) = permissions {
        tmp.as_file().set_permissions(permissions)?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::vcs::Changes;
    use similar_asserts::assert_eq;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const BASE: &str = "line1\nline2\nline3\n";
    const WORKING: &str = "line1\nmodified line2\nline3\nnew line4\n";
    const DIFF: &str = "diff --git a/hello.txt b/hello.txt
index 3bd1f0e..a1b2c3d 100644
--- a/hello.txt
+++ b/hello.txt
@@ -1,3 +1,4 @@
 line1
-line2
+modified line2
 line3
+new line4
";

    /// Records calls; `stage` copies the working file into its index
    #[derive(Default)]
    struct MockVcs {
        index: RefCell<HashMap<String, Vec<u8>>>,
        calls: RefCell<Vec<&'static str>>,
        after_stage_diff: String,
        fail_stage: bool,
        fail_working_diff: bool,
        /// Replace the working file with a directory while staging
        clobber_on_stage: bool,
    }

    impl MockVcs {
        fn with_index(file: &str, content: &str) -> Self {
            let mock = Self::default();
            mock.index
                .borrow_mut()
                .insert(file.to_string(), content.as_bytes().to_vec());
            mock
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.borrow().clone()
        }

        fn is_tracked(&self, file: &str) -> bool {
            self.index.borrow().contains_key(file)
        }

        fn staged(&self, file: &str) -> String {
            String::from_utf8(self.index.borrow()[file].clone()).unwrap()
        }
    }

    impl Vcs for MockVcs {
        fn list_changes(&self, _root: &Path) -> Result<Changes, VcsError> {
            self.calls.borrow_mut().push("list_changes");
            Ok(Changes::default())
        }

        fn working_diff(&self, _file: &str, _root: &Path, _ws: bool) -> Result<String, VcsError> {
            self.calls.borrow_mut().push("working_diff");
            if self.fail_working_diff {
                return Err(VcsError::SpawnFailed {
                    command: "diff".to_string(),
                    message: "Resource temporarily unavailable".to_string(),
                });
            }
            Ok(self.after_stage_diff.clone())
        }

        fn staged_diff(&self, _file: &str, _root: &Path) -> Result<String, VcsError> {
            self.calls.borrow_mut().push("staged_diff");
            Ok(String::new())
        }

        fn index_content(&self, file: &str, _root: &Path) -> Result<Vec<u8>, VcsError> {
            self.calls.borrow_mut().push("index_content");
            Ok(self.index.borrow().get(file).cloned().unwrap_or_default())
        }

        fn stage(&self, file: &str, root: &Path) -> Result<(), VcsError> {
            self.calls.borrow_mut().push("stage");
            let path = root.join(file);
            if !path.exists() {
                self.index.borrow_mut().remove(file);
                return Ok(());
            }
            let content = fs::read(&path).unwrap();
            if self.clobber_on_stage {
                fs::remove_file(&path).unwrap();
                fs::create_dir(&path).unwrap();
            }
            if self.fail_stage {
                return Err(VcsError::ExitError {
                    command: format!("add -- {file}"),
                    stderr: "fatal: Unable to create '.git/index.lock': File exists.".to_string(),
                });
            }
            self.index.borrow_mut().insert(file.to_string(), content);
            Ok(())
        }

        fn unstage(&self, _file: &str, _root: &Path) -> Result<(), VcsError> {
            self.calls.borrow_mut().push("unstage");
            Ok(())
        }

        fn discard_working_changes(&self, _file: &str, _root: &Path) -> Result<(), VcsError> {
            self.calls.borrow_mut().push("discard");
            Ok(())
        }

        fn commit(&self, _message: &str, _root: &Path) -> Result<(), VcsError> {
            self.calls.borrow_mut().push("commit");
            Ok(())
        }

        fn amend_commit(&self, _message: &str, _root: &Path) -> Result<(), VcsError> {
            self.calls.borrow_mut().push("amend_commit");
            Ok(())
        }
    }

    fn worktree(content: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        fs::write(&path, content).unwrap();
        (dir, path)
    }

    fn request(selection: SelectionRange) -> StageRequest<'static> {
        StageRequest {
            file: "hello.txt",
            status: Some(StageStatus::Modified),
            diff_text: DIFF,
            selection,
            ignore_whitespace: false,
        }
    }

    #[test]
    fn stages_only_selected_change() {
        let (dir, path) = worktree(WORKING);
        let vcs = MockVcs {
            after_stage_diff: "@@ -1,3 +1,4 @@\n line1\n modified line2\n line3\n+new line4\n"
                .to_string(),
            ..MockVcs::with_index("hello.txt", BASE)
        };

        let report = stage_selection(&vcs, dir.path(), &request(SelectionRange::new(1, 2))).unwrap();

        assert!(report.staged);
        assert!(!report.file_clean);
        assert_eq!(report.severity, Severity::Info);
        assert_eq!(vcs.staged("hello.txt"), "line1\nmodified line2\nline3\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), WORKING);
        assert_eq!(vcs.calls(), vec!["index_content", "stage", "working_diff"]);
    }

    #[test]
    fn staging_everything_reports_clean_file() {
        let (dir, _path) = worktree(WORKING);
        let vcs = MockVcs::with_index("hello.txt", BASE);

        let report = stage_selection(&vcs, dir.path(), &request(SelectionRange::new(0, 4))).unwrap();

        assert!(report.staged);
        assert!(report.file_clean);
        assert_eq!(vcs.staged("hello.txt"), WORKING);
    }

    #[test]
    fn context_only_selection_stages_nothing() {
        let (dir, path) = worktree(WORKING);
        let vcs = MockVcs::with_index("hello.txt", BASE);

        let report = stage_selection(&vcs, dir.path(), &request(SelectionRange::single(0))).unwrap();

        assert!(report.staged);
        assert_eq!(report.new_diff_text, DIFF);
        assert_eq!(report.message, "No changes were staged");
        assert!(!vcs.calls().contains(&"stage"));
        assert_eq!(vcs.staged("hello.txt"), BASE);
        assert_eq!(fs::read_to_string(&path).unwrap(), WORKING);
    }

    #[test]
    fn fully_staged_file_is_rejected_without_backend_calls() {
        let (dir, _path) = worktree(WORKING);
        let vcs = MockVcs::with_index("hello.txt", BASE);
        let request = StageRequest {
            status: Some(StageStatus::Staged),
            ..request(SelectionRange::new(1, 2))
        };

        let err = stage_selection(&vcs, dir.path(), &request).unwrap_err();

        assert!(matches!(err, StageError::NotSupported));
        assert!(err.to_string().contains("not implemented"));
        assert_eq!(err.severity(), Severity::Error);
        assert!(vcs.calls().is_empty());
    }

    #[test]
    fn empty_selection_or_diff_is_silent_noop() {
        let (dir, _path) = worktree(WORKING);
        let vcs = MockVcs::with_index("hello.txt", BASE);

        let report = stage_selection(&vcs, dir.path(), &request(SelectionRange::NONE)).unwrap();
        assert!(!report.staged);
        assert!(report.message.is_empty());

        let empty_diff = StageRequest {
            diff_text: "",
            ..request(SelectionRange::new(0, 3))
        };
        let report = stage_selection(&vcs, dir.path(), &empty_diff).unwrap();
        assert!(!report.staged);
        assert!(report.file_clean);
        assert!(vcs.calls().is_empty());
    }

    #[test]
    fn failed_stage_restores_working_file() {
        let (dir, path) = worktree(WORKING);
        let vcs = MockVcs {
            fail_stage: true,
            ..MockVcs::with_index("hello.txt", BASE)
        };

        let err = stage_selection(&vcs, dir.path(), &request(SelectionRange::new(1, 2))).unwrap_err();

        assert!(matches!(err, StageError::StageFailed { .. }));
        assert_eq!(err.severity(), Severity::Error);
        assert_eq!(fs::read_to_string(&path).unwrap(), WORKING);
        assert_eq!(vcs.staged("hello.txt"), BASE);

        let report = StageReport::from_error(&err, DIFF);
        assert!(!report.staged);
        assert_eq!(report.new_diff_text, DIFF);
        assert!(report.message.contains("index.lock"));
    }

    #[test]
    fn failed_stage_and_restore_is_critical() {
        let (dir, _path) = worktree(WORKING);
        let vcs = MockVcs {
            fail_stage: true,
            clobber_on_stage: true,
            ..MockVcs::with_index("hello.txt", BASE)
        };

        let err = stage_selection(&vcs, dir.path(), &request(SelectionRange::new(1, 2))).unwrap_err();

        assert!(matches!(err, StageError::Inconsistent { .. }));
        assert_eq!(err.severity(), Severity::Critical);
    }

    #[test]
    fn failed_restore_after_stage_is_critical() {
        let (dir, _path) = worktree(WORKING);
        let vcs = MockVcs {
            clobber_on_stage: true,
            ..MockVcs::with_index("hello.txt", BASE)
        };

        let err = stage_selection(&vcs, dir.path(), &request(SelectionRange::new(1, 2))).unwrap_err();

        assert!(matches!(err, StageError::RestoreFailed { .. }));
        assert_eq!(StageReport::from_error(&err, DIFF).severity, Severity::Critical);
        assert_eq!(vcs.staged("hello.txt"), "line1\nmodified line2\nline3\n");
    }

    #[test]
    fn non_utf8_base_is_rejected() {
        let (dir, path) = worktree(WORKING);
        let vcs = MockVcs::default();
        vcs.index
            .borrow_mut()
            .insert("hello.txt".to_string(), vec![0xff, 0xfe, b'\n']);

        let err = stage_selection(&vcs, dir.path(), &request(SelectionRange::new(1, 2))).unwrap_err();

        assert!(matches!(err, StageError::NonUtf8Content { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), WORKING);
    }

    #[test]
    fn deletion_stages_removal_without_recreating_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hello.txt");
        let vcs = MockVcs::with_index("hello.txt", BASE);
        let deletion = "diff --git a/hello.txt b/hello.txt
deleted file mode 100644
index 3bd1f0e..0000000
--- a/hello.txt
+++ /dev/null
@@ -1,3 +0,0 @@
-line1
-line2
-line3
";
        let request = StageRequest {
            diff_text: deletion,
            ..request(SelectionRange::new(0, 2))
        };

        let report = stage_selection(&vcs, dir.path(), &request).unwrap();

        assert!(report.staged);
        assert!(report.file_clean);
        assert!(!vcs.is_tracked("hello.txt"));
        assert!(!path.exists());
    }

    #[test]
    fn diff_reload_failure_still_reports_staged() {
        let (dir, path) = worktree(WORKING);
        let vcs = MockVcs {
            fail_working_diff: true,
            ..MockVcs::with_index("hello.txt", BASE)
        };

        let report = stage_selection(&vcs, dir.path(), &request(SelectionRange::new(1, 2))).unwrap();

        assert!(report.staged);
        assert!(!report.file_clean);
        assert_eq!(report.severity, Severity::Info);
        assert_eq!(report.new_diff_text, DIFF);
        assert!(report.message.starts_with("Staged lines 1..2 of hello.txt"));
        assert!(report.message.contains("not refreshed"));
        assert_eq!(vcs.staged("hello.txt"), "line1\nmodified line2\nline3\n");
        assert_eq!(fs::read_to_string(&path).unwrap(), WORKING);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_is_rejected_and_left_alone() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("target.txt"), WORKING).unwrap();
        let path = dir.path().join("hello.txt");
        std::os::unix::fs::symlink("target.txt", &path).unwrap();
        let vcs = MockVcs::with_index("hello.txt", BASE);

        let err = stage_selection(&vcs, dir.path(), &request(SelectionRange::new(1, 2))).unwrap_err();

        assert!(matches!(err, StageError::NotRegularFile { .. }));
        assert_eq!(err.severity(), Severity::Error);
        assert!(vcs.calls().is_empty());
        assert!(fs::symlink_metadata(&path).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&path).unwrap(), PathBuf::from("target.txt"));
        assert_eq!(vcs.staged("hello.txt"), BASE);
    }

    #[cfg(unix)]
    #[test]
    fn restore_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, path) = worktree(WORKING);
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        let vcs = MockVcs::with_index("hello.txt", BASE);

        stage_selection(&vcs, dir.path(), &request(SelectionRange::new(1, 2))).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
