//! Stage an arbitrary contiguous range of diff lines of one file.
//!
//! The pipeline is pure up to the last step: [`ParsedDiff::parse`] reads a
//! unified diff, [`DisplayIndexMap::project`] numbers the lines a user sees,
//! and [`compose`] builds the content the index should hold for a selection
//! of those lines. [`stage::stage_selection`] then pushes that content through
//! a [`Vcs`] backend without disturbing the working tree.

use error_set::error_set;

pub mod compose;
pub mod diff;
pub mod display;
pub mod selection;
pub mod session;
pub mod stage;
pub mod vcs;

pub use compose::compose;
pub use diff::{DiffLine, Hunk, HunkRange, LineKind, ParsedDiff};
pub use display::{DisplayIndexMap, DisplayLine, format_numbered};
pub use selection::{FileSelection, ParseError, SelectionRange, parse_file_selection};
pub use session::{CommandError, Config, Event, Session, spawn_refresh_timer};
pub use stage::{Severity, StageError, StageReport, StageRequest, stage_selection};
pub use vcs::{Changes, GitCli, StageStatus, Vcs, VcsError};

error_set! {
    /// Top-level error for line-stager operations
    LineStagerError := {
        #[display("No changes found in {file}")]
        NoChanges { file: String },
        #[display("{message}")]
        ActionFailed { message: String },
        /// The working tree may hold partially staged content
        #[display("CRITICAL: {message}")]
        Critical { message: String },
        #[display("I/O error: {message}")]
        IoFailed { message: String },
        ParseError(ParseError),
        VcsError(VcsError),
    }
}

impl LineStagerError {
    /// Failure carried by a report, `None` for a successful one
    pub fn from_report(report: &StageReport) -> Option<Self> {
        match report.severity {
            Severity::Info => None,
            Severity::Error => Some(LineStagerError::ActionFailed {
                message: report.message.clone(),
            }),
            Severity::Critical => Some(LineStagerError::Critical {
                message: report.message.clone(),
            }),
        }
    }
}
