//! Interactive staging state and its serialized event loop.
//!
//! A [`Session`] owns everything a front end needs between key presses: the
//! changed-file list, the current file's diff and projection, the cursor and
//! the selection. All mutation goes through [`Session::handle`]; background
//! threads only send [`Event`]s.

use crate::diff::ParsedDiff;
use crate::display::DisplayIndexMap;
use crate::selection::{ParseError, SelectionRange, parse_range};
use crate::stage::{self, Severity, StageError, StageReport, StageRequest};
use crate::vcs::{StageStatus, Vcs, VcsError};
use error_set::error_set;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc::{Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

error_set! {
    /// Errors from parsing an interactive command line
    CommandError := {
        #[display("Unknown command '{command}'")]
        UnknownCommand { command: String },
        #[display("'{command}' needs an argument")]
        MissingArgument { command: String },
        #[display("Invalid line count '{value}'")]
        InvalidCount { value: String },
        ParseError(ParseError),
    }
}

/// Settings a session starts from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Repository top-level directory
    pub root: PathBuf,
    pub ignore_whitespace: bool,
}

/// Input to the event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Re-read the file list and the current diff
    Refresh,
    SelectFile(String),
    /// Move the cursor by this many display lines
    MoveCursor(isize),
    /// Start extending the selection from the cursor, or stop extending it
    ToggleAnchor,
    Select(SelectionRange),
    ClearSelection,
    StageSelection,
    StageFile,
    UnstageFile,
    DiscardFile,
    Commit { message: String, amend: bool },
    Quit,
}

impl FromStr for Event {
    type Err = CommandError;

    /// Parse one line of the interactive command language, e.g.
    /// `select 3..7`, `down 2`, `commit fix typo`.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (command, arg) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(command, arg)| (command, arg.trim()));
        let required = || {
            if arg.is_empty() {
                Err(CommandError::MissingArgument {
                    command: command.to_string(),
                })
            } else {
                Ok(arg.to_string())
            }
        };
        let count = || -> Result<isize, CommandError> {
            if arg.is_empty() {
                return Ok(1);
            }
            arg.parse().map_err(|_| CommandError::InvalidCount {
                value: arg.to_string(),
            })
        };

        match command {
            "refresh" | "r" => Ok(Event::Refresh),
            "file" | "f" => required().map(Event::SelectFile),
            "down" | "j" => count().map(Event::MoveCursor),
            "up" | "k" => count()?
                .checked_neg()
                .map(Event::MoveCursor)
                .ok_or_else(|| CommandError::InvalidCount {
                    value: arg.to_string(),
                }),
            "mark" | "v" => Ok(Event::ToggleAnchor),
            "select" | "s" => Ok(Event::Select(parse_range(&required()?)?)),
            "clear" => Ok(Event::ClearSelection),
            "stage" => Ok(Event::StageSelection),
            "stage-file" => Ok(Event::StageFile),
            "unstage" => Ok(Event::UnstageFile),
            "discard" => Ok(Event::DiscardFile),
            "commit" => required().map(|message| Event::Commit {
                message,
                amend: false,
            }),
            "amend" => required().map(|message| Event::Commit {
                message,
                amend: true,
            }),
            "quit" | "q" => Ok(Event::Quit),
            _ => Err(CommandError::UnknownCommand {
                command: command.to_string(),
            }),
        }
    }
}

/// Interactive staging state for one repository
pub struct Session<V> {
    vcs: V,
    config: Config,
    files: Vec<(String, StageStatus)>,
    current: Option<String>,
    diff_text: String,
    parsed: ParsedDiff,
    map: DisplayIndexMap,
    selection: SelectionRange,
    cursor: usize,
    anchor: Option<usize>,
}

impl<V: Vcs> Session<V> {
    /// Empty session; call [`Session::refresh`] to load the repository
    pub fn new(vcs: V, config: Config) -> Self {
        Self {
            vcs,
            config,
            files: Vec::new(),
            current: None,
            diff_text: String::new(),
            parsed: ParsedDiff::default(),
            map: DisplayIndexMap::default(),
            selection: SelectionRange::NONE,
            cursor: 0,
            anchor: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn files(&self) -> &[(String, StageStatus)] {
        &self.files
    }

    pub fn current_file(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current_status(&self) -> Option<StageStatus> {
        let current = self.current.as_deref()?;
        self.files
            .iter()
            .find(|(file, _)| file == current)
            .map(|(_, status)| *status)
    }

    pub fn diff_text(&self) -> &str {
        &self.diff_text
    }

    pub fn parsed(&self) -> &ParsedDiff {
        &self.parsed
    }

    pub fn display_map(&self) -> &DisplayIndexMap {
        &self.map
    }

    pub fn selection(&self) -> SelectionRange {
        self.selection
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Re-read the changed files and the current file's diff.
    ///
    /// Keeps the current file while it still has changes, otherwise moves to
    /// the first file that can still be staged.
    pub fn refresh(&mut self) -> Result<(), VcsError> {
        let changes = self.vcs.list_changes(&self.config.root)?;
        self.files = changes.entries();

        let still_listed = self
            .current
            .as_ref()
            .is_some_and(|current| self.files.iter().any(|(file, _)| file == current));
        if !still_listed {
            let next = self
                .files
                .iter()
                .find(|(_, status)| status.has_working_changes())
                .or(self.files.first())
                .map(|(file, _)| file.clone());
            debug!(previous = ?self.current, ?next, "current file changed");
            self.current = next;
            self.reset_selection();
            self.cursor = 0;
        }

        self.load_diff()
    }

    /// Make `file` current and load its diff
    pub fn select_file(&mut self, file: &str) -> Result<(), VcsError> {
        self.current = Some(file.to_string());
        self.reset_selection();
        self.cursor = 0;
        self.load_diff()
    }

    /// Working diff, or the staged diff when only staged changes remain
    fn load_diff(&mut self) -> Result<(), VcsError> {
        let diff_text = match self.current.as_deref() {
            None => String::new(),
            Some(file) if self.current_status() == Some(StageStatus::Staged) => {
                self.vcs.staged_diff(file, &self.config.root)?
            }
            Some(file) => {
                self.vcs
                    .working_diff(file, &self.config.root, self.config.ignore_whitespace)?
            }
        };
        self.set_diff(diff_text);
        Ok(())
    }

    /// Replace the diff and rebuild everything derived from it
    fn set_diff(&mut self, diff_text: String) {
        if diff_text == self.diff_text {
            return;
        }
        self.parsed = ParsedDiff::parse(&diff_text);
        self.map = DisplayIndexMap::project(&self.parsed);
        self.diff_text = diff_text;

        self.selection = self.selection.clamp(self.map.len());
        self.cursor = self.cursor.min(self.map.len().saturating_sub(1));
        if self.anchor.is_some_and(|anchor| anchor >= self.map.len()) {
            self.anchor = None;
        }
    }

    fn reset_selection(&mut self) {
        self.selection = SelectionRange::NONE;
        self.anchor = None;
    }

    /// Move the cursor, extending the selection while an anchor is set
    pub fn move_cursor(&mut self, delta: isize) {
        let last = self.map.len().saturating_sub(1);
        self.cursor = self.cursor.saturating_add_signed(delta).min(last);
        if let Some(anchor) = self.anchor {
            self.selection = SelectionRange::new(anchor, self.cursor);
        }
    }

    pub fn toggle_anchor(&mut self) {
        if self.anchor.take().is_none() && !self.map.is_empty() {
            self.anchor = Some(self.cursor);
            self.selection = SelectionRange::single(self.cursor);
        }
    }

    /// Select a display range directly, clamped to the current diff
    pub fn select(&mut self, range: SelectionRange) {
        self.anchor = None;
        self.selection = range.clamp(self.map.len());
        if let Some(end) = self.selection.end() {
            self.cursor = end;
        }
    }

    pub fn clear_selection(&mut self) {
        self.reset_selection();
    }

    /// Stage the selected lines of the current file.
    ///
    /// The selection is cleared afterwards unless staging failed. Once the
    /// file has nothing left to stage the session moves to the next file.
    pub fn stage_selection(&mut self) -> StageReport {
        let Some(file) = self.current.clone() else {
            return self.report(Ok(String::new()));
        };
        let request = StageRequest {
            file: &file,
            status: self.current_status(),
            diff_text: &self.diff_text,
            selection: self.selection,
            ignore_whitespace: self.config.ignore_whitespace,
        };

        match stage::stage_selection(&self.vcs, &self.config.root, &request) {
            Ok(report) => {
                self.reset_selection();
                self.set_diff(report.new_diff_text.clone());
                if report.staged {
                    if report.file_clean {
                        info!(file = %file, "no changes left to stage, moving on");
                        self.current = None;
                    }
                    if let Err(e) = self.refresh() {
                        return self.report(Err(e.into()));
                    }
                }
                report
            }
            Err(e) => StageReport::from_error(&e, &self.diff_text),
        }
    }

    /// Stage the whole current file
    pub fn stage_file(&mut self) -> StageReport {
        self.file_action("Staged", |vcs, file, root| vcs.stage(file, root))
    }

    pub fn unstage_file(&mut self) -> StageReport {
        self.file_action("Unstaged", |vcs, file, root| vcs.unstage(file, root))
    }

    pub fn discard_file(&mut self) -> StageReport {
        self.file_action("Discarded changes to", |vcs, file, root| {
            vcs.discard_working_changes(file, root)
        })
    }

    pub fn commit(&mut self, message: &str, amend: bool) -> StageReport {
        let root = &self.config.root;
        let result = if amend {
            self.vcs.amend_commit(message, root)
        } else {
            self.vcs.commit(message, root)
        };
        let result = result
            .and_then(|()| self.refresh())
            .map(|()| if amend { "Amended commit" } else { "Committed" }.to_string());
        self.report(result.map_err(StageError::from))
    }

    fn file_action(
        &mut self,
        verb: &str,
        action: impl FnOnce(&V, &str, &Path) -> Result<(), VcsError>,
    ) -> StageReport {
        let Some(file) = self.current.clone() else {
            return self.report(Ok(String::new()));
        };
        let result = action(&self.vcs, &file, &self.config.root)
            .and_then(|()| {
                self.reset_selection();
                self.refresh()
            })
            .map(|()| format!("{verb} {file}"));
        self.report(result.map_err(StageError::from))
    }

    fn report(&self, result: Result<String, StageError>) -> StageReport {
        match result {
            Ok(message) => StageReport {
                staged: !message.is_empty(),
                new_diff_text: self.diff_text.clone(),
                message,
                severity: Severity::Info,
                file_clean: self.diff_text.trim().is_empty(),
            },
            Err(e) => StageReport::from_error(&e, &self.diff_text),
        }
    }

    /// Apply one event; returns feedback for actions that produce any
    pub fn handle(&mut self, event: Event) -> Option<StageReport> {
        debug!(?event, "handling event");
        match event {
            Event::Refresh => self.refresh().err().map(|e| self.report(Err(e.into()))),
            Event::SelectFile(file) => self
                .select_file(&file)
                .err()
                .map(|e| self.report(Err(e.into()))),
            Event::MoveCursor(delta) => {
                self.move_cursor(delta);
                None
            }
            Event::ToggleAnchor => {
                self.toggle_anchor();
                None
            }
            Event::Select(range) => {
                self.select(range);
                None
            }
            Event::ClearSelection => {
                self.clear_selection();
                None
            }
            Event::StageSelection => Some(self.stage_selection()),
            Event::StageFile => Some(self.stage_file()),
            Event::UnstageFile => Some(self.unstage_file()),
            Event::DiscardFile => Some(self.discard_file()),
            Event::Commit { message, amend } => Some(self.commit(&message, amend)),
            Event::Quit => None,
        }
    }

    /// Process events until [`Event::Quit`] or until every sender is gone.
    ///
    /// `on_update` runs after every handled event so a front end can redraw.
    /// Refreshes queued behind one another are coalesced into one.
    pub fn run(
        &mut self,
        events: &Receiver<Event>,
        mut on_update: impl FnMut(&Self, Option<&StageReport>),
    ) {
        let mut pending = None;
        loop {
            let event = match pending.take() {
                Some(event) => event,
                None => match events.recv() {
                    Ok(event) => event,
                    Err(_) => break,
                },
            };
            if event == Event::Quit {
                break;
            }
            if event == Event::Refresh {
                while let Ok(next) = events.try_recv() {
                    if next != Event::Refresh {
                        pending = Some(next);
                        break;
                    }
                }
            }
            let report = self.handle(event);
            on_update(self, report.as_ref());
        }
    }
}

/// Send [`Event::Refresh`] every `interval` until the receiver is dropped
pub fn spawn_refresh_timer(events: Sender<Event>, interval: Duration) -> JoinHandle<()> {
    thread::spawn(move || {
        loop {
            thread::sleep(interval);
            if events.send(Event::Refresh).is_err() {
                break;
            }
        }
    })
}
