use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use line_stager::{
    Config, Event, GitCli, LineStagerError, Session, StageReport, StageStatus, format_numbered,
    parse_file_selection, spawn_refresh_timer,
};
use std::env;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "line-stager", version)]
#[command(about = "Stage any contiguous range of diff lines into the git index")]
struct Cli {
    /// Repository to operate on (any path inside it)
    #[arg(long, global = true, env = "LINE_STAGER_REPO", default_value = ".")]
    repo: PathBuf,

    /// Ignore whitespace changes when computing working diffs
    #[arg(long, global = true, env = "LINE_STAGER_IGNORE_WHITESPACE")]
    ignore_whitespace: bool,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List files with pending changes
    Status,
    /// Show numbered working diffs (all changed files if none given)
    Diff { files: Vec<String> },
    /// Stage display lines by reference (e.g., "src/lib.rs:4..9")
    Stage {
        /// FILE:N or FILE:N..M, numbered as printed by `diff`
        #[arg(required = true)]
        file_refs: Vec<String>,
    },
    /// Remove files from the index, keeping working changes
    Unstage {
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Throw away working-tree changes to files
    Discard {
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Commit the index
    Commit {
        #[arg(short, long)]
        message: String,
        /// Replace the last commit instead
        #[arg(long)]
        amend: bool,
    },
    /// Read commands from stdin (`file F`, `select 2..5`, `stage`, `quit`, ...)
    Interactive {
        /// Seconds between automatic refreshes
        #[arg(long, default_value_t = 2)]
        refresh_secs: u64,
    },
    /// Print shell completions
    Completions { shell: Shell },
    /// Print the man page
    Man,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ LineStagerError::Critical { .. }) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), LineStagerError> {
    match cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "line-stager", &mut io::stdout());
            return Ok(());
        }
        Commands::Man => {
            return clap_mangen::Man::new(Cli::command())
                .render(&mut io::stdout())
                .map_err(|e| LineStagerError::IoFailed {
                    message: e.to_string(),
                });
        }
        _ => {}
    }

    let git = GitCli::new();
    let config = Config {
        root: git.toplevel(&cli.repo)?,
        ignore_whitespace: cli.ignore_whitespace,
    };
    debug!(root = %config.root.display(), "opened repository");

    let mut session = Session::new(git, config);
    session.refresh()?;

    match cli.command {
        Commands::Status => status(&session),
        Commands::Diff { files } => diff(&mut session, &files)?,
        Commands::Stage { file_refs } => {
            for file_ref in &file_refs {
                stage(&mut session, file_ref)?;
            }
        }
        Commands::Unstage { files } => {
            for file in &files {
                session.select_file(file)?;
                check(&session.unstage_file())?;
            }
        }
        Commands::Discard { files } => {
            for file in &files {
                session.select_file(file)?;
                check(&session.discard_file())?;
            }
        }
        Commands::Commit { message, amend } => check(&session.commit(&message, amend))?,
        Commands::Interactive { refresh_secs } => {
            interactive(&mut session, Duration::from_secs(refresh_secs.max(1)))
        }
        Commands::Completions { .. } | Commands::Man => {}
    }

    Ok(())
}

/// `LINE_STAGER_LOG` wins over `RUST_LOG`; a bare level applies to this crate only
fn init_logging(verbose: u8) {
    let filter = match (env::var("LINE_STAGER_LOG"), env::var("RUST_LOG")) {
        (Ok(level), _) if !level.contains(['=', ',', ':']) => {
            EnvFilter::new(format!("warn,line_stager={level}"))
        }
        (Ok(directives), _) | (Err(_), Ok(directives)) => EnvFilter::new(directives),
        (Err(_), Err(_)) => EnvFilter::new(match verbose {
            0 => "warn",
            1 => "warn,line_stager=debug",
            _ => "warn,line_stager=trace",
        }),
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn status(session: &Session<GitCli>) {
    for (file, status) in session.files() {
        println!("{:<10} {file}", status.to_string());
    }
}

fn diff(session: &mut Session<GitCli>, files: &[String]) -> Result<(), LineStagerError> {
    let files: Vec<String> = if files.is_empty() {
        session
            .files()
            .iter()
            .filter(|(_, status)| status.has_working_changes())
            .map(|(file, _)| file.clone())
            .collect()
    } else {
        files.to_vec()
    };

    let mut first = true;
    for file in &files {
        session.select_file(file)?;
        if session.diff_text().is_empty() {
            return Err(LineStagerError::NoChanges { file: file.clone() });
        }
        if !first {
            println!();
        }
        first = false;
        print!(
            "{}",
            format_numbered(session.parsed(), session.display_map())
        );
    }
    Ok(())
}

fn stage(session: &mut Session<GitCli>, file_ref: &str) -> Result<(), LineStagerError> {
    let selection = parse_file_selection(file_ref)?;
    session.select_file(&selection.file)?;

    if session.current_status().is_none() {
        return Err(LineStagerError::NoChanges {
            file: selection.file,
        });
    }

    session.select(selection.range);
    if session.selection().is_empty() {
        warn!(file_ref, "selection is past the end of the diff");
    }
    let report = session.stage_selection();
    check(&report)?;
    if report.message.is_empty() {
        eprintln!("Nothing selected in {}", selection.file);
    }
    Ok(())
}

/// Print a report's message, failing on error reports
fn check(report: &StageReport) -> Result<(), LineStagerError> {
    if let Some(error) = LineStagerError::from_report(report) {
        return Err(error);
    }
    if !report.message.is_empty() {
        eprintln!("{}", report.message);
    }
    Ok(())
}

fn interactive(session: &mut Session<GitCli>, refresh: Duration) {
    let (tx, rx) = mpsc::channel();

    let input = tx.clone();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<Event>() {
                Ok(event) => {
                    if input.send(event).is_err() {
                        return;
                    }
                }
                Err(e) => eprintln!("{e}"),
            }
        }
        let _ = input.send(Event::Quit);
    });
    let _timer = spawn_refresh_timer(tx, refresh);

    let mut shown = None;
    render(session, None, &mut shown);
    session.run(&rx, |session, report| render(session, report, &mut shown));
}

type Shown = Option<(Option<String>, String, String, usize)>;

/// Print feedback, and the current diff whenever what it shows changed
fn render(session: &Session<GitCli>, report: Option<&StageReport>, shown: &mut Shown) {
    if let Some(report) = report.filter(|r| !r.message.is_empty()) {
        match LineStagerError::from_report(report) {
            Some(error) => eprintln!("error: {error}"),
            None => eprintln!("{}", report.message),
        }
    }

    let state = (
        session.current_file().map(str::to_string),
        session.diff_text().to_string(),
        session.selection().to_string(),
        session.cursor(),
    );
    if shown.as_ref() == Some(&state) {
        return;
    }

    match session.current_file() {
        None => println!("No changes"),
        Some(file) => {
            let status = session
                .current_status()
                .map_or("clean".to_string(), |status: StageStatus| status.to_string());
            println!("== {file} ({status})");
            print!(
                "{}",
                format_numbered(session.parsed(), session.display_map())
            );
            println!(
                "-- cursor {} selection {}",
                session.cursor(),
                session.selection()
            );
        }
    }
    *shown = Some(state);
}
