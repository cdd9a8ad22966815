#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # canvas2toml
//!
//! Grade Canvas assignments offline.
//!
//! 1. `canvas2toml get assignments` downloads submissions (and optionally
//!    their PDFs) into a TOML file.
//! 2. Edit the `score` and `comment` fields.
//! 3. `canvas2toml upload <file>` pushes them back after confirmation,
//!    keeping a backup of what Canvas had before.
//!
//! Course details are read from `course_info.toml` (or `CANVAS_*`
//! environment variables).

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{Context, Result};
use bpaf::*;
use canvas2toml::{
    backup::BackupManager,
    canvas::{Candidate, CandidateKind, CanvasClient, CourseApi},
    codec,
    config::CourseConfig,
    constants::DEFAULT_COURSE_FILE,
    download,
    hist::Histogram,
    prompt::TerminalPrompt,
    upload::{Reconciler, UploadOutcome},
};
use colored::Colorize;
use dotenvy::dotenv;
use tracing::{Level, metadata::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};

/// `get` subcommands.
#[derive(Debug, Clone)]
enum GetCmd {
    /// Download an assignment, optionally without names
    Assignments(bool),
    /// Download quiz responses
    Quiz,
}

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Download from Canvas
    Get(GetCmd),
    /// Upload a grade document
    Upload(PathBuf),
    /// Print score histograms
    Hist(PathBuf),
    /// Print usage
    Help,
}

/// Parsed command line.
#[derive(Debug, Clone)]
struct Opts {
    /// Course configuration file
    course:  PathBuf,
    /// Output path override for `get`
    output:  Option<PathBuf>,
    /// Debug logging
    verbose: bool,
    /// What to do
    cmd:     Cmd,
}

/// Builds the command line parser
fn options() -> OptionParser<Opts> {
    /// parses a grade document path
    fn file() -> impl Parser<PathBuf> {
        positional::<PathBuf>("FILE").help("Grade document (TOML)")
    }

    let course = short('c')
        .long("course")
        .help("Course configuration file")
        .argument::<PathBuf>("PATH")
        .fallback(PathBuf::from(DEFAULT_COURSE_FILE));

    let output = short('o')
        .long("output")
        .help("Where to write the downloaded document")
        .argument::<PathBuf>("PATH")
        .optional();

    let verbose = short('v')
        .long("verbose")
        .help("Log every Canvas request")
        .switch();

    let anon = short('a')
        .long("anon")
        .help("Leave student names out of the document")
        .switch();

    let assignments = construct!(GetCmd::Assignments(anon))
        .to_options()
        .command("assignments")
        .help("Pick an assignment and download its submissions");

    let quiz = pure(GetCmd::Quiz)
        .to_options()
        .command("quiz")
        .help("Pick a quiz and download its responses");

    let get = construct!([assignments, quiz])
        .to_options()
        .command("get")
        .help("Download grades from Canvas")
        .map(Cmd::Get);

    let upload = construct!(Cmd::Upload(file()))
        .to_options()
        .command("upload")
        .help("Upload scores and comments from a grade document");

    let hist = construct!(Cmd::Hist(file()))
        .to_options()
        .command("hist")
        .help("Print histograms of scores and question points");

    let help = pure(Cmd::Help)
        .to_options()
        .command("help")
        .help("Print usage");

    let cmd = construct!([get, upload, hist, help]);

    construct!(Opts {
        course,
        output,
        verbose,
        cmd
    })
    .to_options()
    .descr("Round-trip Canvas grades through TOML files")
}

/// Loads the course config and builds a client
fn connect(course: &Path) -> Result<CanvasClient> {
    let config = CourseConfig::load(course)?;
    CanvasClient::new(config).context("Could not set up the Canvas client")
}

/// One line per candidate in the selection list
fn describe(candidate: &Candidate) -> String {
    match &candidate.due_at {
        Some(due) => format!("{} (id {}, due {due})", candidate.display_title(), candidate.id),
        None => format!("{} (id {})", candidate.display_title(), candidate.id),
    }
}

/// Lists `kind` and lets the operator pick one
async fn pick(
    client: &CanvasClient,
    prompt: &mut TerminalPrompt<std::io::StdinLock<'static>, std::io::Stdout>,
    kind: CandidateKind,
) -> Result<Option<Candidate>> {
    let mut candidates = client
        .list_candidates(kind)
        .await
        .with_context(|| format!("Could not list {kind:?}"))?;
    if candidates.is_empty() {
        eprintln!("{}", "Nothing to choose from.".yellow());
        return Ok(None);
    }
    let picked = prompt.choose(&candidates, describe)?;
    Ok(picked.map(|i| candidates.swap_remove(i)))
}

/// `get assignments`
async fn get_assignments(course: &Path, output: Option<PathBuf>, anon: bool) -> Result<ExitCode> {
    let client = connect(course)?;
    let mut prompt = TerminalPrompt::stdio();
    let Some(choice) = pick(&client, &mut prompt, CandidateKind::Assignments).await? else {
        return Ok(ExitCode::SUCCESS);
    };

    let out = output.unwrap_or_else(|| download::assignment_output_path(&choice));
    let pdfs = prompt.ask_yes_no("Download PDF submissions? [y/N]: ")?;

    let submissions = client
        .fetch_submissions(choice.id)
        .await
        .with_context(|| format!("Could not fetch submissions for {}", choice.display_title()))?;

    let files = if pdfs {
        let dir = download::submissions_dir(&out);
        let files =
            download::download_attachments(&client, &submissions, choice.display_title(), &dir)
                .await?;
        eprintln!("Downloaded {} PDF(s) to {}", files.len(), dir.display());
        files
    } else {
        HashMap::new()
    };

    let doc = download::assignment_document(&choice, &submissions, &files, anon);
    codec::write(&out, &doc).with_context(|| format!("Could not save {}", out.display()))?;
    eprintln!("{} {}", "Saved assignment to".green(), out.display());
    Ok(ExitCode::SUCCESS)
}

/// `get quiz`
async fn get_quiz(course: &Path, output: Option<PathBuf>) -> Result<ExitCode> {
    let client = connect(course)?;
    let mut prompt = TerminalPrompt::stdio();
    let Some(choice) = pick(&client, &mut prompt, CandidateKind::Quizzes).await? else {
        return Ok(ExitCode::SUCCESS);
    };

    let out = output.unwrap_or_else(|| download::quiz_output_path(&choice));
    let csv = client
        .quiz_student_analysis(choice.id)
        .await
        .with_context(|| format!("Could not fetch the report for {}", choice.display_title()))?;
    let report = download::parse_quiz_report(&csv)?;
    let doc = download::quiz_document(&choice, &report);
    codec::write(&out, &doc).with_context(|| format!("Could not save {}", out.display()))?;
    eprintln!("{} {}", "Saved quiz responses to".green(), out.display());
    Ok(ExitCode::SUCCESS)
}

/// `upload <file>`
async fn upload(course: &Path, file: &Path) -> Result<ExitCode> {
    let doc = codec::read(file).with_context(|| format!("Could not load {}", file.display()))?;
    let client = connect(course)?;

    let outcome = Reconciler::builder()
        .api(&client)
        .confirm(TerminalPrompt::stdio())
        .backups(BackupManager::for_source(file))
        .build()
        .run(&doc)
        .await?;

    match outcome {
        UploadOutcome::Done(summary) => {
            if summary.results.is_empty() {
                eprintln!("{}", "Nothing to upload.".yellow());
            } else {
                eprintln!("{}", summary.render());
            }
            if let Some(backup) = &summary.backup {
                eprintln!("Previous Canvas state saved to {}", backup.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        UploadOutcome::Aborted { .. } => {
            eprintln!("{}", "Upload cancelled; nothing was changed.".yellow());
            Ok(ExitCode::FAILURE)
        }
    }
}

/// `hist <file>`
fn hist(file: &Path) -> Result<ExitCode> {
    let doc = codec::read(file).with_context(|| format!("Could not load {}", file.display()))?;
    let histograms = Histogram::from_document(&doc);
    if histograms.is_empty() {
        println!("No histogram data found.");
    }
    for histogram in histograms {
        println!("{histogram}");
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenv().ok();

    let opts = options().run();

    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false);
    let filter_layer =
        LevelFilter::from_level(if opts.verbose { Level::DEBUG } else { Level::INFO });
    tracing_subscriber::registry()
        .with(fmt)
        .with(filter_layer)
        .init();

    match opts.cmd {
        Cmd::Get(GetCmd::Assignments(anon)) => get_assignments(&opts.course, opts.output, anon).await,
        Cmd::Get(GetCmd::Quiz) => get_quiz(&opts.course, opts.output).await,
        Cmd::Upload(file) => upload(&opts.course, &file).await,
        Cmd::Hist(file) => hist(&file),
        Cmd::Help => {
            if let Err(usage) = options().run_inner(&["--help"]) {
                println!("{}", usage.unwrap_stdout());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
