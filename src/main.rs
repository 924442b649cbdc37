//! `motionc`: a thin CLI driver that exercises the assembler (and,
//! with `run`, the controller stepping loop against an in-memory
//! dummy chain) without requiring a GUI shell. Not the richer
//! command-line wrapper spec.md's Non-goals exclude — just enough to
//! prove the library end to end.

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use geckoasm::assembler::{Assembler, AssemblerHost};
use geckoasm::controller::transport::DummyChain;
use geckoasm::controller::{Controller, StepMode};
use geckoasm::{AssemblerConfig, Mark, OpenedSource, PathExpander, SearchPathEntry, SourceBuffer, SourceProvider};

#[derive(Parser)]
#[command(name = "motionc", about = "Motion-control assembler and controller driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to a TOML config file overriding the defaults below
    ///; defaults to `motionc.toml` in the current
    /// directory if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Additional library search path entries, tried in order after
    /// {project}/{userlib}/{stdlib}.
    #[arg(long = "search-path", global = true)]
    search_path: Vec<PathBuf>,

    /// Abort assembly after this many accumulated errors.
    #[arg(long, default_value_t = 100, global = true)]
    error_threshold: usize,
}

/// On-disk shape of `motionc.toml`: the same two knobs the CLI flags
/// expose, read once at startup and merged underneath them (a CLI flag
/// always wins over the file).
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    search_path: Vec<PathBuf>,
    error_threshold: Option<usize>,
}

fn load_file_config(explicit: Option<&Path>) -> Result<FileConfig> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let default = PathBuf::from("motionc.toml");
            if !default.exists() {
                return Ok(FileConfig::default());
            }
            default
        }
    };
    let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Subcommand)]
enum Command {
    /// Assemble a source file and report errors or the resulting
    /// object code size.
    Assemble { path: PathBuf },
    /// Assemble, then drive the resulting image through a dummy
    /// in-memory transport to exercise the controller end to end.
    Run { path: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let file_config = load_file_config(cli.config.as_deref())?;

    let mut search_path: Vec<SearchPathEntry> = vec![
        SearchPathEntry::Project,
        SearchPathEntry::UserLib,
        SearchPathEntry::StdLib,
    ];
    search_path.extend(file_config.search_path.iter().cloned().map(SearchPathEntry::Literal));
    search_path.extend(cli.search_path.iter().cloned().map(SearchPathEntry::Literal));

    let error_threshold = if cli.error_threshold != 100 {
        cli.error_threshold
    } else {
        file_config.error_threshold.unwrap_or(cli.error_threshold)
    };

    let config = AssemblerConfig {
        search_path,
        error_threshold,
    };

    match cli.command {
        Command::Assemble { path } => assemble(&path, config).map(|_| ()),
        Command::Run { path } => {
            let object = assemble(&path, config)?;
            run_against_dummy_chain(object)
        }
    }
}

fn assemble(path: &Path, config: AssemblerConfig) -> Result<geckoasm::ObjectCode> {
    let provider = FsSourceProvider;
    let expander = EnvPathExpander;
    let host = AssemblerHost {
        source_provider: &provider,
        path_expander: &expander,
        macro_evaluator: None,
    };
    let assembler = Assembler::new(config, host);
    let report = assembler.run(path);

    for error in &report.errors {
        tracing::warn!("{error}");
    }
    let object = report.object.ok_or_else(|| {
        anyhow::anyhow!("assembly of {} failed with {} error(s)", path.display(), report.errors.len())
    })?;
    tracing::info!(
        instructions = object.len(),
        clean = report.errors.is_empty(),
        "assembly finished"
    );
    Ok(object)
}

/// Step the assembled image to completion against a `DummyChain`,
/// logging the final state. Demonstrates the Controller wiring; a
/// real deployment connects a `SerialTransport` instead (the `serial`
/// feature).
fn run_against_dummy_chain(object: geckoasm::ObjectCode) -> Result<()> {
    let mut controller = Controller::new();
    controller.connect(Box::new(DummyChain::new()));
    controller.load_object(object);
    controller.run(StepMode::RunUntilBreak)?;

    let mut ticks = 0;
    while controller.current_instruction().is_some() && controller.take_send_next() {
        ticks += 1;
        if ticks > 10_000 {
            anyhow::bail!("program did not reach Ready within {ticks} ticks");
        }
        controller.dispatch_current()?;
    }
    tracing::info!(ticks, state = ?controller.state(), "run finished");
    Ok(())
}

struct FsBuffer {
    path: PathBuf,
}

/// A mark over a plain on-disk file: since `motionc` has no live text
/// widget to track edits through, it just remembers the line it was
/// created at.
struct FsMark(usize);

impl Mark for FsMark {
    fn line(&self) -> usize {
        self.0
    }
    fn iter(&self) -> usize {
        0
    }
}

impl SourceBuffer for FsBuffer {
    fn mark_at(&self, line: usize) -> Box<dyn Mark> {
        Box::new(FsMark(line))
    }
    fn path(&self) -> &Path {
        &self.path
    }
}

struct FsSourceProvider;

impl SourceProvider for FsSourceProvider {
    fn open_by_path(&self, path: &Path) -> std::io::Result<OpenedSource> {
        let canonical_path = fs::canonicalize(path)?;
        let text = fs::read_to_string(&canonical_path)?;
        Ok(OpenedSource {
            canonical_path: canonical_path.clone(),
            buffer: Rc::new(FsBuffer { path: canonical_path }),
            text,
        })
    }
}

/// Expands `{project}`/`{userlib}`/`{stdlib}` via the current
/// directory and a couple of environment variables; a GUI host would
/// instead answer from its own project/workspace model.
struct EnvPathExpander;

impl PathExpander for EnvPathExpander {
    fn expand(&self, entry: &SearchPathEntry) -> Option<PathBuf> {
        match entry {
            SearchPathEntry::Project => std::env::current_dir().ok(),
            SearchPathEntry::UserLib => std::env::var_os("MOTION_USERLIB").map(PathBuf::from),
            SearchPathEntry::StdLib => std::env::var_os("MOTION_STDLIB").map(PathBuf::from),
            SearchPathEntry::Literal(p) => Some(p.clone()),
        }
    }
}
