//! Aimi runtime: Demo CLI
//!
//! Replays recorded model output through the real interpretation paths,
//! with local stand-ins for the operator sink, the sandbox and the tools.
//! Session state is loaded before and saved after every command.
//!
//! Usage:
//!   cargo run -p demo -- say "what is 2 + 2?"
//!   cargo run -p demo -- stream demo/responses/python.json --fragment-size 7
//!   cargo run -p demo -- dispatch demo/responses/commentary.txt
//!   cargo run -p demo -- state

mod collaborators;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use aimi_contracts::{
    error::{AimiError, AimiResult},
    render::{FragmentKind, RenderFragment},
};
use aimi_core::{Dispatcher, StreamInterpreter, TurnContext};
use aimi_memory::{AgentStateStore, JsonFileStore, SessionId, StatePersistence};
use aimi_policy::ActionPolicy;
use aimi_repair::RepairPipeline;

// ── CLI definition ────────────────────────────────────────────────────────────

/// Aimi: streaming action interpreter demo.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "Aimi agent protocol runtime demo",
    long_about = "Replays recorded model responses through the streaming interpreter\n\
                  or the buffered dispatcher and keeps per-session agent state on disk."
)]
struct Cli {
    /// Action policy TOML. Defaults to the built-in registry.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding per-session state snapshots.
    #[arg(long, global = true, default_value = ".aimi")]
    state_dir: PathBuf,

    /// Session key; each key gets its own state.
    #[arg(long, global = true, default_value = "default")]
    session: String,

    /// Python interpreter used for chat_to_python.
    #[arg(long, global = true, default_value = "python3")]
    python: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Feed a recorded response to the streaming interpreter in fragments.
    Stream {
        file: PathBuf,
        /// Characters per fragment.
        #[arg(long, default_value_t = 16)]
        fragment_size: usize,
    },
    /// Run the buffered dispatcher, with tolerant repair, on a recorded response.
    Dispatch { file: PathBuf },
    /// Record a message from the operator.
    Say { text: String },
    /// Print the action log, tasks and notes.
    State,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for per-node and per-record logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Demo error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> AimiResult<()> {
    let policy = match &cli.config {
        Some(path) => ActionPolicy::from_file(path)?,
        None => ActionPolicy::builtin()?,
    };
    let mut registry = policy.registry().clone();

    let session = SessionId::from_key(&cli.session);
    let persistence = JsonFileStore::for_session(&cli.state_dir, &session);
    let limits = policy.memory_limits().clone();
    let mut store = match persistence.load()? {
        Some(snapshot) => AgentStateStore::restore(snapshot, limits),
        None => AgentStateStore::new(limits),
    };
    info!(session = session.short(), clock = store.clock(), "session opened");

    let collaborators = collaborators::local(&cli.python);
    let mut ctx = TurnContext::new(&mut registry, &mut store, &collaborators);

    match cli.command {
        Command::Stream {
            file,
            fragment_size,
        } => stream(&read(&file)?, fragment_size.max(1), &mut ctx),
        Command::Dispatch { file } => dispatch(&read(&file)?, &mut ctx),
        Command::Say { text } => {
            let ts = ctx.store.record_operator_message(&text);
            println!("recorded operator message at timestamp {ts}");
        }
        Command::State => print_state(ctx.store),
    }

    persistence.save(&store.snapshot())
}

fn read(path: &Path) -> AimiResult<String> {
    std::fs::read_to_string(path).map_err(|e| AimiError::ConfigError {
        reason: format!("failed to read response file {}: {e}", path.display()),
    })
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn stream(text: &str, fragment_size: usize, ctx: &mut TurnContext<'_>) {
    let chars: Vec<char> = text.chars().collect();
    let mut interp = StreamInterpreter::new();
    let mut printer = Printer::default();

    for piece in chars.chunks(fragment_size) {
        let fragment: String = piece.iter().collect();
        for rendered in interp.feed(&fragment, ctx) {
            printer.show(&rendered);
        }
    }
    for rendered in interp.finish() {
        printer.show(&rendered);
    }
    printer.end();

    println!(
        "response {}: {:?}, {} committed, {} rejected",
        interp.response_id(),
        interp.state(),
        interp.committed().count(),
        interp.rejected().len()
    );
}

fn dispatch(text: &str, ctx: &mut TurnContext<'_>) {
    let dispatcher = Dispatcher::new(Box::new(RepairPipeline::new()));
    let report = dispatcher.dispatch(text, ctx);

    let mut printer = Printer::default();
    for rendered in &report.fragments {
        printer.show(rendered);
    }
    printer.end();

    println!(
        "response {}: {} appended, {} rejected{}",
        report.response_id,
        report.appended.len(),
        report.rejected.len(),
        if report.fatal.is_some() { ", stopped early" } else { "" }
    );
}

fn print_state(store: &AgentStateStore) {
    println!("clock: {}", store.clock());
    println!("log ({} records, {} bytes):", store.log_len(), store.log_bytes());
    for record in store.log() {
        println!(
            "  {:>4} {:<6} {:<24} {}",
            record.timestamp.unwrap_or_default(),
            record.execute.as_str(),
            record.call,
            record.request
        );
    }
    let current = store.current_task().map(|t| t.task_id.as_str());
    println!("tasks:");
    for task in store.tasks() {
        let marker = if Some(task.task_id.as_str()) == current { "*" } else { " " };
        println!("  {marker}{} {}", task.task_id, task.task_info);
        for step in &task.task_step {
            println!("      {} {}", step.step_id, step.step);
        }
    }
    println!("notes:");
    for (i, note) in store.notes().iter().enumerate() {
        println!("  {i}: {note}");
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Prints fragments as they arrive, starting a labelled line whenever the
/// fragment kind changes.
#[derive(Default)]
struct Printer {
    last: Option<FragmentKind>,
}

impl Printer {
    fn show(&mut self, fragment: &RenderFragment) {
        if self.last != Some(fragment.kind) {
            if self.last.is_some() {
                println!();
            }
            print!("{:<11} ", label(fragment.kind));
            self.last = Some(fragment.kind);
        }
        print!("{}", fragment.text);
    }

    fn end(&mut self) {
        if self.last.take().is_some() {
            println!();
        }
    }
}

fn label(kind: FragmentKind) -> &'static str {
    match kind {
        FragmentKind::Reasoning => "reasoning:",
        FragmentKind::Operator => "operator:",
        FragmentKind::Code => "code:",
        FragmentKind::CodeOutput => "output:",
        FragmentKind::ToolOutput => "tool:",
        FragmentKind::Note => "note:",
        FragmentKind::Analysis => "analysis:",
        FragmentKind::Task => "task:",
        FragmentKind::Diagnostic => "error:",
        FragmentKind::Continue => "",
    }
}
