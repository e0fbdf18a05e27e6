//! Interactive operator console.
//!
//! Lines are parsed with the same clap machinery as the binary's arguments. `run`
//! returns right away and the pipeline keeps going in the background, so `stop`,
//! `break` and `status` can be issued while it works.

use crate::backoff::BackoffLedger;
use crate::metrics;
use crate::pipeline::PipelineHandle;
use crate::store::locale::{set_current_locale, Locale};
use crate::store::{CatalogStore, Ident};
use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use rustyline::{
    completion::Completer, highlight::Highlighter, history::FileHistory, validate::Validator,
    CompletionType, Config, Editor, Helper,
};
use tokio::runtime::Handle;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "")]
struct InnerCli {
    #[command(subcommand)]
    command: InnerCommand,
}

#[derive(Subcommand)]
enum InnerCommand {
    /// Starts (or resumes) the pipeline in the background.
    Run,

    /// Stops the pipeline at the next task boundary.
    Stop,

    /// Halts the pipeline right before the task at the given index.
    Break { idx: usize },

    /// Removes a breakpoint.
    Unbreak { idx: usize },

    /// Enables single-step mode, or disables it with --off.
    Step {
        #[arg(long)]
        off: bool,
    },

    /// Shows the scheduler state.
    Status,

    /// Lists tasks with their indices.
    Tasks,

    /// Dumps metrics in Prometheus text format.
    Metrics,

    /// Sets the display locale, e.g. `ja` or `en-US`.
    Locale { tag: String },

    /// Clears backoff records of an ident, for one task or for all of them.
    KillBackoff {
        ident: String,
        #[arg(long)]
        task: Option<String>,
    },

    /// Close this program.
    Exit,
}

enum CommandExecutionResult {
    Ok,
    Exit,
    Error(String),
}

const PROMPT: &str = ">> ";

/// Everything console commands act on.
pub struct Console {
    pub runtime: Handle,
    pub pipeline: PipelineHandle,
    pub store: CatalogStore,
    pub ledger: BackoffLedger,
}

/// Clears backoff for `ident` on `task`, or every task when `task` is `None`.
/// Returns the number of records removed.
pub fn kill_backoff(ledger: &BackoffLedger, ident: &str, task: Option<&str>) -> Result<usize> {
    let ident: Ident = ident.parse()?;
    match task {
        Some(task) => Ok(ledger.clear(&ident.to_string(), task)? as usize),
        None => ledger.clear_all(&ident.to_string()),
    }
}

impl Console {
    fn execute_command(&self, line: String) -> CommandExecutionResult {
        if line.is_empty() {
            return CommandExecutionResult::Ok;
        }

        let args = shlex::split(&line)
            .unwrap_or_else(|| line.split_whitespace().map(String::from).collect());

        let cli =
            InnerCli::try_parse_from(std::iter::once(" ").chain(args.iter().map(String::as_str)));

        match cli {
            Ok(cli) => match self.dispatch(cli.command) {
                Ok(result) => result,
                Err(e) => CommandExecutionResult::Error(format!("{:#}", e)),
            },
            Err(e) => {
                if e.print().is_err() {
                    println!("{}", e);
                }
                CommandExecutionResult::Ok
            }
        }
    }

    fn dispatch(&self, command: InnerCommand) -> Result<CommandExecutionResult> {
        let pipeline = &self.pipeline;
        match command {
            InnerCommand::Run => {
                let pipeline = pipeline.clone();
                self.runtime.spawn(async move {
                    match pipeline.run().await {
                        Ok(outcome) => info!("Pipeline run ended: {}", outcome),
                        Err(e) => error!("Pipeline run failed: {}", e),
                    }
                });
            }
            InnerCommand::Stop => self.runtime.block_on(pipeline.stop()),
            InnerCommand::Break { idx } => {
                self.runtime.block_on(pipeline.set_breakpoint(idx, true))?
            }
            InnerCommand::Unbreak { idx } => {
                self.runtime.block_on(pipeline.set_breakpoint(idx, false))?
            }
            InnerCommand::Step { off } => self.runtime.block_on(pipeline.set_single_step(!off)),
            InnerCommand::Status => {
                let snapshot = self.runtime.block_on(pipeline.snapshot());
                let json = serde_json::json!({
                    "status": snapshot.status,
                    "idx": snapshot.idx,
                    "dirty": snapshot.dirty,
                    "trip_count": snapshot.trip_count,
                    "breakpoints": snapshot.breakpoints,
                    "single_step": snapshot.single_step,
                    "current_task": snapshot.current_task,
                    "last_error": snapshot.last_error,
                });
                println!("{}", serde_json::to_string_pretty(&json)?);
            }
            InnerCommand::Tasks => {
                let snapshot = self.runtime.block_on(pipeline.snapshot());
                for (i, name) in snapshot.tasks.iter().enumerate() {
                    let marker = if snapshot.breakpoints.contains(&i) { "*" } else { " " };
                    let cursor = if snapshot.idx == i { ">" } else { " " };
                    println!("{}{} {:>3} {}", cursor, marker, i, name);
                }
            }
            InnerCommand::Metrics => print!("{}", metrics::render()),
            InnerCommand::Locale { tag } => {
                let locale = Locale::from_bcp47(&tag)
                    .ok_or_else(|| anyhow::anyhow!("Not a language tag: {}", tag))?;
                self.store
                    .with_conn(|conn| set_current_locale(conn, &locale))?;
                println!("Display locale is now {}", locale);
            }
            InnerCommand::KillBackoff { ident, task } => {
                let removed = kill_backoff(&self.ledger, &ident, task.as_deref())?;
                println!("Removed {} backoff records for {}", removed, ident);
            }
            InnerCommand::Exit => return Ok(CommandExecutionResult::Exit),
        }
        Ok(CommandExecutionResult::Ok)
    }
}

#[derive(rustyline_derive::Hinter)]
struct ConsoleHelper {
    commands_names: Vec<String>,
}

impl ConsoleHelper {
    pub fn new() -> Self {
        let commands_names: Vec<String> = InnerCli::command()
            .get_subcommands()
            .map(|sc| sc.get_name().to_string())
            .collect();

        ConsoleHelper { commands_names }
    }
}

impl Completer for ConsoleHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        _pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        if line.contains(' ') {
            return Ok((0, Vec::with_capacity(0)));
        }
        let matches = self
            .commands_names
            .iter()
            .filter(|c| c.starts_with(line))
            .map(|c| c.to_string())
            .collect::<Vec<_>>();

        Ok((0, matches))
    }
}

impl Highlighter for ConsoleHelper {}
impl Validator for ConsoleHelper {}
impl Helper for ConsoleHelper {}

/// Runs the read-eval loop until `exit`, Ctrl-C or Ctrl-D. Blocks the calling
/// thread, so call it from `spawn_blocking`.
pub fn run_console(console: Console) -> Result<()> {
    InnerCli::command().print_long_help()?;

    let config = Config::builder()
        .completion_type(CompletionType::List)
        .build();

    let mut rl = Editor::<ConsoleHelper, FileHistory>::with_config(config)?;
    rl.set_helper(Some(ConsoleHelper::new()));

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                let _ = rl.add_history_entry(&line);
                match console.execute_command(line) {
                    CommandExecutionResult::Ok => {}
                    CommandExecutionResult::Exit => break,
                    CommandExecutionResult::Error(err) => {
                        eprintln!("Error: {}", err);
                        continue;
                    }
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                println!("CTRL-D: exiting.");
                break;
            }
            Err(e) => {
                println!("Error: {:?}", e);
                break;
            }
        }
    }
    Ok(())
}
