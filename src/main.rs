//! haul - bulk file operations with conflict handling, trash and undo.
//!
//! Usage:
//!   haul copy SRC... DEST        Copy into a directory
//!   haul move SRC... DEST        Move into a directory
//!   haul delete [--permanent] PATH...
//!   haul shell                   Interactive session with undo/redo
//!   haul --help                  Show help

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result, bail, eyre};
use itertools::Itertools;

use haul_core::EngineConfig;
use haul_ops::{
    AutoResponder, Choice, ConflictPrompt, ConflictResponse, Engine, JobHandle, MessagePrompt,
    OperationComplete, OperationProgress, Prompt, Reply, Responder, UndoState,
};

#[derive(Parser)]
#[command(
    name = "haul",
    version,
    about = "Bulk file operations with conflict handling, trash and undo",
    long_about = "haul copies, moves, links, trashes and deletes files, asking on the \
                  terminal when something is in the way.\n\n\
                  Run `haul shell` for a session in which the last operation can be \
                  undone and redone."
)]
struct Cli {
    /// Answer every prompt with its "all" choice (skip errors, merge and replace conflicts)
    #[arg(short, long, global = true)]
    yes: bool,

    /// Print the completion record as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (defaults to $XDG_CONFIG_HOME/haul/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(flatten)]
    Op(Operation),

    /// Start an interactive session
    Shell,
}

#[derive(Subcommand)]
enum Operation {
    /// Copy files into a directory
    Copy {
        /// Sources followed by the destination directory
        #[arg(required = true, num_args = 2..)]
        paths: Vec<PathBuf>,
    },

    /// Move files into a directory
    Move {
        /// Sources followed by the destination directory
        #[arg(required = true, num_args = 2..)]
        paths: Vec<PathBuf>,
    },

    /// Copy files next to themselves under a new name
    Duplicate {
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },

    /// Create symbolic links in a directory
    Link {
        /// Targets followed by the directory to put the links in
        #[arg(required = true, num_args = 2..)]
        paths: Vec<PathBuf>,
    },

    /// Move files to the trash, or delete them for good
    Delete {
        /// Skip the trash
        #[arg(short, long)]
        permanent: bool,

        #[arg(required = true)]
        targets: Vec<PathBuf>,
    },

    /// Permanently delete everything in the trash
    EmptyTrash,

    /// Create a folder
    NewFolder {
        /// Directory to create it in
        #[arg(default_value = ".")]
        parent: PathBuf,

        #[arg(short, long)]
        name: Option<String>,
    },

    /// Create a file, empty, with contents or from a template
    NewFile {
        /// Directory to create it in
        #[arg(default_value = ".")]
        parent: PathBuf,

        #[arg(short, long)]
        name: Option<String>,

        /// File to copy the contents from
        #[arg(short, long, conflicts_with = "contents")]
        template: Option<PathBuf>,

        /// Initial contents
        #[arg(short, long)]
        contents: Option<String>,
    },

    /// Rename a file within its directory
    Rename { source: PathBuf, new_name: String },

    /// Change permission bits (octal values)
    Chmod {
        target: PathBuf,

        /// Apply to everything below the target
        #[arg(short = 'R', long)]
        recursive: bool,

        #[arg(long, value_parser = parse_mode)]
        file_mode: Option<u32>,

        /// Bits of --file-mode to apply (default: all when a mode is given)
        #[arg(long, value_parser = parse_mode)]
        file_mask: Option<u32>,

        #[arg(long, value_parser = parse_mode)]
        dir_mode: Option<u32>,

        /// Bits of --dir-mode to apply (default: all when a mode is given)
        #[arg(long, value_parser = parse_mode)]
        dir_mask: Option<u32>,
    },

    /// Change the owner of a file (name or uid)
    Chown { target: PathBuf, user: String },

    /// Change the group of a file (name or gid)
    Chgrp { target: PathBuf, group: String },

    /// Make a desktop launcher executable and self-launching
    Trust { target: PathBuf },
}

/// A line typed in the shell.
#[derive(Parser)]
#[command(name = "haul", no_binary_name = true, disable_version_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Subcommand)]
enum ShellCommand {
    #[command(flatten)]
    Op(Operation),

    /// Revert the last operation
    Undo,

    /// Perform the last undone operation again
    Redo,

    /// Show what undo and redo would do
    Status,

    /// Leave the shell
    #[command(alias = "exit")]
    Quit,
}

#[derive(Clone, Copy)]
struct Output {
    yes: bool,
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_logging();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => EngineConfig::load().context("Failed to load configuration")?,
    };
    let engine = Engine::new(config);
    let output = Output {
        yes: cli.yes,
        json: cli.json,
    };

    match cli.command {
        Command::Op(operation) => {
            let complete = run_operation(&engine, operation, output).await?;
            if !complete.success {
                bail!("{}", complete.summary());
            }
        }
        Command::Shell => run_shell(&engine, output).await?,
    }

    Ok(())
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("HAUL_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Parse an octal mode such as "755" or "0o644".
fn parse_mode(s: &str) -> std::result::Result<u32, String> {
    let digits = s.trim_start_matches("0o");
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
        .ok_or_else(|| format!("'{s}' is not an octal mode"))
}

/// Split `paths` into sources and the trailing destination.
fn split_destination(mut paths: Vec<PathBuf>) -> Result<(Vec<PathBuf>, PathBuf)> {
    let destination = paths.pop().ok_or_else(|| eyre!("Missing destination"))?;
    if paths.is_empty() {
        bail!("Missing sources");
    }
    Ok((paths, destination))
}

fn submit(engine: &Engine, operation: Operation) -> Result<JobHandle> {
    let handle = match operation {
        Operation::Copy { paths } => {
            let (sources, destination) = split_destination(paths)?;
            engine.copy(sources, destination)
        }
        Operation::Move { paths } => {
            let (sources, destination) = split_destination(paths)?;
            engine.move_files(sources, destination)
        }
        Operation::Duplicate { sources } => engine.duplicate(sources),
        Operation::Link { paths } => {
            let (sources, destination) = split_destination(paths)?;
            engine.link(sources, destination)
        }
        Operation::Delete { permanent, targets } => {
            if permanent {
                engine.delete(targets)
            } else {
                engine.trash_or_delete(targets)
            }
        }
        Operation::EmptyTrash => engine.empty_trash(),
        Operation::NewFolder { parent, name } => engine.new_folder(parent, name),
        Operation::NewFile {
            parent,
            name,
            template: Some(template),
            ..
        } => engine.new_file_from_template(parent, name, template),
        Operation::NewFile {
            parent,
            name,
            contents,
            ..
        } => engine.new_file(parent, name, contents.map(String::into_bytes)),
        Operation::Rename { source, new_name } => engine.rename(source, new_name),
        Operation::Chmod {
            target,
            recursive: false,
            file_mode,
            dir_mode,
            ..
        } => {
            let mode = if target.is_dir() {
                dir_mode.or(file_mode)
            } else {
                file_mode
            };
            let mode = mode.ok_or_else(|| eyre!("Give the new mode with --file-mode"))?;
            engine.set_permissions(target, mode)
        }
        Operation::Chmod {
            target,
            recursive: true,
            file_mode,
            file_mask,
            dir_mode,
            dir_mask,
        } => {
            if file_mode.is_none() && dir_mode.is_none() {
                bail!("Give --file-mode, --dir-mode or both");
            }
            let mask = |mode: Option<u32>, mask: Option<u32>| match mode {
                Some(_) => mask.unwrap_or(0o7777),
                None => 0,
            };
            engine.set_permissions_recursive(
                target,
                file_mode.unwrap_or(0),
                mask(file_mode, file_mask),
                dir_mode.unwrap_or(0),
                mask(dir_mode, dir_mask),
            )
        }
        Operation::Chown { target, user } => engine.change_owner(target, user),
        Operation::Chgrp { target, group } => engine.change_group(target, group),
        Operation::Trust { target } => engine.mark_desktop_file_trusted(target),
    };
    Ok(handle)
}

async fn run_operation(engine: &Engine, operation: Operation, output: Output) -> Result<OperationComplete> {
    let handle = submit(engine, operation)?;
    let complete = drive(handle, output).await;
    report(&complete, output)?;
    Ok(complete)
}

async fn drive(handle: JobHandle, output: Output) -> OperationComplete {
    let mut terminal = TerminalResponder::new(output.yes);
    let complete = handle.run_with(&mut terminal).await;
    terminal.clear_progress();
    complete
}

fn report(complete: &OperationComplete, output: Output) -> Result<()> {
    if output.json {
        println!("{}", serde_json::to_string_pretty(complete)?);
        return Ok(());
    }

    let mut line = complete.summary();
    if complete.bytes_processed > 0 {
        line.push_str(&format!(" ({})", format_size(complete.bytes_processed)));
    }
    println!("{line}");
    if let Some(created) = &complete.new_file {
        println!("  created {}", created.display());
    }
    for error in &complete.errors {
        eprintln!("  error: {}: {}", error.path.display(), error.message);
    }
    Ok(())
}

/// Read commands from stdin until `quit` or end of input.
async fn run_shell(engine: &Engine, output: Output) -> Result<()> {
    let stdin = io::stdin();
    loop {
        eprint!("haul> ");
        io::stderr().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let words = match split_words(&line) {
            Ok(words) if words.is_empty() => continue,
            Ok(words) => words,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };
        let parsed = match ShellLine::try_parse_from(words) {
            Ok(parsed) => parsed,
            Err(e) => {
                // Help and usage errors alike.
                let _ = e.print();
                continue;
            }
        };

        match parsed.command {
            ShellCommand::Op(operation) => {
                if let Err(e) = run_operation(engine, operation, output).await {
                    eprintln!("{e}");
                }
            }
            ShellCommand::Undo => match engine.undo() {
                Some(handle) => report(&drive(handle, output).await, output)?,
                None => eprintln!("Nothing to undo"),
            },
            ShellCommand::Redo => match engine.redo() {
                Some(handle) => report(&drive(handle, output).await, output)?,
                None => eprintln!("Nothing to redo"),
            },
            ShellCommand::Status => print_status(engine),
            ShellCommand::Quit => break,
        }
    }
    Ok(())
}

fn print_status(engine: &Engine) {
    let undo = engine.undo_manager();
    let labels = undo.labels();
    match undo.state() {
        UndoState::None => println!("Nothing to undo or redo"),
        UndoState::Undo => println!(
            "{}: {}",
            labels.undo_label.replace('_', ""),
            labels.undo_description
        ),
        UndoState::Redo => println!(
            "{}: {}",
            labels.redo_label.replace('_', ""),
            labels.redo_description
        ),
    }
}

/// Split a shell line into words, honouring quotes and backslashes.
fn split_words(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"') | None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    in_word = true;
                }
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        bail!("Unterminated quote");
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Answers prompts on the terminal and draws progress on stderr.
struct TerminalResponder {
    auto: Option<AutoResponder>,
    drawn: bool,
    last_draw: Option<Instant>,
}

impl TerminalResponder {
    fn new(yes: bool) -> Self {
        Self {
            auto: yes.then(AutoResponder::replace_all),
            drawn: false,
            last_draw: None,
        }
    }

    fn clear_progress(&mut self) {
        if self.drawn {
            eprint!("\r\x1b[2K");
            self.drawn = false;
        }
    }

    fn ask_message(&mut self, message: &MessagePrompt) -> Reply {
        eprintln!("{}", message.primary);
        if !message.secondary.is_empty() {
            eprintln!("{}", message.secondary);
        }
        if let Some(details) = &message.details {
            eprintln!("  {details}");
        }
        let menu = message
            .choices
            .iter()
            .enumerate()
            .map(|(i, choice)| format!("[{}] {choice}", i + 1))
            .join("  ");

        loop {
            let Some(answer) = read_answer(&menu) else {
                return Reply::Choice(Choice::Cancel);
            };
            let picked = answer
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| message.choices.get(i))
                .or_else(|| {
                    message
                        .choices
                        .iter()
                        .find(|choice| choice.to_string().eq_ignore_ascii_case(&answer))
                });
            match picked {
                Some(choice) => return Reply::Choice(*choice),
                None => eprintln!("Pick one of the listed answers"),
            }
        }
    }

    fn ask_conflict(&mut self, conflict: &ConflictPrompt) -> Reply {
        eprintln!("{}: {}", conflict.kind, conflict.destination.display());
        eprintln!(
            "  existing: {}",
            describe(conflict.destination_size, conflict.destination_modified)
        );
        eprintln!(
            "  new:      {}",
            describe(conflict.source_size, conflict.source_modified)
        );
        let overwrite = if conflict.is_merge() { "merge" } else { "replace" };
        let menu = format!(
            "[s]kip  [S]kip all  [o] {overwrite}  [O] {overwrite} all  [r NAME] rename  [c]ancel"
        );

        loop {
            let Some(answer) = read_answer(&menu) else {
                return Reply::Conflict(ConflictResponse::cancel());
            };
            let response = match answer.as_str() {
                "s" => ConflictResponse::skip(false),
                "S" => ConflictResponse::skip(true),
                "o" => ConflictResponse::replace(false),
                "O" => ConflictResponse::replace(true),
                "c" => ConflictResponse::cancel(),
                other => match other.strip_prefix("r ") {
                    Some(name) if !name.trim().is_empty() => ConflictResponse::rename(name.trim()),
                    _ => {
                        eprintln!("Pick one of the listed answers");
                        continue;
                    }
                },
            };
            return Reply::Conflict(response);
        }
    }
}

impl Responder for TerminalResponder {
    fn respond(&mut self, prompt: &Prompt) -> Reply {
        self.clear_progress();
        if let Some(auto) = &mut self.auto {
            return auto.respond(prompt);
        }
        match prompt {
            Prompt::Message(message) => self.ask_message(message),
            Prompt::Conflict(conflict) => self.ask_conflict(conflict),
        }
    }

    fn progress(&mut self, progress: &OperationProgress) {
        let now = Instant::now();
        if self
            .last_draw
            .is_some_and(|last| now.duration_since(last) < Duration::from_millis(50))
        {
            return;
        }
        self.last_draw = Some(now);

        let line = match (progress.status.is_empty(), progress.details.is_empty()) {
            (true, _) => progress.details.clone(),
            (false, true) => progress.status.clone(),
            (false, false) => format!("{} - {}", progress.status, progress.details),
        };
        eprint!("\r\x1b[2K{}", truncate(&line, 100));
        let _ = io::stderr().flush();
        self.drawn = true;
    }
}

/// Prompt with `menu` and read one trimmed line. None on end of input.
fn read_answer(menu: &str) -> Option<String> {
    eprint!("{menu}\n> ");
    let _ = io::stderr().flush();
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(answer.trim().to_string()),
    }
}

fn describe(size: Option<u64>, modified: Option<i64>) -> String {
    let size = size.map_or_else(|| "unknown size".to_string(), format_size);
    let modified = modified
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|time| {
            time.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_else(|| "unknown date".to_string());
    format!("{size}, modified {modified}")
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::DECIMAL)
}

/// Truncate a string to max characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 1).collect();
        format!("{head}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("755"), Ok(0o755));
        assert_eq!(parse_mode("0o644"), Ok(0o644));
        assert!(parse_mode("9").is_err());
        assert!(parse_mode("17777").is_err());
    }

    #[test]
    fn test_split_words() {
        assert_eq!(
            split_words("copy 'a b' c\\ d \"e\" f").unwrap(),
            vec!["copy", "a b", "c d", "e", "f"]
        );
        assert_eq!(split_words("  ").unwrap(), Vec::<String>::new());
        assert_eq!(split_words("rename x ''").unwrap(), vec!["rename", "x", ""]);
        assert!(split_words("copy 'a").is_err());
    }

    #[test]
    fn test_split_destination() {
        let (sources, dest) =
            split_destination(vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("d")])
                .unwrap();
        assert_eq!(sources, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(dest, PathBuf::from("d"));
        assert!(split_destination(vec![PathBuf::from("d")]).is_err());
    }

    #[test]
    fn test_shell_line_parses_operations_and_commands() {
        let line = ShellLine::try_parse_from(["copy", "a", "b"]).unwrap();
        assert!(matches!(line.command, ShellCommand::Op(Operation::Copy { .. })));
        let line = ShellLine::try_parse_from(["undo"]).unwrap();
        assert!(matches!(line.command, ShellCommand::Undo));
        let line = ShellLine::try_parse_from(["exit"]).unwrap();
        assert!(matches!(line.command, ShellCommand::Quit));
    }

    #[test]
    fn test_cli_verifies() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
        ShellLine::command().debug_assert();
    }
}
