use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use timeline_core::host::memory::InMemoryHost;
use timeline_core::{Conversation, FillMode, NoticeLevel, Settings};
use timeline_llm::HttpProfileService;
use timeline_memory::{catalogue, TimelineCommand, TimelineMemory};

#[derive(Parser)]
#[command(name = "timeline")]
#[command(about = "Chapter timeline tools for chat transcripts")]
#[command(version)]
struct Cli {
    /// Settings file (.toml or .json)
    #[arg(long, env = "TIMELINE_SETTINGS")]
    settings: Option<PathBuf>,

    /// Model profiles file (TOML) for commands that call a model
    #[arg(long, env = "TIMELINE_PROFILES")]
    profiles: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a timeline command against a chat file
    Run {
        /// Chat file (JSON)
        chat: PathBuf,
        /// Command line, e.g. `chapter-end title=Arrival 41`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
        /// Do not write the chat file back
        #[arg(long)]
        dry_run: bool,
    },
    /// Check chapter ordering and markers
    Validate {
        chat: PathBuf,
    },
    /// Print the timeline as JSON
    Show {
        chat: PathBuf,
    },
    /// Migrate legacy timeline data in place
    Migrate {
        chat: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// List available commands
    Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Commands::Commands => {
            for spec in catalogue() {
                let aliases = if spec.aliases.is_empty() {
                    String::new()
                } else {
                    format!(" (alias: {})", spec.aliases.join(", "))
                };
                println!("{}{}", format!("/{}", spec.name).cyan(), aliases.dimmed());
                println!("    {}", spec.help);
            }
            Ok(())
        }
        Commands::Run {
            chat,
            command,
            dry_run,
        } => {
            let settings = load_settings(cli.settings.as_deref())?;
            let line = command.join(" ");
            let command = TimelineCommand::parse(&line)?;
            let command = prepare(command, &settings)?;

            let workspace = Workspace::open(&chat, settings, cli.profiles.as_deref())?;
            let output = workspace.memory.execute(command).await;
            workspace.print_notices();
            let output = output?;
            if !output.is_empty() {
                println!("{}", output);
            }
            workspace.finish(dry_run)
        }
        Commands::Validate { chat } => {
            let settings = load_settings(cli.settings.as_deref())?;
            let workspace = Workspace::open(&chat, settings, None)?;
            let violations = workspace.memory.engine().timeline().validate()?;
            if violations.is_empty() {
                println!("{}", "Timeline is consistent".green());
                return Ok(());
            }
            for violation in &violations {
                println!("{} {}", "✗".red(), violation);
            }
            bail!("{} problems found", violations.len())
        }
        Commands::Show { chat } => {
            let settings = load_settings(cli.settings.as_deref())?;
            let workspace = Workspace::open(&chat, settings, None)?;
            println!("{}", workspace.memory.engine().timeline().timeline_json());
            Ok(())
        }
        Commands::Migrate { chat, dry_run } => {
            let settings = load_settings(cli.settings.as_deref())?;
            let workspace = Workspace::open(&chat, settings, None)?;
            let output = workspace.memory.execute(TimelineCommand::Migrate).await?;
            println!("{}", output);
            workspace.finish(dry_run)
        }
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => {
            let mut settings = Settings::default();
            settings.apply_env_overrides();
            Ok(settings)
        }
    }
}

/// Sessions need a chat host that generates replies and runs tools, which a
/// chat file cannot provide. Fill is always awaited so results are printed.
fn prepare(command: TimelineCommand, settings: &Settings) -> Result<TimelineCommand> {
    match command {
        TimelineCommand::ManageLore { .. } => {
            bail!("lore management runs inside a chat host, not against a chat file")
        }
        TimelineCommand::Fill { .. } if settings.timeline_fill.mode == FillMode::Agentic => {
            bail!("agentic timeline fill runs inside a chat host; set timeline_fill.mode = \"static\"")
        }
        TimelineCommand::Fill { .. } => Ok(TimelineCommand::Fill { wait: true }),
        other => Ok(other),
    }
}

struct Workspace {
    path: PathBuf,
    host: Arc<InMemoryHost>,
    memory: TimelineMemory,
}

impl Workspace {
    fn open(path: &Path, settings: Settings, profiles: Option<&Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let conversation: Conversation = serde_json::from_str(&content)
            .with_context(|| format!("{} is not a chat file", path.display()))?;
        log::debug!(
            "[{}] loaded {} messages from {}",
            conversation.chat_id,
            conversation.messages.len(),
            path.display()
        );

        let host = Arc::new(InMemoryHost::new(conversation));
        let mut capabilities = host.host();
        if let Some(profiles) = profiles {
            let service = HttpProfileService::load(profiles)?;
            capabilities.profiles = Arc::new(service);
        }
        let memory = TimelineMemory::new(capabilities, settings.into_shared());

        Ok(Self {
            path: path.to_path_buf(),
            host,
            memory,
        })
    }

    fn print_notices(&self) {
        for (level, message) in self.host.notices() {
            let label = match level {
                NoticeLevel::Info => "info".blue(),
                NoticeLevel::Warning => "warning".yellow(),
                NoticeLevel::Error => "error".red(),
            };
            eprintln!("{}: {}", label, message);
        }
    }

    fn finish(&self, dry_run: bool) -> Result<()> {
        if dry_run {
            return Ok(());
        }
        let conversation = self.host.host().conversation().read().clone();
        let content = serde_json::to_string_pretty(&conversation)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        log::info!("saved {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use timeline_core::ChatMessage;

    use super::*;

    fn chat_file() -> tempfile::NamedTempFile {
        let mut conversation = Conversation::new("cli-chat");
        conversation.messages.push(ChatMessage::user("Mara", "hello"));
        conversation.messages.push(ChatMessage::character("Vex", "hi"));
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{}", serde_json::to_string(&conversation).unwrap()).unwrap();
        file
    }

    #[test]
    fn fill_is_always_awaited() {
        let command = prepare(TimelineCommand::Fill { wait: false }, &Settings::default()).unwrap();
        assert_eq!(command, TimelineCommand::Fill { wait: true });
    }

    #[test]
    fn sessions_are_refused() {
        assert!(prepare(TimelineCommand::ManageLore { wait: true }, &Settings::default()).is_err());

        let mut settings = Settings::default();
        settings.timeline_fill.mode = FillMode::Agentic;
        assert!(prepare(TimelineCommand::Fill { wait: true }, &settings).is_err());
    }

    #[tokio::test]
    async fn migrate_writes_the_chat_back() {
        let file = chat_file();
        let workspace = Workspace::open(file.path(), Settings::default(), None).unwrap();

        workspace.memory.execute(TimelineCommand::Migrate).await.unwrap();
        workspace.finish(false).unwrap();

        let saved: Conversation =
            serde_json::from_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(saved.chat_id, "cli-chat");
        assert_eq!(saved.messages.len(), 2);
    }

    #[test]
    fn rejects_files_that_are_not_chats() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "[1, 2, 3]").unwrap();
        assert!(Workspace::open(file.path(), Settings::default(), None).is_err());
    }
}
