//! Line-oriented terminal front-end over the chat core.

use std::future::Future;
use std::sync::Arc;

use gigi_llm::{CompletionProvider, ProviderError, create_provider};
use gigi_storage::{ConversationId, JsonFileStore, Sender};
use snafu::{OptionExt, ResultExt, Snafu};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};

use crate::chat::{ChatError, ChatSnapshot, ChatState, StreamController, StreamOutcome, Submit};
use crate::markdown::render_message;
use crate::settings::ChatSettings;
use crate::terminal::render_blocks;

const PROMPT: &str = "> ";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display(
        "no API key configured on `{stage}`: set GIGI_API_KEY or `api_key` in {path}"
    ))]
    MissingApiKey { stage: &'static str, path: String },
    #[snafu(display("provider setup failed on `{stage}`: {source}"))]
    Provider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("chat operation failed on `{stage}`: {source}"))]
    Chat {
        stage: &'static str,
        source: ChatError,
    },
    #[snafu(display("terminal i/o failed on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: std::io::Error,
    },
}

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New,
    Clear,
    List,
    /// Switch to the conversation at this 1-based `/list` position.
    Select(usize),
    /// Delete the conversation at this 1-based `/list` position.
    Delete(usize),
    Quit,
    Prompt(String),
    Unknown(String),
    Empty,
}

/// Parses one input line. Anything not starting with `/` is a prompt.
pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    let (head, argument) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(head, rest)| (head, rest.trim()));
    let unknown = || Command::Unknown(line.to_string());
    match (head, argument) {
        ("", _) => Command::Empty,
        ("/new", "") => Command::New,
        ("/clear", "") => Command::Clear,
        ("/list", "") => Command::List,
        ("/quit" | "/exit", "") => Command::Quit,
        ("/select", argument) => argument.parse().map_or_else(|_| unknown(), Command::Select),
        ("/delete", argument) => argument.parse().map_or_else(|_| unknown(), Command::Delete),
        _ if line.starts_with('/') => unknown(),
        _ => Command::Prompt(line.to_string()),
    }
}

/// Returns the id shown at a 1-based `/list` position.
pub fn conversation_id_at(snapshot: &ChatSnapshot, position: usize) -> Option<ConversationId> {
    position
        .checked_sub(1)
        .and_then(|index| snapshot.conversations.get(index))
        .map(|conversation| conversation.id)
}

/// Terminal session wiring settings, store, provider and controller together.
pub struct App {
    state: ChatState,
    controller: Arc<StreamController>,
}

impl App {
    /// Builds the provider and loads stored conversations from `settings`.
    pub fn new(settings: &ChatSettings, settings_path: &str) -> Result<Self, AppError> {
        let provider_config = settings.to_provider_config().context(MissingApiKeySnafu {
            stage: "resolve-provider-config",
            path: settings_path.to_string(),
        })?;
        let provider = create_provider(provider_config).context(ProviderSnafu {
            stage: "create-provider",
        })?;
        let store = Arc::new(JsonFileStore::new(settings.conversations_path()));
        let state = ChatState::load(store).context(ChatSnafu {
            stage: "load-conversations",
        })?;
        Ok(Self::with_parts(provider, settings, state))
    }

    /// Creates a session over an existing provider and state.
    pub fn with_parts(
        provider: Arc<dyn CompletionProvider>,
        settings: &ChatSettings,
        state: ChatState,
    ) -> Self {
        tracing::info!(
            provider = provider.name(),
            model = %settings.model_name,
            "chat session ready"
        );
        Self {
            state,
            controller: Arc::new(StreamController::new(provider, settings.delivery_config())),
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    /// Reads commands from stdin until `/quit`, end of input or Ctrl-C.
    pub async fn run(&self) -> Result<(), AppError> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        self.print_current();

        loop {
            print_prompt().await?;
            let Some(line) = next_input(&mut lines, tokio::signal::ctrl_c()).await? else {
                break;
            };

            match parse_command(&line) {
                Command::Empty => {}
                Command::Quit => break,
                Command::New => {
                    self.state.new_conversation();
                    self.print_current();
                }
                Command::Clear => {
                    if let Some(id) = self.state.current_conversation_id() {
                        match self.state.clear_conversation(id) {
                            Ok(()) => self.print_current(),
                            Err(error) => println!("cannot clear: {error}"),
                        }
                    }
                }
                Command::List => print_list(&self.state.snapshot()),
                Command::Select(position) => {
                    match conversation_id_at(&self.state.snapshot(), position) {
                        Some(id) => match self.state.select_conversation(id) {
                            Ok(()) => self.print_current(),
                            Err(error) => println!("cannot select: {error}"),
                        },
                        None => println!("no conversation #{position}; see /list"),
                    }
                }
                Command::Delete(position) => {
                    match conversation_id_at(&self.state.snapshot(), position) {
                        Some(id) => match self.state.delete_conversation(id) {
                            Ok(()) => self.print_current(),
                            Err(error) => println!("cannot delete: {error}"),
                        },
                        None => println!("no conversation #{position}; see /list"),
                    }
                }
                Command::Unknown(command) => {
                    println!(
                        "unknown command {command}; try /new, /clear, /list, /select N, /delete N or /quit"
                    );
                }
                Command::Prompt(prompt) => self.send(prompt).await?,
            }
        }

        self.controller.cancel_all();
        Ok(())
    }

    async fn send(&self, prompt: String) -> Result<(), AppError> {
        let Some(conversation_id) = self.state.current_conversation_id() else {
            return Ok(());
        };
        let mut receiver = self.state.subscribe();
        let mut live = LiveReveal::default();
        let send = self
            .controller
            .send(&self.state, Submit::new(conversation_id, prompt));
        tokio::pin!(send);

        let outcome = loop {
            tokio::select! {
                outcome = &mut send => break outcome,
                changed = receiver.changed() => {
                    if changed.is_ok() {
                        let snapshot = receiver.borrow_and_update().clone();
                        live.print_update(&snapshot, conversation_id).await?;
                    }
                }
                signal = tokio::signal::ctrl_c() => {
                    if signal.is_ok() {
                        self.controller.cancel(conversation_id);
                    }
                }
            }
        };
        println!();

        match outcome {
            Ok(StreamOutcome::Completed { message_id, .. }) => {
                if let Some(reply) = self
                    .state
                    .conversation(conversation_id)
                    .and_then(|conversation| conversation.message(message_id).cloned())
                {
                    println!("{}\n", render_blocks(&render_message(&reply.text)));
                }
            }
            Ok(StreamOutcome::Failed { message, .. }) => println!("Error: {message}\n"),
            Ok(StreamOutcome::CancelledBeforeReveal)
            | Ok(StreamOutcome::CancelledDuringReveal { .. }) => println!("(stopped)\n"),
            Err(error) => println!("cannot send: {error}\n"),
        }
        Ok(())
    }

    fn print_current(&self) {
        let snapshot = self.state.snapshot();
        let Some(conversation) = snapshot.current() else {
            return;
        };
        println!("== {} ==", conversation.title);
        for message in &conversation.messages {
            match message.sender {
                Sender::User => println!("{PROMPT}{}", message.text),
                Sender::Bot => println!("{}", render_blocks(&render_message(&message.text))),
            }
        }
        println!();
    }
}

fn print_list(snapshot: &ChatSnapshot) {
    for (position, conversation) in (1usize..).zip(&snapshot.conversations) {
        let marker = if snapshot.current_conversation_id == Some(conversation.id) {
            '*'
        } else {
            ' '
        };
        println!(
            "{marker} {position:>2}. {} ({} messages)",
            conversation.title,
            conversation.messages.len()
        );
    }
}

/// Waits for the next input line; `None` once input ends or `interrupt` fires.
async fn next_input<R>(
    lines: &mut Lines<R>,
    interrupt: impl Future<Output = std::io::Result<()>>,
) -> Result<Option<String>, AppError>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        line = lines.next_line() => line.context(TerminalSnafu {
            stage: "read-stdin",
        }),
        signal = interrupt => {
            signal.context(TerminalSnafu {
                stage: "wait-ctrl-c",
            })?;
            println!();
            Ok(None)
        }
    }
}

async fn print_prompt() -> Result<(), AppError> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(PROMPT.as_bytes())
        .await
        .context(TerminalSnafu {
            stage: "write-prompt",
        })?;
    stdout.flush().await.context(TerminalSnafu {
        stage: "flush-prompt",
    })
}

/// Prints the growing suffix of the streaming reply as reveal steps arrive.
#[derive(Default)]
struct LiveReveal {
    printed: usize,
}

impl LiveReveal {
    async fn print_update(
        &mut self,
        snapshot: &ChatSnapshot,
        conversation_id: ConversationId,
    ) -> Result<(), AppError> {
        let Some(text) = snapshot
            .conversation(conversation_id)
            .and_then(|conversation| conversation.messages.last())
            .filter(|message| message.is_streaming)
            .map(|message| message.text.as_str())
        else {
            return Ok(());
        };
        let Some(fresh) = text.get(self.printed..) else {
            return Ok(());
        };
        if fresh.is_empty() {
            return Ok(());
        }
        self.printed = text.len();

        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(format!("\x1b[2m{fresh}\x1b[0m").as_bytes())
            .await
            .context(TerminalSnafu {
                stage: "write-reveal",
            })?;
        stdout.flush().await.context(TerminalSnafu {
            stage: "flush-reveal",
        })
    }
}
