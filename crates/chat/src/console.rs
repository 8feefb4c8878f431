//! Line-oriented terminal front end over [`StreamingChatSession`].
use std::io::Write;
use std::sync::Arc;

use ragchat_api::{ApiClient, ApiError};
use ragchat_store::{ChatId, DEFAULT_SESSION_TITLE, Role, SessionId, SessionStore};
use ragchat_stream::StreamTransport;
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::chat::{ChatError, ChatSnapshot, StreamPhase, StreamTarget, StreamingChatSession};
use crate::settings::{ClientSettings, SettingsError, SettingsStore};

const HELP: &str = "\
commands:
  <text>           send a message to the active session
  /new [title]     create a session and switch to it
  /sessions        list sessions of the current chat
  /switch <id>     switch to a session
  /delete <id>     delete a session
  /chat <id>       select the chat to work with (saved to settings)
  /help            show this help
  /quit            exit";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConsoleError {
    #[snafu(display("unknown command `{command}` on `{stage}`"))]
    UnknownCommand {
        stage: &'static str,
        command: String,
    },
    #[snafu(display("`{command}` needs an argument on `{stage}`"))]
    MissingArgument {
        stage: &'static str,
        command: &'static str,
    },
    #[snafu(display("failed to build api client on `{stage}`, {source}"))]
    Api {
        stage: &'static str,
        source: ApiError,
    },
    #[snafu(display("failed to save settings on `{stage}`, {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to read standard input on `{stage}`, {source}"))]
    Stdin {
        stage: &'static str,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New(Option<String>),
    Sessions,
    Switch(SessionId),
    Delete(SessionId),
    Chat(ChatId),
    Help,
    Quit,
}

impl Command {
    /// Parses one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, ConsoleError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Send(line.to_string())));
        };

        let (name, argument) = match rest.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (rest, ""),
        };

        let command = match name {
            "new" => Self::New((!argument.is_empty()).then(|| argument.to_string())),
            "sessions" => Self::Sessions,
            "switch" => Self::Switch(SessionId::new(required(argument, "/switch")?)),
            "delete" => Self::Delete(SessionId::new(required(argument, "/delete")?)),
            "chat" => Self::Chat(ChatId::new(required(argument, "/chat")?)),
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => {
                return UnknownCommandSnafu {
                    stage: "parse-command",
                    command: format!("/{other}"),
                }
                .fail();
            }
        };
        Ok(Some(command))
    }
}

fn required<'a>(argument: &'a str, command: &'static str) -> Result<&'a str, ConsoleError> {
    if argument.is_empty() {
        return MissingArgumentSnafu {
            stage: "parse-command",
            command,
        }
        .fail();
    }
    Ok(argument)
}

struct ActiveChat {
    session: StreamingChatSession,
    renderer: JoinHandle<()>,
}

impl Drop for ActiveChat {
    fn drop(&mut self) {
        self.renderer.abort();
    }
}

/// Runs the read-eval loop until `/quit` or end of input.
pub async fn run(settings: SettingsStore) -> Result<(), ConsoleError> {
    let mut active = match settings.settings().chat_id() {
        Some(chat_id) => Some(open_chat(&settings.settings(), chat_id).await?),
        None => {
            println!("no chat selected, use /chat <id>");
            None
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let Some(line) = lines.next_line().await.context(StdinSnafu {
            stage: "read-command",
        })?
        else {
            break;
        };

        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(error) => {
                eprintln!("{error}");
                continue;
            }
        };

        match command {
            Command::Quit => break,
            Command::Help => println!("{HELP}"),
            Command::Chat(chat_id) => {
                let mut updated = ClientSettings::clone(&settings.settings());
                updated.chat_id = chat_id.to_string();
                settings.update(updated).context(SettingsSnafu {
                    stage: "select-chat",
                })?;
                active = Some(open_chat(&settings.settings(), chat_id).await?);
            }
            command => match &active {
                Some(chat) => execute(&chat.session, command).await,
                None => eprintln!("no chat selected, use /chat <id>"),
            },
        }
    }

    if let Some(chat) = &active {
        chat.session.wait_until_idle().await;
    }
    Ok(())
}

async fn open_chat(
    settings: &ClientSettings,
    chat_id: ChatId,
) -> Result<ActiveChat, ConsoleError> {
    let client = Arc::new(ApiClient::new(settings.to_api_config()).context(ApiSnafu {
        stage: "open-chat",
    })?);
    let store: Arc<dyn SessionStore> = client.clone();
    let transport: Arc<dyn StreamTransport> = client;

    tracing::info!(chat_id = %chat_id, base_url = %settings.api_base_url, "opening chat");
    let session = StreamingChatSession::new(store, transport, chat_id)
        .with_timeouts(settings.stream_timeouts());
    let renderer = tokio::spawn(render_stream(session.subscribe()));

    activate_latest(&session).await;
    Ok(ActiveChat { session, renderer })
}

/// Switches to the most recently updated session, creating one for an empty chat.
async fn activate_latest(session: &StreamingChatSession) {
    let sessions = match session.refresh_sessions().await {
        Ok(sessions) => sessions,
        Err(error) => {
            report(&error);
            return;
        }
    };

    let outcome = match sessions.first() {
        Some(latest) => session.switch_session(&latest.id).await,
        None => session
            .create_session(DEFAULT_SESSION_TITLE)
            .await
            .map(|_| ()),
    };
    match outcome {
        Ok(()) => print_transcript(&session.snapshot()),
        Err(error) => report(&error),
    }
}

async fn execute(session: &StreamingChatSession, command: Command) {
    match command {
        Command::Send(text) => {
            session.set_draft(text);
            match session.send_draft() {
                Ok(_) => session.wait_until_idle().await,
                Err(error) => report(&error),
            }
        }
        Command::New(title) => {
            let title = title.as_deref().unwrap_or(DEFAULT_SESSION_TITLE);
            match session.create_session(title).await {
                Ok(created) => println!("switched to new session {} ({})", created.id, created.title),
                Err(error) => report(&error),
            }
        }
        Command::Sessions => match session.refresh_sessions().await {
            Ok(_) => print_sessions(&session.snapshot()),
            Err(error) => report(&error),
        },
        Command::Switch(session_id) => match session.switch_session(&session_id).await {
            Ok(()) => print_transcript(&session.snapshot()),
            Err(error) => report(&error),
        },
        Command::Delete(session_id) => match session.delete(&session_id).await {
            Ok(()) => {
                println!("deleted {session_id}");
                if session.snapshot().active_session.is_none() {
                    println!("no active session, use /switch <id> or /new");
                }
            }
            Err(error) => report(&error),
        },
        Command::Chat(_) | Command::Help | Command::Quit => {}
    }
}

/// Prints streamed tokens as they arrive and errors as they are recorded.
async fn render_stream(mut snapshots: watch::Receiver<ChatSnapshot>) {
    let mut current: Option<StreamTarget> = None;
    let mut printed = 0;
    let mut last_error: Option<String> = None;

    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();

        let streaming = match &snapshot.phase {
            StreamPhase::Sending(target) | StreamPhase::Streaming(target) => Some(target.clone()),
            _ => None,
        };
        if streaming != current {
            if current.is_some() && printed > 0 {
                println!();
            }
            current = streaming;
            printed = 0;
        }

        let content = &snapshot.transcript.streaming_content;
        if let Some(delta) = content.get(printed..).filter(|delta| !delta.is_empty()) {
            if printed == 0 {
                print!("assistant> ");
            }
            print!("{delta}");
            let _ = std::io::stdout().flush();
            printed = content.len();
        }

        if snapshot.last_error != last_error {
            if let Some(error) = &snapshot.last_error {
                eprintln!("error: {error}");
            }
            last_error = snapshot.last_error;
        }
    }
}

fn print_transcript(snapshot: &ChatSnapshot) {
    let Some(session_id) = &snapshot.active_session else {
        return;
    };
    println!("-- session {session_id} --");
    for message in &snapshot.transcript.messages {
        let speaker = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        println!("{speaker}> {}", message.content);
    }
}

fn print_sessions(snapshot: &ChatSnapshot) {
    if snapshot.sessions.is_empty() {
        println!("no sessions");
        return;
    }
    for session in &snapshot.sessions {
        let marker = if snapshot.active_session.as_ref() == Some(&session.id) {
            '*'
        } else {
            ' '
        };
        println!(
            "{marker} {}  {}  (updated {})",
            session.id,
            session.title,
            session.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
}

fn report(error: &ChatError) {
    if error.is_rejection() {
        eprintln!("{error}");
    } else {
        tracing::warn!(error = %error, "chat operation failed");
        eprintln!("error: {error}");
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}
