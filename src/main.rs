use std::sync::Arc;

use ai_chat_client::api::ApiClient;
use ai_chat_client::config::ClientConfig;
use ai_chat_client::credentials::{CredentialStore, FileCredentialStore};
use ai_chat_client::models::{MessageRole, RegisterData};
use ai_chat_client::service::{AuthService, ChatCoordinator, NoticeLevel};
use ai_chat_client::stream::EventStreamClient;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Login { email: String, password: String },
    Register { username: String, email: String, password: String },
    Logout,
    New(Option<String>),
    List,
    Open(String),
    Title(String),
    Delete(String),
    Models,
    Model(String),
    Quit,
    Say(String),
    Usage(&'static str),
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if !line.starts_with('/') {
            return Some(Command::Say(line.to_string()));
        }

        let (name, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        let args: Vec<&str> = rest.split_whitespace().collect();
        let command = match (name, args.as_slice()) {
            ("/login", [email, password]) => Command::Login {
                email: email.to_string(),
                password: password.to_string(),
            },
            ("/login", _) => Command::Usage("/login <email> <password>"),
            ("/register", [username, email, password]) => Command::Register {
                username: username.to_string(),
                email: email.to_string(),
                password: password.to_string(),
            },
            ("/register", _) => Command::Usage("/register <username> <email> <password>"),
            ("/logout", _) => Command::Logout,
            ("/new", []) => Command::New(None),
            ("/new", _) => Command::New(Some(rest.to_string())),
            ("/list", _) => Command::List,
            ("/open", [id]) => Command::Open(id.to_string()),
            ("/open", _) => Command::Usage("/open <id>"),
            ("/title", [_, ..]) => Command::Title(rest.to_string()),
            ("/title", _) => Command::Usage("/title <text>"),
            ("/delete", [id]) => Command::Delete(id.to_string()),
            ("/delete", _) => Command::Usage("/delete <id>"),
            ("/models", _) => Command::Models,
            ("/model", [id]) => Command::Model(id.to_string()),
            ("/model", _) => Command::Usage("/model <id>"),
            ("/quit", _) | ("/exit", _) => Command::Quit,
            _ => Command::Usage(
                "/login /register /logout /new /list /open /title /delete /models /model /quit",
            ),
        };
        Some(command)
    }
}

/// Line editing on a dedicated thread. The command loop asks for one line at a time so the
/// prompt is only shown once the previous command has finished printing.
struct Prompt {
    ask: std::sync::mpsc::Sender<()>,
    lines: mpsc::Receiver<Option<String>>,
}

impl Prompt {
    fn spawn() -> Self {
        let (ask, asked) = std::sync::mpsc::channel::<()>();
        let (line_tx, lines) = mpsc::channel(1);
        std::thread::spawn(move || {
            let mut editor = match DefaultEditor::new() {
                Ok(editor) => editor,
                Err(e) => {
                    error!("Line editor unavailable: {e}");
                    let _ = line_tx.blocking_send(None);
                    return;
                }
            };
            while asked.recv().is_ok() {
                let line = accept_line(editor.readline("> "));
                if let Some(line) = line.as_deref().filter(|l| !l.trim().is_empty()) {
                    let _ = editor.add_history_entry(line);
                }
                let done = line.is_none();
                if line_tx.blocking_send(line).is_err() || done {
                    return;
                }
            }
        });
        Self { ask, lines }
    }

    /// `None` once the user quits with Ctrl-C or Ctrl-D.
    async fn next_line(&mut self) -> Option<String> {
        self.ask.send(()).ok()?;
        self.lines.recv().await.flatten()
    }
}

fn accept_line(read: Result<String, ReadlineError>) -> Option<String> {
    match read {
        Ok(line) => Some(line),
        Err(ReadlineError::Interrupted | ReadlineError::Eof) => None,
        Err(e) => {
            error!("Failed to read input: {e}");
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Logs go to stderr so they don't interleave with the conversation on stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ai_chat_client=debug".into()),
        )
        .init();

    let config = ClientConfig::from_env();
    info!("Using backend {} and event stream {}", config.api.base_url, config.stream.url);

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let credentials: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(
        config.credentials.path.clone(),
        config.credentials.ttl,
    ));
    let api = ApiClient::new(&config.api, credentials.clone())?;
    let stream = EventStreamClient::new(config.stream.clone(), credentials.clone());
    let auth = AuthService::new(api.clone());
    let coordinator = ChatCoordinator::new(
        Arc::new(api.clone()),
        Arc::new(stream.clone()),
        credentials.clone(),
        config.coordinator.clone(),
    );

    let _unauthorized = auth.watch_unauthorized();
    let _session = coordinator.watch_user(auth.watch_user());

    let mut notices = coordinator.notices();
    tokio::spawn(async move {
        while let Ok(notice) = notices.recv().await {
            let tag = match notice.level {
                NoticeLevel::Info => "info",
                NoticeLevel::Success => "ok",
                NoticeLevel::Error => "error",
            };
            println!("[{tag}] {}", notice.text);
        }
    });

    // ── Session restore ───────────────────────────────────────────────────────
    match auth.check_auth().await {
        Some(user) => {
            println!("Welcome back, {}.", user.username);
            refresh_lists(&coordinator).await;
        }
        None => println!("Not logged in. Use /login <email> <password>."),
    }

    // ── Command loop ──────────────────────────────────────────────────────────
    let mut prompt = Prompt::spawn();
    while let Some(line) = prompt.next_line().await {
        let Some(command) = Command::parse(&line) else {
            continue;
        };
        debug!("Command: {command:?}");
        match command {
            Command::Quit => break,
            Command::Usage(usage) => println!("usage: {usage}"),
            Command::Login { email, password } => match auth.login(&email, &password).await {
                Ok(user) => {
                    println!("Logged in as {}.", user.username);
                    refresh_lists(&coordinator).await;
                }
                Err(e) => println!("[error] {e}"),
            },
            Command::Register { username, email, password } => {
                let data = RegisterData {
                    username,
                    email,
                    password,
                    first_name: None,
                    last_name: None,
                };
                match auth.register(&data).await {
                    Ok(user) => println!("Registered {}.", user.username),
                    Err(e) => println!("[error] {e}"),
                }
            }
            Command::Logout => {
                auth.logout().await;
                println!("Logged out.");
            }
            Command::New(title) => {
                if let Ok(conversation) = coordinator.create_conversation(title.as_deref(), None).await {
                    println!("Opened {} ({})", conversation.title, conversation.id);
                }
            }
            Command::List => {
                if coordinator.load_conversations().await.is_ok() {
                    let state = coordinator.snapshot().await;
                    if state.conversations.is_empty() {
                        println!("No conversations yet.");
                    }
                    for conversation in &state.conversations {
                        let marker = if state.is_active(&conversation.id) { "*" } else { " " };
                        println!(
                            "{marker} {}  {}  ({} messages)",
                            conversation.id, conversation.title, conversation.total_messages
                        );
                    }
                }
            }
            Command::Open(id) => {
                if coordinator.load_conversation(&id).await.is_ok() {
                    let state = coordinator.snapshot().await;
                    for message in &state.messages {
                        println!("{}: {}", message.role, message.content);
                    }
                }
            }
            Command::Title(title) => {
                let _ = coordinator.update_conversation_title(&title).await;
            }
            Command::Delete(id) => {
                let _ = coordinator.delete_conversation(&id).await;
            }
            Command::Models => {
                let _ = coordinator.load_models().await;
                let state = coordinator.snapshot().await;
                for model in &state.models {
                    let marker = if model.id == state.selected_model { "*" } else { " " };
                    println!("{marker} {}  {}", model.id, model.name);
                }
            }
            Command::Model(id) => {
                coordinator.set_selected_model(&id).await;
                println!("Model set to {id}.");
            }
            Command::Say(text) => {
                coordinator.set_draft(&text).await;
                if coordinator.submit_draft().await.is_ok() {
                    print_latest_reply(&coordinator).await;
                }
            }
        }
    }

    stream.destroy();
    info!("Bye");
    Ok(())
}

async fn refresh_lists(coordinator: &ChatCoordinator) {
    let _ = coordinator.load_conversations().await;
    let _ = coordinator.load_models().await;
}

async fn print_latest_reply(coordinator: &ChatCoordinator) {
    let state = coordinator.snapshot().await;
    if state.streaming || state.ai_typing {
        println!("(assistant is replying over the event stream)");
        return;
    }
    if let Some(reply) = state.messages.iter().rev().find(|m| m.role == MessageRole::Assistant) {
        println!("assistant: {}", reply.content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_chat_message() {
        assert_eq!(Command::parse("  Hi there "), Some(Command::Say("Hi there".into())));
        assert_eq!(Command::parse("   "), None);
    }

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(
            Command::parse("/login a@b.c secret"),
            Some(Command::Login { email: "a@b.c".into(), password: "secret".into() })
        );
        assert_eq!(Command::parse("/new"), Some(Command::New(None)));
        assert_eq!(Command::parse("/new Trip ideas"), Some(Command::New(Some("Trip ideas".into()))));
        assert_eq!(Command::parse("/title  Better name "), Some(Command::Title("Better name".into())));
        assert_eq!(Command::parse("/open c1"), Some(Command::Open("c1".into())));
        assert_eq!(Command::parse("/quit"), Some(Command::Quit));
    }

    #[test]
    fn ctrl_c_and_ctrl_d_end_the_session() {
        assert_eq!(accept_line(Ok("hello".into())), Some("hello".into()));
        assert_eq!(accept_line(Err(ReadlineError::Interrupted)), None);
        assert_eq!(accept_line(Err(ReadlineError::Eof)), None);
        let broken = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        assert_eq!(accept_line(Err(ReadlineError::Io(broken))), None);
    }

    #[test]
    fn missing_arguments_print_usage() {
        assert_eq!(Command::parse("/login only-email"), Some(Command::Usage("/login <email> <password>")));
        assert_eq!(Command::parse("/open"), Some(Command::Usage("/open <id>")));
        assert!(matches!(Command::parse("/bogus"), Some(Command::Usage(_))));
    }
}
