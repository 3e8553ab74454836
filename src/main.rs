mod ui;

use std::sync::Arc;

use chatsync::api::client::ApiClient;
use chatsync::api::events::{EventKind, InboundEvent};
use chatsync::channel::Listener;
use chatsync::channel::ws::WsTransport;
use chatsync::snapshot::SnapshotLoader;
use chatsync::{AppConfig, Command, Notice, SyncEngine, SyncSettings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

fn parse_command(line: &str) -> Option<Vec<Command>> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let cmds = match head {
        "/open" if !rest.is_empty() => vec![Command::Open(rest.to_string())],
        "/with" if !rest.is_empty() => vec![Command::OpenWithUser(rest.to_string())],
        "/close" => vec![Command::Close],
        "/refresh" => vec![Command::Refresh],
        "/quit" => vec![Command::Shutdown],
        _ if line.starts_with('/') => return None,
        _ if line.trim().is_empty() => vec![Command::Keystroke],
        _ => vec![Command::Keystroke, Command::Send(line.to_string())],
    };
    Some(cmds)
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        eprintln!("chatsync: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> chatsync::Result<()> {
    let config = AppConfig::load()?;
    config.validate()?;

    let api = ApiClient::new(&config.api_url(), &config.token)?;
    let me = SnapshotLoader::new(api.clone()).resolve_user(&config.user_id).await?;

    let transport = WsTransport::new(config.socket_url()?);
    let mut engine = SyncEngine::new(&me, &config.token, api, transport, SyncSettings::from(&config));

    let me_for_bell = me.clone();
    let bell: Listener = Arc::new(move |event| {
        if let InboundEvent::NewMessage(m) = event {
            if !m.is_from(&me_for_bell) {
                print!("\x07");
            }
        }
    });
    engine.channel_mut().on(EventKind::NewMessage, bell);

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_command(&line) {
                Some(cmds) => {
                    for cmd in cmds {
                        if tx.send(cmd).is_err() {
                            return;
                        }
                    }
                }
                None => eprintln!("commands: /open <id>, /with <userId>, /close, /refresh, /quit"),
            }
        }
    });

    engine
        .run(rx, |engine, notice| match notice {
            Notice::ConversationsChanged => {
                let store = engine.store();
                print!("{}", ui::sidebar::render(store.conversations(), store.active_conversation()));
            }
            Notice::MessagesChanged => {
                print!(
                    "{}",
                    ui::chat_view::render(engine.store().messages(), engine.me(), engine.typing_indicator())
                );
            }
            Notice::TypingChanged(Some(name)) => println!("{} is typing...", name),
            Notice::TypingChanged(None) => {}
            Notice::Connection(state) => log::info!("channel {:?}", state),
            Notice::Error(message) => eprintln!("error: {}", message),
            Notice::SendFailed { draft, reason } => {
                eprintln!("not sent ({}), draft kept: {}", reason, draft)
            }
        })
        .await;
    Ok(())
}
