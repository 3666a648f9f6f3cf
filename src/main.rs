use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use voice_session::session::{SessionFactory, SystemSessionFactory};
use voice_session::{
    create_router, AppState, Config, ConversationSession, SessionEvent, SessionHandle, SessionMode,
};

#[derive(Parser)]
#[command(name = "voice-session", version, about = "Spoken conversations with a remote assistant")]
struct Cli {
    /// Config file (extension optional; missing file means defaults)
    #[arg(short, long, default_value = "config/voice-session", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Hold one conversation in this terminal until Ctrl-C
    Talk {
        /// Server origin, e.g. https://assistant.example.com
        #[arg(long)]
        url: Option<String>,

        /// Start with the microphone muted
        #[arg(long)]
        muted: bool,

        /// Only send audio while talking; press Enter to toggle
        #[arg(long)]
        push_to_talk: bool,
    },
    /// Run the HTTP control API
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut cfg = Config::load(&cli.config)?;

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Talk {
            url,
            muted,
            push_to_talk,
        } => {
            if let Some(url) = url {
                cfg.server.url = url;
            }
            if muted {
                cfg.session.start_muted = true;
            }
            if push_to_talk {
                cfg.session.mode = SessionMode::PushToTalk;
            }
            talk(cfg).await
        }
        Command::Serve { port } => {
            if let Some(port) = port {
                cfg.service.http.port = port;
            }
            serve(cfg).await
        }
    }
}

async fn talk(cfg: Config) -> Result<()> {
    let session_config = cfg.session_config()?;
    info!("Voice endpoint: {}", session_config.server_url);

    let parts = SystemSessionFactory.create(&session_config)?;
    let push_to_talk = session_config.mode == SessionMode::PushToTalk;

    let session = ConversationSession::new(session_config, parts);
    let mut events = session.subscribe();
    let handle = session.spawn();

    if push_to_talk {
        tokio::spawn(toggle_talk_on_enter(handle.clone()));
        println!("Push-to-talk: press Enter to start and stop talking");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Stopped) => break,
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => warn!("Skipped {} session events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let stats = handle.stop().await;
    info!(
        "Session {} ended: {} turns, {} frames sent, {} dropped",
        stats.session_id, stats.turns_completed, stats.frames_sent, stats.frames_dropped
    );
    if let Some(reason) = stats.last_error {
        anyhow::bail!("voice session failed: {}", reason);
    }

    Ok(())
}

async fn toggle_talk_on_enter(handle: SessionHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut held = false;

    while let Ok(Some(_)) = lines.next_line().await {
        held = !held;
        if handle.set_talk_held(held).await.is_err() {
            break;
        }
        println!("{}", if held { "[talking]" } else { "[released]" });
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Status { text } => println!("· {}", text),
        SessionEvent::Transcript { text, partial: true } => println!("  you (…): {}", text),
        SessionEvent::Transcript { text, partial: false } => println!("  you: {}", text),
        SessionEvent::ResponseText { content } => println!("  assistant: {}", content),
        SessionEvent::ToolCall { name } => println!("  [tool: {}]", name),
        SessionEvent::Notice { message } => println!("! {}", message),
        SessionEvent::Failed { reason } => println!("✗ {}", reason),
        _ => {}
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let state = AppState::new(cfg);
    let app = create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP control API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    let session = state.session.write().await.take();
    if let Some(session) = session {
        session.stop().await;
    }

    Ok(())
}
