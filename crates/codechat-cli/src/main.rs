//! codechat - terminal client for the codechat server.
//!
//! This is the entry point for the `codechat` binary.

mod app;
mod commands;
mod markdown;
mod settings;
mod transcript;
mod ui;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use crossterm::event::{self, Event, KeyEventKind, MouseEventKind};
use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use codechat_api::ApiClient;
use codechat_session::{SessionConfig, SessionEvent, TransportSession, WsConnector};

use app::{ApiCredential, App};
use settings::LocalSettings;

/// codechat - chat with a coding assistant from the terminal.
#[derive(Parser, Debug)]
#[command(name = "codechat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server URL.
    #[arg(long, env = "CODECHAT_SERVER", default_value = "http://localhost:8000")]
    server: String,

    /// Username to log in with.
    #[arg(long, env = "CODECHAT_USERNAME")]
    username: Option<String>,

    /// Password to log in with.
    #[arg(long, env = "CODECHAT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Local settings file.
    #[arg(long, env = "CODECHAT_SETTINGS", default_value = "codechat-settings.json")]
    settings: PathBuf,

    /// Write logs to this file.
    #[arg(long, env = "CODECHAT_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Enable debug logging (to `codechat.log` unless --log-file is set).
    #[arg(long, default_value = "false")]
    debug: bool,
}

/// Log to a file so the terminal UI is left intact.
fn init_logging(args: &Args) -> anyhow::Result<()> {
    let path = match (&args.log_file, args.debug) {
        (Some(path), _) => path.clone(),
        (None, true) => PathBuf::from("codechat.log"),
        (None, false) => return Ok(()),
    };
    let file = std::fs::File::create(&path)
        .with_context(|| format!("cannot create log file {}", path.display()))?;

    let default_filter = if args.debug {
        "codechat_cli=debug,codechat_session=debug,codechat_api=debug,warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// Log in and sync settings before the terminal is taken over.
async fn prepare(args: &Args) -> anyhow::Result<(ApiClient, LocalSettings)> {
    let api = ApiClient::new(&args.server)?;

    if let (Some(username), Some(password)) = (&args.username, &args.password) {
        api.login(username, password)
            .await
            .with_context(|| format!("login to {} failed", args.server))?;
    }

    let mut settings = LocalSettings::load(&args.settings)?;
    if api.is_authenticated() {
        match api.settings().await {
            Ok(server) => {
                settings.adopt(&server);
                save_settings(&settings, &args.settings);
            }
            Err(e) => tracing::warn!(error = %e, "Could not fetch server settings"),
        }
    }
    Ok((api, settings))
}

fn save_settings(settings: &LocalSettings, path: &Path) {
    if let Err(e) = settings.save(path) {
        tracing::warn!(error = %e, "Could not save settings");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let (api, settings) = prepare(&args).await?;

    let mut config = SessionConfig::from_env();
    config.server_url.clone_from(&args.server);
    let transport = TransportSession::new(
        &config,
        Arc::new(WsConnector),
        Arc::new(ApiCredential(api.clone())),
    )?;
    tracing::info!(endpoint = %transport.endpoint(), "Starting codechat");
    let events = transport.event_stream();

    let mut app = App::new(api, transport, settings, args.settings.clone());
    app.load_history().await;
    app.connect();

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_event_loop(&mut terminal, &mut app, events).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    result
}

/// Main event loop.
///
/// Session events trigger an immediate redraw so streamed text appears as it
/// arrives.
async fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) -> anyhow::Result<()> {
    loop {
        app.tick_animation();
        terminal.draw(|f| ui::render(f, app))?;

        let tick = if app.is_generating() {
            Duration::from_millis(80)
        } else {
            Duration::from_millis(100)
        };

        tokio::select! {
            () = tokio::time::sleep(tick) => {
                while event::poll(Duration::ZERO).unwrap_or(false) {
                    if let Ok(evt) = event::read() {
                        handle_terminal_event(app, evt).await;
                    }
                }
            }

            Some(event) = events.recv() => {
                app.handle_session_event(&event);
                terminal.draw(|f| ui::render(f, app))?;
            }
        }

        if app.should_quit {
            break;
        }
    }

    app.shutdown().await;
    Ok(())
}

async fn handle_terminal_event(app: &mut App, event: Event) {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => app.handle_key(key).await,
        Event::Mouse(mouse) => match mouse.kind {
            MouseEventKind::ScrollUp => app.scroll = app.scroll.saturating_add(3),
            MouseEventKind::ScrollDown => app.scroll = app.scroll.saturating_sub(3),
            _ => {}
        },
        _ => {}
    }
}
