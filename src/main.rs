//! mcpcalc - terminal calculator that drives a tool server over MCP.
//!
//! Without a subcommand this runs the TUI. The `tools` and `call`
//! subcommands talk to a server once and print the outcome.

mod app;
mod state;
mod ui;

// Re-use modules from lib.rs (exposed for integration tests)
use mcpcalc_tui::{bridge, config, models, session};

use std::fs::{self, File};
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use app::{Action, App, AppTab, CalculatorField};
use config::ClientConfig;
use models::ToolCall;
use session::{ServerTarget, Session};

/// Target frame duration (~60 fps).
const FRAME_DURATION: Duration = Duration::from_millis(16);

const DEFAULT_LOG_FILTER: &str = "mcpcalc=info";

/// Global flag to track if terminal is in raw mode (for panic cleanup)
static TERMINAL_RAW: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Parser)]
#[command(name = "mcpcalc", version, about = "Calculator client for MCP tool servers")]
struct Cli {
    /// Server to launch and connect to on startup (.py, .js or an executable).
    server: Option<PathBuf>,

    /// Seconds to wait for each request.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Log file for the TUI.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the tools a server offers.
    Tools { server: PathBuf },
    /// Call one tool and print its result.
    Call {
        server: PathBuf,
        tool: String,
        /// Arguments as KEY=VALUE; values parse as JSON, else as strings.
        args: Vec<String>,
    },
}

/// RAII guard for terminal state management.
/// Ensures terminal is restored to normal state when dropped, even on panic or early return.
struct TerminalGuard;

impl TerminalGuard {
    /// Initialize terminal for TUI mode (raw mode, alternate screen, mouse capture).
    fn new() -> Result<Self> {
        enable_raw_mode()?;
        TERMINAL_RAW.store(true, Ordering::SeqCst);

        // If execute! fails, we must restore terminal state before returning error
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen, EnableMouseCapture) {
            let _ = disable_raw_mode();
            TERMINAL_RAW.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        TERMINAL_RAW.store(false, Ordering::SeqCst);
    }
}

/// Install a panic hook that restores terminal state before printing panic info.
fn install_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        if TERMINAL_RAW.load(Ordering::SeqCst) {
            // Best effort cleanup - ignore errors
            let _ = disable_raw_mode();
            let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
            let _ = io::stdout().flush();
        }
        default_hook(panic_info);
    }));
}

fn env_filter() -> EnvFilter {
    EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
}

/// Log to a file; stdout belongs to the terminal UI.
fn init_file_logging(path: Option<&Path>) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = File::options()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}

fn init_stderr_logging() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = ClientConfig::from_env()?;
    if let Some(secs) = cli.timeout {
        if secs == 0 {
            bail!("--timeout must be a positive number of seconds");
        }
        config = config.with_request_timeout(Duration::from_secs(secs));
    }
    if let Some(log_file) = cli.log_file {
        config.log_file = Some(log_file);
    }

    match cli.command {
        Some(Command::Tools { server }) => {
            init_stderr_logging();
            run_headless(list_tools(&server, &config))
        }
        Some(Command::Call { server, tool, args }) => {
            init_stderr_logging();
            let call = parse_call(&tool, &args)?;
            run_headless(call_tool(&server, call, &config))
        }
        None => run_tui(cli.server, config),
    }
}

// =============================================================================
// Headless Commands
// =============================================================================

fn run_headless<F>(fut: F) -> Result<ExitCode>
where
    F: std::future::Future<Output = Result<ExitCode>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    runtime.block_on(fut)
}

async fn connect(server: &Path, config: &ClientConfig) -> Result<Session> {
    let target = ServerTarget::resolve(server, config)?;
    let session = Session::connect(&target, config)
        .await
        .with_context(|| format!("Failed to connect to {}", target.script().display()))?;
    info!(
        "Connected to {} {}",
        session.server_info().name,
        session.server_info().version
    );
    Ok(session)
}

async fn list_tools(server: &Path, config: &ClientConfig) -> Result<ExitCode> {
    let session = connect(server, config).await?;
    let result = session.list_tools().await;
    session.close().await;

    for tool in result.context("Tool discovery failed")? {
        println!("{}({})", tool.name, tool.argument_names().join(", "));
        if !tool.description.is_empty() {
            println!("    {}", tool.description);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn call_tool(server: &Path, call: ToolCall, config: &ClientConfig) -> Result<ExitCode> {
    let session = connect(server, config).await?;
    let label = call.label();
    let result = session.call_tool(call).await;
    session.close().await;

    let result = result.with_context(|| format!("{} failed", label))?;
    if result.is_error() {
        eprintln!("{}: {}", label, result.text());
        return Ok(ExitCode::from(2));
    }
    println!("{}", result.text());
    Ok(ExitCode::SUCCESS)
}

/// Build a call from `KEY=VALUE` arguments.
fn parse_call(tool: &str, args: &[String]) -> Result<ToolCall> {
    let mut call = ToolCall::new(tool);
    for arg in args {
        let Some((key, raw)) = arg.split_once('=') else {
            bail!("Invalid argument '{}', expected KEY=VALUE", arg);
        };
        if key.is_empty() {
            bail!("Invalid argument '{}', empty key", arg);
        }
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.into()));
        call = call.arg(key, value);
    }
    Ok(call)
}

// =============================================================================
// TUI
// =============================================================================

fn run_tui(server: Option<PathBuf>, config: ClientConfig) -> Result<ExitCode> {
    // Install panic hook FIRST for terminal safety
    install_panic_hook();
    init_file_logging(config.log_file.as_deref())?;

    info!("Starting mcpcalc TUI v{}", env!("CARGO_PKG_VERSION"));

    let mut app = App::new(config)?;
    if let Some(server) = server {
        app.form
            .set_value(CalculatorField::Server, &server.display().to_string());
        app.update(Action::Connect);
    }

    // Setup terminal with RAII guard - ensures cleanup on any exit path
    let terminal_guard = TerminalGuard::new()?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app);
    terminal.show_cursor()?;

    // Drop app first so the bridge worker closes the session
    drop(app);
    drop(terminal_guard);

    if let Err(e) = result {
        tracing::error!("Application error: {}", e);
        return Err(e);
    }

    info!("mcpcalc TUI exited cleanly");
    Ok(ExitCode::SUCCESS)
}

/// Main application loop.
fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    loop {
        // Drain bridge responses (non-blocking)
        app.poll_bridge_responses();

        // Call watchdog and quit grace
        app.tick();

        app.maybe_clear_error();

        // Only redraw if state has changed (dirty-flag optimization)
        if app.take_needs_redraw() {
            terminal.draw(|f| ui::render(f, app))?;
        }

        if app.should_quit {
            return Ok(());
        }

        // Poll for events with frame-rate limiting
        if event::poll(FRAME_DURATION)? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => handle_key(app, key),
                Event::Resize(_, _) => app.mark_dirty(),
                _ => {}
            }
        }
    }
}

fn handle_key(app: &mut App, key: event::KeyEvent) {
    // Global key handlers
    match (key.code, key.modifiers) {
        (KeyCode::Char('q'), KeyModifiers::CONTROL) | (KeyCode::Char('c'), KeyModifiers::CONTROL) => {
            app.update(Action::Quit);
        }
        (KeyCode::Tab, KeyModifiers::NONE) => app.update(Action::TabNext),
        (KeyCode::BackTab, _) => app.update(Action::TabPrev),
        (KeyCode::Char('d'), KeyModifiers::CONTROL) => app.update(Action::Disconnect),
        (KeyCode::Char('l'), KeyModifiers::CONTROL) => app.update(Action::ToolsRefresh),
        (KeyCode::Esc, _) => app.update(Action::ErrorClear),
        _ => handle_tab_input(app, key),
    }
}

fn handle_tab_input(app: &mut App, key: event::KeyEvent) {
    match app.current_tab {
        AppTab::Calculator => match key.code {
            KeyCode::Up => app.update(Action::FieldPrev),
            KeyCode::Down => app.update(Action::FieldNext),
            KeyCode::Enter => {
                if app.form.focused == CalculatorField::Server {
                    app.update(Action::Connect);
                } else {
                    app.update(Action::Calculate);
                }
            }
            _ => {
                if app.form.focused_mut().input(key) {
                    app.mark_dirty();
                }
            }
        },
        AppTab::Tools => match key.code {
            KeyCode::Up | KeyCode::Char('k') => app.update(Action::ToolSelectPrev),
            KeyCode::Down | KeyCode::Char('j') => app.update(Action::ToolSelectNext),
            KeyCode::Char('1') => app.update(Action::TabSet(AppTab::Calculator)),
            KeyCode::Char('3') => app.update(Action::TabSet(AppTab::Log)),
            _ => {}
        },
        AppTab::Log => match key.code {
            KeyCode::Up | KeyCode::Char('k') => app.update(Action::LogScrollUp),
            KeyCode::Down | KeyCode::Char('j') => app.update(Action::LogScrollDown),
            KeyCode::Home | KeyCode::Char('g') => app.update(Action::LogScrollTop),
            KeyCode::End | KeyCode::Char('G') => app.update(Action::LogScrollBottom),
            KeyCode::Char('1') => app.update(Action::TabSet(AppTab::Calculator)),
            KeyCode::Char('2') => app.update(Action::TabSet(AppTab::Tools)),
            _ => {}
        },
    }
}
