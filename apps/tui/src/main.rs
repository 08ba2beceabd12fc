//! Terminal dashboard for a running broker: polls `/api/v1/metrics` on an
//! interval and renders per-feed throughput, context-ring occupancy, and
//! LLM query stats. Input is read on a dedicated blocking thread (crossterm's
//! event reads are blocking) and forwarded to the async render loop over a
//! channel, the same split the broker uses between blocking connector I/O
//! and its async dispatch loop.

mod app;
mod metrics;
mod ui;

use std::io::Stdout;
use std::time::Duration;

use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc;
use tracing::warn;

use app::App;
use metrics::MetricsClient;

#[derive(Parser, Debug)]
#[command(name = "turbostream-tui", about = "Terminal dashboard for a TurboStream broker")]
struct Cli {
    /// Base URL of the broker's HTTP admin surface.
    #[arg(long, default_value = "http://127.0.0.1:8090")]
    broker_url: String,

    /// How often to poll `/api/v1/metrics`, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _guard = init_logging();

    let mut terminal = match setup_terminal() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("failed to initialize terminal: {e}");
            std::process::exit(1);
        }
    };

    let result = run(&mut terminal, &cli).await;

    if let Err(e) = teardown_terminal(&mut terminal) {
        eprintln!("failed to restore terminal: {e}");
    }

    if let Err(e) = result {
        eprintln!("turbostream-tui exited with error: {e}");
        std::process::exit(1);
    }
}

fn init_logging() -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never(".", "turbostream-tui.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .with_writer(non_blocking)
        .init();
    guard
}

fn setup_terminal() -> std::io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    Terminal::new(CrosstermBackend::new(stdout))
}

fn teardown_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> std::io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()
}

fn spawn_input_reader() -> mpsc::UnboundedReceiver<KeyCode> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || loop {
        match event::poll(Duration::from_millis(100)) {
            Ok(true) => {
                if let Ok(Event::Key(key)) = event::read() {
                    if key.kind == KeyEventKind::Press && tx.send(key.code).is_err() {
                        break;
                    }
                }
            }
            Ok(false) => {}
            Err(_) => break,
        }
    });
    rx
}

async fn run(terminal: &mut Terminal<CrosstermBackend<Stdout>>, cli: &Cli) -> std::io::Result<()> {
    let client = MetricsClient::new(&cli.broker_url);
    let mut app = App::new();
    let mut input_rx = spawn_input_reader();
    let mut poll_interval = tokio::time::interval(Duration::from_millis(cli.poll_interval_ms));

    loop {
        tokio::select! {
            biased;

            maybe_key = input_rx.recv() => {
                if let Some(code) = maybe_key {
                    handle_key(&mut app, code);
                }
            }

            _ = poll_interval.tick() => {
                match client.poll().await {
                    Ok(snapshot) => app.apply_snapshot(snapshot),
                    Err(e) => {
                        warn!(error = %e, "metrics poll failed");
                        app.apply_error(e);
                    }
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }

        terminal.draw(|frame| ui::draw(frame, &app))?;
    }
}

fn handle_key(app: &mut App, code: KeyCode) {
    match code {
        KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
        KeyCode::Down | KeyCode::Char('j') => app.select_next(),
        KeyCode::Up | KeyCode::Char('k') => app.select_previous(),
        _ => {}
    }
}
