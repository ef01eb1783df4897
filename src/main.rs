// src/main.rs
mod config;
mod controller;
mod error;
mod input;
mod models;
mod network;
mod preview;
mod theme;
mod ui;
mod utils;

use std::{fs, io, sync::{Arc, Mutex}, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, prelude::CrosstermBackend};
use tokio::runtime::Runtime;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::controller::Controller;
use crate::input::{InputState, handle_key};
use crate::network::ReqwestTransport;
use crate::theme::Theme;
use crate::ui::{ViewContext, render};
use crate::utils::prediction_text;

#[derive(Parser, Debug)]
#[command(author, version, about = "Classify the emotion of a dog photo", long_about = None)]
struct Args {
    /// Image to preselect in the interactive view
    file: Option<String>,

    /// Inference endpoint, overrides the configured one
    #[arg(long)]
    endpoint: Option<String>,

    /// Store --endpoint in the user config
    #[arg(long, requires = "endpoint")]
    save_endpoint: bool,

    /// Classify FILE once, print the result and exit
    #[arg(long, value_name = "FILE")]
    once: Option<String>,

    /// With --once, print the prediction as JSON
    #[arg(long, requires = "once")]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = Settings::new().context("failed to load configuration")?;
    if let Some(endpoint) = &args.endpoint {
        settings.endpoint = endpoint.clone();
        if args.save_endpoint {
            config::save_endpoint(endpoint)?;
        }
    }

    init_logging(&settings, args.once.is_none());
    info!(endpoint = %settings.endpoint, "starting pawmood");
    match config::seed_user_config() {
        Ok(Some(path)) => info!(path = %path.display(), "wrote default user config"),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "could not write user config"),
    }

    let rt = Runtime::new()?;
    let transport = Arc::new(ReqwestTransport::new(settings.request_timeout())?);
    let controller = Controller::new(transport, settings.endpoint.as_str(), settings.retry_policy());

    match &args.once {
        Some(path) => rt.block_on(run_once(&controller, path, args.json)),
        None => run_interactive(&controller, &settings, &rt, args.file.as_deref()),
    }
}

fn init_logging(settings: &Settings, interactive: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if !interactive {
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).init();
        return;
    }

    // The TUI owns the terminal, so logs go to a file or nowhere.
    let file = settings.log_path().and_then(|path| {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok()?;
        }
        fs::OpenOptions::new().create(true).append(true).open(path).ok()
    });
    match file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        None => tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::sink).init(),
    }
}

async fn run_once(controller: &Controller, path: &str, json: bool) -> Result<()> {
    let outcome = match controller.select_path(path) {
        Ok(()) => controller.submit().await,
        Err(e) => Err(e),
    };
    match outcome {
        Ok(prediction) if json => println!("{}", serde_json::to_string_pretty(&prediction)?),
        Ok(prediction) => println!("{}", prediction_text(&prediction)),
        Err(e) => {
            error!(error = %e, "classification failed");
            anyhow::bail!(e.user_message(controller.endpoint()));
        }
    }
    Ok(())
}

fn run_interactive(controller: &Controller, settings: &Settings, rt: &Runtime, initial: Option<&str>) -> Result<()> {
    let mut input = InputState::default();
    if let Some(path) = initial {
        input.path_input = path.to_string();
        let _ = controller.select_path(path);
    }

    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, controller, settings, rt, &mut input);

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    controller: &Controller,
    settings: &Settings,
    rt: &Runtime,
    input: &mut InputState,
) -> Result<()> {
    let theme = Theme::default();
    let mut tick = 0usize;
    loop {
        let state = controller.snapshot();
        let ctx = ViewContext {
            mode: input.mode,
            path_input: &input.path_input,
            endpoint: controller.endpoint(),
            max_attempts: settings.retry_policy().max_attempts,
            tick,
        };
        terminal.draw(|f| render(f, &state, &ctx, &theme))?;
        tick = tick.wrapping_add(1);

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key_event) = event::read()? {
                if key_event.kind != KeyEventKind::Press {
                    continue;
                }
                if !handle_key(key_event.code, input, controller, rt.handle())? {
                    break;
                }
            }
        }
    }
    Ok(())
}
