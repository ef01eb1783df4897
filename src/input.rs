use arboard::Clipboard;
use crossterm::event::KeyCode;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::controller::Controller;
use crate::models::InputMode;
use crate::utils::prediction_text;

/// Event-loop side state that is not part of the classifier state.
pub struct InputState {
    pub mode: InputMode,
    pub path_input: String,
}

impl Default for InputState {
    fn default() -> Self {
        Self {
            mode: InputMode::Normal,
            path_input: String::new(),
        }
    }
}

/// Applies one key press. Returns `Ok(false)` when the app should quit.
pub fn handle_key(key: KeyCode, input: &mut InputState, controller: &Controller, rt: &Handle) -> anyhow::Result<bool> {
    match input.mode {
        InputMode::EditingPath => match key {
            KeyCode::Enter => {
                input.mode = InputMode::Normal;
                if input.path_input.trim().is_empty() {
                    controller.select_file(None)?;
                } else if let Err(e) = controller.select_path(&input.path_input) {
                    // Already reflected in the error panel.
                    debug!(error = %e, "selection rejected");
                }
            }
            KeyCode::Esc => input.mode = InputMode::Normal,
            KeyCode::Backspace => {
                input.path_input.pop();
            }
            KeyCode::Char(c) => input.path_input.push(c),
            _ => {}
        },
        InputMode::Normal => match key {
            KeyCode::Char('q') => return Ok(false),
            KeyCode::Char('o') | KeyCode::Char('i') => input.mode = InputMode::EditingPath,
            KeyCode::Enter | KeyCode::Char('p') => submit(controller, rt),
            KeyCode::Char('x') => {
                controller.select_file(None)?;
                input.path_input.clear();
            }
            KeyCode::Char('c') => copy_result(controller),
            _ => {}
        },
    }
    Ok(true)
}

/// Starts a prediction in the background. Inert while one is already running.
pub fn submit(controller: &Controller, rt: &Handle) {
    if controller.snapshot().loading {
        return;
    }
    let controller = controller.clone();
    rt.spawn(async move {
        let _ = controller.submit().await;
    });
}

fn copy_result(controller: &Controller) {
    let state = controller.snapshot();
    let text = match (&state.error, &state.prediction) {
        (Some(error), _) => error.clone(),
        (None, Some(prediction)) => prediction_text(prediction),
        (None, None) => return,
    };
    match Clipboard::new().and_then(|mut cb| cb.set_text(text)) {
        Ok(()) => debug!("copied result to clipboard"),
        Err(e) => warn!(error = %e, "clipboard unavailable"),
    }
}
