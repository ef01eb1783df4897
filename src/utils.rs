use ratatui::layout::{Constraint, Direction, Layout, Rect};

use crate::models::PredictionResult;

/// Uppercases the first character, the way labels are shown in the probability list.
pub fn capitalize(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn human_size(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / (KB * KB))
    }
}

/// Plain-text rendering of a prediction, for the clipboard and headless output.
pub fn prediction_text(prediction: &PredictionResult) -> String {
    let mut out = format!(
        "Predicted emotion: {}\nConfidence: {}%\nFull probabilities:",
        prediction.predicted_emotion.to_uppercase(),
        prediction.confidence
    );
    for (emotion, probability) in &prediction.full_probabilities {
        out.push_str(&format!("\n  {}: {:.2}%", capitalize(emotion), probability));
    }
    out
}

/// Rectangle of `percent_x` by `percent_y` of `r`, centered in it.
pub fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let band = |percent: u16| {
        [
            Constraint::Percentage((100 - percent) / 2),
            Constraint::Percentage(percent),
            Constraint::Percentage((100 - percent) / 2),
        ]
    };
    let middle_row = Layout::default()
        .direction(Direction::Vertical)
        .constraints(band(percent_y))
        .split(r)[1];
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(band(percent_x))
        .split(middle_row)[1]
}
