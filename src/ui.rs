use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, Gauge, Paragraph, Wrap},
};

use crate::models::{ClassifierState, InputMode, PredictionResult};
use crate::preview::{PreviewReference, Thumbnail};
use crate::theme::Theme;
use crate::utils::{capitalize, centered_rect, human_size};

const SPINNER: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Input-side state owned by the event loop, not by the controller.
pub struct ViewContext<'a> {
    pub mode: InputMode,
    pub path_input: &'a str,
    pub endpoint: &'a str,
    pub max_attempts: u32,
    pub tick: usize,
}

/// Renders one frame. Pure function of the controller snapshot and the view context.
pub fn render(f: &mut Frame, state: &ClassifierState, ctx: &ViewContext, theme: &Theme) {
    let area = f.area();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // title
            Constraint::Length(3), // file + button
            Constraint::Min(5),    // preview | results
            Constraint::Length(3), // footer
        ])
        .split(area);

    let title = Paragraph::new(Line::from(vec![
        Span::styled("🐶 Dog Emotion Detector", theme.title),
        Span::styled(format!("  ·  {}", ctx.endpoint), Style::default().fg(theme.text_secondary)),
    ]))
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::BOTTOM).border_style(Style::default().fg(theme.accent)));
    f.render_widget(title, rows[0]);

    render_controls(f, rows[1], state, ctx, theme);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(rows[2]);
    render_preview(f, body[0], state.preview.as_ref(), theme);
    render_results(f, body[1], state, theme);

    let footer = Paragraph::new(match ctx.mode {
        InputMode::Normal => "o Open image | Enter/p Get emotion | x Clear | c Copy result | q Quit",
        InputMode::EditingPath => "Type a path (~ and $VARS expand) | Enter Select | Esc Cancel",
    })
    .block(Block::default().borders(Borders::ALL))
    .style(theme.footer);
    f.render_widget(footer, rows[3]);

    if ctx.mode == InputMode::EditingPath {
        render_path_popup(f, ctx, theme);
    }
}

fn render_controls(f: &mut Frame, area: Rect, state: &ClassifierState, ctx: &ViewContext, theme: &Theme) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);

    let (label, style) = match &state.selected {
        Some(file) => (format!("✅ File Selected: {}", file.name), theme.file_selected),
        None => ("Press o to select a dog image".to_string(), Style::default().fg(theme.text)),
    };
    let file_box = Paragraph::new(label)
        .style(style)
        .block(Block::default().borders(Borders::ALL).title("Image"));
    f.render_widget(file_box, cols[0]);

    let (button, button_style) = if state.loading {
        let frame = SPINNER[ctx.tick % SPINNER.len()];
        let attempt = state.attempt.max(1);
        (
            format!("{} Predicting... (attempt {}/{})", frame, attempt, ctx.max_attempts),
            theme.button_ready,
        )
    } else if state.can_submit() {
        ("Get Emotion [Enter]".to_string(), theme.button_ready)
    } else {
        ("Get Emotion".to_string(), theme.button_disabled)
    };
    let button = Paragraph::new(button)
        .alignment(Alignment::Center)
        .style(button_style)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(button, cols[1]);
}

fn render_preview(f: &mut Frame, area: Rect, preview: Option<&PreviewReference>, theme: &Theme) {
    let block = Block::default()
        .title("Image to Classify")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.blurred_border));
    let Some(preview) = preview else {
        f.render_widget(
            Paragraph::new("No image selected.")
                .style(Style::default().fg(theme.text_secondary))
                .block(block),
            area,
        );
        return;
    };

    let mut lines = match preview.thumbnail.as_deref() {
        Some(thumb) => thumbnail_lines(thumb),
        None => vec![Line::from(Span::styled(
            "(preview unavailable for this file)",
            Style::default().fg(theme.text_secondary),
        ))],
    };
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        format!("{} · {}", preview.file_name, human_size(preview.size)),
        Style::default().fg(theme.text_secondary),
    )));

    f.render_widget(Paragraph::new(lines).alignment(Alignment::Center).block(block), area);
}

/// Two pixel rows per terminal row: the upper half block takes the top pixel as
/// foreground and the bottom pixel as background.
fn thumbnail_lines(thumb: &Thumbnail) -> Vec<Line<'static>> {
    (0..thumb.height)
        .step_by(2)
        .map(|y| {
            let spans: Vec<Span<'static>> = (0..thumb.width)
                .map(|x| {
                    let mut style = Style::default();
                    if let Some([r, g, b]) = thumb.pixel(x, y) {
                        style = style.fg(Color::Rgb(r, g, b));
                    }
                    if let Some([r, g, b]) = thumb.pixel(x, y + 1) {
                        style = style.bg(Color::Rgb(r, g, b));
                    }
                    Span::styled("▀", style)
                })
                .collect();
            Line::from(spans)
        })
        .collect()
}

fn render_results(f: &mut Frame, area: Rect, state: &ClassifierState, theme: &Theme) {
    let title = match state.settled_at {
        Some(at) => format!("Result · {}", at.format("%H:%M:%S")),
        None => "Result".to_string(),
    };
    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.accent));

    if let Some(error) = &state.error {
        let para = Paragraph::new(vec![
            Line::from(Span::styled("🚨 Connection/Model Error:", theme.error_title)),
            Line::from(Span::styled(error.clone(), theme.error_text)),
        ])
        .wrap(Wrap { trim: true })
        .block(block);
        f.render_widget(para, area);
    } else if let Some(prediction) = &state.prediction {
        let inner = block.inner(area);
        f.render_widget(block, area);
        render_prediction(f, inner, prediction, theme);
    } else {
        let hint = if state.loading { "Waiting for the model..." } else { "No prediction yet." };
        f.render_widget(
            Paragraph::new(hint).style(Style::default().fg(theme.text_secondary)).block(block),
            area,
        );
    }
}

fn render_prediction(f: &mut Frame, area: Rect, prediction: &PredictionResult, theme: &Theme) {
    let mut constraints = vec![
        Constraint::Length(1), // heading
        Constraint::Length(1), // emotion
        Constraint::Length(1), // confidence
        Constraint::Length(1), // spacer
        Constraint::Length(1), // probabilities heading
    ];
    constraints.extend(prediction.full_probabilities.iter().map(|_| Constraint::Length(1)));
    constraints.push(Constraint::Min(0));
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints(constraints)
        .split(area);

    f.render_widget(
        Paragraph::new("✨ Predicted Emotion:").style(Style::default().fg(theme.text)),
        rows[0],
    );
    f.render_widget(
        Paragraph::new(prediction.predicted_emotion.to_uppercase())
            .alignment(Alignment::Center)
            .style(theme.emotion),
        rows[1],
    );
    f.render_widget(
        Paragraph::new(Line::from(vec![
            Span::styled("Confidence: ", Style::default().fg(theme.text_secondary)),
            Span::styled(format!("{}%", prediction.confidence), theme.confidence),
        ]))
        .alignment(Alignment::Center),
        rows[2],
    );
    f.render_widget(
        Paragraph::new("Full Probabilities:").style(Style::default().fg(theme.text)),
        rows[4],
    );

    for (i, (emotion, probability)) in prediction.full_probabilities.iter().enumerate() {
        let gauge = Gauge::default()
            .gauge_style(theme.probability_gauge)
            .ratio((probability / 100.0).clamp(0.0, 1.0))
            .label(format!("{}: {:.2}%", capitalize(emotion), probability));
        f.render_widget(gauge, rows[5 + i]);
    }
}

fn render_path_popup(f: &mut Frame, ctx: &ViewContext, theme: &Theme) {
    let popup = centered_rect(70, 20, f.area());
    let area = Rect { height: popup.height.max(3), ..popup };
    f.render_widget(Clear, area);
    let input = Paragraph::new(format!("{}▏", ctx.path_input))
        .style(Style::default().fg(theme.text))
        .block(
            Block::default()
                .title("Open image")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.focus_border)),
        );
    f.render_widget(input, area);
}
