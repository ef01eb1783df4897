use ratatui::style::{Color, Modifier, Style};

pub struct Theme {
    pub accent: Color,
    pub focus_border: Color,
    pub blurred_border: Color,
    pub text: Color,
    pub text_secondary: Color,

    // Specific components
    pub title: Style,
    pub button_ready: Style,
    pub button_disabled: Style,
    pub file_selected: Style,
    pub emotion: Style,
    pub confidence: Style,
    pub probability_gauge: Style,
    pub error_title: Style,
    pub error_text: Style,
    pub footer: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            accent: Color::Red,
            focus_border: Color::Cyan,
            blurred_border: Color::DarkGray,
            text: Color::White,
            text_secondary: Color::Gray,

            title: Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            button_ready: Style::default().fg(Color::White).bg(Color::Red).add_modifier(Modifier::BOLD),
            button_disabled: Style::default().fg(Color::DarkGray).add_modifier(Modifier::DIM),
            file_selected: Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            emotion: Style::default().fg(Color::LightRed).add_modifier(Modifier::BOLD),
            confidence: Style::default().fg(Color::LightRed),
            probability_gauge: Style::default().fg(Color::Red).bg(Color::Rgb(40, 40, 40)),
            error_title: Style::default().fg(Color::LightRed).add_modifier(Modifier::BOLD),
            error_text: Style::default().fg(Color::Red),
            footer: Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),
        }
    }
}
