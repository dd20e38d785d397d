//! Footer bar with keybindings, or the current error when there is one.

use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::app::{App, AppTab};

pub fn render(frame: &mut Frame, app: &App, area: Rect) {
    if let Some(error) = &app.last_error {
        let paragraph = Paragraph::new(Line::from(vec![
            Span::styled(
                " Error ",
                Style::default().bg(Color::Red).fg(Color::White),
            ),
            Span::raw(" "),
            Span::styled(error.as_str(), Style::default().fg(Color::Red)),
        ]))
        .block(Block::default().borders(Borders::ALL));
        frame.render_widget(paragraph, area);
        return;
    }

    let keybindings = match app.current_tab {
        AppTab::Calculator => {
            vec![
                ("Up/Down", "Field"),
                ("Enter", "Connect/Calculate"),
                ("Ctrl+D", "Disconnect"),
                ("Tab", "Next Tab"),
                ("Ctrl+Q", "Quit"),
            ]
        }
        AppTab::Tools => {
            vec![
                ("j/k", "Select"),
                ("Ctrl+L", "Refresh"),
                ("Tab", "Next Tab"),
                ("Ctrl+Q", "Quit"),
            ]
        }
        AppTab::Log => {
            vec![
                ("j/k", "Scroll"),
                ("Home/End", "Top/Follow"),
                ("Tab", "Next Tab"),
                ("Ctrl+Q", "Quit"),
            ]
        }
    };

    let spans: Vec<Span> = keybindings
        .iter()
        .flat_map(|(key, action)| {
            vec![
                Span::styled(
                    format!(" {} ", key),
                    Style::default().bg(Color::DarkGray).fg(Color::White),
                ),
                Span::raw(format!(" {} ", action)),
                Span::raw(" "),
            ]
        })
        .collect();

    let paragraph = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL))
        .alignment(Alignment::Left);

    frame.render_widget(paragraph, area);
}
