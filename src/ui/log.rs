//! Activity log viewer.

use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::app::App;

/// Calculate the maximum scroll offset to prevent overscroll.
pub fn max_scroll(total_lines: usize, visible_height: usize) -> usize {
    total_lines.saturating_sub(visible_height)
}

pub fn render(frame: &mut Frame, app: &App, area: Rect) {
    // Area height minus 2 for borders
    let visible_height = area.height.saturating_sub(2) as usize;
    let total_lines = app.log_lines.len();
    let max = max_scroll(total_lines, visible_height);

    let scroll = if app.log_follow {
        max
    } else {
        app.log_scroll.min(max)
    };

    let lines: Vec<Line> = if app.log_lines.is_empty() {
        vec![Line::from("No activity yet...")]
    } else {
        // Only render lines visible in the viewport
        let end = (scroll + visible_height).min(total_lines);
        app.log_lines[scroll..end]
            .iter()
            .map(|line| {
                let style = if line.contains("error:") {
                    Style::default().fg(Color::Red)
                } else if line.contains("result ignored") {
                    Style::default().fg(Color::DarkGray)
                } else {
                    Style::default()
                };
                Line::from(Span::styled(line.as_str(), style))
            })
            .collect()
    };

    let follow = if app.log_follow { " [follow]" } else { "" };
    let title = format!(" Log ({}/{}){} ", scroll + 1, total_lines.max(1), follow);

    let paragraph = Paragraph::new(Text::from(lines)).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .title_style(Style::default().fg(Color::Cyan)),
    );

    frame.render_widget(paragraph, area);
}
