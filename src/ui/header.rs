//! Header bar with tab navigation and connection status.

use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Tabs};

use crate::app::{App, AppTab};

pub fn render(frame: &mut Frame, app: &App, area: Rect) {
    let tab_titles: Vec<Line> = AppTab::all()
        .iter()
        .enumerate()
        .map(|(i, tab)| {
            let num = i + 1;
            let style = if *tab == app.current_tab {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            Line::from(format!(" {} {} ", num, tab.name())).style(style)
        })
        .collect();

    let selected = AppTab::all()
        .iter()
        .position(|t| *t == app.current_tab)
        .unwrap_or(0);

    let status = match &app.server_label {
        Some(server) if app.connection.is_connected() => {
            format!(" {} - {} ", app.connection.label(), server)
        }
        _ => format!(" {} ", app.connection.label()),
    };

    let tabs = Tabs::new(tab_titles)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" mcpcalc ")
                .title_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
                .title(
                    Line::from(status)
                        .style(Style::default().fg(app.connection.color()))
                        .right_aligned(),
                ),
        )
        .select(selected)
        .style(Style::default().fg(Color::White))
        .highlight_style(Style::default().fg(Color::Yellow))
        .divider(symbols::line::VERTICAL);

    frame.render_widget(tabs, area);
}
