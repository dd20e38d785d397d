//! UI rendering module.
//!
//! This module contains all the rendering logic for the TUI.

mod calculator;
mod footer;
mod header;
mod log;
mod tools;

use ratatui::prelude::*;

use crate::app::{App, AppTab};

/// Main render function - called every frame.
pub fn render(frame: &mut Frame, app: &App) {
    // Main layout: Header, Content, Footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Content
            Constraint::Length(3), // Footer
        ])
        .split(frame.area());

    header::render(frame, app, chunks[0]);

    match app.current_tab {
        AppTab::Calculator => calculator::render(frame, app, chunks[1]),
        AppTab::Tools => tools::render(frame, app, chunks[1]),
        AppTab::Log => log::render(frame, app, chunks[1]),
    }

    footer::render(frame, app, chunks[2]);
}
