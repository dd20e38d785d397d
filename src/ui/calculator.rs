//! Calculator form and result panel.

use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::app::{App, CalculatorField};
use crate::models::ToolResult;

pub fn render(frame: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Server
            Constraint::Length(3), // Tool
            Constraint::Length(3), // a / b
            Constraint::Min(4),    // Result
        ])
        .split(area);

    let operands = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[2]);

    render_field(frame, app, CalculatorField::Server, chunks[0]);
    render_field(frame, app, CalculatorField::Tool, chunks[1]);
    render_field(frame, app, CalculatorField::OperandA, operands[0]);
    render_field(frame, app, CalculatorField::OperandB, operands[1]);

    render_result(frame, app, chunks[3]);
}

fn render_field(frame: &mut Frame, app: &App, field: CalculatorField, area: Rect) {
    let focused = app.form.focused == field;
    let border_style = if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::DarkGray)
    };

    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" {} ", field.label()))
        .border_style(border_style);
    let inner = block.inner(area);
    frame.render_widget(block, area);
    frame.render_widget(app.form.field(field), inner);
}

fn render_result(frame: &mut Frame, app: &App, area: Rect) {
    let mut lines = Vec::new();

    match &app.displayed {
        None => lines.push(Line::from(Span::styled(
            "No result yet. Connect, enter two numbers and press Enter.",
            Style::default().fg(Color::DarkGray),
        ))),
        Some(displayed) => {
            lines.push(Line::from(Span::styled(
                format!("#{} {}", displayed.seq, displayed.label),
                Style::default().fg(Color::DarkGray),
            )));
            let (text, style) = match &displayed.outcome {
                Ok(ToolResult::Content(text)) => (
                    text.clone(),
                    Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
                ),
                Ok(ToolResult::Error(text)) => (text.clone(), Style::default().fg(Color::Yellow)),
                Err(message) => (message.clone(), Style::default().fg(Color::Red)),
            };
            lines.push(Line::from(Span::styled(text, style)));
        }
    }

    let in_flight = app.calls_in_flight();
    if in_flight > 0 {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("{} call(s) in flight...", in_flight),
            Style::default().fg(Color::Yellow),
        )));
    }

    let paragraph = Paragraph::new(Text::from(lines)).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Result ")
            .title_style(Style::default().fg(Color::Cyan)),
    );
    frame.render_widget(paragraph, area);
}
