//! Discovered tools table.

use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState, Wrap};
use unicode_truncate::UnicodeTruncateStr;

use crate::app::App;

const NAME_WIDTH: u16 = 16;
const ARGS_WIDTH: u16 = 16;

pub fn render(frame: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(8)])
        .split(area);

    let header = Row::new(vec![
        Cell::from("Name").style(Style::default().fg(Color::Yellow)),
        Cell::from("Arguments").style(Style::default().fg(Color::Yellow)),
        Cell::from("Description").style(Style::default().fg(Color::Yellow)),
    ])
    .height(1)
    .bottom_margin(1);

    // Borders, column spacing and the fixed columns.
    let description_width = chunks[0]
        .width
        .saturating_sub(NAME_WIDTH + ARGS_WIDTH + 4) as usize;

    let rows: Vec<Row> = app
        .tools
        .iter()
        .map(|tool| {
            let (description, _) = tool.description.unicode_truncate(description_width);
            Row::new(vec![
                Cell::from(tool.name.clone()),
                Cell::from(tool.argument_names().join(", ")),
                Cell::from(description.to_string()),
            ])
        })
        .collect();

    let title = if app.tools.is_empty() {
        " Tools (connect to discover) ".to_string()
    } else {
        format!(" Tools ({}) ", app.tools.len())
    };

    let table = Table::new(
        rows,
        [
            Constraint::Length(NAME_WIDTH),
            Constraint::Length(ARGS_WIDTH),
            Constraint::Min(10),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .title_style(Style::default().fg(Color::Cyan)),
    )
    .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut state = TableState::default();
    if !app.tools.is_empty() {
        state.select(Some(app.tools_selected));
    }
    frame.render_stateful_widget(table, chunks[0], &mut state);

    // Schema of the selected tool
    let schema = app
        .tools
        .get(app.tools_selected)
        .map(|tool| {
            serde_json::to_string_pretty(&tool.input_schema)
                .unwrap_or_else(|_| tool.input_schema.to_string())
        })
        .unwrap_or_default();

    let paragraph = Paragraph::new(schema)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Input Schema ")
                .title_style(Style::default().fg(Color::Cyan)),
        );
    frame.render_widget(paragraph, chunks[1]);
}
