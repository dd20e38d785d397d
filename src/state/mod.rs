//! State management module.
//!
//! Types related to application state: the MVU action types, tab
//! definitions, the connection state machine and the calculator form.

use ratatui::style::{Color, Style};
use tui_textarea::TextArea;

pub mod actions;

pub use actions::*;

// =============================================================================
// Connection State Machine
// =============================================================================

/// Lifecycle of the session as seen by the UI.
///
/// ```text
/// Disconnected -> Connecting -> Connected <-> Calling
///                     |             |
///                     v             v
///               Disconnected     Closing -> Closed / Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// At least one tool call is in flight.
    Calling,
    Closing,
    /// Terminal state reached on quit.
    Closed,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Connected => "Connected",
            ConnectionState::Calling => "Calling...",
            ConnectionState::Closing => "Closing...",
            ConnectionState::Closed => "Closed",
        }
    }

    pub fn color(&self) -> Color {
        match self {
            ConnectionState::Connected => Color::Green,
            ConnectionState::Calling | ConnectionState::Connecting => Color::Yellow,
            ConnectionState::Closing => Color::Magenta,
            ConnectionState::Disconnected | ConnectionState::Closed => Color::DarkGray,
        }
    }

    /// Whether tool calls can be issued.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Calling)
    }
}

// =============================================================================
// Calculator Form
// =============================================================================

/// Fields of the calculator form, in focus order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalculatorField {
    Server,
    Tool,
    OperandA,
    OperandB,
}

impl CalculatorField {
    pub fn all() -> &'static [CalculatorField] {
        &[
            CalculatorField::Server,
            CalculatorField::Tool,
            CalculatorField::OperandA,
            CalculatorField::OperandB,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            CalculatorField::Server => "Server",
            CalculatorField::Tool => "Tool",
            CalculatorField::OperandA => "a",
            CalculatorField::OperandB => "b",
        }
    }

    pub fn next(self) -> Self {
        match self {
            CalculatorField::Server => CalculatorField::Tool,
            CalculatorField::Tool => CalculatorField::OperandA,
            CalculatorField::OperandA => CalculatorField::OperandB,
            CalculatorField::OperandB => CalculatorField::Server,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            CalculatorField::Server => CalculatorField::OperandB,
            CalculatorField::Tool => CalculatorField::Server,
            CalculatorField::OperandA => CalculatorField::Tool,
            CalculatorField::OperandB => CalculatorField::OperandA,
        }
    }
}

/// Single-line inputs for the calculator tab.
#[derive(Debug)]
pub struct CalculatorForm<'a> {
    pub focused: CalculatorField,
    pub server: TextArea<'a>,
    pub tool: TextArea<'a>,
    pub a: TextArea<'a>,
    pub b: TextArea<'a>,
}

impl<'a> Default for CalculatorForm<'a> {
    fn default() -> Self {
        let mut server = TextArea::default();
        server.set_placeholder_text("path/to/server.py, server.js or an executable");

        let mut tool = TextArea::from(["add"]);
        tool.move_cursor(tui_textarea::CursorMove::End);

        let mut a = TextArea::default();
        a.set_placeholder_text("number");
        let mut b = TextArea::default();
        b.set_placeholder_text("number");

        let mut form = Self {
            focused: CalculatorField::Server,
            server,
            tool,
            a,
            b,
        };
        form.refresh_cursor_styles();
        form
    }
}

impl<'a> CalculatorForm<'a> {
    pub fn field(&self, field: CalculatorField) -> &TextArea<'a> {
        match field {
            CalculatorField::Server => &self.server,
            CalculatorField::Tool => &self.tool,
            CalculatorField::OperandA => &self.a,
            CalculatorField::OperandB => &self.b,
        }
    }

    pub fn focused_mut(&mut self) -> &mut TextArea<'a> {
        match self.focused {
            CalculatorField::Server => &mut self.server,
            CalculatorField::Tool => &mut self.tool,
            CalculatorField::OperandA => &mut self.a,
            CalculatorField::OperandB => &mut self.b,
        }
    }

    /// Trimmed text of a field.
    pub fn value(&self, field: CalculatorField) -> String {
        self.field(field).lines().join("").trim().to_string()
    }

    /// Replace a field's content.
    pub fn set_value(&mut self, field: CalculatorField, value: &str) {
        let mut area = TextArea::from([value]);
        area.move_cursor(tui_textarea::CursorMove::End);
        let placeholder = self.field(field).placeholder_text().to_string();
        if !placeholder.is_empty() {
            area.set_placeholder_text(placeholder);
        }
        match field {
            CalculatorField::Server => self.server = area,
            CalculatorField::Tool => self.tool = area,
            CalculatorField::OperandA => self.a = area,
            CalculatorField::OperandB => self.b = area,
        }
        self.refresh_cursor_styles();
    }

    pub fn focus_next(&mut self) {
        self.focused = self.focused.next();
        self.refresh_cursor_styles();
    }

    pub fn focus_prev(&mut self) {
        self.focused = self.focused.prev();
        self.refresh_cursor_styles();
    }

    /// Only the focused field shows a cursor.
    fn refresh_cursor_styles(&mut self) {
        let focused = self.focused;
        for &field in CalculatorField::all() {
            let style = if field == focused {
                Style::default().bg(Color::White).fg(Color::Black)
            } else {
                Style::default()
            };
            let area = match field {
                CalculatorField::Server => &mut self.server,
                CalculatorField::Tool => &mut self.tool,
                CalculatorField::OperandA => &mut self.a,
                CalculatorField::OperandB => &mut self.b,
            };
            area.set_cursor_style(style);
            area.set_cursor_line_style(Style::default());
        }
    }
}
