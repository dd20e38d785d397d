//! Action types for MVU/Reducer pattern.
//!
//! All state mutations triggered by the user go through `App::update(action)`
//! so transitions are explicit and testable.

/// Actions that can modify application state.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    // ===== Tab Navigation =====
    /// Move to the next tab.
    TabNext,
    /// Move to the previous tab.
    TabPrev,
    /// Set the current tab directly.
    TabSet(AppTab),

    // ===== Calculator Tab =====
    /// Move focus to the next form field.
    FieldNext,
    /// Move focus to the previous form field.
    FieldPrev,
    /// Launch the server named in the server field.
    Connect,
    /// Invoke the tool with the current operands.
    Calculate,
    /// Close the current session.
    Disconnect,

    // ===== Tools Tab =====
    /// Re-run tool discovery.
    ToolsRefresh,
    ToolSelectNext,
    ToolSelectPrev,

    // ===== Log Tab =====
    LogScrollUp,
    LogScrollDown,
    LogScrollTop,
    /// Jump to the newest entry and follow new ones.
    LogScrollBottom,

    // ===== General =====
    /// Clear the current error message.
    ErrorClear,
    /// Request application quit (closes the session first).
    Quit,
}

// =============================================================================
// Application Tabs
// =============================================================================

/// Application tabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppTab {
    Calculator,
    Tools,
    Log,
}

impl AppTab {
    /// Get tab display name.
    pub fn name(&self) -> &'static str {
        match self {
            AppTab::Calculator => "Calculator",
            AppTab::Tools => "Tools",
            AppTab::Log => "Log",
        }
    }

    /// Get all tabs in order.
    pub fn all() -> &'static [AppTab] {
        &[AppTab::Calculator, AppTab::Tools, AppTab::Log]
    }

    pub fn next(self) -> Self {
        match self {
            AppTab::Calculator => AppTab::Tools,
            AppTab::Tools => AppTab::Log,
            AppTab::Log => AppTab::Calculator,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            AppTab::Calculator => AppTab::Log,
            AppTab::Tools => AppTab::Calculator,
            AppTab::Log => AppTab::Tools,
        }
    }
}
