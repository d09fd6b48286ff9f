//! Per-chat export conversation: menu -> date -> confirmation.
//!
//! The state machine itself is pure: [`ExportSession::apply`] consumes an event
//! and returns the [`Action`] the caller must perform. Side effects (prompts,
//! the export run) live in `flow`.

use std::collections::HashMap;

use chrono::NaiveDate;
use tokio::sync::Mutex;

use crate::{
    domain::ChatId,
    workdate::{format_date, parse_date},
};

/// Top-level menu entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MenuChoice {
    Export,
    /// Same as `Export`, delivered to the projects' test channels.
    ExportTest,
    /// Reminder broadcast. Offered in the menu but has no behaviour.
    Notify,
}

impl MenuChoice {
    fn as_str(self) -> &'static str {
        match self {
            MenuChoice::Export => "export",
            MenuChoice::ExportTest => "export_test",
            MenuChoice::Notify => "notify",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "export" => Some(MenuChoice::Export),
            "export_test" => Some(MenuChoice::ExportTest),
            "notify" => Some(MenuChoice::Notify),
            _ => None,
        }
    }
}

/// What the operator asked for. Only acted upon once confirmed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportSelection {
    pub menu_choice: MenuChoice,
    pub target_date: NaiveDate,
    pub is_test: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    /// `type`
    AwaitingMenuChoice,
    /// `date`
    AwaitingDate {
        menu_choice: MenuChoice,
        is_test: bool,
    },
    /// `ready`
    AwaitingConfirmation(ExportSelection),
}

/// A button press, decoded from callback data (`type:..`, `date:..`, `ready:..`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    Menu(MenuChoice),
    Date(NaiveDate),
    Confirm(bool),
}

impl Selection {
    pub fn parse(data: &str) -> Option<Self> {
        let (kind, value) = data.split_once(':')?;
        match kind {
            "type" => MenuChoice::parse(value).map(Selection::Menu),
            "date" => parse_date(value).map(Selection::Date),
            "ready" => match value {
                "yes" => Some(Selection::Confirm(true)),
                "no" => Some(Selection::Confirm(false)),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn callback_data(&self) -> String {
        match self {
            Selection::Menu(c) => format!("type:{}", c.as_str()),
            Selection::Date(d) => format!("date:{}", format_date(*d)),
            Selection::Confirm(true) => "ready:yes".to_string(),
            Selection::Confirm(false) => "ready:no".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Any inbound text message.
    Text,
    Selection(Selection),
}

/// Side effect requested by a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    PresentMenu,
    PresentDates { is_test: bool },
    PresentConfirmation(ExportSelection),
    RunExport(ExportSelection),
    Cancelled,
    NotImplemented(MenuChoice),
    /// The button does not belong to the current step.
    Stale,
}

#[derive(Clone, Debug, Default)]
pub struct ExportSession {
    state: SessionState,
}

impl ExportSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == SessionState::Idle
    }

    pub fn apply(&mut self, event: SessionEvent) -> Action {
        let sel = match event {
            // Text always (re)starts the conversation.
            SessionEvent::Text => {
                self.state = SessionState::AwaitingMenuChoice;
                return Action::PresentMenu;
            }
            SessionEvent::Selection(sel) => sel,
        };

        match (self.state, sel) {
            (SessionState::AwaitingMenuChoice, Selection::Menu(MenuChoice::Notify)) => {
                Action::NotImplemented(MenuChoice::Notify)
            }
            (SessionState::AwaitingMenuChoice, Selection::Menu(choice)) => {
                let is_test = choice == MenuChoice::ExportTest;
                self.state = SessionState::AwaitingDate {
                    menu_choice: choice,
                    is_test,
                };
                Action::PresentDates { is_test }
            }
            (
                SessionState::AwaitingDate {
                    menu_choice,
                    is_test,
                },
                Selection::Date(target_date),
            ) => {
                let selection = ExportSelection {
                    menu_choice,
                    target_date,
                    is_test,
                };
                self.state = SessionState::AwaitingConfirmation(selection);
                Action::PresentConfirmation(selection)
            }
            (SessionState::AwaitingConfirmation(selection), Selection::Confirm(yes)) => {
                self.state = SessionState::Idle;
                if yes {
                    Action::RunExport(selection)
                } else {
                    Action::Cancelled
                }
            }
            _ => Action::Stale,
        }
    }
}

/// Export sessions keyed by chat.
///
/// Idle sessions are dropped so the map only holds conversations in progress.
#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<HashMap<ChatId, ExportSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn apply(&self, chat_id: ChatId, event: SessionEvent) -> Action {
        let mut map = self.inner.lock().await;
        let session = map.entry(chat_id).or_default();
        let action = session.apply(event);
        if session.is_idle() {
            map.remove(&chat_id);
        }
        action
    }

    pub async fn state(&self, chat_id: ChatId) -> SessionState {
        let map = self.inner.lock().await;
        map.get(&chat_id).map(|s| s.state()).unwrap_or_default()
    }

    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.len()
    }
}
