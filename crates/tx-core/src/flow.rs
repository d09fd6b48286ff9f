//! Drives [`ExportSession`](crate::session::ExportSession)s from inbound chat
//! events and performs the side effects their transitions request.

use std::{collections::HashMap, sync::Arc};

use chrono::{Datelike, Local, NaiveDate};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::{
    domain::{ChatId, MessageRef},
    export::Exporter,
    messaging::{
        port::MessagingPort,
        types::{CallbackQuery, IncomingEvent, InlineButton, InlineKeyboard},
    },
    security::is_authorized,
    session::{Action, ExportSelection, MenuChoice, Selection, SessionEvent, SessionStore},
    workdate::{format_date, recent_dates_from, resolve_from, RECENT_DATES},
    Result,
};

pub const MENU_PROMPT: &str = "What would you like to do?";
pub const DATE_PROMPT: &str = "Which day should be exported?";
pub const DONE_MESSAGE: &str = "I'm done";
pub const CANCELLED_MESSAGE: &str = "Export cancelled.";
pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized. Contact the bot owner for access.";

/// Serialises event handling per chat.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: ChatId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(chat_id.0)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct ExportFlow {
    allowed_users: Vec<i64>,
    exporter: Arc<Exporter>,
    messenger: Arc<dyn MessagingPort>,
    sessions: SessionStore,
    chat_locks: ChatLocks,
    today: fn() -> NaiveDate,
}

impl ExportFlow {
    pub fn new(
        allowed_users: Vec<i64>,
        exporter: Arc<Exporter>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            allowed_users,
            exporter,
            messenger,
            sessions: SessionStore::new(),
            chat_locks: ChatLocks::default(),
            today: local_today,
        }
    }

    /// Override the clock used for the date menu.
    pub fn with_today(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handle one inbound event to completion.
    ///
    /// A confirmed export runs inside this call, so the next event of the same
    /// chat waits for it. Errors are platform failures from prompts; the
    /// caller decides from `Error::is_fatal` whether to stop.
    pub async fn handle(&self, event: IncomingEvent) -> Result<()> {
        let chat_id = event.chat_id();

        if !is_authorized(Some(event.user_id()), &self.allowed_users) {
            warn!(chat_id = chat_id.0, user_id = event.user_id().0, "unauthorized user");
            return match event {
                IncomingEvent::Text(_) => self
                    .messenger
                    .send_text(chat_id, UNAUTHORIZED_MESSAGE)
                    .await
                    .map(|_| ()),
                IncomingEvent::Callback(q) => {
                    self.messenger
                        .answer_callback_query(&q.callback_id, Some("Unauthorized"))
                        .await
                }
            };
        }

        let _guard = self.chat_locks.lock_chat(chat_id).await;

        match event {
            IncomingEvent::Text(_) => {
                let action = self.sessions.apply(chat_id, SessionEvent::Text).await;
                self.perform(chat_id, action).await
            }
            IncomingEvent::Callback(q) => self.handle_callback(q).await,
        }
    }

    async fn handle_callback(&self, q: CallbackQuery) -> Result<()> {
        let Some(selection) = Selection::parse(&q.data) else {
            debug!(data = %q.data, "ignoring unknown callback data");
            return self.ack(&q, None).await;
        };

        let action = self
            .sessions
            .apply(q.chat_id, SessionEvent::Selection(selection))
            .await;

        match action {
            Action::Stale => self.ack(&q, Some("This menu has expired")).await,
            Action::NotImplemented(MenuChoice::Notify) => {
                self.ack(&q, Some("Reminders are not implemented yet")).await
            }
            other => {
                self.ack(&q, None).await?;
                if let Some(msg) = q.message {
                    self.mark_selected(msg, selection).await?;
                }
                self.perform(q.chat_id, other).await
            }
        }
    }

    async fn perform(&self, chat_id: ChatId, action: Action) -> Result<()> {
        match action {
            Action::PresentMenu => {
                self.messenger
                    .send_inline_keyboard(chat_id, MENU_PROMPT, menu_keyboard())
                    .await?;
            }
            Action::PresentDates { is_test } => {
                let mut prompt = DATE_PROMPT.to_string();
                if is_test {
                    prompt.push_str(" (test channels)");
                }
                self.messenger
                    .send_inline_keyboard(chat_id, &prompt, date_keyboard((self.today)()))
                    .await?;
            }
            Action::PresentConfirmation(selection) => {
                let text =
                    confirmation_text(&self.exporter.exported_project_names(), &selection);
                self.messenger
                    .send_inline_keyboard(chat_id, &text, confirm_keyboard())
                    .await?;
            }
            Action::RunExport(selection) => {
                info!(
                    chat_id = chat_id.0,
                    date = %format_date(selection.target_date),
                    is_test = selection.is_test,
                    "export confirmed"
                );
                self.exporter
                    .run(selection.target_date, selection.is_test)
                    .await;
                self.messenger.send_text(chat_id, DONE_MESSAGE).await?;
            }
            Action::Cancelled => {
                info!(chat_id = chat_id.0, "export cancelled");
                self.messenger.send_text(chat_id, CANCELLED_MESSAGE).await?;
            }
            Action::NotImplemented(_) | Action::Stale => {}
        }
        Ok(())
    }

    /// Acknowledge a button press. Non-fatal failures only cost the spinner.
    async fn ack(&self, q: &CallbackQuery, text: Option<&str>) -> Result<()> {
        best_effort(
            self.messenger
                .answer_callback_query(&q.callback_id, text)
                .await,
            "answer callback",
        )
    }

    /// Replace the keyboard message with the chosen option.
    async fn mark_selected(&self, msg: MessageRef, selection: Selection) -> Result<()> {
        if !self.messenger.capabilities().supports_edit {
            return Ok(());
        }
        let label = selection_label(selection);
        best_effort(
            self.messenger.edit_text(msg, &format!("✓ {label}")).await,
            "edit keyboard message",
        )
    }
}

fn best_effort(res: Result<()>, what: &str) -> Result<()> {
    match res {
        Ok(()) => Ok(()),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(error = %e, "{what} failed");
            Ok(())
        }
    }
}

fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn menu_keyboard() -> InlineKeyboard {
    InlineKeyboard::new(vec![
        InlineButton::new("Export", Selection::Menu(MenuChoice::Export).callback_data()),
        InlineButton::new(
            "Export (test channels)",
            Selection::Menu(MenuChoice::ExportTest).callback_data(),
        ),
        InlineButton::new("Notify", Selection::Menu(MenuChoice::Notify).callback_data()),
    ])
}

/// The preceding calendar days, newest first. The previous working day is starred.
pub fn date_keyboard(today: NaiveDate) -> InlineKeyboard {
    let working_day = resolve_from(today, 0);
    let buttons = recent_dates_from(today, RECENT_DATES)
        .into_iter()
        .map(|d| {
            let mut label = format!("{} {}", format_date(d), d.weekday());
            if d == working_day {
                label.push_str(" ★");
            }
            InlineButton::new(label, Selection::Date(d).callback_data())
        })
        .collect();
    InlineKeyboard::new(buttons)
}

pub fn confirm_keyboard() -> InlineKeyboard {
    InlineKeyboard::new(vec![
        InlineButton::new("Yes", Selection::Confirm(true).callback_data()),
        InlineButton::new("No", Selection::Confirm(false).callback_data()),
    ])
}

pub fn confirmation_text(project_names: &[String], selection: &ExportSelection) -> String {
    let projects = if project_names.is_empty() {
        "no projects are enabled for export".to_string()
    } else {
        project_names.join(", ")
    };
    let target = if selection.is_test {
        "test channels"
    } else {
        "production channels"
    };
    format!(
        "Export {} to {target}?\nProjects: {projects}",
        format_date(selection.target_date)
    )
}

fn selection_label(selection: Selection) -> String {
    match selection {
        Selection::Menu(MenuChoice::Export) => "Export".to_string(),
        Selection::Menu(MenuChoice::ExportTest) => "Export (test channels)".to_string(),
        Selection::Menu(MenuChoice::Notify) => "Notify".to_string(),
        Selection::Date(d) => format_date(d),
        Selection::Confirm(true) => "Yes".to_string(),
        Selection::Confirm(false) => "No".to_string(),
    }
}
