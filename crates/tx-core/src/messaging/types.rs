use crate::domain::{ChatId, MessageRef, UserId};

/// Messenger-agnostic inbound event for the export flow.
#[derive(Clone, Debug)]
pub enum IncomingEvent {
    Text(TextMessage),
    Callback(CallbackQuery),
}

impl IncomingEvent {
    pub fn chat_id(&self) -> ChatId {
        match self {
            IncomingEvent::Text(m) => m.chat_id,
            IncomingEvent::Callback(q) => q.chat_id,
        }
    }

    pub fn user_id(&self) -> UserId {
        match self {
            IncomingEvent::Text(m) => m.user_id,
            IncomingEvent::Callback(q) => q.user_id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TextMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
    pub text: String,
}

#[derive(Clone, Debug)]
pub struct CallbackQuery {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
    pub callback_id: String,
    pub data: String,
    pub message: Option<MessageRef>,
}

/// Inline keyboard (buttons) used for menu, date and confirmation prompts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

impl InlineKeyboard {
    /// One button per row.
    pub fn new(buttons: Vec<InlineButton>) -> Self {
        Self { buttons }
    }

    pub fn label_for(&self, callback_data: &str) -> Option<&str> {
        self.buttons
            .iter()
            .find(|b| b.callback_data == callback_data)
            .map(|b| b.label.as_str())
    }
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_edit: bool,
    pub supports_inline_keyboards: bool,
    pub max_message_len: usize,
}
