//! Telegram adapter (teloxide).
//!
//! Implements the `tx-core` MessagingPort (operator prompts) and
//! ChannelDispatcher (digest delivery) over the Telegram Bot API.

use std::time::Duration;

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, Recipient},
    ApiError, RequestError,
};

use tokio::time::sleep;
use tracing::warn;

pub mod handlers;
pub mod router;

use tx_core::{
    domain::{ChatId, Destination, MessageId, MessageRef},
    errors::{Error, PlatformErrorKind},
    formatting::split_message,
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    ports::ChannelDispatcher,
    Result,
};

/// Telegram's hard limit for one text message.
pub const MAX_MESSAGE_LEN: usize = 4096;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_STEP: Duration = Duration::from_millis(500);

/// Which failures `with_retry` resends a request on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Flood control and network failures. For idempotent or interactive calls.
    FloodAndNetwork,
    /// Flood control only. A dropped connection may already have delivered
    /// the message, so channel posts are never resent on network errors.
    FloodOnly,
}

/// Delay before the next attempt, or `None` when `err` is not retried under `policy`.
pub fn retry_delay(policy: RetryPolicy, err: &RequestError, attempt: u32) -> Option<Duration> {
    match (policy, err) {
        (_, RequestError::RetryAfter(d)) => Some(*d),
        (RetryPolicy::FloodAndNetwork, RequestError::Network(_) | RequestError::Io(_)) => {
            Some(BACKOFF_STEP * attempt)
        }
        _ => None,
    }
}

/// A failed digest chunk. Earlier chunks of the same digest were already posted.
fn delivery_error(
    destination: &Destination,
    index: usize,
    chunks: usize,
    err: impl std::fmt::Display,
) -> Error {
    if index == 0 {
        Error::Delivery(format!("{destination}: {err}"))
    } else {
        Error::Delivery(format!(
            "{destination}: chunk {}/{chunks} failed after {index} delivered: {err}",
            index + 1
        ))
    }
}

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn platform_err(e: RequestError) -> Error {
        let message = format!("telegram error: {e}");
        match classify(&e) {
            PlatformErrorKind::Fatal => Error::platform_fatal(message),
            PlatformErrorKind::Transient => Error::platform_transient(message),
        }
    }

    /// Run `op`, retrying what `policy` allows a bounded number of times.
    async fn with_retry<T, Fut>(
        &self,
        policy: RetryPolicy,
        mut op: impl FnMut() -> Fut,
    ) -> std::result::Result<T, RequestError>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        let mut attempt = 1u32;
        loop {
            let err = match op().await {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };
            if attempt >= MAX_ATTEMPTS {
                return Err(err);
            }
            let Some(wait) = retry_delay(policy, &err, attempt) else {
                return Err(err);
            };
            warn!(attempt, error = %err, "telegram request failed, retrying");
            sleep(wait).await;
            attempt += 1;
        }
    }
}

/// Only a rejected bot token is unrecoverable; everything else is logged and survived.
pub fn classify(e: &RequestError) -> PlatformErrorKind {
    match e {
        RequestError::Api(ApiError::NotFound) => PlatformErrorKind::Fatal,
        _ => PlatformErrorKind::Transient,
    }
}

pub fn recipient(destination: &Destination) -> Recipient {
    match destination {
        Destination::Chat(id) => Recipient::Id(teloxide::types::ChatId(*id)),
        Destination::Channel(name) if name.starts_with('@') => {
            Recipient::ChannelUsername(name.clone())
        }
        Destination::Channel(name) => Recipient::ChannelUsername(format!("@{name}")),
    }
}

fn markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .buttons
        .into_iter()
        .map(|b| vec![InlineKeyboardButton::callback(b.label, b.callback_data)])
        .collect();
    InlineKeyboardMarkup::new(rows)
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_edit: true,
            supports_inline_keyboards: true,
            max_message_len: MAX_MESSAGE_LEN,
        }
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(RetryPolicy::FloodAndNetwork, || {
                self.bot
                    .send_message(Self::tg_chat(chat_id), text.to_string())
            })
            .await
            .map_err(Self::platform_err)?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_text(&self, msg: MessageRef, text: &str) -> Result<()> {
        self.with_retry(RetryPolicy::FloodAndNetwork, || {
            self.bot.edit_message_text(
                Self::tg_chat(msg.chat_id),
                Self::tg_msg_id(msg.message_id),
                text.to_string(),
            )
        })
        .await
        .map_err(Self::platform_err)?;
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        let markup = markup(keyboard);

        let msg = self
            .with_retry(RetryPolicy::FloodAndNetwork, || {
                self.bot
                    .send_message(Self::tg_chat(chat_id), text.to_string())
                    .reply_markup(markup.clone())
            })
            .await
            .map_err(Self::platform_err)?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.with_retry(RetryPolicy::FloodAndNetwork, || {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await
        .map_err(Self::platform_err)?;
        Ok(())
    }
}

#[async_trait]
impl ChannelDispatcher for TelegramMessenger {
    async fn send(&self, destination: &Destination, text: &str) -> Result<()> {
        let to = recipient(destination);
        let chunks = split_message(text, MAX_MESSAGE_LEN);
        let total = chunks.len();
        for (index, chunk) in chunks.into_iter().enumerate() {
            self.with_retry(RetryPolicy::FloodOnly, || {
                self.bot.send_message(to.clone(), chunk.clone())
            })
            .await
            .map_err(|e| {
                if index > 0 {
                    warn!(
                        %destination,
                        chunk = index + 1,
                        total,
                        error = %e,
                        "digest partially delivered"
                    );
                }
                delivery_error(destination, index, total, e)
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_invalid_token_is_fatal() {
        assert_eq!(
            classify(&RequestError::Api(ApiError::NotFound)),
            PlatformErrorKind::Fatal
        );
        assert_eq!(
            classify(&RequestError::Api(ApiError::MessageNotModified)),
            PlatformErrorKind::Transient
        );
        assert_eq!(
            classify(&RequestError::Api(ApiError::BotBlocked)),
            PlatformErrorKind::Transient
        );
    }

    fn io_error() -> RequestError {
        RequestError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        ))
    }

    #[test]
    fn channel_posts_are_not_resent_after_network_failures() {
        assert_eq!(retry_delay(RetryPolicy::FloodOnly, &io_error(), 1), None);
        assert_eq!(
            retry_delay(RetryPolicy::FloodAndNetwork, &io_error(), 2),
            Some(BACKOFF_STEP * 2)
        );
    }

    #[test]
    fn flood_control_is_retried_under_every_policy() {
        let flood = RequestError::RetryAfter(Duration::from_secs(3));
        for policy in [RetryPolicy::FloodOnly, RetryPolicy::FloodAndNetwork] {
            assert_eq!(retry_delay(policy, &flood, 1), Some(Duration::from_secs(3)));
        }
        assert_eq!(
            retry_delay(
                RetryPolicy::FloodAndNetwork,
                &RequestError::Api(ApiError::BotBlocked),
                1
            ),
            None
        );
    }

    #[test]
    fn partial_delivery_names_the_failed_chunk() {
        let dest = Destination::Channel("@team".to_string());

        let first = delivery_error(&dest, 0, 3, "boom");
        assert!(matches!(&first, Error::Delivery(m) if !m.contains("chunk")));

        let later = delivery_error(&dest, 1, 3, "boom");
        match later {
            Error::Delivery(m) => {
                assert!(m.contains("chunk 2/3"), "{m}");
                assert!(m.contains("after 1 delivered"), "{m}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn channel_names_get_an_at_prefix() {
        assert_eq!(
            recipient(&Destination::Channel("texporter_test".to_string())),
            Recipient::ChannelUsername("@texporter_test".to_string())
        );
        assert_eq!(
            recipient(&Destination::Channel("@team".to_string())),
            Recipient::ChannelUsername("@team".to_string())
        );
        assert_eq!(
            recipient(&Destination::Chat(-100)),
            Recipient::Id(teloxide::types::ChatId(-100))
        );
    }

    #[test]
    fn keyboard_has_one_button_per_row() {
        let kb = InlineKeyboard::new(vec![
            tx_core::messaging::types::InlineButton::new("Yes", "ready:yes"),
            tx_core::messaging::types::InlineButton::new("No", "ready:no"),
        ]);
        let m = markup(kb);
        assert_eq!(m.inline_keyboard.len(), 2);
        assert!(m.inline_keyboard.iter().all(|row| row.len() == 1));
    }
}
