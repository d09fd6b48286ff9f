//! Telegram update handlers.
//!
//! Each handler converts a teloxide update into a messenger-agnostic
//! `IncomingEvent` and hands it to the core export flow. Fatal platform
//! errors trip the shutdown token; everything else is logged.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};
use tracing::{debug, error, warn};

use tx_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    messaging::types::{self, IncomingEvent, TextMessage},
};

use crate::router::AppState;

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(event) = text_event(&msg) else {
        debug!(chat_id = msg.chat.id.0, "ignoring non-text message");
        return Ok(());
    };
    dispatch(event, &state).await;
    Ok(())
}

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let Some(event) = callback_event(&q) else {
        // Always answer callback queries, even ones we cannot route.
        let _ = bot.answer_callback_query(q.id).await;
        return Ok(());
    };
    dispatch(event, &state).await;
    Ok(())
}

async fn dispatch(event: IncomingEvent, state: &AppState) {
    let chat_id = event.chat_id().0;
    match state.flow.handle(event).await {
        Ok(()) => {}
        Err(e) if e.is_fatal() => {
            error!(chat_id, error = %e, "fatal platform error, shutting down");
            state.fatal.cancel();
        }
        Err(e) => warn!(chat_id, error = %e, "event handling failed"),
    }
}

fn text_event(msg: &Message) -> Option<IncomingEvent> {
    let user = msg.from()?;
    let text = msg.text()?;
    Some(IncomingEvent::Text(TextMessage {
        chat_id: ChatId(msg.chat.id.0),
        user_id: UserId(user.id.0 as i64),
        username: user.username.clone(),
        text: text.to_string(),
    }))
}

fn callback_event(q: &CallbackQuery) -> Option<IncomingEvent> {
    let msg = q.message.as_ref()?;
    let data = q.data.clone().filter(|d| !d.is_empty())?;
    let chat_id = ChatId(msg.chat.id.0);
    Some(IncomingEvent::Callback(types::CallbackQuery {
        chat_id,
        user_id: UserId(q.from.id.0 as i64),
        username: q.from.username.clone(),
        callback_id: q.id.clone(),
        data,
        message: Some(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        }),
    }))
}
