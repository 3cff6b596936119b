use std::{collections::VecDeque, time::Duration};

use {
    async_trait::async_trait,
    secrecy::ExposeSecret,
    teloxide::{
        prelude::*,
        types::{AllowedUpdate, MessageId, UpdateKind},
    },
    tracing::{debug, info, warn},
};

use {
    botpanel_channels::{
        ButtonClick, Connection, Connector, Error, InboundEvent, InboundMessage, Result,
    },
    botpanel_common::{BotConfig, BotId},
    botpanel_config::TelegramConfig,
};

use crate::{error::classify, token::is_valid_token_format};

/// Build a Bot API client for `token`.
///
/// `timeout` must exceed the long-poll timeout or the HTTP client aborts
/// `getUpdates` before Telegram answers.
pub(crate) fn build_bot(token: &str, config: &TelegramConfig, timeout: Duration) -> Result<Bot> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::fatal(format!("failed to build http client: {e}")))?;
    let bot = Bot::with_client(token, client);
    match &config.api_url {
        Some(url) => {
            let url = reqwest::Url::parse(url)
                .map_err(|e| Error::fatal(format!("invalid telegram api_url {url}: {e}")))?;
            Ok(bot.set_api_url(url))
        },
        None => Ok(bot),
    }
}

/// Opens long-polling connections to the Telegram Bot API.
#[derive(Debug, Clone, Default)]
pub struct TelegramConnector {
    config: TelegramConfig,
}

impl TelegramConnector {
    pub fn new(config: TelegramConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for TelegramConnector {
    async fn connect(&self, bot: &BotConfig) -> Result<Box<dyn Connection>> {
        let token = bot.token.expose_secret();
        if !is_valid_token_format(token) {
            return Err(Error::credential("malformed bot token"));
        }

        let client = build_bot(
            token.trim(),
            &self.config,
            Duration::from_secs(self.config.client_timeout_secs),
        )?;

        // Verify credentials and get bot username.
        let me = client.get_me().await.map_err(classify)?;

        // Polling fails while a webhook is set. Updates queued while the bot
        // was offline are discarded.
        client
            .delete_webhook()
            .drop_pending_updates(true)
            .await
            .map_err(classify)?;

        info!(
            bot_id = %bot.id,
            username = ?me.username,
            "telegram bot connected (webhook cleared)"
        );

        Ok(Box::new(TelegramConnection::new(
            client,
            bot.id,
            self.config.poll_timeout_secs,
        )))
    }
}

/// A polling session for one bot.
///
/// Updates from one `getUpdates` batch are buffered and handed out one at a
/// time. The fetch offset only moves after a batch has been received in full,
/// so dropping `receive_next` mid-request loses nothing.
pub struct TelegramConnection {
    bot: Bot,
    bot_id: BotId,
    poll_timeout: u32,
    fetch_offset: i32,
    handed_offset: Option<i32>,
    pending: VecDeque<(i32, Option<InboundEvent>)>,
}

impl TelegramConnection {
    pub fn new(bot: Bot, bot_id: BotId, poll_timeout: u32) -> Self {
        Self {
            bot,
            bot_id,
            poll_timeout,
            fetch_offset: 0,
            handed_offset: None,
            pending: VecDeque::new(),
        }
    }

    async fn fetch(&mut self) -> Result<()> {
        let updates = self
            .bot
            .get_updates()
            .offset(self.fetch_offset)
            .timeout(self.poll_timeout)
            .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery])
            .await
            .map_err(classify)?;

        debug!(bot_id = %self.bot_id, count = updates.len(), "got telegram updates");
        for update in updates {
            let offset = update.id.as_offset();
            self.fetch_offset = offset;
            self.pending.push_back((offset, to_event(update)));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for TelegramConnection {
    fn bot_id(&self) -> BotId {
        self.bot_id
    }

    async fn receive_next(&mut self) -> Result<InboundEvent> {
        loop {
            while let Some((offset, event)) = self.pending.pop_front() {
                self.handed_offset = Some(offset);
                if let Some(event) = event {
                    return Ok(event);
                }
            }
            self.fetch().await?;
        }
    }

    async fn send(&mut self, chat_id: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(chat_id), text)
            .await
            .map(|_| ())
            .map_err(Error::send)
    }

    async fn edit_last_with_text(&mut self, click: &ButtonClick, text: &str) -> Result<()> {
        if let Err(e) = self
            .bot
            .answer_callback_query(click.callback_id.clone())
            .await
        {
            debug!(bot_id = %self.bot_id, error = %e, "failed to answer callback query");
        }

        match (click.chat_id, click.message_id) {
            (Some(chat_id), Some(message_id)) => self
                .bot
                .edit_message_text(ChatId(chat_id), MessageId(message_id), text)
                .await
                .map(|_| ())
                .map_err(Error::send),
            (Some(chat_id), None) => self.send(chat_id, text).await,
            (None, _) => Err(Error::send("button click carries no chat to reply into")),
        }
    }

    async fn close(&mut self) {
        // Confirm handed-out updates so a restart does not replay them.
        let Some(offset) = self.handed_offset else {
            return;
        };
        if let Err(e) = self
            .bot
            .get_updates()
            .offset(offset)
            .timeout(0)
            .limit(1)
            .await
        {
            warn!(bot_id = %self.bot_id, error = %e, "failed to confirm telegram updates on close");
        }
    }
}

/// Translate a Bot API update into an inbound event.
///
/// Non-text messages and bot commands are ignored.
pub(crate) fn to_event(update: Update) -> Option<InboundEvent> {
    match update.kind {
        UpdateKind::Message(msg) => {
            let text = msg.text()?;
            if text.starts_with('/') {
                debug!(chat_id = msg.chat.id.0, "ignoring bot command");
                return None;
            }
            Some(InboundEvent::Message(InboundMessage {
                chat_id: msg.chat.id.0,
                text: text.to_string(),
                username: msg.chat.username().map(str::to_string),
            }))
        },
        UpdateKind::CallbackQuery(query) => {
            let data = query.data?;
            Some(InboundEvent::ButtonClick(ButtonClick {
                callback_id: query.id.to_string(),
                data,
                chat_id: query.message.as_ref().map(|m| m.chat().id.0),
                message_id: query.message.as_ref().map(|m| m.id().0),
            }))
        },
        other => {
            debug!("ignoring non-message update: {other:?}");
            None
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::{Arc, Mutex},
    };

    use {
        axum::{Json, Router, body::Bytes, extract::State, http::Uri, routing::post},
        secrecy::Secret,
        serde_json::{Value, json},
        tokio::sync::oneshot,
    };

    fn chat() -> Value {
        json!({ "id": 42, "type": "private", "first_name": "Alice", "username": "alice" })
    }

    fn text_update(update_id: i32, text: &str) -> Value {
        json!({
            "update_id": update_id,
            "message": {
                "message_id": update_id,
                "date": 1,
                "chat": chat(),
                "from": { "id": 1001, "is_bot": false, "first_name": "Alice", "username": "alice" },
                "text": text
            }
        })
    }

    fn click_update(update_id: i32, data: &str) -> Value {
        json!({
            "update_id": update_id,
            "callback_query": {
                "id": "cb-1",
                "from": { "id": 1001, "is_bot": false, "first_name": "Alice" },
                "chat_instance": "ci",
                "data": data,
                "message": { "message_id": 7, "date": 1, "chat": chat(), "text": "menu" }
            }
        })
    }

    fn parse(value: Value) -> Update {
        // teloxide's `Update` deserializer only works from a string source.
        serde_json::from_str(&value.to_string()).expect("deserialize update")
    }

    #[test]
    fn text_message_becomes_inbound_message() {
        let event = to_event(parse(text_update(1, "hello there"))).unwrap();
        assert_eq!(
            event,
            InboundEvent::Message(InboundMessage {
                chat_id: 42,
                text: "hello there".into(),
                username: Some("alice".into()),
            })
        );
    }

    #[test]
    fn commands_are_ignored() {
        assert!(to_event(parse(text_update(1, "/start"))).is_none());
    }

    #[test]
    fn non_text_messages_are_ignored() {
        let update = parse(json!({
            "update_id": 3,
            "message": {
                "message_id": 3,
                "date": 1,
                "chat": chat(),
                "sticker": {
                    "file_id": "f", "file_unique_id": "u", "type": "regular",
                    "width": 1, "height": 1, "is_animated": false, "is_video": false
                }
            }
        }));
        assert!(to_event(update).is_none());
    }

    #[test]
    fn callback_query_becomes_button_click() {
        let event = to_event(parse(click_update(2, "Prices"))).unwrap();
        assert_eq!(
            event,
            InboundEvent::ButtonClick(ButtonClick {
                callback_id: "cb-1".into(),
                data: "Prices".into(),
                chat_id: Some(42),
                message_id: Some(7),
            })
        );
    }

    #[derive(Clone, Default)]
    struct MockTelegramApi {
        calls: Arc<Mutex<Vec<(String, Value)>>>,
        batches: Arc<Mutex<Vec<Value>>>,
    }

    impl MockTelegramApi {
        fn methods(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
        }

        fn last_call(&self, method: &str) -> Option<Value> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(m, _)| m == method)
                .map(|(_, body)| body.clone())
        }
    }

    async fn telegram_api_handler(
        State(state): State<MockTelegramApi>,
        uri: Uri,
        body: Bytes,
    ) -> Json<Value> {
        let method = uri.path().rsplit('/').next().unwrap_or_default().to_string();
        let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        state.calls.lock().unwrap().push((method.clone(), body));

        let result = match method.as_str() {
            "GetMe" => json!({
                "id": 777,
                "is_bot": true,
                "first_name": "Helper",
                "username": "helper_bot",
                "can_join_groups": true,
                "can_read_all_group_messages": false,
                "supports_inline_queries": false,
                "can_connect_to_business": false,
                "has_main_web_app": false
            }),
            "GetUpdates" => {
                let mut batches = state.batches.lock().unwrap();
                if batches.is_empty() {
                    json!([])
                } else {
                    batches.remove(0)
                }
            },
            "SendMessage" | "EditMessageText" => json!({
                "message_id": 8,
                "date": 1,
                "chat": chat(),
                "text": "ok"
            }),
            _ => json!(true),
        };
        Json(json!({ "ok": true, "result": result }))
    }

    async fn spawn_mock(api: MockTelegramApi) -> (String, oneshot::Sender<()>) {
        let app = Router::new()
            .route("/{*path}", post(telegram_api_handler))
            .with_state(api);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("serve mock telegram api");
        });
        (format!("http://{addr}/"), shutdown_tx)
    }

    fn bot_config(token: &str) -> BotConfig {
        BotConfig {
            id: BotId(1),
            token: Secret::new(token.into()),
            name: "helper".into(),
            description: None,
            active: true,
        }
    }

    fn connector(api_url: String) -> TelegramConnector {
        TelegramConnector::new(TelegramConfig {
            poll_timeout_secs: 0,
            client_timeout_secs: 5,
            api_url: Some(api_url),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn malformed_token_is_rejected_without_network() {
        let api = MockTelegramApi::default();
        let (url, shutdown) = spawn_mock(api.clone()).await;

        let err = connector(url).connect(&bot_config("not-a-token")).await.err().unwrap();
        assert!(matches!(err, Error::Credential { .. }));
        assert!(api.methods().is_empty());
        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn connect_poll_reply_and_close() {
        let api = MockTelegramApi::default();
        api.batches
            .lock()
            .unwrap()
            .push(json!([text_update(10, "hello"), text_update(11, "/help"), click_update(12, "Prices")]));
        let (url, shutdown) = spawn_mock(api.clone()).await;

        let mut conn = connector(url).connect(&bot_config("123:abc")).await.unwrap();
        assert_eq!(conn.bot_id(), BotId(1));
        assert_eq!(api.methods(), vec!["GetMe", "DeleteWebhook"]);
        assert_eq!(
            api.last_call("DeleteWebhook").unwrap()["drop_pending_updates"],
            json!(true)
        );

        let first = conn.receive_next().await.unwrap();
        assert!(matches!(first, InboundEvent::Message(ref m) if m.text == "hello"));
        conn.send(42, "Hi!").await.unwrap();
        let sent = api.last_call("SendMessage").unwrap();
        assert_eq!(sent["chat_id"], json!(42));
        assert_eq!(sent["text"], json!("Hi!"));

        // The command in between is skipped.
        let InboundEvent::ButtonClick(click) = conn.receive_next().await.unwrap() else {
            panic!("expected a button click");
        };
        conn.edit_last_with_text(&click, "Our prices").await.unwrap();
        assert_eq!(api.last_call("AnswerCallbackQuery").unwrap()["callback_query_id"], json!("cb-1"));
        let edited = api.last_call("EditMessageText").unwrap();
        assert_eq!(edited["message_id"], json!(7));
        assert_eq!(edited["text"], json!("Our prices"));

        conn.close().await;
        let confirm = api.last_call("GetUpdates").unwrap();
        assert_eq!(confirm["offset"], json!(13));
        let _ = shutdown.send(());
    }
}
