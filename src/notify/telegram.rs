use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{EditOutcome, MessageHandle, Notifier, NotifyError};

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Bot API descriptions that mean the message behind a handle is gone.
const STALE_MARKERS: [&str; 5] = [
    "message to edit not found",
    "message to delete not found",
    "message can't be edited",
    "message_id_invalid",
    "message not found",
];
const NOT_MODIFIED_MARKER: &str = "message is not modified";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Serialize)]
struct EditMessageText<'a> {
    chat_id: &'a str,
    message_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Serialize)]
struct DeleteMessage<'a> {
    chat_id: &'a str,
    message_id: i64,
}

/// Telegram Bot API channel for the status message.
pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(
        token: impl Into<String>,
        chat_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    async fn call<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, NotifyError> {
        let response = self.client.post(self.method_url(method)).json(body).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        // The Bot API answers errors with a JSON body too; anything else is
        // reported with the raw text.
        serde_json::from_str(&text).map_err(|_| NotifyError::Api {
            code: status,
            description: text,
        })
    }
}

fn message_id(handle: &MessageHandle) -> Result<i64, NotifyError> {
    handle
        .as_str()
        .parse()
        .map_err(|_| NotifyError::Stale(format!("unusable message id '{handle}'")))
}

fn api_error<T>(response: ApiResponse<T>) -> NotifyError {
    let description = response.description.unwrap_or_default();
    let lowered = description.to_lowercase();
    if STALE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return NotifyError::Stale(description);
    }
    NotifyError::Api {
        code: response.error_code.unwrap_or_default(),
        description,
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> Result<MessageHandle, NotifyError> {
        let request = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };
        let response: ApiResponse<SentMessage> = self.call("sendMessage", &request).await?;
        match response.result {
            Some(sent) if response.ok => Ok(MessageHandle::new(sent.message_id.to_string())),
            _ => Err(api_error(response)),
        }
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<EditOutcome, NotifyError> {
        let request = EditMessageText {
            chat_id: &self.chat_id,
            message_id: message_id(handle)?,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };
        let response: ApiResponse<serde_json::Value> =
            self.call("editMessageText", &request).await?;
        if response.ok {
            return Ok(EditOutcome::Edited);
        }
        let not_modified = response
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(NOT_MODIFIED_MARKER));
        if not_modified {
            return Ok(EditOutcome::Unchanged);
        }
        Err(api_error(response))
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<(), NotifyError> {
        let request = DeleteMessage {
            chat_id: &self.chat_id,
            message_id: message_id(handle)?,
        };
        let response: ApiResponse<bool> = self.call("deleteMessage", &request).await?;
        if response.ok {
            return Ok(());
        }
        match api_error(response) {
            // Already gone.
            NotifyError::Stale(_) => Ok(()),
            err => Err(err),
        }
    }
}
