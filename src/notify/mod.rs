//! The single live status message.
//!
//! Each cycle edits one message in place. A new message is sent only when
//! there is no handle yet or the channel reports the old one as gone.

mod handle;
mod render;
mod telegram;

pub use handle::{HandleStore, HANDLE_KEY};
pub use render::{render_message, strip_markup, Language, VenueState, VenueStatus};
pub use telegram::{TelegramNotifier, DEFAULT_TELEGRAM_API_BASE};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "crowdwatch::notify";

use crate::{log_info, log_warn};

/// Channel-specific id of the status message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHandle(pub String);

impl MessageHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOutcome {
    Edited,
    /// The message already had this text.
    Unchanged,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The message behind the handle no longer exists or cannot be edited.
    #[error("status message is gone: {0}")]
    Stale(String),

    #[error("notification API error {code}: {description}")]
    Api { code: u16, description: String },

    #[error("notification request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<MessageHandle, NotifyError>;

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<EditOutcome, NotifyError>;

    /// Removes the message. A message that is already gone is not an error.
    async fn delete(&self, handle: &MessageHandle) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PublishAction {
    Edited,
    Unchanged,
    /// First message, no handle existed.
    Sent,
    /// The previous message was gone and a replacement was sent.
    Recreated { previous: MessageHandle },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    /// Handle to persist for the next cycle. `None` after a stale handle
    /// whose replacement could not be sent.
    pub handle: Option<MessageHandle>,
    #[serde(flatten)]
    pub action: PublishAction,
}

impl PublishOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self.action, PublishAction::Failed { .. })
    }
}

#[derive(Clone)]
pub struct NotificationRenderer {
    notifier: Arc<dyn Notifier>,
    language: Language,
    offset: FixedOffset,
}

impl NotificationRenderer {
    pub fn new(notifier: Arc<dyn Notifier>, language: Language, offset: FixedOffset) -> Self {
        Self {
            notifier,
            language,
            offset,
        }
    }

    pub fn render(&self, statuses: &[VenueStatus], at: DateTime<Utc>) -> String {
        render_message(statuses, self.language, at, self.offset)
    }

    /// Renders `statuses` and publishes them over `handle`.
    ///
    /// Sends at most one new message per call.
    pub async fn publish(
        &self,
        statuses: &[VenueStatus],
        handle: Option<MessageHandle>,
        at: DateTime<Utc>,
    ) -> PublishOutcome {
        let body = self.render(statuses, at);
        self.publish_text(&body, handle).await
    }

    pub async fn publish_text(&self, body: &str, handle: Option<MessageHandle>) -> PublishOutcome {
        let Some(current) = handle else {
            return match self.notifier.send(body).await {
                Ok(sent) => {
                    log_info!("Sent status message {sent}");
                    PublishOutcome {
                        handle: Some(sent),
                        action: PublishAction::Sent,
                    }
                }
                Err(err) => failed(None, err),
            };
        };

        match self.notifier.edit(&current, body).await {
            Ok(EditOutcome::Edited) => PublishOutcome {
                handle: Some(current),
                action: PublishAction::Edited,
            },
            Ok(EditOutcome::Unchanged) => PublishOutcome {
                handle: Some(current),
                action: PublishAction::Unchanged,
            },
            Err(NotifyError::Stale(reason)) => {
                log_warn!("Status message {current} is gone ({reason}), sending a new one");
                match self.notifier.send(body).await {
                    Ok(sent) => PublishOutcome {
                        handle: Some(sent),
                        action: PublishAction::Recreated { previous: current },
                    },
                    Err(err) => failed(None, err),
                }
            }
            Err(err) => failed(Some(current), err),
        }
    }

    /// Withdraws a message whose handle could not be kept.
    pub async fn retract(&self, handle: &MessageHandle) -> Result<(), NotifyError> {
        self.notifier.delete(handle).await?;
        log_info!("Withdrew status message {handle}");
        Ok(())
    }
}

fn failed(handle: Option<MessageHandle>, err: NotifyError) -> PublishOutcome {
    log_warn!("Publishing status message failed: {err}");
    PublishOutcome {
        handle,
        action: PublishAction::Failed {
            reason: err.to_string(),
        },
    }
}
