use std::env;

use teloxide::prelude::*;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use common::models::StatusEvent;

pub struct TelegramService {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramService {
    /// Returns `None` unless both `TELEGRAM_BOT_TOKEN` and a numeric `TELEGRAM_CHAT_ID` are set.
    pub fn from_env() -> Option<Self> {
        let token = env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id_str = env::var("TELEGRAM_CHAT_ID").ok()?;
        let chat_id = match chat_id_str.trim().parse::<i64>() {
            Ok(id) => id,
            Err(_) => {
                warn!("TELEGRAM_CHAT_ID must be a number, notifications disabled");
                return None;
            }
        };

        Some(Self {
            bot: Bot::new(token),
            chat_id: ChatId(chat_id),
        })
    }

    pub async fn start(self, mut rx: broadcast::Receiver<StatusEvent>) {
        info!("Starting Telegram Notification Service");

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let Some(msg) = format_event(&event) else {
                        continue;
                    };
                    // Log the error, never crash.
                    if let Err(e) = self.bot.send_message(self.chat_id, msg).await {
                        error!("Failed to send Telegram message: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    error!("Telegram service lagged behind. Missed {} messages.", n);
                }
                Err(_) => {
                    info!("Status channel closed. Stopping Telegram service.");
                    break;
                }
            }
        }
    }
}

/// Only terminal events are worth a chat message.
pub fn format_event(event: &StatusEvent) -> Option<String> {
    match event {
        StatusEvent::Progress { .. } => None,
        StatusEvent::Success { session } => Some(format!("Session {}: all trades placed", session)),
        StatusEvent::Partial {
            session,
            succeeded,
            total,
        } => Some(format!(
            "Session {}: {}/{} trades placed",
            session, succeeded, total
        )),
        StatusEvent::Failed { session, reason } => {
            Some(format!("Session {} failed: {}", session, reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_only_terminal_events_are_formatted() {
        let progress = StatusEvent::Progress {
            session: 1,
            step: "Authenticating".to_string(),
            message: "Logging in".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(format_event(&progress), None);
        assert_eq!(
            format_event(&StatusEvent::Partial {
                session: 2,
                succeeded: 1,
                total: 3
            })
            .as_deref(),
            Some("Session 2: 1/3 trades placed")
        );
    }
}
