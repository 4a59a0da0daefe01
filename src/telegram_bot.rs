use async_trait::async_trait;
use teloxide::prelude::*;

use crate::delivery::NotificationSink;
use crate::roster::UserId;

/// Sends reminder nudges through the bot; one private chat per user.
pub struct TelegramNotificationSink {
    bot: Bot,
}

impl TelegramNotificationSink {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl NotificationSink for TelegramNotificationSink {
    async fn notify(&self, user_id: UserId, message: &str) -> anyhow::Result<()> {
        self.bot.send_message(ChatId(user_id), message).await?;
        Ok(())
    }
}
