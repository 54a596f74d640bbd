use async_trait::async_trait;
use teloxide::prelude::*;

use crate::services::broadcast::Notifier;

/// [`Notifier`] over the live Telegram client.
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        TelegramNotifier { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_text(&self, recipient_id: i64, text: &str) -> Result<(), anyhow::Error> {
        self.bot.send_message(ChatId(recipient_id), text).await?;
        Ok(())
    }
}
