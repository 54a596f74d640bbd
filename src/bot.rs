use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tokio::sync::{mpsc, oneshot};

use crate::models::broadcast::BroadcastReport;
use crate::services::broadcast::BroadcastRequest;
use crate::services::ledger::LedgerRequest;
use crate::services::ServiceError;
use crate::settings::Settings;

mod handlers;
mod keyboards;
mod notifier;
mod sessions;

pub use notifier::TelegramNotifier;
use sessions::SessionStore;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "register and open the menu")]
    Start(String),
    #[command(description = "open the admin panel")]
    Admin,
    #[command(description = "credit or debit a user's balance", parse_with = "split")]
    Credit { target: i64, delta: i64 },
    #[command(description = "zero a user's balance", parse_with = "split")]
    Clear { target: i64 },
}

#[derive(Clone)]
pub struct BotContext {
    ledger: mpsc::Sender<LedgerRequest>,
    broadcast: mpsc::Sender<BroadcastRequest>,
    pub(crate) sessions: SessionStore,
    pub(crate) settings: Arc<Settings>,
}

impl BotContext {
    pub fn new(
        ledger: mpsc::Sender<LedgerRequest>,
        broadcast: mpsc::Sender<BroadcastRequest>,
        settings: Arc<Settings>,
    ) -> Self {
        let sessions = SessionStore::new(Duration::from_secs(settings.broadcast.session_ttl_secs));

        BotContext {
            ledger,
            broadcast,
            sessions,
            settings,
        }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.settings.bot.admin_ids.contains(&user_id)
    }

    /// Admin operations are rejected here, before any store access.
    pub fn require_admin(&self, user_id: i64) -> Result<(), ServiceError> {
        if self.is_admin(user_id) {
            Ok(())
        } else {
            Err(ServiceError::Unauthorized(user_id))
        }
    }

    pub(crate) async fn ledger_call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> LedgerRequest,
    ) -> Result<T, anyhow::Error> {
        let (tx, rx) = oneshot::channel();
        self.ledger
            .send(make(tx))
            .await
            .map_err(|e| ServiceError::Communication("ledger".to_string(), e.to_string()))?;

        let result = rx
            .await
            .map_err(|e| ServiceError::Communication("ledger".to_string(), e.to_string()))?;
        Ok(result?)
    }

    pub(crate) async fn broadcast_call(
        &self,
        recipients: Vec<i64>,
        text: String,
        sender_id: i64,
    ) -> Result<BroadcastReport, anyhow::Error> {
        let (tx, rx) = oneshot::channel();
        self.broadcast
            .send(BroadcastRequest::Send {
                recipients,
                text,
                sender_id,
                response: tx,
            })
            .await
            .map_err(|e| ServiceError::Communication("broadcast".to_string(), e.to_string()))?;

        let result = rx
            .await
            .map_err(|e| ServiceError::Communication("broadcast".to_string(), e.to_string()))?;
        Ok(result?)
    }
}

pub async fn run(bot: Bot, ctx: BotContext) {
    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handlers::handle_command),
        )
        .branch(Update::filter_message().endpoint(handlers::handle_message))
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
