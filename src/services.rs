use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::AnyPool;
use tokio::sync::mpsc;

use crate::settings::Settings;

pub mod broadcast;
pub mod ledger;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("user {0} not found")]
    NotFound(i64),
    #[error("user {0} is not an administrator")]
    Unauthorized(i64),
    #[error("communication error: {0} - {1}")]
    Communication(String, String),
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

pub async fn start_services(
    pool: AnyPool,
    settings: Arc<Settings>,
    notifier: Arc<dyn broadcast::Notifier>,
) -> Result<
    (
        mpsc::Sender<ledger::LedgerRequest>,
        mpsc::Sender<broadcast::BroadcastRequest>,
    ),
    anyhow::Error,
> {
    let (ledger_tx, mut ledger_rx) = mpsc::channel(512);
    let (broadcast_tx, mut broadcast_rx) = mpsc::channel(512);

    let mut ledger_service = ledger::LedgerService::new();
    let mut broadcast_service = broadcast::BroadcastService::new();

    log::info!("Starting ledger service.");
    let ledger_pool = pool.clone();
    let threshold = settings.referral.threshold;
    tokio::spawn(async move {
        ledger_service
            .run(
                ledger::LedgerRequestHandler::new(ledger_pool, threshold),
                &mut ledger_rx,
            )
            .await;
    });

    log::info!("Starting broadcast service.");
    let delay = Duration::from_millis(settings.broadcast.delay_ms);
    tokio::spawn(async move {
        broadcast_service
            .run(
                broadcast::BroadcastRequestHandler::new(pool, notifier, delay),
                &mut broadcast_rx,
            )
            .await;
    });

    Ok((ledger_tx, broadcast_tx))
}
