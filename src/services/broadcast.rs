use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::AnyPool;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::admin_log::AdminAction;
use crate::models::broadcast::BroadcastReport;
use crate::repositories::admin_log::AdminLogRepository;

/// Outbound delivery seam. The production implementation wraps the Telegram
/// client; tests substitute their own.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn send_text(&self, recipient_id: i64, text: &str) -> Result<(), anyhow::Error>;
}

pub enum BroadcastRequest {
    Send {
        recipients: Vec<i64>,
        text: String,
        sender_id: i64,
        response: oneshot::Sender<Result<BroadcastReport, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct BroadcastRequestHandler {
    notifier: Arc<dyn Notifier>,
    audit: AdminLogRepository,
    delay: Duration,
}

impl BroadcastRequestHandler {
    pub fn new(sql_conn: AnyPool, notifier: Arc<dyn Notifier>, delay: Duration) -> Self {
        BroadcastRequestHandler {
            notifier,
            audit: AdminLogRepository::new(sql_conn),
            delay,
        }
    }

    /// Walks the recipient snapshot once. A failed delivery is counted and
    /// recorded, never propagated, so one blocked recipient cannot stall the
    /// rest of the run. The sender is skipped without a network call.
    async fn fan_out(&self, recipients: &[i64], text: &str, sender_id: i64) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for &recipient_id in recipients {
            report.attempted += 1;

            if recipient_id == sender_id {
                report.succeeded += 1;
                continue;
            }

            match self.notifier.send_text(recipient_id, text).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    log::debug!("Delivery to {recipient_id} failed: {e}");
                    report.failed += 1;
                    report.failed_ids.push(recipient_id);
                }
            }

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        report
    }

    async fn send(&self, recipients: Vec<i64>, text: String, sender_id: i64) -> BroadcastReport {
        let report = self.fan_out(&recipients, &text, sender_id).await;

        log::info!(
            "Broadcast from {sender_id}: attempted {}, delivered {}, failed {}",
            report.attempted,
            report.succeeded,
            report.failed
        );

        if let Err(e) = self
            .audit
            .record(
                sender_id,
                AdminAction::Broadcast,
                None,
                Some(report.attempted as i64),
                None,
            )
            .await
        {
            log::warn!("Could not record broadcast in admin log: {e}");
        }

        report
    }
}

#[async_trait]
impl RequestHandler<BroadcastRequest> for BroadcastRequestHandler {
    async fn handle_request(&self, request: BroadcastRequest) {
        match request {
            BroadcastRequest::Send {
                recipients,
                text,
                sender_id,
                response,
            } => {
                let report = self.send(recipients, text, sender_id).await;
                let _ = response.send(Ok(report));
            }
        }
    }
}

pub struct BroadcastService;

impl BroadcastService {
    pub fn new() -> Self {
        BroadcastService {}
    }
}

#[async_trait]
impl Service<BroadcastRequest, BroadcastRequestHandler> for BroadcastService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::memory_pool;
    use std::sync::Mutex;

    struct RecordingNotifier {
        fail_for: Option<i64>,
        sent: Mutex<Vec<i64>>,
    }

    impl RecordingNotifier {
        fn new(fail_for: Option<i64>) -> Self {
            RecordingNotifier {
                fail_for,
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send_text(&self, recipient_id: i64, _text: &str) -> Result<(), anyhow::Error> {
            if self.fail_for == Some(recipient_id) {
                anyhow::bail!("bot was blocked by the user");
            }
            self.sent.lock().unwrap().push(recipient_id);
            Ok(())
        }
    }

    async fn handler(notifier: Arc<RecordingNotifier>) -> BroadcastRequestHandler {
        BroadcastRequestHandler::new(memory_pool().await, notifier, Duration::ZERO)
    }

    #[tokio::test]
    async fn failing_recipient_does_not_abort_fan_out() {
        let notifier = Arc::new(RecordingNotifier::new(Some(2)));
        let handler = handler(notifier.clone()).await;

        let report = handler.fan_out(&[1, 2, 3, 4], "hello", 99).await;

        assert_eq!(report.attempted, 4);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failed_ids, vec![2]);
        assert_eq!(*notifier.sent.lock().unwrap(), vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn sender_is_skipped_but_counted() {
        let notifier = Arc::new(RecordingNotifier::new(None));
        let handler = handler(notifier.clone()).await;

        let report = handler.fan_out(&[1, 2, 3], "hello", 2).await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(*notifier.sent.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn broadcast_is_recorded_in_admin_log() {
        let notifier = Arc::new(RecordingNotifier::new(None));
        let handler = handler(notifier).await;

        handler.send(vec![1, 2, 3], "hello".to_string(), 7).await;

        let entries = handler.audit.recent(1).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "broadcast");
        assert_eq!(entries[0].admin_id, 7);
        assert_eq!(entries[0].amount, Some(3));
    }
}
