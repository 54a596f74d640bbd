use async_trait::async_trait;
use sqlx::AnyPool;
use tokio::sync::oneshot;

use super::{RequestHandler, Service, ServiceError};
use crate::models::admin_log::{AdminAction, AdminLogEntry};
use crate::models::users::{LedgerStats, NewUser, ReferralInfo, RegisterOutcome, User};
use crate::repositories::admin_log::AdminLogRepository;
use crate::repositories::users::UserRepository;

pub enum LedgerRequest {
    Register {
        new_user: NewUser,
        response: oneshot::Sender<Result<RegisterOutcome, ServiceError>>,
    },
    SetSubscribed {
        user_id: i64,
        verified: bool,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    GetUser {
        user_id: i64,
        response: oneshot::Sender<Result<Option<User>, ServiceError>>,
    },
    ReferralInfo {
        user_id: i64,
        response: oneshot::Sender<Result<ReferralInfo, ServiceError>>,
    },
    AdjustBalance {
        admin_id: i64,
        user_id: i64,
        delta: i64,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    ClearBalance {
        admin_id: i64,
        user_id: i64,
        response: oneshot::Sender<Result<i64, ServiceError>>,
    },
    ListUserIds {
        response: oneshot::Sender<Result<Vec<i64>, ServiceError>>,
    },
    Stats {
        response: oneshot::Sender<Result<LedgerStats, ServiceError>>,
    },
    RecentAdminActions {
        limit: i64,
        response: oneshot::Sender<Result<Vec<AdminLogEntry>, ServiceError>>,
    },
}

#[derive(Clone)]
pub struct LedgerRequestHandler {
    repository: UserRepository,
    audit: AdminLogRepository,
    threshold: i64,
}

impl LedgerRequestHandler {
    pub fn new(sql_conn: AnyPool, threshold: i64) -> Self {
        LedgerRequestHandler {
            repository: UserRepository::new(sql_conn.clone()),
            audit: AdminLogRepository::new(sql_conn),
            threshold,
        }
    }

    async fn register(&self, new_user: &NewUser) -> Result<RegisterOutcome, ServiceError> {
        self.repository
            .register(new_user)
            .await
            .map_err(|e| ServiceError::StorageUnavailable(e.to_string()))
    }

    async fn adjust_balance(
        &self,
        admin_id: i64,
        user_id: i64,
        delta: i64,
    ) -> Result<(), ServiceError> {
        let existed = self
            .repository
            .adjust_balance(user_id, delta)
            .await
            .map_err(|e| ServiceError::StorageUnavailable(e.to_string()))?;
        if !existed {
            return Err(ServiceError::NotFound(user_id));
        }

        if let Err(e) = self
            .audit
            .record(
                admin_id,
                AdminAction::AdjustBalance,
                Some(user_id),
                Some(delta),
                None,
            )
            .await
        {
            log::warn!("Could not record balance adjustment in admin log: {e}");
        }

        Ok(())
    }

    async fn clear_balance(&self, admin_id: i64, user_id: i64) -> Result<i64, ServiceError> {
        let old_balance = self
            .repository
            .clear_balance(user_id)
            .await
            .map_err(|e| ServiceError::StorageUnavailable(e.to_string()))?
            .ok_or(ServiceError::NotFound(user_id))?;

        if let Err(e) = self
            .audit
            .record(
                admin_id,
                AdminAction::ClearBalance,
                Some(user_id),
                Some(old_balance),
                None,
            )
            .await
        {
            log::warn!("Could not record balance clear in admin log: {e}");
        }

        Ok(old_balance)
    }
}

#[async_trait]
impl RequestHandler<LedgerRequest> for LedgerRequestHandler {
    async fn handle_request(&self, request: LedgerRequest) {
        match request {
            LedgerRequest::Register { new_user, response } => {
                let outcome = self.register(&new_user).await;
                let _ = response.send(outcome);
            }
            LedgerRequest::SetSubscribed {
                user_id,
                verified,
                response,
            } => {
                let result = self
                    .repository
                    .set_subscribed(user_id, verified)
                    .await
                    .map_err(|e| ServiceError::StorageUnavailable(e.to_string()));
                let _ = response.send(result);
            }
            LedgerRequest::GetUser { user_id, response } => {
                let user = self
                    .repository
                    .get_user(user_id)
                    .await
                    .map_err(|e| ServiceError::StorageUnavailable(e.to_string()));
                let _ = response.send(user);
            }
            LedgerRequest::ReferralInfo { user_id, response } => {
                let info = self
                    .repository
                    .referral_info(user_id, self.threshold)
                    .await
                    .map_err(|e| ServiceError::StorageUnavailable(e.to_string()));
                let _ = response.send(info);
            }
            LedgerRequest::AdjustBalance {
                admin_id,
                user_id,
                delta,
                response,
            } => {
                let result = self.adjust_balance(admin_id, user_id, delta).await;
                let _ = response.send(result);
            }
            LedgerRequest::ClearBalance {
                admin_id,
                user_id,
                response,
            } => {
                let result = self.clear_balance(admin_id, user_id).await;
                let _ = response.send(result);
            }
            LedgerRequest::ListUserIds { response } => {
                let ids = self
                    .repository
                    .list_user_ids()
                    .await
                    .map_err(|e| ServiceError::StorageUnavailable(e.to_string()));
                let _ = response.send(ids);
            }
            LedgerRequest::Stats { response } => {
                let stats = self
                    .repository
                    .stats()
                    .await
                    .map_err(|e| ServiceError::StorageUnavailable(e.to_string()));
                let _ = response.send(stats);
            }
            LedgerRequest::RecentAdminActions { limit, response } => {
                let entries = self
                    .audit
                    .recent(limit)
                    .await
                    .map_err(|e| ServiceError::StorageUnavailable(e.to_string()));
                let _ = response.send(entries);
            }
        }
    }
}

pub struct LedgerService;

impl LedgerService {
    pub fn new() -> Self {
        LedgerService {}
    }
}

#[async_trait]
impl Service<LedgerRequest, LedgerRequestHandler> for LedgerService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::memory_pool;
    use tokio::sync::mpsc;

    async fn handler() -> LedgerRequestHandler {
        LedgerRequestHandler::new(memory_pool().await, 30)
    }

    fn new_user(user_id: i64) -> NewUser {
        NewUser {
            user_id,
            username: None,
            first_name: Some("Test".to_string()),
            last_name: None,
            referrer_id: None,
        }
    }

    #[tokio::test]
    async fn admin_balance_ops_are_audited() {
        let handler = handler().await;

        handler.register(&new_user(1)).await.unwrap();
        handler.adjust_balance(9, 1, 5).await.unwrap();
        assert_eq!(handler.clear_balance(9, 1).await.unwrap(), 5);

        let entries = handler.audit.recent(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.admin_id == 9));
    }

    #[tokio::test]
    async fn missing_target_maps_to_not_found() {
        let handler = handler().await;

        let err = handler.adjust_balance(9, 404, 5).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(404)));
        let err = handler.clear_balance(9, 404).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(404)));

        // Rejected operations leave no audit trail.
        assert!(handler.audit.recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn serves_requests_over_the_channel() {
        let handler = handler().await;
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(async move {
            LedgerService::new().run(handler, &mut rx).await;
        });

        let (response, result) = oneshot::channel();
        tx.send(LedgerRequest::Register {
            new_user: new_user(1),
            response,
        })
        .await
        .unwrap();
        assert!(result.await.unwrap().unwrap().created);

        let (response, result) = oneshot::channel();
        tx.send(LedgerRequest::Stats { response }).await.unwrap();
        assert_eq!(result.await.unwrap().unwrap().users, 1);
    }
}
