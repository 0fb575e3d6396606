use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::oneshot;

use super::crediting::{CreditOutcome, CreditingEngine};
use super::registry::UserRegistry;
use super::statistics::Snapshotter;
use super::{RequestHandler, Service, ServiceError};
use crate::models::{
    channels::RequiredChannel,
    statistics::StatisticsSnapshot,
    users::{LeaderboardEntry, ReferralState, User},
};

pub enum ReferralRequest {
    Start {
        external_id: i64,
        display_name: String,
        username: Option<String>,
        referral_code: Option<String>,
        response: oneshot::Sender<Result<SessionReport, ServiceError>>,
    },
    CheckSubscription {
        external_id: i64,
        response: oneshot::Sender<Result<SessionReport, ServiceError>>,
    },
    GetUser {
        external_id: i64,
        response: oneshot::Sender<Result<Option<User>, ServiceError>>,
    },
    Leaderboard {
        limit: Option<i64>,
        response: oneshot::Sender<Result<Vec<LeaderboardEntry>, ServiceError>>,
    },
    RefreshStatistics {
        date: NaiveDate,
        response: oneshot::Sender<Result<StatisticsSnapshot, ServiceError>>,
    },
    GetStatistics {
        date: NaiveDate,
        response: oneshot::Sender<Result<Option<StatisticsSnapshot>, ServiceError>>,
    },
}

/// What a session trigger produced, for the transport to render.
#[derive(Clone, Debug, Serialize)]
pub struct SessionReport {
    pub user: User,
    pub created: bool,
    pub referral_linked: bool,
    pub outcome: CreditOutcome,
    pub state: ReferralState,
    pub unmet: Vec<RequiredChannel>,
}

#[derive(Clone)]
pub struct ReferralRequestHandler {
    registry: UserRegistry,
    engine: CreditingEngine,
    snapshotter: Snapshotter,
    leaderboard_size: i64,
}

impl ReferralRequestHandler {
    pub fn new(
        registry: UserRegistry,
        engine: CreditingEngine,
        snapshotter: Snapshotter,
        leaderboard_size: i64,
    ) -> Self {
        Self {
            registry,
            engine,
            snapshotter,
            leaderboard_size,
        }
    }

    /// First contact or re-entry: referral codes are only honoured for users
    /// created by this very call.
    pub async fn start(
        &self,
        external_id: i64,
        display_name: &str,
        username: Option<&str>,
        referral_code: Option<&str>,
    ) -> Result<SessionReport, ServiceError> {
        let registration = self
            .registry
            .resolve_or_create(external_id, display_name, username)
            .await?;
        let mut user = registration.user;

        let referral_linked = match referral_code {
            Some(code) if registration.created => self.registry.link_referral(code, &mut user).await?,
            _ => false,
        };

        let mut report = self.verify(user).await?;
        report.created = registration.created;
        report.referral_linked = referral_linked;

        Ok(report)
    }

    pub async fn check_subscription(&self, external_id: i64) -> Result<SessionReport, ServiceError> {
        let user = self
            .registry
            .find(external_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", external_id)))?;

        self.verify(user).await
    }

    async fn verify(&self, mut user: User) -> Result<SessionReport, ServiceError> {
        let attempt = self.engine.evaluate(&user).await?;

        match attempt.outcome {
            CreditOutcome::Credited => user.referral_credited = true,
            // The copy we hold may predate another session's credit.
            CreditOutcome::AlreadyCredited => {
                if let Some(current) = self.registry.find(user.external_id).await? {
                    user = current;
                }
            }
            _ => {}
        }

        Ok(SessionReport {
            state: user.referral_state(attempt.verified()),
            user,
            created: false,
            referral_linked: false,
            outcome: attempt.outcome,
            unmet: attempt.unmet,
        })
    }

    async fn leaderboard(&self, limit: Option<i64>) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        self.registry
            .leaderboard(limit.unwrap_or(self.leaderboard_size))
            .await
    }
}

#[async_trait]
impl RequestHandler<ReferralRequest> for ReferralRequestHandler {
    async fn handle_request(&self, request: ReferralRequest) {
        match request {
            ReferralRequest::Start {
                external_id,
                display_name,
                username,
                referral_code,
                response,
            } => {
                let report = self
                    .start(
                        external_id,
                        &display_name,
                        username.as_deref(),
                        referral_code.as_deref(),
                    )
                    .await;
                let _ = response.send(report);
            }
            ReferralRequest::CheckSubscription {
                external_id,
                response,
            } => {
                let report = self.check_subscription(external_id).await;
                let _ = response.send(report);
            }
            ReferralRequest::GetUser {
                external_id,
                response,
            } => {
                let user = self.registry.find(external_id).await;
                let _ = response.send(user);
            }
            ReferralRequest::Leaderboard { limit, response } => {
                let entries = self.leaderboard(limit).await;
                let _ = response.send(entries);
            }
            ReferralRequest::RefreshStatistics { date, response } => {
                let snapshot = self.snapshotter.refresh(date).await;
                let _ = response.send(snapshot);
            }
            ReferralRequest::GetStatistics { date, response } => {
                let snapshot = self.snapshotter.get(date).await;
                let _ = response.send(snapshot);
            }
        }
    }
}

pub struct ReferralService;

impl ReferralService {
    pub fn new() -> Self {
        ReferralService {}
    }
}

#[async_trait]
impl Service<ReferralRequest, ReferralRequestHandler> for ReferralService {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::models::channels::MemberStatus;
    use crate::repositories::memory::MemoryStore;
    use crate::services::crediting::DEFAULT_BONUS;
    use crate::services::membership::{MembershipVerifier, MockMembershipProvider};

    async fn handler(status: MemberStatus) -> (MemoryStore, ReferralRequestHandler) {
        let store = MemoryStore::new();
        store.add_channel("News", "https://t.me/news", true).await;

        let mut provider = MockMembershipProvider::new();
        provider
            .expect_get_membership_status()
            .returning(move |_, _| Ok(status));
        let verifier = MembershipVerifier::new(Arc::new(provider), Duration::from_millis(200));

        let handler = ReferralRequestHandler::new(
            UserRegistry::new(Arc::new(store.clone())),
            CreditingEngine::new(
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                verifier,
                DEFAULT_BONUS,
            ),
            Snapshotter::new(Arc::new(store.clone())),
            20,
        );

        (store, handler)
    }

    #[tokio::test]
    async fn start_links_and_credits_new_users() {
        let (_, handler) = handler(MemberStatus::Member).await;

        let a = handler.start(100, "A", None, None).await.unwrap();
        assert_eq!(a.outcome, CreditOutcome::NoReferrer);
        assert_eq!(a.state, ReferralState::NotApplicable);

        let b = handler.start(200, "B", Some("bee"), Some("100")).await.unwrap();
        assert!(b.created);
        assert!(b.referral_linked);
        assert_eq!(b.outcome, CreditOutcome::Credited);
        assert_eq!(b.state, ReferralState::Credited);
        assert!(b.user.referral_credited);

        let board = handler.leaderboard(None).await.unwrap();
        assert_eq!(board[0].external_id, 100);
        assert_eq!(board[0].score, 10);
    }

    #[tokio::test]
    async fn returning_users_cannot_pick_a_referrer() {
        let (_, handler) = handler(MemberStatus::Member).await;
        handler.start(100, "A", None, None).await.unwrap();
        handler.start(200, "B", None, None).await.unwrap();

        let again = handler.start(200, "B", None, Some("100")).await.unwrap();

        assert!(!again.created);
        assert!(!again.referral_linked);
        assert_eq!(again.outcome, CreditOutcome::NoReferrer);
    }

    #[tokio::test]
    async fn unsubscribed_users_get_the_missing_channels() {
        let (_, handler) = handler(MemberStatus::Left).await;
        handler.start(100, "A", None, None).await.unwrap();

        let report = handler.start(200, "B", None, Some("100")).await.unwrap();

        assert_eq!(report.outcome, CreditOutcome::NotEligible);
        assert_eq!(report.state, ReferralState::Pending);
        assert_eq!(report.unmet.len(), 1);
        assert_eq!(report.unmet[0].url, "https://t.me/news");
    }

    #[tokio::test]
    async fn stale_copy_reports_the_stored_credit() {
        let (_, handler) = handler(MemberStatus::Member).await;
        handler.start(100, "A", None, None).await.unwrap();
        let b = handler.start(200, "B", None, Some("100")).await.unwrap();
        assert_eq!(b.outcome, CreditOutcome::Credited);

        let mut stale = b.user.clone();
        stale.referral_credited = false;
        let report = handler.verify(stale).await.unwrap();

        assert_eq!(report.outcome, CreditOutcome::AlreadyCredited);
        assert_eq!(report.state, ReferralState::Credited);
        assert!(report.user.referral_credited);

        let again = handler.check_subscription(200).await.unwrap();
        assert_eq!(again.outcome, CreditOutcome::AlreadyCredited);
        assert_eq!(again.state, ReferralState::Credited);
    }

    #[tokio::test]
    async fn check_requires_a_known_user() {
        let (_, handler) = handler(MemberStatus::Member).await;

        assert!(matches!(
            handler.check_subscription(999).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn service_loop_answers_requests() {
        let (_, handler) = handler(MemberStatus::Member).await;
        let (tx, mut rx) = mpsc::channel(16);

        tokio::spawn(async move {
            ReferralService::new().run(handler, &mut rx).await;
        });

        let (response_tx, response_rx) = oneshot::channel();
        tx.send(ReferralRequest::Start {
            external_id: 100,
            display_name: "A".to_string(),
            username: None,
            referral_code: None,
            response: response_tx,
        })
        .await
        .unwrap();
        let report = response_rx.await.unwrap().unwrap();
        assert!(report.created);

        let (response_tx, response_rx) = oneshot::channel();
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        tx.send(ReferralRequest::RefreshStatistics {
            date,
            response: response_tx,
        })
        .await
        .unwrap();
        let snapshot = response_rx.await.unwrap().unwrap();
        assert_eq!(snapshot.total_users, 1);
        assert_eq!(snapshot.total_subscriptions, 1);
    }
}
