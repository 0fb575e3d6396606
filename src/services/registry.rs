use std::sync::Arc;

use super::ServiceError;
use crate::models::users::{LeaderboardEntry, NewUser, Registration, User};
use crate::repositories::UserStore;

#[derive(Clone)]
pub struct UserRegistry {
    users: Arc<dyn UserStore>,
}

impl UserRegistry {
    pub fn new(users: Arc<dyn UserStore>) -> Self {
        Self { users }
    }

    /// Returns the user for `external_id`, creating it with a fresh referral
    /// code, zero score and no referrer on first contact.
    pub async fn resolve_or_create(
        &self,
        external_id: i64,
        display_name: &str,
        username: Option<&str>,
    ) -> Result<Registration, ServiceError> {
        if let Some(user) = self.find(external_id).await? {
            return Ok(Registration {
                user,
                created: false,
            });
        }

        let registration = self
            .users
            .insert_user(&NewUser {
                external_id,
                display_name: display_name.to_string(),
                username: username.map(str::to_string),
            })
            .await
            .map_err(|e| ServiceError::Repository("UserRegistry".to_string(), e.to_string()))?;

        if registration.created {
            log::info!(
                "Registered user {} with referral code {}.",
                external_id,
                registration.user.referral_code
            );
        }

        Ok(registration)
    }

    /// Links `referred` to the owner of `referrer_code`. Unknown codes,
    /// self-referrals and users that already have a referrer are rejected
    /// without touching any state.
    pub async fn link_referral(
        &self,
        referrer_code: &str,
        referred: &mut User,
    ) -> Result<bool, ServiceError> {
        let referrer_code = referrer_code.trim();
        if referrer_code.is_empty() {
            return Ok(false);
        }

        let referrer = self
            .users
            .find_by_referral_code(referrer_code)
            .await
            .map_err(|e| ServiceError::Repository("UserRegistry".to_string(), e.to_string()))?;

        let referrer = match referrer {
            Some(referrer) => referrer,
            None => {
                log::info!(
                    "Unknown referral code {} from user {}.",
                    referrer_code,
                    referred.external_id
                );
                return Ok(false);
            }
        };

        if referrer.id == referred.id {
            log::info!("Self referral attempted by user {}.", referred.external_id);
            return Ok(false);
        }

        if referred.referred_by.is_some() {
            return Ok(false);
        }

        let linked = self
            .users
            .set_referrer_if_unset(referred.id, referrer.id)
            .await
            .map_err(|e| ServiceError::Repository("UserRegistry".to_string(), e.to_string()))?;

        if linked {
            referred.referred_by = Some(referrer.id);
            log::info!(
                "Referral linked: {} -> {}.",
                referrer.external_id,
                referred.external_id
            );
        }

        Ok(linked)
    }

    pub async fn find(&self, external_id: i64) -> Result<Option<User>, ServiceError> {
        self.users
            .find_by_external_id(external_id)
            .await
            .map_err(|e| ServiceError::Repository("UserRegistry".to_string(), e.to_string()))
    }

    pub async fn leaderboard(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        if limit <= 0 {
            return Err(ServiceError::InvalidRequest(format!(
                "Leaderboard limit must be positive, got {}",
                limit
            )));
        }

        self.users
            .top_by_score(limit)
            .await
            .map_err(|e| ServiceError::Repository("UserRegistry".to_string(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::users::sample_user;
    use crate::repositories::{memory::MemoryStore, MockUserStore};

    fn registry(store: &MemoryStore) -> UserRegistry {
        UserRegistry::new(Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn creates_once_then_resolves() {
        let store = MemoryStore::new();
        let registry = registry(&store);

        let first = registry.resolve_or_create(100, "Alice", Some("alice")).await.unwrap();
        let again = registry.resolve_or_create(100, "Renamed", None).await.unwrap();

        assert!(first.created);
        assert!(!again.created);
        assert_eq!(first.user.id, again.user.id);
        assert_eq!(again.user.display_name, "Alice");
        assert_eq!(first.user.referral_code, "100");
        assert_eq!(first.user.score, 0);
        assert!(!first.user.referral_credited);
        assert!(first.user.active);
        assert_eq!(first.user.referred_by, None);
    }

    #[tokio::test]
    async fn links_to_code_owner() {
        let store = MemoryStore::new();
        let registry = registry(&store);
        let a = registry.resolve_or_create(100, "A", None).await.unwrap().user;
        let mut b = registry.resolve_or_create(200, "B", None).await.unwrap().user;

        assert!(registry.link_referral("100", &mut b).await.unwrap());
        assert_eq!(b.referred_by, Some(a.id));
        assert!(!b.referral_credited);

        let stored = registry.find(200).await.unwrap().unwrap();
        assert_eq!(stored.referred_by, Some(a.id));
    }

    #[tokio::test]
    async fn unknown_code_is_a_no_op() {
        let store = MemoryStore::new();
        let registry = registry(&store);
        let mut b = registry.resolve_or_create(200, "B", None).await.unwrap().user;

        assert!(!registry.link_referral("999", &mut b).await.unwrap());
        assert!(!registry.link_referral("   ", &mut b).await.unwrap());
        assert_eq!(b.referred_by, None);
        assert_eq!(registry.find(200).await.unwrap().unwrap().referred_by, None);
    }

    #[tokio::test]
    async fn own_code_never_links() {
        let store = MemoryStore::new();
        let registry = registry(&store);
        let mut c = registry.resolve_or_create(300, "C", None).await.unwrap().user;

        assert!(!registry.link_referral("300", &mut c).await.unwrap());
        assert_eq!(c.referred_by, None);
        assert_eq!(registry.find(300).await.unwrap().unwrap().referred_by, None);
    }

    #[tokio::test]
    async fn existing_referrer_is_kept() {
        let store = MemoryStore::new();
        let registry = registry(&store);
        let a = registry.resolve_or_create(100, "A", None).await.unwrap().user;
        registry.resolve_or_create(150, "A2", None).await.unwrap();
        let mut b = registry.resolve_or_create(200, "B", None).await.unwrap().user;

        assert!(registry.link_referral("100", &mut b).await.unwrap());
        assert!(!registry.link_referral("150", &mut b).await.unwrap());
        assert_eq!(registry.find(200).await.unwrap().unwrap().referred_by, Some(a.id));
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_error() {
        let mut users = MockUserStore::new();
        users
            .expect_find_by_referral_code()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));
        users.expect_set_referrer_if_unset().never();

        let registry = UserRegistry::new(Arc::new(users));
        let mut b = sample_user(2, 200);

        let result = registry.link_referral("100", &mut b).await;
        assert!(matches!(result, Err(ServiceError::Repository(_, _))));
        assert_eq!(b.referred_by, None);
    }

    #[tokio::test]
    async fn leaderboard_rejects_non_positive_limits() {
        let registry = registry(&MemoryStore::new());
        assert!(matches!(
            registry.leaderboard(0).await,
            Err(ServiceError::InvalidRequest(_))
        ));
    }
}
