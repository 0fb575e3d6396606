//! Store interfaces consumed by the services, plus their PostgreSQL and
//! in-process implementations.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;

use crate::models::{
    channels::{MembershipRecord, RequiredChannel},
    statistics::{Aggregates, StatisticsSnapshot},
    users::{CreditReceipt, LeaderboardEntry, NewUser, Registration, User},
};

pub mod channels;
pub mod memory;
pub mod statistics;
pub mod users;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, anyhow::Error>;

    async fn find_by_external_id(&self, external_id: i64) -> Result<Option<User>, anyhow::Error>;

    async fn find_by_referral_code(&self, code: &str) -> Result<Option<User>, anyhow::Error>;

    /// Inserts the user unless one with the same external id exists, in which
    /// case the stored row is returned untouched.
    async fn insert_user(&self, new_user: &NewUser) -> Result<Registration, anyhow::Error>;

    /// Sets `referred_by` only when it is still unset and differs from the
    /// user itself. Returns whether a row was changed.
    async fn set_referrer_if_unset(
        &self,
        user_id: i64,
        referrer_id: i64,
    ) -> Result<bool, anyhow::Error>;

    /// Marks the referral as credited and adds `bonus` to the referrer's
    /// score as one indivisible operation, guarded by
    /// `referral_credited = false`. `None` means no row was affected.
    async fn credit_referral(
        &self,
        referred_id: i64,
        bonus: i32,
    ) -> Result<Option<CreditReceipt>, anyhow::Error>;

    async fn top_by_score(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, anyhow::Error>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn list_active_required(&self) -> Result<Vec<RequiredChannel>, anyhow::Error>;

    async fn record_memberships(&self, records: &[MembershipRecord]) -> Result<(), anyhow::Error>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatisticsStore: Send + Sync {
    async fn compute_aggregates(&self) -> Result<Aggregates, anyhow::Error>;

    async fn upsert_snapshot(
        &self,
        snapshot: &StatisticsSnapshot,
    ) -> Result<StatisticsSnapshot, anyhow::Error>;

    async fn get_snapshot(&self, date: NaiveDate)
        -> Result<Option<StatisticsSnapshot>, anyhow::Error>;
}

/// Store handles injected into the services.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub channels: Arc<dyn ChannelStore>,
    pub statistics: Arc<dyn StatisticsStore>,
}

impl Stores {
    pub fn postgres(conn: PgPool) -> Self {
        Self {
            users: Arc::new(users::PgUserRepository::new(conn.clone())),
            channels: Arc::new(channels::PgChannelRepository::new(conn.clone())),
            statistics: Arc::new(statistics::PgStatisticsRepository::new(conn)),
        }
    }

    pub fn memory(store: memory::MemoryStore) -> Self {
        Self {
            users: Arc::new(store.clone()),
            channels: Arc::new(store.clone()),
            statistics: Arc::new(store),
        }
    }
}
