//! In-process store. Every mutation happens under one write guard, which gives
//! the same all-or-nothing behaviour the PostgreSQL statements provide.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::RwLock;

use super::{ChannelStore, StatisticsStore, UserStore};
use crate::models::{
    channels::{MembershipRecord, RequiredChannel},
    statistics::{Aggregates, StatisticsSnapshot},
    users::{CreditReceipt, LeaderboardEntry, NewUser, Registration, User},
};

#[derive(Default)]
struct MemoryState {
    users: BTreeMap<i64, User>,
    next_user_id: i64,
    channels: Vec<RequiredChannel>,
    next_channel_id: i64,
    memberships: HashMap<(i64, i64), MembershipRecord>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    snapshots: Arc<DashMap<NaiveDate, StatisticsSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_channel(&self, title: &str, url: &str, required: bool) -> RequiredChannel {
        let mut state = self.state.write().await;
        state.next_channel_id += 1;

        let channel = RequiredChannel {
            id: state.next_channel_id,
            title: title.to_string(),
            url: url.to_string(),
            required,
            active: true,
        };
        state.channels.push(channel.clone());

        channel
    }

    pub async fn set_channel_active(&self, channel_id: i64, active: bool) {
        let mut state = self.state.write().await;
        if let Some(channel) = state.channels.iter_mut().find(|c| c.id == channel_id) {
            channel.active = active;
        }
    }

    pub async fn set_user_active(&self, user_id: i64, active: bool) {
        let mut state = self.state.write().await;
        if let Some(user) = state.users.get_mut(&user_id) {
            user.active = active;
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, anyhow::Error> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_by_external_id(&self, external_id: i64) -> Result<Option<User>, anyhow::Error> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.external_id == external_id)
            .cloned())
    }

    async fn find_by_referral_code(&self, code: &str) -> Result<Option<User>, anyhow::Error> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.referral_code == code)
            .cloned())
    }

    async fn insert_user(&self, new_user: &NewUser) -> Result<Registration, anyhow::Error> {
        let mut state = self.state.write().await;

        if let Some(user) = state
            .users
            .values()
            .find(|u| u.external_id == new_user.external_id)
        {
            return Ok(Registration {
                user: user.clone(),
                created: false,
            });
        }

        let referral_code = new_user.referral_code();
        if state.users.values().any(|u| u.referral_code == referral_code) {
            anyhow::bail!("Referral code {} already issued", referral_code);
        }

        state.next_user_id += 1;
        let user = User {
            id: state.next_user_id,
            external_id: new_user.external_id,
            display_name: new_user.display_name.clone(),
            username: new_user.username.clone(),
            score: 0,
            referral_code,
            referred_by: None,
            referral_credited: false,
            active: true,
            created_at: chrono::Utc::now().naive_utc(),
        };
        state.users.insert(user.id, user.clone());

        Ok(Registration {
            user,
            created: true,
        })
    }

    async fn set_referrer_if_unset(
        &self,
        user_id: i64,
        referrer_id: i64,
    ) -> Result<bool, anyhow::Error> {
        let mut state = self.state.write().await;

        if user_id == referrer_id || !state.users.contains_key(&referrer_id) {
            return Ok(false);
        }

        match state.users.get_mut(&user_id) {
            Some(user) if user.referred_by.is_none() => {
                user.referred_by = Some(referrer_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn credit_referral(
        &self,
        referred_id: i64,
        bonus: i32,
    ) -> Result<Option<CreditReceipt>, anyhow::Error> {
        let mut state = self.state.write().await;

        let referrer_id = match state.users.get(&referred_id) {
            Some(user) if !user.referral_credited => match user.referred_by {
                Some(referrer_id) if referrer_id != referred_id => referrer_id,
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };

        // Check both rows before touching either so a failure leaves no trace.
        let new_score = match state.users.get(&referrer_id) {
            Some(referrer) => referrer
                .score
                .checked_add(bonus)
                .ok_or_else(|| anyhow::anyhow!("Score overflow for user {}", referrer_id))?,
            None => return Ok(None),
        };

        if let Some(referrer) = state.users.get_mut(&referrer_id) {
            referrer.score = new_score;
        }
        if let Some(referred) = state.users.get_mut(&referred_id) {
            referred.referral_credited = true;
        }

        Ok(Some(CreditReceipt {
            referrer_id,
            referrer_score: new_score,
        }))
    }

    async fn top_by_score(&self, limit: i64) -> Result<Vec<LeaderboardEntry>, anyhow::Error> {
        let state = self.state.read().await;

        let mut active: Vec<&User> = state.users.values().filter(|u| u.active).collect();
        active.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });

        Ok(active
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|u| LeaderboardEntry {
                display_name: u.display_name.clone(),
                score: u.score,
                external_id: u.external_id,
            })
            .collect())
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn list_active_required(&self) -> Result<Vec<RequiredChannel>, anyhow::Error> {
        let state = self.state.read().await;

        let mut channels: Vec<RequiredChannel> = state
            .channels
            .iter()
            .filter(|c| c.is_gating())
            .cloned()
            .collect();
        channels.sort_by(|a, b| a.title.cmp(&b.title));

        Ok(channels)
    }

    async fn record_memberships(&self, records: &[MembershipRecord]) -> Result<(), anyhow::Error> {
        let mut state = self.state.write().await;

        for record in records {
            state
                .memberships
                .insert((record.user_id, record.channel_id), record.clone());
        }

        Ok(())
    }
}

#[async_trait]
impl StatisticsStore for MemoryStore {
    async fn compute_aggregates(&self) -> Result<Aggregates, anyhow::Error> {
        let state = self.state.read().await;

        let users = || state.users.values();

        Ok(Aggregates {
            total_users: users().count() as i64,
            active_users: users().filter(|u| u.active).count() as i64,
            total_subscriptions: state.memberships.values().filter(|m| m.subscribed).count()
                as i64,
            total_score: users().map(|u| i64::from(u.score)).sum(),
            credited_referrals: users().filter(|u| u.referral_credited).count() as i64,
        })
    }

    async fn upsert_snapshot(
        &self,
        snapshot: &StatisticsSnapshot,
    ) -> Result<StatisticsSnapshot, anyhow::Error> {
        self.snapshots.insert(snapshot.date, snapshot.clone());
        Ok(snapshot.clone())
    }

    async fn get_snapshot(&self, date: NaiveDate) -> Result<Option<StatisticsSnapshot>, anyhow::Error> {
        Ok(self.snapshots.get(&date).map(|s| s.value().clone()))
    }
}
