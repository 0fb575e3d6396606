use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, sqlx::FromRow)]
pub struct Aggregates {
    pub total_users: i64,
    pub active_users: i64,
    pub total_subscriptions: i64,
    pub total_score: i64,
    pub credited_referrals: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, sqlx::FromRow)]
pub struct StatisticsSnapshot {
    pub date: chrono::NaiveDate,
    pub total_users: i64,
    pub active_users: i64,
    pub total_subscriptions: i64,
    pub total_score: i64,
    pub credited_referrals: i64,
}

impl StatisticsSnapshot {
    pub fn new(date: chrono::NaiveDate, aggregates: &Aggregates) -> Self {
        Self {
            date,
            total_users: aggregates.total_users,
            active_users: aggregates.active_users,
            total_subscriptions: aggregates.total_subscriptions,
            total_score: aggregates.total_score,
            credited_referrals: aggregates.credited_referrals,
        }
    }

    pub fn aggregates(&self) -> Aggregates {
        Aggregates {
            total_users: self.total_users,
            active_users: self.active_users,
            total_subscriptions: self.total_subscriptions,
            total_score: self.total_score,
            credited_referrals: self.credited_referrals,
        }
    }
}
