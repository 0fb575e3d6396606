use crate::models::statistics;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;

use super::StatisticsStore;

#[derive(Clone)]
pub struct PgStatisticsRepository {
    conn: PgPool,
}

impl PgStatisticsRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StatisticsStore for PgStatisticsRepository {
    async fn compute_aggregates(&self) -> Result<statistics::Aggregates, anyhow::Error> {
        let aggregates = sqlx::query_as::<_, statistics::Aggregates>(
            r#"
                SELECT
                    (SELECT COUNT(*) FROM users) AS total_users,
                    (SELECT COUNT(*) FROM users WHERE active) AS active_users,
                    (SELECT COUNT(*) FROM channel_memberships WHERE subscribed) AS total_subscriptions,
                    (SELECT COALESCE(SUM(score), 0)::BIGINT FROM users) AS total_score,
                    (SELECT COUNT(*) FROM users WHERE referral_credited) AS credited_referrals
            "#,
        )
        .fetch_one(&self.conn)
        .await?;

        Ok(aggregates)
    }

    async fn upsert_snapshot(
        &self,
        snapshot: &statistics::StatisticsSnapshot,
    ) -> Result<statistics::StatisticsSnapshot, anyhow::Error> {
        let stored = sqlx::query_as::<_, statistics::StatisticsSnapshot>(
            r#"
                INSERT INTO statistics_snapshots
                (date, total_users, active_users, total_subscriptions, total_score, credited_referrals)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (date) DO UPDATE SET
                    total_users = EXCLUDED.total_users,
                    active_users = EXCLUDED.active_users,
                    total_subscriptions = EXCLUDED.total_subscriptions,
                    total_score = EXCLUDED.total_score,
                    credited_referrals = EXCLUDED.credited_referrals
                RETURNING date, total_users, active_users, total_subscriptions, total_score, credited_referrals
            "#,
        )
        .bind(snapshot.date)
        .bind(snapshot.total_users)
        .bind(snapshot.active_users)
        .bind(snapshot.total_subscriptions)
        .bind(snapshot.total_score)
        .bind(snapshot.credited_referrals)
        .fetch_one(&self.conn)
        .await?;

        Ok(stored)
    }

    async fn get_snapshot(
        &self,
        date: NaiveDate,
    ) -> Result<Option<statistics::StatisticsSnapshot>, anyhow::Error> {
        let snapshot = sqlx::query_as::<_, statistics::StatisticsSnapshot>(
            r#"
                SELECT date, total_users, active_users, total_subscriptions, total_score, credited_referrals
                FROM statistics_snapshots
                WHERE date = $1
            "#,
        )
        .bind(date)
        .fetch_optional(&self.conn)
        .await?;

        Ok(snapshot)
    }
}
