use crate::models::channels;

use async_trait::async_trait;
use sqlx::PgPool;

use super::ChannelStore;

#[derive(Clone)]
pub struct PgChannelRepository {
    conn: PgPool,
}

impl PgChannelRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ChannelStore for PgChannelRepository {
    async fn list_active_required(
        &self,
    ) -> Result<Vec<channels::RequiredChannel>, anyhow::Error> {
        let channels = sqlx::query_as::<_, channels::RequiredChannel>(
            r#"
                SELECT id, title, url, required, active
                FROM required_channels
                WHERE active AND required
                ORDER BY title
            "#,
        )
        .fetch_all(&self.conn)
        .await?;

        Ok(channels)
    }

    async fn record_memberships(
        &self,
        records: &[channels::MembershipRecord],
    ) -> Result<(), anyhow::Error> {
        let mut tx = self.conn.begin().await?;

        for record in records {
            sqlx::query(
                r#"
                    INSERT INTO channel_memberships (user_id, channel_id, subscribed, checked_at)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (user_id, channel_id) DO UPDATE
                    SET subscribed = EXCLUDED.subscribed, checked_at = EXCLUDED.checked_at
                "#,
            )
            .bind(record.user_id)
            .bind(record.channel_id)
            .bind(record.subscribed)
            .bind(record.checked_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }
}
