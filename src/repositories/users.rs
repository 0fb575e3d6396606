use crate::models::users;

use async_trait::async_trait;
use sqlx::PgPool;

use super::UserStore;

const USER_COLUMNS: &str = "id, external_id, display_name, username, score, referral_code, \
     referred_by, referral_credited, active, created_at";

#[derive(Clone)]
pub struct PgUserRepository {
    conn: PgPool,
}

impl PgUserRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl UserStore for PgUserRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<users::User>, anyhow::Error> {
        let user = sqlx::query_as::<_, users::User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(user)
    }

    async fn find_by_external_id(
        &self,
        external_id: i64,
    ) -> Result<Option<users::User>, anyhow::Error> {
        let user = sqlx::query_as::<_, users::User>(&format!(
            "SELECT {} FROM users WHERE external_id = $1",
            USER_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(user)
    }

    async fn find_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<users::User>, anyhow::Error> {
        let user = sqlx::query_as::<_, users::User>(&format!(
            "SELECT {} FROM users WHERE referral_code = $1",
            USER_COLUMNS
        ))
        .bind(code)
        .fetch_optional(&self.conn)
        .await?;

        Ok(user)
    }

    async fn insert_user(
        &self,
        new_user: &users::NewUser,
    ) -> Result<users::Registration, anyhow::Error> {
        let inserted = sqlx::query_as::<_, users::User>(&format!(
            r#"
                INSERT INTO users (external_id, display_name, username, referral_code)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (external_id) DO NOTHING
                RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(new_user.external_id)
        .bind(&new_user.display_name)
        .bind(&new_user.username)
        .bind(new_user.referral_code())
        .fetch_optional(&self.conn)
        .await?;

        if let Some(user) = inserted {
            return Ok(users::Registration {
                user,
                created: true,
            });
        }

        // Lost the insert race to another session for the same external id.
        match self.find_by_external_id(new_user.external_id).await? {
            Some(user) => Ok(users::Registration {
                user,
                created: false,
            }),
            None => anyhow::bail!(
                "User {} neither inserted nor found",
                new_user.external_id
            ),
        }
    }

    async fn set_referrer_if_unset(
        &self,
        user_id: i64,
        referrer_id: i64,
    ) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            r#"
                UPDATE users
                SET referred_by = $2
                WHERE id = $1 AND referred_by IS NULL AND id <> $2
            "#,
        )
        .bind(user_id)
        .bind(referrer_id)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn credit_referral(
        &self,
        referred_id: i64,
        bonus: i32,
    ) -> Result<Option<users::CreditReceipt>, anyhow::Error> {
        // One statement: the flag flip and the score bump commit together or
        // not at all, and a concurrent second attempt re-checks the flag after
        // waiting on the row lock and matches nothing.
        let receipt = sqlx::query_as::<_, users::CreditReceipt>(
            r#"
                WITH credited AS (
                    UPDATE users
                    SET referral_credited = TRUE
                    WHERE id = $1
                      AND referral_credited = FALSE
                      AND referred_by IS NOT NULL
                      AND referred_by <> id
                    RETURNING referred_by
                )
                UPDATE users
                SET score = users.score + $2
                FROM credited
                WHERE users.id = credited.referred_by
                RETURNING users.id AS referrer_id, users.score AS referrer_score
            "#,
        )
        .bind(referred_id)
        .bind(bonus)
        .fetch_optional(&self.conn)
        .await?;

        Ok(receipt)
    }

    async fn top_by_score(
        &self,
        limit: i64,
    ) -> Result<Vec<users::LeaderboardEntry>, anyhow::Error> {
        let entries = sqlx::query_as::<_, users::LeaderboardEntry>(
            r#"
                SELECT display_name, score, external_id
                FROM users
                WHERE active
                ORDER BY score DESC, created_at ASC
                LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.conn)
        .await?;

        Ok(entries)
    }
}
