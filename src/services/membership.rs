//! Channel membership checks. Queries never mutate anything, and every
//! inconclusive answer counts as "not subscribed".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;

use crate::models::{
    channels::{MemberStatus, MembershipRecord, RequiredChannel},
    users::User,
};

pub mod telegram;

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("Membership query timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Platform error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("Malformed response: {0}")]
    Malformed(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipProvider: Send + Sync {
    async fn get_membership_status(
        &self,
        channel_ref: &str,
        user_external_id: i64,
    ) -> Result<MemberStatus, MembershipError>;
}

#[derive(Clone, Debug, Serialize)]
pub struct ChannelCheck {
    pub channel: RequiredChannel,
    /// `None` when the query failed.
    pub status: Option<MemberStatus>,
}

impl ChannelCheck {
    pub fn is_satisfied(&self) -> bool {
        self.status.is_some_and(|s| s.is_satisfied())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Verification {
    pub all_satisfied: bool,
    pub unmet: Vec<RequiredChannel>,
    pub checks: Vec<ChannelCheck>,
}

impl Verification {
    pub fn membership_records(
        &self,
        user_id: i64,
        checked_at: chrono::NaiveDateTime,
    ) -> Vec<MembershipRecord> {
        self.checks
            .iter()
            .map(|check| MembershipRecord {
                user_id,
                channel_id: check.channel.id,
                subscribed: check.is_satisfied(),
                checked_at,
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct MembershipVerifier {
    provider: Arc<dyn MembershipProvider>,
    timeout: Duration,
}

impl MembershipVerifier {
    pub fn new(provider: Arc<dyn MembershipProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Checks `user` against every active required channel in `channels`.
    /// Inactive or optional channels are skipped, so an empty gating set is
    /// trivially satisfied.
    pub async fn verify(&self, user: &User, channels: &[RequiredChannel]) -> Verification {
        let gating: Vec<&RequiredChannel> = channels.iter().filter(|c| c.is_gating()).collect();

        let results = join_all(
            gating
                .iter()
                .map(|channel| self.query(channel, user.external_id)),
        )
        .await;

        let mut checks = Vec::with_capacity(gating.len());
        for (channel, result) in gating.into_iter().zip(results) {
            let status = match result {
                Ok(status) => Some(status),
                Err(e) => {
                    log::warn!(
                        "Membership check failed for user {} in {}: {}",
                        user.external_id,
                        channel.handle(),
                        e
                    );
                    None
                }
            };

            checks.push(ChannelCheck {
                channel: channel.clone(),
                status,
            });
        }

        let unmet: Vec<RequiredChannel> = checks
            .iter()
            .filter(|check| !check.is_satisfied())
            .map(|check| check.channel.clone())
            .collect();

        Verification {
            all_satisfied: unmet.is_empty(),
            unmet,
            checks,
        }
    }

    async fn query(
        &self,
        channel: &RequiredChannel,
        user_external_id: i64,
    ) -> Result<MemberStatus, MembershipError> {
        let handle = channel.handle();

        match tokio::time::timeout(
            self.timeout,
            self.provider
                .get_membership_status(&handle, user_external_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(MembershipError::Timeout(self.timeout)),
        }
    }
}
