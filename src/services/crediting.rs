//! Verification-gated referral crediting.
//!
//! A referred user's bonus flows to the referrer at most once. The guarantee
//! rests entirely on `UserStore::credit_referral`, which flips
//! `referral_credited` and bumps the referrer's score in one conditional
//! write; no in-process lock is taken, so any number of concurrent attempts
//! for the same user produce a single `Credited`.

use std::sync::Arc;

use serde::Serialize;

use super::membership::MembershipVerifier;
use super::ServiceError;
use crate::models::{
    channels::RequiredChannel,
    users::{CreditReceipt, User},
};
use crate::repositories::{ChannelStore, UserStore};

pub const DEFAULT_BONUS: i32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditOutcome {
    Credited,
    AlreadyCredited,
    NotEligible,
    NoReferrer,
}

#[derive(Clone, Debug, Serialize)]
pub struct CreditAttempt {
    pub outcome: CreditOutcome,
    /// Channels the user still has to join; empty once verified.
    pub unmet: Vec<RequiredChannel>,
    pub receipt: Option<CreditReceipt>,
}

impl CreditAttempt {
    pub fn verified(&self) -> bool {
        self.outcome != CreditOutcome::NotEligible
    }
}

#[derive(Clone)]
pub struct CreditingEngine {
    users: Arc<dyn UserStore>,
    channels: Arc<dyn ChannelStore>,
    verifier: MembershipVerifier,
    bonus: i32,
}

impl CreditingEngine {
    pub fn new(
        users: Arc<dyn UserStore>,
        channels: Arc<dyn ChannelStore>,
        verifier: MembershipVerifier,
        bonus: i32,
    ) -> Self {
        Self {
            users,
            channels,
            verifier,
            bonus,
        }
    }

    pub async fn attempt_credit(&self, referred: &User) -> Result<CreditOutcome, ServiceError> {
        Ok(self.evaluate(referred).await?.outcome)
    }

    /// Verifies `referred` against the active required channels and, when
    /// every one is satisfied, credits the referrer if that has not happened
    /// yet.
    pub async fn evaluate(&self, referred: &User) -> Result<CreditAttempt, ServiceError> {
        let channels = self
            .channels
            .list_active_required()
            .await
            .map_err(|e| ServiceError::Repository("CreditingEngine".to_string(), e.to_string()))?;

        let verification = self.verifier.verify(referred, &channels).await;
        self.record_memberships(referred, &verification).await;

        if !verification.all_satisfied {
            log::debug!(
                "User {} still misses {} channel(s).",
                referred.external_id,
                verification.unmet.len()
            );
            return Ok(CreditAttempt {
                outcome: CreditOutcome::NotEligible,
                unmet: verification.unmet,
                receipt: None,
            });
        }

        if !referred.has_foreign_referrer() {
            return Ok(CreditAttempt {
                outcome: CreditOutcome::NoReferrer,
                unmet: Vec::new(),
                receipt: None,
            });
        }

        if referred.referral_credited {
            return Ok(CreditAttempt {
                outcome: CreditOutcome::AlreadyCredited,
                unmet: Vec::new(),
                receipt: None,
            });
        }

        let receipt = self
            .users
            .credit_referral(referred.id, self.bonus)
            .await
            .map_err(|e| {
                log::error!(
                    "Referral credit for user {} failed: {}",
                    referred.external_id,
                    e
                );
                ServiceError::Database(e.to_string())
            })?;

        let outcome = match receipt {
            Some(receipt) => {
                log::info!(
                    "Referral bonus of {} credited to user id {} (score {}) for user {}.",
                    self.bonus,
                    receipt.referrer_id,
                    receipt.referrer_score,
                    referred.external_id
                );
                CreditOutcome::Credited
            }
            None => {
                log::info!(
                    "Referral for user {} was already credited.",
                    referred.external_id
                );
                CreditOutcome::AlreadyCredited
            }
        };

        Ok(CreditAttempt {
            outcome,
            unmet: Vec::new(),
            receipt,
        })
    }

    async fn record_memberships(
        &self,
        user: &User,
        verification: &super::membership::Verification,
    ) {
        if verification.checks.is_empty() {
            return;
        }

        let records = verification.membership_records(user.id, chrono::Utc::now().naive_utc());
        if let Err(e) = self.channels.record_memberships(&records).await {
            log::warn!(
                "Could not record memberships for user {}: {}",
                user.external_id,
                e
            );
        }
    }
}
