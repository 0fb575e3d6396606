use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub external_id: i64,
    pub display_name: String,
    pub username: Option<String>,
    pub score: i32,
    pub referral_code: String,
    pub referred_by: Option<i64>,
    pub referral_credited: bool,
    pub active: bool,
    pub created_at: chrono::NaiveDateTime,
}

impl User {
    /// Referral codes are the external id rendered as text, so two users can
    /// never be issued the same code and no allocation round-trip is needed.
    pub fn referral_code_for(external_id: i64) -> String {
        external_id.to_string()
    }

    /// Start argument to put in the invite deep link.
    pub fn invite_payload(&self) -> &str {
        &self.referral_code
    }

    pub fn has_foreign_referrer(&self) -> bool {
        matches!(self.referred_by, Some(referrer) if referrer != self.id)
    }

    pub fn referral_state(&self, verified: bool) -> ReferralState {
        if !self.has_foreign_referrer() {
            ReferralState::NotApplicable
        } else if self.referral_credited {
            ReferralState::Credited
        } else if verified {
            ReferralState::Verified
        } else {
            ReferralState::Pending
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewUser {
    pub external_id: i64,
    pub display_name: String,
    pub username: Option<String>,
}

impl NewUser {
    pub fn referral_code(&self) -> String {
        User::referral_code_for(self.external_id)
    }
}

/// Result of `resolve_or_create`: the user plus whether this call inserted it.
#[derive(Clone, Debug, Serialize)]
pub struct Registration {
    pub user: User,
    pub created: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralState {
    Pending,
    Verified,
    Credited,
    NotApplicable,
}

/// Rows touched by a successful referral credit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CreditReceipt {
    pub referrer_id: i64,
    pub referrer_score: i32,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct LeaderboardEntry {
    pub display_name: String,
    pub score: i32,
    pub external_id: i64,
}

#[cfg(test)]
pub(crate) fn sample_user(id: i64, external_id: i64) -> User {
    User {
        id,
        external_id,
        display_name: format!("user {}", external_id),
        username: None,
        score: 0,
        referral_code: User::referral_code_for(external_id),
        referred_by: None,
        referral_credited: false,
        active: true,
        created_at: chrono::Utc::now().naive_utc(),
    }
}
