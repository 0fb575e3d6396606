use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize, sqlx::FromRow, PartialEq, Eq)]
pub struct RequiredChannel {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub required: bool,
    pub active: bool,
}

impl RequiredChannel {
    /// Chat reference passed to the messaging platform.
    pub fn handle(&self) -> String {
        channel_handle(&self.url)
    }

    pub fn is_gating(&self) -> bool {
        self.required && self.active
    }
}

/// Turns a channel link (`https://t.me/name`, `t.me/name`, `@name`) into the
/// `@name` handle the Bot API expects. Numeric chat ids are passed through.
pub fn channel_handle(url: &str) -> String {
    let path = match url.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or("", |(_, path)| path),
        None => match url.split_once('/') {
            Some((host, path)) if host.contains('.') => path,
            _ => url,
        },
    };
    let path = path
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_matches('/');

    if path.starts_with('@') || path.parse::<i64>().is_ok() {
        path.to_string()
    } else {
        format!("@{}", path)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Member,
    Administrator,
    Owner,
    Left,
    Kicked,
    UnknownError,
}

impl MemberStatus {
    pub fn is_satisfied(&self) -> bool {
        matches!(
            self,
            MemberStatus::Member | MemberStatus::Administrator | MemberStatus::Owner
        )
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow, PartialEq, Eq)]
pub struct MembershipRecord {
    pub user_id: i64,
    pub channel_id: i64,
    pub subscribed: bool,
    pub checked_at: chrono::NaiveDateTime,
}

#[cfg(test)]
pub(crate) fn sample_channel(id: i64, name: &str) -> RequiredChannel {
    RequiredChannel {
        id,
        title: format!("Channel {}", name),
        url: format!("https://t.me/{}", name),
        required: true,
        active: true,
    }
}
