use async_trait::async_trait;

use super::{MembershipError, MembershipProvider};
use crate::models::channels::MemberStatus;

/// Bot API client used only for `getChatMember`.
pub struct TelegramMembershipProvider {
    api_url: String,
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramMembershipProvider {
    pub fn new(api_url: String, bot_token: String) -> Self {
        Self {
            api_url,
            bot_token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MembershipProvider for TelegramMembershipProvider {
    async fn get_membership_status(
        &self,
        channel_ref: &str,
        user_external_id: i64,
    ) -> Result<MemberStatus, MembershipError> {
        let response: serde_json::Value = self
            .client
            .get(format!(
                "{}/bot{}/getChatMember",
                self.api_url.trim_end_matches('/'),
                self.bot_token
            ))
            .query(&[
                ("chat_id", channel_ref.to_string()),
                ("user_id", user_external_id.to_string()),
            ])
            .send()
            .await
            .map_err(|e| MembershipError::Transport(e.without_url().to_string()))?
            .json()
            .await
            .map_err(|e| MembershipError::Malformed(e.without_url().to_string()))?;

        parse_chat_member(&response)
    }
}

pub(crate) fn parse_chat_member(
    response: &serde_json::Value,
) -> Result<MemberStatus, MembershipError> {
    if response["ok"].as_bool() != Some(true) {
        return Err(MembershipError::Api {
            code: response["error_code"].as_i64().unwrap_or_default(),
            description: response["description"]
                .as_str()
                .unwrap_or("no description")
                .to_string(),
        });
    }

    let member = &response["result"];
    let status = match member["status"].as_str() {
        Some("creator") => MemberStatus::Owner,
        Some("administrator") => MemberStatus::Administrator,
        Some("member") => MemberStatus::Member,
        // Restricted users who are still in the chat count as subscribed.
        Some("restricted") if member["is_member"].as_bool() == Some(true) => MemberStatus::Member,
        Some("restricted") | Some("left") => MemberStatus::Left,
        Some("kicked") => MemberStatus::Kicked,
        Some(_) => MemberStatus::UnknownError,
        None => {
            return Err(MembershipError::Malformed(
                "Missing chat member status".to_string(),
            ))
        }
    };

    Ok(status)
}
