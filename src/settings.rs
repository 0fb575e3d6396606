use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct Telegram {
    pub api_url: String,
    pub bot_token: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct Referral {
    pub bonus_amount: i32,
    pub leaderboard_size: i64,
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub listen: String,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

/// Channel seeded into the in-memory store at startup.
#[derive(Debug, Deserialize)]
pub struct ChannelSeed {
    pub title: String,
    pub url: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct Storage {
    pub backend: StorageBackend,
    #[serde(default)]
    pub channels: Vec<ChannelSeed>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub postgres: Postgres,
    pub telegram: Telegram,
    pub referral: Referral,
    pub http: Http,
    pub storage: Storage,
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("postgres.url", "postgres://localhost/referrals")?
            .set_default("postgres.max_connections", 5)?
            .set_default("telegram.api_url", "https://api.telegram.org")?
            .set_default("telegram.bot_token", "")?
            .set_default("telegram.request_timeout_ms", 5000)?
            .set_default("referral.bonus_amount", 10)?
            .set_default("referral.leaderboard_size", 20)?
            .set_default("http.listen", "0.0.0.0:8080")?
            .set_default("storage.backend", "postgres")?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("REFERRAL").separator("__"))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        if settings.referral.bonus_amount <= 0 {
            return Err(ConfigError::Message(format!(
                "referral.bonus_amount must be positive, got {}",
                settings.referral.bonus_amount
            )));
        }

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_a_file() {
        let settings = Settings::new("does-not-exist.toml").unwrap();

        assert_eq!(settings.referral.bonus_amount, 10);
        assert_eq!(settings.referral.leaderboard_size, 20);
        assert_eq!(settings.telegram.request_timeout_ms, 5000);
        assert_eq!(settings.storage.backend, StorageBackend::Postgres);
        assert!(settings.storage.channels.is_empty());
    }

    #[test]
    fn non_positive_bonus_is_rejected() {
        for (name, bonus) in [("zero", 0), ("negative", -5)] {
            let path = std::env::temp_dir().join(format!("referral-{}-bonus.toml", name));
            std::fs::write(&path, format!("[referral]\nbonus_amount = {}\n", bonus)).unwrap();

            let result = Settings::new(path.to_str().unwrap());
            std::fs::remove_file(&path).unwrap();

            assert!(matches!(result, Err(ConfigError::Message(_))));
        }
    }
}
