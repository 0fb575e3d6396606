use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::repositories::Stores;
use crate::settings::Settings;

pub mod crediting;
pub mod http;
pub mod membership;
pub mod referrals;
pub mod registry;
pub mod statistics;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Repository error: {0} - {1}")]
    Repository(String, String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Wires the components over the given stores.
pub fn build_handler(stores: &Stores, settings: &Settings) -> referrals::ReferralRequestHandler {
    let provider = Arc::new(membership::telegram::TelegramMembershipProvider::new(
        settings.telegram.api_url.clone(),
        settings.telegram.bot_token.clone(),
    ));
    let verifier = membership::MembershipVerifier::new(
        provider,
        Duration::from_millis(settings.telegram.request_timeout_ms),
    );

    referrals::ReferralRequestHandler::new(
        registry::UserRegistry::new(stores.users.clone()),
        crediting::CreditingEngine::new(
            stores.users.clone(),
            stores.channels.clone(),
            verifier,
            settings.referral.bonus_amount,
        ),
        statistics::Snapshotter::new(stores.statistics.clone()),
        settings.referral.leaderboard_size,
    )
}

pub async fn start_services(stores: Stores, settings: Settings) -> Result<(), anyhow::Error> {
    let (referral_tx, mut referral_rx) = mpsc::channel(512);

    let handler = build_handler(&stores, &settings);
    let mut referral_service = referrals::ReferralService::new();

    log::info!("Starting referral service.");
    tokio::spawn(async move {
        referral_service.run(handler, &mut referral_rx).await;
    });

    log::info!("Starting HTTP server on {}.", settings.http.listen);
    http::start_http_server(&settings.http.listen, referral_tx).await?;

    Ok(())
}
