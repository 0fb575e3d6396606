use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::{referrals::ReferralRequest, ServiceError};

mod referrals;

#[derive(Clone)]
pub(crate) struct AppState {
    referral_channel: mpsc::Sender<ReferralRequest>,
}

type HttpError = (StatusCode, Json<Value>);

impl AppState {
    /// Sends a request to the referral service and waits for its answer.
    async fn ask<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, ServiceError>>) -> ReferralRequest,
    ) -> Result<T, HttpError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.referral_channel
            .send(build(response_tx))
            .await
            .map_err(|e| internal_error("Failed to process request", e))?;

        match response_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(service_error)) => Err(service_error_response(service_error)),
            Err(e) => Err(internal_error("Failed to receive response", e)),
        }
    }
}

fn internal_error(context: &str, e: impl std::fmt::Display) -> HttpError {
    log::error!("{}: {}", context, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal server error", "details": format!("{}: {}", context, e)})),
    )
}

fn service_error_response(service_error: ServiceError) -> HttpError {
    let status = match &service_error {
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ServiceError::Database(_) | ServiceError::Repository(_, _) => {
            log::error!("Service error: {}", service_error);
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    (
        status,
        Json(json!({"error": service_error.to_string()})),
    )
}

pub(crate) fn router(referral_channel: mpsc::Sender<ReferralRequest>) -> Router {
    let app_state = AppState { referral_channel };

    Router::new()
        .route("/sessions/start", post(referrals::start_session))
        .route(
            "/sessions/{external_id}/check",
            post(referrals::check_subscription),
        )
        .route("/users/{external_id}", get(referrals::get_user))
        .route("/leaderboard", get(referrals::leaderboard))
        .route("/statistics/refresh", post(referrals::refresh_statistics))
        .route("/statistics/{date}", get(referrals::get_statistics))
        .route("/health", get(|| async { "OK" }))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(
    listen: &str,
    referral_channel: mpsc::Sender<ReferralRequest>,
) -> Result<(), anyhow::Error> {
    let app = router(referral_channel);

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::models::channels::MemberStatus;
    use crate::repositories::{memory::MemoryStore, Stores};
    use crate::services::crediting::{CreditingEngine, DEFAULT_BONUS};
    use crate::services::membership::{MembershipVerifier, MockMembershipProvider};
    use crate::services::referrals::{ReferralRequestHandler, ReferralService};
    use crate::services::registry::UserRegistry;
    use crate::services::statistics::Snapshotter;
    use crate::services::Service;

    async fn app() -> Router {
        let store = MemoryStore::new();
        store.add_channel("News", "https://t.me/news", true).await;
        let stores = Stores::memory(store);

        let mut provider = MockMembershipProvider::new();
        provider
            .expect_get_membership_status()
            .returning(|_, _| Ok(MemberStatus::Member));

        let handler = ReferralRequestHandler::new(
            UserRegistry::new(stores.users.clone()),
            CreditingEngine::new(
                stores.users.clone(),
                stores.channels.clone(),
                MembershipVerifier::new(Arc::new(provider), Duration::from_millis(200)),
                DEFAULT_BONUS,
            ),
            Snapshotter::new(stores.statistics.clone()),
            20,
        );

        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(async move {
            ReferralService::new().run(handler, &mut rx).await;
        });

        router(tx)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);

        (status, value)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn start_then_credit_over_http() {
        let app = app().await;

        let (status, _) = send(
            &app,
            post_json(
                "/sessions/start",
                json!({"external_id": 100, "display_name": "A"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &app,
            post_json(
                "/sessions/start",
                json!({"external_id": 200, "display_name": "B", "referral_code": "100"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["outcome"], "credited");

        let (status, body) = send(
            &app,
            Request::post("/sessions/200/check").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "already_credited");

        let (status, body) = send(
            &app,
            Request::get("/users/100").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["score"], 10);
        assert_eq!(body["invite_payload"], "100");
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let app = app().await;

        let (status, _) = send(
            &app,
            Request::post("/sessions/404/check").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Request::get("/users/404").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn statistics_refresh_and_read_back() {
        let app = app().await;

        let (status, body) = send(
            &app,
            Request::post("/statistics/refresh?date=2025-03-01")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_users"], 0);

        let (status, body) = send(
            &app,
            Request::get("/statistics/2025-03-01").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["date"], "2025-03-01");

        let (status, _) = send(
            &app,
            Request::get("/statistics/2025-03-02").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn zero_leaderboard_limit_is_rejected() {
        let app = app().await;

        let (status, _) = send(
            &app,
            Request::get("/leaderboard?limit=0").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
