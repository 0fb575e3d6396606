use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use super::{AppState, HttpError};
use crate::services::referrals::ReferralRequest;

#[derive(Deserialize)]
pub struct StartSession {
    pub external_id: i64,
    pub display_name: String,
    pub username: Option<String>,
    pub referral_code: Option<String>,
}

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct RefreshStatistics {
    pub date: Option<NaiveDate>,
}

pub(crate) async fn start_session(
    State(state): State<AppState>,
    Json(req): Json<StartSession>,
) -> Result<impl IntoResponse, HttpError> {
    let report = state
        .ask(|response| ReferralRequest::Start {
            external_id: req.external_id,
            display_name: req.display_name,
            username: req.username,
            referral_code: req.referral_code,
            response,
        })
        .await?;

    let status = if report.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(json!(report))))
}

pub(crate) async fn check_subscription(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> Result<impl IntoResponse, HttpError> {
    let report = state
        .ask(|response| ReferralRequest::CheckSubscription {
            external_id,
            response,
        })
        .await?;

    Ok((StatusCode::OK, Json(json!(report))))
}

pub(crate) async fn get_user(
    State(state): State<AppState>,
    Path(external_id): Path<i64>,
) -> Result<impl IntoResponse, HttpError> {
    let user = state
        .ask(|response| ReferralRequest::GetUser {
            external_id,
            response,
        })
        .await?;

    match user {
        Some(user) => Ok((
            StatusCode::OK,
            Json(json!({
                "user": user,
                "invite_payload": user.invite_payload(),
            })),
        )),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("User {} not found", external_id)})),
        )),
    }
}

pub(crate) async fn leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let entries = state
        .ask(|response| ReferralRequest::Leaderboard {
            limit: query.limit,
            response,
        })
        .await?;

    Ok((StatusCode::OK, Json(json!(entries))))
}

pub(crate) async fn refresh_statistics(
    State(state): State<AppState>,
    Query(query): Query<RefreshStatistics>,
) -> Result<impl IntoResponse, HttpError> {
    let date = query
        .date
        .unwrap_or_else(|| chrono::Utc::now().date_naive());

    let snapshot = state
        .ask(|response| ReferralRequest::RefreshStatistics { date, response })
        .await?;

    Ok((StatusCode::OK, Json(json!(snapshot))))
}

pub(crate) async fn get_statistics(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> Result<impl IntoResponse, HttpError> {
    let snapshot = state
        .ask(|response| ReferralRequest::GetStatistics { date, response })
        .await?;

    match snapshot {
        Some(snapshot) => Ok((StatusCode::OK, Json(json!(snapshot)))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("No statistics for {}", date)})),
        )),
    }
}
