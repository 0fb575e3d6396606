use std::sync::Arc;

use chrono::NaiveDate;

use super::ServiceError;
use crate::models::statistics::StatisticsSnapshot;
use crate::repositories::StatisticsStore;

/// Recomputes the per-day aggregates from current state. Each refresh
/// overwrites the row for its date.
#[derive(Clone)]
pub struct Snapshotter {
    store: Arc<dyn StatisticsStore>,
}

impl Snapshotter {
    pub fn new(store: Arc<dyn StatisticsStore>) -> Self {
        Self { store }
    }

    pub async fn refresh(&self, date: NaiveDate) -> Result<StatisticsSnapshot, ServiceError> {
        let aggregates = self
            .store
            .compute_aggregates()
            .await
            .map_err(|e| ServiceError::Repository("Snapshotter".to_string(), e.to_string()))?;

        let snapshot = self
            .store
            .upsert_snapshot(&StatisticsSnapshot::new(date, &aggregates))
            .await
            .map_err(|e| ServiceError::Repository("Snapshotter".to_string(), e.to_string()))?;

        log::info!(
            "Statistics for {}: {} users, {} active, {} subscriptions, {} points, {} credited referrals.",
            snapshot.date,
            snapshot.total_users,
            snapshot.active_users,
            snapshot.total_subscriptions,
            snapshot.total_score,
            snapshot.credited_referrals
        );

        Ok(snapshot)
    }

    pub async fn get(&self, date: NaiveDate) -> Result<Option<StatisticsSnapshot>, ServiceError> {
        self.store
            .get_snapshot(date)
            .await
            .map_err(|e| ServiceError::Repository("Snapshotter".to_string(), e.to_string()))
    }
}
