use serde::Serialize;
use uuid::Uuid;

use biosync_core::provider_events::{
    EventKind, ProviderEvent, ProviderRecords, classify_event_type, records_from_daily_data,
};
use biosync_core::records::{IngestCounts, SampleSource};

use super::{IngestError, Ingestor, WriteLog};
use crate::repository::RepoError;

/// Provider tag stored in `provider_connections.provider`.
pub const VITAL_PROVIDER: &str = "vital";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderAction {
    /// Lifecycle or backfill notification; nothing to write
    Acknowledged,
    Ingested,
    /// No user could be resolved, or the event type is not handled
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEventOutcome {
    pub action: ProviderAction,
    pub counts: IngestCounts,
}

impl ProviderEventOutcome {
    fn without_writes(action: ProviderAction) -> Self {
        Self {
            action,
            counts: IngestCounts::default(),
        }
    }
}

impl Ingestor {
    /// Linked connection first, then a UUID `client_user_id`.
    pub async fn resolve_event_user(
        &self,
        event: &ProviderEvent,
    ) -> Result<Option<Uuid>, RepoError> {
        if let Some(account_id) = event.user_id.as_deref().filter(|id| !id.is_empty()) {
            if let Some(user_id) = self
                .repo
                .resolve_provider_user(VITAL_PROVIDER, account_id)
                .await?
            {
                return Ok(Some(user_id));
            }
        }
        Ok(event
            .client_user_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id.trim()).ok()))
    }

    /// Handle one signed aggregator event. Only a failed user lookup is an
    /// error; a malformed record is logged and acknowledged with zero counts.
    /// Runs on its own task so a dropped request does not cancel the writes.
    pub async fn ingest_provider_event(
        &self,
        event: &ProviderEvent,
    ) -> Result<ProviderEventOutcome, IngestError> {
        let this = self.clone();
        let event = event.clone();
        let handled = tokio::spawn(async move { this.handle_provider_event(&event).await });
        Ok(handled.await??)
    }

    async fn handle_provider_event(
        &self,
        event: &ProviderEvent,
    ) -> Result<ProviderEventOutcome, RepoError> {
        let resource = match classify_event_type(&event.event_type) {
            EventKind::ConnectionLifecycle | EventKind::BackfillComplete => {
                tracing::info!(event_type = %event.event_type, "Provider notification acknowledged");
                return Ok(ProviderEventOutcome::without_writes(
                    ProviderAction::Acknowledged,
                ));
            }
            EventKind::Unsupported => {
                tracing::debug!(event_type = %event.event_type, "Unsupported provider event");
                return Ok(ProviderEventOutcome::without_writes(ProviderAction::Ignored));
            }
            EventKind::DailyData(resource) => resource,
        };

        let Some(user_id) = self.resolve_event_user(event).await? else {
            tracing::warn!(
                event_type = %event.event_type,
                provider_user_id = event.user_id.as_deref().unwrap_or(""),
                "No user linked to provider event"
            );
            return Ok(ProviderEventOutcome::without_writes(ProviderAction::Ignored));
        };

        let records = match records_from_daily_data(resource, &event.data, user_id, self.default_tz)
        {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(
                    user_id = %user_id,
                    event_type = %event.event_type,
                    error = %err,
                    "Dropping malformed provider record"
                );
                return Ok(ProviderEventOutcome::without_writes(ProviderAction::Ingested));
            }
        };

        let mut log = WriteLog::default();
        match records {
            ProviderRecords::Workout(workout) => {
                log.counts.workout_sessions_count += self.write_workouts(vec![workout]).await;
            }
            ProviderRecords::Sleep(nights) => {
                log.counts.sleep_sessions_count += self.write_sleep(nights).await;
            }
            ProviderRecords::Samples(samples) => {
                let written = self.write_samples(samples).await;
                log.record_samples(&written);
            }
        }

        self.update_derived(user_id, &log).await;

        tracing::info!(
            user_id = %user_id,
            event_type = %event.event_type,
            source = SampleSource::Vital.as_str(),
            biomarkers = log.counts.biomarkers_count,
            sleep_sessions = log.counts.sleep_sessions_count,
            workouts = log.counts.workout_sessions_count,
            "Provider event ingested"
        );
        Ok(ProviderEventOutcome {
            action: ProviderAction::Ingested,
            counts: log.counts,
        })
    }
}
