//! Post-ingestion recomputation of body-fat percentage and goal progress.
//! Failures are logged and swallowed: the primary writes already succeeded.

use std::collections::BTreeSet;

use chrono::{DateTime, Days, NaiveDate, Utc};
use uuid::Uuid;

use biosync_core::derived::{derive_body_fat_samples, goal_targets};
use biosync_core::kinds::BiomarkerKind;

use super::{Ingestor, WriteLog};
use crate::repository::RepoError;

const BODY_COMPOSITION_KINDS: [BiomarkerKind; 3] = [
    BiomarkerKind::Weight,
    BiomarkerKind::LeanBodyMass,
    BiomarkerKind::BodyFatPercentage,
];

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

impl Ingestor {
    pub(crate) async fn update_derived(&self, user_id: Uuid, log: &WriteLog) {
        let mut kinds = log.kinds.clone();

        match self.derive_body_fat(user_id, log.latest_body_composition).await {
            Ok(0) => {}
            Ok(written) => {
                tracing::debug!(user_id = %user_id, written, "Derived body-fat samples");
                kinds.insert(BiomarkerKind::BodyFatPercentage);
            }
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "Body-fat derivation failed");
            }
        }

        self.propagate_goals(user_id, &kinds).await;
    }

    /// Body-fat samples for the lookback window ending on the latest
    /// weight/lean date written. Returns how many were stored.
    async fn derive_body_fat(
        &self,
        user_id: Uuid,
        latest: Option<DateTime<Utc>>,
    ) -> Result<usize, RepoError> {
        let Some(latest) = latest else {
            return Ok(0);
        };
        let end_date = latest.date_naive();
        let start_date = end_date
            .checked_sub_days(Days::new(self.lookback_days - 1))
            .unwrap_or(end_date);
        let until = end_date.checked_add_days(Days::new(1)).unwrap_or(end_date);

        let samples = self
            .repo
            .list_biomarkers(
                user_id,
                &BODY_COMPOSITION_KINDS,
                midnight_utc(start_date),
                midnight_utc(until),
            )
            .await?;

        let derived = derive_body_fat_samples(user_id, &samples);
        for sample in &derived {
            self.repo.upsert_biomarker(sample).await?;
        }
        Ok(derived.len())
    }

    /// Push the latest value of every written kind into matching active goals.
    async fn propagate_goals(&self, user_id: Uuid, kinds: &BTreeSet<BiomarkerKind>) {
        for (metric_type, kind) in goal_targets(kinds) {
            if let Err(err) = self.update_goals_for(user_id, metric_type, kind).await {
                tracing::warn!(
                    user_id = %user_id,
                    metric_type,
                    error = %err,
                    "Goal progress update failed"
                );
            }
        }
    }

    async fn update_goals_for(
        &self,
        user_id: Uuid,
        metric_type: &str,
        kind: BiomarkerKind,
    ) -> Result<(), RepoError> {
        let goals = self.repo.get_active_goals(user_id, metric_type).await?;
        if goals.is_empty() {
            return Ok(());
        }
        let Some(latest) = self.repo.latest_biomarker(user_id, kind).await? else {
            return Ok(());
        };
        for goal in goals {
            self.repo.update_goal_progress(goal.id, latest.value).await?;
        }
        Ok(())
    }
}
