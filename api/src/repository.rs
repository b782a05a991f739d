//! Persistence seams for ingestion.
//!
//! The pipeline depends only on the `IngestRepository` and `ReadinessCache`
//! traits. `PgIngestRepository` implements both on Postgres; upsert identity
//! is enforced by the unique constraints in `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use biosync_core::kinds::BiomarkerKind;
use biosync_core::records::{
    Goal, NormalizedBiomarkerSample, SampleSource, SleepNight, TrainingScheduleEntry,
    WorkoutSession,
};

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored row could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait IngestRepository: Send + Sync {
    /// Insert, or overwrite the row with the same `(user, kind, recorded_at, source)`.
    async fn upsert_biomarker(&self, sample: &NormalizedBiomarkerSample) -> Result<(), RepoError>;

    /// Returns `false` when a workout with the same dedup key already exists.
    async fn create_workout_session(&self, workout: &WorkoutSession) -> Result<bool, RepoError>;

    /// Insert, or overwrite the night with the same `(user, night_date)`.
    async fn upsert_sleep_session(&self, night: &SleepNight) -> Result<(), RepoError>;

    /// An open schedule entry on `date` whose type is unset or equals `workout_type`.
    async fn find_matching_schedule(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        workout_type: &str,
    ) -> Result<Option<TrainingScheduleEntry>, RepoError>;

    /// Claim an open entry for the workout: mark it completed and link both
    /// rows. Returns `false`, changing nothing, when the entry was already
    /// completed.
    async fn match_workout_to_schedule(
        &self,
        workout_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<bool, RepoError>;

    /// Samples of `kinds` recorded in `[from, to)`.
    async fn list_biomarkers(
        &self,
        user_id: Uuid,
        kinds: &[BiomarkerKind],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<NormalizedBiomarkerSample>, RepoError>;

    async fn latest_biomarker(
        &self,
        user_id: Uuid,
        kind: BiomarkerKind,
    ) -> Result<Option<NormalizedBiomarkerSample>, RepoError>;

    async fn get_active_goals(
        &self,
        user_id: Uuid,
        metric_type: &str,
    ) -> Result<Vec<Goal>, RepoError>;

    async fn update_goal_progress(&self, goal_id: Uuid, current_value: f64)
    -> Result<(), RepoError>;

    /// User linked to a provider account, ignoring revoked connections.
    async fn resolve_provider_user(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<Uuid>, RepoError>;
}

/// Cached readiness scores that depend on sleep data.
#[async_trait]
pub trait ReadinessCache: Send + Sync {
    async fn invalidate(&self, user_id: Uuid, date: NaiveDate) -> Result<(), RepoError>;
}

#[derive(Clone)]
pub struct PgIngestRepository {
    pool: PgPool,
}

impl PgIngestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BiomarkerRow {
    user_id: Uuid,
    kind: String,
    value: f64,
    unit: String,
    source: String,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<BiomarkerRow> for NormalizedBiomarkerSample {
    type Error = RepoError;

    fn try_from(row: BiomarkerRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: row.user_id,
            kind: row
                .kind
                .parse()
                .map_err(|err: biosync_core::kinds::UnknownKind| RepoError::Decode(err.to_string()))?,
            value: row.value,
            unit: row.unit,
            source: row
                .source
                .parse::<SampleSource>()
                .map_err(RepoError::Decode)?,
            recorded_at: row.recorded_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ScheduleRow {
    id: Uuid,
    user_id: Uuid,
    scheduled_date: NaiveDate,
    workout_type: Option<String>,
    completed: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct GoalRow {
    id: Uuid,
    user_id: Uuid,
    metric_type: String,
    current_value: Option<f64>,
    target_value: Option<f64>,
}

#[async_trait]
impl IngestRepository for PgIngestRepository {
    async fn upsert_biomarker(&self, sample: &NormalizedBiomarkerSample) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO biomarker_samples (id, user_id, kind, value, unit, source, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, kind, recorded_at, source)
            DO UPDATE SET value = EXCLUDED.value,
                          unit = EXCLUDED.unit,
                          updated_at = NOW()
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(sample.user_id)
        .bind(sample.kind.as_str())
        .bind(sample.value)
        .bind(&sample.unit)
        .bind(sample.source.as_str())
        .bind(sample.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_workout_session(&self, workout: &WorkoutSession) -> Result<bool, RepoError> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO workout_sessions (
                id, user_id, workout_type, start_time, end_time, local_date,
                duration_minutes, distance_meters, calories, avg_heart_rate,
                max_heart_rate, source_type, source_id, dedup_key
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (user_id, source_type, dedup_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(workout.id)
        .bind(workout.user_id)
        .bind(&workout.workout_type)
        .bind(workout.start_time)
        .bind(workout.end_time)
        .bind(workout.local_date)
        .bind(workout.duration)
        .bind(workout.distance)
        .bind(workout.calories)
        .bind(workout.avg_heart_rate)
        .bind(workout.max_heart_rate)
        .bind(workout.source_type.as_str())
        .bind(&workout.source_id)
        .bind(workout.dedup_key())
        .fetch_optional(&self.pool)
        .await?;
        Ok(inserted.is_some())
    }

    async fn upsert_sleep_session(&self, night: &SleepNight) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO sleep_sessions (
                id, user_id, night_date, bedtime, waketime, total_minutes,
                awake_minutes, light_minutes, deep_minutes, rem_minutes,
                sleep_score, quality, source
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (user_id, night_date)
            DO UPDATE SET bedtime = EXCLUDED.bedtime,
                          waketime = EXCLUDED.waketime,
                          total_minutes = EXCLUDED.total_minutes,
                          awake_minutes = EXCLUDED.awake_minutes,
                          light_minutes = EXCLUDED.light_minutes,
                          deep_minutes = EXCLUDED.deep_minutes,
                          rem_minutes = EXCLUDED.rem_minutes,
                          sleep_score = EXCLUDED.sleep_score,
                          quality = EXCLUDED.quality,
                          source = EXCLUDED.source,
                          updated_at = NOW()
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(night.user_id)
        .bind(night.night_date)
        .bind(night.bedtime)
        .bind(night.waketime)
        .bind(night.total_minutes)
        .bind(night.awake_minutes)
        .bind(night.light_minutes)
        .bind(night.deep_minutes)
        .bind(night.rem_minutes)
        .bind(night.sleep_score)
        .bind(night.quality.as_str())
        .bind(night.source.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_matching_schedule(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        workout_type: &str,
    ) -> Result<Option<TrainingScheduleEntry>, RepoError> {
        let row = sqlx::query_as::<_, ScheduleRow>(
            r#"
            SELECT id, user_id, scheduled_date, workout_type, completed
            FROM training_schedules
            WHERE user_id = $1
              AND scheduled_date = $2
              AND completed = FALSE
              AND (workout_type IS NULL OR LOWER(workout_type) = $3)
            ORDER BY (workout_type IS NULL), created_at
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(date)
        .bind(workout_type.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| TrainingScheduleEntry {
            id: r.id,
            user_id: r.user_id,
            scheduled_date: r.scheduled_date,
            workout_type: r.workout_type,
            completed: r.completed,
        }))
    }

    async fn match_workout_to_schedule(
        &self,
        workout_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<bool, RepoError> {
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query_scalar::<_, Uuid>(
            "UPDATE training_schedules \
             SET completed = TRUE, completed_at = NOW(), workout_session_id = $2 \
             WHERE id = $1 AND completed = FALSE \
             RETURNING id",
        )
        .bind(schedule_id)
        .bind(workout_id)
        .fetch_optional(&mut *tx)
        .await?;
        if claimed.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query("UPDATE workout_sessions SET training_schedule_id = $2 WHERE id = $1")
            .bind(workout_id)
            .bind(schedule_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list_biomarkers(
        &self,
        user_id: Uuid,
        kinds: &[BiomarkerKind],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<NormalizedBiomarkerSample>, RepoError> {
        let kinds: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();
        let rows = sqlx::query_as::<_, BiomarkerRow>(
            r#"
            SELECT user_id, kind, value, unit, source, recorded_at
            FROM biomarker_samples
            WHERE user_id = $1
              AND kind = ANY($2)
              AND recorded_at >= $3
              AND recorded_at < $4
            ORDER BY recorded_at
            "#,
        )
        .bind(user_id)
        .bind(kinds)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn latest_biomarker(
        &self,
        user_id: Uuid,
        kind: BiomarkerKind,
    ) -> Result<Option<NormalizedBiomarkerSample>, RepoError> {
        let row = sqlx::query_as::<_, BiomarkerRow>(
            r#"
            SELECT user_id, kind, value, unit, source, recorded_at
            FROM biomarker_samples
            WHERE user_id = $1 AND kind = $2
            ORDER BY recorded_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_active_goals(
        &self,
        user_id: Uuid,
        metric_type: &str,
    ) -> Result<Vec<Goal>, RepoError> {
        let rows = sqlx::query_as::<_, GoalRow>(
            r#"
            SELECT id, user_id, metric_type, current_value, target_value
            FROM goals
            WHERE user_id = $1 AND metric_type = $2 AND is_active = TRUE
            "#,
        )
        .bind(user_id)
        .bind(metric_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Goal {
                id: r.id,
                user_id: r.user_id,
                metric_type: r.metric_type,
                current_value: r.current_value,
                target_value: r.target_value,
            })
            .collect())
    }

    async fn update_goal_progress(
        &self,
        goal_id: Uuid,
        current_value: f64,
    ) -> Result<(), RepoError> {
        sqlx::query("UPDATE goals SET current_value = $2, updated_at = NOW() WHERE id = $1")
            .bind(goal_id)
            .bind(current_value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn resolve_provider_user(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<Uuid>, RepoError> {
        let user_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT user_id
            FROM provider_connections
            WHERE provider = $1
              AND provider_account_id = $2
              AND revoked_at IS NULL
            "#,
        )
        .bind(provider)
        .bind(provider_account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user_id)
    }
}

#[async_trait]
impl ReadinessCache for PgIngestRepository {
    async fn invalidate(&self, user_id: Uuid, date: NaiveDate) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM readiness_scores WHERE user_id = $1 AND score_date = $2")
            .bind(user_id)
            .bind(date)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
