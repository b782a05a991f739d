//! Async ingestion: resolve a payload, classify each envelope, fan out the
//! writes of one envelope concurrently, join, then move to the next envelope.
//! Derived aggregates run once at the end, after every envelope has joined.

mod derived;
mod provider;

#[cfg(test)]
mod memory;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use tokio::task::JoinSet;
use uuid::Uuid;

use biosync_core::biomarkers::samples_from_point;
use biosync_core::classify::{Classification, prepare};
use biosync_core::kinds::BiomarkerKind;
use biosync_core::payload::{FormatError, MetricEnvelope, resolve_envelopes};
use biosync_core::records::{
    IngestCounts, NormalizedBiomarkerSample, SampleSource, SleepNight, WorkoutSession,
};
use biosync_core::sleep::{SleepSegment, build_nights};
use biosync_core::workouts::parse_workout;

use crate::repository::{IngestRepository, ReadinessCache, RepoError};
use crate::state::IngestConfig;

pub use provider::{ProviderAction, ProviderEventOutcome};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    /// The detached write task panicked or was cancelled at shutdown
    #[error("ingestion task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Emitted for every stored sleep night; cached readiness for that user and
/// date must be recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReadinessInvalidation {
    pub user_id: Uuid,
    pub date: NaiveDate,
}

impl ReadinessInvalidation {
    /// The evening the night started and the morning it ended.
    fn for_night(night: &SleepNight) -> [Self; 2] {
        let morning = night
            .night_date
            .checked_add_days(Days::new(1))
            .unwrap_or(night.night_date);
        [night.night_date, morning].map(|date| Self {
            user_id: night.user_id,
            date,
        })
    }
}

/// What one request wrote, folded across envelopes.
#[derive(Debug, Default)]
pub(crate) struct WriteLog {
    pub counts: IngestCounts,
    pub kinds: BTreeSet<BiomarkerKind>,
    /// Latest weight or lean-mass instant written; anchors the body-fat window
    pub latest_body_composition: Option<DateTime<Utc>>,
}

impl WriteLog {
    fn record_samples(&mut self, samples: &[NormalizedBiomarkerSample]) {
        self.counts.biomarkers_count += samples.len();
        for sample in samples {
            self.kinds.insert(sample.kind);
            if matches!(
                sample.kind,
                BiomarkerKind::Weight | BiomarkerKind::LeanBodyMass
            ) {
                self.latest_body_composition = self
                    .latest_body_composition
                    .max(Some(sample.recorded_at));
            }
        }
    }
}

#[derive(Clone)]
pub struct Ingestor {
    repo: Arc<dyn IngestRepository>,
    readiness: Arc<dyn ReadinessCache>,
    default_tz: Tz,
    lookback_days: u64,
}

impl Ingestor {
    pub fn new(
        repo: Arc<dyn IngestRepository>,
        readiness: Arc<dyn ReadinessCache>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            repo,
            readiness,
            default_tz: config.default_tz,
            lookback_days: config.derived_lookback_days.max(1) as u64,
        }
    }

    /// Ingest one health-export webhook body for `user_id`.
    ///
    /// Only a payload with no extractable metric list fails. Every other
    /// problem is scoped to one point, envelope or derived computation.
    /// The writes run on their own task: a caller that stops waiting does
    /// not cancel them.
    pub async fn ingest_payload(
        &self,
        user_id: Uuid,
        body: &Value,
    ) -> Result<IngestCounts, IngestError> {
        let resolved = resolve_envelopes(body)?;
        tracing::debug!(
            user_id = %user_id,
            shape = ?resolved.shape,
            envelopes = resolved.envelopes.len(),
            "Resolved payload"
        );

        let this = self.clone();
        let writes = tokio::spawn(async move {
            this.write_envelopes(user_id, resolved.envelopes).await
        });
        Ok(writes.await?)
    }

    async fn write_envelopes(&self, user_id: Uuid, envelopes: Vec<MetricEnvelope>) -> IngestCounts {
        let mut log = WriteLog::default();
        for envelope in envelopes {
            let (envelope, classification) = prepare(envelope);
            tracing::debug!(
                envelope = %envelope.name,
                points = envelope.data.len(),
                classification = ?classification,
                "Classified envelope"
            );
            match classification {
                Classification::Workout => {
                    let workouts = self.parse_workouts(user_id, &envelope);
                    log.counts.workout_sessions_count +=
                        self.write_workouts(workouts).await;
                }
                Classification::Sleep => {
                    let nights = self.parse_sleep(user_id, &envelope);
                    log.counts.sleep_sessions_count += self.write_sleep(nights).await;
                }
                Classification::Scalar(kind) => {
                    let samples = self.parse_samples(user_id, kind, &envelope);
                    let written = self.write_samples(samples).await;
                    log.record_samples(&written);
                }
                Classification::Unrecognized => {
                    tracing::debug!(envelope = %envelope.name, "Skipping unrecognized metric");
                }
            }
        }

        self.update_derived(user_id, &log).await;

        tracing::info!(
            user_id = %user_id,
            biomarkers = log.counts.biomarkers_count,
            sleep_sessions = log.counts.sleep_sessions_count,
            workouts = log.counts.workout_sessions_count,
            "Health export ingested"
        );
        log.counts
    }

    fn parse_workouts(&self, user_id: Uuid, envelope: &MetricEnvelope) -> Vec<WorkoutSession> {
        envelope
            .data
            .iter()
            .filter_map(|point| {
                parse_workout(
                    point,
                    &envelope.name,
                    user_id,
                    SampleSource::HealthExport,
                    self.default_tz,
                )
                .inspect_err(|err| {
                    tracing::warn!(envelope = %envelope.name, error = %err, "Dropping workout point");
                })
                .ok()
            })
            .collect()
    }

    fn parse_sleep(&self, user_id: Uuid, envelope: &MetricEnvelope) -> Vec<SleepNight> {
        let segments = envelope
            .data
            .iter()
            .filter_map(|point| {
                SleepSegment::from_point(point, self.default_tz)
                    .inspect_err(|err| {
                        tracing::warn!(envelope = %envelope.name, error = %err, "Dropping sleep point");
                    })
                    .ok()
            })
            .collect();
        build_nights(user_id, SampleSource::HealthExport, segments)
    }

    fn parse_samples(
        &self,
        user_id: Uuid,
        kind: BiomarkerKind,
        envelope: &MetricEnvelope,
    ) -> Vec<NormalizedBiomarkerSample> {
        envelope
            .data
            .iter()
            .filter_map(|point| {
                samples_from_point(
                    point,
                    kind,
                    envelope.units.as_deref(),
                    user_id,
                    SampleSource::HealthExport,
                    self.default_tz,
                )
                .inspect_err(|err| {
                    tracing::warn!(envelope = %envelope.name, kind = kind.as_str(), error = %err, "Dropping biomarker point");
                })
                .ok()
            })
            .flatten()
            .collect()
    }

    /// Create workouts concurrently. Duplicates count as written.
    pub(crate) async fn write_workouts(&self, workouts: Vec<WorkoutSession>) -> usize {
        let mut tasks = JoinSet::new();
        for workout in workouts {
            let repo = Arc::clone(&self.repo);
            tasks.spawn(async move { store_workout(repo.as_ref(), workout).await });
        }
        join_writes(tasks, "workout").await.len()
    }

    /// Upsert nights concurrently, then notify the readiness cache.
    pub(crate) async fn write_sleep(&self, nights: Vec<SleepNight>) -> usize {
        let mut tasks = JoinSet::new();
        for night in nights {
            let repo = Arc::clone(&self.repo);
            tasks.spawn(async move {
                repo.upsert_sleep_session(&night).await?;
                Ok::<_, RepoError>(ReadinessInvalidation::for_night(&night))
            });
        }
        let stored = join_writes(tasks, "sleep night").await;
        let written = stored.len();
        let invalidations: BTreeSet<_> = stored.into_iter().flatten().collect();
        self.notify_readiness(invalidations).await;
        written
    }

    async fn notify_readiness(&self, invalidations: BTreeSet<ReadinessInvalidation>) {
        for event in invalidations {
            if let Err(err) = self.readiness.invalidate(event.user_id, event.date).await {
                tracing::warn!(
                    user_id = %event.user_id,
                    date = %event.date,
                    error = %err,
                    "Readiness cache invalidation failed"
                );
            }
        }
    }

    /// Upsert samples concurrently; returns the ones that were stored.
    pub(crate) async fn write_samples(
        &self,
        samples: Vec<NormalizedBiomarkerSample>,
    ) -> Vec<NormalizedBiomarkerSample> {
        let mut tasks = JoinSet::new();
        for sample in samples {
            let repo = Arc::clone(&self.repo);
            tasks.spawn(async move {
                repo.upsert_biomarker(&sample).await?;
                Ok::<_, RepoError>(sample)
            });
        }
        join_writes(tasks, "biomarker").await
    }
}

async fn store_workout(repo: &dyn IngestRepository, workout: WorkoutSession) -> Result<(), RepoError> {
    if !repo.create_workout_session(&workout).await? {
        tracing::debug!(dedup_key = %workout.dedup_key(), "Workout already stored");
        return Ok(());
    }
    if let Err(err) = link_schedule(repo, &workout).await {
        tracing::warn!(workout_id = %workout.id, error = %err, "Schedule matching failed");
    }
    Ok(())
}

async fn link_schedule(repo: &dyn IngestRepository, workout: &WorkoutSession) -> Result<(), RepoError> {
    let Some(entry) = repo
        .find_matching_schedule(workout.user_id, workout.local_date, &workout.workout_type)
        .await?
    else {
        return Ok(());
    };
    if repo.match_workout_to_schedule(workout.id, entry.id).await? {
        tracing::debug!(workout_id = %workout.id, schedule_id = %entry.id, "Workout matched to schedule");
    } else {
        tracing::debug!(workout_id = %workout.id, schedule_id = %entry.id, "Schedule entry already claimed");
    }
    Ok(())
}

/// Join barrier for one envelope's fan-out. Failed items are logged and left
/// out; they never fail their siblings.
async fn join_writes<T: 'static>(
    mut tasks: JoinSet<Result<T, RepoError>>,
    what: &'static str,
) -> Vec<T> {
    let mut done = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(value)) => done.push(value),
            Ok(Err(err)) => tracing::error!(item = what, error = %err, "Write failed"),
            Err(err) => tracing::error!(item = what, error = %err, "Write task aborted"),
        }
    }
    done
}
