//! In-memory repository for pipeline tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use biosync_core::kinds::BiomarkerKind;
use biosync_core::records::{
    Goal, NormalizedBiomarkerSample, SampleKey, SampleSource, SleepNight, TrainingScheduleEntry,
    WorkoutSession,
};

use crate::repository::{IngestRepository, ReadinessCache, RepoError};

/// Everything the pipeline can change, comparable across runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredState {
    pub biomarkers: BTreeMap<SampleKey, NormalizedBiomarkerSample>,
    pub sleep: BTreeMap<(Uuid, NaiveDate), SleepNight>,
    pub workouts: BTreeMap<(Uuid, SampleSource, String), WorkoutSession>,
    pub schedules: Vec<TrainingScheduleEntry>,
    pub goals: Vec<Goal>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoredState>,
    connections: Mutex<Vec<(String, String, Uuid)>>,
    invalidated: Mutex<Vec<(Uuid, NaiveDate)>>,
    fail_biomarker_reads: bool,
    /// Simulated latency of every biomarker upsert
    write_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn with_failing_reads() -> Self {
        Self {
            fail_biomarker_reads: true,
            ..Default::default()
        }
    }

    pub fn with_write_delay(delay: Duration) -> Self {
        Self {
            write_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn snapshot(&self) -> StoredState {
        self.state.lock().unwrap().clone()
    }

    pub fn invalidated(&self) -> Vec<(Uuid, NaiveDate)> {
        self.invalidated.lock().unwrap().clone()
    }

    pub fn add_goal(&self, user_id: Uuid, metric_type: &str) -> Uuid {
        let id = Uuid::now_v7();
        self.state.lock().unwrap().goals.push(Goal {
            id,
            user_id,
            metric_type: metric_type.to_string(),
            current_value: None,
            target_value: None,
        });
        id
    }

    pub fn add_schedule(
        &self,
        user_id: Uuid,
        scheduled_date: NaiveDate,
        workout_type: Option<&str>,
    ) -> Uuid {
        let id = Uuid::now_v7();
        self.state
            .lock()
            .unwrap()
            .schedules
            .push(TrainingScheduleEntry {
                id,
                user_id,
                scheduled_date,
                workout_type: workout_type.map(str::to_string),
                completed: false,
            });
        id
    }

    pub fn link_provider(&self, provider: &str, account_id: &str, user_id: Uuid) {
        self.connections.lock().unwrap().push((
            provider.to_string(),
            account_id.to_string(),
            user_id,
        ));
    }

    pub fn goal(&self, id: Uuid) -> Option<Goal> {
        self.state
            .lock()
            .unwrap()
            .goals
            .iter()
            .find(|g| g.id == id)
            .cloned()
    }
}

#[async_trait]
impl IngestRepository for MemoryStore {
    async fn upsert_biomarker(&self, sample: &NormalizedBiomarkerSample) -> Result<(), RepoError> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.state
            .lock()
            .unwrap()
            .biomarkers
            .insert(sample.key(), sample.clone());
        Ok(())
    }

    async fn create_workout_session(&self, workout: &WorkoutSession) -> Result<bool, RepoError> {
        let key = (workout.user_id, workout.source_type, workout.dedup_key());
        let mut state = self.state.lock().unwrap();
        if state.workouts.contains_key(&key) {
            return Ok(false);
        }
        state.workouts.insert(key, workout.clone());
        Ok(true)
    }

    async fn upsert_sleep_session(&self, night: &SleepNight) -> Result<(), RepoError> {
        self.state
            .lock()
            .unwrap()
            .sleep
            .insert((night.user_id, night.night_date), night.clone());
        Ok(())
    }

    async fn find_matching_schedule(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        workout_type: &str,
    ) -> Result<Option<TrainingScheduleEntry>, RepoError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .schedules
            .iter()
            .filter(|s| s.user_id == user_id && s.scheduled_date == date && !s.completed)
            .filter(|s| {
                s.workout_type
                    .as_deref()
                    .is_none_or(|t| t.eq_ignore_ascii_case(workout_type))
            })
            .min_by_key(|s| s.workout_type.is_none())
            .cloned())
    }

    async fn match_workout_to_schedule(
        &self,
        workout_id: Uuid,
        schedule_id: Uuid,
    ) -> Result<bool, RepoError> {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state
            .schedules
            .iter_mut()
            .find(|s| s.id == schedule_id && !s.completed)
        else {
            return Ok(false);
        };
        entry.completed = true;
        if let Some(workout) = state.workouts.values_mut().find(|w| w.id == workout_id) {
            workout.training_schedule_id = Some(schedule_id);
        }
        Ok(true)
    }

    async fn list_biomarkers(
        &self,
        user_id: Uuid,
        kinds: &[BiomarkerKind],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<NormalizedBiomarkerSample>, RepoError> {
        if self.fail_biomarker_reads {
            return Err(RepoError::Decode("biomarker reads disabled".to_string()));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .biomarkers
            .values()
            .filter(|s| s.user_id == user_id && kinds.contains(&s.kind))
            .filter(|s| s.recorded_at >= from && s.recorded_at < to)
            .cloned()
            .collect())
    }

    async fn latest_biomarker(
        &self,
        user_id: Uuid,
        kind: BiomarkerKind,
    ) -> Result<Option<NormalizedBiomarkerSample>, RepoError> {
        if self.fail_biomarker_reads {
            return Err(RepoError::Decode("biomarker reads disabled".to_string()));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .biomarkers
            .values()
            .filter(|s| s.user_id == user_id && s.kind == kind)
            .max_by_key(|s| s.recorded_at)
            .cloned())
    }

    async fn get_active_goals(
        &self,
        user_id: Uuid,
        metric_type: &str,
    ) -> Result<Vec<Goal>, RepoError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .goals
            .iter()
            .filter(|g| g.user_id == user_id && g.metric_type == metric_type)
            .cloned()
            .collect())
    }

    async fn update_goal_progress(
        &self,
        goal_id: Uuid,
        current_value: f64,
    ) -> Result<(), RepoError> {
        let mut state = self.state.lock().unwrap();
        if let Some(goal) = state.goals.iter_mut().find(|g| g.id == goal_id) {
            goal.current_value = Some(current_value);
        }
        Ok(())
    }

    async fn resolve_provider_user(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<Uuid>, RepoError> {
        Ok(self
            .connections
            .lock()
            .unwrap()
            .iter()
            .find(|(p, account, _)| p == provider && account == provider_account_id)
            .map(|(_, _, user_id)| *user_id))
    }
}

#[async_trait]
impl ReadinessCache for MemoryStore {
    async fn invalidate(&self, user_id: Uuid, date: NaiveDate) -> Result<(), RepoError> {
        self.invalidated.lock().unwrap().push((user_id, date));
        Ok(())
    }
}
