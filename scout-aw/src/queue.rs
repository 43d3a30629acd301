//! Priority analysis queue
//!
//! Redis-backed named queue shared by all worker replicas. Waiting jobs live
//! in a sorted set whose score encodes priority band plus insertion sequence,
//! so lower-numbered priorities dequeue first and insertion order is
//! preserved within a priority. Per-job state, attempts, progress and
//! timestamps live in a hash per job.
//!
//! Delivery is at-least-once: a claim is a `ZPOPMIN` (atomic across
//! replicas) followed by a state write; a worker dying between the two is
//! recovered by the operator reset-stuck path.
//!
//! Enqueues deduplicate per project: a `SET NX` reservation marker keyed by
//! project id admits one in-flight job at a time, so concurrent non-forced
//! enqueues converge on a single job (and a single completion event).
//! Force-refresh jobs bypass the reservation and always run.
//!
//! Retention: the most recent 100 completed jobs for up to 24 hours, the
//! most recent 500 failed jobs for inspection.

use chrono::Utc;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use scout_common::events::JobProgress;
use scout_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Queue name used by the analysis pipeline
pub const ANALYSIS_QUEUE: &str = "project-analysis";

/// Priority bands are spaced far enough apart that sequence numbers never
/// cross into the next band (2^40 insertions per priority).
const PRIORITY_BAND: f64 = (1u64 << 40) as f64;

/// Completed-job retention
const COMPLETED_KEEP: usize = 100;
const COMPLETED_MAX_AGE_MS: i64 = 24 * 3600 * 1000;

/// Failed-job retention
const FAILED_KEEP: usize = 500;

/// `clear` removes terminal jobs older than this
const CLEAR_AGE_MS: i64 = 3600 * 1000;

/// Job priority; lower numeric value dequeues earlier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    High,
    Normal,
    Low,
}

impl JobPriority {
    pub fn weight(&self) -> u8 {
        match self {
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }
}

/// Payload of an analysis job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub project_id: Uuid,
    pub project_path: String,
    pub project_name: String,
    pub priority: JobPriority,
    #[serde(default)]
    pub force_refresh: bool,
}

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(JobState::Waiting),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "delayed" => Some(JobState::Delayed),
            _ => None,
        }
    }
}

/// A claimed job handed to a worker
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub payload: JobPayload,
    pub attempts_made: u32,
}

/// Full job record for operator endpoints
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetail {
    pub id: String,
    pub payload: JobPayload,
    pub state: JobState,
    pub attempts_made: u32,
    pub progress: Option<JobProgress>,
    pub created_at: Option<i64>,
    pub processed_at: Option<i64>,
    pub finished_at: Option<i64>,
    pub failed_reason: Option<String>,
}

/// Queue depth counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

/// Retry policy. The shipped default is a single attempt (no automatic
/// retry); when attempts > 1, backoff is exponential with jitter.
#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_max_ms: u64,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff_base_ms: 2000,
            backoff_multiplier: 2.0,
            backoff_max_ms: 60_000,
        }
    }
}

/// Outcome of reporting a job failure
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// Scheduled to run again after the given delay
    Retried { delay_ms: u64 },
    /// Moved to the failed set
    Failed,
}

/// Outcome of an enqueue request
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// A new job entered the waiting set
    Enqueued(String),
    /// A non-forced enqueue found a job already in flight for the project;
    /// that job's id is returned instead of queueing a duplicate
    AlreadyQueued(String),
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            EnqueueOutcome::Enqueued(id) | EnqueueOutcome::AlreadyQueued(id) => id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, EnqueueOutcome::AlreadyQueued(_))
    }
}

/// Encode a waiting-set score from priority and insertion sequence
fn waiting_score(priority: JobPriority, seq: u64) -> f64 {
    priority.weight() as f64 * PRIORITY_BAND + seq as f64
}

/// Project owning a job, parsed from the id format `analysis-<uuid>-<ms>`
fn project_of(job_id: &str) -> Option<Uuid> {
    let rest = job_id.strip_prefix("analysis-")?;
    Uuid::parse_str(rest.get(..36)?).ok()
}

/// Backoff for retry `attempt` (1-based): base · multiplier^(attempt-1),
/// ±20% jitter, capped.
fn retry_delay_ms(options: &QueueOptions, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1);
    let raw = options.backoff_base_ms as f64 * options.backoff_multiplier.powi(exponent as i32);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    ((raw * jitter) as u64).min(options.backoff_max_ms)
}

/// Shared handle to the analysis queue
#[derive(Clone)]
pub struct AnalysisQueue {
    conn: ConnectionManager,
    prefix: String,
    options: QueueOptions,
}

impl AnalysisQueue {
    pub fn new(conn: ConnectionManager, name: &str, options: QueueOptions) -> Self {
        Self {
            conn,
            prefix: format!("scout:queue:{}", name),
            options,
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    fn job_key(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    /// Per-project reservation marker backing enqueue deduplication
    fn dedup_key(&self, project_id: Uuid) -> String {
        format!("{}:dedup:{}", self.prefix, project_id)
    }

    /// Enqueue a job. The id is stable per (project, enqueue instant).
    ///
    /// Unless `force_refresh` is set, at most one job per project is in
    /// flight at a time: concurrent enqueues race for a `SET NX`
    /// reservation marker, and losers get the winner's job id back rather
    /// than a second independent job. Markers left behind by terminal jobs
    /// are detected against the job record and taken over.
    pub async fn enqueue(&self, payload: JobPayload) -> Result<EnqueueOutcome> {
        let job_id = format!(
            "analysis-{}-{}",
            payload.project_id,
            Utc::now().timestamp_millis()
        );
        let dedup_key = self.dedup_key(payload.project_id);
        let mut conn = self.conn.clone();

        if payload.force_refresh {
            // Forced jobs always run; the marker moves to the newest job
            let _: () = conn.set(&dedup_key, &job_id).await?;
        } else {
            let reserved: bool = conn.set_nx(&dedup_key, &job_id).await?;
            if !reserved {
                let existing: Option<String> = conn.get(&dedup_key).await?;
                if let Some(existing) = existing {
                    if self.is_in_flight(&existing).await? {
                        debug!(
                            job_id = %existing,
                            "Analysis already in flight for project; reusing job"
                        );
                        return Ok(EnqueueOutcome::AlreadyQueued(existing));
                    }
                }
                // Stale marker from a terminal job; take it over
                let _: () = conn.set(&dedup_key, &job_id).await?;
            }
        }

        let seq: u64 = conn.incr(self.key("seq"), 1).await?;
        let score = waiting_score(payload.priority, seq);
        let payload_json = serde_json::to_string(&payload)?;
        let created_at = Utc::now().timestamp_millis().to_string();

        let _: () = conn
            .hset_multiple(
                self.job_key(&job_id),
                &[
                    ("payload", payload_json.as_str()),
                    ("state", JobState::Waiting.as_str()),
                    ("attempts", "0"),
                    ("created_at", created_at.as_str()),
                ],
            )
            .await?;
        let _: () = conn.zadd(self.key("waiting"), &job_id, score).await?;

        debug!(job_id = %job_id, priority = ?payload.priority, "Job enqueued");
        Ok(EnqueueOutcome::Enqueued(job_id))
    }

    /// Whether a job record exists and is still waiting, active or delayed
    async fn is_in_flight(&self, job_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let state: Option<String> = conn.hget(self.job_key(job_id), "state").await?;
        Ok(matches!(
            state.as_deref().and_then(JobState::parse),
            Some(JobState::Waiting | JobState::Active | JobState::Delayed)
        ))
    }

    /// Drop the project's reservation marker if it still points at this job
    async fn clear_dedup_marker(&self, job_id: &str) -> Result<()> {
        let Some(project_id) = project_of(job_id) else {
            return Ok(());
        };
        let key = self.dedup_key(project_id);
        let mut conn = self.conn.clone();
        let current: Option<String> = conn.get(&key).await?;
        if current.as_deref() == Some(job_id) {
            let _: () = conn.del(&key).await?;
        }
        Ok(())
    }

    /// Claim the next waiting job, or None when the queue is empty or
    /// paused. The pop is atomic; competing replicas never claim the same
    /// job.
    pub async fn next(&self) -> Result<Option<Job>> {
        if self.is_paused().await? {
            return Ok(None);
        }

        let mut conn = self.conn.clone();
        let popped: Vec<(String, f64)> = conn.zpopmin(self.key("waiting"), 1).await?;
        let Some((job_id, _score)) = popped.into_iter().next() else {
            return Ok(None);
        };

        let payload_json: Option<String> = conn.hget(self.job_key(&job_id), "payload").await?;
        let Some(payload_json) = payload_json else {
            // Job hash removed while waiting; skip the orphaned member
            warn!(job_id = %job_id, "Claimed job has no record; skipping");
            return Ok(None);
        };
        let payload: JobPayload = serde_json::from_str(&payload_json)?;

        let attempts: u32 = conn.hincr(self.job_key(&job_id), "attempts", 1).await?;
        let processed_at = Utc::now().timestamp_millis().to_string();
        let _: () = conn
            .hset_multiple(
                self.job_key(&job_id),
                &[
                    ("state", JobState::Active.as_str()),
                    ("processed_at", processed_at.as_str()),
                ],
            )
            .await?;
        let _: () = conn.sadd(self.key("active"), &job_id).await?;

        Ok(Some(Job {
            id: job_id,
            payload,
            attempts_made: attempts,
        }))
    }

    /// Record progress on a job
    pub async fn update_progress(&self, job_id: &str, progress: &JobProgress) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(progress)?;
        let _: () = conn.hset(self.job_key(job_id), "progress", json).await?;
        Ok(())
    }

    /// Mark a job completed and apply completed-set retention
    pub async fn complete(&self, job_id: &str) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let finished_at = now.to_string();
        let mut conn = self.conn.clone();

        let _: () = conn
            .hset_multiple(
                self.job_key(job_id),
                &[
                    ("state", JobState::Completed.as_str()),
                    ("finished_at", finished_at.as_str()),
                ],
            )
            .await?;
        let _: () = conn.srem(self.key("active"), job_id).await?;
        let _: () = conn.zadd(self.key("completed"), job_id, now as f64).await?;
        self.clear_dedup_marker(job_id).await?;

        self.trim(&self.key("completed"), COMPLETED_KEEP, Some(COMPLETED_MAX_AGE_MS))
            .await?;
        Ok(())
    }

    /// Report a job failure. Retries with backoff while attempts remain,
    /// otherwise moves the job to the failed set.
    pub async fn fail(&self, job_id: &str, reason: &str) -> Result<FailOutcome> {
        let mut conn = self.conn.clone();
        let attempts: u32 = conn
            .hget::<_, _, Option<u32>>(self.job_key(job_id), "attempts")
            .await?
            .unwrap_or(0);

        let _: () = conn.srem(self.key("active"), job_id).await?;
        let _: () = conn
            .hset(self.job_key(job_id), "failed_reason", reason)
            .await?;

        if attempts < self.options.attempts {
            let delay_ms = retry_delay_ms(&self.options, attempts);
            let run_at = Utc::now().timestamp_millis() + delay_ms as i64;
            let _: () = conn
                .hset(self.job_key(job_id), "state", JobState::Delayed.as_str())
                .await?;
            let _: () = conn.zadd(self.key("delayed"), job_id, run_at as f64).await?;
            info!(job_id = %job_id, attempts, delay_ms, "Job scheduled for retry");
            return Ok(FailOutcome::Retried { delay_ms });
        }

        let now = Utc::now().timestamp_millis();
        let finished_at = now.to_string();
        let _: () = conn
            .hset_multiple(
                self.job_key(job_id),
                &[
                    ("state", JobState::Failed.as_str()),
                    ("finished_at", finished_at.as_str()),
                ],
            )
            .await?;
        let _: () = conn.zadd(self.key("failed"), job_id, now as f64).await?;
        self.clear_dedup_marker(job_id).await?;
        self.trim(&self.key("failed"), FAILED_KEEP, None).await?;
        Ok(FailOutcome::Failed)
    }

    /// Move due delayed jobs back to the waiting set. Runs from a periodic
    /// mover task; returns the number promoted.
    pub async fn promote_due(&self) -> Result<usize> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();

        let due: Vec<String> = conn
            .zrangebyscore(self.key("delayed"), f64::NEG_INFINITY, now as f64)
            .await?;
        for job_id in &due {
            let payload_json: Option<String> = conn.hget(self.job_key(job_id), "payload").await?;
            let _: () = conn.zrem(self.key("delayed"), job_id).await?;

            let Some(payload_json) = payload_json else {
                continue;
            };
            let Ok(payload) = serde_json::from_str::<JobPayload>(&payload_json) else {
                continue;
            };

            let seq: u64 = conn.incr(self.key("seq"), 1).await?;
            let score = waiting_score(payload.priority, seq);
            let _: () = conn
                .hset(self.job_key(job_id), "state", JobState::Waiting.as_str())
                .await?;
            let _: () = conn.zadd(self.key("waiting"), job_id, score).await?;
            debug!(job_id = %job_id, "Delayed job promoted");
        }
        Ok(due.len())
    }

    /// Queue depth counters for operator endpoints
    pub async fn counts(&self) -> Result<QueueCounts> {
        let mut conn = self.conn.clone();
        Ok(QueueCounts {
            waiting: conn.zcard(self.key("waiting")).await?,
            active: conn.scard(self.key("active")).await?,
            completed: conn.zcard(self.key("completed")).await?,
            failed: conn.zcard(self.key("failed")).await?,
            delayed: conn.zcard(self.key("delayed")).await?,
        })
    }

    /// Full record for a single job
    pub async fn job_detail(&self, job_id: &str) -> Result<Option<JobDetail>> {
        let mut conn = self.conn.clone();
        let fields: std::collections::HashMap<String, String> =
            conn.hgetall(self.job_key(job_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }

        let payload: JobPayload = match fields.get("payload") {
            Some(json) => serde_json::from_str(json)?,
            None => return Ok(None),
        };
        let state = fields
            .get("state")
            .and_then(|s| JobState::parse(s))
            .unwrap_or(JobState::Waiting);
        let progress = fields
            .get("progress")
            .and_then(|json| serde_json::from_str(json).ok());
        let parse_ms = |key: &str| fields.get(key).and_then(|v| v.parse::<i64>().ok());

        Ok(Some(JobDetail {
            id: job_id.to_string(),
            payload,
            state,
            attempts_made: fields
                .get("attempts")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            progress,
            created_at: parse_ms("created_at"),
            processed_at: parse_ms("processed_at"),
            finished_at: parse_ms("finished_at"),
            failed_reason: fields.get("failed_reason").cloned(),
        }))
    }

    pub async fn pause(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(self.key("paused"), 1).await?;
        info!("Queue paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.key("paused")).await?;
        info!("Queue resumed");
        Ok(())
    }

    pub async fn is_paused(&self) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(self.key("paused")).await?)
    }

    /// Remove completed and failed jobs older than one hour
    pub async fn clear(&self) -> Result<usize> {
        let cutoff = Utc::now().timestamp_millis() - CLEAR_AGE_MS;
        let mut removed = 0;
        for set in ["completed", "failed"] {
            removed += self.remove_older_than(&self.key(set), cutoff).await?;
        }
        info!("Queue clear removed {} terminal jobs", removed);
        Ok(removed)
    }

    /// Remove a job. Active jobs are a conflict: the worker owns them.
    pub async fn remove(&self, job_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let state: Option<String> = conn.hget(self.job_key(job_id), "state").await?;
        let Some(state) = state else {
            return Ok(false);
        };

        if JobState::parse(&state) == Some(JobState::Active) {
            return Err(Error::Conflict(format!(
                "job {} is active; use force-delete",
                job_id
            )));
        }

        self.purge(job_id).await?;
        Ok(true)
    }

    /// Force-delete: an active job is first moved to failed, then removed.
    /// The caller is responsible for signalling the owning worker's
    /// cancellation token; interruption is best-effort.
    pub async fn force_delete(&self, job_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let state: Option<String> = conn.hget(self.job_key(job_id), "state").await?;
        let Some(state) = state else {
            return Ok(false);
        };

        if JobState::parse(&state) == Some(JobState::Active) {
            let _: () = conn
                .hset_multiple(
                    self.job_key(job_id),
                    &[
                        ("state", JobState::Failed.as_str()),
                        ("failed_reason", "force-deleted by operator"),
                    ],
                )
                .await?;
            let _: () = conn.srem(self.key("active"), job_id).await?;
        }

        self.purge(job_id).await?;
        warn!(job_id = %job_id, "Job force-deleted");
        Ok(true)
    }

    /// Drop waiting/delayed jobs belonging to a project (reset-stuck).
    /// Active jobs are left for their cancellation tokens.
    pub async fn remove_for_project(&self, project_id: Uuid) -> Result<usize> {
        let id_prefix = format!("analysis-{}-", project_id);
        let mut conn = self.conn.clone();
        let mut removed = 0;

        for set in ["waiting", "delayed"] {
            let members: Vec<String> = conn.zrange(self.key(set), 0, -1).await?;
            for job_id in members {
                if job_id.starts_with(&id_prefix) {
                    let _: () = conn.zrem(self.key(set), &job_id).await?;
                    let _: () = conn.del(self.job_key(&job_id)).await?;
                    removed += 1;
                }
            }
        }
        // The project is being reset; allow a fresh enqueue immediately
        let _: () = conn.del(self.dedup_key(project_id)).await?;
        Ok(removed)
    }

    /// Delete a job's record and references everywhere
    async fn purge(&self, job_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        for set in ["waiting", "delayed", "completed", "failed"] {
            let _: () = conn.zrem(self.key(set), job_id).await?;
        }
        let _: () = conn.srem(self.key("active"), job_id).await?;
        let _: () = conn.del(self.job_key(job_id)).await?;
        self.clear_dedup_marker(job_id).await?;
        Ok(())
    }

    /// Keep the newest `keep` members; optionally drop members older than
    /// `max_age_ms`. Removed members lose their job record too.
    async fn trim(&self, set_key: &str, keep: usize, max_age_ms: Option<i64>) -> Result<()> {
        let mut conn = self.conn.clone();

        let count: u64 = conn.zcard(set_key).await?;
        let mut victims: Vec<String> = Vec::new();

        if count as usize > keep {
            let excess = count as isize - keep as isize;
            let oldest: Vec<String> = conn.zrange(set_key, 0, excess - 1).await?;
            victims.extend(oldest);
        }
        if let Some(max_age) = max_age_ms {
            let cutoff = Utc::now().timestamp_millis() - max_age;
            let expired: Vec<String> = conn
                .zrangebyscore(set_key, f64::NEG_INFINITY, cutoff as f64)
                .await?;
            victims.extend(expired);
        }

        victims.sort();
        victims.dedup();
        for job_id in victims {
            let _: () = conn.zrem(set_key, &job_id).await?;
            let _: () = conn.del(self.job_key(&job_id)).await?;
        }
        Ok(())
    }

    async fn remove_older_than(&self, set_key: &str, cutoff_ms: i64) -> Result<usize> {
        let mut conn = self.conn.clone();
        let victims: Vec<String> = conn
            .zrangebyscore(set_key, f64::NEG_INFINITY, cutoff_ms as f64)
            .await?;
        for job_id in &victims {
            let _: () = conn.zrem(set_key, job_id).await?;
            let _: () = conn.del(self.job_key(job_id)).await?;
        }
        Ok(victims.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_weights_order() {
        assert_eq!(JobPriority::High.weight(), 1);
        assert_eq!(JobPriority::Normal.weight(), 2);
        assert_eq!(JobPriority::Low.weight(), 3);
    }

    #[test]
    fn test_waiting_score_orders_priorities_before_sequence() {
        // Any high-priority job beats any normal-priority job
        let late_high = waiting_score(JobPriority::High, 1_000_000);
        let early_normal = waiting_score(JobPriority::Normal, 1);
        assert!(late_high < early_normal);

        // Within a priority, insertion order is preserved
        let first = waiting_score(JobPriority::Normal, 10);
        let second = waiting_score(JobPriority::Normal, 11);
        assert!(first < second);
    }

    #[test]
    fn test_waiting_score_sequence_is_exact() {
        // Scores must stay exactly representable in f64 for deterministic
        // ordering
        let a = waiting_score(JobPriority::Low, (1 << 40) - 2);
        let b = waiting_score(JobPriority::Low, (1 << 40) - 1);
        assert!(b > a);
    }

    #[test]
    fn test_retry_delay_exponential_with_jitter() {
        let options = QueueOptions {
            attempts: 5,
            backoff_base_ms: 2000,
            backoff_multiplier: 2.0,
            backoff_max_ms: 60_000,
        };

        for _ in 0..50 {
            let first = retry_delay_ms(&options, 1);
            assert!((1600..=2400).contains(&first), "first delay {first}");

            let second = retry_delay_ms(&options, 2);
            assert!((3200..=4800).contains(&second), "second delay {second}");

            // Deep attempts clamp at the cap
            let deep = retry_delay_ms(&options, 10);
            assert!(deep <= 60_000);
        }
    }

    #[test]
    fn test_job_payload_wire_format() {
        let payload = JobPayload {
            project_id: Uuid::new_v4(),
            project_path: "/projects/demo".to_string(),
            project_name: "demo".to_string(),
            priority: JobPriority::High,
            force_refresh: false,
        };

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"projectPath\":\"/projects/demo\""));
        assert!(json.contains("\"priority\":\"high\""));

        // forceRefresh defaults to false when absent
        let parsed: JobPayload = serde_json::from_str(
            &json.replace(",\"forceRefresh\":false", ""),
        )
        .unwrap();
        assert!(!parsed.force_refresh);
    }

    #[test]
    fn test_project_of_parses_job_ids() {
        let project_id = Uuid::new_v4();
        let job_id = format!("analysis-{}-1700000000000", project_id);
        assert_eq!(project_of(&job_id), Some(project_id));

        assert_eq!(project_of("analysis-not-a-uuid-1700000000000"), None);
        assert_eq!(project_of("something-else"), None);
        assert_eq!(project_of("analysis-"), None);
    }

    #[test]
    fn test_enqueue_outcome_accessors() {
        let fresh = EnqueueOutcome::Enqueued("analysis-a-1".to_string());
        assert_eq!(fresh.job_id(), "analysis-a-1");
        assert!(!fresh.is_duplicate());

        let duplicate = EnqueueOutcome::AlreadyQueued("analysis-a-0".to_string());
        assert_eq!(duplicate.job_id(), "analysis-a-0");
        assert!(duplicate.is_duplicate());
    }

    #[test]
    fn test_job_state_round_trip() {
        for state in [
            JobState::Waiting,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
            JobState::Delayed,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
    }
}
