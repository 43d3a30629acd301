//! Worker processor
//!
//! Drives one claimed job through the pipeline:
//! cache lookup → context extraction → rate-limited analysis → cache write
//! → persistence. Progress is reported at fixed stages both on the bus and
//! into the job record, and `analysis:started` always precedes any progress,
//! which precedes the single terminal `analysis:completed`/`analysis:failed`.
//!
//! The processor itself never retries: network retries belong to the
//! executor, job retries to the queue. Cancellation is cooperative via a
//! per-job token honoured at the analyzer transport.

use crate::analyzer::{Analyzer, AnalyzerError};
use crate::cache::ResultCache;
use crate::context::{self, ProjectContext};
use crate::limiter::{ExecuteOptions, RateLimitedExecutor};
use crate::publisher::EventPublisher;
use crate::queue::{AnalysisQueue, Job};
use chrono::{DateTime, Utc};
use scout_common::config::WorkerConfig;
use scout_common::db::analyses::{self, NewAnalysis};
use scout_common::db::{projects, Analysis, ProjectStatus};
use scout_common::events::JobProgress;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Hard timeout on context extraction
const CONTEXT_TIMEOUT_MS: u64 = 30_000;

/// Idle poll interval when the queue is empty or paused
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Delayed-job promotion interval
const MOVER_INTERVAL: Duration = Duration::from_secs(1);

/// Tracks cancellation tokens for jobs currently being processed, so
/// force-delete and reset-stuck can interrupt them (best-effort: the token
/// is honoured at the next await boundary).
#[derive(Default)]
pub struct CancelRegistry {
    inner: Mutex<HashMap<String, CancellationToken>>,
}

impl CancelRegistry {
    pub fn register(&self, job_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .insert(job_id.to_string(), token.clone());
        token
    }

    pub fn remove(&self, job_id: &str) {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .remove(job_id);
    }

    /// Cancel a running job by id. Returns false when the job isn't active
    /// on this worker.
    pub fn cancel(&self, job_id: &str) -> bool {
        let guard = self.inner.lock().expect("registry lock poisoned");
        match guard.get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running job belonging to a project
    pub fn cancel_for_project(&self, project_id: Uuid) -> usize {
        let prefix = format!("analysis-{}-", project_id);
        let guard = self.inner.lock().expect("registry lock poisoned");
        let mut cancelled = 0;
        for (job_id, token) in guard.iter() {
            if job_id.starts_with(&prefix) {
                token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").len()
    }

    /// Cancel everything (shutdown grace expiry)
    pub fn cancel_all(&self) {
        for token in self.inner.lock().expect("registry lock poisoned").values() {
            token.cancel();
        }
    }
}

/// One job's pipeline executor
pub struct WorkerProcessor {
    db: SqlitePool,
    publisher: EventPublisher,
    executor: RateLimitedExecutor,
    analyzer: Arc<dyn Analyzer>,
    config: WorkerConfig,
    cache: Option<ResultCache>,
    queue: Option<AnalysisQueue>,
}

impl WorkerProcessor {
    pub fn new(
        db: SqlitePool,
        publisher: EventPublisher,
        executor: RateLimitedExecutor,
        analyzer: Arc<dyn Analyzer>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            db,
            publisher,
            executor,
            analyzer,
            config,
            cache: None,
            queue: None,
        }
    }

    /// Attach the result cache
    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attach the queue for progress/terminal bookkeeping
    pub fn with_queue(mut self, queue: AnalysisQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Run one job to completion or failure. Terminal bookkeeping (events,
    /// progress, job state, project status) happens here; the queue decides
    /// about retries.
    pub async fn process(&self, job: &Job, cancel: CancellationToken) {
        let project_id = job.payload.project_id;
        info!(
            job_id = %job.id,
            project = %job.payload.project_name,
            attempt = job.attempts_made,
            "Processing analysis job"
        );

        match self.run_pipeline(job, &cancel).await {
            Ok(analysis) => {
                self.progress(job, project_id, JobProgress::stage("completed", 100))
                    .await;
                self.publisher.analysis_completed(project_id, &analysis).await;
                if let Some(queue) = &self.queue {
                    if let Err(e) = queue.complete(&job.id).await {
                        warn!("Failed to mark job completed: {}", e);
                    }
                }
                info!(job_id = %job.id, cache_hit = analysis.cache_hit, "Analysis complete");
            }
            Err(reason) => {
                warn!(job_id = %job.id, "Analysis failed: {}", reason);
                self.publisher
                    .analysis_failed(project_id, &job.id, &reason)
                    .await;
                self.progress(job, project_id, JobProgress::failed(reason.clone()))
                    .await;
                if let Err(e) =
                    projects::set_status(&self.db, project_id, ProjectStatus::Error).await
                {
                    warn!("Failed to set project error status: {}", e);
                }
                if let Some(queue) = &self.queue {
                    if let Err(e) = queue.fail(&job.id, &reason).await {
                        warn!("Failed to record job failure: {}", e);
                    }
                }
            }
        }
    }

    async fn run_pipeline(&self, job: &Job, cancel: &CancellationToken) -> Result<Analysis, String> {
        let project_id = job.payload.project_id;
        let path = job.payload.project_path.clone();

        self.publisher.analysis_started(project_id, &job.id).await;
        self.progress(job, project_id, JobProgress::stage("queued", 0))
            .await;
        projects::set_status(&self.db, project_id, ProjectStatus::Analyzing)
            .await
            .map_err(|e| format!("failed to mark project analyzing: {e}"))?;

        // The directory must still exist; a user-visible reason otherwise
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| format!("project path no longer exists: {path}"))?;
        if !meta.is_dir() {
            return Err(format!("project path is not a directory: {path}"));
        }
        let last_modified: DateTime<Utc> = meta
            .modified()
            .map(DateTime::from)
            .map_err(|e| format!("cannot stat project directory: {e}"))?;

        // Cache short-circuit
        if !job.payload.force_refresh {
            if let Some(cache) = &self.cache {
                if let Some(entry) = cache.get(&path, last_modified).await {
                    debug!(job_id = %job.id, "Cache hit; persisting cached result");
                    let mut result = entry.result;
                    result.cache_hit = true;
                    return self.persist(project_id, &result).await;
                }
            }
        }

        // Context extraction, off the runtime, hard 30 s budget
        self.progress(job, project_id, JobProgress::stage("extracting", 20))
            .await;
        let max_tokens = self.config.max_context_tokens;
        let extract_path = PathBuf::from(&path);
        let context: ProjectContext = tokio::time::timeout(
            Duration::from_millis(CONTEXT_TIMEOUT_MS),
            tokio::task::spawn_blocking(move || context::extract_context(&extract_path, max_tokens)),
        )
        .await
        .map_err(|_| format!("context extraction timed out after {CONTEXT_TIMEOUT_MS} ms"))?
        .map_err(|e| format!("context extraction panicked: {e}"))?;

        projects::update_stats(
            &self.db,
            project_id,
            context.summary.file_count,
            context.summary.lines_of_code,
            context.summary.total_size,
        )
        .await
        .map_err(|e| format!("failed to update project statistics: {e}"))?;

        // Rate-limited analyzer call; each attempt gets the full AI timeout
        self.progress(job, project_id, JobProgress::stage("analyzing", 50))
            .await;
        let ai_timeout = Duration::from_millis(self.config.ai_timeout_ms);
        let analyzer = self.analyzer.clone();
        let on_retry = |attempt: u32, error: &AnalyzerError| {
            warn!(attempt, "Analyzer attempt failed: {}", error);
        };
        let result = self
            .executor
            .execute(
                || {
                    let analyzer = analyzer.clone();
                    let context = &context;
                    let cancel = cancel.clone();
                    async move {
                        match tokio::time::timeout(
                            ai_timeout,
                            analyzer.analyze(context, project_id, &cancel),
                        )
                        .await
                        {
                            Ok(result) => result,
                            Err(_) => Err(AnalyzerError::Timeout {
                                label: "analysis".to_string(),
                                ms: ai_timeout.as_millis() as u64,
                            }),
                        }
                    }
                },
                ExecuteOptions {
                    max_retries: None,
                    on_retry: Some(&on_retry),
                },
            )
            .await
            .map_err(|e| e.to_string())?;

        // Cache write before persistence; a failed write only costs a miss
        self.progress(job, project_id, JobProgress::stage("caching", 80))
            .await;
        if let Some(cache) = &self.cache {
            cache.set(&path, last_modified, &result).await;
        }

        self.progress(job, project_id, JobProgress::stage("caching", 90))
            .await;
        self.persist(project_id, &result).await
    }

    /// Insert the analysis row and flip the project to ANALYZED in one
    /// transaction.
    async fn persist(
        &self,
        project_id: Uuid,
        result: &crate::analyzer::AnalysisResult,
    ) -> Result<Analysis, String> {
        let new = NewAnalysis {
            project_id,
            summary: result.summary.clone(),
            tech_stack: result.tech_stack.clone(),
            complexity: result.complexity.as_str().to_string(),
            recommendations: result.recommendations.clone(),
            completion_score: result.completion_score as i64,
            maturity_level: result.maturity_level.as_str().to_string(),
            production_gaps: result.production_gaps.clone(),
            estimated_value: result.estimated_value.clone(),
            model: result.model.clone(),
            tokens_used: result.tokens_used as i64,
            cache_hit: result.cache_hit,
        };
        analyses::insert_completed(&self.db, &new)
            .await
            .map_err(|e| format!("failed to persist analysis: {e}"))
    }

    async fn progress(&self, job: &Job, project_id: Uuid, progress: JobProgress) {
        if let Some(queue) = &self.queue {
            if let Err(e) = queue.update_progress(&job.id, &progress).await {
                warn!("Failed to record job progress: {}", e);
            }
        }
        self.publisher.analysis_progress(project_id, &progress).await;
    }
}

/// One worker task: claim, process, repeat until shutdown
pub async fn run_worker(
    worker_id: usize,
    queue: AnalysisQueue,
    processor: Arc<WorkerProcessor>,
    registry: Arc<CancelRegistry>,
    shutdown: CancellationToken,
) {
    info!(worker_id, "Worker started");
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match queue.next().await {
            Ok(Some(job)) => {
                let token = registry.register(&job.id);
                processor.process(&job, token).await;
                registry.remove(&job.id);
            }
            Ok(None) => {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(IDLE_POLL) => {}
                }
            }
            Err(e) => {
                warn!(worker_id, "Queue poll failed: {}", e);
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        }
    }
    info!(worker_id, "Worker stopped");
}

/// Periodic task promoting due delayed jobs back into the waiting set
pub async fn run_delayed_mover(queue: AnalysisQueue, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(MOVER_INTERVAL) => {
                match queue.promote_due().await {
                    Ok(promoted) if promoted > 0 => {
                        debug!(promoted, "Promoted delayed jobs");
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Delayed-job promotion failed: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{parse_analysis, AnalysisResult};
    use crate::queue::{JobPayload, JobPriority};
    use async_trait::async_trait;
    use scout_common::config::RateLimitConfig;
    use scout_common::events::ScoutEvent;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StubAnalyzer {
        calls: AtomicUsize,
        fail: bool,
    }

    impl StubAnalyzer {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl Analyzer for StubAnalyzer {
        async fn analyze(
            &self,
            _context: &ProjectContext,
            _project_id: Uuid,
            _cancel: &CancellationToken,
        ) -> Result<AnalysisResult, AnalyzerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AnalyzerError::Api {
                    status: 400,
                    message: "bad request".to_string(),
                });
            }
            Ok(parse_analysis(
                "```json\n{\"summary\": \"stub analysis\", \"completionScore\": 70, \
                 \"complexity\": \"simple\", \"maturityLevel\": \"mvp\"}\n```",
                "stub-model",
                321,
            ))
        }

        fn model(&self) -> &str {
            "stub-model"
        }
    }

    async fn harness(
        analyzer: Arc<dyn Analyzer>,
    ) -> (SqlitePool, WorkerProcessor, EventPublisher, Job, TempDir) {
        let pool = scout_common::db::init_memory_pool().await.unwrap();
        let root = TempDir::new().unwrap();
        let dir = root.path().join("demo");
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("package.json"), r#"{"name":"demo"}"#).unwrap();
        fs::write(dir.join("src/index.js"), "console.log('hi');\n").unwrap();

        let meta = scout_common::detect::extract(&dir);
        let project = projects::insert_discovered(&pool, &meta).await.unwrap();

        let publisher = EventPublisher::detached();
        let processor = WorkerProcessor::new(
            pool.clone(),
            publisher.clone(),
            RateLimitedExecutor::new(RateLimitConfig::default()),
            analyzer,
            WorkerConfig::default(),
        );

        let job = Job {
            id: format!("analysis-{}-1700000000000", project.id),
            payload: JobPayload {
                project_id: project.id,
                project_path: project.path.clone(),
                project_name: project.name.clone(),
                priority: JobPriority::Normal,
                force_refresh: false,
            },
            attempts_made: 1,
        };

        (pool, processor, publisher, job, root)
    }

    fn drain(events: &mut tokio::sync::broadcast::Receiver<ScoutEvent>) -> Vec<ScoutEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_happy_path_event_sequence_and_persistence() {
        let (pool, processor, publisher, job, _root) = harness(Arc::new(StubAnalyzer::ok())).await;
        let mut events = publisher.subscribe();

        processor.process(&job, CancellationToken::new()).await;

        let events = drain(&mut events);
        let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();

        // started · progress* · completed
        assert_eq!(types.first().copied(), Some("analysis:started"));
        assert_eq!(types.last().copied(), Some("analysis:completed"));
        let progress_count = types.iter().filter(|t| **t == "analysis:progress").count();
        assert!(progress_count >= 2, "expected ≥2 progress events: {types:?}");
        assert_eq!(
            types
                .iter()
                .filter(|t| **t == "analysis:completed" || **t == "analysis:failed")
                .count(),
            1
        );

        // Progress percentages never decrease
        let percents: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                ScoutEvent::AnalysisProgress { data, .. } => {
                    data.get("percent").and_then(|p| p.as_u64())
                }
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");

        let project_id = job.payload.project_id;
        let project = projects::find_by_id(&pool, project_id).await.unwrap().unwrap();
        assert_eq!(project.status, ProjectStatus::Analyzed);
        assert!(project.analyzed_at.is_some());
        assert!(project.file_count > 0);

        let list = analyses::list_for_project(&pool, project_id).await.unwrap();
        assert_eq!(list.len(), 1);
        assert!(!list[0].cache_hit);
        assert_eq!(list[0].completion_score, 70);
    }

    #[tokio::test]
    async fn test_missing_path_fails_with_reason() {
        let (pool, processor, publisher, mut job, root) =
            harness(Arc::new(StubAnalyzer::ok())).await;
        drop(root);
        job.payload.project_path = "/definitely/not/here".to_string();
        let mut events = publisher.subscribe();

        processor.process(&job, CancellationToken::new()).await;

        let events = drain(&mut events);
        let last = events.last().expect("events emitted");
        // Terminal failed event follows the failure progress
        let failed = events
            .iter()
            .find(|e| e.event_type() == "analysis:failed")
            .expect("failed event");
        match failed {
            ScoutEvent::AnalysisFailed { data, .. } => {
                let reason = data.get("error").and_then(|e| e.as_str()).unwrap();
                assert!(reason.contains("no longer exists"), "{reason}");
            }
            _ => unreachable!(),
        }
        assert_ne!(last.event_type(), "analysis:completed");

        let project = projects::find_by_id(&pool, job.payload.project_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(project.status, ProjectStatus::Error);
        assert!(project.analyzed_at.is_none());
    }

    #[tokio::test]
    async fn test_fatal_analyzer_error_fails_without_completion() {
        let (pool, processor, publisher, job, _root) =
            harness(Arc::new(StubAnalyzer::failing())).await;
        let mut events = publisher.subscribe();

        processor.process(&job, CancellationToken::new()).await;

        let types: Vec<&str> = drain(&mut events).iter().map(|e| e.event_type()).collect::<Vec<_>>();
        assert!(types.contains(&"analysis:failed"));
        assert!(!types.contains(&"analysis:completed"));

        let count = analyses::count_for_project(&pool, job.payload.project_id)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_cancellation_surfaces_as_failure() {
        struct HangingAnalyzer;

        #[async_trait]
        impl Analyzer for HangingAnalyzer {
            async fn analyze(
                &self,
                _context: &ProjectContext,
                _project_id: Uuid,
                cancel: &CancellationToken,
            ) -> Result<AnalysisResult, AnalyzerError> {
                cancel.cancelled().await;
                Err(AnalyzerError::Cancelled)
            }

            fn model(&self) -> &str {
                "hanging"
            }
        }

        let (_pool, processor, publisher, job, _root) = harness(Arc::new(HangingAnalyzer)).await;
        let mut events = publisher.subscribe();

        let cancel = CancellationToken::new();
        let cancel_soon = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_soon.cancel();
        });

        processor.process(&job, cancel).await;

        let types: Vec<String> = drain(&mut events)
            .iter()
            .map(|e| e.event_type().to_string())
            .collect();
        assert!(types.contains(&"analysis:failed".to_string()));
    }

    #[test]
    fn test_cancel_registry_by_job_and_project() {
        let registry = CancelRegistry::default();
        let project_id = Uuid::new_v4();
        let job_id = format!("analysis-{}-1700000000000", project_id);

        let token = registry.register(&job_id);
        assert!(!token.is_cancelled());
        assert_eq!(registry.active_count(), 1);

        assert!(registry.cancel(&job_id));
        assert!(token.is_cancelled());
        assert!(!registry.cancel("analysis-unknown-0"));

        let other = registry.register(&format!("analysis-{}-1700000000001", project_id));
        assert_eq!(registry.cancel_for_project(project_id), 2);
        assert!(other.is_cancelled());

        registry.remove(&job_id);
        assert_eq!(registry.active_count(), 1);
    }
}
