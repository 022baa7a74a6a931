use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::job::{AnalysisJob, EnrichedFood, MealType};
use super::repo::AnalysisRepo;
use crate::config::AppConfig;
use crate::nutrition::{FoodResolver, ResolveFault};
use crate::storage::{analysis_image_key, StorageClient};
use crate::vision::FoodDetector;

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Resolve(#[from] ResolveFault),
    #[error("analysis worker panicked")]
    Panicked,
    #[error("analysis worker aborted: {0}")]
    Aborted(String),
    #[error("analysis workers are shut down")]
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("analysis queue is full ({0} jobs in flight)")]
    QueueFull(usize),
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("analysis {0} not found")]
    NotFound(Uuid),
    #[error("analysis store unavailable: {0}")]
    Storage(#[source] anyhow::Error),
}

/// Sizing of the worker pool.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Jobs executing at once.
    pub workers: usize,
    /// Accepted jobs allowed to wait for a worker.
    pub queue: usize,
    pub archive_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            queue: 32,
            archive_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&AppConfig> for PipelineSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            workers: cfg.analysis_workers,
            queue: cfg.analysis_queue,
            archive_timeout: cfg.storage.timeout(),
        }
    }
}

/// Everything the transport layer hands over for one analysis.
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub owner_id: Uuid,
    pub image: Bytes,
    pub content_type: String,
    pub meal_type: Option<MealType>,
    pub notes: Option<String>,
}

struct JobSlot {
    job: AnalysisJob,
    persisted: bool,
}

struct Inner {
    detector: Arc<dyn FoodDetector>,
    resolver: Arc<dyn FoodResolver>,
    repo: Arc<dyn AnalysisRepo>,
    storage: Option<Arc<dyn StorageClient>>,
    jobs: DashMap<Uuid, JobSlot>,
    workers: Arc<Semaphore>,
    // one permit per accepted, unfinished job
    backlog: Arc<Semaphore>,
    capacity: usize,
    archive_timeout: Duration,
}

/// Accepts images, runs detection and nutrition resolution in the
/// background, and answers status queries for the owner of each job.
#[derive(Clone)]
pub struct AnalysisPipeline {
    inner: Arc<Inner>,
}

impl AnalysisPipeline {
    pub fn new(
        detector: Arc<dyn FoodDetector>,
        resolver: Arc<dyn FoodResolver>,
        repo: Arc<dyn AnalysisRepo>,
        storage: Option<Arc<dyn StorageClient>>,
        settings: PipelineSettings,
    ) -> Self {
        let workers = settings.workers.max(1);
        let capacity = workers + settings.queue;
        Self {
            inner: Arc::new(Inner {
                detector,
                resolver,
                repo,
                storage,
                jobs: DashMap::new(),
                workers: Arc::new(Semaphore::new(workers)),
                backlog: Arc::new(Semaphore::new(capacity)),
                capacity,
                archive_timeout: settings.archive_timeout,
            }),
        }
    }

    /// Registers the job as processing and schedules it. Never waits on
    /// detection or resolution; refuses work once the backlog is full.
    pub fn submit(&self, req: NewAnalysis) -> Result<Uuid, SubmitError> {
        let admission = Arc::clone(&self.inner.backlog)
            .try_acquire_owned()
            .map_err(|_| SubmitError::QueueFull(self.inner.capacity))?;

        let job = AnalysisJob::new(req.owner_id, req.meal_type, req.notes);
        let id = job.id;
        self.inner.jobs.insert(
            id,
            JobSlot {
                job,
                persisted: false,
            },
        );
        info!(job_id = %id, owner_id = %req.owner_id, bytes = req.image.len(), "analysis submitted");

        tokio::spawn(run(
            Arc::clone(&self.inner),
            id,
            req.owner_id,
            req.image,
            req.content_type,
            admission,
        ));
        Ok(id)
    }

    /// Snapshot of a job, visible only to its owner. Jobs no longer held in
    /// memory are looked up in the durable store.
    pub async fn get_status(&self, id: Uuid, owner_id: Uuid) -> Result<AnalysisJob, StatusError> {
        let live = self.inner.jobs.get(&id).map(|slot| slot.job.clone());
        if let Some(job) = live {
            return if job.owner_id == owner_id {
                Ok(job)
            } else {
                Err(StatusError::NotFound(id))
            };
        }

        match self.inner.repo.find(id, owner_id).await {
            Ok(Some(job)) => Ok(job),
            Ok(None) => Err(StatusError::NotFound(id)),
            Err(e) => Err(StatusError::Storage(e)),
        }
    }

    /// Drops persisted terminal jobs finished more than `retention` ago.
    pub fn evict_terminal(&self, retention: Duration) -> usize {
        let cutoff = OffsetDateTime::now_utc() - retention;
        let before = self.inner.jobs.len();
        self.inner.jobs.retain(|_, slot| {
            !(slot.persisted && slot.job.completed_at.is_some_and(|done| done <= cutoff))
        });
        before.saturating_sub(self.inner.jobs.len())
    }
}

#[instrument(skip_all, fields(job_id = %id))]
async fn run(
    inner: Arc<Inner>,
    id: Uuid,
    owner_id: Uuid,
    image: Bytes,
    content_type: String,
    _admission: OwnedSemaphorePermit,
) {
    let started = Instant::now();

    let _permit = match Arc::clone(&inner.workers).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            finish(&inner, id, Err(JobError::Closed), started.elapsed()).await;
            return;
        }
    };

    // A panic inside archival, detection or resolution surfaces as a
    // JoinError here instead of leaving the job in processing.
    let worker = tokio::spawn(execute(
        Arc::clone(&inner),
        id,
        owner_id,
        image,
        content_type,
    ));
    let outcome = match worker.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(JobError::Panicked),
        Err(e) => Err(JobError::Aborted(e.to_string())),
    };

    finish(&inner, id, outcome, started.elapsed()).await;
}

async fn execute(
    inner: Arc<Inner>,
    id: Uuid,
    owner_id: Uuid,
    image: Bytes,
    content_type: String,
) -> Result<Vec<EnrichedFood>, JobError> {
    if let Some(storage) = &inner.storage {
        archive(&inner, storage.as_ref(), id, owner_id, &image, &content_type).await;
    }

    let detections = inner.detector.detect(&image).await;
    debug!(count = detections.len(), "resolving detected foods");

    let mut foods = Vec::with_capacity(detections.len());
    for detection in detections {
        let resolved = inner
            .resolver
            .resolve_food(&detection.name, detection.estimated_portion_grams)
            .await?;
        foods.push(EnrichedFood::new(detection, resolved));
    }
    Ok(foods)
}

/// Best-effort copy of the submitted image; failure or timeout only loses
/// the stored key.
async fn archive(
    inner: &Inner,
    storage: &dyn StorageClient,
    id: Uuid,
    owner_id: Uuid,
    image: &Bytes,
    content_type: &str,
) {
    let key = analysis_image_key(owner_id, id, content_type);
    let upload = storage.put_object(&key, image.clone(), content_type);
    let outcome = tokio::time::timeout(inner.archive_timeout, upload).await;
    match outcome {
        Ok(Ok(())) => {
            if let Some(mut slot) = inner.jobs.get_mut(&id) {
                slot.job.image_key = Some(key);
            }
        }
        Ok(Err(e)) => warn!(error = %e, "image archival failed; continuing without it"),
        Err(_) => warn!(
            timeout_ms = inner.archive_timeout.as_millis() as u64,
            "image archival timed out; continuing without it"
        ),
    }
}

async fn finish(
    inner: &Inner,
    id: Uuid,
    outcome: Result<Vec<EnrichedFood>, JobError>,
    elapsed: Duration,
) {
    let snapshot = {
        let Some(mut slot) = inner.jobs.get_mut(&id) else {
            warn!(job_id = %id, "job vanished before completion");
            return;
        };
        let transition = match outcome {
            Ok(foods) => slot.job.complete(foods, elapsed),
            Err(e) => {
                warn!(job_id = %id, error = %e, "analysis failed");
                slot.job.fail(e.to_string(), elapsed)
            }
        };
        if let Err(e) = transition {
            warn!(error = %e, "ignoring second terminal transition");
            return;
        }
        slot.job.clone()
    };
    info!(
        job_id = %id,
        status = %snapshot.status,
        elapsed_ms = snapshot.processing_time_ms,
        "analysis finished"
    );

    match inner.repo.save(&snapshot).await {
        Ok(()) => {
            if let Some(mut slot) = inner.jobs.get_mut(&id) {
                slot.persisted = true;
            }
        }
        Err(e) => warn!(job_id = %id, error = %e, "failed to persist analysis; keeping it in memory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::job::JobStatus;
    use crate::analysis::repo::tests::MemoryAnalysisRepo;
    use crate::nutrition::cache::MemoryCache;
    use crate::nutrition::resolver::tests::{apple_per_100g, Behaviour, FakePrimary, FakeSecondary};
    use crate::nutrition::{NutritionResolver, Resolution, ResolverSettings, SourceTag};
    use crate::vision::detector::tests::ScriptedModel;
    use crate::vision::{FoodDetection, VisionDetector};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    struct FixedDetector(Vec<FoodDetection>);

    #[async_trait]
    impl FoodDetector for FixedDetector {
        async fn detect(&self, _image: &[u8]) -> Vec<FoodDetection> {
            self.0.clone()
        }
    }

    struct GatedDetector {
        gate: Notify,
        inner: FixedDetector,
    }

    #[async_trait]
    impl FoodDetector for GatedDetector {
        async fn detect(&self, image: &[u8]) -> Vec<FoodDetection> {
            self.gate.notified().await;
            self.inner.detect(image).await
        }
    }

    struct PanickingDetector;

    #[async_trait]
    impl FoodDetector for PanickingDetector {
        async fn detect(&self, _image: &[u8]) -> Vec<FoodDetection> {
            panic!("detector bug");
        }
    }

    /// Resolver double that faults on the n-th call (1-based).
    struct FaultOnCall {
        fault_at: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FoodResolver for FaultOnCall {
        async fn resolve_food(&self, name: &str, grams: f64) -> Result<Resolution, ResolveFault> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fault_at {
                return Err(ResolveFault::Internal(format!("lookup of {name} blew up")));
            }
            Ok(Resolution {
                nutrition: apple_per_100g().scaled(grams),
                source: SourceTag::Estimated,
                portion_grams: grams,
                category: None,
                matched_name: None,
            })
        }
    }

    #[derive(Default)]
    struct RecordingStorage {
        keys: Mutex<Vec<String>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl StorageClient for RecordingStorage {
        async fn put_object(&self, key: &str, _body: Bytes, _ct: &str) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("bucket missing");
            }
            self.keys.lock().unwrap().push(key.to_string());
            Ok(())
        }
    }

    /// Accepts the upload and never answers.
    struct StalledStorage;

    #[async_trait]
    impl StorageClient for StalledStorage {
        async fn put_object(&self, _key: &str, _body: Bytes, _ct: &str) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct PanickingStorage;

    #[async_trait]
    impl StorageClient for PanickingStorage {
        async fn put_object(&self, _key: &str, _body: Bytes, _ct: &str) -> anyhow::Result<()> {
            panic!("storage client bug");
        }
    }

    fn detection(name: &str, grams: f64) -> FoodDetection {
        FoodDetection {
            name: name.into(),
            estimated_portion_grams: grams,
            confidence: 8,
            notes: None,
        }
    }

    fn request(owner_id: Uuid) -> NewAnalysis {
        NewAnalysis {
            owner_id,
            image: Bytes::from_static(b"\xff\xd8\xff fake jpeg"),
            content_type: "image/jpeg".into(),
            meal_type: Some(MealType::Lunch),
            notes: None,
        }
    }

    fn settings(workers: usize) -> PipelineSettings {
        PipelineSettings {
            workers,
            archive_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn estimating_resolver() -> Arc<dyn FoodResolver> {
        Arc::new(FaultOnCall {
            fault_at: usize::MAX,
            calls: AtomicUsize::new(0),
        })
    }

    async fn wait_terminal(p: &AnalysisPipeline, id: Uuid, owner: Uuid) -> AnalysisJob {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = p.get_status(id, owner).await.unwrap();
                if job.status.is_terminal() {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job never left processing")
    }

    async fn wait_persisted(repo: &MemoryAnalysisRepo, id: Uuid) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !repo.saved.contains_key(&id) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("job never persisted");
    }

    #[tokio::test]
    async fn apple_photo_completes_with_scaled_totals() {
        let model = ScriptedModel::replying(
            r#"[{"name":"apple","estimated_portion_grams":150,"confidence":8}]"#,
        );
        let detector = Arc::new(VisionDetector::new(model, Duration::from_secs(1)));
        let resolver = Arc::new(NutritionResolver::new(
            Arc::new(MemoryCache::new()),
            FakePrimary::new(Behaviour::Found(apple_per_100g())),
            FakeSecondary::new(Behaviour::NotFound),
            ResolverSettings::default(),
        ));
        let repo = Arc::new(MemoryAnalysisRepo::default());
        let pipeline = AnalysisPipeline::new(detector, resolver, repo.clone(), None, settings(2));

        let owner = Uuid::new_v4();
        let id = pipeline.submit(request(owner)).unwrap();
        let job = wait_terminal(&pipeline, id, owner).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.detected_foods.len(), 1);
        assert_eq!(job.detected_foods[0].source, SourceTag::PrimarySource);
        let total = job.total_nutrition.unwrap();
        assert_eq!(total.calories, 78.0);
        assert_eq!(total.protein_g, 0.39);
        assert_eq!(total.carbs_g, 20.72);
        assert_eq!(total.fat_g, 0.26);
        assert_eq!(total, job.detected_foods[0].nutrition);
        assert_eq!(job.confidence_score, Some(8));
        assert!(job.completed_at.is_some());

        wait_persisted(&repo, id).await;
        assert_eq!(repo.saved.get(&id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn resolver_fault_fails_job_without_partial_results() {
        let detector = Arc::new(FixedDetector(vec![
            detection("toast", 40.0),
            detection("egg", 60.0),
            detection("bacon", 30.0),
        ]));
        let resolver = Arc::new(FaultOnCall {
            fault_at: 2,
            calls: AtomicUsize::new(0),
        });
        let repo = Arc::new(MemoryAnalysisRepo::default());
        let pipeline = AnalysisPipeline::new(detector, resolver.clone(), repo, None, settings(1));

        let owner = Uuid::new_v4();
        let id = pipeline.submit(request(owner)).unwrap();
        let job = wait_terminal(&pipeline, id, owner).await;

        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.detected_foods.is_empty());
        assert!(job.total_nutrition.is_none());
        assert!(job.error.as_deref().unwrap().contains("egg"));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_worker_fails_job() {
        let pipeline = AnalysisPipeline::new(
            Arc::new(PanickingDetector),
            estimating_resolver(),
            Arc::new(MemoryAnalysisRepo::default()),
            None,
            settings(1),
        );
        let owner = Uuid::new_v4();
        let id = pipeline.submit(request(owner)).unwrap();
        let job = wait_terminal(&pipeline, id, owner).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("analysis worker panicked"));
    }

    #[tokio::test]
    async fn submit_returns_before_detection_finishes() {
        let detector = Arc::new(GatedDetector {
            gate: Notify::new(),
            inner: FixedDetector(vec![detection("banana", 120.0)]),
        });
        let pipeline = AnalysisPipeline::new(
            detector.clone(),
            estimating_resolver(),
            Arc::new(MemoryAnalysisRepo::default()),
            None,
            settings(1),
        );

        let owner = Uuid::new_v4();
        let id = pipeline.submit(request(owner)).unwrap();
        let pending = pipeline.get_status(id, owner).await.unwrap();
        assert_eq!(pending.status, JobStatus::Processing);
        assert!(pending.completed_at.is_none());

        detector.gate.notify_one();
        let job = wait_terminal(&pipeline, id, owner).await;
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn jobs_are_invisible_to_other_owners() {
        let repo = Arc::new(MemoryAnalysisRepo::default());
        let pipeline = AnalysisPipeline::new(
            Arc::new(FixedDetector(vec![detection("rice", 180.0)])),
            estimating_resolver(),
            repo.clone(),
            None,
            settings(1),
        );
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let id = pipeline.submit(request(owner)).unwrap();

        assert!(matches!(
            pipeline.get_status(id, stranger).await,
            Err(StatusError::NotFound(_))
        ));
        wait_terminal(&pipeline, id, owner).await;
        wait_persisted(&repo, id).await;
        assert!(matches!(
            pipeline.get_status(id, stranger).await,
            Err(StatusError::NotFound(_))
        ));
        assert!(matches!(
            pipeline.get_status(Uuid::new_v4(), owner).await,
            Err(StatusError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn resubmitting_the_same_image_creates_independent_jobs() {
        let pipeline = AnalysisPipeline::new(
            Arc::new(FixedDetector(vec![detection("pasta", 200.0)])),
            estimating_resolver(),
            Arc::new(MemoryAnalysisRepo::default()),
            None,
            settings(4),
        );
        let owner = Uuid::new_v4();
        let first = pipeline.submit(request(owner)).unwrap();
        let second = pipeline.submit(request(owner)).unwrap();
        assert_ne!(first, second);

        let a = wait_terminal(&pipeline, first, owner).await;
        let b = wait_terminal(&pipeline, second, owner).await;
        assert_eq!(a.total_nutrition, b.total_nutrition);
    }

    #[tokio::test]
    async fn evicted_jobs_are_served_from_the_store() {
        let repo = Arc::new(MemoryAnalysisRepo::default());
        let pipeline = AnalysisPipeline::new(
            Arc::new(FixedDetector(vec![detection("salad", 90.0)])),
            estimating_resolver(),
            repo.clone(),
            None,
            settings(1),
        );
        let owner = Uuid::new_v4();
        let id = pipeline.submit(request(owner)).unwrap();
        let live = wait_terminal(&pipeline, id, owner).await;

        let evicted = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let n = pipeline.evict_terminal(Duration::ZERO);
                if n > 0 {
                    return n;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(evicted, 1);
        assert!(pipeline.inner.jobs.is_empty());

        let stored = pipeline.get_status(id, owner).await.unwrap();
        assert_eq!(stored, live);
    }

    #[tokio::test]
    async fn unpersisted_jobs_are_never_evicted() {
        let repo = Arc::new(MemoryAnalysisRepo::default());
        repo.fail_saves.store(true, Ordering::SeqCst);
        let pipeline = AnalysisPipeline::new(
            Arc::new(FixedDetector(vec![detection("soup", 250.0)])),
            estimating_resolver(),
            repo,
            None,
            settings(1),
        );
        let owner = Uuid::new_v4();
        let id = pipeline.submit(request(owner)).unwrap();
        wait_terminal(&pipeline, id, owner).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(pipeline.evict_terminal(Duration::ZERO), 0);
        assert_eq!(
            pipeline.get_status(id, owner).await.unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn archives_image_and_tolerates_storage_failure() {
        let storage = Arc::new(RecordingStorage::default());
        let pipeline = AnalysisPipeline::new(
            Arc::new(FixedDetector(vec![detection("apple", 100.0)])),
            estimating_resolver(),
            Arc::new(MemoryAnalysisRepo::default()),
            Some(storage.clone() as Arc<dyn StorageClient>),
            settings(1),
        );

        let owner = Uuid::new_v4();
        let id = pipeline.submit(request(owner)).unwrap();
        let job = wait_terminal(&pipeline, id, owner).await;
        let expected = format!("analyses/{}/{}.jpg", owner, id);
        assert_eq!(job.image_key.as_deref(), Some(expected.as_str()));
        assert_eq!(storage.keys.lock().unwrap().clone(), vec![expected]);

        storage.fail.store(true, Ordering::SeqCst);
        let id = pipeline.submit(request(owner)).unwrap();
        let job = wait_terminal(&pipeline, id, owner).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.image_key.is_none());
    }

    #[tokio::test]
    async fn stalled_storage_does_not_hold_jobs_in_processing() {
        let pipeline = AnalysisPipeline::new(
            Arc::new(FixedDetector(vec![detection("apple", 100.0)])),
            estimating_resolver(),
            Arc::new(MemoryAnalysisRepo::default()),
            Some(Arc::new(StalledStorage)),
            settings(1),
        );

        let owner = Uuid::new_v4();
        let first = pipeline.submit(request(owner)).unwrap();
        let second = pipeline.submit(request(owner)).unwrap();

        for id in [first, second] {
            let job = wait_terminal(&pipeline, id, owner).await;
            assert_eq!(job.status, JobStatus::Completed);
            assert!(job.image_key.is_none());
        }
    }

    #[tokio::test]
    async fn panicking_storage_fails_job() {
        let pipeline = AnalysisPipeline::new(
            Arc::new(FixedDetector(vec![detection("apple", 100.0)])),
            estimating_resolver(),
            Arc::new(MemoryAnalysisRepo::default()),
            Some(Arc::new(PanickingStorage)),
            settings(1),
        );
        let owner = Uuid::new_v4();
        let id = pipeline.submit(request(owner)).unwrap();
        let job = wait_terminal(&pipeline, id, owner).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("analysis worker panicked"));
    }

    #[tokio::test]
    async fn full_backlog_refuses_new_jobs_until_one_finishes() {
        let repo = Arc::new(MemoryAnalysisRepo::default());
        let pipeline = AnalysisPipeline::new(
            Arc::new(FixedDetector(vec![detection("apple", 100.0)])),
            estimating_resolver(),
            repo.clone(),
            None,
            PipelineSettings {
                workers: 1,
                queue: 1,
                ..settings(1)
            },
        );
        let owner = Uuid::new_v4();
        let first = pipeline.submit(request(owner)).unwrap();
        let _second = pipeline.submit(request(owner)).unwrap();
        assert_eq!(
            pipeline.submit(request(owner)),
            Err(SubmitError::QueueFull(2))
        );
        assert_eq!(pipeline.inner.jobs.len(), 2);

        wait_terminal(&pipeline, first, owner).await;
        wait_persisted(&repo, first).await;
        assert!(pipeline.submit(request(owner)).is_ok());
    }
}
