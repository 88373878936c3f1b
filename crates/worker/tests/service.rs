//! Tests for a single worker service and progress reporting.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    eventually, service_config, task, FailingGenerator, GatedGenerator, InMemoryJobStore,
    RecordingGenerator,
};
use sdpool_core::backoff::BackoffConfig;
use sdpool_core::job::{Job, JobState};
use sdpool_core::job_events::{MSG_TYPE_JOB_COMPLETED, MSG_TYPE_JOB_FAILED};
use sdpool_core::queue::Queue;
use sdpool_core::store::JobStore;
use sdpool_core::task::{NotifyMessage, Task};
use sdpool_events::MemoryQueue;
use sdpool_worker::config::ServiceConfig;
use sdpool_worker::generator::{Generator, ProgressReporter};
use sdpool_worker::service::{WorkerContext, WorkerService};
use tokio_util::sync::CancellationToken;

struct Harness {
    tasks: Arc<MemoryQueue<Task>>,
    notifications: Arc<MemoryQueue<NotifyMessage>>,
    store: Arc<InMemoryJobStore>,
}

impl Harness {
    fn new() -> Self {
        Self {
            tasks: Arc::new(MemoryQueue::<Task>::new("tasks")),
            notifications: Arc::new(MemoryQueue::<NotifyMessage>::new("notifications")),
            store: Arc::new(InMemoryJobStore::new()),
        }
    }

    fn start(&self, generator: Arc<dyn Generator>) -> WorkerService {
        self.start_with(service_config(true), generator)
    }

    fn start_with(&self, config: ServiceConfig, generator: Arc<dyn Generator>) -> WorkerService {
        let ctx = WorkerContext {
            task_queue: self.tasks.clone(),
            notify_queue: self.notifications.clone(),
            job_store: self.store.clone(),
            backoff: BackoffConfig::default(),
        };
        WorkerService::start("sd-service-0", config, ctx, generator, CancellationToken::new())
    }

    async fn next_notification(&self) -> serde_json::Value {
        let message = tokio::time::timeout(Duration::from_secs(5), self.notifications.pop())
            .await
            .expect("notification in time")
            .expect("queue open");
        serde_json::from_str(&message.message).unwrap()
    }
}

// ---------------------------------------------------------------------------
// Test: a successful task deletes its job and queues a completion notice
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_task_completes_and_notifies() {
    let harness = Harness::new();
    let generator = Arc::new(RecordingGenerator::default());
    let service = harness.start(generator.clone());

    let task = task(7, 10);
    harness.tasks.push(task.clone()).await.unwrap();

    let notice = harness.next_notification().await;
    assert_eq!(notice["type"], MSG_TYPE_JOB_COMPLETED);
    assert_eq!(notice["task_id"], task.task_id);
    assert_eq!(notice["result"]["images"][0], format!("{}.png", task.task_id));
    assert!(notice["model"].is_null());

    let stats = service.stats();
    eventually(|| stats.completed() == 1).await;
    assert!(harness.store.get(&task.task_id).is_none());
    assert_eq!(generator.seen(), vec![task.task_id.clone()]);

    service.stop();
    assert!(service.join(Duration::from_secs(1)).await);
}

// ---------------------------------------------------------------------------
// Test: the service's model tag is echoed in completion notices
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completion_carries_service_model() {
    let harness = Harness::new();
    let config = ServiceConfig {
        model: Some("sdxl-base-1.0".into()),
        ..service_config(true)
    };
    let service = harness.start_with(config, Arc::new(RecordingGenerator::default()));

    harness.tasks.push(task(7, 10)).await.unwrap();

    let notice = harness.next_notification().await;
    assert_eq!(notice["type"], MSG_TYPE_JOB_COMPLETED);
    assert_eq!(notice["model"], "sdxl-base-1.0");

    service.stop();
    service.join(Duration::from_secs(1)).await;
}

// ---------------------------------------------------------------------------
// Test: a failed task leaves a Failed job for the reconciler
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_task_marks_job_failed_and_notifies() {
    let harness = Harness::new();
    let service = harness.start(Arc::new(FailingGenerator));

    let task = task(3, 25);
    harness.tasks.push(task.clone()).await.unwrap();

    let notice = harness.next_notification().await;
    assert_eq!(notice["type"], MSG_TYPE_JOB_FAILED);
    assert!(notice["error"]
        .as_str()
        .unwrap()
        .contains("CUDA out of memory"));

    let stats = service.stats();
    eventually(|| stats.failed() == 1).await;
    let job = harness.store.get(&task.task_id).expect("job kept for reconciler");
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.power, 25);

    service.stop();
    service.join(Duration::from_secs(1)).await;
}

// ---------------------------------------------------------------------------
// Test: a task whose job already exists is skipped
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_task_is_skipped() {
    let harness = Harness::new();
    let generator = Arc::new(RecordingGenerator::default());
    let service = harness.start(generator.clone());

    let task = task(1, 5);
    harness
        .store
        .create(&Job::pending(task.task_id.clone(), 1, 5))
        .await
        .unwrap();
    harness.tasks.push(task.clone()).await.unwrap();

    let stats = service.stats();
    eventually(|| stats.skipped() == 1).await;
    assert!(generator.seen().is_empty());
    assert!(harness.notifications.is_empty());
    assert_eq!(
        harness.store.get(&task.task_id).unwrap().state,
        JobState::Pending
    );

    service.stop();
    service.join(Duration::from_secs(1)).await;
}

// ---------------------------------------------------------------------------
// Test: stop lets the in-flight task finish and pulls nothing more
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_lets_in_flight_task_finish() {
    let harness = Harness::new();
    let generator = Arc::new(GatedGenerator::default());
    let service = harness.start(generator.clone());

    harness.tasks.push(task(1, 5)).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), generator.started.notified())
        .await
        .expect("task started");

    service.stop();
    harness.tasks.push(task(1, 5)).await.unwrap();
    generator.release.notify_one();

    assert!(service.join(Duration::from_secs(5)).await);
    assert_eq!(service.stats().completed(), 1);
    assert_eq!(harness.tasks.len(), 1, "second task left in the queue");
}

// ---------------------------------------------------------------------------
// Test: the service exits when the task queue closes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn closed_queue_stops_service() {
    let harness = Harness::new();
    let service = harness.start(Arc::new(RecordingGenerator::default()));

    harness.tasks.close();

    assert!(service.join(Duration::from_secs(2)).await);
    assert!(!service.is_stopped());
}

// ---------------------------------------------------------------------------
// Test: progress reporting is monotonic and stops once the job is terminal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_reporter_is_monotonic() {
    let store = Arc::new(InMemoryJobStore::new());
    store.create(&Job::pending("T", 1, 10)).await.unwrap();
    let reporter = ProgressReporter::new(store.clone(), "T");

    assert!(reporter.report(30).await);
    assert!(reporter.report(20).await);
    assert_eq!(store.get("T").unwrap().state, JobState::Running(30));

    assert!(reporter.report(150).await);
    assert_eq!(store.get("T").unwrap().state, JobState::Running(99));
    assert_eq!(reporter.last(), 99);
}

#[tokio::test]
async fn progress_reporter_detects_reaped_job() {
    let store = Arc::new(InMemoryJobStore::new());
    store.create(&Job::pending("T", 1, 10)).await.unwrap();
    store.update_progress("T", JobState::Failed).await.unwrap();

    let reporter = ProgressReporter::new(store.clone(), "T");
    assert!(!reporter.report(50).await);
    assert_eq!(store.get("T").unwrap().state, JobState::Failed);
}
