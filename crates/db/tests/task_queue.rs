//! Tests for the table-backed task queue.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use sdpool_core::queue::{Queue, QueueError};
use sdpool_core::task::Task;
use sdpool_db::repositories::SdTaskRepo;
use sdpool_db::task_queue::PgTaskQueue;
use serde_json::json;
use sqlx::PgPool;

fn queue(pool: PgPool) -> PgTaskQueue {
    PgTaskQueue::new(pool).with_poll_interval(Duration::from_millis(20))
}

// ---------------------------------------------------------------------------
// Test: tasks come out in submission order with their payload intact
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn pops_in_push_order(pool: PgPool) {
    let queue = queue(pool);
    let tasks: Vec<Task> = (0..3)
        .map(|i| Task::new(7, json!({"prompt": format!("frame {i}"), "steps": 20}), 10))
        .collect();
    for task in &tasks {
        queue.push(task.clone()).await.unwrap();
    }
    assert_eq!(queue.pending().await.unwrap(), 3);

    for task in &tasks {
        assert_eq!(&queue.pop().await.unwrap(), task);
    }
    assert_eq!(queue.pending().await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Test: a producer on another handle reaches a waiting consumer
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn pop_waits_for_push_from_another_producer(pool: PgPool) {
    let consumer = Arc::new(queue(pool.clone()));
    let waiting = {
        let consumer = Arc::clone(&consumer);
        tokio::spawn(async move { consumer.pop().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let task = Task::new(3, json!({"prompt": "harbor"}), 5);
    queue(pool).push(task.clone()).await.unwrap();

    let popped = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("popped in time")
        .unwrap()
        .unwrap();
    assert_eq!(popped, task);
}

// ---------------------------------------------------------------------------
// Test: concurrent consumers never receive the same task
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_consumers_split_tasks(pool: PgPool) {
    let producer = queue(pool.clone());
    let mut submitted = HashSet::new();
    for _ in 0..20 {
        let task = Task::new(1, json!({}), 1);
        submitted.insert(task.task_id.clone());
        producer.push(task).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let consumer = queue(pool.clone());
        handles.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..5 {
                seen.push(consumer.pop().await.unwrap().task_id);
            }
            seen
        }));
    }

    let mut popped = Vec::new();
    for handle in handles {
        popped.extend(handle.await.unwrap());
    }
    assert_eq!(popped.len(), 20);
    let unique: HashSet<String> = popped.into_iter().collect();
    assert_eq!(unique, submitted);
}

// ---------------------------------------------------------------------------
// Test: a restored claim keeps its place at the head of the queue
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn restored_claim_is_claimed_first(pool: PgPool) {
    let first = Task::new(1, json!({"n": 1}), 1);
    let second = Task::new(1, json!({"n": 2}), 1);
    SdTaskRepo::enqueue(&pool, &first).await.unwrap();
    SdTaskRepo::enqueue(&pool, &second).await.unwrap();

    let claimed = SdTaskRepo::claim_next(&pool).await.unwrap().unwrap();
    assert_eq!(claimed.task_id, first.task_id);
    SdTaskRepo::restore(&pool, &claimed).await.unwrap();

    let again = SdTaskRepo::claim_next(&pool).await.unwrap().unwrap();
    assert_eq!(again.task_id, first.task_id);
    assert_eq!(again.payload, json!({"n": 1}));
}

// ---------------------------------------------------------------------------
// Test: an abandoned pop loses no task
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn dropped_pop_keeps_task(pool: PgPool) {
    let queue = queue(pool.clone());
    let task = Task::new(1, json!({}), 1);
    queue.push(task.clone()).await.unwrap();

    // Drop the pop future at its first suspension point.
    let _ = tokio::time::timeout(Duration::ZERO, queue.pop()).await;

    let popped = tokio::time::timeout(Duration::from_secs(5), queue.pop())
        .await
        .expect("task still available")
        .unwrap();
    assert_eq!(popped, task);
}

// ---------------------------------------------------------------------------
// Test: closing stops consumers and producers but keeps queued rows
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn close_wakes_consumers_and_keeps_rows(pool: PgPool) {
    let queue = Arc::new(queue(pool.clone()));
    let waiting = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.pop().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    queue.close();
    assert_matches!(waiting.await.unwrap(), Err(QueueError::Closed));
    assert_matches!(
        queue.push(Task::new(1, json!({}), 1)).await,
        Err(QueueError::Closed)
    );

    SdTaskRepo::enqueue(&pool, &Task::new(1, json!({}), 1)).await.unwrap();
    assert_matches!(queue.pop().await, Err(QueueError::Closed));
    assert_eq!(SdTaskRepo::count(&pool).await.unwrap(), 1);
}
