//! Concurrent claim stress test.
//!
//! Seeds a backlog of pending jobs and has many tasks race `claim_one`
//! against a shared pool, asserting every job is claimed exactly once and
//! the whole backlog drains: no job is ever simultaneously leased by two
//! workers. Scaled down so it runs fast and unconditionally rather than as
//! an `#[ignore]`d stress test.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinSet;

use db::models::NewJobRow;
use db::pool::{create_pool, run_migrations};
use db::repository::jobs;

const JOBS: usize = 60;
const WORKERS: usize = 12;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_claims_never_double_claim_and_drain_the_backlog() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("claim_race.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.to_string_lossy());

    // A short busy_timeout forces SQLITE_BUSY to surface often, exercising
    // the store's retry loop rather than just tolerating low contention.
    let pool = create_pool(&db_url, 16).await.unwrap();
    run_migrations(&pool).await.unwrap();

    let now = "2026-01-01T00:00:00.000Z";
    for i in 0..JOBS {
        jobs::insert(
            &pool,
            NewJobRow {
                id: format!("job-{i:04}"),
                command: "echo hi".to_string(),
                max_retries: 3,
                base_backoff: 2.0,
                next_run_at: None,
                timeout_seconds: 30,
                priority: (i % 5) as i64,
                created_at: now.to_string(),
            },
        )
        .await
        .unwrap();
    }

    let claimed_ids = Arc::new(Mutex::new(HashSet::<String>::new()));

    let mut workers = JoinSet::new();
    for worker_idx in 0..WORKERS {
        let pool = pool.clone();
        let claimed_ids = claimed_ids.clone();
        workers.spawn(async move {
            let worker_id = format!("worker-{worker_idx}");
            loop {
                match jobs::claim_one(&pool, &worker_id, now).await.unwrap() {
                    Some(claimed) => {
                        let first_time = claimed_ids.lock().unwrap().insert(claimed.id.clone());
                        assert!(first_time, "double-claimed job {}", claimed.id);
                        tokio::task::yield_now().await;
                    }
                    None => {
                        let counts = jobs::aggregate_counts(&pool).await.unwrap();
                        let pending = counts
                            .get(&db::models::JobState::Pending)
                            .copied()
                            .unwrap_or(0);
                        if pending == 0 {
                            break;
                        }
                        tokio::time::sleep(Duration::from_millis(1)).await;
                    }
                }
            }
        });
    }

    let joined = tokio::time::timeout(Duration::from_secs(20), async {
        while workers.join_next().await.is_some() {}
    })
    .await;
    assert!(joined.is_ok(), "workers timed out (possible deadlock)");

    assert_eq!(claimed_ids.lock().unwrap().len(), JOBS, "not every job was claimed");

    let counts = jobs::aggregate_counts(&pool).await.unwrap();
    assert_eq!(counts.get(&db::models::JobState::Pending).copied(), Some(0));
    assert_eq!(
        counts.get(&db::models::JobState::Processing).copied(),
        Some(JOBS as i64)
    );
}
