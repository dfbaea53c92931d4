#![forbid(unsafe_code)]

use std::sync::Arc;

use mazu_core::fixtures::challenge;
use mazu_core::Challenge;
use mazu_store::Collection;

async fn run_writers(writers: i32, per_writer: i32) -> (Vec<i32>, u64) {
    let c: Arc<Collection<Challenge>> = Arc::new(Collection::new("challenges"));
    let mut handles = Vec::new();
    for w in 0..writers {
        let c = Arc::clone(&c);
        handles.push(tokio::spawn(async move {
            for i in 0..per_writer {
                let id = w * per_writer + i;
                c.upsert(challenge(id));
                // odd ids are deleted again by their own writer
                if id % 2 == 1 {
                    c.remove(&id);
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    let mut ids = c.ids();
    ids.sort_unstable();
    (ids, c.epoch())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_converge() {
    let (ids1, epoch1) = run_writers(4, 25).await;
    let (ids2, epoch2) = run_writers(4, 25).await;
    assert_eq!(ids1, ids2, "final id set must not depend on interleaving");
    assert_eq!(ids1, (0..100).filter(|i| i % 2 == 0).collect::<Vec<_>>());
    // every upsert and every effective remove bumps the epoch exactly once
    assert_eq!(epoch1, 150);
    assert_eq!(epoch2, 150);
}
