//! Integration tests for broadcast watch waiters.

use std::time::Duration;

use pipeline_harness::{BroadcastWatch, CompileFailure, HarnessError, TimeoutExt};

#[tokio::test]
async fn every_waiting_task_receives_the_same_result() {
    let watch = BroadcastWatch::<String>::new();
    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let waiter = watch.wait();
            tokio::spawn(waiter)
        })
        .collect();
    assert_eq!(watch.pending(), 4);

    assert_eq!(watch.publish(Ok("rebuild #1".to_string())), 4);
    assert_eq!(watch.pending(), 0);

    for task in tasks {
        let result = task.with_timeout(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(result.unwrap(), "rebuild #1");
    }
}

#[tokio::test]
async fn waiters_only_see_results_published_after_they_registered() {
    let watch = BroadcastWatch::<u32>::new();
    assert_eq!(watch.publish(Ok(1)), 0);

    let waiter = watch.wait();
    assert!(
        watch
            .wait()
            .with_timeout(Duration::from_millis(20))
            .await
            .is_err()
    );

    watch.publish(Ok(2));
    assert_eq!(waiter.await.unwrap(), 2);
}

#[tokio::test]
async fn failures_are_surfaced_as_compile_errors() {
    let watch = BroadcastWatch::<u32>::new();
    let first = watch.wait();
    let second = watch.wait();

    watch.publish(Err(CompileFailure::new("Module not found: './missing'")));

    for waiter in [first, second] {
        match waiter.await {
            Err(HarnessError::Compile { message }) => {
                assert_eq!(message, "Module not found: './missing'");
            }
            other => panic!("expected a compile failure, got {other:?}"),
        }
    }
}
