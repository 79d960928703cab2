mod common;

use common::{FakeUploader, ENDPOINT, harness, large_payload, path, payload, unlimited};
use rask_telemetry::domain::QueuedPing;
use rask_telemetry::upload::{DeliveryPolicy, RateLimitConfig, UploadOutcome, UploadResult, UploadTask};
use std::time::Duration;

#[tokio::test]
async fn successful_upload_deletes_the_ping() {
    let h = harness(
        FakeUploader::always(UploadResult::http_status(200)),
        DeliveryPolicy::default(),
        unlimited(),
    );

    h.store.record_ping(path("metrics", "p1"), "p1", payload(), None).await.unwrap();
    h.manager.block_on_ongoing_uploads().await;

    assert_eq!(h.uploader.urls(), vec![format!("{ENDPOINT}/submit/app/metrics/1/p1")]);
    assert!(h.store.get_all_pings().await.unwrap().is_empty());
    assert_eq!(h.manager.pending_count(), 0);
    assert_eq!(h.manager.in_flight_count(), 0);
}

#[tokio::test]
async fn server_error_is_retried_with_the_same_ping() {
    let h = harness(
        FakeUploader::scripted(vec![UploadResult::http_status(503)], UploadResult::http_status(200)),
        DeliveryPolicy::default(),
        unlimited(),
    );

    h.store.record_ping(path("metrics", "p1"), "p1", payload(), None).await.unwrap();
    h.manager.block_on_ongoing_uploads().await;

    let urls = h.uploader.urls();
    assert_eq!(urls.len(), 2);
    assert_eq!(urls[0], urls[1]);
    assert!(h.store.get_all_pings().await.unwrap().is_empty());
}

#[tokio::test]
async fn recoverable_failures_end_the_session_after_the_limit() {
    let policy = DeliveryPolicy {
        max_recoverable_failures: 3,
        ..DeliveryPolicy::default()
    };
    let h = harness(FakeUploader::always(UploadResult::recoverable_failure()), policy, unlimited());

    h.store.record_ping(path("metrics", "p1"), "p1", payload(), None).await.unwrap();
    h.manager.block_on_ongoing_uploads().await;

    assert_eq!(h.uploader.call_count(), 3);
    assert_eq!(h.manager.pending_count(), 1);
    assert_eq!(h.store.get_all_pings().await.unwrap().len(), 1);

    // The counter was reset by `Done`, so a new session gets a fresh budget.
    h.manager.trigger_upload();
    h.manager.block_on_ongoing_uploads().await;
    assert_eq!(h.uploader.call_count(), 6);
}

#[tokio::test]
async fn client_errors_and_unrecoverable_failures_drop_the_ping() {
    let h = harness(
        FakeUploader::scripted(
            vec![UploadResult::http_status(404), UploadResult::unrecoverable_failure()],
            UploadResult::http_status(200),
        ),
        DeliveryPolicy::default(),
        unlimited(),
    );

    h.store.record_ping(path("metrics", "p1"), "p1", payload(), None).await.unwrap();
    h.store.record_ping(path("metrics", "p2"), "p2", payload(), None).await.unwrap();
    h.manager.block_on_ongoing_uploads().await;

    assert_eq!(h.uploader.call_count(), 2);
    assert!(h.store.get_all_pings().await.unwrap().is_empty());
    assert_eq!(h.manager.pending_count(), 0);
}

#[tokio::test]
async fn oversized_body_is_dropped_without_calling_the_uploader() {
    let policy = DeliveryPolicy {
        max_ping_body_size: 10 * 1024 * 1024,
        ..DeliveryPolicy::default()
    };
    let h = harness(FakeUploader::always(UploadResult::http_status(200)), policy, unlimited());

    h.store
        .record_ping(path("metrics", "big"), "big", large_payload(11 * 1024 * 1024), None)
        .await
        .unwrap();
    h.manager.block_on_ongoing_uploads().await;

    assert_eq!(h.uploader.call_count(), 0);
    assert!(h.store.get_all_pings().await.unwrap().is_empty());
    assert_eq!(h.manager.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn throttling_ends_the_session_after_max_wait_attempts() {
    let policy = DeliveryPolicy {
        max_wait_attempts: 2,
        ..DeliveryPolicy::default()
    };
    let rate_limit = RateLimitConfig {
        interval: Duration::from_secs(60),
        max_pings_per_interval: 1,
    };
    let h = harness(FakeUploader::always(UploadResult::http_status(200)), policy, rate_limit);

    h.store.record_ping(path("metrics", "p1"), "p1", payload(), None).await.unwrap();
    h.store.record_ping(path("metrics", "p2"), "p2", payload(), None).await.unwrap();
    h.manager.block_on_ongoing_uploads().await;

    // The first session uploaded p1 and stopped on the first `Wait`.
    assert_eq!(h.uploader.call_count(), 1);
    assert_eq!(h.manager.pending_count(), 1);

    assert!(matches!(h.manager.get_upload_task(), UploadTask::Wait(_)));
    assert_eq!(h.manager.get_upload_task(), UploadTask::Done);
    // `Done` reset the attempt counter.
    assert!(matches!(h.manager.get_upload_task(), UploadTask::Wait(_)));
}

#[tokio::test(start_paused = true)]
async fn throttled_ping_is_sent_once_the_window_elapses() {
    let rate_limit = RateLimitConfig {
        interval: Duration::from_secs(60),
        max_pings_per_interval: 1,
    };
    let h = harness(
        FakeUploader::always(UploadResult::http_status(200)),
        DeliveryPolicy::default(),
        rate_limit,
    );

    h.store.record_ping(path("metrics", "p1"), "p1", payload(), None).await.unwrap();
    h.store.record_ping(path("metrics", "p2"), "p2", payload(), None).await.unwrap();
    h.manager.block_on_ongoing_uploads().await;
    assert_eq!(h.uploader.call_count(), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    h.manager.trigger_upload();
    h.manager.block_on_ongoing_uploads().await;

    assert_eq!(h.uploader.call_count(), 2);
    assert!(h.store.get_all_pings().await.unwrap().is_empty());
}

#[tokio::test]
async fn the_same_ping_is_never_queued_twice() {
    let h = harness(
        FakeUploader::always(UploadResult::http_status(200)),
        DeliveryPolicy::default(),
        unlimited(),
    );

    h.store.record_ping(path("metrics", "p1"), "p1", payload(), None).await.unwrap();
    h.store.record_ping(path("metrics", "p1"), "p1", payload(), None).await.unwrap();
    assert_eq!(h.manager.pending_count() + h.manager.in_flight_count(), 1);

    h.manager.block_on_ongoing_uploads().await;
    assert_eq!(h.uploader.call_count(), 1);
}

#[tokio::test]
async fn in_flight_ping_is_not_requeued() {
    let h = harness(
        FakeUploader::delayed(UploadResult::http_status(200), Duration::from_millis(100)),
        DeliveryPolicy::default(),
        unlimited(),
    );

    h.store.record_ping(path("metrics", "p1"), "p1", payload(), None).await.unwrap();
    while h.manager.in_flight_count() == 0 {
        tokio::task::yield_now().await;
    }

    // Replaying the ping while it is being delivered is ignored.
    h.store.scan_pending_pings().await.unwrap();
    assert_eq!(h.manager.pending_count(), 0);

    h.manager.block_on_ongoing_uploads().await;
    assert_eq!(h.uploader.call_count(), 1);
}

#[tokio::test]
async fn pings_recorded_during_a_delivery_are_picked_up() {
    let h = harness(
        FakeUploader::delayed(UploadResult::http_status(200), Duration::from_millis(20)),
        DeliveryPolicy::default(),
        unlimited(),
    );

    h.store.record_ping(path("metrics", "p1"), "p1", payload(), None).await.unwrap();
    while h.manager.in_flight_count() == 0 {
        tokio::task::yield_now().await;
    }
    h.store.record_ping(path("metrics", "p2"), "p2", payload(), None).await.unwrap();

    h.manager.block_on_ongoing_uploads().await;
    assert_eq!(h.uploader.call_count(), 2);
    assert!(h.store.get_all_pings().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn clearing_the_queue_keeps_deletion_requests() {
    let rate_limit = RateLimitConfig {
        interval: Duration::from_secs(60),
        max_pings_per_interval: 1,
    };
    let h = harness(
        FakeUploader::always(UploadResult::http_status(200)),
        DeliveryPolicy::default(),
        rate_limit,
    );

    h.store.record_ping(path("metrics", "m1"), "m1", payload(), None).await.unwrap();
    h.store.record_ping(path("metrics", "m2"), "m2", payload(), None).await.unwrap();
    h.store
        .record_ping(path("deletion-request", "d1"), "d1", payload(), None)
        .await
        .unwrap();
    h.manager.block_on_ongoing_uploads().await;
    assert_eq!(h.manager.pending_count(), 2);

    h.manager.clear_pending_queue().await;
    assert_eq!(h.manager.pending_count(), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    h.manager.trigger_upload();
    h.manager.block_on_ongoing_uploads().await;
    assert_eq!(
        h.uploader.urls().last().map(String::as_str),
        Some("http://telemetry.test/submit/app/deletion-request/1/d1")
    );
}

#[tokio::test]
async fn no_tasks_without_pings() {
    let h = harness(
        FakeUploader::always(UploadResult::http_status(200)),
        DeliveryPolicy::default(),
        unlimited(),
    );
    assert_eq!(h.manager.get_upload_task(), UploadTask::Done);
    h.manager.block_on_ongoing_uploads().await;
    assert_eq!(h.uploader.call_count(), 0);
}

#[tokio::test]
async fn status_decides_regardless_of_reported_outcome() {
    // A custom uploader may pair a status with a failure outcome.
    let h = harness(
        FakeUploader::scripted(
            vec![
                UploadResult {
                    status: Some(404),
                    outcome: UploadOutcome::RecoverableFailure,
                },
                UploadResult {
                    status: Some(200),
                    outcome: UploadOutcome::RecoverableFailure,
                },
            ],
            UploadResult::recoverable_failure(),
        ),
        DeliveryPolicy::default(),
        unlimited(),
    );

    h.store.record_ping(path("metrics", "p1"), "p1", payload(), None).await.unwrap();
    h.manager.block_on_ongoing_uploads().await;
    assert_eq!(h.uploader.call_count(), 1);

    h.store.record_ping(path("metrics", "p2"), "p2", payload(), None).await.unwrap();
    h.manager.block_on_ongoing_uploads().await;
    assert_eq!(h.uploader.call_count(), 2);

    assert!(h.store.get_all_pings().await.unwrap().is_empty());
    assert_eq!(h.manager.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn requeue_after_failure_does_not_duplicate_a_queued_ping() {
    let h = harness(
        FakeUploader::delayed(UploadResult::recoverable_failure(), Duration::from_secs(1)),
        DeliveryPolicy::default(),
        unlimited(),
    );

    h.store.record_ping(path("metrics", "p1"), "p1", payload(), None).await.unwrap();
    while h.manager.in_flight_count() == 0 {
        tokio::task::yield_now().await;
    }

    // Requeue p1 while its upload is still in flight; the worker's own
    // response for it must then find p1 queued already.
    let stored = h.store.get_all_pings().await.unwrap();
    let ping = QueuedPing::new("p1", stored[0].ping.clone());
    h.manager
        .process_upload_response(ping, UploadResult::recoverable_failure())
        .await;
    assert_eq!(h.manager.pending_count(), 1);

    h.manager.block_on_ongoing_uploads().await;
    assert_eq!(h.manager.pending_count(), 1);
    assert_eq!(h.manager.in_flight_count(), 0);
}
