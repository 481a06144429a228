// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::helpers::{create_pipeline, create_uploader, BUCKET};
use common::mocks::{Call, RecordingStore};
use log_shipper::{
    errors::UploaderError,
    listener::IngestListener,
    policy::ShipThresholds,
    queue::{IngestQueue, Record},
    transport::{BlobStore, FsBlobStore},
    uploader::{state::UploadState, FinalizeOutcome},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_sub_threshold_batch_is_one_part() {
    let store = Arc::new(RecordingStore::new());
    let mut uploader = create_uploader(store.clone(), 1024);

    uploader.push_log(b"line one\n").await.unwrap();
    uploader.push_log(b"line two\n").await.unwrap();
    assert!(matches!(uploader.state(), UploadState::Accumulating(_)));

    let outcome = uploader.finalize().await.unwrap();
    assert!(matches!(outcome, FinalizeOutcome::Shipped { parts: 1, bytes: 18, .. }));
    assert_eq!(uploader.state(), &UploadState::Finalized);
    assert_eq!(
        store.uploaded_parts(),
        vec![(1, b"line one\nline two\n".to_vec())]
    );
    assert_eq!(store.completions(), vec![vec![1]]);
}

#[tokio::test]
async fn test_k_full_parts_plus_remainder() {
    const PART: usize = 16;
    const K: usize = 3;
    const R: usize = 5;

    let store = Arc::new(RecordingStore::new());
    let mut uploader = create_uploader(store.clone(), PART);

    let payload: Vec<u8> = (0..(K * PART + R)).map(|i| (i % 251) as u8).collect();
    // Uneven pushes so part boundaries fall inside pushed chunks.
    for chunk in payload.chunks(7) {
        uploader.push_log(chunk).await.unwrap();
    }
    uploader.finalize().await.unwrap();

    let parts = store.uploaded_parts();
    let numbers: Vec<u32> = parts.iter().map(|(n, _)| *n).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4]);
    for (_, body) in &parts[..K] {
        assert_eq!(body.len(), PART);
    }
    assert_eq!(parts[K].1.len(), R);

    let shipped: Vec<u8> = parts.into_iter().flat_map(|(_, body)| body).collect();
    assert_eq!(shipped, payload);
    assert_eq!(store.completions(), vec![vec![1, 2, 3, 4]]);
}

#[tokio::test]
async fn test_part_retry_exhaustion_aborts_exactly_once() {
    let store = Arc::new(RecordingStore::new());
    let mut uploader = create_uploader(store.clone(), 8);
    store.fail_next_parts(3);

    let result = uploader.push_log(b"0123456789").await;
    assert!(matches!(
        result,
        Err(UploaderError::UploadPart { attempts: 3, .. })
    ));
    assert_eq!(uploader.state(), &UploadState::Aborted);
    assert_eq!(store.aborts(), vec!["upload-1".to_string()]);
    assert!(store.completions().is_empty());

    // Nothing left to ship for the aborted batch.
    assert_eq!(uploader.finalize().await.unwrap(), FinalizeOutcome::NothingToShip);
    assert_eq!(store.aborts().len(), 1);
}

#[tokio::test]
async fn test_transient_part_failures_are_retried() {
    let store = Arc::new(RecordingStore::new());
    let mut uploader = create_uploader(store.clone(), 4);
    store.fail_next_parts(2);

    uploader.push_log(b"abcdef").await.unwrap();
    uploader.finalize().await.unwrap();

    assert_eq!(
        store.uploaded_parts(),
        vec![(1, b"abcd".to_vec()), (2, b"ef".to_vec())]
    );
    assert!(store.aborts().is_empty());
}

#[tokio::test]
async fn test_completion_failure_aborts_session() {
    let store = Arc::new(RecordingStore::new());
    let mut uploader = create_uploader(store.clone(), 64);
    store.fail_complete(true);

    uploader.push_log(b"doomed").await.unwrap();
    let result = uploader.finalize().await;
    assert!(matches!(result, Err(UploaderError::Complete { .. })));
    assert_eq!(uploader.state(), &UploadState::Aborted);
    assert_eq!(store.aborts(), vec!["upload-1".to_string()]);

    // The next batch opens a new session.
    store.fail_complete(false);
    uploader.push_log(b"survivor").await.unwrap();
    uploader.finalize().await.unwrap();
    let sessions: Vec<Call> = store
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::InitSession { .. }))
        .collect();
    assert_eq!(sessions.len(), 2);
    assert_eq!(store.completions(), vec![vec![1]]);
}

#[tokio::test(start_paused = true)]
async fn test_byte_threshold_ships_on_next_tick() {
    let store = Arc::new(RecordingStore::new());
    let (queue, mut driver) = create_pipeline(
        store.clone(),
        ShipThresholds::new(100, 1000, 1_000_000),
        1024,
    );

    for i in 0..3 {
        queue.put(Record::from(format!("{i:0>39}\n").into_bytes()));
    }
    assert_eq!(queue.size(), 120);

    tokio::time::advance(Duration::from_millis(50)).await;
    let outcome = driver.on_invoke().await.unwrap();

    assert!(matches!(
        outcome,
        Some(FinalizeOutcome::Shipped { bytes: 120, .. })
    ));
    assert_eq!(driver.policy().invoke_count(), 0);
    assert_eq!(driver.policy().last_ship(), tokio::time::Instant::now());
    assert_eq!(driver.policy().unshipped_bytes(), 0);
    assert_eq!(store.completions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ships_unshipped_records() {
    let store = Arc::new(RecordingStore::new());
    let (queue, mut driver) = create_pipeline(store.clone(), ShipThresholds::default(), 1024);

    queue.put(Record::from("first record: 14"));
    queue.put(Record::from("second: 14 b\n\n"));
    assert_eq!(queue.size(), 30);
    assert_eq!(driver.on_invoke().await.unwrap(), None);

    let outcome = driver.shutdown().await.unwrap();
    assert!(matches!(outcome, FinalizeOutcome::Shipped { parts: 1, bytes: 30, .. }));
    let parts = store.uploaded_parts();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].1.len(), 30);
    assert_eq!(store.completions(), vec![vec![1]]);
}

#[tokio::test]
async fn test_shutdown_ships_records_queued_behind_a_lost_batch() {
    let store = Arc::new(RecordingStore::new());
    let (queue, mut driver) = create_pipeline(store.clone(), ShipThresholds::default(), 4);
    store.fail_next_parts(3);

    queue.put(Record::from("abcdefgh"));
    queue.put(Record::from("tail-record"));
    let outcome = driver.shutdown().await.unwrap();

    assert!(matches!(outcome, FinalizeOutcome::Shipped { parts: 3, bytes: 11, .. }));
    assert!(queue.is_empty());
    assert_eq!(store.aborts(), vec!["upload-1".to_string()]);
    assert_eq!(
        store.uploaded_parts(),
        vec![(1, b"tail".to_vec()), (2, b"-rec".to_vec()), (3, b"ord".to_vec())]
    );
    assert_eq!(store.completions(), vec![vec![1, 2, 3]]);
}

#[tokio::test]
async fn test_shutdown_reports_a_lost_last_batch() {
    let store = Arc::new(RecordingStore::new());
    let (queue, mut driver) = create_pipeline(store.clone(), ShipThresholds::default(), 4);
    store.fail_next_parts(3);

    queue.put(Record::from("abcdefgh"));
    let result = driver.shutdown().await;

    assert!(matches!(result, Err(UploaderError::UploadPart { .. })));
    assert!(queue.is_empty());
    assert!(store.completions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_session_failure_keeps_remaining_records_queued() {
    let store = Arc::new(RecordingStore::new());
    let (queue, mut driver) = create_pipeline(
        store.clone(),
        ShipThresholds::new(usize::MAX, 2, 1_000_000),
        1024,
    );
    store.fail_init(true);

    queue.put(Record::from("one\n"));
    queue.put(Record::from("two\n"));
    assert_eq!(driver.on_invoke().await.unwrap(), None);
    assert_eq!(queue.len(), 1);
    assert!(store.uploaded_parts().is_empty());

    store.fail_init(false);
    let outcome = driver.on_invoke().await.unwrap();
    assert!(matches!(outcome, Some(FinalizeOutcome::Shipped { bytes: 8, .. })));
    assert_eq!(store.uploaded_parts(), vec![(1, b"one\ntwo\n".to_vec())]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_ship_keeps_policy_state() {
    let store = Arc::new(RecordingStore::new());
    let (queue, mut driver) = create_pipeline(
        store.clone(),
        ShipThresholds::new(usize::MAX, 1, 1_000_000),
        1024,
    );
    store.fail_complete(true);

    queue.put(Record::from("lost"));
    assert!(driver.on_invoke().await.is_err());
    assert_eq!(driver.policy().invoke_count(), 1);

    store.fail_complete(false);
    queue.put(Record::from("kept"));
    let outcome = driver.on_invoke().await.unwrap();
    assert!(matches!(outcome, Some(FinalizeOutcome::Shipped { bytes: 4, .. })));
    assert_eq!(driver.policy().invoke_count(), 0);
}

#[tokio::test]
async fn test_listener_round_trip() {
    let queue = Arc::new(IngestQueue::new());
    let cancel = CancellationToken::new();
    let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp.local_addr().unwrap();
    let server = tokio::spawn(IngestListener::new(Arc::clone(&queue), cancel.clone()).serve(tcp));

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/"))
        .body(r#"[{"record":"a"},{"time":"t2","record":"b"}]"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .put(format!("http://{addr}/logs"))
        .body("plain text line")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client.get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(response.status(), 405);

    assert_eq!(
        queue.get(10),
        vec![
            Record::from("{\"record\":\"a\"}\n"),
            Record::from("{\"time\":\"t2\",\"record\":\"b\"}\n"),
            Record::from("plain text line"),
        ]
    );

    cancel.cancel();
    drop(client);
    let stopped = tokio::time::timeout(Duration::from_secs(5), server).await;
    assert!(matches!(stopped, Ok(Ok(Ok(())))));
}

#[tokio::test]
async fn test_pipeline_ships_to_filesystem_store_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FsBlobStore::new(dir.path(), "integration"));
    let (queue, mut driver) = create_pipeline(
        store.clone() as Arc<dyn BlobStore>,
        ShipThresholds::new(usize::MAX, 2, 1_000_000),
        8,
    );

    let mut keys = Vec::new();
    for batch in 0..2 {
        for tick in 0..2 {
            queue.put(Record::from(format!("batch {batch} tick {tick}\n").into_bytes()));
            if let Some(FinalizeOutcome::Shipped { key, .. }) = driver.on_invoke().await.unwrap() {
                keys.push(key);
            }
        }
    }

    assert_eq!(keys.len(), 2);
    assert_eq!(driver.shipped_batches(), 2);
    let first = store.read_object(BUCKET, &keys[0]).await.unwrap();
    assert_eq!(first, b"batch 0 tick 0\nbatch 0 tick 1\n");
    let second = store.read_object(BUCKET, &keys[1]).await.unwrap();
    assert_eq!(second, b"batch 1 tick 0\nbatch 1 tick 1\n");
    assert_eq!(store.open_sessions(BUCKET).await.unwrap(), 0);
}
