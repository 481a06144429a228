// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use log_shipper::{
    driver::PipelineDriver,
    key::ObjectKeyGenerator,
    policy::{BatchPolicy, ShipThresholds},
    queue::IngestQueue,
    transport::BlobStore,
    uploader::{retry::RetryStrategy, Uploader, UploaderConfig},
};
use std::sync::Arc;
use std::time::Duration;

pub const BUCKET: &str = "integration-logs";

/// Uploader with the given part size and immediate retries.
pub fn create_uploader(store: Arc<dyn BlobStore>, part_size: usize) -> Uploader {
    Uploader::new(
        store,
        ObjectKeyGenerator::new("integration"),
        UploaderConfig {
            bucket: BUCKET.to_string(),
            part_size,
            retry_strategy: RetryStrategy::Immediate(3),
        },
    )
}

/// Queue, policy, uploader and driver wired together.
#[allow(dead_code)]
pub fn create_pipeline(
    store: Arc<dyn BlobStore>,
    thresholds: ShipThresholds,
    part_size: usize,
) -> (Arc<IngestQueue>, PipelineDriver) {
    let queue = Arc::new(IngestQueue::new());
    let policy = BatchPolicy::new(Arc::clone(&queue), thresholds);
    let driver = PipelineDriver::new(
        Arc::clone(&queue),
        policy,
        create_uploader(store, part_size),
        Duration::from_secs(2),
    );
    (queue, driver)
}
