// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Adaptive batch-shipping policy.
//!
//! A batch is shipped as soon as any one of three thresholds is met:
//! invocations since the last ship, time since the last ship, or bytes
//! waiting to be shipped. The policy is owned by the pipeline driver and only
//! reads the shared queue to learn its byte size.

use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::info;

use crate::constants::{
    DEFAULT_SHIP_RATE_BYTES, DEFAULT_SHIP_RATE_INVOKES, DEFAULT_SHIP_RATE_MILLISECONDS,
    MAX_SHIP_RATE_BYTES,
};
use crate::queue::IngestQueue;

/// Thresholds that trigger a ship. Each one is checked independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShipThresholds {
    pub max_bytes: usize,
    pub max_invokes: u64,
    pub max_millis: u64,
}

impl Default for ShipThresholds {
    fn default() -> Self {
        ShipThresholds {
            max_bytes: DEFAULT_SHIP_RATE_BYTES,
            max_invokes: DEFAULT_SHIP_RATE_INVOKES,
            max_millis: DEFAULT_SHIP_RATE_MILLISECONDS,
        }
    }
}

impl ShipThresholds {
    /// Builds thresholds, clamping `max_bytes` to [`MAX_SHIP_RATE_BYTES`].
    #[must_use]
    pub fn new(max_bytes: usize, max_invokes: u64, max_millis: u64) -> Self {
        ShipThresholds {
            max_bytes: max_bytes.min(MAX_SHIP_RATE_BYTES),
            max_invokes,
            max_millis,
        }
    }
}

/// Which threshold caused a ship decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShipReason {
    Invokes(u64),
    Elapsed(u64),
    Bytes(usize),
}

impl fmt::Display for ShipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShipReason::Invokes(count) => write!(f, "invoke threshold met, {count} invokes counted"),
            ShipReason::Elapsed(millis) => {
                write!(f, "time threshold met, {millis} milliseconds elapsed")
            }
            ShipReason::Bytes(bytes) => write!(f, "log size threshold met, log is {bytes} bytes"),
        }
    }
}

#[derive(Debug)]
pub struct BatchPolicy {
    queue: Arc<IngestQueue>,
    thresholds: ShipThresholds,
    invoke_count: u64,
    last_ship: Instant,
    /// Bytes already moved from the queue into the uploader for the batch in
    /// progress. They still count towards the byte threshold.
    drained_bytes: usize,
}

impl BatchPolicy {
    #[must_use]
    pub fn new(queue: Arc<IngestQueue>, thresholds: ShipThresholds) -> Self {
        BatchPolicy {
            queue,
            thresholds: ShipThresholds::new(
                thresholds.max_bytes,
                thresholds.max_invokes,
                thresholds.max_millis,
            ),
            invoke_count: 0,
            last_ship: Instant::now(),
            drained_bytes: 0,
        }
    }

    pub fn count_invoke(&mut self) {
        self.invoke_count += 1;
    }

    pub fn record_drained(&mut self, bytes: usize) {
        self.drained_bytes += bytes;
    }

    #[must_use]
    pub fn invoke_count(&self) -> u64 {
        self.invoke_count
    }

    #[must_use]
    pub fn last_ship(&self) -> Instant {
        self.last_ship
    }

    #[must_use]
    pub fn thresholds(&self) -> ShipThresholds {
        self.thresholds
    }

    /// Bytes waiting to be shipped: still queued plus already drained.
    #[must_use]
    pub fn unshipped_bytes(&self) -> usize {
        self.queue.size() + self.drained_bytes
    }

    #[must_use]
    pub fn elapsed_millis(&self) -> u64 {
        u64::try_from(self.last_ship.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// First satisfied threshold, in invokes, time, bytes order.
    #[must_use]
    pub fn ship_reason(&self) -> Option<ShipReason> {
        if self.invoke_count >= self.thresholds.max_invokes {
            return Some(ShipReason::Invokes(self.invoke_count));
        }
        let elapsed = self.elapsed_millis();
        if elapsed >= self.thresholds.max_millis {
            return Some(ShipReason::Elapsed(elapsed));
        }
        let bytes = self.unshipped_bytes();
        if bytes >= self.thresholds.max_bytes {
            return Some(ShipReason::Bytes(bytes));
        }
        None
    }

    #[must_use]
    pub fn should_ship(&self) -> bool {
        match self.ship_reason() {
            Some(reason) => {
                info!("Shipping batch: {reason}");
                true
            }
            None => false,
        }
    }

    /// Starts a new batch window. Only call after a successful ship.
    pub fn reset(&mut self) {
        self.invoke_count = 0;
        self.drained_bytes = 0;
        self.last_ship = Instant::now();
    }
}

impl fmt::Display for BatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invokes: {} Time elapsed: {} Queue Size: {}",
            self.invoke_count,
            self.elapsed_millis(),
            self.unshipped_bytes()
        )
    }
}
