// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Defaults and hard limits shared across the pipeline.

use std::time::Duration;

/// Default byte threshold for shipping a batch (4 KiB).
pub const DEFAULT_SHIP_RATE_BYTES: usize = 4 * 1_024;

/// Default number of invocations between shipped batches.
pub const DEFAULT_SHIP_RATE_INVOKES: u64 = 10;

/// Default time between shipped batches, in milliseconds.
pub const DEFAULT_SHIP_RATE_MILLISECONDS: u64 = 10 * 1_000;

/// Upper bound for the byte threshold. Larger configured values are clamped
/// to this so the sidecar cannot hold an unbounded amount of log data.
pub const MAX_SHIP_RATE_BYTES: usize = 50 * 1_024 * 1_024;

/// Size of every non-final multipart part (5 MiB). Most object stores reject
/// non-final parts smaller than this.
pub const DEFAULT_PART_SIZE_BYTES: usize = 5 * 1_024 * 1_024;

/// Attempts per part before the session is given up.
pub const DEFAULT_PART_MAX_ATTEMPTS: u64 = 3;

/// Time budget for the forced flush once shutdown has been requested.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(1_500);

/// Budget for the best-effort abort issued after the shutdown grace period
/// ran out.
pub const ABORT_TIMEOUT: Duration = Duration::from_millis(500);

/// Port the push endpoint listens on.
pub const DEFAULT_LISTEN_PORT: u16 = 1234;

/// Host the push endpoint binds to inside the sandbox.
pub const DEFAULT_LISTEN_HOST: &str = "sandbox.localdomain";

/// Interval between synthetic lifecycle ticks in the sidecar binary.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Name used in object keys when the host does not expose one.
pub const DEFAULT_SOURCE_NAME: &str = "function";

/// Time open push connections get to finish once the listener stops
/// accepting.
pub const LISTENER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Directory the filesystem blob store keeps destinations under.
pub const DEFAULT_STORE_ROOT: &str = "/tmp/log-shipper";
