// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Object key naming.
//!
//! Keys look like `2024-05-01-<environment id>/<source>-<unix millis>-<id>.log`.
//! The date prefix groups one execution environment's objects per day, and the
//! environment id stays fixed for the life of the process.

use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct ObjectKeyGenerator {
    environment_id: Uuid,
    source_name: String,
}

impl ObjectKeyGenerator {
    #[must_use]
    pub fn new(source_name: &str) -> Self {
        ObjectKeyGenerator {
            environment_id: Uuid::new_v4(),
            source_name: source_name.to_lowercase(),
        }
    }

    #[must_use]
    pub fn environment_id(&self) -> Uuid {
        self.environment_id
    }

    #[must_use]
    pub fn next_key(&self) -> String {
        self.key_at(OffsetDateTime::now_utc())
    }

    /// Key for an object created at `now`. Every call gets a fresh suffix.
    #[must_use]
    pub fn key_at(&self, now: OffsetDateTime) -> String {
        let date = now.date();
        let millis = now.unix_timestamp_nanos() / 1_000_000;
        format!(
            "{:04}-{:02}-{:02}-{}/{}-{}-{}.log",
            date.year(),
            u8::from(date.month()),
            date.day(),
            self.environment_id,
            self.source_name,
            millis,
            Uuid::new_v4()
        )
    }
}
