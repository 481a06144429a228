// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Filesystem-backed blob store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<bucket>/.owner                        owner marker
//! <root>/<bucket>/.uploads/<upload_id>/session.json
//! <root>/<bucket>/.uploads/<upload_id>/part-00001
//! <root>/<bucket>/<key>                         completed objects
//! ```
//!
//! Part tags are SHA-256 digests of the part body, checked again on
//! completion. Completed objects are written to the staging directory first
//! and renamed into place, so readers never see a half-written object.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::errors::TransportError;
use crate::transport::{BlobStore, CompletedPart};

const OWNER_FILE: &str = ".owner";
const UPLOADS_DIR: &str = ".uploads";
const MANIFEST_FILE: &str = "session.json";
const ASSEMBLY_FILE: &str = "object.partial";
const MAX_PART_NUMBER: u32 = 10_000;

#[derive(Debug, Serialize, Deserialize)]
struct SessionManifest {
    key: String,
}

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    owner: String,
}

impl FsBlobStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, owner: impl Into<String>) -> Self {
        FsBlobStore {
            root: root.into(),
            owner: owner.into(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads a completed object.
    pub async fn read_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, TransportError> {
        let path = self.bucket_dir(bucket)?.join(checked_key(key)?);
        Ok(fs::read(path).await?)
    }

    /// Number of sessions that were started and neither completed nor
    /// aborted.
    pub async fn open_sessions(&self, bucket: &str) -> Result<usize, TransportError> {
        let uploads = self.bucket_dir(bucket)?.join(UPLOADS_DIR);
        let mut entries = match fs::read_dir(&uploads).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut count = 0;
        while entries.next_entry().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, TransportError> {
        if bucket.is_empty()
            || bucket.starts_with('.')
            || bucket.contains('/')
            || bucket.contains('\\')
        {
            return Err(TransportError::Rejected(format!(
                "invalid destination name '{bucket}'"
            )));
        }
        Ok(self.root.join(bucket))
    }

    async fn session_dir(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<PathBuf, TransportError> {
        if upload_id.is_empty() || !upload_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TransportError::NoSuchUpload(upload_id.to_string()));
        }
        let dir = self.bucket_dir(bucket)?.join(UPLOADS_DIR).join(upload_id);
        let manifest = match fs::read(dir.join(MANIFEST_FILE)).await {
            Ok(manifest) => manifest,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TransportError::NoSuchUpload(upload_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let manifest: SessionManifest = serde_json::from_slice(&manifest)
            .map_err(|e| TransportError::Rejected(format!("corrupt session manifest: {e}")))?;
        if manifest.key != key {
            return Err(TransportError::NoSuchUpload(upload_id.to_string()));
        }
        Ok(dir)
    }
}

fn checked_key(key: &str) -> Result<&Path, TransportError> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if valid {
        Ok(path)
    } else {
        Err(TransportError::Rejected(format!("invalid object key '{key}'")))
    }
}

fn part_file(part_number: u32) -> String {
    format!("part-{part_number:05}")
}

/// Hexadecimal SHA-256 digest of a part body, used as its tag.
fn digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn ensure_destination(&self, bucket: &str) -> Result<(), TransportError> {
        let dir = self.bucket_dir(bucket)?;
        fs::create_dir_all(&self.root).await?;
        match fs::create_dir(&dir).await {
            Ok(()) => {
                fs::write(dir.join(OWNER_FILE), self.owner.as_bytes()).await?;
                debug!("Created destination {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let owner = match fs::read_to_string(dir.join(OWNER_FILE)).await {
                    Ok(owner) => owner,
                    Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
                    Err(e) => return Err(e.into()),
                };
                if owner == self.owner {
                    Err(TransportError::AlreadyOwnedByYou(bucket.to_string()))
                } else {
                    Err(TransportError::AlreadyExists(bucket.to_string()))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn init_session(&self, bucket: &str, key: &str) -> Result<String, TransportError> {
        checked_key(key)?;
        let bucket_dir = self.bucket_dir(bucket)?;
        if fs::metadata(&bucket_dir).await.is_err() {
            return Err(TransportError::NoSuchDestination(bucket.to_string()));
        }

        let upload_id = Uuid::new_v4().simple().to_string();
        let dir = bucket_dir.join(UPLOADS_DIR).join(&upload_id);
        fs::create_dir_all(&dir).await?;

        let manifest = serde_json::to_vec(&SessionManifest {
            key: key.to_string(),
        })
        .map_err(|e| TransportError::Rejected(e.to_string()))?;
        fs::write(dir.join(MANIFEST_FILE), manifest).await?;
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, TransportError> {
        if part_number == 0 || part_number > MAX_PART_NUMBER {
            return Err(TransportError::InvalidPart {
                part_number,
                reason: format!("part numbers must be between 1 and {MAX_PART_NUMBER}"),
            });
        }
        let dir = self.session_dir(bucket, key, upload_id).await?;
        fs::write(dir.join(part_file(part_number)), &body).await?;
        Ok(digest(&body))
    }

    async fn complete_session(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), TransportError> {
        let dir = self.session_dir(bucket, key, upload_id).await?;
        if parts.is_empty() {
            return Err(TransportError::InvalidPart {
                part_number: 0,
                reason: "at least one part is required".to_string(),
            });
        }

        let assembly = dir.join(ASSEMBLY_FILE);
        let mut object = fs::File::create(&assembly).await?;
        let mut previous = 0;
        for part in parts {
            if part.part_number <= previous {
                return Err(TransportError::InvalidPart {
                    part_number: part.part_number,
                    reason: "parts must be listed in ascending order".to_string(),
                });
            }
            previous = part.part_number;

            let body = match fs::read(dir.join(part_file(part.part_number))).await {
                Ok(body) => body,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(TransportError::InvalidPart {
                        part_number: part.part_number,
                        reason: "part was never uploaded".to_string(),
                    })
                }
                Err(e) => return Err(e.into()),
            };
            if digest(&body) != part.tag {
                return Err(TransportError::InvalidPart {
                    part_number: part.part_number,
                    reason: "tag does not match uploaded content".to_string(),
                });
            }
            object.write_all(&body).await?;
        }
        object.flush().await?;
        drop(object);

        let target = self.bucket_dir(bucket)?.join(checked_key(key)?);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&assembly, &target).await?;
        fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    async fn abort_session(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), TransportError> {
        let dir = self.session_dir(bucket, key, upload_id).await?;
        fs::remove_dir_all(&dir).await?;
        Ok(())
    }
}
