// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP push endpoint.
//!
//! Every `POST` (or `PUT`) is acknowledged with `200 OK`, whatever happens to
//! its body. A body holding a JSON array is split into one record per entry;
//! anything else becomes a single record.
//!
//! Nothing is logged for a successful push. The sidecar's own output may be
//! delivered back to this endpoint, and logging every push would feed on
//! itself.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::value::RawValue;
use std::convert::Infallible;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::constants::LISTENER_SHUTDOWN_TIMEOUT;
use crate::queue::{IngestQueue, Record};

pub struct IngestListener {
    queue: Arc<IngestQueue>,
    cancel: CancellationToken,
}

impl IngestListener {
    #[must_use]
    pub fn new(queue: Arc<IngestQueue>, cancel: CancellationToken) -> Self {
        IngestListener { queue, cancel }
    }

    /// Accepts connections until the cancellation token fires, then gives
    /// open connections [`LISTENER_SHUTDOWN_TIMEOUT`] to finish.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        let IngestListener { queue, cancel } = self;
        if let Ok(addr) = listener.local_addr() {
            debug!("Push endpoint listening on {addr}");
        }

        let service = service_fn(move |req: Request<Incoming>| {
            let queue = Arc::clone(&queue);
            async move { Ok::<_, Infallible>(handle_push(req, &queue).await) }
        });
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                () = cancel.cancelled() => break,
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Push endpoint error: {e}");
                        return Err(e);
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        error!("Push connection handler panicked: {e:?}");
                        continue;
                    }
                    Ok(()) | Err(_) => continue,
                },
            };
            let conn = TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Push connection error: {e}");
                }
            });
        }

        drop(listener);
        let drained = tokio::time::timeout(LISTENER_SHUTDOWN_TIMEOUT, async {
            while joinset.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            debug!("Closing {} push connections still open", joinset.len());
            joinset.abort_all();
        }
        Ok(())
    }
}

async fn handle_push(req: Request<Incoming>, queue: &IngestQueue) -> Response<Full<Bytes>> {
    if !matches!(req.method(), &Method::POST | &Method::PUT) {
        let mut not_allowed = Response::new(Full::new(Bytes::new()));
        *not_allowed.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return not_allowed;
    }

    match req.into_body().collect().await {
        Ok(collected) => queue.put_all(records_from_body(collected.to_bytes())),
        Err(e) => error!("Failed to read pushed body: {e}"),
    }
    Response::new(Full::new(Bytes::new()))
}

/// Splits a pushed body into records. A JSON array yields one record per
/// element, kept byte for byte and newline terminated; any other non-empty
/// body is a single record.
#[must_use]
pub fn records_from_body(body: Bytes) -> Vec<Record> {
    let starts_array = body
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'[');
    if starts_array {
        if let Ok(entries) = serde_json::from_slice::<Vec<Box<RawValue>>>(&body) {
            return entries
                .iter()
                .map(|entry| Record::from(format!("{}\n", entry.get()).into_bytes()))
                .collect();
        }
    }
    if body.is_empty() {
        Vec::new()
    } else {
        vec![Record::new(body)]
    }
}
