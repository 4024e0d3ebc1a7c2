//! Upstream event forwarding.
//!
//! Forwards a raw event body to multiple destinations concurrently. Each
//! destination gets its own task bounded by the per-call timeout; the
//! aggregate wait is bounded by the overall deadline and unblocks on
//! shutdown. Failures never propagate as errors: every destination yields
//! exactly one [`ForwardResult`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Client;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::bootstrap::Shutdown;
use crate::load::{LoadCounter, LoadGuard};

/// Categorized forward failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ForwardError {
    /// Connection or transport-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Per-call or overall deadline exceeded
    #[error("request timed out")]
    Timeout,

    /// Request could not be built or the response was malformed
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Upstream answered outside [200, 300)
    #[error("upstream returned status {0}")]
    Status(u16),

    /// Aggregate wait was cancelled by shutdown
    #[error("forward cancelled")]
    Cancelled,
}

/// Result of forwarding to one destination.
#[derive(Debug, Clone)]
pub struct ForwardResult {
    /// Destination URL
    pub destination: String,
    /// True iff the upstream answered with a 2xx status
    pub success: bool,
    /// HTTP status code, when a response was received
    pub status_code: Option<u16>,
    /// Failure category, when the forward did not succeed
    pub error: Option<ForwardError>,
}

impl ForwardResult {
    fn ok(destination: String, status: u16) -> Self {
        Self {
            destination,
            success: true,
            status_code: Some(status),
            error: None,
        }
    }

    fn status(destination: String, status: u16) -> Self {
        Self {
            destination,
            success: false,
            status_code: Some(status),
            error: Some(ForwardError::Status(status)),
        }
    }

    fn failed(destination: String, error: ForwardError) -> Self {
        Self {
            destination,
            success: false,
            status_code: None,
            error: Some(error),
        }
    }
}

/// Concurrent multi-destination forwarder.
pub struct Forwarder {
    client: Client,
    load: Arc<LoadCounter>,
    shutdown: Arc<Shutdown>,
}

impl Forwarder {
    /// Create a new forwarder.
    pub fn new(load: Arc<LoadCounter>, shutdown: Arc<Shutdown>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("failed to create HTTP client: {e}"))?;

        Ok(Self {
            client,
            load,
            shutdown,
        })
    }

    /// Forward `body` to every destination concurrently.
    ///
    /// Returns one result per destination, in destination order, after all
    /// tasks finished or the overall deadline elapsed. Destinations are
    /// independent: a hang on one does not delay the others beyond the
    /// shared deadline.
    pub async fn forward_many(
        &self,
        destinations: &[String],
        body: Bytes,
        headers: HeaderMap,
        overall_deadline: Duration,
        per_call_timeout: Duration,
    ) -> Vec<ForwardResult> {
        if destinations.is_empty() {
            return Vec::new();
        }

        let deadline = Instant::now() + overall_deadline;

        let handles: Vec<_> = destinations
            .iter()
            .map(|destination| {
                let client = self.client.clone();
                let load = self.load.clone();
                let destination = destination.clone();
                let body = body.clone();
                let headers = headers.clone();

                tokio::spawn(async move {
                    let _guard = LoadGuard::acquire(load);
                    forward_one(client, destination, body, headers, per_call_timeout).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());

        for (handle, destination) in handles.into_iter().zip(destinations) {
            let abort = handle.abort_handle();

            let result = tokio::select! {
                joined = handle => match joined {
                    Ok(result) => result,
                    Err(e) => {
                        error!(destination = %destination, error = %e, "forward task failed");
                        ForwardResult::failed(
                            destination.clone(),
                            ForwardError::Transport(format!("task failed: {e}")),
                        )
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    abort.abort();
                    ForwardResult::failed(destination.clone(), ForwardError::Timeout)
                }
                _ = self.shutdown.wait() => {
                    abort.abort();
                    ForwardResult::failed(destination.clone(), ForwardError::Cancelled)
                }
            };

            results.push(result);
        }

        results
    }
}

/// Issue a single POST with the raw body and cloned headers.
async fn forward_one(
    client: Client,
    destination: String,
    body: Bytes,
    mut headers: HeaderMap,
    timeout: Duration,
) -> ForwardResult {
    // The host header belongs to the destination, not the inbound request
    headers.remove(reqwest::header::HOST);

    let response = client
        .post(&destination)
        .headers(headers)
        .timeout(timeout)
        .body(body)
        .send()
        .await;

    match response {
        Ok(response) => {
            let status = response.status().as_u16();
            if (200..300).contains(&status) {
                debug!(destination = %destination, status, "forwarded request");
                metrics::counter!("botrouterd.forward.success").increment(1);
                ForwardResult::ok(destination, status)
            } else {
                warn!(destination = %destination, status, "forward returned error status");
                metrics::counter!("botrouterd.forward.failed").increment(1);
                ForwardResult::status(destination, status)
            }
        }
        Err(e) => {
            metrics::counter!("botrouterd.forward.failed").increment(1);
            let error = if e.is_timeout() {
                ForwardError::Timeout
            } else if e.is_connect() {
                ForwardError::Transport(format!("connection failed: {e}"))
            } else if e.is_request() || e.is_builder() {
                ForwardError::Protocol(e.to_string())
            } else {
                ForwardError::Transport(e.to_string())
            };
            debug!(destination = %destination, error = %error, "forward failed");
            ForwardResult::failed(destination, error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn forwarder() -> (Forwarder, Arc<LoadCounter>, Arc<Shutdown>) {
        let load = Arc::new(LoadCounter::new());
        let shutdown = Shutdown::new();
        let forwarder = Forwarder::new(load.clone(), shutdown.clone()).unwrap();
        (forwarder, load, shutdown)
    }

    #[tokio::test]
    async fn test_empty_destinations() {
        let (forwarder, _, _) = forwarder();
        let results = forwarder
            .forward_many(
                &[],
                Bytes::from_static(b"{}"),
                HeaderMap::new(),
                Duration::from_secs(1),
                Duration::from_secs(1),
            )
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_one_result_per_destination_on_refused_connections() {
        let (forwarder, load, _) = forwarder();

        // Nothing listens on these ports; connections are refused quickly
        let destinations = vec![
            "http://127.0.0.1:1/".to_string(),
            "http://127.0.0.1:2/".to_string(),
            "http://127.0.0.1:3/".to_string(),
        ];

        let results = forwarder
            .forward_many(
                &destinations,
                Bytes::from_static(b"{}"),
                HeaderMap::new(),
                Duration::from_secs(5),
                Duration::from_secs(2),
            )
            .await;

        assert_eq!(results.len(), destinations.len());
        for (result, destination) in results.iter().zip(&destinations) {
            assert_eq!(&result.destination, destination);
            assert!(!result.success);
            assert!(result.error.is_some());
        }

        // Load counter restored after all forwards finished
        assert_eq!(load.get(), 0);
    }

    #[tokio::test]
    async fn test_per_call_timeout_on_unresponsive_destination() {
        let (forwarder, load, _) = forwarder();

        // Accept the connection but never answer
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        });

        let destinations = vec![format!("http://{addr}/")];
        let results = forwarder
            .forward_many(
                &destinations,
                Bytes::from_static(b"{}"),
                HeaderMap::new(),
                Duration::from_secs(5),
                Duration::from_millis(200),
            )
            .await;

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].error, Some(ForwardError::Timeout));
        assert_eq!(load.get(), 0);

        server.abort();
    }

    #[tokio::test]
    async fn test_overall_deadline_bounds_the_aggregate() {
        let (forwarder, load, _) = forwarder();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            loop {
                if let Ok((mut socket, _)) = listener.accept().await {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        let _ = socket.read(&mut buf).await;
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    });
                }
            }
        });

        let destinations = vec![format!("http://{addr}/a"), format!("http://{addr}/b")];
        let start = std::time::Instant::now();
        let results = forwarder
            .forward_many(
                &destinations,
                Bytes::from_static(b"{}"),
                HeaderMap::new(),
                Duration::from_millis(300),
                Duration::from_secs(10),
            )
            .await;

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.success));

        // Aborted tasks still release their load guards
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(load.get(), 0);

        server.abort();
    }
}
