//! Mirrored tile download.
//!
//! A [`Fetcher`] downloads one tile by walking its mirror list in order.
//! Each mirror gets exactly one attempt with its own timeout; timeouts, HTTP
//! errors, connection failures and truncated bodies all move on to the next
//! mirror. Only when every mirror has failed does the fetcher report a
//! [`FetchError`] listing what was tried.
//!
//! The HTTP transport sits behind the [`HttpClient`] trait so acquisition
//! can be exercised without a network.

use crate::telemetry::metric_defs;
use crate::CancelToken;
use localmap_geo::TileId;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default User-Agent for mirror requests.
pub const DEFAULT_USER_AGENT: &str = concat!("localmap-dem/", env!("CARGO_PKG_VERSION"));

/// Why a single mirror attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    /// The attempt exceeded its timeout.
    #[error("timed out")]
    Timeout,
    /// The server answered with a non-success status.
    #[error("HTTP {0}")]
    HttpStatus(u16),
    /// The connection could not be established or was dropped.
    #[error("connection error: {0}")]
    Connection(String),
    /// The body was too small to be a real tile.
    #[error("undersized body ({bytes} bytes, minimum {minimum})")]
    Undersized {
        /// Bytes received.
        bytes: u64,
        /// Minimum viable size.
        minimum: u64,
    },
    /// Cancellation was requested before the attempt started.
    #[error("cancelled")]
    Cancelled,
}

/// Blocking HTTP GET transport.
///
/// Implementations must honour `timeout` for the whole request, body
/// included.
pub trait HttpClient: Send + Sync {
    /// Fetch `url`, returning the response body on a success status.
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FailureReason>;
}

/// Production [`HttpClient`] backed by blocking reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Create a client that identifies itself with `user_agent`.
    pub fn new(user_agent: &str) -> crate::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FailureReason> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FailureReason::HttpStatus(status.as_u16()));
        }

        let bytes = response.bytes().map_err(classify)?;
        Ok(bytes.to_vec())
    }
}

fn classify(err: reqwest::Error) -> FailureReason {
    if err.is_timeout() {
        FailureReason::Timeout
    } else if let Some(status) = err.status() {
        FailureReason::HttpStatus(status.as_u16())
    } else {
        FailureReason::Connection(err.to_string())
    }
}

/// One failed mirror attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{url} ({reason})")]
pub struct MirrorAttempt {
    /// Expanded mirror URL.
    pub url: String,
    /// Why it failed.
    pub reason: FailureReason,
}

/// Every mirror for a tile failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{tile}: {}", describe_attempts(.attempts))]
pub struct FetchError {
    /// The tile that could not be obtained.
    pub tile: TileId,
    /// Attempts in mirror order. Empty when the source has no mirrors.
    pub attempts: Vec<MirrorAttempt>,
}

fn describe_attempts(attempts: &[MirrorAttempt]) -> String {
    if attempts.is_empty() {
        return "no mirrors available".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl FetchError {
    /// URLs that were tried, in order.
    pub fn tried(&self) -> Vec<&str> {
        self.attempts.iter().map(|a| a.url.as_str()).collect()
    }

    /// Whether the fetch stopped because of cancellation.
    pub fn was_cancelled(&self) -> bool {
        self.attempts
            .iter()
            .any(|a| a.reason == FailureReason::Cancelled)
    }
}

/// Downloads tiles from mirror lists.
#[derive(Clone)]
pub struct Fetcher {
    client: Arc<dyn HttpClient>,
    attempt_timeout: Duration,
    min_tile_bytes: u64,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("attempt_timeout", &self.attempt_timeout)
            .field("min_tile_bytes", &self.min_tile_bytes)
            .finish()
    }
}

impl Fetcher {
    /// Create a fetcher over `client`.
    pub fn new(client: Arc<dyn HttpClient>, attempt_timeout: Duration, min_tile_bytes: u64) -> Self {
        Self {
            client,
            attempt_timeout,
            min_tile_bytes,
        }
    }

    /// Per-attempt timeout.
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Smallest body accepted as a tile.
    pub fn min_tile_bytes(&self) -> u64 {
        self.min_tile_bytes
    }

    /// Download `tile` from the first mirror that delivers a viable body.
    pub fn fetch(
        &self,
        tile: &TileId,
        mirrors: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, FetchError> {
        let mut attempts = Vec::with_capacity(mirrors.len());

        for url in mirrors {
            if cancel.is_cancelled() {
                attempts.push(MirrorAttempt {
                    url: url.clone(),
                    reason: FailureReason::Cancelled,
                });
                break;
            }

            debug!(tile = %tile, mirror = %url, "requesting tile");
            let reason = match self.client.get(url, self.attempt_timeout) {
                Ok(body) if body.len() as u64 >= self.min_tile_bytes => {
                    metrics::counter!(metric_defs::TILES_FETCHED.name, "source" => tile.source_name())
                        .increment(1);
                    metrics::counter!(metric_defs::BYTES_FETCHED.name, "source" => tile.source_name())
                        .increment(body.len() as u64);
                    debug!(tile = %tile, mirror = %url, bytes = body.len(), "tile downloaded");
                    return Ok(body);
                }
                Ok(body) => FailureReason::Undersized {
                    bytes: body.len() as u64,
                    minimum: self.min_tile_bytes,
                },
                Err(reason) => reason,
            };

            warn!(tile = %tile, mirror = %url, %reason, "mirror attempt failed");
            metrics::counter!(metric_defs::MIRROR_FAILURES.name, "source" => tile.source_name())
                .increment(1);
            attempts.push(MirrorAttempt {
                url: url.clone(),
                reason,
            });
        }

        Err(FetchError {
            tile: *tile,
            attempts,
        })
    }
}
