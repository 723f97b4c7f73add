use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::future::Future;

use crate::error::CoreError;
use crate::repo::idempotency_repo::IdempotencyRepo;

const REPLAY_POLL_ATTEMPTS: u32 = 10;
const REPLAY_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(250);

/// Polls `check` until it yields a value or the attempts run out.
pub async fn poll_until<T, F, Fut>(
    attempts: u32,
    interval: std::time::Duration,
    mut check: F,
) -> Result<Option<T>, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, CoreError>>,
{
    for attempt in 0..attempts {
        if let Some(value) = check().await? {
            return Ok(Some(value));
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Ok(None)
}

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status_code: i32,
    pub body: serde_json::Value,
}

/// Outcome of `begin`: either this caller owns the execution, or a prior
/// execution's result is replayed, or the owner is still running.
#[derive(Debug)]
pub enum Begin {
    Fresh,
    Replay(CachedResponse),
    InFlight,
}

/// Deduplicates unsafe requests by key + body hash. Every state-mutating
/// entry point wraps its handler in `begin`/`complete`; losers of a
/// concurrent race replay the winner's response instead of re-executing.
#[derive(Clone)]
pub struct IdempotencyStore {
    pub repo: IdempotencyRepo,
    pub ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(repo: IdempotencyRepo, ttl_hours: i64) -> Self {
        Self {
            repo,
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub fn hash_body(body: &[u8]) -> String {
        hex::encode(Sha256::digest(body))
    }

    pub async fn begin(&self, key: &str, request_hash: &str) -> Result<Begin, CoreError> {
        if let Some(record) = self.repo.find_valid(key).await.map_err(CoreError::Internal)? {
            if record.request_hash != request_hash {
                return Err(CoreError::KeyConflict);
            }
            return Ok(match (record.status_code, record.response) {
                (Some(status), Some(body)) => Begin::Replay(CachedResponse {
                    status_code: status,
                    body,
                }),
                _ => Begin::InFlight,
            });
        }

        let expires_at = Utc::now() + self.ttl;
        if self
            .repo
            .try_reserve(key, request_hash, expires_at)
            .await
            .map_err(CoreError::Internal)?
        {
            return Ok(Begin::Fresh);
        }

        // Lost the insert race; the winner's row exists now.
        match self.repo.find_valid(key).await.map_err(CoreError::Internal)? {
            Some(record) if record.request_hash != request_hash => Err(CoreError::KeyConflict),
            Some(record) => Ok(match (record.status_code, record.response) {
                (Some(status), Some(body)) => Begin::Replay(CachedResponse {
                    status_code: status,
                    body,
                }),
                _ => Begin::InFlight,
            }),
            None => Ok(Begin::Fresh),
        }
    }

    /// Waits, bounded, for the in-flight owner of `key` to store its
    /// response. `None` means the owner is still running after the wait;
    /// a vanished reservation (owner failed and released) also yields
    /// `None`, telling the caller to retry rather than inherit it.
    pub async fn await_response(
        &self,
        key: &str,
        request_hash: &str,
    ) -> Result<Option<CachedResponse>, CoreError> {
        let repo = &self.repo;
        poll_until(REPLAY_POLL_ATTEMPTS, REPLAY_POLL_INTERVAL, || async move {
            match repo.find_valid(key).await.map_err(CoreError::Internal)? {
                Some(record) if record.request_hash != request_hash => Err(CoreError::KeyConflict),
                Some(record) => Ok(match (record.status_code, record.response) {
                    (Some(status), Some(body)) => Some(CachedResponse {
                        status_code: status,
                        body,
                    }),
                    _ => None,
                }),
                None => Ok(None),
            }
        })
        .await
    }

    /// Persists the result before it is returned to the caller, so a replay
    /// can never observe a missing response for a finished execution.
    pub async fn complete(
        &self,
        key: &str,
        status_code: i32,
        body: serde_json::Value,
    ) -> Result<(), CoreError> {
        self.repo
            .store_response(key, status_code, body)
            .await
            .map_err(CoreError::Internal)
    }

    /// Frees an owned key after an execution that produced no storable
    /// outcome, e.g. an internal failure the caller should retry.
    pub async fn release(&self, key: &str) -> Result<(), CoreError> {
        self.repo.release(key).await.map_err(CoreError::Internal)
    }

    /// Hourly sweep dropping expired keys.
    pub async fn run_cleanup(self) {
        loop {
            match self.repo.delete_expired().await {
                Ok(n) if n > 0 => tracing::info!(deleted = n, "cleaned up expired idempotency keys"),
                Ok(_) => {}
                Err(err) => tracing::error!("idempotency cleanup failed: {}", err),
            }
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        }
    }
}
