// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Access-confirmation polling after a finalized purchase.
//!
//! Purchase finalization is acknowledged before the access flags actually
//! flip server-side, so the engine polls the entity until the watched flag
//! goes true, pushing each observation into the local content cache along
//! the way. For albums the grant fans out to every track, which gets its
//! own cache refresh once the album unlocks.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PurchaseConfig;
use crate::content::{ContentCache, ContentGateway, EntityWithAccess};
use crate::error::PurchaseError;
use crate::models::{AccessGrant, ContentType};

/// Which access flag a poll is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedFlag {
    Stream,
    Download,
}

impl WatchedFlag {
    fn granted(self, access: &AccessGrant) -> bool {
        match self {
            WatchedFlag::Stream => access.stream,
            WatchedFlag::Download => access.download,
        }
    }
}

pub struct AccessPoller {
    content: Arc<dyn ContentGateway>,
    cache: Arc<dyn ContentCache>,
    interval: Duration,
    /// Consecutive fetch failures tolerated before giving up.
    max_consecutive_errors: u32,
}

impl AccessPoller {
    pub fn new(
        content: Arc<dyn ContentGateway>,
        cache: Arc<dyn ContentCache>,
        config: &PurchaseConfig,
    ) -> Self {
        Self {
            content,
            cache,
            interval: Duration::from_millis(config.access_poll_interval_ms),
            max_consecutive_errors: config.max_retry_count,
        }
    }

    /// Poll until `flag` is granted on the entity, updating the cache with
    /// every successful observation. Unbounded in time while the service
    /// answers; only persistent errors or cancellation end the wait early.
    pub async fn poll_for_access(
        &self,
        content_id: &str,
        content_type: ContentType,
        user_id: &str,
        flag: WatchedFlag,
        cancel: &CancellationToken,
    ) -> Result<EntityWithAccess, PurchaseError> {
        let mut consecutive_errors = 0u32;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(content_id, "access poll canceled");
                    return Err(PurchaseError::Canceled);
                }
                _ = tokio::time::sleep(self.interval) => {}
            }

            let entity = match self
                .content
                .entity_with_access(content_id, content_type, user_id)
                .await
            {
                Ok(entity) => {
                    consecutive_errors = 0;
                    entity
                }
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        content_id,
                        consecutive_errors,
                        error = %e,
                        "access poll fetch failed"
                    );
                    if consecutive_errors >= self.max_consecutive_errors {
                        return Err(PurchaseError::AccessTimeout);
                    }
                    continue;
                }
            };

            self.cache.update_access(content_id, entity.access);
            debug!(content_id, access = ?entity.access, "access observed");

            if flag.granted(&entity.access) {
                info!(content_id, flag = ?flag, "content access granted");
                if content_type == ContentType::Album {
                    self.refresh_album_tracks(content_id, user_id).await;
                }
                return Ok(entity);
            }
        }
    }

    /// Album grants cascade to tracks; refresh each one into the cache so
    /// the UI unlocks the whole album at once. Failures here only cost
    /// cache freshness, never the purchase.
    async fn refresh_album_tracks(&self, album_id: &str, user_id: &str) {
        let track_ids = match self.content.album_track_ids(album_id).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(album_id, error = %e, "could not list album tracks for cache refresh");
                return;
            }
        };
        for track_id in track_ids {
            match self
                .content
                .entity_with_access(&track_id, ContentType::Track, user_id)
                .await
            {
                Ok(track) => self.cache.update_access(&track_id, track.access),
                Err(e) => warn!(track_id, error = %e, "track access refresh failed"),
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
