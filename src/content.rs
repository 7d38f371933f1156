// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Chorus Labs

//! Content-access service client.
//!
//! The content service owns access flags and purchase terms; the engine
//! only reads entities, finalizes purchases, and applies the favorite side
//! effect. A local content cache is refreshed on every access poll so the
//! UI reflects unlock state immediately.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::error::GatewayError;
use crate::models::{AccessGrant, ContentType};

/// Purchase terms attached to paid content.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PurchaseTerms {
    /// Price in minor units.
    pub price_minor: u64,
}

/// Canonical view of a content entity with the caller's access flags.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityWithAccess {
    pub content_id: String,
    pub owner_id: String,
    pub access: AccessGrant,
    pub purchase_terms: Option<PurchaseTerms>,
}

/// Content-access service surface the engine depends on.
#[async_trait]
pub trait ContentGateway: Send + Sync {
    async fn entity_with_access(
        &self,
        content_id: &str,
        content_type: ContentType,
        user_id: &str,
    ) -> Result<EntityWithAccess, GatewayError>;

    /// Finalize a purchase. Side effects are only applied after this call
    /// has been acknowledged.
    async fn finalize_purchase(
        &self,
        user_id: &str,
        content_id: &str,
        content_type: ContentType,
        price_minor: u64,
        extra_minor: u64,
    ) -> Result<(), GatewayError>;

    async fn favorite(
        &self,
        user_id: &str,
        content_id: &str,
        content_type: ContentType,
    ) -> Result<(), GatewayError>;

    /// Track ids of an album, for the post-unlock access fan-out.
    async fn album_track_ids(&self, album_id: &str) -> Result<Vec<String>, GatewayError>;
}

/// Local cache of content metadata the host UI renders from.
pub trait ContentCache: Send + Sync {
    fn update_access(&self, content_id: &str, grant: AccessGrant);
}

/// Cache that drops updates, for hosts without a local content cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullContentCache;

impl ContentCache for NullContentCache {
    fn update_access(&self, _content_id: &str, _grant: AccessGrant) {}
}

fn type_segment(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Track => "tracks",
        ContentType::Album => "albums",
    }
}

/// HTTP client for the content-access service.
#[derive(Debug, Clone)]
pub struct ContentClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ContentClient {
    pub fn new(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }
}

#[async_trait]
impl ContentGateway for ContentClient {
    async fn entity_with_access(
        &self,
        content_id: &str,
        content_type: ContentType,
        user_id: &str,
    ) -> Result<EntityWithAccess, GatewayError> {
        let response = self
            .http
            .get(self.endpoint(&format!(
                "/v1/{}/{content_id}",
                type_segment(content_type)
            )))
            .query(&[("user_id", user_id)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GatewayError::InvalidResponse(format!(
                "entity fetch returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("entity invalid JSON: {e}")))
    }

    async fn finalize_purchase(
        &self,
        user_id: &str,
        content_id: &str,
        content_type: ContentType,
        price_minor: u64,
        extra_minor: u64,
    ) -> Result<(), GatewayError> {
        let payload = json!({
            "user_id": user_id,
            "content_id": content_id,
            "content_type": content_type,
            "price_minor": price_minor,
            "extra_minor": extra_minor,
        });
        let response = self
            .http
            .post(self.endpoint("/v1/purchases"))
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::InvalidResponse(format!(
                "purchase finalize returned {status}: {body}"
            )));
        }
        Ok(())
    }

    async fn favorite(
        &self,
        user_id: &str,
        content_id: &str,
        content_type: ContentType,
    ) -> Result<(), GatewayError> {
        let payload = json!({
            "user_id": user_id,
            "content_id": content_id,
            "content_type": content_type,
        });
        let response = self
            .http
            .post(self.endpoint("/v1/favorites"))
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GatewayError::InvalidResponse(format!(
                "favorite returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn album_track_ids(&self, album_id: &str) -> Result<Vec<String>, GatewayError> {
        #[derive(Deserialize)]
        struct TrackList {
            track_ids: Vec<String>,
        }
        let response = self
            .http
            .get(self.endpoint(&format!("/v1/albums/{album_id}/tracks")))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GatewayError::InvalidResponse(format!(
                "track list returned {}",
                response.status()
            )));
        }
        let list: TrackList = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("track list invalid JSON: {e}")))?;
        Ok(list.track_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_deserializes_with_optional_terms() {
        let raw = r#"{
            "content_id": "track-1",
            "owner_id": "artist-9",
            "access": {"stream": false, "download": false},
            "purchase_terms": {"price_minor": 100}
        }"#;
        let entity: EntityWithAccess = serde_json::from_str(raw).unwrap();
        assert_eq!(entity.purchase_terms.unwrap().price_minor, 100);
        assert!(!entity.access.stream);

        let raw = r#"{
            "content_id": "track-2",
            "owner_id": "artist-9",
            "access": {"stream": true, "download": true},
            "purchase_terms": null
        }"#;
        let entity: EntityWithAccess = serde_json::from_str(raw).unwrap();
        assert!(entity.purchase_terms.is_none());
        assert!(entity.access.stream);
    }

    #[test]
    fn type_segments() {
        assert_eq!(type_segment(ContentType::Track), "tracks");
        assert_eq!(type_segment(ContentType::Album), "albums");
    }
}
