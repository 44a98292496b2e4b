// src/backend.rs
//
//! Storage backend seam
//!
//! Workers only talk to an [`ObjectBackend`]. The production implementation
//! is [`crate::s3::S3Backend`]; tests plug in in-memory stubs that script
//! throttles, failures and paged listings.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use rand::RngCore;
use thiserror::Error;

/// Outcome of a single object call that got an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutcome {
    /// 2xx; `bytes` is the number of body bytes sent or drained
    Success { bytes: u64 },
    /// Server asked the client to slow down (503)
    Throttled,
    /// Any other status, with the response body for logging
    Unexpected { status: u16, body: String },
}

/// The request never produced a response.
#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError(e.to_string())
    }
}

/// Listing failures; never fatal to the run.
#[derive(Debug, Error)]
pub enum ListError {
    #[error("listing throttled")]
    Throttled,
    #[error("listing failed: {0}")]
    Failed(String),
}

/// PUT body shared by every request of a worker.
#[derive(Debug, Clone)]
pub struct Payload {
    pub data: Bytes,
    /// Base64 MD5 of `data`; absent for zero-length bodies
    pub content_md5: Option<String>,
}

impl Payload {
    /// Random body of `size` bytes with its Content-MD5 precomputed.
    pub fn random(size: usize) -> Self {
        let mut buf = vec![0u8; size];
        rand::rng().fill_bytes(&mut buf);
        Self::from_bytes(Bytes::from(buf))
    }

    pub fn from_bytes(data: Bytes) -> Self {
        let content_md5 = if data.is_empty() {
            None
        } else {
            Some(STANDARD.encode(md5::compute(&data).0))
        };
        Self { data, content_md5 }
    }

    pub fn empty() -> Self {
        Self {
            data: Bytes::new(),
            content_md5: None,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// ListObjectsV2, paged by continuation token
    V2,
    /// ListObjectVersions, paged by key and version-id markers
    Versions,
}

/// One page request. Cursor fields are `None` on the first page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub kind: ListKind,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub max_keys: i32,
    pub continuation_token: Option<String>,
    pub key_marker: Option<String>,
    pub version_id_marker: Option<String>,
}

/// One page of listing results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Object keys (V2) or version/delete-marker keys (versions)
    pub items: Vec<String>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
    pub next_key_marker: Option<String>,
    pub next_version_id_marker: Option<String>,
}

impl ListPage {
    /// Rows this page contributes to the LIST counters.
    pub fn rows(&self) -> u64 {
        (self.items.len() + self.common_prefixes.len()) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.common_prefixes.is_empty()
    }
}

/// Object storage operations driven by the workers.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn put_object(&self, key: &str, payload: &Payload) -> Result<OpOutcome, TransportError>;

    /// Body is drained and discarded.
    async fn get_object(&self, key: &str) -> Result<OpOutcome, TransportError>;

    async fn delete_object(&self, key: &str) -> Result<OpOutcome, TransportError>;

    async fn list_page(&self, request: &ListRequest) -> Result<ListPage, ListError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_md5() {
        let payload = Payload::from_bytes(Bytes::from_static(b"hello"));
        assert_eq!(payload.content_md5.as_deref(), Some("XUFAKrxLKna5cZ2REBfFkg=="));
        assert_eq!(payload.len(), 5);
    }

    #[test]
    fn test_empty_payload_has_no_md5() {
        assert!(Payload::empty().content_md5.is_none());
        assert!(Payload::from_bytes(Bytes::new()).content_md5.is_none());
        assert!(Payload::random(0).is_empty());
    }

    #[test]
    fn test_random_payload_size() {
        let payload = Payload::random(4096);
        assert_eq!(payload.len(), 4096);
        assert!(payload.content_md5.is_some());
    }

    #[test]
    fn test_page_rows_count_prefixes() {
        let page = ListPage {
            items: vec!["a".into(), "b".into()],
            common_prefixes: vec!["c/".into()],
            ..Default::default()
        };
        assert_eq!(page.rows(), 3);
        assert!(!page.is_empty());
        assert!(ListPage::default().is_empty());
    }
}
