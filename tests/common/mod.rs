// tests/common/mod.rs
//
// In-memory backend shared by the integration tests

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use s3_load_bench::backend::{
    ListError, ListPage, ListRequest, ObjectBackend, OpOutcome, Payload, TransportError,
};

/// Keeps uploaded keys in a set; answers 503 to the first `throttles` object
/// calls, then behaves like a healthy server.
#[derive(Default)]
pub struct StubBackend {
    throttles_left: AtomicU64,
    pub object_calls: AtomicU64,
    pub list_calls: AtomicU64,
    pub objects: Mutex<BTreeSet<String>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn throttling_first(throttles: u64) -> Self {
        let stub = Self::default();
        stub.throttles_left.store(throttles, Ordering::SeqCst);
        stub
    }

    fn throttle(&self) -> bool {
        self.object_calls.fetch_add(1, Ordering::SeqCst);
        self.throttles_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }
}

#[async_trait]
impl ObjectBackend for StubBackend {
    async fn put_object(&self, key: &str, payload: &Payload) -> Result<OpOutcome, TransportError> {
        if self.throttle() {
            return Ok(OpOutcome::Throttled);
        }
        self.objects.lock().insert(key.to_string());
        Ok(OpOutcome::Success {
            bytes: payload.len() as u64,
        })
    }

    async fn get_object(&self, key: &str) -> Result<OpOutcome, TransportError> {
        if self.throttle() {
            return Ok(OpOutcome::Throttled);
        }
        if self.objects.lock().contains(key) {
            Ok(OpOutcome::Success { bytes: 0 })
        } else {
            Ok(OpOutcome::Unexpected {
                status: 404,
                body: "NoSuchKey".to_string(),
            })
        }
    }

    async fn delete_object(&self, key: &str) -> Result<OpOutcome, TransportError> {
        if self.throttle() {
            return Ok(OpOutcome::Throttled);
        }
        self.objects.lock().remove(key);
        Ok(OpOutcome::Success { bytes: 0 })
    }

    /// Single page of up to `max_keys` matching keys, never truncated.
    async fn list_page(&self, request: &ListRequest) -> Result<ListPage, ListError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let objects = self.objects.lock();
        let items: Vec<String> = objects
            .iter()
            .filter(|k| k.starts_with(&request.prefix))
            .take(request.max_keys as usize)
            .cloned()
            .collect();
        Ok(ListPage {
            items,
            ..Default::default()
        })
    }
}
