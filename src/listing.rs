// src/listing.rs
//
//! List pagination walker
//!
//! One walker per LIST worker. It owns the cursor, follows server-issued
//! continuation values while pages keep coming, and otherwise starts over on
//! a fresh prefix with the next delimiter. Errors are never fatal: they reset
//! the cursor like an exhausted listing does.

use std::sync::Arc;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::backend::{ListError, ListKind, ListPage, ListRequest, ObjectBackend};
use crate::constants::{
    DELIMITED_SLOTS, DELIMITER_CYCLE, FOLDER_DELIMITER, LIST_PAGE_SIZE, SEQUENTIAL_OBJECT_PREFIX,
    SEQUENTIAL_PREFIX_MODULUS,
};
use crate::metrics::OpCounters;

/// Cursor state of one walker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaginationCursor {
    pub continuation_token: Option<String>,
    pub key_marker: Option<String>,
    pub version_id_marker: Option<String>,
    pub prefix: String,
    pub delimiter: Option<String>,
}

impl PaginationCursor {
    fn clear(&mut self) {
        self.continuation_token = None;
        self.key_marker = None;
        self.version_id_marker = None;
    }

    /// Take the continuation values of `page`; false when there are none.
    fn advance(&mut self, kind: ListKind, page: &ListPage) -> bool {
        match kind {
            ListKind::V2 => match &page.next_continuation_token {
                Some(token) if !token.is_empty() => {
                    self.continuation_token = Some(token.clone());
                    true
                }
                _ => false,
            },
            ListKind::Versions => {
                if page.next_key_marker.is_none() && page.next_version_id_marker.is_none() {
                    return false;
                }
                self.key_marker = page.next_key_marker.clone();
                self.version_id_marker = page.next_version_id_marker.clone();
                true
            }
        }
    }
}

/// How the delimiter changes each time the walker starts over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelimiterPolicy {
    /// Counter cycling `0..10`: slots `0..8` use the digit as delimiter,
    /// the last two list without one. Starts undelimited.
    Rotating { counter: u32 },
    /// Always the same delimiter
    Fixed(String),
}

impl DelimiterPolicy {
    pub fn rotating() -> Self {
        DelimiterPolicy::Rotating { counter: 0 }
    }

    pub fn folders() -> Self {
        DelimiterPolicy::Fixed(FOLDER_DELIMITER.to_string())
    }

    fn initial(&self) -> Option<String> {
        match self {
            DelimiterPolicy::Rotating { .. } => None,
            DelimiterPolicy::Fixed(d) => Some(d.clone()),
        }
    }

    /// Advance and return the delimiter for the next listing.
    pub fn rotate(&mut self) -> Option<String> {
        match self {
            DelimiterPolicy::Rotating { counter } => {
                *counter = (*counter + 1) % DELIMITER_CYCLE;
                if *counter < DELIMITED_SLOTS {
                    Some(counter.to_string())
                } else {
                    None
                }
            }
            DelimiterPolicy::Fixed(d) => Some(d.clone()),
        }
    }
}

/// Where new prefixes come from.
#[derive(Debug)]
pub enum PrefixSource {
    /// `Object-<n % 100>` for a random uploaded object number `n`
    Sequential { uploaded: u64, rng: StdRng },
    /// Generated keys of a lane, truncated to the key, its folder or the
    /// folder above, cycling
    Keys {
        keys: Arc<RwLock<Vec<String>>>,
        key_root: String,
        counter: usize,
    },
}

impl PrefixSource {
    pub fn sequential(uploaded: u64, seed: u64) -> Self {
        PrefixSource::Sequential {
            uploaded,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn keys(keys: Arc<RwLock<Vec<String>>>, key_root: impl Into<String>) -> Self {
        PrefixSource::Keys {
            keys,
            key_root: key_root.into(),
            counter: 0,
        }
    }

    /// Next prefix, or `None` when no key has been generated yet.
    pub fn next_prefix(&mut self) -> Option<String> {
        match self {
            PrefixSource::Sequential { uploaded, rng } => {
                let n = rng.random_range(1..=(*uploaded).max(1));
                Some(format!("{}{}", SEQUENTIAL_OBJECT_PREFIX, n % SEQUENTIAL_PREFIX_MODULUS))
            }
            PrefixSource::Keys {
                keys,
                key_root,
                counter,
            } => {
                let keys = keys.read();
                if keys.is_empty() {
                    return None;
                }
                let key = &keys[*counter % keys.len()];
                let depth = *counter % 3;
                *counter = counter.wrapping_add(1);
                Some(format!("{}{}", key_root, truncate_key(key, depth)))
            }
        }
    }

    fn fallback(&self) -> String {
        match self {
            PrefixSource::Sequential { .. } => SEQUENTIAL_OBJECT_PREFIX.to_string(),
            PrefixSource::Keys { key_root, .. } => key_root.clone(),
        }
    }
}

/// Drop `depth` trailing path components; `depth == 0` keeps the key.
///
/// `a/b/c` → `a/b/c`, `a/b`, `a`. Running out of components yields "".
pub fn truncate_key(key: &str, depth: usize) -> &str {
    let mut out = key;
    for _ in 0..depth {
        out = match out.rfind('/') {
            Some(i) => &out[..i],
            None => "",
        };
    }
    out
}

/// What one walker step did to the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Next call continues the same listing
    Advanced,
    /// Listing exhausted, empty or failed; next call starts over
    Restarted,
    /// Starting over found no key to derive a prefix from
    Starved,
}

#[derive(Debug)]
pub struct ListPaginationWalker {
    kind: ListKind,
    cursor: PaginationCursor,
    delimiters: DelimiterPolicy,
    prefixes: PrefixSource,
}

impl ListPaginationWalker {
    pub fn new(kind: ListKind, mut prefixes: PrefixSource, delimiters: DelimiterPolicy) -> Self {
        let prefix = prefixes.next_prefix().unwrap_or_else(|| prefixes.fallback());
        let cursor = PaginationCursor {
            prefix,
            delimiter: delimiters.initial(),
            ..Default::default()
        };
        Self {
            kind,
            cursor,
            delimiters,
            prefixes,
        }
    }

    pub fn cursor(&self) -> &PaginationCursor {
        &self.cursor
    }

    /// The request the next step will issue.
    pub fn request(&self) -> ListRequest {
        ListRequest {
            kind: self.kind,
            prefix: self.cursor.prefix.clone(),
            delimiter: self.cursor.delimiter.clone(),
            max_keys: LIST_PAGE_SIZE,
            continuation_token: self.cursor.continuation_token.clone(),
            key_marker: self.cursor.key_marker.clone(),
            version_id_marker: self.cursor.version_id_marker.clone(),
        }
    }

    /// Issue one list call and update `counters` and the cursor.
    pub async fn step(&mut self, backend: &dyn ObjectBackend, counters: &OpCounters) -> StepOutcome {
        let request = self.request();
        counters.begin();
        match backend.list_page(&request).await {
            Ok(page) => {
                counters.record_success();
                counters.add_rows(page.rows());
                if page.is_truncated && !page.is_empty() && self.cursor.advance(self.kind, &page) {
                    StepOutcome::Advanced
                } else {
                    self.restart()
                }
            }
            Err(ListError::Throttled) => {
                counters.record_throttle();
                debug!("{:?} listing of {:?} throttled", self.kind, request.prefix);
                self.restart()
            }
            Err(e) => {
                counters.record_soft_error();
                warn!("WARNING: failed {:?}: {}", request, e);
                self.restart()
            }
        }
    }

    /// Reset the cursor, pick a new prefix and rotate the delimiter.
    fn restart(&mut self) -> StepOutcome {
        self.cursor.clear();
        self.cursor.delimiter = self.delimiters.rotate();
        match self.prefixes.next_prefix() {
            Some(prefix) => {
                self.cursor.prefix = prefix;
                StepOutcome::Restarted
            }
            None => StepOutcome::Starved,
        }
    }
}
