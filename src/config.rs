// src/config.rs
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_DELTA_SECS, DEFAULT_DURATION_SECS, DEFAULT_ENDPOINT, DEFAULT_KEY_ROOT,
    DEFAULT_LOOPS, DEFAULT_OBJECT_SIZE, DEFAULT_REGION, DEFAULT_SEED,
    DEFAULT_SEQUENTIAL_BUCKET, DEFAULT_STAGGERED_BUCKET, DEFAULT_THREADS, MIN_DELTA_SECS,
    MIN_FOLDER_CAPACITY, MIN_STAGGERED_DURATION_SECS,
};
use crate::generator::FolderCapacity;
use crate::size_parser::deserialize_size;

/// How phases are laid out in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// PUT, GET, LIST v2, LIST versions, DELETE one after another, `loops` times
    #[default]
    Sequential,
    /// Lanes of PUT/GET/LIST/DELETE sub-workers started `delta` apart
    Staggered,
}

/// Immutable run parameters shared by the orchestrator and every worker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BenchmarkConfig {
    /// Endpoint URL with scheme; `http://` is assumed when missing
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Region handed to the SDK client used for listings and bootstrap
    #[serde(default = "default_region")]
    pub region: String,

    pub access_key: String,

    pub secret_key: String,

    /// Bucket to benchmark; defaults depend on the mode
    #[serde(default)]
    pub bucket: Option<String>,

    #[serde(default)]
    pub mode: Mode,

    /// Concurrent workers per phase (sequential) or lanes (staggered)
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Length of each phase / sub-worker (e.g. "60s", "5m")
    #[serde(default = "default_duration", with = "humantime_serde")]
    pub duration: Duration,

    /// Body size of sequential PUTs; accepts "1M" style strings
    #[serde(default = "default_object_size", deserialize_with = "deserialize_size")]
    pub object_size: u64,

    /// Number of times the sequential phase set is repeated
    #[serde(default = "default_loops")]
    pub loops: u32,

    /// Initial generator seed; worker/lane N uses `seed + N`
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Start offset between consecutive sub-workers of a lane
    #[serde(default = "default_delta", with = "humantime_serde")]
    pub delta: Duration,

    /// Folder fan-out bounds of the generated key layout
    #[serde(default)]
    pub folders: FolderCapacity,

    /// Prefix under which generated keys are written (staggered)
    #[serde(default = "default_key_root")]
    pub key_root: String,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_threads() -> usize {
    DEFAULT_THREADS
}

fn default_duration() -> Duration {
    Duration::from_secs(DEFAULT_DURATION_SECS)
}

fn default_object_size() -> u64 {
    DEFAULT_OBJECT_SIZE
}

fn default_loops() -> u32 {
    DEFAULT_LOOPS
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_delta() -> Duration {
    Duration::from_secs(DEFAULT_DELTA_SECS)
}

fn default_key_root() -> String {
    DEFAULT_KEY_ROOT.to_string()
}

impl BenchmarkConfig {
    /// Config with defaults for everything except credentials.
    pub fn new(mode: Mode, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            endpoint: default_endpoint(),
            region: default_region(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            bucket: None,
            mode,
            threads: default_threads(),
            duration: default_duration(),
            object_size: default_object_size(),
            loops: default_loops(),
            seed: default_seed(),
            delta: default_delta(),
            folders: FolderCapacity::default(),
            key_root: default_key_root(),
        }
    }

    /// Load a YAML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let buf = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Self = serde_yaml::from_slice(&buf)
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(cfg)
    }

    /// Bucket name, falling back to the mode's default.
    pub fn bucket(&self) -> &str {
        match (&self.bucket, self.mode) {
            (Some(bucket), _) => bucket,
            (None, Mode::Sequential) => DEFAULT_SEQUENTIAL_BUCKET,
            (None, Mode::Staggered) => DEFAULT_STAGGERED_BUCKET,
        }
    }

    /// Endpoint with a scheme and without a trailing slash.
    pub fn endpoint_url(&self) -> String {
        let trimmed = self.endpoint.trim().trim_end_matches('/');
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        }
    }

    /// Wall-clock length of a staggered run: `duration + 3 * delta`.
    pub fn staggered_run_length(&self) -> Duration {
        self.duration + self.delta * 3
    }

    /// Reject parameters the workers cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.access_key.is_empty() {
            bail!("Missing access key");
        }
        if self.secret_key.is_empty() {
            bail!("Missing secret key");
        }
        if self.bucket().is_empty() {
            bail!("Bucket name must not be empty");
        }
        if self.threads == 0 {
            bail!("threads must be at least 1");
        }
        if self.duration.is_zero() {
            bail!("duration must be greater than zero");
        }

        match self.mode {
            Mode::Sequential => {
                if self.loops == 0 {
                    bail!("loops must be at least 1");
                }
            }
            Mode::Staggered => {
                if self.duration < Duration::from_secs(MIN_STAGGERED_DURATION_SECS) {
                    bail!(
                        "staggered duration must be at least {}s, got {:?}",
                        MIN_STAGGERED_DURATION_SECS,
                        self.duration
                    );
                }
                if self.delta < Duration::from_secs(MIN_DELTA_SECS) {
                    bail!("delta must be at least {}s, got {:?}", MIN_DELTA_SECS, self.delta);
                }
                // Zero is a fixed point of the mixer: every draw would be 0.
                if self.seed == 0 {
                    bail!("seed must be at least 1");
                }
                let f = &self.folders;
                for (name, value) in [("f1", f.folder1), ("f2", f.folder2), ("f3", f.folder3)] {
                    if value < MIN_FOLDER_CAPACITY {
                        bail!(
                            "folder capacity {} must be at least {}, got {}",
                            name,
                            MIN_FOLDER_CAPACITY,
                            value
                        );
                    }
                }
            }
        }
        Ok(())
    }
}
