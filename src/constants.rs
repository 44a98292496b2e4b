// src/constants.rs
//
// Central location for all constants used throughout s3-load-bench
// Defaults match the Wasabi benchmark and Veeam-pattern command lines

use std::time::Duration;

// =============================================================================
// Run Defaults
// =============================================================================

/// Default duration of each phase (sequential) or of each sub-worker (staggered)
pub const DEFAULT_DURATION_SECS: u64 = 60;

/// Default number of worker threads (sequential) or lanes (staggered)
pub const DEFAULT_THREADS: usize = 1;

/// Default number of times the sequential phase set is repeated
pub const DEFAULT_LOOPS: u32 = 1;

/// Default object size for sequential PUTs ("1M" in bytefmt notation)
pub const DEFAULT_OBJECT_SIZE: u64 = 1024 * 1024;

/// Default endpoint when none is given
pub const DEFAULT_ENDPOINT: &str = "http://s3.wasabisys.com";

/// Default region for the SDK client (signature V2 ignores it)
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default bucket for the sequential benchmark
pub const DEFAULT_SEQUENTIAL_BUCKET: &str = "wasabi-benchmark-bucket";

/// Default bucket for the staggered benchmark
pub const DEFAULT_STAGGERED_BUCKET: &str = "veeam-test";

// =============================================================================
// Staggered (lane) Defaults
// =============================================================================

/// Default offset between the start of consecutive sub-workers in a lane
pub const DEFAULT_DELTA_SECS: u64 = 5;

/// Default initial seed; lane N uses `seed + N`
pub const DEFAULT_SEED: u64 = 1;

/// Default maximum number of entries per generated folder level
pub const DEFAULT_FOLDER_CAPACITY: u16 = 10;

/// Smallest accepted folder capacity
pub const MIN_FOLDER_CAPACITY: u16 = 2;

/// Smallest accepted staggered duration (seconds)
pub const MIN_STAGGERED_DURATION_SECS: u64 = 4;

/// Smallest accepted staggered delta (seconds)
pub const MIN_DELTA_SECS: u64 = 1;

/// Root under which generated backup-style keys are written
pub const DEFAULT_KEY_ROOT: &str = "Veeam/Archive/veeam/";

/// Sleep between polls while a lane has no keys to consume yet
pub const EMPTY_WORKLOAD_POLL: Duration = Duration::from_millis(10);

// =============================================================================
// Key Layout
// =============================================================================

/// Extension of every generated block object
pub const BLOCK_EXTENSION: &str = ".blk";

/// Suffix of the head block in each innermost folder
pub const HEAD_BLOCK_SUFFIX: &str = "00000000000000000000000000000000";

/// Prefix of the numbered objects written by the sequential benchmark
pub const SEQUENTIAL_OBJECT_PREFIX: &str = "Object-";

/// Object numbers are folded into this many listing prefixes
pub const SEQUENTIAL_PREFIX_MODULUS: u64 = 100;

// =============================================================================
// Listing
// =============================================================================

/// Page cap for every list call
pub const LIST_PAGE_SIZE: i32 = 1000;

/// Delimiter rotation period; counters at or above `DELIMITED_SLOTS` list flat
pub const DELIMITER_CYCLE: u32 = 10;

/// Number of rotation slots that carry a delimiter
pub const DELIMITED_SLOTS: u32 = 8;

/// Delimiter used by the staggered listing worker
pub const FOLDER_DELIMITER: &str = "/";

// =============================================================================
// HTTP Transport
// =============================================================================

/// Status code treated as "slow down"
pub const THROTTLE_STATUS: u16 = 503;

/// S3 error code equivalent to the throttle status
pub const THROTTLE_ERROR_CODE: &str = "SlowDown";

/// Connect timeout for the shared HTTP client
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP keep-alive for pooled connections
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Idle pooled connections are dropped after this long
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Idle connections kept per host
pub const POOL_MAX_IDLE_PER_HOST: usize = 4096;

/// Largest number of keys per bulk delete request
pub const BULK_DELETE_BATCH: usize = 1000;

// =============================================================================
// Metrics and Progress
// =============================================================================

/// Upper bound of the latency histograms (1 hour in microseconds)
pub const HISTOGRAM_MAX_MICROS: u64 = 3_600_000_000;

/// Significant digits kept by the latency histograms
pub const HISTOGRAM_SIGFIGS: u8 = 3;

/// Interval between progress lines during a staggered run
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
