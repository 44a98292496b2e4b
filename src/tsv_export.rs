//! TSV export for machine-readable benchmark results

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::metrics::PhaseResult;

pub const TSV_HEADER: &str = "loop\toperation\telapsed_secs\tattempted\tsucceeded\tthrottled\tsoft_errors\trows\tops_per_sec\tbytes_per_sec\trows_per_sec\tp50_us\tp95_us\tp99_us";

/// TSV exporter for phase results
pub struct TsvExporter {
    path: PathBuf,
}

impl TsvExporter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Write one row per phase; `phases` pairs a loop number with its result.
    pub fn export_results(&self, phases: &[(u32, PhaseResult)], object_size: u64) -> Result<()> {
        let mut f = File::create(&self.path)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;

        writeln!(f, "{}", TSV_HEADER)?;
        for (loop_no, phase) in phases {
            writeln!(f, "{}", format_row(*loop_no, phase, object_size))?;
        }

        println!("\nTSV results exported to: {}", self.path.display());
        Ok(())
    }
}

fn format_row(loop_no: u32, phase: &PhaseResult, object_size: u64) -> String {
    let c = &phase.counters;
    let rates = phase.rates(object_size);
    let (p50, p95, p99) = phase.latency_percentiles();
    format!(
        "{}\t{}\t{:.3}\t{}\t{}\t{}\t{}\t{}\t{:.2}\t{:.0}\t{:.2}\t{}\t{}\t{}",
        loop_no,
        phase.op.label(),
        phase.elapsed().as_secs_f64(),
        c.attempted,
        c.succeeded,
        c.throttled,
        c.soft_errors,
        c.rows,
        rates.ops_per_sec,
        rates.bytes_per_sec,
        rates.rows_per_sec,
        p50,
        p95,
        p99
    )
}
