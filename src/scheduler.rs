//! Wave scheduler: export segments in consecutive waves of bounded size.
//! Every segment in a wave runs on its own worker thread; the next wave starts
//! only after the whole wave has finished. Failures are isolated per segment.

use crate::config::DEFAULT_MAX_PARALLEL;
use crate::error::{ExportError, ExportResult};
use crate::row::ExportedObject;
use crate::segment::Segment;
use indicatif::ProgressBar;
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;

/// A segment that could not be exported, with its rendered error chain.
#[derive(Clone, Debug, Serialize)]
pub struct SegmentFailure {
    pub segment: Segment,
    pub error: String,
}

/// Best-effort union of what succeeded, plus what failed.
#[derive(Clone, Debug, Default, Serialize)]
pub struct JobReport {
    pub attempted: usize,
    pub objects: Vec<ExportedObject>,
    pub empty_segments: Vec<usize>,
    pub failures: Vec<SegmentFailure>,
    pub total_rows: u64,
}

impl JobReport {
    pub fn succeeded(&self) -> usize {
        self.objects.len() + self.empty_segments.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    fn record(&mut self, segment: Segment, outcome: Outcome) {
        self.attempted += 1;
        match outcome {
            Outcome::Exported(obj) => {
                tracing::info!(segment = segment.index, rows = obj.row_count, key = %obj.remote_key, "segment processed");
                self.total_rows += obj.row_count;
                self.objects.push(obj);
            }
            Outcome::NoData => self.empty_segments.push(segment.index),
            Outcome::Failed(error) => {
                tracing::error!(segment = segment.index, error = %error, "failed to process segment");
                self.failures.push(SegmentFailure { segment, error });
            }
        }
    }

    fn sort(&mut self) {
        self.objects.sort_by_key(|o| o.segment.index);
        self.empty_segments.sort_unstable();
        self.failures.sort_by_key(|f| f.segment.index);
    }
}

enum Outcome {
    Exported(ExportedObject),
    NoData,
    Failed(String),
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Run `export` over every segment, at most `max_concurrency` at a time (0 → default).
/// Only `ExportError::Job` is returned as an error; segment errors land in the report.
pub fn run_waves<F>(
    segments: &[Segment],
    max_concurrency: usize,
    progress: Option<&ProgressBar>,
    export: F,
) -> ExportResult<JobReport>
where
    F: Fn(&Segment) -> ExportResult<Option<ExportedObject>> + Sync,
{
    let wave_size = if max_concurrency == 0 { DEFAULT_MAX_PARALLEL } else { max_concurrency };
    let mut report = JobReport::default();
    if segments.is_empty() {
        return Ok(report);
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(wave_size.min(segments.len()))
        .thread_name(|i| format!("segment-worker-{i}"))
        .build()
        .map_err(|e| ExportError::Job(format!("cannot start segment workers: {e}")))?;

    let (tx, rx) = mpsc::channel::<(Segment, Outcome)>();
    let export = &export;

    for (wave_idx, wave) in segments.chunks(wave_size).enumerate() {
        let first = wave_idx * wave_size;
        tracing::info!(
            batch_start = first + 1,
            batch_end = first + wave.len(),
            total_segments = segments.len(),
            "processing segment batch"
        );

        pool.scope(|s| {
            for seg in wave {
                let tx = tx.clone();
                s.spawn(move |_| {
                    let outcome = match catch_unwind(AssertUnwindSafe(|| export(seg))) {
                        Ok(Ok(Some(obj))) => Outcome::Exported(obj),
                        Ok(Ok(None)) => Outcome::NoData,
                        Ok(Err(e)) => Outcome::Failed(e.chain()),
                        Err(payload) => Outcome::Failed(format!("segment worker panicked: {}", panic_message(payload))),
                    };
                    if let Some(pb) = progress {
                        pb.inc(1);
                    }
                    // The receiver outlives every wave.
                    let _ = tx.send((seg.clone(), outcome));
                });
            }
        });

        for (seg, outcome) in rx.try_iter() {
            report.record(seg, outcome);
        }
    }
    drop(tx);

    report.sort();
    tracing::info!(
        total_segments = segments.len(),
        exported = report.objects.len(),
        empty = report.empty_segments.len(),
        failed = report.failures.len(),
        total_rows = report.total_rows,
        "all segments processed"
    );
    Ok(report)
}
