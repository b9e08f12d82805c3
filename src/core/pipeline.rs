//! Purpose: Drive extract -> decode -> distance -> accumulate over one input and time it.
//! Exports: `Pipeline`, `PipelineConfig`, `Report`, `InputFormat`, `StructureMode`,
//!          `TimingPrecision`, `EmptyPolicy`.
//! Role: Owns the input buffer for the run; the only place phases and checkpoints meet.
//! Invariants: The buffer is read-only; shards never split a record.
//! Invariants: Each worker owns its accumulator; partials merge in shard order.
//! Invariants: The first decode or structure failure aborts the run.
use std::ops::Range;
use std::path::Path;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;

use crate::core::accumulate::{StableSum, Summation};
use crate::core::binary::{self, RECORD_BYTES};
use crate::core::decode::decode_record;
use crate::core::error::{Error, ErrorKind};
use crate::core::extract::{Delimiters, Records, StrictRecords, check_structure, shard_ranges};
use crate::core::haversine::{EARTH_RADIUS_KM, pair_distance};
use crate::core::input::InputBuffer;

/// Upper bound on `threads` is this many workers per available CPU, with a
/// floor of `MIN_THREAD_LIMIT`.
const THREADS_PER_CPU: usize = 8;
const MIN_THREAD_LIMIT: usize = 256;
const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    #[default]
    Json,
    Binary,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureMode {
    #[default]
    Lenient,
    Strict,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingPrecision {
    #[default]
    Fine,
    Coarse,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum EmptyPolicy {
    #[default]
    Error,
    /// Report count 0 with mean 0.0.
    Zero,
}

#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    pub radius: f64,
    pub delimiters: Delimiters,
    pub format: InputFormat,
    pub structure: StructureMode,
    /// 1 runs on the calling thread; 0 uses one worker per available CPU.
    pub threads: usize,
    pub timing: TimingPrecision,
    pub empty: EmptyPolicy,
    pub summation: Summation,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            radius: EARTH_RADIUS_KM,
            delimiters: Delimiters::default(),
            format: InputFormat::default(),
            structure: StructureMode::default(),
            threads: 1,
            timing: TimingPrecision::default(),
            empty: EmptyPolicy::default(),
            summation: Summation::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("radius must be a positive number, got {}", self.radius)));
        }
        let limit = thread_limit();
        if self.threads > limit {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "threads must be at most {limit} on this machine, got {}",
                self.threads
            )));
        }
        self.delimiters.validate()
    }

    fn worker_count(&self) -> usize {
        match self.threads {
            0 => available_cpus(),
            n => n,
        }
    }
}

fn available_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn thread_limit() -> usize {
    (available_cpus() * THREADS_PER_CPU).max(MIN_THREAD_LIMIT)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Report {
    pub mean: f64,
    pub count: u64,
    /// Input length in bytes.
    pub bytes: u64,
    pub parse_secs: f64,
    pub compute_secs: f64,
    pub total_secs: f64,
    /// Input megabytes (2^20 bytes) per second of each phase; `None` when the
    /// phase took no measurable time.
    pub parse_mb_per_sec: Option<f64>,
    pub compute_mb_per_sec: Option<f64>,
    /// Records per second of total elapsed time; `None` when that is zero.
    pub throughput: Option<f64>,
    pub timing: TimingPrecision,
}

pub struct Pipeline {
    buffer: InputBuffer,
    config: PipelineConfig,
    started: Instant,
    loaded: Instant,
}

impl Pipeline {
    /// Maps the input file; time spent here is reported as parse time.
    pub fn load(path: impl AsRef<Path>, config: PipelineConfig) -> Result<Self, Error> {
        config.validate()?;
        let started = Instant::now();
        let buffer = InputBuffer::open(path)?;
        let loaded = Instant::now();
        tracing::info!(
            bytes = buffer.len(),
            mapped = buffer.is_mapped(),
            "input loaded"
        );
        Ok(Self {
            buffer,
            config,
            started,
            loaded,
        })
    }

    pub fn from_buffer(buffer: InputBuffer, config: PipelineConfig) -> Result<Self, Error> {
        config.validate()?;
        let now = Instant::now();
        Ok(Self {
            buffer,
            config,
            started: now,
            loaded: now,
        })
    }

    pub fn buffer(&self) -> &InputBuffer {
        &self.buffer
    }

    pub fn run(self) -> Result<Report, Error> {
        let acc = accumulate(&self.buffer, &self.config)?;
        let computed = Instant::now();

        let mean = match (acc.mean(), self.config.empty) {
            (Ok(mean), _) => mean,
            (Err(_), EmptyPolicy::Zero) => 0.0,
            (Err(err), EmptyPolicy::Error) => {
                let err = err.with_message("no records found in input");
                return Err(match self.buffer.path() {
                    Some(path) => err.with_path(path),
                    None => err,
                });
            }
        };
        let finished = Instant::now();

        let timing = self.config.timing;
        let parse_secs = seconds(self.loaded - self.started, timing);
        let compute_secs = seconds(computed - self.loaded, timing);
        let total_secs = seconds(finished - self.started, timing);
        let throughput = (total_secs > 0.0).then(|| acc.count() as f64 / total_secs);
        let bytes = self.buffer.len() as u64;

        tracing::info!(
            records = acc.count(),
            bytes,
            compute_secs,
            "computation finished"
        );

        Ok(Report {
            mean,
            count: acc.count(),
            bytes,
            parse_secs,
            compute_secs,
            total_secs,
            parse_mb_per_sec: bandwidth(bytes, parse_secs),
            compute_mb_per_sec: bandwidth(bytes, compute_secs),
            throughput,
            timing,
        })
    }
}

fn bandwidth(bytes: u64, secs: f64) -> Option<f64> {
    (secs > 0.0).then(|| bytes as f64 / BYTES_PER_MEGABYTE / secs)
}

fn seconds(elapsed: Duration, timing: TimingPrecision) -> f64 {
    match timing {
        TimingPrecision::Fine => elapsed.as_secs_f64(),
        TimingPrecision::Coarse => elapsed.as_secs() as f64,
    }
}

/// Folds every record in `buf` into one accumulator, in parallel when
/// `config.threads` asks for more than one worker.
pub fn accumulate(buf: &[u8], config: &PipelineConfig) -> Result<StableSum, Error> {
    match config.format {
        InputFormat::Json => accumulate_json(buf, config),
        InputFormat::Binary => accumulate_binary(buf, config),
    }
}

fn accumulate_json(buf: &[u8], config: &PipelineConfig) -> Result<StableSum, Error> {
    let workers = config.worker_count();
    if workers == 1 {
        return match config.structure {
            StructureMode::Lenient => fold_json_range(buf, 0..buf.len(), config),
            StructureMode::Strict => fold_json_strict(buf, config),
        };
    }

    if config.structure == StructureMode::Strict {
        let records = check_structure(buf, config.delimiters)?;
        tracing::debug!(records, "structure check passed");
    }
    let ranges = shard_ranges(buf, workers, config.delimiters.close);
    if ranges.len() == 1 {
        return fold_json_range(buf, 0..buf.len(), config);
    }
    run_shards(workers, &ranges, |range| fold_json_range(buf, range, config), config)
}

fn accumulate_binary(buf: &[u8], config: &PipelineConfig) -> Result<StableSum, Error> {
    let trailing = binary::trailing_bytes(buf.len());
    if trailing != 0 {
        let offset = buf.len() - trailing;
        match config.structure {
            StructureMode::Strict => {
                return Err(Error::new(ErrorKind::Structural)
                    .with_message(format!(
                        "input ends with a partial {trailing}-byte record"
                    ))
                    .with_offset(offset as u64));
            }
            StructureMode::Lenient => {
                tracing::warn!(offset, trailing, "ignoring partial binary record at end of input");
            }
        }
    }

    let workers = config.worker_count();
    let ranges = binary::record_ranges(buf.len(), workers);
    if workers == 1 || ranges.len() <= 1 {
        return fold_binary_range(buf, 0..buf.len() - trailing, config);
    }
    run_shards(workers, &ranges, |range| fold_binary_range(buf, range, config), config)
}

fn run_shards<F>(
    workers: usize,
    ranges: &[Range<usize>],
    fold: F,
    config: &PipelineConfig,
) -> Result<StableSum, Error>
where
    F: Fn(Range<usize>) -> Result<StableSum, Error> + Sync,
{
    // Never start more threads than there are shards to fold.
    let workers = workers.min(ranges.len()).max(1);
    tracing::debug!(workers, shards = ranges.len(), "sharding input");
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start worker pool")
                .with_source(err)
        })?;

    let partials = pool.install(|| {
        ranges
            .par_iter()
            .map(|range| fold(range.clone()))
            .collect::<Result<Vec<_>, Error>>()
    })?;

    let mut total = StableSum::new(config.summation);
    for partial in &partials {
        total.merge(partial);
    }
    Ok(total)
}

fn fold_json_range(
    buf: &[u8],
    range: Range<usize>,
    config: &PipelineConfig,
) -> Result<StableSum, Error> {
    let mut acc = StableSum::new(config.summation);
    for span in Records::in_range(buf, range, config.delimiters) {
        let pair = decode_record(buf, span)?;
        acc.fold(pair_distance(&pair, config.radius));
    }
    Ok(acc)
}

fn fold_json_strict(buf: &[u8], config: &PipelineConfig) -> Result<StableSum, Error> {
    let mut acc = StableSum::new(config.summation);
    for span in StrictRecords::new(buf, config.delimiters) {
        let pair = decode_record(buf, span?)?;
        acc.fold(pair_distance(&pair, config.radius));
    }
    Ok(acc)
}

fn fold_binary_range(
    buf: &[u8],
    range: Range<usize>,
    config: &PipelineConfig,
) -> Result<StableSum, Error> {
    let mut acc = StableSum::new(config.summation);
    let base = range.start;
    for (index, chunk) in buf[range].chunks_exact(RECORD_BYTES).enumerate() {
        let pair = binary::decode_quad(chunk, base + index * RECORD_BYTES)?;
        acc.fold(pair_distance(&pair, config.radius));
    }
    Ok(acc)
}
